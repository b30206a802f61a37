//! The recursive template walk: multi-source duplication, fetch, multi-branch
//! replication and fill application.

use passthrough_types::{PassthroughError, Result};
use passthrough_xml::{Document, NodeId};

use crate::directive::{self, Directive};
use crate::engine::Engine;
use crate::label::PathRenderer;
use crate::state::{FillValue, Multi, PropertyState};

/// Substitution token inside template text.
pub const FILL_TOKEN: &str = "{}";

enum Fetched {
    /// The node was branched or removed; its subtree is handled.
    Done,
    Continue,
}

impl Engine {
    /// Resolve the whole template in place.
    pub(crate) fn walk(&mut self) -> Result<()> {
        let root = self.store.template().root();
        self.process(&PropertyState::root(), root)
    }

    fn process(&mut self, parent: &PropertyState, node: NodeId) -> Result<()> {
        if self.store.template().is_comment(node) {
            return Ok(());
        }
        let state = PropertyState::resolve(parent, node, &self.env())?;

        if !state.sources.secondary().is_empty() {
            return self.expand_sources(state, node);
        }

        if state.fetch {
            if let Fetched::Done = self.fetch(parent, &state, node)? {
                return Ok(());
            }
        } else {
            if let Multi::Count(n) = state.multi {
                if n > 1 {
                    return self.multi_branch(parent, node, n - 1);
                }
            }
            if state.has_expression(Directive::Required) {
                self.scheduler.defer_required(state.clone(), node);
            }
        }

        let doc = self.store.template();
        if doc.has_element_children(node) {
            let children = doc.children(node).to_vec();
            for child in children {
                self.process(&state, child)?;
            }
        } else if state.has_expression(Directive::Fill) {
            if state.defer {
                self.scheduler.defer_fill(state.clone(), node);
            } else if let Some(value) = state.eval_fill(&self.env())? {
                apply_fill(self.store.template_mut(), node, value)?;
            }
        }

        directive::strip(self.store.template_mut(), node);
        Ok(())
    }

    /// One copy of `node` per member of its source group, in source order.
    fn expand_sources(&mut self, mut state: PropertyState, node: NodeId) -> Result<()> {
        let doc = self.store.template_mut();
        directive::remove(doc, node, Directive::Sources);
        let location = doc.location(node);
        let parent = doc.parent(node).ok_or_else(|| {
            PassthroughError::template(
                "the root element cannot be bound to a multi-document source group",
                location,
            )
        })?;
        let index = doc.detach(node).unwrap_or(0);
        let primary = state.sources.primary();
        let members = state.sources.members();
        tracing::debug!(
            node = %doc.location(node).tag.unwrap_or_default(),
            members = members.len(),
            "expanding multi-source subtree"
        );
        for member in members.into_iter().rev() {
            let doc = self.store.template_mut();
            let elem = if Some(member) == primary {
                node
            } else {
                doc.deep_clone(node)
            };
            doc.insert_child(parent, index, elem);
            state.rebind_source(member, &self.env());
            self.process(&state, elem)?;
        }
        Ok(())
    }

    fn fetch(&mut self, parent: &PropertyState, state: &PropertyState, node: NodeId) -> Result<Fetched> {
        let env = self.env();
        let doc = env.store.template();
        let location = doc.location(node);
        let key = state
            .sources
            .primary()
            .ok_or_else(|| PassthroughError::eval("no source has been set", location.clone()))?;
        let source = env.store.get(key).ok_or_else(|| {
            PassthroughError::eval("source document is not loaded", location.clone())
        })?;
        let path = doc.element_path(node);
        let matches = source.find_all(&path);
        tracing::debug!(path = %path, matches = matches.len(), "fetch");

        match matches.len() {
            n if n > 1 => {
                if let Some(expected) = state.multi.expected() {
                    if expected != n {
                        return Err(PassthroughError::fetch(
                            format!(
                                "{n} source elements found but pt:multi is set to expect {expected}"
                            ),
                            location,
                        ));
                    }
                }
                self.multi_branch(parent, node, n - 1)?;
                Ok(Fetched::Done)
            }
            0 => {
                if state.required == Some(true) {
                    let renderer = PathRenderer::new(env.template_ns);
                    let file = source
                        .url()
                        .and_then(|p| p.file_name())
                        .map(|f| f.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "<unresolved filename>".into());
                    return Err(PassthroughError::fetch(
                        format!(
                            "{} could not be located at path {} in source {} from {file}",
                            location.tag.clone().unwrap_or_default(),
                            renderer.clark_to_prefix(&path.to_string()),
                            state.moniker.as_deref().unwrap_or("<unnamed>"),
                        ),
                        location,
                    ));
                }
                tracing::debug!(path = %path, "optional element absent from source, removing");
                self.store.template_mut().detach(node);
                Ok(Fetched::Done)
            }
            _ => {
                if !doc.has_element_children(node) {
                    let matched = matches[0];
                    let attributes = source
                        .element(matched)
                        .map(|e| e.attributes.clone())
                        .unwrap_or_default();
                    let text = source.text(matched).map(str::to_string);
                    let doc = self.store.template_mut();
                    for attr in attributes {
                        doc.set_attribute(node, attr.name, attr.value);
                    }
                    doc.set_text(node, text);
                }
                Ok(Fetched::Continue)
            }
        }
    }

    /// Insert `copies` clones after `node` and walk each under `parent` with
    /// `multi_branch` set to its position.
    fn multi_branch(&mut self, parent: &PropertyState, node: NodeId, copies: usize) -> Result<()> {
        let doc = self.store.template_mut();
        directive::remove(doc, node, Directive::Multi);
        let location = doc.location(node);
        let container = doc.parent(node).ok_or_else(|| {
            PassthroughError::template("the root element cannot be replicated", location)
        })?;
        let index = doc.index_in_parent(node).unwrap_or(0) + 1;
        let siblings: Vec<NodeId> = (0..copies).map(|_| doc.deep_clone(node)).collect();
        for (offset, sibling) in siblings.iter().enumerate() {
            doc.insert_child(container, index + offset, *sibling);
        }
        tracing::debug!(
            node = %doc.location(node).tag.unwrap_or_default(),
            copies = copies + 1,
            "multi-branch"
        );

        let mut branch = parent.clone();
        for (i, elem) in std::iter::once(node).chain(siblings).enumerate() {
            branch.multi_branch = Some(i);
            self.process(&branch, elem)?;
        }
        Ok(())
    }
}

/// Write a fill result into `node`, substituting `{}` tokens positionally.
pub fn apply_fill(doc: &mut Document, node: NodeId, value: FillValue) -> Result<()> {
    let text = doc.text(node).unwrap_or_default().to_string();
    let tokens = text.matches(FILL_TOKEN).count();
    let location = doc.location(node);
    if tokens == 0 {
        return match value {
            FillValue::Single(s) => {
                doc.set_text(node, Some(s));
                Ok(())
            }
            FillValue::Many(values) => Err(PassthroughError::eval(
                format!(
                    "pt:fill yielded {} values but the text has no {FILL_TOKEN} substitution token",
                    values.len()
                ),
                location,
            )),
        };
    }
    let values = match value {
        FillValue::Single(s) => vec![s],
        FillValue::Many(values) => values,
    };
    if values.len() != tokens {
        let quantity = if values.len() < tokens { "too few" } else { "too many" };
        return Err(PassthroughError::eval(
            format!(
                "pt:fill yielded {quantity} values ({}) for {tokens} substitution tokens",
                values.len()
            ),
            location,
        ));
    }
    let mut out = String::with_capacity(text.len());
    let mut values = values.into_iter();
    let mut segments = text.split(FILL_TOKEN).peekable();
    while let Some(segment) = segments.next() {
        out.push_str(segment);
        if segments.peek().is_some() {
            out.push_str(&values.next().unwrap_or_default());
        }
    }
    doc.set_text(node, Some(out));
    Ok(())
}
