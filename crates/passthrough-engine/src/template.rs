//! Public entry point: build a [`Template`] from a template document and its
//! sources, hand it to the client, then export it.

use std::path::{Path, PathBuf};

use passthrough_types::{PassthroughError, Result, DEFAULT_NS_PREFIX};
use passthrough_xml::{Document, NodeId};
use passthrough_xpath::{NamespaceMap, Value};

use crate::engine::{ContextMap, Engine};
use crate::export::Exporter;
use crate::extensions::{Extension, ExtensionRegistry};
use crate::label::{self, IDENTIFIER_XPATH};
use crate::scheduler::DeferredScheduler;
use crate::source::{DocumentStore, SourceInput, SourceMap, SourceSpec};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateOptions {
    /// Expose the template itself under the `template` moniker.
    pub include_template_source: bool,
    pub keep_template_comments: bool,
    pub skip_structure_check: bool,
    /// Prefix bound to a document's default namespace in directive expressions.
    pub default_ns_prefix: String,
    /// Field whose last `:`-separated component names the exported file.
    pub identifier_xpath: String,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            include_template_source: true,
            keep_template_comments: false,
            skip_structure_check: false,
            default_ns_prefix: DEFAULT_NS_PREFIX.to_string(),
            identifier_xpath: IDENTIFIER_XPATH.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct TemplateBuilder {
    template: Option<SourceInput>,
    sources: Vec<(String, SourceSpec)>,
    context: ContextMap,
    extensions: ExtensionRegistry,
    options: TemplateOptions,
}

impl TemplateBuilder {
    pub fn template(mut self, template: impl Into<SourceInput>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Bind `moniker` to a single document.
    pub fn source(mut self, moniker: impl Into<String>, input: impl Into<SourceInput>) -> Self {
        self.sources
            .push((moniker.into(), SourceSpec::One(input.into())));
        self
    }

    /// Bind `moniker` to an ordered group; the first member is the primary.
    pub fn source_group<I>(mut self, moniker: impl Into<String>, inputs: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<SourceInput>,
    {
        let inputs = inputs.into_iter().map(Into::into).collect();
        self.sources.push((moniker.into(), SourceSpec::Many(inputs)));
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn context_map(mut self, context: ContextMap) -> Self {
        self.context.extend(context);
        self
    }

    pub fn extension(
        mut self,
        prefix: impl Into<String>,
        name: impl Into<String>,
        extension: impl Extension + 'static,
    ) -> Self {
        self.extensions.register(prefix, name, extension);
        self
    }

    pub fn options(mut self, options: TemplateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn include_template_source(mut self, on: bool) -> Self {
        self.options.include_template_source = on;
        self
    }

    pub fn keep_template_comments(mut self, on: bool) -> Self {
        self.options.keep_template_comments = on;
        self
    }

    pub fn skip_structure_check(mut self, on: bool) -> Self {
        self.options.skip_structure_check = on;
        self
    }

    /// Load everything and run the walk.
    pub fn build(self) -> Result<Template> {
        let mut template = match self.template {
            Some(SourceInput::Path(path)) => Document::parse_file(&path)?,
            Some(SourceInput::Document(doc)) => doc,
            None => {
                return Err(PassthroughError::SourceMap(
                    "no template document was given".into(),
                ))
            }
        };
        if !self.options.keep_template_comments {
            template.strip_comments();
        }

        let mut store = DocumentStore::new(template);
        let sources = SourceMap::build(
            &mut store,
            self.sources,
            self.options.include_template_source,
        )?;
        let template_ns = label::namespace_map(store.template(), &self.options.default_ns_prefix);
        let mut engine = Engine {
            store,
            sources,
            extensions: self.extensions,
            context: self.context,
            options: self.options,
            template_ns,
            scheduler: DeferredScheduler::new(),
        };
        engine.walk()?;
        tracing::debug!(
            fills = engine.scheduler.pending_fills(),
            requireds = engine.scheduler.pending_requireds(),
            "template walk complete"
        );

        let snapshot = (!engine.options.skip_structure_check)
            .then(|| engine.store.template().clone());
        Ok(Template { engine, snapshot })
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// A resolved template awaiting export.
///
/// Between [`TemplateBuilder::build`] and [`Template::export`] the caller may
/// edit text and attributes; structural edits fail the export.
pub struct Template {
    engine: Engine,
    snapshot: Option<Document>,
}

impl Template {
    pub fn builder() -> TemplateBuilder {
        TemplateBuilder::default()
    }

    pub fn document(&self) -> &Document {
        self.engine.store.template()
    }

    pub fn document_mut(&mut self) -> &mut Document {
        self.engine.store.template_mut()
    }

    /// Namespace map of the template root, default namespace included.
    pub fn namespaces(&self) -> &NamespaceMap {
        &self.engine.template_ns
    }

    pub fn options(&self) -> &TemplateOptions {
        &self.engine.options
    }

    /// Elements of the template selected by `xpath`.
    pub fn select(&self, xpath: &str) -> Result<Vec<NodeId>> {
        let env = self.engine.env();
        let root = self.document().root();
        match env.evaluate_template(xpath, root)? {
            Value::Nodes(nodes) => Ok(nodes
                .into_iter()
                .filter(|h| h.doc == DocumentStore::TEMPLATE)
                .filter_map(|h| h.as_element())
                .collect()),
            other => Err(PassthroughError::XPath(format!(
                "'{xpath}' selects a {}, not a node-set",
                other.type_name()
            ))),
        }
    }

    /// Run every export stage except writing and return the final label.
    pub fn finalize(self) -> Result<Document> {
        let mut exporter = Exporter::new(self.engine, self.snapshot);
        exporter.finalize()?;
        let mut doc = exporter.into_document();
        doc.cleanup_namespaces();
        Ok(doc)
    }

    /// Finalize and write the label into `directory`.
    pub fn export(self, directory: impl AsRef<Path>, filename: Option<&str>) -> Result<PathBuf> {
        let mut exporter = Exporter::new(self.engine, self.snapshot);
        exporter.finalize()?;
        exporter.write(directory.as_ref(), filename)
    }
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("options", &self.engine.options)
            .field("snapshot", &self.snapshot.is_some())
            .finish()
    }
}
