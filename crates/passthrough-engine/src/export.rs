//! Post-walk pipeline: deferred fills, pruning, population and structure checks,
//! serialization.

use std::fmt;
use std::path::{Path, PathBuf};

use passthrough_types::{Location, PassthroughError, Result};
use passthrough_xml::Document;
use passthrough_xpath::Value;

use crate::engine::Engine;
use crate::label::{self, PathRenderer};
use crate::walker::apply_fill;

/// Export stages, in the only order they may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExportStage {
    Built,
    FillsResolved,
    Pruned,
    PopulationChecked,
    StructureChecked,
    Written,
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExportStage::Built => "built",
            ExportStage::FillsResolved => "fills resolved",
            ExportStage::Pruned => "pruned",
            ExportStage::PopulationChecked => "population checked",
            ExportStage::StructureChecked => "structure checked",
            ExportStage::Written => "written",
        };
        f.write_str(s)
    }
}

/// An element path reported by the structure check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    pub tag: String,
    pub path: String,
}

pub struct Exporter {
    engine: Engine,
    snapshot: Option<Document>,
    stage: ExportStage,
}

impl Exporter {
    pub(crate) fn new(engine: Engine, snapshot: Option<Document>) -> Self {
        Self {
            engine,
            snapshot,
            stage: ExportStage::Built,
        }
    }

    pub fn stage(&self) -> ExportStage {
        self.stage
    }

    pub fn document(&self) -> &Document {
        self.engine.store.template()
    }

    fn require_stage(&self, from: ExportStage, to: ExportStage) -> Result<()> {
        if self.stage != from {
            return Err(PassthroughError::template(
                format!("export stage '{to}' cannot follow '{}'", self.stage),
                Location::unknown(),
            ));
        }
        Ok(())
    }

    fn advance(&mut self, to: ExportStage) {
        tracing::debug!(stage = %to, "export stage");
        self.stage = to;
    }

    /// Evaluate every deferred fill in queue order.
    pub fn resolve_fills(&mut self) -> Result<()> {
        self.require_stage(ExportStage::Built, ExportStage::FillsResolved)?;
        let items = self.engine.scheduler.take_fills();
        for item in items {
            let value = item.state.eval_fill(&self.engine.env())?;
            if let Some(value) = value {
                apply_fill(self.engine.store.template_mut(), item.node, value)?;
            }
        }
        self.advance(ExportStage::FillsResolved);
        Ok(())
    }

    /// Remove optional subtrees whose leaves are not populated, innermost first.
    pub fn prune(&mut self) -> Result<()> {
        self.require_stage(ExportStage::FillsResolved, ExportStage::Pruned)?;
        let items = self.engine.scheduler.take_requireds();
        for mut item in items {
            if item.state.eval_required(&self.engine.env())? {
                continue;
            }
            let doc = self.engine.store.template();
            let (mut populated, mut empty) = (false, false);
            for leaf in doc.descendant_elements(item.node) {
                if doc.has_element_children(leaf) {
                    continue;
                }
                let status = label::is_populated(doc, leaf);
                populated |= status;
                empty |= !status;
                if populated && empty {
                    break;
                }
            }
            if !empty || !doc.is_attached(item.node) {
                continue;
            }
            let tag = doc.location(item.node).tag.unwrap_or_default();
            let path = doc.element_path(item.node);
            if let Some(snapshot) = self.snapshot.as_mut() {
                match snapshot.find(&path) {
                    Some(twin) => {
                        snapshot.detach(twin);
                    }
                    None => tracing::debug!(path = %path, "no snapshot twin for pruned element"),
                }
            }
            if populated {
                tracing::warn!(node = %tag, "pruning partially populated element");
            } else {
                tracing::info!(node = %tag, "pruning empty element");
            }
            self.engine.store.template_mut().detach(item.node);
        }
        self.advance(ExportStage::Pruned);
        Ok(())
    }

    /// Every remaining leaf must carry text or `xsi:nil="true"`.
    pub fn check_population(&mut self) -> Result<()> {
        self.require_stage(ExportStage::Pruned, ExportStage::PopulationChecked)?;
        let doc = self.engine.store.template();
        for node in doc.descendant_elements(doc.root()) {
            if !doc.has_element_children(node) && !label::is_populated(doc, node) {
                return Err(PassthroughError::template(
                    "unpopulated leaf node encountered at export",
                    doc.location(node),
                ));
            }
        }
        self.advance(ExportStage::PopulationChecked);
        Ok(())
    }

    /// Compare element paths against the snapshot taken after the walk.
    pub fn check_structure(&mut self) -> Result<()> {
        self.require_stage(ExportStage::PopulationChecked, ExportStage::StructureChecked)?;
        match &self.snapshot {
            None => tracing::info!("skipping structure check"),
            Some(snapshot) => {
                let (added, removed) = structure_diff(self.engine.store.template(), snapshot);
                if !added.is_empty() || !removed.is_empty() {
                    let renderer = PathRenderer::new(&self.engine.template_ns);
                    return Err(PassthroughError::template(
                        structure_report(&renderer, &added, &removed),
                        Location::unknown(),
                    ));
                }
            }
        }
        self.snapshot = None;
        self.advance(ExportStage::StructureChecked);
        Ok(())
    }

    /// Serialize into `directory`, deriving the filename from the identifier
    /// field when none is given.
    pub fn write(&mut self, directory: &Path, filename: Option<&str>) -> Result<PathBuf> {
        self.require_stage(ExportStage::StructureChecked, ExportStage::Written)?;
        self.engine.store.template_mut().cleanup_namespaces();
        let filename = match filename {
            Some(f) => f.to_string(),
            None => self.derive_filename()?,
        };
        std::fs::create_dir_all(directory)?;
        let path = directory.join(filename);
        self.engine.store.template().write_to(&path)?;
        tracing::info!(path = %path.display(), "label written");
        self.advance(ExportStage::Written);
        Ok(path)
    }

    fn derive_filename(&self) -> Result<String> {
        let env = self.engine.env();
        let root = env.store.template().root();
        let xpath = &self.engine.options.identifier_xpath;
        let value = env.evaluate_template(xpath, root)?;
        let identifier = match &value {
            Value::Nodes(nodes) if nodes.is_empty() => None,
            other => Some(env.to_string(other)),
        }
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            PassthroughError::template(
                format!("cannot derive an export filename: {xpath} selected nothing"),
                Location::unknown(),
            )
        })?;
        let stem = identifier.trim().rsplit(':').next().unwrap_or_default();
        Ok(format!("{stem}.xml"))
    }

    /// Run every stage up to the structure check.
    pub fn finalize(&mut self) -> Result<()> {
        self.resolve_fills()?;
        self.prune()?;
        self.check_population()?;
        self.check_structure()
    }

    pub fn into_document(self) -> Document {
        self.engine.store.into_template()
    }
}

/// Element paths present in `current` but not `snapshot` (added), and the
/// reverse (removed), with their Clark-notation tags.
pub fn structure_diff(current: &Document, snapshot: &Document) -> (Vec<PathChange>, Vec<PathChange>) {
    let missing = |a: &Document, b: &Document| -> Vec<PathChange> {
        a.descendant_elements(a.root())
            .into_iter()
            .filter_map(|id| {
                let path = a.element_path(id);
                if b.find(&path).is_some() {
                    return None;
                }
                Some(PathChange {
                    tag: a.name(id).map(|n| n.clark()).unwrap_or_default(),
                    path: path.to_string(),
                })
            })
            .collect()
    };
    (missing(current, snapshot), missing(snapshot, current))
}

fn structure_report(renderer: &PathRenderer, added: &[PathChange], removed: &[PathChange]) -> String {
    let mut lines = vec![
        "the label structure has been altered after template parsing and population.".to_string(),
    ];
    for (name, record) in [("Added", added), ("Removed", removed)] {
        if record.is_empty() {
            continue;
        }
        lines.push(format!("\n{name} elements:"));
        for change in record {
            lines.push(format!(
                "{} @ {}",
                renderer.clark_to_prefix(&change.tag),
                renderer.clark_to_prefix(&change.path)
            ));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_reports_both_directions() {
        let before = Document::parse_str("<a><b/><c><d/></c></a>").unwrap();
        let mut after = before.clone();
        let c = after.element_children(after.root()).nth(1).unwrap();
        after.detach(c);
        let root = after.root();
        let e = after.create_element(passthrough_xml::QName::local("e"));
        after.append_child(root, e);

        let (added, removed) = structure_diff(&after, &before);
        assert_eq!(added, vec![PathChange { tag: "e".into(), path: "e".into() }]);
        let removed: Vec<_> = removed.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(removed, vec!["c", "c/d"]);
    }

    #[test]
    fn identical_trees_have_no_diff() {
        let doc = Document::parse_str("<a><b/><b/></a>").unwrap();
        let (added, removed) = structure_diff(&doc, &doc.clone());
        assert!(added.is_empty() && removed.is_empty());
    }

    #[test]
    fn report_uses_prefixes() {
        let mut ns = passthrough_xpath::NamespaceMap::new();
        ns.insert("pds".into(), "urn:pds".into());
        let renderer = PathRenderer::new(&ns);
        let report = structure_report(
            &renderer,
            &[PathChange {
                tag: "{urn:pds}x".into(),
                path: "{urn:pds}A/{urn:pds}x".into(),
            }],
            &[],
        );
        assert!(report.contains("\nAdded elements:\npds:x @ pds:A/pds:x"));
        assert!(!report.contains("Removed"));
    }

    #[test]
    fn stage_order() {
        assert!(ExportStage::Built < ExportStage::Written);
        assert_eq!(ExportStage::FillsResolved.to_string(), "fills resolved");
    }
}
