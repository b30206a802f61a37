//! Source documents: the document store, source groups and the moniker map.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use passthrough_types::{PassthroughError, Result};
use passthrough_xml::Document;
use passthrough_xpath::{DocKey, DocumentSet};

/// Moniker under which the template itself is reachable as a source.
pub const TEMPLATE_MONIKER: &str = "template";

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

/// Owns the template and every source document; keys are stable for a run.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    documents: Vec<Document>,
}

impl DocumentStore {
    pub const TEMPLATE: DocKey = DocKey(0);

    pub fn new(template: Document) -> Self {
        Self {
            documents: vec![template],
        }
    }

    pub fn add(&mut self, document: Document) -> DocKey {
        self.documents.push(document);
        DocKey(self.documents.len() - 1)
    }

    pub fn get(&self, key: DocKey) -> Option<&Document> {
        self.documents.get(key.0)
    }

    pub fn template(&self) -> &Document {
        &self.documents[Self::TEMPLATE.0]
    }

    pub fn template_mut(&mut self) -> &mut Document {
        &mut self.documents[Self::TEMPLATE.0]
    }

    pub fn into_template(mut self) -> Document {
        self.documents.swap_remove(Self::TEMPLATE.0)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl DocumentSet for DocumentStore {
    fn document(&self, key: DocKey) -> Option<&Document> {
        self.get(key)
    }
}

// ---------------------------------------------------------------------------
// SourceGroup
// ---------------------------------------------------------------------------

/// A primary document plus ordered, distinct secondary documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceGroup {
    primary: Option<DocKey>,
    secondary: Vec<DocKey>,
}

impl SourceGroup {
    /// The unset group every state starts from.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(key: DocKey) -> Self {
        Self {
            primary: Some(key),
            secondary: Vec::new(),
        }
    }

    pub fn from_members(members: Vec<DocKey>) -> Result<Self> {
        let mut iter = members.iter().copied();
        let Some(primary) = iter.next() else {
            return Err(PassthroughError::SourceMap("group is empty".into()));
        };
        let secondary: Vec<DocKey> = iter.collect();
        for (i, key) in members.iter().enumerate() {
            if members[..i].contains(key) {
                return Err(PassthroughError::SourceMap(
                    "group contains duplicate documents".into(),
                ));
            }
        }
        Ok(Self {
            primary: Some(primary),
            secondary,
        })
    }

    pub fn primary(&self) -> Option<DocKey> {
        self.primary
    }

    pub fn secondary(&self) -> &[DocKey] {
        &self.secondary
    }

    /// `primary` followed by the secondaries, in declaration order.
    pub fn members(&self) -> Vec<DocKey> {
        self.primary
            .into_iter()
            .chain(self.secondary.iter().copied())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none()
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// A document given either as a file to parse or already parsed.
#[derive(Debug, Clone)]
pub enum SourceInput {
    Path(PathBuf),
    Document(Document),
}

impl From<PathBuf> for SourceInput {
    fn from(path: PathBuf) -> Self {
        SourceInput::Path(path)
    }
}

impl From<&std::path::Path> for SourceInput {
    fn from(path: &std::path::Path) -> Self {
        SourceInput::Path(path.to_path_buf())
    }
}

impl From<Document> for SourceInput {
    fn from(doc: Document) -> Self {
        SourceInput::Document(doc)
    }
}

/// What one moniker maps to before loading.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    One(SourceInput),
    Many(Vec<SourceInput>),
}

impl From<SourceInput> for SourceSpec {
    fn from(input: SourceInput) -> Self {
        SourceSpec::One(input)
    }
}

impl From<PathBuf> for SourceSpec {
    fn from(path: PathBuf) -> Self {
        SourceSpec::One(path.into())
    }
}

impl From<Document> for SourceSpec {
    fn from(doc: Document) -> Self {
        SourceSpec::One(doc.into())
    }
}

impl From<Vec<SourceInput>> for SourceSpec {
    fn from(inputs: Vec<SourceInput>) -> Self {
        SourceSpec::Many(inputs)
    }
}

// ---------------------------------------------------------------------------
// SourceMap
// ---------------------------------------------------------------------------

/// Moniker to source group; read-only once the walk starts.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    groups: BTreeMap<String, SourceGroup>,
}

impl SourceMap {
    pub fn get(&self, moniker: &str) -> Option<&SourceGroup> {
        self.groups.get(moniker)
    }

    pub fn contains(&self, moniker: &str) -> bool {
        self.groups.contains_key(moniker)
    }

    pub fn insert(&mut self, moniker: impl Into<String>, group: SourceGroup) {
        self.groups.insert(moniker.into(), group);
    }

    pub fn monikers(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Load every source into `store` and build the map.
    ///
    /// Paths are parsed once each; a path repeated inside one group makes the
    /// group fail the distinct-members check.
    pub fn build(
        store: &mut DocumentStore,
        specs: Vec<(String, SourceSpec)>,
        include_template: bool,
    ) -> Result<Self> {
        let mut map = SourceMap::default();
        let mut parsed: HashMap<PathBuf, DocKey> = HashMap::new();
        let mut load = |store: &mut DocumentStore, input: SourceInput| -> Result<DocKey> {
            match input {
                SourceInput::Document(doc) => Ok(store.add(doc)),
                SourceInput::Path(path) => {
                    if let Some(key) = parsed.get(&path) {
                        return Ok(*key);
                    }
                    tracing::debug!(path = %path.display(), "parsing source document");
                    let key = store.add(Document::parse_file(&path)?);
                    parsed.insert(path, key);
                    Ok(key)
                }
            }
        };
        for (moniker, spec) in specs {
            let members = match spec {
                SourceSpec::One(input) => vec![load(store, input)?],
                SourceSpec::Many(inputs) => inputs
                    .into_iter()
                    .map(|input| load(store, input))
                    .collect::<Result<Vec<_>>>()?,
            };
            let group = SourceGroup::from_members(members).map_err(|e| match e {
                PassthroughError::SourceMap(msg) => PassthroughError::SourceMap(format!(
                    "error encountered in source group {moniker}: {msg}"
                )),
                other => other,
            })?;
            map.insert(moniker, group);
        }
        if include_template {
            if map.contains(TEMPLATE_MONIKER) {
                return Err(PassthroughError::SourceMap(format!(
                    "source map already contains a mapping for the key '{TEMPLATE_MONIKER}'"
                )));
            }
            map.insert(TEMPLATE_MONIKER, SourceGroup::single(DocumentStore::TEMPLATE));
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn doc(xml: &str) -> Document {
        Document::parse_str(xml).unwrap()
    }

    fn store() -> DocumentStore {
        DocumentStore::new(doc("<t/>"))
    }

    #[test]
    fn group_members_keep_order() {
        let g = SourceGroup::from_members(vec![DocKey(3), DocKey(1), DocKey(2)]).unwrap();
        assert_eq!(g.primary(), Some(DocKey(3)));
        assert_eq!(g.secondary(), &[DocKey(1), DocKey(2)]);
        assert_eq!(g.members(), vec![DocKey(3), DocKey(1), DocKey(2)]);
        assert!(SourceGroup::empty().is_empty());
    }

    #[test]
    fn empty_and_duplicate_groups_fail() {
        assert!(SourceGroup::from_members(Vec::new()).is_err());
        let err = SourceGroup::from_members(vec![DocKey(1), DocKey(1)]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn build_adds_template_moniker() {
        let mut store = store();
        let map = SourceMap::build(
            &mut store,
            vec![("primary".into(), doc("<s/>").into())],
            true,
        )
        .unwrap();
        assert_eq!(map.get("primary").unwrap().primary(), Some(DocKey(1)));
        assert_eq!(
            map.get(TEMPLATE_MONIKER).unwrap().primary(),
            Some(DocumentStore::TEMPLATE)
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn template_moniker_clash() {
        let mut store = store();
        let err = SourceMap::build(
            &mut store,
            vec![("template".into(), doc("<s/>").into())],
            true,
        )
        .unwrap_err();
        assert!(matches!(err, PassthroughError::SourceMap(_)));
        let ok = SourceMap::build(
            &mut store,
            vec![("template".into(), doc("<s/>").into())],
            false,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn paths_are_parsed_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.xml");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"<s><v>1</v></s>")
            .unwrap();
        let mut store = store();
        let map = SourceMap::build(
            &mut store,
            vec![
                ("a".into(), path.clone().into()),
                ("b".into(), path.clone().into()),
            ],
            false,
        )
        .unwrap();
        assert_eq!(map.get("a").unwrap().primary(), map.get("b").unwrap().primary());
        assert_eq!(store.len(), 2);

        let err = SourceMap::build(
            &mut store,
            vec![(
                "group".into(),
                SourceSpec::Many(vec![path.clone().into(), path.into()]),
            )],
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("source group group"));
    }
}
