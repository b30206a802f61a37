//! Arena-indexed XML tree.
//!
//! Nodes are addressed by [`NodeId`] and never freed: detaching a subtree only
//! unlinks it from its parent, so ids held by a traversal stay valid while the
//! tree is cloned, detached and re-inserted around them.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use passthrough_types::{Location, Result};

use crate::name::{NamespaceDecl, QName, XML_NS_URI};
use crate::path::{ElementPath, PathSegment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Element {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    pub namespaces: Vec<NamespaceDecl>,
    /// Text before the first child (lxml `.text`).
    pub text: Option<String>,
}

impl Element {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
            text: None,
        }
    }

    pub fn attribute(&self, namespace: Option<&str>, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.matches(namespace, local))
            .map(|a| a.value.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Element(Element),
    Comment(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) line: Option<usize>,
}

/// Content outside the root element that survives a parse/serialize round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum Misc {
    Comment(String),
    ProcessingInstruction(String),
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    prolog: Vec<Misc>,
    url: Option<PathBuf>,
}

impl Document {
    /// Create a document holding a single root element.
    pub fn new(root: QName) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            prolog: Vec::new(),
            url: None,
        };
        doc.root = doc.create_element(root);
        doc
    }

    /// Parse a document from a string.
    pub fn parse_str(input: &str) -> Result<Self> {
        crate::parser::parse(input)
    }

    /// Parse a document from disk, remembering its path for error messages.
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)?;
        let mut doc = Self::parse_str(&input)?;
        doc.url = Some(path.to_path_buf());
        Ok(doc)
    }

    pub(crate) fn from_parts(nodes: Vec<Node>, root: NodeId, prolog: Vec<Misc>) -> Self {
        Self {
            nodes,
            root,
            prolog,
            url: None,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn url(&self) -> Option<&Path> {
        self.url.as_deref()
    }

    pub fn set_url(&mut self, url: impl Into<PathBuf>) {
        self.url = Some(url.into());
    }

    pub fn prolog(&self) -> &[Misc] {
        &self.prolog
    }

    // --- node access ---

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id.0].kind {
            NodeKind::Element(e) => Some(e),
            NodeKind::Comment(_) => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Element(e) => Some(e),
            NodeKind::Comment(_) => None,
        }
    }

    pub fn is_comment(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].kind, NodeKind::Comment(_))
    }

    pub fn name(&self, id: NodeId) -> Option<&QName> {
        self.element(id).map(|e| &e.name)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .filter(move |c| self.element(*c).is_some())
    }

    /// True when the node has at least one element child.
    pub fn has_element_children(&self, id: NodeId) -> bool {
        self.element_children(id).next().is_some()
    }

    pub fn line(&self, id: NodeId) -> Option<usize> {
        self.nodes[id.0].line
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.element(id).and_then(|e| e.text.as_deref())
    }

    pub fn set_text(&mut self, id: NodeId, text: Option<String>) {
        if let Some(e) = self.element_mut(id) {
            e.text = text;
        }
    }

    pub fn attribute(&self, id: NodeId, namespace: Option<&str>, local: &str) -> Option<&str> {
        self.element(id).and_then(|e| e.attribute(namespace, local))
    }

    /// Set an attribute, replacing any attribute with the same expanded name.
    pub fn set_attribute(&mut self, id: NodeId, name: QName, value: impl Into<String>) {
        let value = value.into();
        if let Some(e) = self.element_mut(id) {
            match e.attributes.iter_mut().find(|a| a.name.same_expanded(&name)) {
                Some(existing) => existing.value = value,
                None => e.attributes.push(Attribute { name, value }),
            }
        }
    }

    pub fn remove_attribute(
        &mut self,
        id: NodeId,
        namespace: Option<&str>,
        local: &str,
    ) -> Option<String> {
        let e = self.element_mut(id)?;
        let pos = e
            .attributes
            .iter()
            .position(|a| a.name.matches(namespace, local))?;
        Some(e.attributes.remove(pos).value)
    }

    /// Tag and line of a node, for error messages.
    pub fn location(&self, id: NodeId) -> Location {
        match &self.nodes[id.0].kind {
            NodeKind::Element(e) => Location::new(e.name.local.clone(), self.line(id)),
            NodeKind::Comment(_) => Location::new("<comment>", self.line(id)),
        }
    }

    // --- construction and mutation ---

    fn push(&mut self, kind: NodeKind, line: Option<usize>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
            line,
        });
        id
    }

    /// Create a detached element.
    pub fn create_element(&mut self, name: QName) -> NodeId {
        self.push(NodeKind::Element(Element::new(name)), None)
    }

    /// Create a detached comment.
    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::Comment(text.into()), None)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        let len = self.nodes[parent.0].children.len();
        self.insert_child(parent, len, child);
    }

    /// Insert `child` at `index` among all children of `parent` (comments included).
    /// A child that is still attached elsewhere is detached first.
    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        let children = &mut self.nodes[parent.0].children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
    }

    /// Unlink a node from its parent; returns its former index.
    pub fn detach(&mut self, id: NodeId) -> Option<usize> {
        let parent = self.nodes[id.0].parent.take()?;
        let children = &mut self.nodes[parent.0].children;
        let pos = children.iter().position(|c| *c == id)?;
        children.remove(pos);
        Some(pos)
    }

    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.nodes[id.0].parent?;
        self.nodes[parent.0].children.iter().position(|c| *c == id)
    }

    /// Deep-copy a subtree; the copy is detached.
    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let kind = self.nodes[id.0].kind.clone();
        let line = self.nodes[id.0].line;
        let copy = self.push(kind, line);
        let children = self.nodes[id.0].children.clone();
        for child in children {
            let child_copy = self.deep_clone(child);
            self.nodes[child_copy.0].parent = Some(copy);
            self.nodes[copy.0].children.push(child_copy);
        }
        copy
    }

    /// True when the node is reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.root {
                return true;
            }
            match self.nodes[current.0].parent {
                Some(p) => current = p,
                None => return false,
            }
        }
    }

    /// Remove every comment below the root.
    pub fn strip_comments(&mut self) {
        let comments: Vec<NodeId> = self
            .descendants(self.root)
            .into_iter()
            .filter(|id| self.is_comment(*id))
            .collect();
        for id in comments {
            self.detach(id);
        }
    }

    // --- traversal ---

    /// The subtree in document order, the node itself first.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            for child in self.nodes[current.0].children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Like [`descendants`](Self::descendants), elements only.
    pub fn descendant_elements(&self, id: NodeId) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|n| self.element(*n).is_some())
            .collect()
    }

    /// Preorder rank of every attached node, indexed by `NodeId::index`.
    pub fn document_order(&self) -> Vec<Option<usize>> {
        let mut ranks = vec![None; self.nodes.len()];
        for (rank, id) in self.descendants(self.root).into_iter().enumerate() {
            ranks[id.0] = Some(rank);
        }
        ranks
    }

    /// In-scope namespace bindings of a node (nearest declaration wins).
    pub fn namespace_map(&self, id: NodeId) -> BTreeMap<Option<String>, String> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(n) = current {
            chain.push(n);
            current = self.nodes[n.0].parent;
        }
        let mut map = BTreeMap::new();
        map.insert(Some("xml".to_string()), XML_NS_URI.to_string());
        for n in chain.into_iter().rev() {
            if let Some(e) = self.element(n) {
                for decl in &e.namespaces {
                    map.insert(decl.prefix.clone(), decl.uri.clone());
                }
            }
        }
        map
    }

    /// Drop namespace declarations whose URI no element or attribute name uses.
    pub fn cleanup_namespaces(&mut self) {
        let mut used: HashSet<String> = HashSet::new();
        for id in self.descendant_elements(self.root) {
            if let Some(e) = self.element(id) {
                used.extend(e.name.namespace.iter().cloned());
                for attr in &e.attributes {
                    used.extend(attr.name.namespace.iter().cloned());
                }
            }
        }
        for id in self.descendant_elements(self.root) {
            if let Some(e) = self.element_mut(id) {
                e.namespaces.retain(|decl| used.contains(&decl.uri));
            }
        }
    }

    // --- element paths ---

    /// Structural path of an element relative to the root (lxml `getelementpath`).
    ///
    /// A segment carries a 1-based index only when its parent has several element
    /// children with the same expanded name.
    pub fn element_path(&self, id: NodeId) -> ElementPath {
        let mut segments = Vec::new();
        let mut current = id;
        while current != self.root {
            let Some(parent) = self.parent(current) else {
                break;
            };
            let Some(name) = self.name(current) else {
                break;
            };
            let same: Vec<NodeId> = self
                .element_children(parent)
                .filter(|c| self.name(*c).is_some_and(|n| n.same_expanded(name)))
                .collect();
            let index = if same.len() > 1 {
                same.iter().position(|c| *c == current).map(|p| p + 1)
            } else {
                None
            };
            segments.push(PathSegment {
                namespace: name.namespace.clone(),
                local: name.local.clone(),
                index,
            });
            current = parent;
        }
        segments.reverse();
        ElementPath::new(segments)
    }

    /// All elements matching a structural path, in document order.
    pub fn find_all(&self, path: &ElementPath) -> Vec<NodeId> {
        let mut current = vec![self.root];
        for segment in path.segments() {
            let mut next = Vec::new();
            for node in &current {
                let matching: Vec<NodeId> = self
                    .element_children(*node)
                    .filter(|c| {
                        self.name(*c)
                            .is_some_and(|n| n.matches(segment.namespace.as_deref(), &segment.local))
                    })
                    .collect();
                match segment.index {
                    Some(i) => next.extend(matching.get(i.wrapping_sub(1)).copied()),
                    None => next.extend(matching),
                }
            }
            current = next;
        }
        current
    }

    pub fn find(&self, path: &ElementPath) -> Option<NodeId> {
        self.find_all(path).into_iter().next()
    }

    /// Every attached element path, used for structural comparisons.
    pub fn element_paths(&self) -> BTreeSet<String> {
        self.descendant_elements(self.root)
            .into_iter()
            .map(|id| self.element_path(id).to_string())
            .collect()
    }
}

impl NodeId {
    pub(crate) fn from_index(index: usize) -> Self {
        NodeId(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "urn:test";

    fn doc() -> Document {
        Document::parse_str(
            r#"<root xmlns="urn:test">
                <a>1</a>
                <b><c>x</c></b>
                <a>2</a>
            </root>"#,
        )
        .unwrap()
    }

    #[test]
    fn element_path_indexes_repeated_siblings() {
        let d = doc();
        let root = d.root();
        let kids: Vec<_> = d.element_children(root).collect();
        assert_eq!(d.element_path(kids[0]).to_string(), "{urn:test}a[1]");
        assert_eq!(d.element_path(kids[2]).to_string(), "{urn:test}a[2]");
        let c = d.element_children(kids[1]).next().unwrap();
        assert_eq!(d.element_path(c).to_string(), "{urn:test}b/{urn:test}c");
        assert_eq!(d.element_path(root).to_string(), ".");
    }

    #[test]
    fn find_all_without_index_matches_every_sibling() {
        let d = doc();
        let path = ElementPath::new(vec![PathSegment {
            namespace: Some(NS.into()),
            local: "a".into(),
            index: None,
        }]);
        let found = d.find_all(&path);
        assert_eq!(found.len(), 2);
        assert_eq!(d.text(found[1]), Some("2"));
    }

    #[test]
    fn deep_clone_is_independent() {
        let mut d = doc();
        let b = d.element_children(d.root()).nth(1).unwrap();
        let copy = d.deep_clone(b);
        assert!(d.parent(copy).is_none());
        let c_copy = d.element_children(copy).next().unwrap();
        d.set_text(c_copy, Some("changed".into()));
        let c = d.element_children(b).next().unwrap();
        assert_eq!(d.text(c), Some("x"));
    }

    #[test]
    fn detach_and_reinsert() {
        let mut d = doc();
        let root = d.root();
        let b = d.element_children(root).nth(1).unwrap();
        let idx = d.detach(b).unwrap();
        assert!(!d.is_attached(b));
        assert_eq!(d.element_children(root).count(), 2);
        d.insert_child(root, idx, b);
        assert!(d.is_attached(b));
        assert_eq!(d.element_children(root).nth(1), Some(b));
    }

    #[test]
    fn set_attribute_replaces_by_expanded_name() {
        let mut d = doc();
        let root = d.root();
        d.set_attribute(root, QName::local("unit"), "s");
        d.set_attribute(root, QName::local("unit"), "ms");
        assert_eq!(d.attribute(root, None, "unit"), Some("ms"));
        assert_eq!(d.remove_attribute(root, None, "unit"), Some("ms".into()));
        assert_eq!(d.attribute(root, None, "unit"), None);
    }

    #[test]
    fn namespace_map_includes_default() {
        let d = doc();
        let map = d.namespace_map(d.root());
        assert_eq!(map.get(&None).map(String::as_str), Some(NS));
    }
}
