//! Pretty-printing serializer.

use std::collections::HashMap;
use std::path::Path;

use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use passthrough_types::{PassthroughError, Result};

use crate::document::{Document, Misc, NodeId, NodeKind};
use crate::name::{NamespaceDecl, XML_NS_URI};

const DECLARATION: &str = "<?xml version='1.0' encoding='UTF-8'?>\n";

type Scope = HashMap<Option<String>, String>;

fn io_err(e: impl std::fmt::Display) -> PassthroughError {
    PassthroughError::Io(std::io::Error::other(e.to_string()))
}

impl Document {
    /// Serialize with an XML declaration and two-space indentation.
    pub fn to_xml_string(&self) -> Result<String> {
        let mut out = Vec::from(DECLARATION.as_bytes());
        for misc in self.prolog() {
            match misc {
                Misc::Comment(text) => out.extend(format!("<!--{text}-->\n").as_bytes()),
                Misc::ProcessingInstruction(text) => out.extend(format!("<?{text}?>\n").as_bytes()),
            }
        }
        let mut writer = Writer::new_with_indent(out, b' ', 2);
        let mut scope = Scope::new();
        scope.insert(Some("xml".into()), XML_NS_URI.into());
        write_node(self, self.root(), &mut writer, &scope)?;
        let mut out = writer.into_inner();
        out.push(b'\n');
        String::from_utf8(out).map_err(io_err)
    }

    /// Serialize to `path`, creating parent directories as needed.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_xml_string()?)?;
        tracing::debug!(path = %path.display(), "wrote XML document");
        Ok(())
    }
}

/// Namespace declarations an element needs on top of what it already declares.
fn missing_declarations(doc: &Document, id: NodeId, scope: &Scope) -> Vec<NamespaceDecl> {
    let Some(element) = doc.element(id) else {
        return Vec::new();
    };
    let mut local: Scope = scope.clone();
    for decl in &element.namespaces {
        local.insert(decl.prefix.clone(), decl.uri.clone());
    }
    let mut missing = Vec::new();
    let names = std::iter::once(&element.name).chain(element.attributes.iter().map(|a| &a.name));
    for name in names {
        let Some(ns) = &name.namespace else {
            continue;
        };
        if local.get(&name.prefix) != Some(ns) {
            local.insert(name.prefix.clone(), ns.clone());
            missing.push(NamespaceDecl {
                prefix: name.prefix.clone(),
                uri: ns.clone(),
            });
        }
    }
    if element.name.namespace.is_none()
        && element.name.prefix.is_none()
        && local.get(&None).is_some_and(|uri| !uri.is_empty())
    {
        missing.push(NamespaceDecl {
            prefix: None,
            uri: String::new(),
        });
    }
    missing
}

fn write_node(
    doc: &Document,
    id: NodeId,
    writer: &mut Writer<Vec<u8>>,
    scope: &Scope,
) -> Result<()> {
    let element = match doc.kind(id) {
        NodeKind::Comment(text) => {
            return writer
                .write_event(Event::Comment(BytesText::from_escaped(text.as_str())))
                .map_err(io_err);
        }
        NodeKind::Element(e) => e,
    };

    let tag = element.name.prefixed();
    let mut start = BytesStart::new(tag.as_str());
    let mut inner = scope.clone();
    let declared = element
        .namespaces
        .iter()
        .cloned()
        .chain(missing_declarations(doc, id, scope));
    for decl in declared {
        let key = match &decl.prefix {
            Some(p) => format!("xmlns:{p}"),
            None => "xmlns".to_string(),
        };
        start.push_attribute((key.as_str(), decl.uri.as_str()));
        inner.insert(decl.prefix, decl.uri);
    }
    for attr in &element.attributes {
        start.push_attribute((attr.name.prefixed().as_str(), attr.value.as_str()));
    }

    let text = element.text.as_deref().filter(|t| !t.is_empty());
    let children = doc.children(id);
    if text.is_none() && children.is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(io_err);
    }

    writer.write_event(Event::Start(start)).map_err(io_err)?;
    if let Some(text) = text {
        writer
            .write_event(Event::Text(BytesText::from_escaped(partial_escape(text))))
            .map_err(io_err)?;
    }
    for child in children {
        write_node(doc, *child, writer, &inner)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(tag.as_str())))
        .map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::QName;

    #[test]
    fn pretty_prints_with_declaration() {
        let doc = Document::parse_str(r#"<a xmlns="urn:x"><b>1 &amp; 2</b><c/></a>"#).unwrap();
        let out = doc.to_xml_string().unwrap();
        assert!(out.starts_with("<?xml version='1.0' encoding='UTF-8'?>\n"));
        assert!(out.contains("<a xmlns=\"urn:x\">\n  <b>1 &amp; 2</b>\n  <c/>\n</a>"));
    }

    #[test]
    fn reparses_to_same_structure() {
        let src = r#"<p:a xmlns:p="urn:p" xmlns:q="urn:q"><p:b q:k="v">t</p:b><!-- c --></p:a>"#;
        let doc = Document::parse_str(src).unwrap();
        let again = Document::parse_str(&doc.to_xml_string().unwrap()).unwrap();
        assert_eq!(doc.element_paths(), again.element_paths());
        let b = again.element_children(again.root()).next().unwrap();
        assert_eq!(again.attribute(b, Some("urn:q"), "k"), Some("v"));
    }

    #[test]
    fn declares_namespaces_removed_by_detach() {
        let mut doc = Document::parse_str(r#"<a xmlns:p="urn:p"><p:b/></a>"#).unwrap();
        let b = doc.element_children(doc.root()).next().unwrap();
        let mut other = Document::new(QName::local("root"));
        let copy = other.create_element(doc.name(b).unwrap().clone());
        let root = other.root();
        other.append_child(root, copy);
        doc.detach(b);
        let out = other.to_xml_string().unwrap();
        assert!(out.contains(r#"<p:b xmlns:p="urn:p"/>"#));
    }

    #[test]
    fn write_to_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.xml");
        let doc = Document::parse_str("<a/>").unwrap();
        doc.write_to(&path).unwrap();
        let back = Document::parse_file(&path).unwrap();
        assert_eq!(back.name(back.root()).unwrap().local, "a");
    }
}
