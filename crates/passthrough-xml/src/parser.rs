//! quick-xml event stream to arena [`Document`].

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use passthrough_types::{PassthroughError, Result};

use crate::document::{Document, Element, Misc, Node, NodeId, NodeKind};
use crate::name::{split_prefixed, NamespaceDecl, QName, XML_NS_URI};

/// Tracks line/column for byte offsets as the reader advances.
struct LineTracker<'a> {
    input: &'a str,
    offset: usize,
    line: usize,
    line_start: usize,
}

impl<'a> LineTracker<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            offset: 0,
            line: 1,
            line_start: 0,
        }
    }

    fn advance_to(&mut self, pos: usize) -> (usize, usize) {
        let pos = pos.min(self.input.len());
        if pos > self.offset {
            for (i, b) in self.input.as_bytes()[self.offset..pos].iter().enumerate() {
                if *b == b'\n' {
                    self.line += 1;
                    self.line_start = self.offset + i + 1;
                }
            }
            self.offset = pos;
        }
        (self.line, pos.saturating_sub(self.line_start) + 1)
    }
}

struct Builder<'a> {
    nodes: Vec<Node>,
    stack: Vec<NodeId>,
    scopes: Vec<HashMap<Option<String>, String>>,
    root: Option<NodeId>,
    prolog: Vec<Misc>,
    lines: LineTracker<'a>,
}

impl<'a> Builder<'a> {
    fn error(&mut self, pos: usize, message: impl Into<String>) -> PassthroughError {
        let (line, col) = self.lines.advance_to(pos);
        PassthroughError::Parse {
            line,
            col,
            message: message.into(),
        }
    }

    fn lookup(&self, prefix: Option<&str>) -> Option<&str> {
        if prefix == Some("xml") {
            return Some(XML_NS_URI);
        }
        let key = prefix.map(String::from);
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(&key))
            .map(String::as_str)
            .filter(|uri| !uri.is_empty())
    }

    fn resolve(&mut self, prefix: Option<&str>, pos: usize) -> Result<Option<String>> {
        let namespace = self.lookup(prefix).map(String::from);
        match (prefix, &namespace) {
            (Some(p), None) => Err(self.error(pos, format!("unbound prefix '{p}'"))),
            _ => Ok(namespace),
        }
    }

    fn push_node(&mut self, kind: NodeKind, line: usize) -> NodeId {
        let id = NodeId::from_index(self.nodes.len());
        let parent = self.stack.last().copied();
        self.nodes.push(Node {
            kind,
            parent,
            children: Vec::new(),
            line: Some(line),
        });
        if let Some(p) = parent {
            self.nodes[p.index()].children.push(id);
        }
        id
    }

    fn open(&mut self, start: &BytesStart<'_>, pos: usize) -> Result<NodeId> {
        let (line, _) = self.lines.advance_to(pos);
        if self.stack.is_empty() && self.root.is_some() {
            return Err(self.error(pos, "multiple root elements"));
        }

        let raw_name = std::str::from_utf8(start.name().as_ref())
            .map_err(|e| self.error(pos, e.to_string()))?
            .to_string();

        let mut decls = Vec::new();
        let mut raw_attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| self.error(pos, e.to_string()))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|e| self.error(pos, e.to_string()))?
                .to_string();
            let value = attr
                .unescape_value()
                .map_err(|e| self.error(pos, e.to_string()))?
                .into_owned();
            if key == "xmlns" {
                decls.push(NamespaceDecl { prefix: None, uri: value });
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                decls.push(NamespaceDecl {
                    prefix: Some(prefix.to_string()),
                    uri: value,
                });
            } else {
                raw_attrs.push((key, value));
            }
        }

        self.scopes.push(
            decls
                .iter()
                .map(|d| (d.prefix.clone(), d.uri.clone()))
                .collect(),
        );

        let (prefix, local) = split_prefixed(&raw_name);
        let namespace = self.resolve(prefix, pos)?;
        let name = QName {
            prefix: prefix.map(String::from),
            namespace,
            local: local.to_string(),
        };

        let mut element = Element::new(name);
        element.namespaces = decls;
        for (key, value) in raw_attrs {
            let (prefix, local) = split_prefixed(&key);
            // Unprefixed attributes are in no namespace.
            let namespace = match prefix {
                Some(_) => self.resolve(prefix, pos)?,
                None => None,
            };
            element.attributes.push(crate::document::Attribute {
                name: QName {
                    prefix: prefix.map(String::from),
                    namespace,
                    local: local.to_string(),
                },
                value,
            });
        }

        let id = self.push_node(NodeKind::Element(element), line);
        if self.stack.is_empty() {
            self.root = Some(id);
        }
        self.stack.push(id);
        Ok(id)
    }

    fn close(&mut self) {
        if let Some(id) = self.stack.pop() {
            self.scopes.pop();
            let has_children = !self.nodes[id.index()].children.is_empty();
            if let NodeKind::Element(e) = &mut self.nodes[id.index()].kind {
                if has_children && e.text.as_deref().is_some_and(|t| t.trim().is_empty()) {
                    e.text = None;
                }
            }
        }
    }

    fn text(&mut self, text: &str) {
        let Some(&current) = self.stack.last() else {
            return;
        };
        // Text after the first child would be a tail; labels carry no mixed content.
        if !self.nodes[current.index()].children.is_empty() {
            return;
        }
        if let NodeKind::Element(e) = &mut self.nodes[current.index()].kind {
            match &mut e.text {
                Some(existing) => existing.push_str(text),
                None => e.text = Some(text.to_string()),
            }
        }
    }

    fn comment(&mut self, text: String, pos: usize) {
        if self.stack.is_empty() {
            self.prolog.push(Misc::Comment(text));
        } else {
            let (line, _) = self.lines.advance_to(pos);
            self.push_node(NodeKind::Comment(text), line);
        }
    }
}

pub(crate) fn parse(input: &str) -> Result<Document> {
    let mut reader = Reader::from_str(input);
    let mut builder = Builder {
        nodes: Vec::new(),
        stack: Vec::new(),
        scopes: Vec::new(),
        root: None,
        prolog: Vec::new(),
        lines: LineTracker::new(input),
    };

    loop {
        let pos = reader.buffer_position() as usize;
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                let at = reader.buffer_position() as usize;
                return Err(builder.error(at, e.to_string()));
            }
        };
        match event {
            Event::Start(start) => {
                builder.open(&start, pos)?;
            }
            Event::Empty(start) => {
                builder.open(&start, pos)?;
                builder.close();
            }
            Event::End(_) => builder.close(),
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| builder.error(pos, e.to_string()))?;
                builder.text(&text);
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                builder.text(&text);
            }
            Event::Comment(text) => {
                let text = String::from_utf8_lossy(&text).into_owned();
                builder.comment(text, pos);
            }
            Event::PI(pi) => {
                if builder.stack.is_empty() {
                    let content = String::from_utf8_lossy(&pi).into_owned();
                    builder.prolog.push(Misc::ProcessingInstruction(content));
                }
            }
            Event::Decl(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
    }

    if !builder.stack.is_empty() {
        let end = input.len();
        return Err(builder.error(end, "unexpected end of document: unclosed element"));
    }
    let Some(root) = builder.root else {
        return Err(builder.error(0, "document has no root element"));
    };
    tracing::trace!(nodes = builder.nodes.len(), "parsed XML document");
    Ok(Document::from_parts(builder.nodes, root, builder.prolog))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_prefixed_and_default_namespaces() {
        let doc = Document::parse_str(
            r#"<Product xmlns="urn:pds" xmlns:pt="urn:passthrough">
  <title pt:fill="'x'">T</title>
</Product>"#,
        )
        .unwrap();
        let root = doc.root();
        assert_eq!(doc.name(root).unwrap().namespace.as_deref(), Some("urn:pds"));
        let title = doc.element_children(root).next().unwrap();
        assert_eq!(doc.attribute(title, Some("urn:passthrough"), "fill"), Some("'x'"));
        assert_eq!(doc.text(title), Some("T"));
        assert_eq!(doc.line(title), Some(2));
    }

    #[test]
    fn whitespace_text_on_parents_is_dropped() {
        let doc = Document::parse_str("<a>\n  <b> </b>\n</a>").unwrap();
        assert_eq!(doc.text(doc.root()), None);
        let b = doc.element_children(doc.root()).next().unwrap();
        assert_eq!(doc.text(b), Some(" "));
    }

    #[test]
    fn comments_are_kept_as_nodes() {
        let doc = Document::parse_str("<!-- head --><a><!-- inner --><b/></a>").unwrap();
        assert_eq!(doc.prolog(), &[Misc::Comment(" head ".into())]);
        assert_eq!(doc.children(doc.root()).len(), 2);
        assert!(doc.is_comment(doc.children(doc.root())[0]));
    }

    #[test]
    fn entities_are_unescaped() {
        let doc = Document::parse_str(r#"<a v="&lt;x&gt;">a &amp; b</a>"#).unwrap();
        assert_eq!(doc.text(doc.root()), Some("a & b"));
        assert_eq!(doc.attribute(doc.root(), None, "v"), Some("<x>"));
    }

    #[test]
    fn unbound_prefix_is_an_error() {
        let err = Document::parse_str("<x:a/>").unwrap_err();
        assert!(matches!(err, PassthroughError::Parse { .. }));
    }

    #[test]
    fn unclosed_element_is_an_error() {
        assert!(Document::parse_str("<a><b></b>").is_err());
    }

    #[test]
    fn parse_file_remembers_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("label.xml");
        std::fs::write(&path, "<a/>").unwrap();
        let doc = Document::parse_file(&path).unwrap();
        assert_eq!(doc.url(), Some(path.as_path()));
    }
}
