use passthrough_xml::NodeId;

/// Identifies one document among those an evaluation can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocKey(pub usize);

/// A node within a document, including the XPath-only node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    /// The document node above the root element.
    Root,
    Element(NodeId),
    /// The attribute at this index on the element.
    Attribute(NodeId, usize),
    /// The text content of the element.
    Text(NodeId),
    Comment(NodeId),
}

impl NodeRef {
    /// The element this node belongs to, if any.
    pub fn owner(self) -> Option<NodeId> {
        match self {
            NodeRef::Root => None,
            NodeRef::Element(id)
            | NodeRef::Attribute(id, _)
            | NodeRef::Text(id)
            | NodeRef::Comment(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub doc: DocKey,
    pub node: NodeRef,
}

impl Handle {
    pub fn new(doc: DocKey, node: NodeRef) -> Self {
        Self { doc, node }
    }

    pub fn element(doc: DocKey, id: NodeId) -> Self {
        Self::new(doc, NodeRef::Element(id))
    }

    pub fn as_element(&self) -> Option<NodeId> {
        match self.node {
            NodeRef::Element(id) => Some(id),
            _ => None,
        }
    }
}

/// Result of evaluating an expression.
///
/// `Sequence` is produced only by extension functions that return several
/// independent values (e.g. a positional fill list).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Number(f64),
    String(String),
    Nodes(Vec<Handle>),
    Sequence(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Nodes(_) => "node-set",
            Value::Sequence(_) => "sequence",
        }
    }

    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Nodes(nodes) => !nodes.is_empty(),
            Value::Sequence(items) => !items.is_empty(),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

/// XPath `number()` conversion of a string: optional minus, digits, optional fraction.
pub fn parse_number(s: &str) -> f64 {
    let t = s.trim();
    let body = t.strip_prefix('-').unwrap_or(t);
    let valid = !body.is_empty()
        && body.chars().all(|c| c.is_ascii_digit() || c == '.')
        && body.matches('.').count() <= 1
        && body != ".";
    if !valid {
        return f64::NAN;
    }
    t.parse().unwrap_or(f64::NAN)
}

/// XPath string form of a number.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == n.trunc() && n.abs() < 1e18 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn number_parsing_is_strict() {
        assert_eq!(parse_number(" 42 "), 42.0);
        assert_eq!(parse_number("-1.5"), -1.5);
        assert_eq!(parse_number(".5"), 0.5);
        assert!(parse_number("1e3").is_nan());
        assert!(parse_number("+1").is_nan());
        assert!(parse_number("inf").is_nan());
        assert!(parse_number("").is_nan());
    }

    #[test]
    fn boolean_conversion() {
        assert!(Value::from("x").to_boolean());
        assert!(!Value::from("").to_boolean());
        assert!(!Value::Number(f64::NAN).to_boolean());
        assert!(!Value::Nodes(Vec::new()).to_boolean());
    }
}
