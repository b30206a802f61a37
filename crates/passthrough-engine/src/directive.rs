//! The closed set of `pt:` directive attributes and their extraction.

use std::collections::BTreeMap;

use passthrough_types::{PassthroughError, Result, PT_NS_URI, PT_PREFIX};
use passthrough_xml::{Document, NodeId};

/// A directive attribute. Variant order is resolution order: `sources` must be
/// bound before any directive evaluated against a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Directive {
    Sources,
    Fetch,
    Multi,
    Required,
    Fill,
    Defer,
    MultiBranch,
    Reorder,
}

/// Result types a directive accepts after coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueTypes {
    pub boolean: bool,
    pub integer: bool,
    pub string: bool,
}

impl ValueTypes {
    const fn of(boolean: bool, integer: bool, string: bool) -> Self {
        Self {
            boolean,
            integer,
            string,
        }
    }
}

impl std::fmt::Display for ValueTypes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = [
            (self.boolean, "boolean"),
            (self.integer, "integer"),
            (self.string, "string"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect();
        if names.is_empty() {
            f.write_str("moniker")
        } else {
            f.write_str(&names.join(" or "))
        }
    }
}

impl Directive {
    pub const ALL: [Directive; 8] = [
        Directive::Sources,
        Directive::Fetch,
        Directive::Multi,
        Directive::Required,
        Directive::Fill,
        Directive::Defer,
        Directive::MultiBranch,
        Directive::Reorder,
    ];

    /// Attribute local name.
    pub const fn name(self) -> &'static str {
        match self {
            Directive::Sources => "sources",
            Directive::Fetch => "fetch",
            Directive::Multi => "multi",
            Directive::Required => "required",
            Directive::Fill => "fill",
            Directive::Defer => "defer",
            Directive::MultiBranch => "multi_branch",
            Directive::Reorder => "reorder",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.name() == name)
    }

    /// Whether an undeclared directive takes the parent's resolved value.
    pub const fn inherited(self) -> bool {
        matches!(
            self,
            Directive::Sources | Directive::Fetch | Directive::Required | Directive::MultiBranch
        )
    }

    pub const fn types(self) -> ValueTypes {
        match self {
            Directive::Sources => ValueTypes::of(false, false, false),
            Directive::Multi => ValueTypes::of(true, true, false),
            Directive::Fill => ValueTypes::of(false, false, true),
            Directive::MultiBranch => ValueTypes::of(false, true, false),
            Directive::Fetch | Directive::Required | Directive::Defer | Directive::Reorder => {
                ValueTypes::of(true, false, false)
            }
        }
    }
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{PT_PREFIX}:{}", self.name())
    }
}

/// Raw directive expressions declared on one node, in resolution order.
pub type Expressions = BTreeMap<Directive, String>;

/// Render `pt:name="expression"` for error messages.
pub fn describe(directive: Directive, expression: &str) -> String {
    format!("{directive}=\"{expression}\"")
}

/// Collect the directive attributes declared on `node`.
pub fn extract(doc: &Document, node: NodeId) -> Result<Expressions> {
    let mut out = Expressions::new();
    let Some(element) = doc.element(node) else {
        return Ok(out);
    };
    for attr in &element.attributes {
        if attr.name.namespace.as_deref() != Some(PT_NS_URI) {
            continue;
        }
        let directive = Directive::from_name(&attr.name.local).ok_or_else(|| {
            PassthroughError::syntax(
                format!("unrecognised {PT_PREFIX} attribute: {}", attr.name.local),
                doc.location(node),
            )
        })?;
        if attr.value.is_empty() {
            return Err(PassthroughError::eval(
                format!("{} - directive expression is empty", describe(directive, "")),
                doc.location(node),
            ));
        }
        out.insert(directive, attr.value.clone());
    }
    Ok(out)
}

/// Remove every directive attribute from `node`.
pub fn strip(doc: &mut Document, node: NodeId) {
    if let Some(element) = doc.element_mut(node) {
        element
            .attributes
            .retain(|a| a.name.namespace.as_deref() != Some(PT_NS_URI));
    }
}

pub fn remove(doc: &mut Document, node: NodeId, directive: Directive) {
    doc.remove_attribute(node, Some(PT_NS_URI), directive.name());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(xml: &str) -> Document {
        Document::parse_str(xml).unwrap()
    }

    #[test]
    fn names_round_trip() {
        for d in Directive::ALL {
            assert_eq!(Directive::from_name(d.name()), Some(d));
        }
        assert_eq!(Directive::from_name("multibranch"), None);
    }

    #[test]
    fn inheritance_table() {
        let inherited: Vec<_> = Directive::ALL.into_iter().filter(|d| d.inherited()).collect();
        assert_eq!(
            inherited,
            vec![
                Directive::Sources,
                Directive::Fetch,
                Directive::Required,
                Directive::MultiBranch
            ]
        );
        assert!(Directive::Multi.types().integer && Directive::Multi.types().boolean);
    }

    #[test]
    fn extract_orders_by_table() {
        let d = doc(r#"<a xmlns:pt="urn:passthrough" pt:fill="'x'" pt:sources="primary" other="1"/>"#);
        let exps = extract(&d, d.root()).unwrap();
        let keys: Vec<_> = exps.keys().copied().collect();
        assert_eq!(keys, vec![Directive::Sources, Directive::Fill]);
    }

    #[test]
    fn unknown_directive_is_syntax_error() {
        let d = doc(r#"<a xmlns:pt="urn:passthrough" pt:fetched="true()"/>"#);
        let err = extract(&d, d.root()).unwrap_err();
        assert_eq!(err.category(), "syntax");
        assert!(err.to_string().contains("fetched"));
    }

    #[test]
    fn empty_expression_is_eval_error() {
        let d = doc(r#"<a xmlns:pt="urn:passthrough" pt:fetch=""/>"#);
        assert_eq!(extract(&d, d.root()).unwrap_err().category(), "eval");
    }

    #[test]
    fn strip_leaves_other_attributes() {
        let mut d = doc(r#"<a xmlns:pt="urn:passthrough" pt:fetch="true()" unit="s"/>"#);
        let root = d.root();
        strip(&mut d, root);
        assert_eq!(d.element(root).unwrap().attributes.len(), 1);
        assert_eq!(d.attribute(root, None, "unit"), Some("s"));
    }
}
