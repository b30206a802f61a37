//! XPath 1.0 over Passthrough XML documents.
//!
//! Expressions are compiled once with [`XPath::parse`] and evaluated against a
//! [`DocumentSet`] so that a single expression can navigate the template and any
//! number of source documents. Functions outside the core library are resolved
//! through a [`FunctionLibrary`].

pub mod ast;
pub mod eval;
mod functions;
mod lexer;
pub mod parser;
pub mod value;

use std::fmt;

use passthrough_types::Result;

pub use ast::Expr;
pub use eval::{CallContext, DocumentSet, Evaluator, FunctionLibrary, NamespaceMap};
pub use value::{format_number, parse_number, DocKey, Handle, NodeRef, Value};

/// A compiled expression together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct XPath {
    source: String,
    expr: Expr,
}

impl XPath {
    pub fn parse(source: &str) -> Result<Self> {
        Ok(Self {
            source: source.to_string(),
            expr: parser::parse(source)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

impl fmt::Display for XPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passthrough_types::PassthroughError;
    use passthrough_xml::Document;

    const LABEL: &str = r#"<Product_Observational xmlns="http://pds.nasa.gov/pds4/pds/v1">
  <Identification_Area>
    <logical_identifier>urn:nasa:pds:mission:data:obs_001</logical_identifier>
    <version_id>1.0</version_id>
  </Identification_Area>
  <Observation_Area>
    <Time_Coordinates>
      <start_date_time>2020-01-01T00:00:00Z</start_date_time>
      <stop_date_time>2020-01-01T01:00:00Z</stop_date_time>
    </Time_Coordinates>
    <Target_Identification><name>Mars</name></Target_Identification>
    <Target_Identification><name>Phobos</name></Target_Identification>
  </Observation_Area>
  <File_Area_Observational>
    <Array_2D_Image>
      <Axis_Array><elements unit="px">1024</elements></Axis_Array>
      <Axis_Array><elements unit="px">512</elements></Axis_Array>
    </Array_2D_Image>
  </File_Area_Observational>
</Product_Observational>"#;

    fn namespaces() -> NamespaceMap {
        let mut ns = NamespaceMap::new();
        ns.insert("pds".into(), "http://pds.nasa.gov/pds4/pds/v1".into());
        ns
    }

    fn eval(doc: &Document, expr: &str) -> Value {
        let ns = namespaces();
        let ev = Evaluator::new(doc, &ns);
        ev.evaluate(&XPath::parse(expr).unwrap(), Handle::element(DocKey(0), doc.root()))
            .unwrap()
    }

    fn eval_string(doc: &Document, expr: &str) -> String {
        let ns = namespaces();
        let ev = Evaluator::new(doc, &ns);
        let value = ev
            .evaluate(&XPath::parse(expr).unwrap(), Handle::element(DocKey(0), doc.root()))
            .unwrap();
        ev.to_string(&value)
    }

    #[test]
    fn descendant_lookup_with_prefix() {
        let doc = Document::parse_str(LABEL).unwrap();
        assert_eq!(
            eval_string(&doc, "//pds:logical_identifier"),
            "urn:nasa:pds:mission:data:obs_001"
        );
    }

    #[test]
    fn positional_predicates_and_counts() {
        let doc = Document::parse_str(LABEL).unwrap();
        assert_eq!(eval_string(&doc, "//pds:Target_Identification[2]/pds:name"), "Phobos");
        assert_eq!(eval(&doc, "count(//pds:Axis_Array)"), Value::Number(2.0));
        assert_eq!(eval(&doc, "sum(//pds:elements)"), Value::Number(1536.0));
        assert_eq!(
            eval_string(&doc, "//pds:Target_Identification[last()]/pds:name"),
            "Phobos"
        );
    }

    #[test]
    fn attributes_and_comparisons() {
        let doc = Document::parse_str(LABEL).unwrap();
        assert_eq!(eval_string(&doc, "//pds:elements[. = 512]/@unit"), "px");
        assert_eq!(eval(&doc, "//pds:elements = '1024'"), Value::Boolean(true));
        assert_eq!(eval(&doc, "//pds:elements > 2000"), Value::Boolean(false));
        assert_eq!(eval(&doc, "pds:Identification_Area/pds:version_id = 1"), Value::Boolean(true));
    }

    #[test]
    fn string_functions() {
        let doc = Document::parse_str(LABEL).unwrap();
        assert_eq!(
            eval_string(&doc, "substring-after(//pds:logical_identifier, 'data:')"),
            "obs_001"
        );
        assert_eq!(
            eval_string(&doc, "concat(//pds:Target_Identification[1]/pds:name, '-', 7 div 2)"),
            "Mars-3.5"
        );
        assert_eq!(eval_string(&doc, "normalize-space('  a   b ')"), "a b");
        assert_eq!(eval_string(&doc, "local-name(/*)"), "Product_Observational");
        assert_eq!(eval_string(&doc, "string(1 = 1)"), "true");
    }

    #[test]
    fn relative_axes() {
        let doc = Document::parse_str(LABEL).unwrap();
        assert_eq!(
            eval_string(
                &doc,
                "//pds:stop_date_time/preceding-sibling::pds:start_date_time"
            ),
            "2020-01-01T00:00:00Z"
        );
        assert_eq!(
            eval_string(&doc, "local-name(//pds:name/ancestor::*[2])"),
            "Observation_Area"
        );
        assert_eq!(eval(&doc, "count(//pds:name/..)"), Value::Number(2.0));
    }

    #[test]
    fn union_is_in_document_order() {
        let doc = Document::parse_str(LABEL).unwrap();
        let Value::Nodes(nodes) = eval(&doc, "//pds:stop_date_time | //pds:start_date_time") else {
            panic!("expected nodes");
        };
        let ns = namespaces();
        let ev = Evaluator::new(&doc, &ns);
        assert_eq!(ev.string_value(nodes[0]), "2020-01-01T00:00:00Z");
    }

    #[test]
    fn undefined_prefix_is_an_error() {
        let doc = Document::parse_str(LABEL).unwrap();
        let ns = namespaces();
        let ev = Evaluator::new(&doc, &ns);
        let err = ev
            .evaluate(&XPath::parse("//img:x").unwrap(), Handle::element(DocKey(0), doc.root()))
            .unwrap_err();
        assert!(matches!(err, PassthroughError::XPath(_)));
    }

    struct Shout;

    impl FunctionLibrary for Shout {
        fn call(
            &self,
            ctx: &CallContext<'_>,
            prefix: &str,
            name: &str,
            args: Vec<Value>,
        ) -> Option<Result<Value>> {
            (prefix == "pt" && name == "shout")
                .then(|| Ok(Value::String(ctx.evaluator.to_string(&args[0]).to_uppercase())))
        }
    }

    #[test]
    fn extension_functions_resolve_through_library() {
        let doc = Document::parse_str(LABEL).unwrap();
        let ns = namespaces();
        let lib = Shout;
        let ev = Evaluator::new(&doc, &ns).with_functions(&lib);
        let root = Handle::element(DocKey(0), doc.root());
        let value = ev
            .evaluate(&XPath::parse("pt:shout(//pds:name)").unwrap(), root)
            .unwrap();
        assert_eq!(value, Value::String("MARS".into()));
        let err = ev
            .evaluate(&XPath::parse("pt:whisper()").unwrap(), root)
            .unwrap_err();
        assert!(err.to_string().contains("unknown function 'pt:whisper'"));
    }

    #[test]
    fn multiple_documents() {
        let docs = vec![
            Document::parse_str("<a><v>template</v></a>").unwrap(),
            Document::parse_str("<b><v>source</v></b>").unwrap(),
        ];
        let ns = NamespaceMap::new();
        let ev = Evaluator::new(&docs, &ns);
        let value = ev
            .evaluate(
                &XPath::parse("/b/v").unwrap(),
                Handle::element(DocKey(1), docs[1].root()),
            )
            .unwrap();
        assert_eq!(ev.to_string(&value), "source");
    }
}
