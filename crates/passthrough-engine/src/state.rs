//! Property state: resolved directive values for one template node.

use passthrough_types::{Location, PassthroughError, Result};
use passthrough_xml::NodeId;
use passthrough_xpath::{format_number, DocKey, Handle, NamespaceMap, NodeRef, Value, XPath};

use crate::directive::{self, Directive, Expressions, ValueTypes};
use crate::engine::EvalEnv;
use crate::label;
use crate::source::SourceGroup;

/// Resolved `pt:multi`: a flag or an expected repetition count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multi {
    Flag(bool),
    Count(usize),
}

impl Multi {
    /// Expected number of source matches; `None` accepts any count.
    pub fn expected(self) -> Option<usize> {
        match self {
            Multi::Flag(true) => None,
            Multi::Flag(false) => Some(0),
            Multi::Count(n) => Some(n),
        }
    }
}

impl Default for Multi {
    fn default() -> Self {
        Multi::Flag(false)
    }
}

impl std::fmt::Display for Multi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Multi::Flag(b) => write!(f, "{b}"),
            Multi::Count(n) => write!(f, "{n}"),
        }
    }
}

/// Result of a `pt:fill` evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillValue {
    Single(String),
    Many(Vec<String>),
}

/// A directive result after coercion to the directive's type set.
#[derive(Debug, Clone, PartialEq)]
enum Conformed {
    Boolean(bool),
    Integer(usize),
    Text(String),
    Texts(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct PropertyState {
    pub sources: SourceGroup,
    /// Moniker the current source group was bound under.
    pub moniker: Option<String>,
    pub fetch: bool,
    pub multi: Multi,
    /// `None` while the decision is deferred to export.
    pub required: Option<bool>,
    pub defer: bool,
    pub multi_branch: Option<usize>,
    pub reorder: bool,
    expressions: Expressions,
    nsmap: NamespaceMap,
    node: Option<NodeId>,
}

impl PropertyState {
    /// The synthetic state above the template root.
    pub fn root() -> Self {
        Self {
            sources: SourceGroup::empty(),
            moniker: None,
            fetch: false,
            multi: Multi::default(),
            required: Some(true),
            defer: false,
            multi_branch: None,
            reorder: false,
            expressions: Expressions::new(),
            nsmap: NamespaceMap::new(),
            node: None,
        }
    }

    /// Inherit from `parent`, then overlay and evaluate the directives declared
    /// on `node`.
    pub fn resolve(parent: &PropertyState, node: NodeId, env: &EvalEnv<'_>) -> Result<Self> {
        let doc = env.store.template();
        let mut state = Self {
            sources: parent.sources.clone(),
            moniker: parent.moniker.clone(),
            fetch: parent.fetch,
            multi: Multi::default(),
            required: parent.required,
            defer: false,
            multi_branch: parent.multi_branch,
            reorder: false,
            expressions: directive::extract(doc, node)?,
            nsmap: parent.nsmap.clone(),
            node: Some(node),
        };

        if !state.expressions.is_empty()
            && !state.expressions.contains_key(&Directive::Sources)
            && state.sources.is_empty()
        {
            return Err(PassthroughError::eval(
                "no source has been set",
                state.location(env),
            ));
        }

        let declared: Vec<Directive> = state.expressions.keys().copied().collect();
        for d in declared {
            state.evaluate(d, false, env)?;
        }
        state.validate(parent, env)?;
        Ok(state)
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn expression(&self, d: Directive) -> Option<&str> {
        self.expressions.get(&d).map(String::as_str)
    }

    pub fn has_expression(&self, d: Directive) -> bool {
        self.expressions.contains_key(&d)
    }

    pub fn namespaces(&self) -> &NamespaceMap {
        &self.nsmap
    }

    /// Point the state at a single source document, keeping its moniker.
    pub fn rebind_source(&mut self, key: DocKey, env: &EvalEnv<'_>) {
        self.sources = SourceGroup::single(key);
        if let Some(doc) = env.store.get(key) {
            self.nsmap = label::namespace_map(doc, env.default_prefix);
        }
    }

    /// Evaluate the stored `pt:fill` expression now.
    pub fn eval_fill(&self, env: &EvalEnv<'_>) -> Result<Option<FillValue>> {
        if !self.has_expression(Directive::Fill) {
            return Ok(None);
        }
        match self.evaluate_expression(Directive::Fill, env)? {
            Conformed::Text(s) => Ok(Some(FillValue::Single(s))),
            Conformed::Texts(v) => Ok(Some(FillValue::Many(v))),
            other => Err(self.cast_error(Directive::Fill, &format!("{other:?}"), env)),
        }
    }

    /// Evaluate the stored `pt:required` expression now.
    pub fn eval_required(&mut self, env: &EvalEnv<'_>) -> Result<bool> {
        if self.has_expression(Directive::Required) {
            self.evaluate(Directive::Required, true, env)?;
        }
        Ok(self.required.unwrap_or(false))
    }

    pub fn location(&self, env: &EvalEnv<'_>) -> Location {
        self.node
            .map(|n| env.store.template().location(n))
            .unwrap_or_default()
    }

    // --- resolution ---

    fn evaluate(&mut self, d: Directive, deferred: bool, env: &EvalEnv<'_>) -> Result<()> {
        match d {
            Directive::Sources => {
                let moniker = self.expressions.get(&d).cloned().unwrap_or_default();
                let group = env.sources.get(&moniker).cloned().ok_or_else(|| {
                    PassthroughError::eval(
                        format!(
                            "{} did not match any source (group)",
                            directive::describe(d, &moniker)
                        ),
                        self.location(env),
                    )
                })?;
                if let Some(doc) = group.primary().and_then(|k| env.store.get(k)) {
                    self.nsmap = label::namespace_map(doc, env.default_prefix);
                }
                self.sources = group;
                self.moniker = Some(moniker);
                return Ok(());
            }
            Directive::Fill if !deferred => return Ok(()),
            Directive::Required if !self.fetch && !deferred => {
                self.required = None;
                return Ok(());
            }
            _ => {}
        }
        let value = self.evaluate_expression(d, env)?;
        let mismatch = |state: &Self, v: &Conformed| state.cast_error(d, &format!("{v:?}"), env);
        match (d, value) {
            (Directive::Fetch, Conformed::Boolean(b)) => self.fetch = b,
            (Directive::Required, Conformed::Boolean(b)) => self.required = Some(b),
            (Directive::Defer, Conformed::Boolean(b)) => self.defer = b,
            (Directive::Reorder, Conformed::Boolean(b)) => self.reorder = b,
            (Directive::Multi, Conformed::Boolean(b)) => self.multi = Multi::Flag(b),
            (Directive::Multi, Conformed::Integer(n)) => self.multi = Multi::Count(n),
            (Directive::MultiBranch, Conformed::Integer(n)) => self.multi_branch = Some(n),
            (_, other) => return Err(mismatch(self, &other)),
        }
        Ok(())
    }

    /// Evaluate a declared expression against the primary source root and
    /// coerce the result.
    fn evaluate_expression(&self, d: Directive, env: &EvalEnv<'_>) -> Result<Conformed> {
        let expression = self.expressions.get(&d).map(String::as_str).unwrap_or("");
        let location = self.location(env);
        let source = self.sources.primary().ok_or_else(|| {
            PassthroughError::eval("no source has been set", location.clone())
        })?;
        let wrap = |e: PassthroughError| match e.location() {
            Some(_) => e,
            None => PassthroughError::eval(
                format!("{} resulted in {e}", directive::describe(d, expression)),
                location.clone(),
            ),
        };
        let xpath = XPath::parse(expression).map_err(&wrap)?;
        let t_elem = self.node.unwrap_or_else(|| env.store.template().root());
        let value = env
            .evaluate(
                &xpath,
                &self.nsmap,
                Handle::new(source, NodeRef::Root),
                t_elem,
                Some(source),
            )
            .map_err(&wrap)?;
        self.conform(d, value, env)
    }

    fn conform(&self, d: Directive, value: Value, env: &EvalEnv<'_>) -> Result<Conformed> {
        let types = d.types();
        let exp = || directive::describe(d, self.expression(d).unwrap_or(""));
        let items = match value {
            Value::Nodes(nodes) => nodes.into_iter().map(|h| Value::Nodes(vec![h])).collect(),
            Value::Sequence(items) => items,
            scalar => return self.conform_scalar(d, types, scalar, env),
        };
        let mut items: Vec<Value> = items;
        match items.len() {
            0 => Err(PassthroughError::eval(
                format!("{} evaluation yielded an empty node-set", exp()),
                self.location(env),
            )),
            1 => {
                let item = items.remove(0);
                match item {
                    Value::Nodes(nodes) if nodes.len() == 1 => {
                        self.conform_node(d, types, nodes[0], env)
                    }
                    other => self.conform(d, other, env),
                }
            }
            n if d != Directive::Fill => Err(PassthroughError::eval(
                format!("{} evaluation yielded multiple results ({n})", exp()),
                self.location(env),
            )),
            n => {
                if let Some(branch) = self.multi_branch {
                    if branch >= n {
                        return Err(PassthroughError::eval(
                            format!(
                                "{} yielded {n} results, none for multi-branch index {branch}",
                                exp()
                            ),
                            self.location(env),
                        ));
                    }
                    return self.conform(d, items.swap_remove(branch), env);
                }
                items
                    .into_iter()
                    .map(|item| match self.conform(d, item, env)? {
                        Conformed::Text(s) => Ok(s),
                        other => Err(self.cast_error(d, &format!("{other:?}"), env)),
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(Conformed::Texts)
            }
        }
    }

    fn conform_node(
        &self,
        d: Directive,
        types: ValueTypes,
        handle: Handle,
        env: &EvalEnv<'_>,
    ) -> Result<Conformed> {
        if !types.string {
            let shown = env.string_value(handle);
            return Err(self.cast_error(d, &format!("node '{shown}'"), env));
        }
        let text = match handle.node {
            NodeRef::Element(id) => env
                .store
                .get(handle.doc)
                .and_then(|doc| doc.text(id))
                .unwrap_or_default()
                .to_string(),
            _ => env.string_value(handle),
        };
        Ok(Conformed::Text(text))
    }

    fn conform_scalar(
        &self,
        d: Directive,
        types: ValueTypes,
        value: Value,
        env: &EvalEnv<'_>,
    ) -> Result<Conformed> {
        match value {
            Value::Boolean(b) if types.boolean => Ok(Conformed::Boolean(b)),
            Value::Boolean(b) if types.string => Ok(Conformed::Text(b.to_string())),
            Value::Number(n) if types.integer => {
                if n.is_nan() || n < 0.0 {
                    return Err(PassthroughError::eval(
                        format!(
                            "{} evaluation yielded a negative number: {}",
                            directive::describe(d, self.expression(d).unwrap_or("")),
                            format_number(n)
                        ),
                        self.location(env),
                    ));
                }
                Ok(Conformed::Integer(n.trunc() as usize))
            }
            Value::Number(n) if types.string => Ok(Conformed::Text(format_number(n))),
            Value::String(s) if types.string => Ok(Conformed::Text(s)),
            other => {
                let shown = env.to_string(&other);
                Err(self.cast_error(d, &format!("'{shown}' of type {}", other.type_name()), env))
            }
        }
    }

    fn cast_error(&self, d: Directive, shown: &str, env: &EvalEnv<'_>) -> PassthroughError {
        PassthroughError::eval(
            format!(
                "{} yielded {shown}, which cannot be safely cast to {}",
                directive::describe(d, self.expression(d).unwrap_or("")),
                d.types()
            ),
            self.location(env),
        )
    }

    // --- validation ---

    fn validate(&self, parent: &PropertyState, env: &EvalEnv<'_>) -> Result<()> {
        let doc = env.store.template();
        let Some(node) = self.node else {
            return Ok(());
        };
        let location = doc.location(node);
        if self.required == Some(true) && parent.required == Some(false) {
            return Err(PassthroughError::state(
                "declaring a child of an unrequired element as required is nonsensical",
                location,
            ));
        }
        if self.defer && !self.has_expression(Directive::Fill) {
            return Err(PassthroughError::state(
                "pt:defer is only valid when pt:fill is defined",
                location,
            ));
        }
        if self.has_expression(Directive::Fill) && doc.has_element_children(node) {
            return Err(PassthroughError::state(
                "pt:fill defined on a class (an element with children)",
                location,
            ));
        }
        if !self.fetch {
            if self.reorder {
                return Err(PassthroughError::state(
                    "pt:reorder=\"true()\" outside a pt:fetch context is not allowed",
                    location,
                ));
            }
            match self.multi {
                Multi::Flag(true) => {
                    return Err(PassthroughError::state(
                        "pt:multi=\"true()\" outside a pt:fetch context is nonsensical",
                        location,
                    ))
                }
                Multi::Count(n) if !self.sources.secondary().is_empty() => {
                    return Err(PassthroughError::state(
                        format!(
                            "cannot combine pt:multi ({n}) and multiple sources when \
                             pt:fetch is not active"
                        ),
                        location,
                    ))
                }
                _ => {}
            }
        }
        let is_class = doc
            .name(node)
            .and_then(|n| n.local.chars().next())
            .is_some_and(char::is_uppercase);
        if is_class && !doc.has_element_children(node) && self.expressions.is_empty() {
            return Err(PassthroughError::template("class is a stub", location));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ContextMap;
    use crate::extensions::ExtensionRegistry;
    use crate::source::{DocumentStore, SourceMap};
    use passthrough_xml::Document;

    const SOURCE: &str = r#"<Product xmlns="http://pds.nasa.gov/pds4/pds/v1">
  <id>obs_001</id>
  <count>3</count>
  <flag>true</flag>
  <name>a</name><name>b</name>
</Product>"#;

    struct Fixture {
        store: DocumentStore,
        sources: SourceMap,
        extensions: ExtensionRegistry,
        context: ContextMap,
        template_ns: NamespaceMap,
    }

    impl Fixture {
        fn new(template: &str) -> Self {
            let mut store = DocumentStore::new(Document::parse_str(template).unwrap());
            let sources = SourceMap::build(
                &mut store,
                vec![(
                    "primary".into(),
                    Document::parse_str(SOURCE).unwrap().into(),
                )],
                true,
            )
            .unwrap();
            let template_ns = label::namespace_map(store.template(), "pds");
            Self {
                store,
                sources,
                extensions: ExtensionRegistry::new(),
                context: ContextMap::new(),
                template_ns,
            }
        }

        fn env(&self) -> EvalEnv<'_> {
            EvalEnv {
                store: &self.store,
                sources: &self.sources,
                extensions: &self.extensions,
                context: &self.context,
                template_ns: &self.template_ns,
                default_prefix: "pds",
            }
        }

        fn node(&self, path: &[usize]) -> NodeId {
            let doc = self.store.template();
            let mut node = doc.root();
            for i in path {
                node = doc.element_children(node).nth(*i).unwrap();
            }
            node
        }

        /// Resolve the root and then each node along `path`.
        fn resolve(&self, path: &[usize]) -> Result<PropertyState> {
            let env = self.env();
            let mut state =
                PropertyState::resolve(&PropertyState::root(), self.node(&[]), &env)?;
            for depth in 1..=path.len() {
                state = PropertyState::resolve(&state, self.node(&path[..depth]), &env)?;
            }
            Ok(state)
        }
    }

    fn template(body: &str) -> String {
        format!(
            r#"<Product xmlns="http://pds.nasa.gov/pds4/pds/v1" xmlns:pt="urn:passthrough" pt:sources="primary">{body}</Product>"#
        )
    }

    #[test]
    fn inherited_and_reset_directives() {
        let f = Fixture::new(&template(
            r#"<Group pt:fetch="true()" pt:multi="2" pt:multi_branch="1"><leaf>x</leaf></Group>"#,
        ));
        let group = f.resolve(&[0]).unwrap();
        assert!(group.fetch);
        assert_eq!(group.multi, Multi::Count(2));
        assert_eq!(group.multi_branch, Some(1));
        let leaf = f.resolve(&[0, 0]).unwrap();
        assert!(leaf.fetch);
        assert_eq!(leaf.multi, Multi::Flag(false));
        assert_eq!(leaf.multi_branch, Some(1));
        assert_eq!(leaf.sources, group.sources);
        assert_eq!(leaf.moniker.as_deref(), Some("primary"));
    }

    #[test]
    fn numbers_coerce_to_integers() {
        let f = Fixture::new(&template(
            r#"<Group pt:fetch="true()" pt:multi="number(//pds:count) + 0.7"><a>x</a></Group>"#,
        ));
        assert_eq!(f.resolve(&[0]).unwrap().multi, Multi::Count(3));
    }

    #[test]
    fn negative_multi_is_rejected() {
        let f = Fixture::new(&template(
            r#"<Group pt:fetch="true()" pt:multi="-1"><a>x</a></Group>"#,
        ));
        let err = f.resolve(&[0]).unwrap_err();
        assert!(err.to_string().contains("negative number"));
    }

    #[test]
    fn required_is_deferred_without_fetch() {
        let f = Fixture::new(&template(r#"<Group pt:required="false()"><a>x</a></Group>"#));
        let mut state = f.resolve(&[0]).unwrap();
        assert_eq!(state.required, None);
        assert!(!state.eval_required(&f.env()).unwrap());
        assert_eq!(state.required, Some(false));
    }

    #[test]
    fn fill_conforms_to_strings() {
        let f = Fixture::new(&template(
            r#"<a pt:fill="//pds:id"/><b pt:fill="1 = 1"/><c pt:fill="7 div 2"/><d pt:fill="//pds:name"/>"#,
        ));
        let env = f.env();
        let fill = |i: usize| f.resolve(&[i]).unwrap().eval_fill(&env).unwrap().unwrap();
        assert_eq!(fill(0), FillValue::Single("obs_001".into()));
        assert_eq!(fill(1), FillValue::Single("true".into()));
        assert_eq!(fill(2), FillValue::Single("3.5".into()));
        assert_eq!(fill(3), FillValue::Many(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn multi_branch_selects_fill_member() {
        let f = Fixture::new(&template(
            r#"<Group pt:multi_branch="1"><a pt:fill="//pds:name"/></Group>"#,
        ));
        let mut state = f.resolve(&[0, 0]).unwrap();
        assert_eq!(
            state.eval_fill(&f.env()).unwrap(),
            Some(FillValue::Single("b".into()))
        );
    }

    #[test]
    fn empty_result_is_eval_error() {
        let f = Fixture::new(&template(r#"<Group pt:fetch="//pds:missing"><a>x</a></Group>"#));
        let err = f.resolve(&[0]).unwrap_err();
        assert_eq!(err.category(), "eval");
        assert!(err.to_string().contains("empty node-set"));
    }

    #[test]
    fn unknown_moniker() {
        let f = Fixture::new(&template(r#"<Group pt:sources="nope"><a>x</a></Group>"#));
        let err = f.resolve(&[0]).unwrap_err();
        assert!(err.to_string().contains("pt:sources=\"nope\" did not match"));
    }

    #[test]
    fn missing_source() {
        let f = Fixture::new(
            r#"<Product xmlns:pt="urn:passthrough"><Group pt:fetch="true()"><a/></Group></Product>"#,
        );
        let err = f.resolve(&[0]).unwrap_err();
        assert!(err.to_string().contains("no source has been set"));
    }

    #[test]
    fn xpath_failures_are_wrapped() {
        let f = Fixture::new(&template(r#"<Group pt:fetch="nope:x()"><a>x</a></Group>"#));
        let err = f.resolve(&[0]).unwrap_err();
        assert_eq!(err.category(), "eval");
        assert!(err.to_string().contains("pt:fetch=\"nope:x()\" resulted in"));
    }

    #[test]
    fn validation_rules() {
        let cases = [
            (
                r#"<Group pt:required="false()" pt:fetch="true()"><a pt:required="true()">x</a></Group>"#,
                vec![0, 0],
                "unrequired",
            ),
            (r#"<a pt:defer="true()">x</a>"#, vec![0], "pt:defer"),
            (r#"<Group pt:fill="'x'"><a>x</a></Group>"#, vec![0], "pt:fill"),
            (r#"<Group pt:multi="true()"><a>x</a></Group>"#, vec![0], "pt:multi"),
            (r#"<Group pt:reorder="true()"><a>x</a></Group>"#, vec![0], "pt:reorder"),
        ];
        for (body, path, needle) in cases {
            let f = Fixture::new(&template(body));
            let err = f.resolve(&path).unwrap_err();
            assert_eq!(err.category(), "state", "{body}");
            assert!(err.to_string().contains(needle), "{err}");
        }
    }

    #[test]
    fn stub_class_is_template_error() {
        let f = Fixture::new(&template("<Stub/>"));
        assert_eq!(f.resolve(&[0]).unwrap_err().category(), "template");
        let f = Fixture::new(&template(r#"<Stub pt:fill="'x'"/>"#));
        assert!(f.resolve(&[0]).is_ok());
    }

    #[test]
    fn syntax_error_on_unknown_directive() {
        let f = Fixture::new(&template(r#"<a pt:filler="'x'"/>"#));
        assert_eq!(f.resolve(&[0]).unwrap_err().category(), "syntax");
    }
}
