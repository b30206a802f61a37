//! Tree-walking evaluator.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use passthrough_types::{PassthroughError, Result};
use passthrough_xml::{Document, NodeKind, QName};

use crate::ast::{Axis, BinaryOp, Expr, LocationPath, NodeTest, Step};
use crate::functions;
use crate::value::{format_number, parse_number, DocKey, Handle, NodeRef, Value};
use crate::XPath;

/// Prefix to namespace URI bindings visible to an expression.
pub type NamespaceMap = BTreeMap<String, String>;

/// The documents an evaluation may navigate.
pub trait DocumentSet {
    fn document(&self, key: DocKey) -> Option<&Document>;
}

impl DocumentSet for Document {
    fn document(&self, key: DocKey) -> Option<&Document> {
        (key.0 == 0).then_some(self)
    }
}

impl DocumentSet for Vec<Document> {
    fn document(&self, key: DocKey) -> Option<&Document> {
        self.get(key.0)
    }
}

/// Resolves calls the core library does not define.
///
/// Returns `None` when the library has no function with that name.
pub trait FunctionLibrary {
    fn call(
        &self,
        ctx: &CallContext<'_>,
        prefix: &str,
        name: &str,
        args: Vec<Value>,
    ) -> Option<Result<Value>>;
}

/// What a function sees of the evaluation it is called from.
pub struct CallContext<'c> {
    pub evaluator: &'c Evaluator<'c>,
    pub node: Handle,
    pub position: usize,
    pub size: usize,
}

#[derive(Clone, Copy)]
struct Ctx {
    node: Handle,
    position: usize,
    size: usize,
}

pub struct Evaluator<'a> {
    docs: &'a dyn DocumentSet,
    namespaces: &'a NamespaceMap,
    functions: Option<&'a dyn FunctionLibrary>,
    order: RefCell<HashMap<DocKey, Rc<Vec<Option<usize>>>>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(docs: &'a dyn DocumentSet, namespaces: &'a NamespaceMap) -> Self {
        Self {
            docs,
            namespaces,
            functions: None,
            order: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_functions(mut self, functions: &'a dyn FunctionLibrary) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn namespaces(&self) -> &NamespaceMap {
        self.namespaces
    }

    pub fn document(&self, key: DocKey) -> Result<&Document> {
        self.docs
            .document(key)
            .ok_or_else(|| PassthroughError::XPath(format!("no document bound to key {}", key.0)))
    }

    /// Evaluate `xpath` with `node` as the context node.
    pub fn evaluate(&self, xpath: &XPath, node: Handle) -> Result<Value> {
        tracing::trace!(xpath = %xpath, "evaluating");
        self.eval(
            xpath.expr(),
            &Ctx {
                node,
                position: 1,
                size: 1,
            },
        )
    }

    // --- conversions ---

    /// XPath string-value of a node.
    pub fn string_value(&self, handle: Handle) -> String {
        let Ok(doc) = self.document(handle.doc) else {
            return String::new();
        };
        match handle.node {
            NodeRef::Root => element_text(doc, doc.root()),
            NodeRef::Element(id) => element_text(doc, id),
            NodeRef::Attribute(id, i) => doc
                .element(id)
                .and_then(|e| e.attributes.get(i))
                .map(|a| a.value.clone())
                .unwrap_or_default(),
            NodeRef::Text(id) => doc.text(id).unwrap_or_default().to_string(),
            NodeRef::Comment(id) => match doc.kind(id) {
                NodeKind::Comment(text) => text.clone(),
                NodeKind::Element(_) => String::new(),
            },
        }
    }

    pub fn to_string(&self, value: &Value) -> String {
        match value {
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Nodes(nodes) => nodes
                .first()
                .map(|h| self.string_value(*h))
                .unwrap_or_default(),
            Value::Sequence(items) => items
                .first()
                .map(|v| self.to_string(v))
                .unwrap_or_default(),
        }
    }

    pub fn to_number(&self, value: &Value) -> f64 {
        match value {
            Value::Boolean(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => parse_number(s),
            Value::Nodes(_) | Value::Sequence(_) => parse_number(&self.to_string(value)),
        }
    }

    /// Qualified name of an element or attribute node.
    pub fn node_name(&self, handle: Handle) -> Option<QName> {
        let doc = self.document(handle.doc).ok()?;
        match handle.node {
            NodeRef::Element(id) => doc.name(id).cloned(),
            NodeRef::Attribute(id, i) => doc
                .element(id)
                .and_then(|e| e.attributes.get(i))
                .map(|a| a.name.clone()),
            _ => None,
        }
    }

    fn resolve_prefix(&self, prefix: &str) -> Result<&str> {
        self.namespaces
            .get(prefix)
            .map(String::as_str)
            .ok_or_else(|| PassthroughError::XPath(format!("undefined namespace prefix '{prefix}'")))
    }

    // --- expressions ---

    fn eval(&self, expr: &Expr, ctx: &Ctx) -> Result<Value> {
        match expr {
            Expr::Or(l, r) => {
                Ok(Value::Boolean(self.eval(l, ctx)?.to_boolean() || self.eval(r, ctx)?.to_boolean()))
            }
            Expr::And(l, r) => {
                Ok(Value::Boolean(self.eval(l, ctx)?.to_boolean() && self.eval(r, ctx)?.to_boolean()))
            }
            Expr::Binary(op, l, r) => {
                let left = self.eval(l, ctx)?;
                let right = self.eval(r, ctx)?;
                if op.is_comparison() {
                    return Ok(Value::Boolean(self.compare(*op, &left, &right)));
                }
                let (a, b) = (self.to_number(&left), self.to_number(&right));
                Ok(Value::Number(match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    _ => a % b,
                }))
            }
            Expr::Negate(inner) => Ok(Value::Number(-self.to_number(&self.eval(inner, ctx)?))),
            Expr::Union(l, r) => {
                let mut nodes = self.node_set(self.eval(l, ctx)?, "|")?;
                nodes.extend(self.node_set(self.eval(r, ctx)?, "|")?);
                Ok(Value::Nodes(self.in_document_order(nodes)))
            }
            Expr::Literal(s) => Ok(Value::String(s.clone())),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Function { prefix, name, args } => {
                self.call_function(prefix.as_deref(), name, args, ctx)
            }
            Expr::Path(path) => self.eval_path(path, ctx),
            Expr::Filter {
                primary,
                predicates,
                steps,
            } => {
                let mut nodes = self.node_set(self.eval(primary, ctx)?, "a predicate")?;
                for predicate in predicates {
                    nodes = self.filter(nodes, predicate)?;
                }
                for step in steps {
                    nodes = self.apply_step(&nodes, step)?;
                }
                Ok(Value::Nodes(nodes))
            }
        }
    }

    fn node_set(&self, value: Value, what: &str) -> Result<Vec<Handle>> {
        match value {
            Value::Nodes(nodes) => Ok(nodes),
            other => Err(PassthroughError::XPath(format!(
                "{what} requires a node-set, got {}",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &self,
        prefix: Option<&str>,
        name: &str,
        args: &[Expr],
        ctx: &Ctx,
    ) -> Result<Value> {
        let values = args
            .iter()
            .map(|a| self.eval(a, ctx))
            .collect::<Result<Vec<_>>>()?;
        let call = CallContext {
            evaluator: self,
            node: ctx.node,
            position: ctx.position,
            size: ctx.size,
        };
        if prefix.is_none() && functions::is_core(name) {
            return functions::call_core(&call, name, values);
        }
        let qualified = match prefix {
            Some(p) => format!("{p}:{name}"),
            None => name.to_string(),
        };
        self.functions
            .and_then(|lib| lib.call(&call, prefix.unwrap_or_default(), name, values))
            .unwrap_or_else(|| Err(PassthroughError::XPath(format!("unknown function '{qualified}'"))))
    }

    // --- comparisons ---

    fn compare(&self, op: BinaryOp, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Nodes(a), Value::Nodes(b)) => {
                let rights: Vec<Value> = b.iter().map(|h| Value::String(self.string_value(*h))).collect();
                a.iter().any(|x| {
                    let lx = Value::String(self.string_value(*x));
                    rights.iter().any(|ry| self.compare_atoms(op, &lx, ry))
                })
            }
            (Value::Nodes(nodes), other) => self.compare_nodes_with(op, nodes, other, false),
            (other, Value::Nodes(nodes)) => self.compare_nodes_with(op, nodes, other, true),
            _ => self.compare_atoms(op, left, right),
        }
    }

    fn compare_nodes_with(&self, op: BinaryOp, nodes: &[Handle], other: &Value, flipped: bool) -> bool {
        let ordered = |node_side: Value| {
            if flipped {
                self.compare_atoms(op, other, &node_side)
            } else {
                self.compare_atoms(op, &node_side, other)
            }
        };
        match other {
            Value::Boolean(_) => ordered(Value::Boolean(!nodes.is_empty())),
            Value::Number(_) => nodes
                .iter()
                .any(|h| ordered(Value::Number(parse_number(&self.string_value(*h))))),
            _ => nodes
                .iter()
                .any(|h| ordered(Value::String(self.string_value(*h)))),
        }
    }

    fn compare_atoms(&self, op: BinaryOp, a: &Value, b: &Value) -> bool {
        match op {
            BinaryOp::Eq | BinaryOp::NotEq => {
                let equal = if matches!(a, Value::Boolean(_)) || matches!(b, Value::Boolean(_)) {
                    a.to_boolean() == b.to_boolean()
                } else if matches!(a, Value::Number(_)) || matches!(b, Value::Number(_)) {
                    self.to_number(a) == self.to_number(b)
                } else {
                    self.to_string(a) == self.to_string(b)
                };
                equal == (op == BinaryOp::Eq)
            }
            _ => {
                let (x, y) = (self.to_number(a), self.to_number(b));
                match op {
                    BinaryOp::Lt => x < y,
                    BinaryOp::Le => x <= y,
                    BinaryOp::Gt => x > y,
                    _ => x >= y,
                }
            }
        }
    }

    // --- location paths ---

    fn eval_path(&self, path: &LocationPath, ctx: &Ctx) -> Result<Value> {
        let start = if path.absolute {
            Handle::new(ctx.node.doc, NodeRef::Root)
        } else {
            ctx.node
        };
        let mut current = vec![start];
        for step in &path.steps {
            current = self.apply_step(&current, step)?;
        }
        Ok(Value::Nodes(current))
    }

    fn apply_step(&self, input: &[Handle], step: &Step) -> Result<Vec<Handle>> {
        let mut out = Vec::new();
        for handle in input {
            let doc = self.document(handle.doc)?;
            let mut candidates = Vec::new();
            for candidate in axis_nodes(doc, *handle, step.axis) {
                if self.matches_test(doc, candidate, &step.test, step.axis)? {
                    candidates.push(candidate);
                }
            }
            for predicate in &step.predicates {
                candidates = self.filter(candidates, predicate)?;
            }
            out.extend(candidates);
        }
        Ok(self.in_document_order(out))
    }

    fn filter(&self, nodes: Vec<Handle>, predicate: &Expr) -> Result<Vec<Handle>> {
        let size = nodes.len();
        let mut kept = Vec::new();
        for (i, node) in nodes.into_iter().enumerate() {
            let ctx = Ctx {
                node,
                position: i + 1,
                size,
            };
            let keep = match self.eval(predicate, &ctx)? {
                Value::Number(n) => n == (i + 1) as f64,
                other => other.to_boolean(),
            };
            if keep {
                kept.push(node);
            }
        }
        Ok(kept)
    }

    fn matches_test(&self, doc: &Document, handle: Handle, test: &NodeTest, axis: Axis) -> Result<bool> {
        let principal = |h: Handle| match axis {
            Axis::Attribute => matches!(h.node, NodeRef::Attribute(..)),
            _ => matches!(h.node, NodeRef::Element(_)),
        };
        Ok(match test {
            NodeTest::Node => true,
            NodeTest::Text => matches!(handle.node, NodeRef::Text(_)),
            NodeTest::Comment => matches!(handle.node, NodeRef::Comment(_)),
            NodeTest::Any => principal(handle),
            NodeTest::Name { prefix, local } => {
                let namespace = match prefix {
                    Some(p) => Some(self.resolve_prefix(p)?),
                    None => None,
                };
                principal(handle) && test_name(doc, handle).is_some_and(|q| q.matches(namespace, local))
            }
            NodeTest::Namespace(prefix) => {
                let namespace = self.resolve_prefix(prefix)?;
                principal(handle)
                    && test_name(doc, handle).is_some_and(|q| q.namespace.as_deref() == Some(namespace))
            }
        })
    }

    // --- document order ---

    fn ranks(&self, key: DocKey) -> Rc<Vec<Option<usize>>> {
        if let Some(ranks) = self.order.borrow().get(&key) {
            return Rc::clone(ranks);
        }
        let ranks = Rc::new(
            self.document(key)
                .map(Document::document_order)
                .unwrap_or_default(),
        );
        self.order.borrow_mut().insert(key, Rc::clone(&ranks));
        ranks
    }

    fn order_key(&self, handle: Handle) -> (DocKey, usize, u8, usize) {
        let ranks = self.ranks(handle.doc);
        let rank = |id: passthrough_xml::NodeId| {
            ranks
                .get(id.index())
                .copied()
                .flatten()
                .map(|r| r + 1)
                .unwrap_or(usize::MAX)
        };
        match handle.node {
            NodeRef::Root => (handle.doc, 0, 0, 0),
            NodeRef::Element(id) | NodeRef::Comment(id) => (handle.doc, rank(id), 0, 0),
            NodeRef::Attribute(id, i) => (handle.doc, rank(id), 1, i),
            NodeRef::Text(id) => (handle.doc, rank(id), 2, 0),
        }
    }

    /// Deduplicate and sort into document order.
    pub fn in_document_order(&self, nodes: Vec<Handle>) -> Vec<Handle> {
        if nodes.len() < 2 {
            return nodes;
        }
        let mut seen = HashSet::new();
        let mut unique: Vec<Handle> = nodes.into_iter().filter(|h| seen.insert(*h)).collect();
        unique.sort_by_cached_key(|h| self.order_key(*h));
        unique
    }
}

fn test_name(doc: &Document, handle: Handle) -> Option<&QName> {
    match handle.node {
        NodeRef::Element(id) => doc.name(id),
        NodeRef::Attribute(id, i) => doc
            .element(id)
            .and_then(|e| e.attributes.get(i))
            .map(|a| &a.name),
        _ => None,
    }
}

/// Concatenated text of an element and its descendants.
fn element_text(doc: &Document, id: passthrough_xml::NodeId) -> String {
    doc.descendant_elements(id)
        .into_iter()
        .filter_map(|e| doc.text(e))
        .collect()
}

fn child_nodes(doc: &Document, handle: Handle) -> Vec<Handle> {
    let wrap = |node| Handle::new(handle.doc, node);
    match handle.node {
        NodeRef::Root => vec![wrap(NodeRef::Element(doc.root()))],
        NodeRef::Element(id) => {
            let mut out = Vec::new();
            if doc.text(id).is_some_and(|t| !t.is_empty()) {
                out.push(wrap(NodeRef::Text(id)));
            }
            for child in doc.children(id) {
                if doc.is_comment(*child) {
                    out.push(wrap(NodeRef::Comment(*child)));
                } else {
                    out.push(wrap(NodeRef::Element(*child)));
                }
            }
            out
        }
        _ => Vec::new(),
    }
}

fn parent_node(doc: &Document, handle: Handle) -> Option<Handle> {
    let node = match handle.node {
        NodeRef::Root => return None,
        NodeRef::Element(id) | NodeRef::Comment(id) => {
            if id == doc.root() {
                NodeRef::Root
            } else {
                NodeRef::Element(doc.parent(id)?)
            }
        }
        NodeRef::Attribute(id, _) | NodeRef::Text(id) => NodeRef::Element(id),
    };
    Some(Handle::new(handle.doc, node))
}

fn descendant_nodes(doc: &Document, handle: Handle, out: &mut Vec<Handle>) {
    for child in child_nodes(doc, handle) {
        out.push(child);
        descendant_nodes(doc, child, out);
    }
}

fn sibling_nodes(doc: &Document, handle: Handle, following: bool) -> Vec<Handle> {
    let id = match handle.node {
        NodeRef::Element(id) | NodeRef::Comment(id) => id,
        _ => return Vec::new(),
    };
    let Some(parent) = doc.parent(id) else {
        return Vec::new();
    };
    let siblings = doc.children(parent);
    let Some(pos) = siblings.iter().position(|c| *c == id) else {
        return Vec::new();
    };
    let wrap = |c: &passthrough_xml::NodeId| {
        let node = if doc.is_comment(*c) {
            NodeRef::Comment(*c)
        } else {
            NodeRef::Element(*c)
        };
        Handle::new(handle.doc, node)
    };
    if following {
        siblings[pos + 1..].iter().map(wrap).collect()
    } else {
        siblings[..pos].iter().rev().map(wrap).collect()
    }
}

/// Nodes along `axis` in proximity order.
fn axis_nodes(doc: &Document, handle: Handle, axis: Axis) -> Vec<Handle> {
    match axis {
        Axis::Child => child_nodes(doc, handle),
        Axis::Descendant => {
            let mut out = Vec::new();
            descendant_nodes(doc, handle, &mut out);
            out
        }
        Axis::DescendantOrSelf => {
            let mut out = vec![handle];
            descendant_nodes(doc, handle, &mut out);
            out
        }
        Axis::Parent => parent_node(doc, handle).into_iter().collect(),
        Axis::Ancestor | Axis::AncestorOrSelf => {
            let mut out = Vec::new();
            if axis == Axis::AncestorOrSelf {
                out.push(handle);
            }
            let mut current = parent_node(doc, handle);
            while let Some(h) = current {
                out.push(h);
                current = parent_node(doc, h);
            }
            out
        }
        Axis::FollowingSibling => sibling_nodes(doc, handle, true),
        Axis::PrecedingSibling => sibling_nodes(doc, handle, false),
        Axis::Attribute => match handle.node {
            NodeRef::Element(id) => doc
                .element(id)
                .map(|e| {
                    (0..e.attributes.len())
                        .map(|i| Handle::new(handle.doc, NodeRef::Attribute(id, i)))
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        },
        Axis::SelfAxis => vec![handle],
    }
}
