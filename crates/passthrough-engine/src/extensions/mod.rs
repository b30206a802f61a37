//! Extension functions callable from directive expressions.

pub mod pt;

use std::collections::HashMap;

use passthrough_types::{Location, Result, PT_PREFIX};
use passthrough_xml::{Document, NodeId};
use passthrough_xpath::{
    CallContext, DocKey, Evaluator, FunctionLibrary, Handle, NodeRef, Value, XPath,
};

use crate::engine::EvalEnv;
use crate::label;
use crate::source::DocumentStore;

// ---------------------------------------------------------------------------
// Extension trait
// ---------------------------------------------------------------------------

/// A prefix-qualified function such as `pt:context`.
pub trait Extension: Send + Sync {
    fn call(&self, ctx: &PtContext<'_>, args: Vec<Value>) -> Result<Value>;
}

impl<F> Extension for F
where
    F: Fn(&PtContext<'_>, Vec<Value>) -> Result<Value> + Send + Sync,
{
    fn call(&self, ctx: &PtContext<'_>, args: Vec<Value>) -> Result<Value> {
        self(ctx, args)
    }
}

// ---------------------------------------------------------------------------
// ExtensionRegistry
// ---------------------------------------------------------------------------

pub struct ExtensionRegistry {
    extensions: HashMap<(String, String), Box<dyn Extension>>,
}

impl ExtensionRegistry {
    /// A registry without any functions.
    pub fn empty() -> Self {
        Self {
            extensions: HashMap::new(),
        }
    }

    /// A registry holding the built-in `pt:` functions.
    pub fn new() -> Self {
        let mut reg = Self::empty();
        pt::register(&mut reg);
        reg
    }

    /// Bind `prefix:name`, replacing any previous binding.
    pub fn register(
        &mut self,
        prefix: impl Into<String>,
        name: impl Into<String>,
        extension: impl Extension + 'static,
    ) {
        self.extensions
            .insert((prefix.into(), name.into()), Box::new(extension));
    }

    pub fn get(&self, prefix: &str, name: &str) -> Option<&dyn Extension> {
        self.extensions
            .get(&(prefix.to_string(), name.to_string()))
            .map(|e| e.as_ref())
    }

    pub fn has(&self, prefix: &str, name: &str) -> bool {
        self.get(prefix, name).is_some()
    }

    /// Registered names as `prefix:name`, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .extensions
            .keys()
            .map(|(p, n)| format!("{p}:{n}"))
            .collect();
        names.sort();
        names
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("extensions", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ExtensionScope: the registry bound to one evaluation
// ---------------------------------------------------------------------------

pub(crate) struct ExtensionScope<'a> {
    env: EvalEnv<'a>,
    t_elem: NodeId,
    source: Option<DocKey>,
}

impl<'a> ExtensionScope<'a> {
    pub(crate) fn new(env: EvalEnv<'a>, t_elem: NodeId, source: Option<DocKey>) -> Self {
        Self {
            env,
            t_elem,
            source,
        }
    }
}

impl FunctionLibrary for ExtensionScope<'_> {
    fn call(
        &self,
        ctx: &CallContext<'_>,
        prefix: &str,
        name: &str,
        args: Vec<Value>,
    ) -> Option<Result<Value>> {
        let extension = self.env.extensions.get(prefix, name)?;
        tracing::trace!(function = %format!("{prefix}:{name}"), "calling extension");
        let pt = PtContext { call: ctx, scope: self };
        Some(extension.call(&pt, args))
    }
}

// ---------------------------------------------------------------------------
// PtContext
// ---------------------------------------------------------------------------

/// What an extension function sees of the resolution in progress.
pub struct PtContext<'c> {
    call: &'c CallContext<'c>,
    scope: &'c ExtensionScope<'c>,
}

impl<'c> PtContext<'c> {
    /// The template node whose directive is being evaluated.
    pub fn t_elem(&self) -> Handle {
        Handle::element(DocumentStore::TEMPLATE, self.scope.t_elem)
    }

    pub fn template(&self) -> &Document {
        self.scope.env.store.template()
    }

    /// Document node of the current primary source, if one is bound.
    pub fn s_root(&self) -> Option<Handle> {
        self.scope.source.map(|key| Handle::new(key, NodeRef::Root))
    }

    /// The context node of the call.
    pub fn node(&self) -> Handle {
        self.call.node
    }

    pub fn context_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.scope.env.context.get(key)
    }

    /// The evaluator the call came from, for converting arguments.
    pub fn evaluator(&self) -> &Evaluator<'c> {
        self.call.evaluator
    }

    pub fn string(&self, value: &Value) -> String {
        self.call.evaluator.to_string(value)
    }

    /// Location of the current template node, for error messages.
    pub fn location(&self) -> Location {
        self.template().location(self.scope.t_elem)
    }

    /// Evaluate an expression against the template root, with the template's
    /// namespace map.
    pub fn t_xpath(&self, expression: &str) -> Result<Value> {
        self.scope.env.evaluate(
            &XPath::parse(expression)?,
            self.scope.env.template_ns,
            Handle::new(DocumentStore::TEMPLATE, NodeRef::Root),
            self.scope.t_elem,
            self.scope.source,
        )
    }

    /// Evaluate an expression against the current primary source root, with
    /// that source's namespace map.
    pub fn s_xpath(&self, expression: &str) -> Result<Value> {
        let key = self.scope.source.unwrap_or(DocumentStore::TEMPLATE);
        let doc = self.call.evaluator.document(key)?;
        let namespaces = label::namespace_map(doc, self.scope.env.default_prefix);
        self.scope.env.evaluate(
            &XPath::parse(expression)?,
            &namespaces,
            Handle::new(key, NodeRef::Root),
            self.scope.t_elem,
            self.scope.source,
        )
    }
}

/// Conventional prefix of the built-in functions.
pub const BUILTIN_PREFIX: &str = PT_PREFIX;

#[cfg(test)]
mod tests {
    use super::*;
    use passthrough_types::PassthroughError;

    fn answer(_: &PtContext<'_>, _: Vec<Value>) -> Result<Value> {
        Ok(Value::Number(42.0))
    }

    #[test]
    fn builtins_are_registered() {
        let reg = ExtensionRegistry::new();
        for name in ["context", "context.get", "self", "sequence", "datetime.add", "datetime.now"] {
            assert!(reg.has(BUILTIN_PREFIX, name), "missing pt:{name}");
        }
        assert!(!ExtensionRegistry::empty().has("pt", "self"));
    }

    fn fail(ctx: &PtContext<'_>, _: Vec<Value>) -> Result<Value> {
        Err(PassthroughError::eval("nope", ctx.location()))
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = ExtensionRegistry::empty();
        reg.register("exm", "answer", answer);
        reg.register("exm", "fail", fail);
        assert!(reg.has("exm", "answer"));
        assert!(!reg.has("pt", "answer"));
        assert_eq!(reg.names(), vec!["exm:answer".to_string(), "exm:fail".to_string()]);
    }
}
