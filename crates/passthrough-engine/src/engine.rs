//! Engine state shared by the tree walker and the exporter.

use std::collections::BTreeMap;

use passthrough_types::{PassthroughError, Result};
use passthrough_xml::NodeId;
use passthrough_xpath::{DocKey, Evaluator, Handle, NamespaceMap, NodeRef, Value, XPath};

use crate::extensions::{ExtensionRegistry, ExtensionScope};
use crate::scheduler::DeferredScheduler;
use crate::source::{DocumentStore, SourceMap};
use crate::template::TemplateOptions;

/// Client-supplied values exposed through `pt:context`.
pub type ContextMap = BTreeMap<String, serde_json::Value>;

/// Everything a resolution pass owns: the documents, the source map, the
/// extension registry and the deferred queues.
pub struct Engine {
    pub(crate) store: DocumentStore,
    pub(crate) sources: SourceMap,
    pub(crate) extensions: ExtensionRegistry,
    pub(crate) context: ContextMap,
    pub(crate) options: TemplateOptions,
    pub(crate) template_ns: NamespaceMap,
    pub(crate) scheduler: DeferredScheduler,
}

impl Engine {
    pub(crate) fn env(&self) -> EvalEnv<'_> {
        EvalEnv {
            store: &self.store,
            sources: &self.sources,
            extensions: &self.extensions,
            context: &self.context,
            template_ns: &self.template_ns,
            default_prefix: &self.options.default_ns_prefix,
        }
    }
}

/// Read-only view of an [`Engine`] used while evaluating expressions.
#[derive(Clone, Copy)]
pub struct EvalEnv<'a> {
    pub store: &'a DocumentStore,
    pub sources: &'a SourceMap,
    pub extensions: &'a ExtensionRegistry,
    pub context: &'a ContextMap,
    pub template_ns: &'a NamespaceMap,
    pub default_prefix: &'a str,
}

impl<'a> EvalEnv<'a> {
    /// Evaluate `xpath` with `context` as context node. Extensions see
    /// `t_elem` as the current template node and `source` as the current
    /// primary source.
    pub fn evaluate(
        &self,
        xpath: &XPath,
        namespaces: &NamespaceMap,
        context: Handle,
        t_elem: NodeId,
        source: Option<DocKey>,
    ) -> Result<Value> {
        let scope = ExtensionScope::new(*self, t_elem, source);
        let evaluator = Evaluator::new(self.store, namespaces).with_functions(&scope);
        evaluator.evaluate(xpath, context)
    }

    /// Evaluate against the document node of the template.
    pub fn evaluate_template(&self, expression: &str, t_elem: NodeId) -> Result<Value> {
        let xpath = XPath::parse(expression)?;
        self.evaluate(
            &xpath,
            self.template_ns,
            Handle::new(DocumentStore::TEMPLATE, NodeRef::Root),
            t_elem,
            None,
        )
    }

    /// XPath string-value of a node, or of the first node of a node-set.
    pub fn string_value(&self, handle: Handle) -> String {
        let empty = NamespaceMap::new();
        Evaluator::new(self.store, &empty).string_value(handle)
    }

    pub fn to_string(&self, value: &Value) -> String {
        let empty = NamespaceMap::new();
        Evaluator::new(self.store, &empty).to_string(value)
    }

    pub fn source_root(&self, key: DocKey) -> Result<Handle> {
        self.store
            .get(key)
            .map(|_| Handle::new(key, NodeRef::Root))
            .ok_or_else(|| PassthroughError::XPath(format!("no document bound to key {}", key.0)))
    }
}
