//! Template resolution engine for Passthrough labels.
//!
//! A type template is an XML label annotated with `pt:` directive attributes.
//! [`Template::builder`] loads the template and its source documents, walks the
//! template once (resolving fetches, multi-source and multi-branch duplication
//! and fills), and hands back a [`Template`]. [`Template::export`] then drains
//! deferred work, prunes empty optional subtrees, checks population and
//! structure, and writes the label.

pub mod directive;
pub mod engine;
pub mod export;
pub mod extensions;
pub mod label;
pub mod scheduler;
pub mod source;
pub mod state;
pub mod template;
pub mod walker;

pub use directive::Directive;
pub use engine::{ContextMap, EvalEnv};
pub use export::{ExportStage, PathChange};
pub use extensions::{Extension, ExtensionRegistry, PtContext};
pub use scheduler::{DeferredItem, DeferredScheduler};
pub use source::{DocumentStore, SourceGroup, SourceInput, SourceMap, SourceSpec, TEMPLATE_MONIKER};
pub use state::{FillValue, Multi, PropertyState};
pub use template::{Template, TemplateBuilder, TemplateOptions};

pub use passthrough_types::{Location, PassthroughError, Result};
pub use passthrough_xml::{Document, NodeId};
