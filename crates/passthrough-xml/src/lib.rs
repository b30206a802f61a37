//! XML document model for Passthrough labels.
//!
//! Provides:
//! - [`Document`]: an arena tree with stable [`NodeId`]s, parsed with quick-xml
//! - [`ElementPath`]: root-relative structural paths used to compare two trees
//! - a pretty-printing serializer that repairs namespace declarations

pub mod document;
pub mod name;
pub mod parser;
pub mod path;
pub mod writer;

pub use document::{Attribute, Document, Element, Misc, NodeId, NodeKind};
pub use name::{NamespaceDecl, QName, XML_NS_URI};
pub use path::{ElementPath, PathSegment};
