//! Shared types and errors for the Passthrough label engine.
//!
//! This crate provides the foundational types used across all other Passthrough crates:
//! - `PassthroughError`: unified error taxonomy
//! - `Location`: tag/line of the template node an error refers to
//! - namespace constants for directives and `xsi:nil`

use std::fmt;

/// Namespace URI of the directive attributes (`pt:fetch`, `pt:fill`, ...).
pub const PT_NS_URI: &str = "urn:passthrough";

/// Conventional prefix bound to [`PT_NS_URI`] and to the built-in extensions.
pub const PT_PREFIX: &str = "pt";

/// XML Schema instance namespace, used for `xsi:nil` population markers.
pub const XSI_NS_URI: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Prefix that the default namespace of a document root is bound to when
/// building XPath namespace maps.
pub const DEFAULT_NS_PREFIX: &str = "pds";

/// Where in a template an error was raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub tag: Option<String>,
    pub line: Option<usize>,
}

impl Location {
    pub fn new(tag: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            tag: Some(tag.into()),
            line,
        }
    }

    /// A location that renders as nothing.
    pub fn unknown() -> Self {
        Self::default()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.tag, self.line) {
            (Some(tag), Some(line)) => write!(f, " ({tag} @ line {line})"),
            (Some(tag), None) => write!(f, " ({tag})"),
            _ => Ok(()),
        }
    }
}

/// Unified error type for all Passthrough subsystems.
#[derive(Debug, thiserror::Error)]
pub enum PassthroughError {
    // === Template taxonomy ===
    #[error("{message}{location}")]
    Syntax { message: String, location: Location },

    #[error("{message}{location}")]
    Eval { message: String, location: Location },

    #[error("{message}{location}")]
    Fetch { message: String, location: Location },

    #[error("{message}{location}")]
    State { message: String, location: Location },

    #[error("{message}{location}")]
    Template { message: String, location: Location },

    // === Collaborators ===
    #[error("XML parse error at line {line}, col {col}: {message}")]
    Parse {
        line: usize,
        col: usize,
        message: String,
    },

    #[error("invalid XPath expression '{expression}' at offset {offset}: {message}")]
    XPathSyntax {
        expression: String,
        offset: usize,
        message: String,
    },

    #[error("XPath error: {0}")]
    XPath(String),

    #[error("source map error: {0}")]
    SourceMap(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PassthroughError {
    pub fn syntax(message: impl Into<String>, location: Location) -> Self {
        Self::Syntax {
            message: message.into(),
            location,
        }
    }

    pub fn eval(message: impl Into<String>, location: Location) -> Self {
        Self::Eval {
            message: message.into(),
            location,
        }
    }

    pub fn fetch(message: impl Into<String>, location: Location) -> Self {
        Self::Fetch {
            message: message.into(),
            location,
        }
    }

    pub fn state(message: impl Into<String>, location: Location) -> Self {
        Self::State {
            message: message.into(),
            location,
        }
    }

    pub fn template(message: impl Into<String>, location: Location) -> Self {
        Self::Template {
            message: message.into(),
            location,
        }
    }

    /// Short category name, used by the CLI when reporting failures.
    pub fn category(&self) -> &'static str {
        match self {
            PassthroughError::Syntax { .. } => "syntax",
            PassthroughError::Eval { .. } => "eval",
            PassthroughError::Fetch { .. } => "fetch",
            PassthroughError::State { .. } => "state",
            PassthroughError::Template { .. } => "template",
            PassthroughError::Parse { .. } => "parse",
            PassthroughError::XPathSyntax { .. } | PassthroughError::XPath(_) => "xpath",
            PassthroughError::SourceMap(_) => "source-map",
            PassthroughError::Io(_) => "io",
            PassthroughError::Json(_) => "json",
        }
    }

    /// The template location attached to a taxonomy error, if any.
    pub fn location(&self) -> Option<&Location> {
        match self {
            PassthroughError::Syntax { location, .. }
            | PassthroughError::Eval { location, .. }
            | PassthroughError::Fetch { location, .. }
            | PassthroughError::State { location, .. }
            | PassthroughError::Template { location, .. } => Some(location),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, PassthroughError>`.
pub type Result<T> = std::result::Result<T, PassthroughError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_renders_tag_and_line() {
        let loc = Location::new("Observation_Area", Some(12));
        assert_eq!(loc.to_string(), " (Observation_Area @ line 12)");
    }

    #[test]
    fn unknown_location_renders_empty() {
        assert_eq!(Location::unknown().to_string(), "");
    }

    #[test]
    fn taxonomy_error_appends_location() {
        let err = PassthroughError::fetch(
            "start_date_time could not be located",
            Location::new("start_date_time", Some(4)),
        );
        assert_eq!(
            err.to_string(),
            "start_date_time could not be located (start_date_time @ line 4)"
        );
        assert_eq!(err.category(), "fetch");
    }

    #[test]
    fn location_accessor_only_for_taxonomy() {
        let err = PassthroughError::state("bad", Location::new("x", None));
        assert_eq!(err.location().and_then(|l| l.tag.as_deref()), Some("x"));
        assert!(PassthroughError::XPath("boom".into()).location().is_none());
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PassthroughError = io_err.into();
        assert!(matches!(err, PassthroughError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: PassthroughError = json_err.into();
        assert!(matches!(err, PassthroughError::Json(_)));
    }

    #[test]
    fn result_alias_err() {
        fn example() -> Result<()> {
            Err(PassthroughError::SourceMap("group is empty".into()))
        }
        assert!(example().is_err());
    }
}
