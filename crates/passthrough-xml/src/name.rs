use std::fmt;

/// Namespace URI permanently bound to the `xml` prefix.
pub const XML_NS_URI: &str = "http://www.w3.org/XML/1998/namespace";

/// A qualified name: the prefix it was written with plus its resolved namespace.
///
/// Two names denote the same element or attribute when their namespace and local
/// part agree; the prefix only matters for serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub namespace: Option<String>,
    pub local: String,
}

impl QName {
    /// A name without namespace.
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            prefix: None,
            namespace: None,
            local: local.into(),
        }
    }

    pub fn new(
        prefix: Option<&str>,
        namespace: Option<&str>,
        local: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.map(String::from),
            namespace: namespace.map(String::from),
            local: local.into(),
        }
    }

    /// True when the expanded name (namespace + local part) matches.
    pub fn matches(&self, namespace: Option<&str>, local: &str) -> bool {
        self.namespace.as_deref() == namespace && self.local == local
    }

    /// True when both names share namespace and local part.
    pub fn same_expanded(&self, other: &QName) -> bool {
        self.matches(other.namespace.as_deref(), &other.local)
    }

    /// Clark notation: `{uri}local`, or just `local` without namespace.
    pub fn clark(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{{{ns}}}{}", self.local),
            None => self.local.clone(),
        }
    }

    /// The name as written: `prefix:local` or `local`.
    pub fn prefixed(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local),
            None => self.local.clone(),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefixed())
    }
}

/// A namespace declaration (`xmlns` / `xmlns:prefix`) made on an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    pub prefix: Option<String>,
    pub uri: String,
}

/// Split a raw `prefix:local` name.
pub(crate) fn split_prefixed(raw: &str) -> (Option<&str>, &str) {
    match raw.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, raw),
    }
}
