//! Label helpers: population status, XPath namespace maps and path rendering.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use passthrough_types::XSI_NS_URI;
use passthrough_xml::{Document, NodeId};
use passthrough_xpath::NamespaceMap;

/// Default identifier field used to derive an export filename.
pub const IDENTIFIER_XPATH: &str = "//pds:Identification_Area/pds:logical_identifier";

static CLARK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([^}]*)\}").unwrap());

/// A node is populated when its text has non-whitespace content or it carries
/// `xsi:nil="true"`.
pub fn is_populated(doc: &Document, node: NodeId) -> bool {
    let has_text = doc.text(node).is_some_and(|t| !t.trim().is_empty());
    has_text || doc.attribute(node, Some(XSI_NS_URI), "nil") == Some("true")
}

/// XPath namespace bindings of a document root, with the default namespace
/// bound to `default_prefix`.
pub fn namespace_map(doc: &Document, default_prefix: &str) -> NamespaceMap {
    let mut map = NamespaceMap::new();
    let mut default = None;
    for (prefix, uri) in doc.namespace_map(doc.root()) {
        match prefix {
            Some(p) => {
                map.insert(p, uri);
            }
            None => default = Some(uri),
        }
    }
    if let Some(uri) = default.filter(|u| !u.is_empty()) {
        map.insert(default_prefix.to_string(), uri);
    }
    map
}

/// Renders Clark-notation names and paths with the prefixes of a namespace map.
#[derive(Debug, Clone)]
pub struct PathRenderer {
    prefixes: BTreeMap<String, String>,
}

impl PathRenderer {
    pub fn new(namespaces: &NamespaceMap) -> Self {
        let prefixes = namespaces
            .iter()
            .map(|(prefix, uri)| (uri.clone(), prefix.clone()))
            .collect();
        Self { prefixes }
    }

    /// `{uri}a/{uri}b[2]` becomes `pds:a/pds:b[2]`; unknown URIs are left as is.
    pub fn clark_to_prefix(&self, clark: &str) -> String {
        CLARK
            .replace_all(clark, |caps: &regex::Captures<'_>| {
                match self.prefixes.get(&caps[1]) {
                    Some(prefix) => format!("{prefix}:"),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDS: &str = "http://pds.nasa.gov/pds4/pds/v1";

    #[test]
    fn population_rules() {
        let doc = Document::parse_str(&format!(
            r#"<a xmlns:xsi="{XSI_NS_URI}"><b>  </b><c>x</c><d xsi:nil="true"/><e xsi:nil="false"/></a>"#
        ))
        .unwrap();
        let kids: Vec<_> = doc.element_children(doc.root()).collect();
        let status: Vec<bool> = kids.iter().map(|k| is_populated(&doc, *k)).collect();
        assert_eq!(status, vec![false, true, true, false]);
    }

    #[test]
    fn default_namespace_gets_prefix() {
        let doc = Document::parse_str(&format!(
            r#"<Product xmlns="{PDS}" xmlns:pt="urn:passthrough"/>"#
        ))
        .unwrap();
        let ns = namespace_map(&doc, "pds");
        assert_eq!(ns.get("pds").map(String::as_str), Some(PDS));
        assert_eq!(ns.get("pt").map(String::as_str), Some("urn:passthrough"));
    }

    #[test]
    fn clark_rendering() {
        let mut ns = NamespaceMap::new();
        ns.insert("pds".into(), PDS.into());
        let r = PathRenderer::new(&ns);
        assert_eq!(
            r.clark_to_prefix(&format!("{{{PDS}}}Observation_Area/{{{PDS}}}name[2]")),
            "pds:Observation_Area/pds:name[2]"
        );
        assert_eq!(r.clark_to_prefix("{urn:x}y"), "{urn:x}y");
    }
}
