//! Manifest abstraction consumed by the dependency rules, the compiler, and the runner.
//!
//! A manifest is an immutable, declared unit of work identified by
//! `namespace.kind.name`. The engine never parses manifests itself; anything
//! implementing [`Manifest`] can be scheduled. [`ManifestDocument`] is the
//! serde-shaped implementation used for HTTP test suites, servers, services,
//! and value sets.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Well-known manifest kinds.
pub mod kinds {
    pub const VALUES: &str = "Values";
    pub const SERVER: &str = "Server";
    pub const SERVICE: &str = "Service";
    pub const HTTP_TEST: &str = "HttpTest";
    pub const LOAD_TEST: &str = "LoadTest";
}

/// Separator between a manifest ID and a case alias (`ns.HttpTest.login#token`).
pub const CASE_SEPARATOR: char = '#';

/// Builds a manifest ID from its parts.
pub fn manifest_id(namespace: &str, kind: &str, name: &str) -> String {
    format!("{namespace}.{kind}.{name}")
}

/// Builds a case-qualified ID (`manifest_id#alias`).
pub fn case_id(manifest_id: &str, alias: &str) -> String {
    format!("{manifest_id}{CASE_SEPARATOR}{alias}")
}

/// Strips any `#alias` qualifier from an ID.
pub fn base_id(id: &str) -> &str {
    id.split_once(CASE_SEPARATOR).map_or(id, |(base, _)| base)
}

/// A named sub-unit of a manifest, such as one HTTP test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseInfo<'a> {
    pub index: usize,
    pub name: &'a str,
    pub alias: Option<&'a str>,
}

/// A string-bearing field of a manifest that may contain template references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextField<'a> {
    /// Index of the case the field belongs to, `None` for manifest-level fields.
    pub case: Option<usize>,
    /// Human-readable path to the field (`cases[0].request.headers.Authorization`).
    pub location: String,
    pub text: &'a str,
}

/// A manifest as seen by the orchestration core.
pub trait Manifest: Send + Sync + fmt::Debug {
    fn kind(&self) -> &str;

    fn name(&self) -> &str;

    fn namespace(&self) -> &str;

    /// The manifest ID, `namespace.kind.name`.
    fn id(&self) -> String {
        manifest_id(self.namespace(), self.kind(), self.name())
    }

    /// Declared dependencies, as manifest IDs or aliases.
    fn depends_on(&self) -> &[String] {
        &[]
    }

    /// Alias of the manifest as a whole, if any.
    fn alias(&self) -> Option<&str> {
        None
    }

    /// Named sub-units in body order.
    fn cases(&self) -> Vec<CaseInfo<'_>> {
        Vec::new()
    }

    /// Every string field that may carry `{{ alias.path }}` references.
    fn text_fields(&self) -> Vec<TextField<'_>> {
        Vec::new()
    }
}

/// Shared handle to a manifest.
pub type ManifestRef = Arc<dyn Manifest>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// HTTP request shape shared by manifests and test cases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonValue>,
}

/// One case of a test suite manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub request: RequestSpec,
    /// Assertion templates, e.g. `{{ response.status }} == 200`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<String>,
    /// Extraction expressions keyed by output field.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extract: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestSpec {
    #[serde(flatten)]
    pub request: RequestSpec,
    /// Free-form values (the body of a `Values` manifest, or server settings).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cases: Vec<TestCase>,
}

/// Serde-shaped manifest covering the built-in kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDocument {
    pub kind: String,
    pub metadata: ManifestMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub spec: ManifestSpec,
}

impl ManifestDocument {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            metadata: ManifestMetadata {
                name: name.into(),
                namespace: default_namespace(),
                alias: None,
            },
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata.namespace = namespace.into();
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.metadata.alias = Some(alias.into());
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.spec.request.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.spec.request.url = Some(url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.request.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.spec.request.body = Some(body);
        self
    }

    pub fn with_values(mut self, values: JsonValue) -> Self {
        self.spec.values = Some(values);
        self
    }

    pub fn with_case(mut self, case: TestCase) -> Self {
        self.spec.cases.push(case);
        self
    }

    /// Wraps the document in a shared handle.
    pub fn into_ref(self) -> ManifestRef {
        Arc::new(self)
    }
}

impl TestCase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.request.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.request.body = Some(body);
        self
    }

    pub fn with_assertion(mut self, assertion: impl Into<String>) -> Self {
        self.assertions.push(assertion.into());
        self
    }

    pub fn with_extract(mut self, field: impl Into<String>, expr: impl Into<String>) -> Self {
        self.extract.insert(field.into(), expr.into());
        self
    }
}

impl Manifest for ManifestDocument {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    fn alias(&self) -> Option<&str> {
        self.metadata.alias.as_deref()
    }

    fn cases(&self) -> Vec<CaseInfo<'_>> {
        self.spec
            .cases
            .iter()
            .enumerate()
            .map(|(index, case)| CaseInfo {
                index,
                name: &case.name,
                alias: case.alias.as_deref(),
            })
            .collect()
    }

    fn text_fields(&self) -> Vec<TextField<'_>> {
        let mut fields = Vec::new();
        collect_request(&self.spec.request, None, "spec", &mut fields);
        if let Some(values) = &self.spec.values {
            collect_json(values, None, "spec.values".to_string(), &mut fields);
        }
        for (index, case) in self.spec.cases.iter().enumerate() {
            let prefix = format!("cases[{index}]");
            collect_request(
                &case.request,
                Some(index),
                &format!("{prefix}.request"),
                &mut fields,
            );
            for (i, assertion) in case.assertions.iter().enumerate() {
                fields.push(TextField {
                    case: Some(index),
                    location: format!("{prefix}.assertions[{i}]"),
                    text: assertion,
                });
            }
            for (key, expr) in &case.extract {
                fields.push(TextField {
                    case: Some(index),
                    location: format!("{prefix}.extract.{key}"),
                    text: expr,
                });
            }
        }
        fields
    }
}

fn collect_request<'a>(
    request: &'a RequestSpec,
    case: Option<usize>,
    prefix: &str,
    out: &mut Vec<TextField<'a>>,
) {
    let scalars = [
        ("method", &request.method),
        ("endpoint", &request.endpoint),
        ("url", &request.url),
    ];
    for (name, value) in scalars {
        if let Some(text) = value {
            out.push(TextField {
                case,
                location: format!("{prefix}.{name}"),
                text,
            });
        }
    }
    for (name, value) in &request.headers {
        out.push(TextField {
            case,
            location: format!("{prefix}.headers.{name}"),
            text: value,
        });
    }
    if let Some(body) = &request.body {
        collect_json(body, case, format!("{prefix}.body"), out);
    }
}

fn collect_json<'a>(
    value: &'a JsonValue,
    case: Option<usize>,
    location: String,
    out: &mut Vec<TextField<'a>>,
) {
    match value {
        JsonValue::String(text) => out.push(TextField {
            case,
            location,
            text,
        }),
        JsonValue::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_json(item, case, format!("{location}[{i}]"), out);
            }
        }
        JsonValue::Object(map) => {
            for (key, item) in map {
                collect_json(item, case, format!("{location}.{key}"), out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids() {
        let doc = ManifestDocument::new(kinds::HTTP_TEST, "login").with_namespace("auth");
        assert_eq!(doc.id(), "auth.HttpTest.login");
        assert_eq!(case_id(&doc.id(), "token"), "auth.HttpTest.login#token");
        assert_eq!(base_id("auth.HttpTest.login#token"), "auth.HttpTest.login");
        assert_eq!(base_id("auth.HttpTest.login"), "auth.HttpTest.login");
    }

    #[test]
    fn test_text_fields_walk_nested_body_and_cases() {
        let doc = ManifestDocument::new(kinds::HTTP_TEST, "orders")
            .with_endpoint("{{ api.url }}/orders")
            .with_case(
                TestCase::new("create")
                    .with_alias("created")
                    .with_header("Authorization", "Bearer {{ login.token }}")
                    .with_body(json!({"items": [{"sku": "{{ Values.sku }}"}], "qty": 2}))
                    .with_assertion("{{ response.status }} == 201"),
            );

        let fields = doc.text_fields();
        let locations: Vec<_> = fields.iter().map(|f| f.location.as_str()).collect();

        assert!(locations.contains(&"spec.endpoint"));
        assert!(locations.contains(&"cases[0].request.headers.Authorization"));
        assert!(locations.contains(&"cases[0].request.body.items[0].sku"));
        assert!(locations.contains(&"cases[0].assertions[0]"));
        // numbers are not text
        assert!(!locations.iter().any(|l| l.ends_with("qty")));
        assert!(fields.iter().filter(|f| f.case == Some(0)).count() >= 3);
    }

    #[test]
    fn test_document_deserializes_camel_case() {
        let doc: ManifestDocument = serde_json::from_value(json!({
            "kind": "HttpTest",
            "metadata": {"name": "smoke"},
            "dependsOn": ["default.Server.api"],
            "spec": {
                "endpoint": "/health",
                "cases": [{"name": "ping", "alias": "ping"}]
            }
        }))
        .unwrap();

        assert_eq!(doc.id(), "default.HttpTest.smoke");
        assert_eq!(doc.depends_on(), ["default.Server.api".to_string()]);
        assert_eq!(doc.cases()[0].alias, Some("ping"));
    }
}
