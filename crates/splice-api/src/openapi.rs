//! OpenAPI 3.x document model and operation caller.
//!
//! [`OpenApiDocument`] validates a raw document (JSON or YAML) and indexes
//! every operation by `operationId`. [`OpenApiClient`] issues the HTTP
//! call for a named operation against the document's first server.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Method;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

const HTTP_METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

// ── Document model ───────────────────────────────────────────────────

/// Where an operation parameter is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParameterLocation {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "path" => Some(Self::Path),
            "query" => Some(Self::Query),
            "header" => Some(Self::Header),
            "cookie" => Some(Self::Cookie),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Parameter {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
}

/// A single callable operation.
#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    pub operation_id: String,
    pub method: String,
    pub path: String,
    pub summary: Option<String>,
    pub parameters: Vec<Parameter>,
    pub has_request_body: bool,
}

/// A validated OpenAPI document with its operations indexed by id.
#[derive(Debug, Clone, Serialize)]
pub struct OpenApiDocument {
    pub openapi: String,
    pub title: String,
    pub version: String,
    pub servers: Vec<String>,
    pub operations: BTreeMap<String, Operation>,
}

impl OpenApiDocument {
    /// Parse a document from text. JSON is tried first, then YAML.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => serde_yaml::from_str(text).map_err(|e| {
                Error::InvalidSpecification(format!("document is neither JSON nor YAML: {e}"))
            })?,
        };
        if !value.is_object() {
            return Err(invalid("document root must be an object"));
        }
        Self::from_value(&value)
    }

    /// Validate a structured document and build the operation index.
    ///
    /// Requires `openapi`, `info.title`, `info.version`, at least one
    /// server with a `url`, and at least one path operation.
    pub fn from_value(doc: &Value) -> Result<Self, Error> {
        if let Some(text) = doc.as_str() {
            return Self::parse(text);
        }

        let openapi = doc
            .get("openapi")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing 'openapi' version field"))?;
        let info = doc
            .get("info")
            .ok_or_else(|| invalid("missing 'info' section"))?;
        let title = info
            .get("title")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing 'info.title'"))?;
        let version = info
            .get("version")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing 'info.version'"))?;

        let servers: Vec<String> = doc
            .get("servers")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|s| s.get("url").and_then(Value::as_str))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        if servers.is_empty() {
            return Err(invalid("at least one server with a 'url' is required"));
        }

        let paths = doc
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| invalid("missing 'paths' section"))?;

        let mut operations = BTreeMap::new();
        for (path, item) in paths {
            let shared = parse_parameters(item.get("parameters"));
            for method in HTTP_METHODS {
                let Some(op) = item.get(method) else {
                    continue;
                };
                let operation_id = op
                    .get("operationId")
                    .and_then(Value::as_str)
                    .map_or_else(|| synthesize_operation_id(method, path), str::to_owned);

                let mut parameters = shared.clone();
                for param in parse_parameters(op.get("parameters")) {
                    parameters.retain(|p| !(p.name == param.name && p.location == param.location));
                    parameters.push(param);
                }

                operations.insert(
                    operation_id.clone(),
                    Operation {
                        operation_id,
                        method: method.to_ascii_uppercase(),
                        path: path.clone(),
                        summary: op.get("summary").and_then(Value::as_str).map(str::to_owned),
                        parameters,
                        has_request_body: op.get("requestBody").is_some(),
                    },
                );
            }
        }
        if operations.is_empty() {
            return Err(invalid("at least one path operation is required"));
        }

        Ok(Self {
            openapi: openapi.to_owned(),
            title: title.to_owned(),
            version: version.to_owned(),
            servers,
            operations,
        })
    }

    pub fn operation(&self, operation_id: &str) -> Option<&Operation> {
        self.operations.get(operation_id)
    }

    pub fn operation_ids(&self) -> Vec<String> {
        self.operations.keys().cloned().collect()
    }
}

fn invalid(reason: &str) -> Error {
    Error::InvalidSpecification(reason.to_owned())
}

fn parse_parameters(raw: Option<&Value>) -> Vec<Parameter> {
    raw.and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|p| {
                    let name = p.get("name")?.as_str()?.to_owned();
                    let location = ParameterLocation::parse(p.get("in")?.as_str()?)?;
                    let required = location == ParameterLocation::Path
                        || p.get("required").and_then(Value::as_bool).unwrap_or(false);
                    Some(Parameter {
                        name,
                        location,
                        required,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `GET /users/{id}` becomes `get_users_id`.
fn synthesize_operation_id(method: &str, path: &str) -> String {
    let mut id = method.to_owned();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        id.push('_');
        id.extend(
            segment
                .chars()
                .filter(|c| *c != '{' && *c != '}')
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }),
        );
    }
    id
}

// ── Client ───────────────────────────────────────────────────────────

/// Issues HTTP calls for the operations of an [`OpenApiDocument`].
///
/// Call parameters are a JSON object. Path, query, and header values are
/// looked up by name under `path` / `query` / `headers`, falling back to
/// top-level keys; `body` is sent as the JSON request body.
#[derive(Clone)]
pub struct OpenApiClient {
    http: reqwest::Client,
    base_url: Url,
    document: Arc<OpenApiDocument>,
}

impl OpenApiClient {
    /// Build a client. `base_override` replaces the document's first server.
    pub fn new(
        document: Arc<OpenApiDocument>,
        base_override: Option<&str>,
        transport: &TransportConfig,
        headers: HeaderMap,
    ) -> Result<Self, Error> {
        let raw = match base_override {
            Some(url) => url.to_owned(),
            None => document
                .servers
                .first()
                .cloned()
                .ok_or_else(|| invalid("no server url"))?,
        };
        let base_url = Url::parse(&raw)?;
        let http = transport.build_client_with_headers(headers)?;
        Ok(Self {
            http,
            base_url,
            document,
        })
    }

    pub fn document(&self) -> &OpenApiDocument {
        &self.document
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Invoke `operation_id` with the given parameters.
    pub async fn call(&self, operation_id: &str, params: &Value) -> Result<Value, Error> {
        let op = self
            .document
            .operation(operation_id)
            .ok_or_else(|| Error::UnknownOperation(operation_id.to_owned()))?;

        let url = self.operation_url(op, params)?;
        let method = Method::from_bytes(op.method.as_bytes())
            .map_err(|_| invalid("unsupported HTTP method"))?;
        debug!("{method} {url}");

        let mut request = self.http.request(method, url);

        let query: Vec<(String, String)> = op
            .parameters
            .iter()
            .filter(|p| p.location == ParameterLocation::Query)
            .filter_map(|p| {
                lookup(params, "query", &p.name).map(|v| (p.name.clone(), scalar_text(v)))
            })
            .collect();
        if !query.is_empty() {
            request = request.query(&query);
        }

        for p in op
            .parameters
            .iter()
            .filter(|p| p.location == ParameterLocation::Header)
        {
            if let Some(v) = lookup(params, "headers", &p.name) {
                request = request.header(p.name.as_str(), scalar_text(v));
            }
        }

        if let Some(body) = params.get("body") {
            request = request.json(body);
        }

        let resp = request.send().await?;
        handle_response(resp).await
    }

    /// Probe the base URL. Returns the HTTP status code.
    pub async fn ping(&self) -> Result<u16, Error> {
        let resp = self.http.get(self.base_url.clone()).send().await?;
        Ok(resp.status().as_u16())
    }

    fn operation_url(&self, op: &Operation, params: &Value) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        let segments: Vec<String> = op
            .path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|segment| substitute_segment(segment, op, params))
            .collect::<Result<_, _>>()?;

        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| invalid("server url cannot be a base"))?;
            path.pop_if_empty();
            for segment in &segments {
                path.push(segment);
            }
        }
        Ok(url)
    }
}

fn substitute_segment(segment: &str, op: &Operation, params: &Value) -> Result<String, Error> {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let name = &rest[start + 1..start + len];
        let value = lookup(params, "path", name).ok_or_else(|| Error::MissingParameter {
            operation: op.operation_id.clone(),
            name: name.to_owned(),
        })?;
        out.push_str(&rest[..start]);
        out.push_str(&scalar_text(value));
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn lookup<'a>(params: &'a Value, section: &str, name: &str) -> Option<&'a Value> {
    params
        .get(section)
        .and_then(|s| s.get(name))
        .or_else(|| params.get(name))
        .filter(|v| !v.is_null())
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decode a response: JSON when possible, raw text otherwise, `null` when empty.
pub(crate) async fn handle_response(resp: reqwest::Response) -> Result<Value, Error> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        let message = if body.is_empty() {
            status.canonical_reason().unwrap_or("").to_owned()
        } else {
            body.chars().take(512).collect()
        };
        return Err(Error::Status {
            status: status.as_u16(),
            message,
        });
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
}
