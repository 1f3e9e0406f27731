// Async REST client for locally hosted networked services (dev tools,
// API services, web UIs).
//
// Base path: configurable `apiUrl`, resources under `api/`.

use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::Error;
use crate::openapi::handle_response;
use crate::transport::TransportConfig;

/// Async client for a networked service's JSON API.
///
/// Resource layout:
/// - `api/projects`, `api/projects/{id}`
/// - `api/sessions`, `api/sessions/{id}`, `api/sessions/{id}/execute`
/// - `api/files?path=…`
/// - `api/status`
#[derive(Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ServiceClient {
    // ── Constructors ─────────────────────────────────────────────────

    pub fn new(base_url: &str, transport: &TransportConfig, headers: HeaderMap) -> Result<Self, Error> {
        let http = transport.build_client_with_headers(headers)?;
        let base_url = Self::normalize_base_url(base_url)?;
        Ok(Self { http, base_url })
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: &str) -> Result<Self, Error> {
        let base_url = Self::normalize_base_url(base_url)?;
        Ok(Self { http, base_url })
    }

    /// Ensure the base URL ends with `/` so relative joins keep its path.
    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw)?;
        let path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{path}/"));
        Ok(url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builder ──────────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    pub async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, Error> {
        let url = self.url(path)?;
        debug!("GET {url} params={params:?}");

        let resp = self.http.get(url).query(params).send().await?;
        handle_response(resp).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, Error> {
        let url = self.url(path)?;
        debug!("POST {url}");

        let resp = self.http.post(url).json(body).send().await?;
        handle_response(resp).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value, Error> {
        let url = self.url(path)?;
        debug!("PUT {url}");

        let resp = self.http.put(url).json(body).send().await?;
        handle_response(resp).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, Error> {
        let url = self.url(path)?;
        debug!("DELETE {url}");

        let resp = self.http.delete(url).send().await?;
        handle_response(resp).await
    }

    // ── Projects ─────────────────────────────────────────────────────

    pub async fn list_projects(&self) -> Result<Value, Error> {
        self.get("api/projects", &[]).await
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Value, Error> {
        self.get(&format!("api/projects/{project_id}"), &[]).await
    }

    // ── Sessions ─────────────────────────────────────────────────────

    pub async fn create_session(&self, body: &Value) -> Result<Value, Error> {
        self.post("api/sessions", body).await
    }

    pub async fn execute_in_session(&self, session_id: &str, body: &Value) -> Result<Value, Error> {
        self.post(&format!("api/sessions/{session_id}/execute"), body)
            .await
    }

    pub async fn close_session(&self, session_id: &str) -> Result<Value, Error> {
        self.delete(&format!("api/sessions/{session_id}")).await
    }

    // ── Files ────────────────────────────────────────────────────────

    pub async fn read_file(&self, path: &str) -> Result<Value, Error> {
        self.get("api/files", &[("path", path.to_owned())]).await
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<Value, Error> {
        self.put(
            "api/files",
            &serde_json::json!({ "path": path, "content": content }),
        )
        .await
    }

    // ── Status ───────────────────────────────────────────────────────

    pub async fn status(&self) -> Result<Value, Error> {
        self.get("api/status", &[]).await
    }
}
