// Networked-service adapter: API services, web UIs and local dev tools.
//
// Actions are `noun:verb` strings over the service's REST API. Sessions
// opened through the adapter are tracked locally; that table is exactly
// the adapter's saved state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use splice_api::{EventStreamHandle, ReconnectConfig, ServiceClient, headers_from_json};
use tokio::sync::{Mutex, OnceCell};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    Adapter, AdapterContext, AdapterDescriptor, AdapterError, AdapterSetup, config_str, param_str,
};
use crate::helper::build_base_url;
use crate::model::IntegrationKind;

const DEFAULT_HEALTH_PATH: &str = "health";

const ACTIONS: &[&str] = &[
    "project:list",
    "project:get",
    "session:create",
    "session:list",
    "session:execute",
    "session:close",
    "file:read",
    "file:write",
    "status",
];

/// One row of the session table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub executions: u64,
}

pub struct ServiceAdapter {
    kind: IntegrationKind,
    client: ServiceClient,
    health_path: String,
    ws_url: Option<Url>,
    sessions: Mutex<BTreeMap<String, SessionEntry>>,
    stream: OnceCell<EventStreamHandle>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

pub fn create(
    kind: IntegrationKind,
    setup: AdapterSetup<'_>,
) -> Result<Arc<dyn Adapter>, AdapterError> {
    Ok(Arc::new(ServiceAdapter::new(kind, setup)?))
}

impl ServiceAdapter {
    pub fn new(kind: IntegrationKind, setup: AdapterSetup<'_>) -> Result<Self, AdapterError> {
        let base = build_base_url(setup.config)
            .map_err(|e| AdapterError::InvalidConfig(e.to_string()))?;
        let client = ServiceClient::new(
            base.as_str(),
            setup.transport,
            headers_from_json(setup.config.get("headers")),
        )?;
        let ws_url = config_str(setup.config, "wsPath")
            .map(|path| websocket_url(&base, path))
            .transpose()?;

        Ok(Self {
            kind,
            client,
            health_path: config_str(setup.config, "healthPath")
                .unwrap_or(DEFAULT_HEALTH_PATH)
                .trim_start_matches('/')
                .to_owned(),
            ws_url,
            sessions: Mutex::new(BTreeMap::new()),
            stream: OnceCell::new(),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::Acquire) {
            Err(AdapterError::Unavailable("service adapter cleaned up".into()))
        } else {
            Ok(())
        }
    }

    async fn create_session(&self, params: Value) -> Result<Value, AdapterError> {
        let response = self.client.create_session(&params).await?;
        let id = response
            .get("id")
            .or_else(|| response.get("sessionId"))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| AdapterError::Remote("session response carried no id".into()))?;

        let entry = SessionEntry {
            id: id.clone(),
            project_id: params
                .get("projectId")
                .and_then(Value::as_str)
                .map(str::to_owned),
            created_at: Utc::now(),
            executions: 0,
        };
        self.sessions.lock().await.insert(id.clone(), entry);
        debug!(session = %id, "session opened");
        Ok(response)
    }

    async fn execute_in_session(&self, params: Value) -> Result<Value, AdapterError> {
        let id = param_str(&params, "sessionId")?.to_owned();
        if !self.sessions.lock().await.contains_key(&id) {
            return Err(AdapterError::InvalidParams(format!("unknown session '{id}'")));
        }
        let result = self.client.execute_in_session(&id, &params).await?;
        if let Some(entry) = self.sessions.lock().await.get_mut(&id) {
            entry.executions += 1;
        }
        Ok(result)
    }

    async fn close_session(&self, params: &Value) -> Result<Value, AdapterError> {
        let id = param_str(params, "sessionId")?;
        let result = self.client.close_session(id).await?;
        self.sessions.lock().await.remove(id);
        debug!(session = %id, "session closed");
        Ok(result)
    }

    /// Forward WebSocket messages as `service.<type>` events until cancelled.
    fn spawn_forwarder(&self, handle: &EventStreamHandle, ctx: AdapterContext) {
        let mut rx = handle.subscribe();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(event) => {
                            ctx.emit(format!("service.{}", event.kind), event.data.clone());
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!(integration = %ctx.name, skipped = n, "service event stream lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
    }
}

/// `http(s)://host/base` plus `path`, as `ws(s)://`.
fn websocket_url(base: &Url, path: &str) -> Result<Url, AdapterError> {
    let mut url = base.clone();
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|()| AdapterError::InvalidConfig(format!("cannot derive {scheme} URL from {base}")))?;
    let prefix = base.path().trim_end_matches('/').to_owned();
    url.set_path(&format!("{prefix}/{}", path.trim_start_matches('/')));
    Ok(url)
}

#[async_trait]
impl Adapter for ServiceAdapter {
    fn kind(&self) -> IntegrationKind {
        self.kind
    }

    fn descriptor(&self) -> AdapterDescriptor {
        let mut features = vec!["session-state", "rest-api"];
        if self.ws_url.is_some() {
            features.push("event-stream");
        }
        AdapterDescriptor::new(self.kind, ACTIONS, &features)
    }

    async fn init(&self, ctx: AdapterContext) -> Result<(), AdapterError> {
        if let Some(ws_url) = &self.ws_url {
            let handle = self
                .stream
                .get_or_init(|| async {
                    EventStreamHandle::connect(
                        ws_url.clone(),
                        ReconnectConfig::default(),
                        self.cancel.child_token(),
                    )
                })
                .await;
            self.spawn_forwarder(handle, ctx.clone());
        }
        info!(
            integration = %ctx.name,
            kind = %self.kind,
            base_url = %self.client.base_url(),
            "service adapter ready"
        );
        Ok(())
    }

    async fn process_data(&self, action: &str, params: Value) -> Result<Value, AdapterError> {
        self.ensure_open()?;
        match action {
            "project:list" => Ok(self.client.list_projects().await?),
            "project:get" => Ok(self
                .client
                .get_project(param_str(&params, "projectId")?)
                .await?),
            "session:create" => self.create_session(params).await,
            "session:list" => {
                let sessions: Vec<SessionEntry> =
                    self.sessions.lock().await.values().cloned().collect();
                Ok(json!({ "sessions": sessions }))
            }
            "session:execute" => self.execute_in_session(params).await,
            "session:close" => self.close_session(&params).await,
            "file:read" => Ok(self.client.read_file(param_str(&params, "path")?).await?),
            "file:write" => Ok(self
                .client
                .write_file(
                    param_str(&params, "path")?,
                    param_str(&params, "content")?,
                )
                .await?),
            "status" => Ok(self.client.status().await?),
            other => Err(AdapterError::UnsupportedAction(other.to_owned())),
        }
    }

    /// Local after cleanup; the remote side is not asked.
    async fn health_check(&self) -> Result<(), AdapterError> {
        self.ensure_open()?;
        self.client.get(&self.health_path, &[]).await?;
        Ok(())
    }

    async fn save_state(&self) -> Result<Value, AdapterError> {
        let sessions: Vec<SessionEntry> = self.sessions.lock().await.values().cloned().collect();
        Ok(json!({ "sessions": sessions }))
    }

    async fn restore_state(&self, state: Value) -> Result<(), AdapterError> {
        let sessions: Vec<SessionEntry> = match state.get("sessions") {
            Some(list) => serde_json::from_value(list.clone())
                .map_err(|e| AdapterError::InvalidParams(format!("bad session table: {e}")))?,
            None => Vec::new(),
        };
        let mut table = self.sessions.lock().await;
        table.clear();
        table.extend(sessions.into_iter().map(|s| (s.id.clone(), s)));
        debug!(sessions = table.len(), "session table restored");
        Ok(())
    }

    /// Closes known sessions remotely (best-effort) and stops the stream.
    /// The local session table is left intact for a later `save_state`.
    async fn cleanup(&self) -> Result<(), AdapterError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();
        if let Some(stream) = self.stream.get() {
            stream.shutdown();
        }
        let ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.client.close_session(&id).await {
                debug!(session = %id, error = %e, "session close failed during cleanup");
            }
        }
        Ok(())
    }
}
