// Message-queue adapter backed by core NATS.
//
// Each configured queue gets a subscription (a queue subscription when
// `queueGroup` is set). Inbound messages are emitted as `mq.<subject>`;
// the `publish` action sends outbound.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_nats::connection::State;
use async_nats::{Client, ConnectOptions, Message};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    Adapter, AdapterContext, AdapterDescriptor, AdapterError, AdapterSetup, config_str,
    param_str, require_str,
};
use crate::model::IntegrationKind;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MessageQueueAdapter {
    url: String,
    queues: Vec<String>,
    queue_group: Option<String>,
    client: OnceCell<Client>,
    cancel: CancellationToken,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    published: AtomicU64,
    received: Arc<AtomicU64>,
    closed: AtomicBool,
}

pub fn create(setup: AdapterSetup<'_>) -> Result<Arc<dyn Adapter>, AdapterError> {
    Ok(Arc::new(MessageQueueAdapter::new(setup.config)?))
}

impl MessageQueueAdapter {
    pub fn new(config: &Value) -> Result<Self, AdapterError> {
        let url = require_str(config, "url")?.to_owned();
        let queues = match config.get("queues") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .map(|q| {
                    q.as_str()
                        .filter(|s| !s.is_empty())
                        .map(str::to_owned)
                        .ok_or_else(|| {
                            AdapterError::InvalidConfig("queues must be non-empty strings".into())
                        })
                })
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(AdapterError::InvalidConfig(
                    "queues must be a string or an array of strings".into(),
                ));
            }
        };

        Ok(Self {
            url,
            queues,
            queue_group: config_str(config, "queueGroup").map(str::to_owned),
            client: OnceCell::new(),
            cancel: CancellationToken::new(),
            listeners: Mutex::new(Vec::new()),
            published: AtomicU64::new(0),
            received: Arc::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
        })
    }

    fn client(&self) -> Result<&Client, AdapterError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdapterError::Unavailable("connection closed".into()));
        }
        self.client.get().ok_or(AdapterError::NotInitialized)
    }

    async fn connect(&self) -> Result<Client, AdapterError> {
        ConnectOptions::new()
            .connection_timeout(CONNECT_TIMEOUT)
            .connect(self.url.as_str())
            .await
            .map_err(|e| AdapterError::Unavailable(format!("broker connect failed: {e}")))
    }

    async fn subscribe_all(&self, client: &Client, ctx: &AdapterContext) -> Result<(), AdapterError> {
        let mut listeners = self.listeners.lock().await;
        for subject in &self.queues {
            let subscriber = match &self.queue_group {
                Some(group) => client.queue_subscribe(subject.clone(), group.clone()).await,
                None => client.subscribe(subject.clone()).await,
            }
            .map_err(|e| AdapterError::Remote(format!("subscribe to '{subject}' failed: {e}")))?;

            debug!(integration = %ctx.name, %subject, group = ?self.queue_group, "subscribed");
            let cancel = self.cancel.child_token();
            let ctx = ctx.clone();
            let received = Arc::clone(&self.received);
            listeners.push(tokio::spawn(async move {
                let mut subscriber = subscriber;
                loop {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        msg = subscriber.next() => {
                            let Some(msg) = msg else { break };
                            received.fetch_add(1, Ordering::Relaxed);
                            let (topic, payload) = inbound(&msg);
                            ctx.emit(topic, payload);
                        }
                    }
                }
                let _ = subscriber.unsubscribe().await;
            }));
        }
        Ok(())
    }

    async fn publish(&self, params: &Value) -> Result<Value, AdapterError> {
        let subject = param_str(params, "subject")?.to_owned();
        let payload = outbound(params.get("payload"))?;
        let size = payload.len();
        self.client()?
            .publish(subject.clone(), payload)
            .await
            .map_err(|e| AdapterError::Remote(format!("publish failed: {e}")))?;
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(json!({ "published": true, "subject": subject, "bytes": size }))
    }
}

/// Event topic and payload for an inbound message. JSON bodies are parsed;
/// anything else is passed through as text.
fn inbound(msg: &Message) -> (String, Value) {
    let data = serde_json::from_slice::<Value>(&msg.payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&msg.payload).into_owned()));
    let subject = msg.subject.to_string();
    (
        format!("mq.{subject}"),
        json!({
            "subject": subject,
            "reply": msg.reply.as_ref().map(ToString::to_string),
            "data": data,
        }),
    )
}

/// Strings go out verbatim, everything else as compact JSON.
fn outbound(payload: Option<&Value>) -> Result<Bytes, AdapterError> {
    match payload {
        None | Some(Value::Null) => Ok(Bytes::new()),
        Some(Value::String(text)) => Ok(Bytes::from(text.clone())),
        Some(other) => serde_json::to_vec(other)
            .map(Bytes::from)
            .map_err(|e| AdapterError::InvalidParams(format!("unserializable payload: {e}"))),
    }
}

#[async_trait]
impl Adapter for MessageQueueAdapter {
    fn kind(&self) -> IntegrationKind {
        IntegrationKind::MessageQueue
    }

    fn descriptor(&self) -> AdapterDescriptor {
        let mut features = vec!["subscriptions", "event-republishing"];
        if self.queue_group.is_some() {
            features.push("queue-groups");
        }
        AdapterDescriptor::new(IntegrationKind::MessageQueue, &["publish"], &features)
    }

    async fn init(&self, ctx: AdapterContext) -> Result<(), AdapterError> {
        let client = self.client.get_or_try_init(|| self.connect()).await?;
        self.subscribe_all(client, &ctx).await?;
        info!(
            integration = %ctx.name,
            url = %self.url,
            queues = self.queues.len(),
            "message queue connected"
        );
        Ok(())
    }

    async fn process_data(&self, action: &str, params: Value) -> Result<Value, AdapterError> {
        match action {
            "publish" => self.publish(&params).await,
            other => Err(AdapterError::UnsupportedAction(other.to_owned())),
        }
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        match self.client()?.connection_state() {
            State::Connected => Ok(()),
            other => Err(AdapterError::Unavailable(format!("broker connection {other:?}"))),
        }
    }

    async fn save_state(&self) -> Result<Value, AdapterError> {
        Ok(json!({
            "queues": self.queues,
            "published": self.published.load(Ordering::Relaxed),
            "received": self.received.load(Ordering::Relaxed),
        }))
    }

    async fn restore_state(&self, state: Value) -> Result<(), AdapterError> {
        if let Some(n) = state.get("published").and_then(Value::as_u64) {
            self.published.store(n, Ordering::Relaxed);
        }
        if let Some(n) = state.get("received").and_then(Value::as_u64) {
            self.received.store(n, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), AdapterError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();
        for handle in self.listeners.lock().await.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "subscription task ended abnormally");
            }
        }
        if let Some(client) = self.client.get() {
            client
                .flush()
                .await
                .map_err(|e| AdapterError::Remote(format!("flush failed: {e}")))?;
        }
        Ok(())
    }
}
