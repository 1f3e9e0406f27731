// Webhook receiver adapter.
//
// Inbound payloads arrive through `process_data("receive", ..)` from the
// router layer. The raw body is checked against
// `HMAC-SHA256(secret, body)`; accepted payloads are emitted as
// `webhook.<event>`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use sha2::Sha256;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    Adapter, AdapterContext, AdapterDescriptor, AdapterError, AdapterSetup, config_str,
    require_str,
};
use crate::model::IntegrationKind;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_SIGNATURE_HEADER: &str = "X-Signature-256";

pub struct WebhookAdapter {
    secret: SecretString,
    event: String,
    path: String,
    signature_header: String,
    ctx: OnceLock<AdapterContext>,
    received: AtomicU64,
    rejected: AtomicU64,
    last_received_at: Mutex<Option<String>>,
    closed: AtomicBool,
}

pub fn create(setup: AdapterSetup<'_>) -> Result<Arc<dyn Adapter>, AdapterError> {
    Ok(Arc::new(WebhookAdapter::new(setup.config)?))
}

impl WebhookAdapter {
    pub fn new(config: &Value) -> Result<Self, AdapterError> {
        let secret = require_str(config, "secret")?;
        let event = require_str(config, "event")?.to_owned();
        let path = config_str(config, "path")
            .map_or_else(|| format!("/webhooks/{event}"), str::to_owned);
        let signature_header = config_str(config, "signatureHeader")
            .unwrap_or(DEFAULT_SIGNATURE_HEADER)
            .to_owned();

        Ok(Self {
            secret: SecretString::from(secret.to_owned()),
            event,
            path,
            signature_header,
            ctx: OnceLock::new(),
            received: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            last_received_at: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn topic(&self) -> String {
        format!("webhook.{}", self.event)
    }

    fn mac(&self) -> Result<HmacSha256, AdapterError> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| AdapterError::InvalidConfig(format!("unusable webhook secret: {e}")))
    }

    /// Hex signature (`sha256=` prefixed) for `body`.
    pub fn sign(&self, body: &[u8]) -> Result<String, AdapterError> {
        let mut mac = self.mac()?;
        mac.update(body);
        Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
    }

    /// Constant-time verification of a hex signature, with or without the
    /// `sha256=` prefix.
    pub fn verify(&self, body: &[u8], signature: &str) -> Result<(), AdapterError> {
        let digest = signature.trim();
        let digest = digest.strip_prefix("sha256=").unwrap_or(digest);
        let provided = hex::decode(digest).map_err(|_| AdapterError::InvalidSignature)?;
        let mut mac = self.mac()?;
        mac.update(body);
        mac.verify_slice(&provided)
            .map_err(|_| AdapterError::InvalidSignature)
    }

    async fn receive(&self, params: &Value) -> Result<Value, AdapterError> {
        let ctx = self.ctx.get().ok_or(AdapterError::NotInitialized)?;
        let body = raw_body(params)?;
        let signature = params
            .get("signature")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if let Err(e) = self.verify(&body, signature) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(integration = %ctx.name, "rejected webhook with bad signature");
            return Err(e);
        }

        let payload = serde_json::from_slice::<Value>(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
        let topic = self.topic();
        ctx.emit(topic.clone(), payload);

        self.received.fetch_add(1, Ordering::Relaxed);
        *self.last_received_at.lock().await = Some(Utc::now().to_rfc3339());
        debug!(integration = %ctx.name, %topic, "webhook accepted");
        Ok(json!({ "accepted": true, "topic": topic }))
    }
}

/// The signed bytes: a string payload is used verbatim, anything else is
/// serialized as compact JSON.
fn raw_body(params: &Value) -> Result<Vec<u8>, AdapterError> {
    match params.get("payload") {
        Some(Value::String(text)) => Ok(text.as_bytes().to_vec()),
        Some(other) => serde_json::to_vec(other)
            .map_err(|e| AdapterError::InvalidParams(format!("unserializable payload: {e}"))),
        None => Err(AdapterError::InvalidParams(
            "missing parameter 'payload'".into(),
        )),
    }
}

#[async_trait]
impl Adapter for WebhookAdapter {
    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Webhook
    }

    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor::new(
            IntegrationKind::Webhook,
            &["receive", "sign", "endpoint"],
            &["signature-verification", "event-publishing"],
        )
    }

    async fn init(&self, ctx: AdapterContext) -> Result<(), AdapterError> {
        debug!(integration = %ctx.name, path = %self.path, "webhook endpoint registered");
        self.ctx
            .set(ctx)
            .map_err(|_| AdapterError::InvalidConfig("webhook adapter initialized twice".into()))
    }

    async fn process_data(&self, action: &str, params: Value) -> Result<Value, AdapterError> {
        match action {
            "receive" => self.receive(&params).await,
            "sign" => Ok(json!({ "signature": self.sign(&raw_body(&params)?)? })),
            "endpoint" => Ok(json!({
                "path": self.path,
                "signatureHeader": self.signature_header,
                "topic": self.topic(),
            })),
            other => Err(AdapterError::UnsupportedAction(other.to_owned())),
        }
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdapterError::Unavailable("endpoint closed".into()));
        }
        if self.ctx.get().is_none() {
            return Err(AdapterError::NotInitialized);
        }
        Ok(())
    }

    async fn save_state(&self) -> Result<Value, AdapterError> {
        Ok(json!({
            "received": self.received.load(Ordering::Relaxed),
            "rejected": self.rejected.load(Ordering::Relaxed),
            "lastReceivedAt": *self.last_received_at.lock().await,
        }))
    }

    async fn restore_state(&self, state: Value) -> Result<(), AdapterError> {
        if let Some(n) = state.get("received").and_then(Value::as_u64) {
            self.received.store(n, Ordering::Relaxed);
        }
        if let Some(n) = state.get("rejected").and_then(Value::as_u64) {
            self.rejected.store(n, Ordering::Relaxed);
        }
        *self.last_received_at.lock().await = state
            .get("lastReceivedAt")
            .and_then(Value::as_str)
            .map(str::to_owned);
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), AdapterError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
