// OpenAPI adapter: one callable per `operationId`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use splice_api::{OpenApiClient, OpenApiDocument, headers_from_json};
use tracing::debug;

use super::{Adapter, AdapterContext, AdapterDescriptor, AdapterError, AdapterSetup, config_str};
use crate::model::IntegrationKind;

pub struct OpenApiAdapter {
    client: OpenApiClient,
    calls: AtomicU64,
    closed: AtomicBool,
}

pub fn create(setup: AdapterSetup<'_>) -> Result<Arc<dyn Adapter>, AdapterError> {
    Ok(Arc::new(OpenApiAdapter::new(setup)?))
}

impl OpenApiAdapter {
    /// Validate the specification and build the HTTP client.
    pub fn new(setup: AdapterSetup<'_>) -> Result<Self, AdapterError> {
        let document = match setup.config.get("specification") {
            Some(Value::String(text)) => OpenApiDocument::parse(text)?,
            Some(doc @ Value::Object(_)) => OpenApiDocument::from_value(doc)?,
            Some(_) => {
                return Err(AdapterError::InvalidSpecification(
                    "specification must be an object or a JSON/YAML string".into(),
                ));
            }
            None => {
                return Err(AdapterError::InvalidConfig(
                    "missing required field 'specification'".into(),
                ));
            }
        };

        let client = OpenApiClient::new(
            Arc::new(document),
            config_str(setup.config, "baseUrl"),
            setup.transport,
            headers_from_json(setup.config.get("headers")),
        )?;

        Ok(Self {
            client,
            calls: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Adapter for OpenApiAdapter {
    fn kind(&self) -> IntegrationKind {
        IntegrationKind::OpenApi
    }

    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor {
            kind: IntegrationKind::OpenApi,
            actions: self.client.document().operation_ids(),
            features: vec!["operation-dispatch".into(), "spec-validation".into()],
        }
    }

    async fn init(&self, ctx: AdapterContext) -> Result<(), AdapterError> {
        let doc = self.client.document();
        debug!(
            integration = %ctx.name,
            title = %doc.title,
            operations = doc.operations.len(),
            base_url = %self.client.base_url(),
            "OpenAPI adapter ready"
        );
        Ok(())
    }

    async fn process_data(&self, action: &str, params: Value) -> Result<Value, AdapterError> {
        if self.client.document().operation(action).is_none() {
            return Err(AdapterError::UnsupportedAction(action.to_owned()));
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.client.call(action, &params).await?)
    }

    /// Any answer below 500 means the server is reachable. After cleanup
    /// this is answered locally.
    async fn health_check(&self) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdapterError::Unavailable("adapter cleaned up".into()));
        }
        match self.client.ping().await? {
            status if status < 500 => Ok(()),
            status => Err(AdapterError::Remote(format!("server answered HTTP {status}"))),
        }
    }

    async fn save_state(&self) -> Result<Value, AdapterError> {
        Ok(json!({
            "baseUrl": self.client.base_url().as_str(),
            "calls": self.calls.load(Ordering::Relaxed),
        }))
    }

    async fn restore_state(&self, state: Value) -> Result<(), AdapterError> {
        if let Some(calls) = state.get("calls").and_then(Value::as_u64) {
            self.calls.store(calls, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), AdapterError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
