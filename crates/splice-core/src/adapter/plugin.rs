// Plugin adapter and module registry.
//
// "Loading" a plugin resolves its module name through a `PluginRegistry`.
// Modules come from two places: constructors submitted at link time with
// `inventory::submit!`, and constructors registered at runtime by the
// embedding application. Runtime registrations shadow linked ones.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{
    Adapter, AdapterContext, AdapterDescriptor, AdapterError, AdapterEventSender, AdapterSetup,
    require_str,
};
use crate::model::IntegrationKind;

// ── Module contract ──────────────────────────────────────────────────

/// What a plugin receives from `init`.
pub struct PluginContext {
    pub options: Value,
    pub events: AdapterEventSender,
}

#[async_trait]
pub trait PluginModule: Send + Sync {
    /// Called exactly once per loaded instance.
    async fn init(&self, ctx: PluginContext) -> Result<(), AdapterError>;

    async fn execute(&self, action: &str, params: Value) -> Result<Value, AdapterError>;

    fn actions(&self) -> Vec<String> {
        Vec::new()
    }

    async fn health(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn snapshot(&self) -> Result<Value, AdapterError> {
        Ok(Value::Null)
    }

    async fn restore(&self, _state: Value) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Link-time registration entry.
pub struct PluginDescriptor {
    pub name: &'static str,
    pub build: fn() -> Arc<dyn PluginModule>,
}

inventory::collect!(PluginDescriptor);

type PluginBuilder = Arc<dyn Fn() -> Arc<dyn PluginModule> + Send + Sync>;

// ── Registry ─────────────────────────────────────────────────────────

pub struct PluginRegistry {
    runtime: RwLock<HashMap<String, PluginBuilder>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            runtime: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or shadow) a module at runtime.
    pub fn register<F>(&self, name: impl Into<String>, build: F)
    where
        F: Fn() -> Arc<dyn PluginModule> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(plugin = %name, "plugin module registered");
        self.runtime
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(name, Arc::new(build));
    }

    /// Instantiate a fresh module by name.
    pub fn load(&self, name: &str) -> Option<Arc<dyn PluginModule>> {
        let runtime = self
            .runtime
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .cloned();
        if let Some(build) = runtime {
            return Some(build());
        }
        inventory::iter::<PluginDescriptor>
            .into_iter()
            .find(|d| d.name == name)
            .map(|d| (d.build)())
    }

    /// All known module names, sorted and de-duplicated.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = inventory::iter::<PluginDescriptor>
            .into_iter()
            .map(|d| d.name.to_owned())
            .collect();
        names.extend(
            self.runtime
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .keys()
                .cloned(),
        );
        names.sort();
        names.dedup();
        names
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Adapter ──────────────────────────────────────────────────────────

pub struct PluginAdapter {
    module_name: String,
    options: Value,
    module: Arc<dyn PluginModule>,
    initialized: OnceCell<()>,
    shut_down: AtomicBool,
}

pub fn create(setup: AdapterSetup<'_>) -> Result<Arc<dyn Adapter>, AdapterError> {
    Ok(Arc::new(PluginAdapter::new(setup.config, setup.plugins)?))
}

impl PluginAdapter {
    pub fn new(config: &Value, plugins: &PluginRegistry) -> Result<Self, AdapterError> {
        let module_name = require_str(config, "module")?.to_owned();
        let module = plugins.load(&module_name).ok_or_else(|| {
            AdapterError::InvalidConfig(format!("unknown plugin module '{module_name}'"))
        })?;
        Ok(Self {
            module_name,
            options: config.get("options").cloned().unwrap_or(Value::Null),
            module,
            initialized: OnceCell::new(),
            shut_down: AtomicBool::new(false),
        })
    }

    fn ensure_ready(&self) -> Result<(), AdapterError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(AdapterError::Unavailable(format!(
                "plugin '{}' was shut down",
                self.module_name
            )));
        }
        if self.initialized.initialized() {
            Ok(())
        } else {
            Err(AdapterError::NotInitialized)
        }
    }
}

#[async_trait]
impl Adapter for PluginAdapter {
    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Plugin
    }

    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor {
            kind: IntegrationKind::Plugin,
            actions: self.module.actions(),
            features: vec!["dynamic-module".into(), format!("module:{}", self.module_name)],
        }
    }

    async fn init(&self, ctx: AdapterContext) -> Result<(), AdapterError> {
        self.initialized
            .get_or_try_init(|| async {
                self.module
                    .init(PluginContext {
                        options: self.options.clone(),
                        events: ctx.events.clone(),
                    })
                    .await
            })
            .await?;
        info!(integration = %ctx.name, plugin = %self.module_name, "plugin loaded");
        Ok(())
    }

    async fn process_data(&self, action: &str, params: Value) -> Result<Value, AdapterError> {
        self.ensure_ready()?;
        self.module.execute(action, params).await
    }

    /// Local after cleanup; the remote side is not asked.
    async fn health_check(&self) -> Result<(), AdapterError> {
        self.ensure_ready()?;
        self.module.health().await
    }

    async fn save_state(&self) -> Result<Value, AdapterError> {
        self.module.snapshot().await
    }

    async fn restore_state(&self, state: Value) -> Result<(), AdapterError> {
        self.module.restore(state).await
    }

    async fn cleanup(&self) -> Result<(), AdapterError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.module.shutdown().await
    }
}

// ── Built-in `echo` module ───────────────────────────────────────────

/// Returns its parameters. `emit` pushes them onto the event channel as
/// `plugin.echo`. Counts calls, which is its saved state.
#[derive(Default)]
struct EchoModule {
    events: OnceCell<AdapterEventSender>,
    calls: AtomicU64,
}

fn echo_module() -> Arc<dyn PluginModule> {
    Arc::new(EchoModule::default())
}

inventory::submit! {
    PluginDescriptor { name: "echo", build: echo_module }
}

#[async_trait]
impl PluginModule for EchoModule {
    async fn init(&self, ctx: PluginContext) -> Result<(), AdapterError> {
        self.events
            .set(ctx.events)
            .map_err(|_| AdapterError::InvalidConfig("echo initialized twice".into()))
    }

    async fn execute(&self, action: &str, params: Value) -> Result<Value, AdapterError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match action {
            "echo" => Ok(params),
            "emit" => {
                let events = self.events.get().ok_or(AdapterError::NotInitialized)?;
                events
                    .send(super::AdapterEvent::new("plugin.echo", params))
                    .map_err(|_| AdapterError::Unavailable("event channel closed".into()))?;
                Ok(json!({ "emitted": true }))
            }
            "fail" => Err(AdapterError::Remote(
                params
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("requested failure")
                    .to_owned(),
            )),
            other => Err(AdapterError::UnsupportedAction(other.to_owned())),
        }
    }

    fn actions(&self) -> Vec<String> {
        vec!["echo".into(), "emit".into(), "fail".into()]
    }

    async fn snapshot(&self) -> Result<Value, AdapterError> {
        Ok(json!({ "calls": self.calls.load(Ordering::Relaxed) }))
    }

    async fn restore(&self, state: Value) -> Result<(), AdapterError> {
        let calls = state
            .get("calls")
            .and_then(Value::as_u64)
            .ok_or_else(|| AdapterError::InvalidParams("echo state needs 'calls'".into()))?;
        self.calls.store(calls, Ordering::Relaxed);
        Ok(())
    }
}
