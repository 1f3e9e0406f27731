// Database adapter over a pooled `sqlx::AnyPool`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once};

use async_trait::async_trait;
use serde_json::{Map, Number, Value, json};
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Column, Row};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{
    Adapter, AdapterContext, AdapterDescriptor, AdapterError, AdapterSetup, config_str,
    param_str, require_str,
};
use crate::model::IntegrationKind;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

static DRIVERS: Once = Once::new();

pub struct DatabaseAdapter {
    url: String,
    max_connections: u32,
    pool: OnceCell<AnyPool>,
    queries: AtomicU64,
    statements: AtomicU64,
    closed: AtomicBool,
}

pub fn create(setup: AdapterSetup<'_>) -> Result<Arc<dyn Adapter>, AdapterError> {
    Ok(Arc::new(DatabaseAdapter::new(setup.config)?))
}

impl DatabaseAdapter {
    /// `connectionString` may omit its scheme when `databaseType` names it.
    pub fn new(config: &Value) -> Result<Self, AdapterError> {
        let raw = require_str(config, "connectionString")?;
        let url = match config_str(config, "databaseType") {
            _ if has_scheme(raw) => raw.to_owned(),
            Some(kind) => format!("{kind}:{raw}"),
            None => {
                return Err(AdapterError::InvalidConfig(
                    "connectionString has no scheme and no databaseType is set".into(),
                ));
            }
        };
        let max_connections = config
            .get("maxConnections")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        Ok(Self {
            url,
            max_connections,
            pool: OnceCell::new(),
            queries: AtomicU64::new(0),
            statements: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn is_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }

    fn pool(&self) -> Result<&AnyPool, AdapterError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdapterError::Unavailable("pool closed".into()));
        }
        self.pool.get().ok_or(AdapterError::NotInitialized)
    }

    async fn connect(&self) -> Result<AnyPool, AdapterError> {
        DRIVERS.call_once(sqlx::any::install_default_drivers);

        // An in-memory database lives and dies with its connection.
        let options = if self.is_memory() {
            AnyPoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            AnyPoolOptions::new().max_connections(self.max_connections)
        };
        options
            .connect(&self.url)
            .await
            .map_err(|e| AdapterError::Unavailable(format!("database connect failed: {e}")))
    }

    async fn query(&self, params: &Value) -> Result<Value, AdapterError> {
        let sql = param_str(params, "sql")?;
        let rows = bind_all(sqlx::query(sql), params)?
            .fetch_all(self.pool()?)
            .await
            .map_err(remote)?;
        self.queries.fetch_add(1, Ordering::Relaxed);
        let rows: Vec<Value> = rows.iter().map(row_to_json).collect();
        Ok(json!({ "rows": rows, "count": rows.len() }))
    }

    async fn execute(&self, params: &Value) -> Result<Value, AdapterError> {
        let sql = param_str(params, "sql")?;
        let result = bind_all(sqlx::query(sql), params)?
            .execute(self.pool()?)
            .await
            .map_err(remote)?;
        self.statements.fetch_add(1, Ordering::Relaxed);
        Ok(json!({ "rowsAffected": result.rows_affected() }))
    }
}

fn has_scheme(url: &str) -> bool {
    url.split_once(':').is_some_and(|(scheme, _)| {
        !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+')
    })
}

fn remote(err: sqlx::Error) -> AdapterError {
    AdapterError::Remote(err.to_string())
}

/// Bind `params.params` positionally.
fn bind_all<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    params: &Value,
) -> Result<Query<'q, Any, AnyArguments<'q>>, AdapterError> {
    let Some(values) = params.get("params") else {
        return Ok(query);
    };
    let values = values
        .as_array()
        .ok_or_else(|| AdapterError::InvalidParams("'params' must be an array".into()))?;

    for value in values {
        query = match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => query.bind(s.clone()),
            nested @ (Value::Array(_) | Value::Object(_)) => query.bind(nested.to_string()),
        };
    }
    Ok(query)
}

/// Column-by-column decode, trying the narrowest JSON type first.
fn row_to_json(row: &AnyRow) -> Value {
    let mut object = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        object.insert(column.name().to_owned(), cell(row, idx));
    }
    Value::Object(object)
}

fn cell(row: &AnyRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map_or(Value::Null, Value::Bool);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map_or(Value::Null, Value::String);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map_or(Value::Null, |bytes| Value::String(hex::encode(bytes)));
    }
    Value::Null
}

#[async_trait]
impl Adapter for DatabaseAdapter {
    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Database
    }

    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor::new(
            IntegrationKind::Database,
            &["query", "execute"],
            &["pooled-connections", "parameterized-queries"],
        )
    }

    async fn init(&self, ctx: AdapterContext) -> Result<(), AdapterError> {
        self.pool.get_or_try_init(|| self.connect()).await?;
        info!(integration = %ctx.name, max_connections = self.max_connections, "database pool open");
        Ok(())
    }

    async fn process_data(&self, action: &str, params: Value) -> Result<Value, AdapterError> {
        match action {
            "query" => self.query(&params).await,
            "execute" => self.execute(&params).await,
            other => Err(AdapterError::UnsupportedAction(other.to_owned())),
        }
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        sqlx::query("SELECT 1")
            .execute(self.pool()?)
            .await
            .map_err(remote)?;
        Ok(())
    }

    async fn save_state(&self) -> Result<Value, AdapterError> {
        Ok(json!({
            "queries": self.queries.load(Ordering::Relaxed),
            "statements": self.statements.load(Ordering::Relaxed),
        }))
    }

    async fn restore_state(&self, state: Value) -> Result<(), AdapterError> {
        if let Some(n) = state.get("queries").and_then(Value::as_u64) {
            self.queries.store(n, Ordering::Relaxed);
        }
        if let Some(n) = state.get("statements").and_then(Value::as_u64) {
            self.statements.store(n, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), AdapterError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(pool) = self.pool.get() {
            pool.close().await;
            debug!("database pool closed");
        }
        Ok(())
    }
}
