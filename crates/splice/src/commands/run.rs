//! `splice run`: host a hub for the integrations in a manifest.
//!
//! Registers entries in declaration order, restores any `--restore`
//! records, then waits for Ctrl-C (or returns at once with `--once`).
//! On exit every integration is de-integrated in reverse registration
//! order so dependents go before what they depend on.

use std::sync::Arc;
use std::time::Duration;

use tabled::Tabled;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use splice_config::Manifest;
use splice_core::{
    DeintegrationManager, DeintegrationOptions, DeintegrationPolicy, DeintegrationRecord,
    Envelope, FileRecordStore, Hub, Integration, IntegrationFilter, RecordStatus, RecordStore,
};

use super::{Ctx, parse_record_id, records};
use crate::cli::{RunArgs, ShutdownPolicy};
use crate::error::CliError;
use crate::output;

const SETTLE_POLL: Duration = Duration::from_millis(100);
const SETTLE_SLACK: Duration = Duration::from_secs(5);

#[derive(Tabled)]
struct IntegrationRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Health")]
    health: String,
    #[tabled(rename = "Port")]
    port: String,
    #[tabled(rename = "ID")]
    id: String,
}

fn integration_row(i: &Integration, color: bool) -> IntegrationRow {
    IntegrationRow {
        name: i.name.clone(),
        kind: i.kind.to_string(),
        status: output::paint_status(&i.status.to_string(), color),
        health: output::paint_status(&i.health_status.to_string(), color),
        port: i
            .port
            .map(|p| p.resolved_port.to_string())
            .unwrap_or_default(),
        id: i.id.to_string(),
    }
}

/// Teardown settings shared by every integration on exit.
#[derive(Debug, Clone, Copy)]
struct Teardown {
    policy: DeintegrationPolicy,
    preserve: bool,
    settle_timeout: Duration,
}

pub async fn handle(args: RunArgs, ctx: &Ctx) -> Result<(), CliError> {
    let manifest = splice_config::load_manifest(&args.manifest)?;
    let restore = args
        .restore
        .iter()
        .map(|raw| parse_record_id(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let config = ctx.settings.hub_config()?;
    let teardown = Teardown {
        policy: resolve_policy(args.shutdown_policy, ctx.settings.defaults.shutdown_policy)?,
        preserve: !args.no_preserve,
        settle_timeout: config.drain_timeout + SETTLE_SLACK,
    };

    let hub = Hub::new(config)?;
    let logger = spawn_event_logger(hub.subscribe());
    let store: Arc<dyn RecordStore> =
        Arc::new(FileRecordStore::open(ctx.settings.records_dir()).await?);
    let manager = DeintegrationManager::with_store(hub.clone(), store).await?;

    let served = serve(&manager, &manifest, &restore, args.once, ctx).await;
    let finished = shut_down(&manager, teardown).await;

    hub.shutdown().await;
    logger.abort();

    if !finished.is_empty() {
        let color = ctx.color;
        let rendered = output::render_list(
            ctx.format,
            &finished,
            |r| records::row(r, color),
            |r| r.id.to_string(),
        );
        output::print_output(&rendered, ctx.quiet);
    }

    served?;
    let failed: Vec<&str> = finished
        .iter()
        .filter(|r| r.status == RecordStatus::Failed)
        .map(|r| r.integration_name.as_str())
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(CliError::Internal {
            code: "deintegration_failed".into(),
            message: format!("teardown failed for: {}", failed.join(", ")),
        })
    }
}

/// Only policies that need no operator input can run at exit.
fn resolve_policy(
    flag: Option<ShutdownPolicy>,
    configured: DeintegrationPolicy,
) -> Result<DeintegrationPolicy, CliError> {
    match flag {
        Some(ShutdownPolicy::Immediate) => Ok(DeintegrationPolicy::Immediate),
        Some(ShutdownPolicy::Graceful) => Ok(DeintegrationPolicy::Graceful),
        None => match configured {
            p @ (DeintegrationPolicy::Immediate | DeintegrationPolicy::Graceful) => Ok(p),
            other => Err(CliError::Validation {
                field: "defaults.shutdown_policy".into(),
                reason: format!("'{other}' cannot be used on exit; use immediate or graceful"),
            }),
        },
    }
}

// ── Serving ──────────────────────────────────────────────────────────

async fn serve(
    manager: &DeintegrationManager,
    manifest: &Manifest,
    restore: &[Uuid],
    once: bool,
    ctx: &Ctx,
) -> Result<(), CliError> {
    let hub = manager.hub();

    for request in manifest.requests() {
        let name = request.name.clone();
        let outcome = hub.register(request).await.map_err(|e| {
            warn!(name = %name, error = %e, "registration failed");
            CliError::from(e)
        })?;
        info!(name = %name, id = %outcome.integration_id, status = %outcome.status, "registered");
    }

    for record_id in restore {
        let outcome = manager.reintegrate(*record_id).await?;
        info!(record_id = %record_id, id = %outcome.integration_id, "reintegrated");
    }

    let listed = hub.list_integrations(&IntegrationFilter::default()).await;
    let color = ctx.color;
    let rendered = output::render_list(
        ctx.format,
        &listed.integrations,
        |i| integration_row(i, color),
        |i| i.name.clone(),
    );
    output::print_output(&rendered, ctx.quiet);

    if !once {
        info!("running; press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        info!("interrupt received, tearing down");
    }
    Ok(())
}

// ── Teardown ─────────────────────────────────────────────────────────

/// De-integrate everything still registered, newest first, waiting for
/// each record to finish before starting the next.
async fn shut_down(manager: &DeintegrationManager, teardown: Teardown) -> Vec<DeintegrationRecord> {
    let mut listed = manager
        .hub()
        .list_integrations(&IntegrationFilter::default())
        .await
        .integrations;
    listed.reverse();

    let mut finished = Vec::with_capacity(listed.len());
    for integration in listed {
        let options = DeintegrationOptions::new(teardown.policy).preserve_data(teardown.preserve);
        let summary = match manager.deintegrate(integration.id, options).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(name = %integration.name, error = %e, "could not start de-integration");
                continue;
            }
        };
        match settle(manager, summary.id, teardown.settle_timeout).await {
            Ok(record) => finished.push(record),
            Err(e) => warn!(name = %integration.name, record_id = %summary.id, error = %e, "de-integration did not settle"),
        }
    }
    finished
}

async fn settle(
    manager: &DeintegrationManager,
    record_id: Uuid,
    limit: Duration,
) -> Result<DeintegrationRecord, CliError> {
    let poll = async {
        loop {
            let record = manager.get_record(record_id).await?;
            if record.status.is_finished() {
                return Ok::<_, CliError>(record);
            }
            tokio::time::sleep(SETTLE_POLL).await;
        }
    };
    tokio::time::timeout(limit, poll)
        .await
        .map_err(|_| CliError::Timeout {
            operation: format!("de-integration record {record_id}"),
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        })?
}

fn spawn_event_logger(mut rx: broadcast::Receiver<Arc<Envelope>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => info!(
                    kind = %event.kind,
                    integration_id = ?event.integration_id,
                    payload = %event.payload,
                    "event"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn flag_overrides_configured_policy() {
        let policy =
            resolve_policy(Some(ShutdownPolicy::Graceful), DeintegrationPolicy::Manual).unwrap();
        assert_eq!(policy, DeintegrationPolicy::Graceful);
    }

    #[test]
    fn operator_policies_rejected_on_exit() {
        assert!(resolve_policy(None, DeintegrationPolicy::Manual).is_err());
        assert!(resolve_policy(None, DeintegrationPolicy::Scheduled).is_err());
        assert_eq!(
            resolve_policy(None, DeintegrationPolicy::Immediate).unwrap(),
            DeintegrationPolicy::Immediate
        );
    }
}
