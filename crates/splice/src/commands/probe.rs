//! `splice probe`: retrying health check against a URL.

use std::time::Duration;

use splice_api::HealthProbe;
use splice_core::helper::{self, HealthCheckOutcome};
use url::Url;

use super::Ctx;
use crate::cli::ProbeArgs;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: ProbeArgs, ctx: &Ctx) -> Result<(), CliError> {
    let raw = if args.url.contains("://") {
        args.url.clone()
    } else {
        format!("http://{}", args.url)
    };
    let url = Url::parse(&raw).map_err(|e| CliError::Validation {
        field: "url".into(),
        reason: format!("{}: {e}", args.url),
    })?;

    let mut options = ctx.settings.hub_config()?.probe;
    if let Some(secs) = args.timeout {
        options.timeout = Duration::from_secs(secs);
    }
    if let Some(retries) = args.retries {
        options.retries = retries;
    }
    if let Some(ms) = args.retry_delay {
        options.retry_delay = Duration::from_millis(ms);
    }

    let probe = HealthProbe::new(&ctx.settings.transport_config())
        .map_err(|e| CliError::from(splice_core::CoreError::from(e)))?;
    let outcome = helper::health_check(&probe, &url, &options).await;

    let color = ctx.color;
    let rendered = output::render_single(
        ctx.format,
        &outcome,
        |o| detail(&url, o, color),
        |o| if o.success { "healthy".into() } else { "unhealthy".into() },
    );
    output::print_output(&rendered, ctx.quiet);

    if outcome.success {
        Ok(())
    } else {
        Err(CliError::Unhealthy {
            url: url.to_string(),
            attempts: outcome.attempts,
            reason: outcome.error.unwrap_or_default(),
        })
    }
}

fn detail(url: &Url, outcome: &HealthCheckOutcome, color: bool) -> String {
    let verdict = if outcome.success { "healthy" } else { "unhealthy" };
    let status = outcome
        .status
        .map_or_else(|| "no response".to_owned(), |s| format!("HTTP {s}"));
    format!(
        "{url}: {} ({status}) after {} attempt(s) in {}ms",
        output::paint_status(verdict, color),
        outcome.attempts,
        outcome.elapsed_ms
    )
}
