//! Command handlers, one module per top-level subcommand.

pub mod config_cmd;
pub mod port;
pub mod probe;
pub mod records;
pub mod run;

use splice_config::Settings;
use uuid::Uuid;

use crate::cli::{Command, OutputFormat};
use crate::error::CliError;

/// Resolved global options shared by every handler.
pub struct Ctx {
    pub settings: Settings,
    pub format: OutputFormat,
    pub color: bool,
    pub quiet: bool,
}

pub async fn dispatch(cmd: Command, ctx: &Ctx) -> Result<(), CliError> {
    match cmd {
        Command::Run(args) => run::handle(args, ctx).await,
        Command::Probe(args) => probe::handle(args, ctx).await,
        Command::Port(args) => port::handle(args, ctx).await,
        Command::Records(args) => records::handle(args, ctx).await,
        Command::Config(args) => config_cmd::handle(&args, ctx),
        // Handled before settings are loaded.
        Command::Completions(_) => Ok(()),
    }
}

pub(crate) fn parse_record_id(raw: &str) -> Result<Uuid, CliError> {
    raw.parse().map_err(|_| CliError::Validation {
        field: "record id".into(),
        reason: format!("'{raw}' is not a UUID"),
    })
}
