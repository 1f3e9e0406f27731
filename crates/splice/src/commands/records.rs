//! `splice records`: inspect the durable de-integration store.

use std::fmt::Write as _;

use tabled::Tabled;

use splice_core::{DeintegrationRecord, FileRecordStore, RecordStore};

use super::{Ctx, parse_record_id};
use crate::cli::{RecordsArgs, RecordsCommand};
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
pub(crate) struct RecordRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Integration")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Policy")]
    policy: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Restorable")]
    restorable: String,
    #[tabled(rename = "Started")]
    started: String,
}

pub(crate) fn row(record: &DeintegrationRecord, color: bool) -> RecordRow {
    RecordRow {
        id: record.id.to_string(),
        name: record.integration_name.clone(),
        kind: record.integration_type.to_string(),
        policy: record.policy.to_string(),
        status: output::paint_status(&record.status.to_string(), color),
        restorable: if record.is_restorable() { "yes" } else { "no" }.into(),
        started: record.start_time.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

pub async fn handle(args: RecordsArgs, ctx: &Ctx) -> Result<(), CliError> {
    let store = FileRecordStore::open(ctx.settings.records_dir()).await?;
    let color = ctx.color;

    let rendered = match args.command {
        RecordsCommand::List { restorable } => {
            let mut records = store.list().await?;
            if restorable {
                records.retain(DeintegrationRecord::is_restorable);
            }
            output::render_list(
                ctx.format,
                &records,
                |r| row(r, color),
                |r| r.id.to_string(),
            )
        }
        RecordsCommand::Show { id } => {
            let record_id = parse_record_id(&id)?;
            let record = store.load(record_id).await?.ok_or_else(|| CliError::NotFound {
                resource_type: "deintegration record".into(),
                identifier: id.clone(),
                list_command: "records list".into(),
            })?;
            output::render_single(
                ctx.format,
                &record,
                |r| detail(r, color),
                |r| r.status.to_string(),
            )
        }
    };
    output::print_output(&rendered, ctx.quiet);
    Ok(())
}

fn detail(record: &DeintegrationRecord, color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Record:       {}", record.id);
    let _ = writeln!(
        out,
        "Integration:  {} ({}, {})",
        record.integration_name, record.integration_type, record.integration_id
    );
    let _ = writeln!(out, "Policy:       {}", record.policy);
    let _ = writeln!(
        out,
        "Status:       {}",
        output::paint_status(&record.status.to_string(), color)
    );
    let _ = writeln!(out, "Preserved:    {}", record.saved_state.is_some());
    if let Some(ms) = record.duration {
        let _ = writeln!(out, "Duration:     {ms}ms");
    }
    if record.cleanup_verification_failed {
        let _ = writeln!(out, "Warning:      adapter still responded after cleanup");
    }
    if let Some(ref error) = record.error {
        let _ = writeln!(out, "Error:        {error}");
    }
    let _ = writeln!(out, "Steps:");
    for step in &record.steps {
        let _ = write!(
            out,
            "  {:<18} {}",
            step.name,
            output::paint_status(&step.status.to_string(), color)
        );
        if let Some(ref d) = step.detail {
            let _ = write!(out, "  ({d})");
        }
        out.push('\n');
    }
    out.trim_end().to_owned()
}
