//! `splice port`: availability check and free-port search.

use serde::Serialize;

use splice_core::helper;

use super::Ctx;
use crate::cli::{PortArgs, PortCommand};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct PortStatus {
    port: u16,
    available: bool,
}

pub async fn handle(args: PortArgs, ctx: &Ctx) -> Result<(), CliError> {
    let status = match args.command {
        PortCommand::Check { port } => PortStatus {
            port,
            available: helper::is_port_available(port).await,
        },
        PortCommand::Find { min, max } => {
            let range = ctx.settings.hub_config()?.port_range;
            let port = helper::find_available_port_in_range(
                min.unwrap_or(range.min),
                max.unwrap_or(range.max),
            )
            .await?;
            PortStatus {
                port,
                available: true,
            }
        }
    };

    let color = ctx.color;
    let rendered = output::render_single(
        ctx.format,
        &status,
        |s| {
            let word = if s.available { "available" } else { "in-use" };
            format!("port {}: {}", s.port, output::paint_status(word, color))
        },
        |s| s.port.to_string(),
    );
    output::print_output(&rendered, ctx.quiet);
    Ok(())
}
