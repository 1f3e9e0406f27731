//! `splice config`: effective settings and file location.

use super::Ctx;
use crate::cli::{ConfigArgs, ConfigCommand, OutputFormat};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs, ctx: &Ctx) -> Result<(), CliError> {
    let rendered = match args.command {
        ConfigCommand::Path => splice_config::config_path().display().to_string(),
        ConfigCommand::Show => match ctx.format {
            OutputFormat::Table | OutputFormat::Plain => ctx.settings.to_toml()?,
            format => output::render_single(format, &ctx.settings, |_| String::new(), |_| String::new()),
        },
    };
    output::print_output(&rendered, ctx.quiet);
    Ok(())
}
