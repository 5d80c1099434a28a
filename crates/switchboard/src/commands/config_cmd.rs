//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            let path = global
                .config
                .clone()
                .unwrap_or_else(switchboard_config::config_path);
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }
        ConfigCommand::Show => {
            let cfg = switchboard_config::load_config(global.config.as_deref())?;
            output::print_output(cfg.to_toml_redacted()?.trim_end(), global.quiet);
            Ok(())
        }
        ConfigCommand::Check => {
            let cfg = switchboard_config::load_config(global.config.as_deref())?;
            let engine = cfg.to_engine_config()?;
            tracing::info!(switches = engine.switches.len(), "configuration valid");
            output::print_output(
                &format!("Configuration OK ({} switch(es))", engine.switches.len()),
                global.quiet,
            );
            Ok(())
        }
    }
}
