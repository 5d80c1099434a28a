//! Command dispatch: bridges CLI args -> engine operations -> output formatting.

pub mod config_cmd;
pub mod network;
pub mod port;
pub mod switches;

use switchboard_config::Config;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a config-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let engine_config = config.to_engine_config()?;
    match cmd {
        Command::Network(args) => network::handle(&engine_config, args, global).await,
        Command::Port(args) => port::handle(&engine_config, args, global).await,
        Command::Switches(args) => switches::handle(&engine_config, &args, global),
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
