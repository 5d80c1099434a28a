//! Switch inventory command handlers. These never contact a device.

use std::sync::Arc;

use serde::Serialize;
use tabled::Tabled;

use switchboard_core::{EngineConfig, LocalLinkInfo, OperationLock, Router, SwitchConfig};

use crate::cli::{GlobalOpts, SwitchesArgs, SwitchesCommand};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct SwitchSummary {
    name: String,
    family: &'static str,
    address: String,
    mac_address: Option<String>,
    physical_networks: Vec<String>,
    manage_vlans: bool,
    max_connections: usize,
}

impl From<&SwitchConfig> for SwitchSummary {
    fn from(c: &SwitchConfig) -> Self {
        Self {
            name: c.name.clone(),
            family: c.device.family(),
            address: c.address.clone(),
            mac_address: c.mac_address.as_ref().map(|m| m.as_str().to_owned()),
            physical_networks: c.physical_networks.clone(),
            manage_vlans: c.manage_vlans,
            max_connections: c.max_connections,
        }
    }
}

#[derive(Tabled)]
struct SwitchRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Family")]
    family: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "Physnets")]
    physnets: String,
    #[tabled(rename = "VLANs")]
    manage_vlans: String,
}

fn row(s: &SwitchSummary) -> SwitchRow {
    SwitchRow {
        name: s.name.clone(),
        family: s.family.to_owned(),
        address: s.address.clone(),
        mac: s.mac_address.clone().unwrap_or_else(|| "-".into()),
        physnets: if s.physical_networks.is_empty() {
            "*".into()
        } else {
            s.physical_networks.join(",")
        },
        manage_vlans: if s.manage_vlans { "managed" } else { "skipped" }.into(),
    }
}

pub fn handle(
    config: &EngineConfig,
    args: &SwitchesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let router = Router::from_config(config, &Arc::new(OperationLock::disabled()))?;

    match &args.command {
        SwitchesCommand::List { physnet } => {
            let summaries: Vec<SwitchSummary> = match physnet {
                Some(p) => router
                    .devices_for_physnet(p)
                    .map(|e| SwitchSummary::from(e.config.as_ref()))
                    .collect(),
                None => router
                    .iter()
                    .map(|e| SwitchSummary::from(e.config.as_ref()))
                    .collect(),
            };
            let out = output::render_list(&global.output, &summaries, row)?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
        SwitchesCommand::Resolve(link) => {
            let info = LocalLinkInfo {
                switch_info: link.switch_info.clone(),
                switch_id: link.switch_id.clone(),
                port_id: String::new(),
            };
            let entry = router.resolve(&info).ok_or_else(|| CliError::NotFound {
                what: "Switch for the given link".into(),
            })?;
            let summary = SwitchSummary::from(entry.config.as_ref());
            let out = output::render_single(&global.output, &summary, |s| {
                format!("{} ({}, {})", s.name, s.family, s.address)
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
