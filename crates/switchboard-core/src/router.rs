// ── Resolution & dispatch ──
//
// Maps a port's physical-link descriptor to a configured switch and lists
// the switches taking part in a physical network.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::info;

use crate::config::{DeviceKind, EngineConfig, SwitchConfig, VfcRole, VfcSettings};
use crate::driver::{
    CliDialect, CliDriver, LockScope, NvueDriver, SshFactory, SwitchDriver, VfcDriver, VfcHost,
};
use crate::error::CoreError;
use crate::lock::OperationLock;
use crate::model::{LocalLinkInfo, MacAddress};
use crate::session::SessionPool;

/// A configured switch and its driver.
#[derive(Debug, Clone)]
pub struct SwitchEntry {
    pub config: Arc<SwitchConfig>,
    pub driver: Arc<dyn SwitchDriver>,
}

impl SwitchEntry {
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// Every configured switch, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct Router {
    entries: IndexMap<String, SwitchEntry>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: SwitchEntry) {
        self.entries.insert(entry.config.name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&SwitchEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SwitchEntry> {
        self.entries.values()
    }

    /// Build one driver per configured switch. VFC switches share the
    /// driver state of their host.
    pub fn from_config(
        config: &EngineConfig,
        lock: &Arc<OperationLock>,
    ) -> Result<Self, CoreError> {
        let scope = |sw: &SwitchConfig| LockScope::new(Arc::clone(lock), &sw.address, sw.max_connections);

        let mut hosts: HashMap<&str, Arc<VfcHost>> = HashMap::new();
        for sw in config.switches.values() {
            if let DeviceKind::Vfc(
                vfc @ VfcSettings {
                    role: VfcRole::Host(host),
                    ..
                },
            ) = &sw.device
            {
                let built = VfcHost::from_config(sw, vfc, host, scope(sw))?;
                hosts.insert(sw.name.as_str(), Arc::new(built));
            }
        }

        let mut router = Self::new();
        for sw in config.switches.values() {
            let driver: Arc<dyn SwitchDriver> = match &sw.device {
                DeviceKind::Cli(cli) => Arc::new(CliDriver::new(
                    sw.name.clone(),
                    CliDialect::new(cli.dialect)?,
                    SessionPool::new(
                        sw.name.clone(),
                        SshFactory::new(cli.ssh.clone()),
                        sw.max_connections,
                        sw.session_timeout,
                    ),
                    scope(sw),
                    cli.trunk_ports.clone(),
                )),
                DeviceKind::Nvue(nvue) => Arc::new(NvueDriver::from_config(sw, nvue, scope(sw))?),
                DeviceKind::Vfc(vfc) => {
                    let host_name = match &vfc.role {
                        VfcRole::Host(_) => sw.name.as_str(),
                        VfcRole::Remote { host, .. } => host.as_str(),
                    };
                    let host = hosts.get(host_name).cloned().ok_or_else(|| CoreError::Config {
                        message: format!("{}: VFC host '{host_name}' is not configured", sw.name),
                    })?;
                    match &vfc.role {
                        VfcRole::Host(_) => Arc::new(VfcDriver::host(host, vfc.port_vlans.clone())),
                        VfcRole::Remote { .. } => Arc::new(VfcDriver::remote(
                            sw.name.clone(),
                            host,
                            vfc.port_vlans.clone(),
                        )?),
                    }
                }
            };
            info!(switch = %sw.name, family = sw.device.family(), address = %sw.address, "switch registered");
            router.insert(SwitchEntry {
                config: Arc::new(sw.clone()),
                driver,
            });
        }
        Ok(router)
    }

    /// Find the switch a link descriptor points at: by name first, then by
    /// chassis MAC. `None` means the port cannot be bound here.
    pub fn resolve(&self, link: &LocalLinkInfo) -> Option<&SwitchEntry> {
        if let Some(entry) = link.switch_info.as_deref().and_then(|name| self.get(name)) {
            return Some(entry);
        }
        let mac = MacAddress::new(link.switch_id.as_deref()?);
        self.iter()
            .find(|e| e.config.mac_address.as_ref() == Some(&mac))
    }

    /// Switches in `physnet`. A switch that lists no physical networks is
    /// in all of them.
    pub fn devices_for_physnet<'a>(
        &'a self,
        physnet: &'a str,
    ) -> impl Iterator<Item = &'a SwitchEntry> + 'a {
        self.iter().filter(move |e| e.config.in_physnet(physnet))
    }
}
