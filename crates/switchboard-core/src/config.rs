// ── Runtime engine configuration ──
//
// These types describe the switch inventory and the coordination knobs.
// They carry credentials but never touch disk: `switchboard-config`
// builds an `EngineConfig` and hands it to `Engine::connect`.

use std::collections::BTreeMap;
use std::time::Duration;

use indexmap::IndexMap;
use secrecy::SecretString;
use switchboard_api::{SshTarget, TransportConfig};
use url::Url;

use crate::driver::dialect::DialectKind;
use crate::driver::numbering::TunnelNumbering;
use crate::error::CoreError;
use crate::lock::LockSettings;
use crate::model::{ControllerEndpoint, MacAddress, SegmentationId};

/// Coordination backend for the distributed lock.
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// `redis://...` or `memory://`. `None` disables locking, which is only
    /// safe with a single worker process.
    pub backend_url: Option<String>,
    pub acquire_timeout: Duration,
    pub lease_ttl: Duration,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        let lock = LockSettings::default();
        Self {
            backend_url: None,
            acquire_timeout: lock.acquire_timeout,
            lease_ttl: lock.lease_ttl,
        }
    }
}

/// Bounded retry for transient device errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// Everything the engine needs to start.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub coordination: CoordinationConfig,
    pub retry: RetryPolicy,
    /// Switches worked on in parallel during a network fan-out.
    pub fanout_concurrency: usize,
    /// Switches in configuration order.
    pub switches: IndexMap<String, SwitchConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            coordination: CoordinationConfig::default(),
            retry: RetryPolicy::default(),
            fanout_concurrency: 2,
            switches: IndexMap::new(),
        }
    }
}

/// Identity and connection data for one switch. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct SwitchConfig {
    pub name: String,
    /// Management address; also the lock namespace.
    pub address: String,
    pub mac_address: Option<MacAddress>,
    /// Upper bound on concurrent sessions, and the lock pool size.
    pub max_connections: usize,
    /// Empty means "member of every physical network".
    pub physical_networks: Vec<String>,
    /// When false, network create/delete is skipped on this switch.
    pub manage_vlans: bool,
    /// How long to wait for a free session.
    pub session_timeout: Duration,
    pub device: DeviceKind,
}

impl SwitchConfig {
    pub fn in_physnet(&self, physnet: &str) -> bool {
        self.physical_networks.is_empty() || self.physical_networks.iter().any(|p| p == physnet)
    }
}

/// Vendor family, fixed at load time.
#[derive(Debug, Clone)]
pub enum DeviceKind {
    Cli(CliSettings),
    Nvue(NvueSettings),
    Vfc(VfcSettings),
}

impl DeviceKind {
    pub fn family(&self) -> &'static str {
        match self {
            Self::Cli(c) => c.dialect.name(),
            Self::Nvue(_) => "nvue",
            Self::Vfc(_) => "vfc",
        }
    }
}

// ── CLI ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CliSettings {
    pub dialect: DialectKind,
    pub ssh: SshTarget,
    /// Ports that carry every managed VLAN tagged.
    pub trunk_ports: Vec<String>,
}

// ── Revision REST ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NvueSettings {
    /// API root, e.g. `https://leaf1:8765/nvue_v1/`.
    pub base_url: Url,
    pub username: String,
    pub password: SecretString,
    pub transport: TransportConfig,
    pub bridge_domain: String,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

// ── Pooled bridge ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VfcSettings {
    pub base_url: Url,
    pub token: SecretString,
    pub transport: TransportConfig,
    /// Node VLAN behind each edge port, keyed by port id.
    pub port_vlans: BTreeMap<String, u16>,
    pub ofport_stride: u32,
    pub role: VfcRole,
}

#[derive(Debug, Clone)]
pub enum VfcRole {
    /// This switch owns the bridges.
    Host(Box<VfcHostSettings>),
    /// Edge switch whose ports are tunnelled to `host`.
    Remote { host: String },
}

#[derive(Debug, Clone)]
pub struct VfcHostSettings {
    pub uplink_ports: Vec<u32>,
    pub bridge_capacity: u32,
    pub bridge_type: String,
    pub bridge_resources: u32,
    pub default_controller: ControllerEndpoint,
    pub controller_namespace: Option<String>,
    pub default_vfc_name: String,
    /// Host trunk port facing each remote switch, keyed by switch name.
    pub remote_ports: BTreeMap<String, u32>,
    pub provisioning: Option<ProvisioningSettings>,
}

/// Overrides applied when the provisioning VLAN itself is added.
#[derive(Debug, Clone)]
pub struct ProvisioningSettings {
    pub segmentation_id: SegmentationId,
    pub controller: ControllerEndpoint,
    pub bridge_type: String,
}

impl EngineConfig {
    /// Cross-switch checks that single entries cannot make on their own.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.fanout_concurrency == 0 {
            return Err(invalid("fanout concurrency must be at least 1"));
        }
        if self.retry.attempts == 0 {
            return Err(invalid("retry attempts must be at least 1"));
        }

        for (name, sw) in &self.switches {
            if sw.max_connections == 0 {
                return Err(invalid(format!("{name}: max_connections must be at least 1")));
            }
            if let DeviceKind::Vfc(vfc) = &sw.device {
                validate_vfc(self, name, vfc)?;
            }
        }
        Ok(())
    }
}

fn validate_vfc(config: &EngineConfig, name: &str, vfc: &VfcSettings) -> Result<(), CoreError> {
    match &vfc.role {
        VfcRole::Host(host) => {
            if host.bridge_capacity == 0 {
                return Err(invalid(format!("{name}: bridge capacity must be at least 1")));
            }
            if let Some(p) = host.uplink_ports.iter().find(|p| **p >= vfc.ofport_stride) {
                return Err(invalid(format!(
                    "{name}: uplink port {p} does not fit tunnel stride {}",
                    vfc.ofport_stride
                )));
            }
            validate_remote_numbers(config, name, vfc, host)?;
        }
        VfcRole::Remote { host } => {
            let host_cfg = config
                .switches
                .get(host)
                .ok_or_else(|| invalid(format!("{name}: VFC host '{host}' is not configured")))?;
            let DeviceKind::Vfc(VfcSettings {
                role: VfcRole::Host(host_settings),
                ..
            }) = &host_cfg.device
            else {
                return Err(invalid(format!("{name}: switch '{host}' is not a VFC host")));
            };
            if !host_settings.remote_ports.contains_key(name) {
                return Err(invalid(format!(
                    "{name}: VFC host '{host}' has no trunk port toward this switch"
                )));
            }
        }
    }
    Ok(())
}

/// Every remote port of `host_name` must get its own tunnel number. The
/// number comes from the host trunk and the node VLAN, so two ports behind
/// one trunk cannot share a node VLAN.
fn validate_remote_numbers(
    config: &EngineConfig,
    host_name: &str,
    host_vfc: &VfcSettings,
    host: &VfcHostSettings,
) -> Result<(), CoreError> {
    let numbering = TunnelNumbering::new(host_vfc.ofport_stride);
    let mut claimed: BTreeMap<u32, String> = BTreeMap::new();

    for (remote, sw) in &config.switches {
        let DeviceKind::Vfc(VfcSettings {
            role: VfcRole::Remote { host: owner },
            port_vlans,
            ..
        }) = &sw.device
        else {
            continue;
        };
        if owner != host_name {
            continue;
        }
        let Some(&trunk) = host.remote_ports.get(remote) else {
            continue;
        };
        for (port, &node_vlan) in port_vlans {
            let ofport = numbering
                .remote_ofport(trunk, node_vlan)
                .map_err(|e| invalid(format!("{remote}: port '{port}': {e}")))?;
            let label = format!("{remote}:{port}");
            if let Some(previous) = claimed.insert(ofport, label.clone()) {
                return Err(invalid(format!(
                    "{host_name}: {previous} and {label} share trunk {trunk} and node VLAN {node_vlan}"
                )));
            }
        }
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> CoreError {
    CoreError::Config {
        message: message.into(),
    }
}
