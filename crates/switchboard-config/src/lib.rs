//! Configuration for the switchboard engine and CLI.
//!
//! A TOML file (one `[switches.<name>]` table per device) merged with
//! `SWITCHBOARD_` environment overrides, credential resolution (`*_env`
//! indirection first, then plaintext) and translation to
//! `switchboard_core::EngineConfig`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use indexmap::IndexMap;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use switchboard_api::{SshTarget, TlsMode, TransportConfig};
use switchboard_core::{
    CliSettings, ControllerEndpoint, CoordinationConfig, CoreError, DeviceKind, DialectKind,
    EngineConfig, MacAddress, NvueSettings, ProvisioningSettings, RetryPolicy, SegmentationId,
    SwitchConfig, SwitchportMode, VfcHostSettings, VfcRole, VfcSettings,
};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SWITCHBOARD_CONFIG";

const ENV_PREFIX: &str = "SWITCHBOARD_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for switch '{switch}'")]
    NoCredentials { switch: String },

    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error(transparent)]
    Engine(#[from] CoreError),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub coordination: Coordination,

    #[serde(default)]
    pub retry: Retry,

    #[serde(default)]
    pub fanout: Fanout,

    /// Switch inventory, keyed by switch name.
    #[serde(default)]
    pub switches: BTreeMap<String, SwitchEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Coordination {
    /// `redis://host:port/db` or `memory://`. Unset disables locking.
    pub backend_url: Option<String>,
    pub acquire_timeout_secs: u64,
    pub lease_ttl_secs: u64,
}

impl Default for Coordination {
    fn default() -> Self {
        Self {
            backend_url: None,
            acquire_timeout_secs: 60,
            lease_ttl_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Retry {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Fanout {
    pub concurrency: usize,
}

impl Default for Fanout {
    fn default() -> Self {
        Self { concurrency: 2 }
    }
}

/// Vendor family of a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    DellOs9,
    DellPowerconnect,
    DellFnIoa,
    Nvue,
    Vfc,
}

/// One `[switches.<name>]` table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SwitchEntry {
    pub device_type: DeviceType,

    /// Management host name or IP. A full URL is accepted for REST devices.
    pub address: String,

    /// Management port. Defaults per family: 22 (SSH), 8765 (NVUE), 443 (VFC).
    pub port: Option<u16>,

    pub username: Option<String>,

    /// Password (plaintext; prefer `password_env`).
    pub password: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    /// API token (plaintext; prefer `token_env`).
    pub token: Option<String>,

    /// Environment variable holding the API token.
    pub token_env: Option<String>,

    /// SSH private key for CLI devices.
    pub key_file: Option<PathBuf>,

    /// Chassis MAC, used to resolve ports by `switch_id`.
    pub mac_address: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default)]
    pub physical_networks: Vec<String>,

    #[serde(default = "default_true")]
    pub manage_vlans: bool,

    /// Ports tagged with every managed VLAN (CLI devices).
    #[serde(default)]
    pub trunk_ports: Vec<String>,

    /// Skip TLS verification. Never the default.
    #[serde(default)]
    pub insecure: bool,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// How long an operation waits for a free device session.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    #[serde(default)]
    pub cli: CliSection,

    #[serde(default)]
    pub nvue: NvueSection,

    pub vfc: Option<VfcSection>,
}

fn default_max_connections() -> usize {
    1
}
fn default_true() -> bool {
    true
}
fn default_timeout() -> u64 {
    30
}
fn default_session_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CliSection {
    /// `access` or `general` (PowerConnect only).
    pub switchport_mode: SwitchportMode,
    /// Upper bound on one command batch, end to end.
    pub command_timeout_secs: u64,
}

impl Default for CliSection {
    fn default() -> Self {
        Self {
            switchport_mode: SwitchportMode::default(),
            command_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NvueSection {
    pub api_path: String,
    pub bridge_domain: String,
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
}

impl Default for NvueSection {
    fn default() -> Self {
        Self {
            api_path: "/nvue_v1/".into(),
            bridge_domain: "br_default".into(),
            poll_attempts: 30,
            poll_interval_ms: 1000,
        }
    }
}

/// `[switches.<name>.vfc]`: pooled-bridge topology.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VfcSection {
    /// This switch owns the bridge pool.
    pub vfc_host: bool,

    /// Host switch name, for switches that are not hosts.
    pub host: Option<String>,

    pub ofport_stride: u32,

    /// Node VLAN behind each edge port, keyed by port id.
    pub port_vlans: BTreeMap<String, u16>,

    // Host-only settings.
    pub uplink_ports: Vec<u32>,
    pub bridge_capacity: u32,
    pub bridge_type: String,
    pub bridge_resources: u32,
    pub controller_ip: Option<String>,
    pub controller_port: u16,
    pub controller_namespace: Option<String>,
    pub default_vfc_name: String,
    /// Host trunk port facing each remote switch, keyed by switch name.
    pub remote_ports: BTreeMap<String, u32>,
    pub provisioning: Option<ProvisioningSection>,
}

impl Default for VfcSection {
    fn default() -> Self {
        Self {
            vfc_host: false,
            host: None,
            ofport_stride: 100,
            port_vlans: BTreeMap::new(),
            uplink_ports: Vec::new(),
            bridge_capacity: 63,
            bridge_type: "openflow".into(),
            bridge_resources: 5,
            controller_ip: None,
            controller_port: 6653,
            controller_namespace: None,
            default_vfc_name: "VFC".into(),
            remote_ports: BTreeMap::new(),
            provisioning: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvisioningSection {
    pub segmentation_id: u16,
    pub controller_ip: String,
    #[serde(default = "default_controller_port")]
    pub controller_port: u16,
    #[serde(default = "default_bridge_type")]
    pub bridge_type: String,
}

fn default_controller_port() -> u16 {
    6653
}
fn default_bridge_type() -> String {
    "openflow".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("net", "switchboard", "switchboard").map_or_else(
        || PathBuf::from("switchboard.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config from `path` (or the default location) plus environment.
///
/// An explicit path must exist. The default path may be absent, in which
/// case only defaults and environment apply.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(p) if !p.exists() => {
            return Err(ConfigError::NotFound {
                path: p.to_path_buf(),
            });
        }
        Some(p) => p.to_path_buf(),
        None => config_path(),
    };

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

impl Config {
    /// TOML rendering with every plaintext secret masked.
    pub fn to_toml_redacted(&self) -> Result<String, ConfigError> {
        let mut copy = self.clone();
        for entry in copy.switches.values_mut() {
            for secret in [&mut entry.password, &mut entry.token] {
                if secret.is_some() {
                    *secret = Some("********".into());
                }
            }
        }
        Ok(toml::to_string_pretty(&copy)?)
    }

    /// Translate to the engine's runtime config, reading `*_env` secrets
    /// from the process environment.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        self.to_engine_config_with(|name| std::env::var(name).ok())
    }

    /// As [`to_engine_config`](Self::to_engine_config), with an explicit
    /// environment lookup.
    pub fn to_engine_config_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<EngineConfig, ConfigError> {
        if self.fanout.concurrency == 0 {
            return Err(invalid("fanout.concurrency", "must be at least 1"));
        }
        if self.retry.attempts == 0 {
            return Err(invalid("retry.attempts", "must be at least 1"));
        }

        let mut switches = IndexMap::with_capacity(self.switches.len());
        for (name, entry) in &self.switches {
            switches.insert(name.clone(), switch_config(name, entry, &lookup)?);
        }

        let engine = EngineConfig {
            coordination: CoordinationConfig {
                backend_url: self.coordination.backend_url.clone(),
                acquire_timeout: Duration::from_secs(self.coordination.acquire_timeout_secs),
                lease_ttl: Duration::from_secs(self.coordination.lease_ttl_secs),
            },
            retry: RetryPolicy {
                attempts: self.retry.attempts,
                delay: Duration::from_millis(self.retry.delay_ms),
            },
            fanout_concurrency: self.fanout.concurrency,
            switches,
        };
        engine.validate()?;
        Ok(engine)
    }
}

// ── Credential resolution ───────────────────────────────────────────

/// `*_env` indirection first, then plaintext.
fn resolve_secret(
    plain: Option<&String>,
    env_name: Option<&String>,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Option<SecretString> {
    env_name
        .and_then(|name| lookup(name))
        .or_else(|| plain.cloned())
        .map(SecretString::from)
}

// ── Translation ─────────────────────────────────────────────────────

fn switch_config(
    name: &str,
    entry: &SwitchEntry,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<SwitchConfig, ConfigError> {
    if entry.max_connections == 0 {
        return Err(invalid(
            format!("switches.{name}.max_connections"),
            "must be at least 1",
        ));
    }

    let device = match entry.device_type {
        DeviceType::DellOs9 => cli_device(name, entry, DialectKind::DellOs9)?,
        DeviceType::DellPowerconnect => cli_device(
            name,
            entry,
            DialectKind::DellPowerConnect(entry.cli.switchport_mode),
        )?,
        DeviceType::DellFnIoa => cli_device(name, entry, DialectKind::DellFnIoa)?,
        DeviceType::Nvue => nvue_device(name, entry, lookup)?,
        DeviceType::Vfc => vfc_device(name, entry, lookup)?,
    };

    Ok(SwitchConfig {
        name: name.to_owned(),
        address: entry.address.clone(),
        mac_address: entry.mac_address.as_deref().map(MacAddress::new),
        max_connections: entry.max_connections,
        physical_networks: entry.physical_networks.clone(),
        manage_vlans: entry.manage_vlans,
        session_timeout: Duration::from_secs(entry.session_timeout_secs),
        device,
    })
}

fn transport(entry: &SwitchEntry) -> TransportConfig {
    let tls = if entry.insecure {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = entry.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };
    TransportConfig {
        tls,
        timeout: Duration::from_secs(entry.timeout_secs),
    }
}

/// `https://address[:port]path`, or `address` itself when it is a URL.
fn base_url(name: &str, entry: &SwitchEntry, default_port: u16, path: &str) -> Result<Url, ConfigError> {
    let raw = if entry.address.contains("://") {
        entry.address.clone()
    } else {
        format!(
            "https://{}:{}{path}",
            entry.address,
            entry.port.unwrap_or(default_port)
        )
    };
    raw.parse()
        .map_err(|_| invalid(format!("switches.{name}.address"), format!("invalid URL: {raw}")))
}

fn cli_device(name: &str, entry: &SwitchEntry, dialect: DialectKind) -> Result<DeviceKind, ConfigError> {
    let username = entry
        .username
        .clone()
        .ok_or_else(|| ConfigError::NoCredentials {
            switch: name.into(),
        })?;
    let mut ssh = SshTarget::new(entry.address.clone(), username);
    ssh.port = entry.port.unwrap_or(22);
    ssh.key_file.clone_from(&entry.key_file);
    ssh.connect_timeout = Duration::from_secs(entry.timeout_secs);
    ssh.command_timeout = Duration::from_secs(entry.cli.command_timeout_secs.max(1));

    Ok(DeviceKind::Cli(CliSettings {
        dialect,
        ssh,
        trunk_ports: entry.trunk_ports.clone(),
    }))
}

fn nvue_device(
    name: &str,
    entry: &SwitchEntry,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<DeviceKind, ConfigError> {
    let no_credentials = || ConfigError::NoCredentials {
        switch: name.into(),
    };
    let username = entry.username.clone().ok_or_else(no_credentials)?;
    let password = resolve_secret(entry.password.as_ref(), entry.password_env.as_ref(), lookup)
        .ok_or_else(no_credentials)?;
    if entry.nvue.poll_attempts == 0 {
        return Err(invalid(
            format!("switches.{name}.nvue.poll_attempts"),
            "must be at least 1",
        ));
    }

    Ok(DeviceKind::Nvue(NvueSettings {
        base_url: base_url(name, entry, 8765, &entry.nvue.api_path)?,
        username,
        password,
        transport: transport(entry),
        bridge_domain: entry.nvue.bridge_domain.clone(),
        poll_attempts: entry.nvue.poll_attempts,
        poll_interval: Duration::from_millis(entry.nvue.poll_interval_ms),
    }))
}

fn vfc_device(
    name: &str,
    entry: &SwitchEntry,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<DeviceKind, ConfigError> {
    let vfc = entry
        .vfc
        .as_ref()
        .ok_or_else(|| invalid(format!("switches.{name}.vfc"), "section is required for vfc switches"))?;
    let token = resolve_secret(entry.token.as_ref(), entry.token_env.as_ref(), lookup).ok_or_else(
        || ConfigError::NoCredentials {
            switch: name.into(),
        },
    )?;

    for (port, vlan) in &vfc.port_vlans {
        segmentation_id(format!("switches.{name}.vfc.port_vlans.\"{port}\""), *vlan)?;
    }

    let role = if vfc.vfc_host {
        VfcRole::Host(Box::new(host_settings(name, vfc)?))
    } else {
        let host = vfc.host.clone().ok_or_else(|| {
            invalid(
                format!("switches.{name}.vfc.host"),
                "required unless vfc_host = true",
            )
        })?;
        VfcRole::Remote { host }
    };

    Ok(DeviceKind::Vfc(VfcSettings {
        base_url: base_url(name, entry, 443, "/")?,
        token,
        transport: transport(entry),
        port_vlans: vfc.port_vlans.clone(),
        ofport_stride: vfc.ofport_stride,
        role,
    }))
}

fn host_settings(name: &str, vfc: &VfcSection) -> Result<VfcHostSettings, ConfigError> {
    let controller_ip = vfc.controller_ip.clone().ok_or_else(|| {
        invalid(
            format!("switches.{name}.vfc.controller_ip"),
            "required on a VFC host",
        )
    })?;
    let provisioning = vfc
        .provisioning
        .as_ref()
        .map(|p| {
            Ok::<_, ConfigError>(ProvisioningSettings {
                segmentation_id: segmentation_id(
                    format!("switches.{name}.vfc.provisioning.segmentation_id"),
                    p.segmentation_id,
                )?,
                controller: ControllerEndpoint {
                    ip: p.controller_ip.clone(),
                    port: p.controller_port,
                },
                bridge_type: p.bridge_type.clone(),
            })
        })
        .transpose()?;

    Ok(VfcHostSettings {
        uplink_ports: vfc.uplink_ports.clone(),
        bridge_capacity: vfc.bridge_capacity,
        bridge_type: vfc.bridge_type.clone(),
        bridge_resources: vfc.bridge_resources,
        default_controller: ControllerEndpoint {
            ip: controller_ip,
            port: vfc.controller_port,
        },
        controller_namespace: vfc.controller_namespace.clone(),
        default_vfc_name: vfc.default_vfc_name.clone(),
        remote_ports: vfc.remote_ports.clone(),
        provisioning,
    })
}

fn segmentation_id(field: String, value: u16) -> Result<SegmentationId, ConfigError> {
    SegmentationId::new(value).map_err(|e| invalid(field, e.to_string()))
}
