// ── Domain model ──
//
// Identifiers and per-operation parameter objects shared by every driver.
// None of these are persisted; the control plane supplies them per call.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

// ── SegmentationId ──────────────────────────────────────────────────

/// An 802.1Q VLAN tag in the usable range 1..=4094.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct SegmentationId(u16);

impl SegmentationId {
    pub const MIN: u16 = 1;
    pub const MAX: u16 = 4094;

    /// VLAN used when a port is bound without a segmentation id.
    pub const DEFAULT: Self = Self(1);

    pub fn new(value: u16) -> Result<Self, CoreError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::Validation {
                message: format!(
                    "segmentation id {value} outside {}..={}",
                    Self::MIN,
                    Self::MAX
                ),
            })
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for SegmentationId {
    type Error = CoreError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SegmentationId> for u16 {
    fn from(id: SegmentationId) -> Self {
        id.0
    }
}

impl fmt::Display for SegmentationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SegmentationId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u16 = s.trim().parse().map_err(|_| CoreError::Validation {
            message: format!("'{s}' is not a segmentation id"),
        })?;
        Self::new(value)
    }
}

// ── MacAddress ──────────────────────────────────────────────────────

/// MAC address, normalized to lowercase colon-separated format (aa:bb:cc:dd:ee:ff).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(String);

impl MacAddress {
    /// Create a normalized MAC address from any common format.
    /// Accepts colon-separated, dash-separated, or bare hex.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let lowered = raw.as_ref().trim().to_lowercase().replace('-', ":");
        let bare = !lowered.contains(':') && lowered.len() == 12;
        if bare {
            let pairs: Vec<&str> = (0..6).filter_map(|i| lowered.get(i * 2..i * 2 + 2)).collect();
            return Self(pairs.join(":"));
        }
        Self(lowered)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

// ── Segments and bindings ───────────────────────────────────────────

/// A VLAN-backed network as the control plane describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSegment {
    pub segmentation_id: SegmentationId,
    pub network_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl NetworkSegment {
    pub fn new(segmentation_id: SegmentationId, network_id: Uuid) -> Self {
        Self {
            segmentation_id,
            network_id,
            project_id: None,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

/// Physical-link descriptor reported for a bound port.
///
/// `switch_info` is usually the switch name; `switch_id` its chassis MAC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalLinkInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_id: Option<String>,
    pub port_id: String,
}

/// A logical port placed on a physical switch port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub port_id: String,
    pub link: LocalLinkInfo,
    /// Segment to bind to. `None` binds to the default VLAN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation_id: Option<SegmentationId>,
}

impl PortBinding {
    pub fn segmentation_id(&self) -> SegmentationId {
        self.segmentation_id.unwrap_or(SegmentationId::DEFAULT)
    }
}

// ── Operation parameters ────────────────────────────────────────────

/// OpenFlow controller a pooled bridge should connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerEndpoint {
    pub ip: String,
    pub port: u16,
}

impl fmt::Display for ControllerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddNetwork {
    pub segment: NetworkSegment,
    /// Overrides the switch's default controller (pooled-bridge switches).
    pub controller: Option<ControllerEndpoint>,
    /// Named forwarding context to create or extend (pooled-bridge switches).
    pub vfc_name: Option<String>,
}

impl AddNetwork {
    pub fn new(segment: NetworkSegment) -> Self {
        Self {
            segment,
            controller: None,
            vfc_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteNetwork {
    pub segment: NetworkSegment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlugPort {
    pub port: String,
    pub segmentation_id: SegmentationId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnplugPort {
    pub port: String,
    pub segmentation_id: SegmentationId,
}

/// What a switch reports about one physical port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortState {
    pub port: String,
    /// Untagged VLAN, when the device reports a single one.
    pub access_vlan: Option<u16>,
    /// Tunnels bound to the port (pooled-bridge switches).
    pub tunnels: Vec<TunnelBinding>,
    /// Raw device output for operator inspection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelBinding {
    pub bridge: String,
    pub ofport: u32,
    pub vlan_id: Option<u16>,
}

/// The inbound operations, used for logging and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    AddNetwork,
    DeleteNetwork,
    PlugPort,
    UnplugPort,
    QueryPortState,
}
