// ── Tunnel numbering ──
//
// Tunnels on a pooled bridge are addressed by a logical port number
// (`ofport`). It is computed, never allocated, so unplug can recompute the
// number from the same inputs. Two disjoint ranges:
//
//     host port:    segmentation_id * stride + physical_port
//     remote port:  remote_base + trunk_port * 4096 + node_vlan
//
// `physical_port` must stay below the stride, so the host range ends below
// `remote_base = (SegmentationId::MAX + 1) * stride`. A remote number only
// depends on the host trunk and the node VLAN behind it, which together
// identify one port on one edge switch.

use crate::error::CoreError;
use crate::model::SegmentationId;

pub const DEFAULT_STRIDE: u32 = 100;

/// Node VLANs per trunk in the remote range.
const NODE_VLAN_SPAN: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelNumbering {
    stride: u32,
}

impl Default for TunnelNumbering {
    fn default() -> Self {
        Self {
            stride: DEFAULT_STRIDE,
        }
    }
}

impl TunnelNumbering {
    pub fn new(stride: u32) -> Self {
        Self {
            stride: stride.max(1),
        }
    }

    pub fn stride(self) -> u32 {
        self.stride
    }

    /// Tunnel number of a host port or uplink on `segmentation_id`.
    pub fn ofport(self, segmentation_id: SegmentationId, port: u32) -> Result<u32, CoreError> {
        if port >= self.stride {
            return Err(CoreError::Validation {
                message: format!("port {port} does not fit tunnel stride {}", self.stride),
            });
        }
        u32::from(segmentation_id.get())
            .checked_mul(self.stride)
            .and_then(|base| base.checked_add(port))
            .ok_or_else(|| CoreError::Validation {
                message: format!("tunnel number overflows for segment {segmentation_id}"),
            })
    }

    /// First number above every host port number.
    pub fn remote_base(self) -> Result<u32, CoreError> {
        (u32::from(SegmentationId::MAX) + 1)
            .checked_mul(self.stride)
            .ok_or_else(|| CoreError::Validation {
                message: format!("tunnel stride {} leaves no remote range", self.stride),
            })
    }

    /// Tunnel number of a node port reached over `trunk_port` with `node_vlan`.
    pub fn remote_ofport(self, trunk_port: u32, node_vlan: u16) -> Result<u32, CoreError> {
        let node_vlan = u32::from(node_vlan);
        if node_vlan >= NODE_VLAN_SPAN {
            return Err(CoreError::Validation {
                message: format!("node VLAN {node_vlan} is out of range"),
            });
        }
        self.remote_base()?
            .checked_add(trunk_port.checked_mul(NODE_VLAN_SPAN).ok_or_else(|| {
                CoreError::Validation {
                    message: format!("trunk port {trunk_port} overflows the remote range"),
                }
            })?)
            .and_then(|n| n.checked_add(node_vlan))
            .ok_or_else(|| CoreError::Validation {
                message: format!(
                    "remote tunnel number overflows for trunk {trunk_port} VLAN {node_vlan}"
                ),
            })
    }
}

/// Physical port number from a port id such as `p 12`, `P12` or `12`.
pub fn port_number(port_id: &str) -> Result<u32, CoreError> {
    let trimmed = port_id.trim();
    let digits_at = trimmed
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);

    digits_at
        .and_then(|i| trimmed.get(i..))
        .and_then(|d| d.parse().ok())
        .ok_or_else(|| CoreError::Validation {
            message: format!("port id '{port_id}' does not end in a port number"),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn seg(v: u16) -> SegmentationId {
        SegmentationId::new(v).unwrap()
    }

    #[test]
    fn same_inputs_give_same_number() {
        let n = TunnelNumbering::default();
        let a = n.ofport(seg(300), 12).unwrap();
        let b = n.ofport(seg(300), 12).unwrap();
        assert_eq!(a, 30_012);
        assert_eq!(a, b);
        assert!(n.ofport(seg(300), DEFAULT_STRIDE).is_err());
    }

    #[test]
    fn distinct_ports_and_segments_never_collide() {
        let n = TunnelNumbering::default();
        let mut seen = std::collections::HashSet::new();
        for s in [1_u16, 2, 99, 100, 4094] {
            for p in 0..DEFAULT_STRIDE {
                assert!(seen.insert(n.ofport(seg(s), p).unwrap()));
            }
        }
    }

    #[test]
    fn remote_numbers_sit_above_every_host_number() {
        let n = TunnelNumbering::default();
        let highest_host = n.ofport(seg(SegmentationId::MAX), DEFAULT_STRIDE - 1).unwrap();
        let lowest_remote = n.remote_ofport(0, 0).unwrap();
        assert_eq!(lowest_remote, 409_500);
        assert!(highest_host < lowest_remote);
    }

    #[test]
    fn remote_numbers_differ_per_trunk_and_node_vlan() {
        let n = TunnelNumbering::default();
        // Same node VLAN behind two different edge switches.
        assert_ne!(n.remote_ofport(20, 300).unwrap(), n.remote_ofport(21, 300).unwrap());
        // Two node ports behind the same edge switch.
        assert_ne!(n.remote_ofport(20, 300).unwrap(), n.remote_ofport(20, 301).unwrap());
        assert_eq!(n.remote_ofport(20, 1203).unwrap(), 409_500 + 20 * 4096 + 1203);
    }

    #[test]
    fn remote_numbers_reject_overflow() {
        let n = TunnelNumbering::new(2_000_000);
        assert!(n.remote_ofport(0, 1).is_err());
        assert!(TunnelNumbering::default().remote_ofport(u32::MAX / 4096, 1).is_err());
        assert!(TunnelNumbering::default().remote_ofport(1, 4096).is_err());
    }

    #[test]
    fn port_numbers_are_read_from_the_tail() {
        assert_eq!(port_number("p 12").unwrap(), 12);
        assert_eq!(port_number("P7").unwrap(), 7);
        assert_eq!(port_number("31").unwrap(), 31);
        assert!(port_number("uplink").is_err());
        assert!(port_number("").is_err());
    }
}
