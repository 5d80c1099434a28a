// ── Bridge description codec ──
//
// Pooled bridges carry their ownership in the free-text description:
//
//     <name>-VLAN-<tag>[-<tag>...]
//
// where `<name>` is the VFC name (usually `<project>-<vfc>`) and each tag is
// a segmentation id placed on the bridge. This module is the only place
// that reads or writes that format. Anything that does not parse cleanly is
// not ours and never matches.

use std::fmt;

use crate::model::SegmentationId;

const MARKER: &str = "-VLAN-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeDescription {
    pub name: String,
    pub vlans: Vec<SegmentationId>,
}

impl BridgeDescription {
    pub fn new(name: impl Into<String>, vlan: SegmentationId) -> Self {
        Self {
            name: name.into(),
            vlans: vec![vlan],
        }
    }

    /// Parse a description, or `None` if it is not in the bridge format.
    pub fn parse(raw: &str) -> Option<Self> {
        let split = raw.to_ascii_uppercase().rfind(MARKER)?;
        let name = raw.get(..split)?.trim();
        let tags = raw.get(split + MARKER.len()..)?;
        if name.is_empty() || tags.is_empty() {
            return None;
        }

        let mut vlans = Vec::new();
        for tag in tags.split('-') {
            let vlan: SegmentationId = tag.parse().ok()?;
            if !vlans.contains(&vlan) {
                vlans.push(vlan);
            }
        }
        Some(Self {
            name: name.to_owned(),
            vlans,
        })
    }

    pub fn contains(&self, vlan: SegmentationId) -> bool {
        self.vlans.contains(&vlan)
    }

    /// More than one segment lives on the bridge.
    pub fn is_shared(&self) -> bool {
        self.vlans.len() > 1
    }

    #[must_use]
    pub fn with_vlan(mut self, vlan: SegmentationId) -> Self {
        if !self.contains(vlan) {
            self.vlans.push(vlan);
        }
        self
    }

    #[must_use]
    pub fn without_vlan(mut self, vlan: SegmentationId) -> Self {
        self.vlans.retain(|v| *v != vlan);
        self
    }
}

impl fmt::Display for BridgeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{MARKER}", self.name)?;
        for (i, vlan) in self.vlans.iter().enumerate() {
            if i > 0 {
                f.write_str("-")?;
            }
            write!(f, "{vlan}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vlan(v: u16) -> SegmentationId {
        SegmentationId::new(v).unwrap()
    }

    #[test]
    fn parses_project_scoped_names() {
        let d = BridgeDescription::parse("proj1-VFC-VLAN-100-200").unwrap();
        assert_eq!(d.name, "proj1-VFC");
        assert_eq!(d.vlans, vec![vlan(100), vlan(200)]);
        assert!(d.is_shared());
    }

    #[test]
    fn marker_is_case_insensitive() {
        let d = BridgeDescription::parse("lab-vlan-7").unwrap();
        assert_eq!(d.name, "lab");
        assert_eq!(d.vlans, vec![vlan(7)]);
    }

    #[test]
    fn names_containing_the_marker_split_on_the_last_one() {
        let d = BridgeDescription::parse("a-VLAN-b-VLAN-12").unwrap();
        assert_eq!(d.name, "a-VLAN-b");
        assert_eq!(d.vlans, vec![vlan(12)]);
    }

    #[test]
    fn malformed_descriptions_do_not_match() {
        for raw in [
            "",
            "VLAN-100",
            "-VLAN-100",
            "proj-VLAN-",
            "proj-VLAN-abc",
            "proj-VLAN-100-",
            "proj-VLAN-0",
            "proj-VLAN-5000",
            "legacy bridge",
        ] {
            assert_eq!(BridgeDescription::parse(raw), None, "{raw:?}");
        }
    }

    #[test]
    fn vlan_edits_render_back() {
        let d = BridgeDescription::new("p-VFC", vlan(100)).with_vlan(vlan(200));
        assert_eq!(d.to_string(), "p-VFC-VLAN-100-200");

        let d = d.without_vlan(vlan(100));
        assert_eq!(d.to_string(), "p-VFC-VLAN-200");
        assert!(!d.is_shared());
    }

    #[test]
    fn rendered_descriptions_parse_to_the_same_value() {
        let d = BridgeDescription::new("x-y-z", vlan(4094)).with_vlan(vlan(1));
        assert_eq!(BridgeDescription::parse(&d.to_string()), Some(d));
    }
}
