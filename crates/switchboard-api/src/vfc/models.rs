// Wire types for the pooled-bridge (virtual forwarding context) REST API.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// `{ "links": { "<key>": { "href": ..., ... } } }` index returned by
/// collection endpoints. Keys are bridge names or tunnel numbers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkIndex {
    #[serde(default)]
    pub links: BTreeMap<String, Link>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub href: Option<String>,
}

/// A bridge as reported by `GET /api/v1/bridges/{bridge}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Bridge {
    pub bridge: String,
    #[serde(rename = "bridge-descr", default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub resources: Option<u32>,
}

/// A tunnel as reported by `GET /api/v1/bridges/{bridge}/tunnels/{ofport}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Tunnel {
    #[serde(deserialize_with = "lenient_u32")]
    pub ofport: u32,
    #[serde(deserialize_with = "lenient_u32")]
    pub port: u32,
    #[serde(rename = "vlan-id", default)]
    pub vlan_id: Option<u16>,
    #[serde(default)]
    pub ifdescr: Option<String>,
}

/// `POST /api/v1/bridges` body.
#[derive(Debug, Clone, Serialize)]
pub struct NewBridge {
    pub bridge: String,
    pub subtype: String,
    pub resources: u32,
    #[serde(rename = "bridge-descr")]
    pub description: String,
    #[serde(rename = "netns", skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// `POST /api/v1/bridges/{bridge}/controllers` body.
#[derive(Debug, Clone, Serialize)]
pub struct NewController {
    pub controller: String,
    pub ip: String,
    pub port: u16,
    pub tls: bool,
}

/// `POST /api/v1/bridges/{bridge}/tunnels` body.
///
/// With `vlan_id` set this is a C-tag tunnel on a trunk port; without it
/// the whole physical port is attached in passthrough mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTunnel {
    pub ofport: u32,
    pub port: u32,
    #[serde(rename = "vlan-id", skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ifdescr: Option<String>,
}

/// One RFC 6902 operation, as accepted by the PATCH endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PatchOp<'a> {
    pub op: &'static str,
    pub path: &'static str,
    pub value: &'a str,
}

impl<'a> PatchOp<'a> {
    pub fn replace(path: &'static str, value: &'a str) -> Self {
        Self {
            op: "replace",
            path,
            value,
        }
    }
}

/// Some firmware reports port numbers as strings, some as integers.
fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
