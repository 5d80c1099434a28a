// Pooled-bridge REST client
//
// Thin typed wrapper over the `/api/v1` bridge, tunnel, controller and port
// endpoints. Every call is a single HTTP round trip; lookups that need to
// scan the whole switch (bridge by description, tunnel reclaim) live in
// `switchboard-core`, which owns the locking around them.

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};
use url::Url;

use super::models::{Bridge, LinkIndex, NewBridge, NewController, NewTunnel, PatchOp, Tunnel};
use crate::error::Error;
use crate::transport::{TransportConfig, decode, expect_success, join_segments};

const API_PREFIX: [&str; 2] = ["api", "v1"];

/// HTTP client for one pooled-bridge switch.
#[derive(Debug, Clone)]
pub struct VfcClient {
    http: reqwest::Client,
    base_url: Url,
}

impl VfcClient {
    /// Create a client that sends `token` verbatim in the `Authorization`
    /// header of every request.
    pub fn new(
        base_url: Url,
        token: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        let mut value = HeaderValue::from_str(token.expose_secret()).map_err(|_| {
            Error::Authentication {
                message: "API token contains characters not valid in a header".into(),
            }
        })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);

        let http = transport.build_client_with_headers(headers)?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The switch management base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut all: Vec<&str> = API_PREFIX.to_vec();
        all.extend_from_slice(segments);
        join_segments(&self.base_url, &all)
    }

    // ── Bridges ──────────────────────────────────────────────────────

    /// Names of every bridge currently allocated on the switch.
    pub async fn list_bridges(&self) -> Result<Vec<String>, Error> {
        let url = self.url(&["bridges"])?;
        debug!("GET {url}");
        let resp = self.http.get(url).send().await?;
        let index: LinkIndex = decode(expect_success("list bridges", resp).await?).await?;
        Ok(index.links.into_keys().collect())
    }

    pub async fn get_bridge(&self, bridge: &str) -> Result<Bridge, Error> {
        let url = self.url(&["bridges", bridge])?;
        debug!("GET {url}");
        let resp = self.http.get(url).send().await?;
        decode(expect_success("get bridge", resp).await?).await
    }

    pub async fn create_bridge(&self, bridge: &NewBridge) -> Result<(), Error> {
        let url = self.url(&["bridges"])?;
        debug!("POST {url}");
        let resp = self.http.post(url).json(bridge).send().await?;
        expect_success("create bridge", resp).await?;
        info!(bridge = %bridge.bridge, "bridge created");
        Ok(())
    }

    pub async fn delete_bridge(&self, bridge: &str) -> Result<(), Error> {
        let url = self.url(&["bridges", bridge])?;
        debug!("DELETE {url}");
        let resp = self.http.delete(url).send().await?;
        expect_success("delete bridge", resp).await?;
        info!(bridge, "bridge deleted");
        Ok(())
    }

    pub async fn set_bridge_description(&self, bridge: &str, description: &str) -> Result<(), Error> {
        let url = self.url(&["bridges", bridge])?;
        debug!("PATCH {url}");
        let ops = [PatchOp::replace("/bridge-descr", description)];
        let resp = self.http.patch(url).json(&ops).send().await?;
        expect_success("modify bridge description", resp).await?;
        Ok(())
    }

    // ── Controllers ──────────────────────────────────────────────────

    pub async fn add_controller(&self, bridge: &str, controller: &NewController) -> Result<(), Error> {
        let url = self.url(&["bridges", bridge, "controllers"])?;
        debug!("POST {url}");
        let resp = self.http.post(url).json(controller).send().await?;
        expect_success("add controller", resp).await?;
        info!(
            bridge,
            controller = %controller.controller,
            endpoint = %format!("{}:{}", controller.ip, controller.port),
            "controller attached"
        );
        Ok(())
    }

    // ── Tunnels ──────────────────────────────────────────────────────

    /// Tunnel numbers attached to `bridge`. Keys that are not numeric are
    /// skipped.
    pub async fn list_tunnels(&self, bridge: &str) -> Result<Vec<u32>, Error> {
        let url = self.url(&["bridges", bridge, "tunnels"])?;
        debug!("GET {url}");
        let resp = self.http.get(url).send().await?;
        let index: LinkIndex = decode(expect_success("list tunnels", resp).await?).await?;
        Ok(index
            .links
            .keys()
            .filter_map(|k| k.trim().parse().ok())
            .collect())
    }

    pub async fn get_tunnel(&self, bridge: &str, ofport: u32) -> Result<Tunnel, Error> {
        let ofport = ofport.to_string();
        let url = self.url(&["bridges", bridge, "tunnels", &ofport])?;
        debug!("GET {url}");
        let resp = self.http.get(url).send().await?;
        decode(expect_success("get tunnel", resp).await?).await
    }

    pub async fn attach_tunnel(&self, bridge: &str, tunnel: &NewTunnel) -> Result<(), Error> {
        let url = self.url(&["bridges", bridge, "tunnels"])?;
        debug!("POST {url}");
        let resp = self.http.post(url).json(tunnel).send().await?;
        expect_success("attach tunnel", resp).await?;
        info!(
            bridge,
            ofport = tunnel.ofport,
            port = tunnel.port,
            vlan = ?tunnel.vlan_id,
            "tunnel attached"
        );
        Ok(())
    }

    pub async fn detach_tunnel(&self, bridge: &str, ofport: u32) -> Result<(), Error> {
        let ofport_s = ofport.to_string();
        let url = self.url(&["bridges", bridge, "tunnels", &ofport_s])?;
        debug!("DELETE {url}");
        let resp = self.http.delete(url).send().await?;
        expect_success("detach tunnel", resp).await?;
        info!(bridge, ofport, "tunnel detached");
        Ok(())
    }

    // ── Ports ────────────────────────────────────────────────────────

    /// Switch a physical port's tunnel mode (e.g. `passthrough`, `ctag`).
    pub async fn set_port_tunnel_mode(&self, port: u32, mode: &str) -> Result<(), Error> {
        let port = port.to_string();
        let url = self.url(&["ports", &port])?;
        debug!("PATCH {url}");
        let ops = [PatchOp::replace("/tunnel-mode", mode)];
        let resp = self.http.patch(url).json(&ops).send().await?;
        expect_success("modify port tunnel mode", resp).await?;
        Ok(())
    }
}
