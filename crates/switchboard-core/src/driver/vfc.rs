// ── Pooled-bridge driver ──
//
// One switch in a VFC topology is the host: it owns a fixed pool of bridges
// (`br1..=brN`). A network is a bridge whose description lists its
// segments; uplinks join it as C-tag tunnels. Ports on the host join as
// passthrough tunnels. Ports on remote switches join as C-tag tunnels on
// the host trunk facing that switch, tagged with the port's node VLAN.
//
// Every lookup re-reads the bridges from the device. All mutations for a
// topology serialize on a single slot of the host's lock, whichever switch
// they came from, since bridge descriptions are rewritten read-modify-write.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use switchboard_api::VfcClient;
use switchboard_api::vfc::{NewBridge, NewController, NewTunnel};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::description::BridgeDescription;
use super::numbering::{TunnelNumbering, port_number};
use super::{LockScope, SwitchDriver};
use crate::config::{SwitchConfig, VfcHostSettings, VfcSettings};
use crate::error::CoreError;
use crate::model::{
    AddNetwork, DeleteNetwork, PlugPort, PortState, SegmentationId, TunnelBinding, UnplugPort,
};
use crate::session::{ClientFactory, PooledSession, SessionPool};
use crate::supervisor::Compensations;

const BRIDGE_PREFIX: &str = "br";
const PASSTHROUGH: &str = "passthrough";

/// A bridge found by scanning descriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundBridge {
    pub bridge: String,
    pub description: BridgeDescription,
}

/// The switch that owns the bridges of a VFC topology.
#[derive(Debug)]
pub struct VfcHost {
    name: String,
    pool: SessionPool<ClientFactory<VfcClient>>,
    lock: LockScope,
    /// Orders mutations from tasks of this process before they reach `lock`.
    serial: Mutex<()>,
    numbering: TunnelNumbering,
    settings: VfcHostSettings,
}

impl VfcHost {
    /// `lock` is narrowed to one slot whatever its configured pool size.
    pub fn new(
        switch: &SwitchConfig,
        client: VfcClient,
        numbering: TunnelNumbering,
        settings: VfcHostSettings,
        lock: LockScope,
    ) -> Self {
        Self {
            name: switch.name.clone(),
            pool: SessionPool::new(
                switch.name.clone(),
                ClientFactory(client),
                switch.max_connections,
                switch.session_timeout,
            ),
            lock: lock.exclusive(),
            serial: Mutex::new(()),
            numbering,
            settings,
        }
    }

    pub fn from_config(
        switch: &SwitchConfig,
        vfc: &VfcSettings,
        settings: &VfcHostSettings,
        lock: LockScope,
    ) -> Result<Self, CoreError> {
        let client = connect(vfc)?;
        Ok(Self::new(
            switch,
            client,
            TunnelNumbering::new(vfc.ofport_stride),
            settings.clone(),
            lock,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn numbering(&self) -> TunnelNumbering {
        self.numbering
    }

    pub fn settings(&self) -> &VfcHostSettings {
        &self.settings
    }

    pub fn lock_scope(&self) -> &LockScope {
        &self.lock
    }

    async fn client(&self) -> Result<PooledSession<'_, ClientFactory<VfcClient>>, CoreError> {
        self.pool.acquire().await
    }

    /// Run a bridge or tunnel mutation with the topology to itself.
    async fn exclusive<T, Fut>(&self, op: impl FnOnce() -> Fut) -> Result<T, CoreError>
    where
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let _serial = self.serial.lock().await;
        self.lock.run(op).await
    }

    // ── Lookups ──────────────────────────────────────────────────────

    /// Bridges whose description parses, in device order.
    async fn managed_bridges(&self, client: &VfcClient) -> Result<Vec<FoundBridge>, CoreError> {
        let mut found = Vec::new();
        for bridge in client.list_bridges().await? {
            let info = match client.get_bridge(&bridge).await {
                Ok(info) => info,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            let Some(description) = info.description.as_deref().and_then(BridgeDescription::parse)
            else {
                debug!(switch = %self.name, %bridge, "skipping bridge without a managed description");
                continue;
            };
            found.push(FoundBridge {
                bridge,
                description,
            });
        }
        Ok(found)
    }

    pub async fn find_bridge_by_segment(
        &self,
        client: &VfcClient,
        vlan: SegmentationId,
    ) -> Result<Option<FoundBridge>, CoreError> {
        Ok(self
            .managed_bridges(client)
            .await?
            .into_iter()
            .find(|b| b.description.contains(vlan)))
    }

    pub async fn find_bridge_by_name(
        &self,
        client: &VfcClient,
        name: &str,
    ) -> Result<Option<FoundBridge>, CoreError> {
        Ok(self
            .managed_bridges(client)
            .await?
            .into_iter()
            .find(|b| b.description.name == name))
    }

    /// Lowest pool slot not currently in use.
    pub async fn free_bridge(&self, client: &VfcClient) -> Result<(u32, String), CoreError> {
        let used = client.list_bridges().await?;
        (1..=self.settings.bridge_capacity)
            .map(|n| (n, format!("{BRIDGE_PREFIX}{n}")))
            .find(|(_, name)| !used.contains(name))
            .ok_or(CoreError::BridgePoolExhausted {
                capacity: self.settings.bridge_capacity,
            })
    }

    async fn require_bridge(
        &self,
        client: &VfcClient,
        vlan: SegmentationId,
    ) -> Result<FoundBridge, CoreError> {
        self.find_bridge_by_segment(client, vlan)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                what: format!("bridge for segment {vlan}"),
            })
    }

    // ── Tunnels ──────────────────────────────────────────────────────

    /// Attach, and on a 403 reclaim conflicting tunnels and try once more.
    async fn attach_with_reclaim(
        &self,
        client: &VfcClient,
        bridge: &str,
        tunnel: &NewTunnel,
    ) -> Result<(), CoreError> {
        match client.attach_tunnel(bridge, tunnel).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_forbidden() => {
                warn!(
                    switch = %self.name,
                    bridge,
                    ofport = tunnel.ofport,
                    port = tunnel.port,
                    error = %e,
                    "tunnel attach refused; reclaiming"
                );
                match self.reclaim(client, bridge, tunnel).await {
                    Ok(n) => info!(switch = %self.name, reclaimed = n, "conflicting tunnels detached"),
                    Err(re) => warn!(switch = %self.name, error = %re, "tunnel reclaim failed"),
                }
                client.attach_tunnel(bridge, tunnel).await.map_err(Into::into)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Detach every tunnel on the switch that holds what `tunnel` needs:
    /// the same number or the same physical port (and VLAN, for C-tag
    /// tunnels), on any bridge.
    pub async fn reclaim(
        &self,
        client: &VfcClient,
        target_bridge: &str,
        tunnel: &NewTunnel,
    ) -> Result<usize, CoreError> {
        let mut reclaimed = 0;
        for bridge in client.list_bridges().await? {
            for ofport in client.list_tunnels(&bridge).await? {
                let existing = match client.get_tunnel(&bridge, ofport).await {
                    Ok(t) => t,
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e.into()),
                };
                let same_number = ofport == tunnel.ofport;
                let same_port = existing.port == tunnel.port
                    && (tunnel.vlan_id.is_none() || existing.vlan_id == tunnel.vlan_id);
                if !(same_number || same_port) {
                    continue;
                }
                detach_idempotent(client, &bridge, ofport).await?;
                info!(switch = %self.name, %bridge, target = target_bridge, ofport, port = existing.port, "reclaimed tunnel");
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    /// Attach `tunnel` to the bridge carrying `vlan`, unless it is already
    /// there.
    async fn bind(
        &self,
        vlan: SegmentationId,
        tunnel: NewTunnel,
        passthrough_port: Option<u32>,
    ) -> Result<(), CoreError> {
        let client = self.client().await?;
        let found = self.require_bridge(&client, vlan).await?;

        match client.get_tunnel(&found.bridge, tunnel.ofport).await {
            Ok(existing) if existing.port == tunnel.port && existing.vlan_id == tunnel.vlan_id => {
                info!(switch = %self.name, bridge = %found.bridge, ofport = tunnel.ofport, "tunnel already attached");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(port) = passthrough_port {
            client.set_port_tunnel_mode(port, PASSTHROUGH).await?;
        }
        self.attach_with_reclaim(&client, &found.bridge, &tunnel).await
    }

    async fn unbind(&self, vlan: SegmentationId, ofport: u32) -> Result<(), CoreError> {
        let client = self.client().await?;
        let Some(found) = self.find_bridge_by_segment(&client, vlan).await? else {
            info!(switch = %self.name, segmentation_id = %vlan, "no bridge for segment; nothing to unplug");
            return Ok(());
        };
        detach_idempotent(&client, &found.bridge, ofport).await
    }

    /// Tunnels bound to `port` (and `vlan`, when given) across all bridges.
    async fn tunnels_on(&self, port: u32, vlan: Option<u16>) -> Result<Vec<TunnelBinding>, CoreError> {
        let client = self.client().await?;
        let mut out = Vec::new();
        for bridge in client.list_bridges().await? {
            for ofport in client.list_tunnels(&bridge).await? {
                let t = match client.get_tunnel(&bridge, ofport).await {
                    Ok(t) => t,
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e.into()),
                };
                if t.port == port && (vlan.is_none() || t.vlan_id == vlan) {
                    out.push(TunnelBinding {
                        bridge: bridge.clone(),
                        ofport: t.ofport,
                        vlan_id: t.vlan_id,
                    });
                }
            }
        }
        Ok(out)
    }

    // ── Networks ─────────────────────────────────────────────────────

    fn uplink_tunnels(&self, vlan: SegmentationId) -> Result<Vec<NewTunnel>, CoreError> {
        self.settings
            .uplink_ports
            .iter()
            .map(|&port| {
                Ok(NewTunnel {
                    ofport: self.numbering.ofport(vlan, port)?,
                    port,
                    vlan_id: Some(vlan.get()),
                    ifdescr: None,
                })
            })
            .collect()
    }

    fn vfc_name(&self, op: &AddNetwork) -> String {
        match (&op.vfc_name, &op.segment.project_id) {
            (Some(name), _) => name.clone(),
            (None, Some(project)) => format!("{project}-{}", self.settings.default_vfc_name),
            (None, None) => self.settings.default_vfc_name.clone(),
        }
    }

    async fn add_network_locked(&self, op: &AddNetwork) -> Result<(), CoreError> {
        let vlan = op.segment.segmentation_id;
        let client = self.client().await?;

        if let Some(found) = self.find_bridge_by_segment(&client, vlan).await? {
            info!(switch = %self.name, bridge = %found.bridge, segmentation_id = %vlan, "segment already has a bridge");
            return Ok(());
        }

        let name = self.vfc_name(op);
        if op.vfc_name.is_some() {
            if let Some(found) = self.find_bridge_by_name(&client, &name).await? {
                return self.extend_bridge(&client, found, vlan).await;
            }
        }
        self.create_bridge(&client, op, &name).await
    }

    async fn create_bridge(&self, client: &VfcClient, op: &AddNetwork, name: &str) -> Result<(), CoreError> {
        let vlan = op.segment.segmentation_id;
        let (number, bridge) = self.free_bridge(client).await?;

        let provisioning = self
            .settings
            .provisioning
            .as_ref()
            .filter(|p| p.segmentation_id == vlan);
        let controller = match (provisioning, &op.controller) {
            (Some(p), _) => p.controller.clone(),
            (None, Some(c)) => c.clone(),
            (None, None) => self.settings.default_controller.clone(),
        };
        let subtype = provisioning.map_or(&self.settings.bridge_type, |p| &p.bridge_type);
        let namespace = op
            .controller
            .as_ref()
            .and(self.settings.controller_namespace.clone());

        client
            .create_bridge(&NewBridge {
                bridge: bridge.clone(),
                subtype: subtype.clone(),
                resources: self.settings.bridge_resources,
                description: BridgeDescription::new(name, vlan).to_string(),
                namespace,
            })
            .await?;
        info!(switch = %self.name, %bridge, segmentation_id = %vlan, %controller, "bridge allocated");

        let mut undo = Compensations::new();
        {
            let client = client.clone();
            let bridge = bridge.clone();
            undo.push("delete bridge", async move {
                delete_idempotent(&client, &bridge).await
            });
        }

        let outcome = async {
            client
                .add_controller(
                    &bridge,
                    &NewController {
                        controller: format!("CONT{number}"),
                        ip: controller.ip.clone(),
                        port: controller.port,
                        tls: false,
                    },
                )
                .await?;
            for tunnel in self.uplink_tunnels(vlan)? {
                self.attach_with_reclaim(client, &bridge, &tunnel).await?;
            }
            Ok::<(), CoreError>(())
        }
        .await;

        undo.settle(&self.name, outcome).await
    }

    /// Add `vlan` to a bridge that already carries another segment.
    async fn extend_bridge(
        &self,
        client: &VfcClient,
        found: FoundBridge,
        vlan: SegmentationId,
    ) -> Result<(), CoreError> {
        let previous = found.description.to_string();
        let updated = found.description.with_vlan(vlan).to_string();
        let bridge = found.bridge;

        client.set_bridge_description(&bridge, &updated).await?;
        info!(switch = %self.name, %bridge, segmentation_id = %vlan, "segment added to shared bridge");

        let mut undo = Compensations::new();
        {
            let client = client.clone();
            let bridge = bridge.clone();
            undo.push("restore bridge description", async move {
                client
                    .set_bridge_description(&bridge, &previous)
                    .await
                    .map_err(Into::into)
            });
        }

        let mut outcome = Ok(());
        for tunnel in self.uplink_tunnels(vlan)? {
            if let Err(e) = self.attach_with_reclaim(client, &bridge, &tunnel).await {
                outcome = Err(e);
                break;
            }
            let client = client.clone();
            let bridge = bridge.clone();
            undo.push("detach uplink tunnel", async move {
                detach_idempotent(&client, &bridge, tunnel.ofport).await
            });
        }

        undo.settle(&self.name, outcome).await
    }

    async fn delete_network_locked(&self, op: &DeleteNetwork) -> Result<(), CoreError> {
        let vlan = op.segment.segmentation_id;
        let client = self.client().await?;

        let Some(found) = self.find_bridge_by_segment(&client, vlan).await? else {
            info!(switch = %self.name, segmentation_id = %vlan, "no bridge for segment; nothing to delete");
            return Ok(());
        };

        if found.description.is_shared() {
            for tunnel in self.uplink_tunnels(vlan)? {
                detach_idempotent(&client, &found.bridge, tunnel.ofport).await?;
            }
            let remaining = found.description.without_vlan(vlan).to_string();
            client.set_bridge_description(&found.bridge, &remaining).await?;
            info!(switch = %self.name, bridge = %found.bridge, segmentation_id = %vlan, "segment removed from shared bridge");
        } else {
            delete_idempotent(&client, &found.bridge).await?;
        }
        Ok(())
    }
}

fn connect(vfc: &VfcSettings) -> Result<VfcClient, CoreError> {
    Ok(VfcClient::new(vfc.base_url.clone(), &vfc.token, &vfc.transport)?)
}

async fn detach_idempotent(client: &VfcClient, bridge: &str, ofport: u32) -> Result<(), CoreError> {
    match client.detach_tunnel(bridge, ofport).await {
        Err(e) if e.is_not_found() => {
            debug!(bridge, ofport, "tunnel already detached");
            Ok(())
        }
        other => other.map_err(Into::into),
    }
}

async fn delete_idempotent(client: &VfcClient, bridge: &str) -> Result<(), CoreError> {
    match client.delete_bridge(bridge).await {
        Err(e) if e.is_not_found() => {
            debug!(bridge, "bridge already deleted");
            Ok(())
        }
        other => other.map_err(Into::into),
    }
}

// ── Driver ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// Ports are physical ports of the host itself.
    Host,
    /// Ports reach the host over `trunk_port`, one node VLAN each.
    Remote { trunk_port: u32 },
}

#[derive(Debug)]
pub struct VfcDriver {
    name: String,
    host: Arc<VfcHost>,
    placement: Placement,
    port_vlans: BTreeMap<String, u16>,
}

impl VfcDriver {
    /// Driver for the host switch itself.
    pub fn host(host: Arc<VfcHost>, port_vlans: BTreeMap<String, u16>) -> Self {
        Self {
            name: host.name.clone(),
            host,
            placement: Placement::Host,
            port_vlans,
        }
    }

    /// Driver for a switch whose ports are tunnelled to `host`.
    pub fn remote(
        name: impl Into<String>,
        host: Arc<VfcHost>,
        port_vlans: BTreeMap<String, u16>,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        let trunk_port = *host
            .settings
            .remote_ports
            .get(&name)
            .ok_or_else(|| CoreError::Config {
                message: format!("VFC host '{}' has no trunk port toward '{name}'", host.name),
            })?;
        Ok(Self {
            name,
            host,
            placement: Placement::Remote { trunk_port },
            port_vlans,
        })
    }

    pub fn is_host(&self) -> bool {
        self.placement == Placement::Host
    }

    fn node_vlan(&self, port: &str) -> Result<u16, CoreError> {
        self.port_vlans
            .get(port)
            .copied()
            .ok_or_else(|| CoreError::Validation {
                message: format!("no node VLAN configured for port '{port}' on {}", self.name),
            })
    }

    /// The tunnel `port` on `vlan` maps to, and the physical port to put
    /// in passthrough mode first (host ports only).
    fn tunnel_for(&self, port: &str, vlan: SegmentationId) -> Result<(NewTunnel, Option<u32>), CoreError> {
        let numbering = self.host.numbering;
        Ok(match self.placement {
            Placement::Host => {
                let number = port_number(port)?;
                (
                    NewTunnel {
                        ofport: numbering.ofport(vlan, number)?,
                        port: number,
                        vlan_id: None,
                        ifdescr: Some(port.to_owned()),
                    },
                    Some(number),
                )
            }
            Placement::Remote { trunk_port } => {
                let node_vlan = self.node_vlan(port)?;
                (
                    NewTunnel {
                        ofport: numbering.remote_ofport(trunk_port, node_vlan)?,
                        port: trunk_port,
                        vlan_id: Some(node_vlan),
                        ifdescr: Some(format!("{}:{port}", self.name)),
                    },
                    None,
                )
            }
        })
    }
}

#[async_trait]
impl SwitchDriver for VfcDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add_network(&self, op: &AddNetwork) -> Result<(), CoreError> {
        if !self.is_host() {
            debug!(switch = %self.name, "not a VFC host; skipping add_network");
            return Ok(());
        }
        let host = &self.host;
        host.exclusive(move || host.add_network_locked(op)).await
    }

    async fn delete_network(&self, op: &DeleteNetwork) -> Result<(), CoreError> {
        if !self.is_host() {
            debug!(switch = %self.name, "not a VFC host; skipping delete_network");
            return Ok(());
        }
        let host = &self.host;
        host.exclusive(move || host.delete_network_locked(op)).await
    }

    async fn plug_port(&self, op: &PlugPort) -> Result<(), CoreError> {
        let (tunnel, passthrough) = self.tunnel_for(&op.port, op.segmentation_id)?;
        let ofport = tunnel.ofport;
        let host = &self.host;
        host.exclusive(move || host.bind(op.segmentation_id, tunnel, passthrough))
            .await?;
        info!(switch = %self.name, port = %op.port, segmentation_id = %op.segmentation_id, ofport, "port plugged");
        Ok(())
    }

    async fn unplug_port(&self, op: &UnplugPort) -> Result<(), CoreError> {
        let (tunnel, _) = self.tunnel_for(&op.port, op.segmentation_id)?;
        let host = &self.host;
        host.exclusive(move || host.unbind(op.segmentation_id, tunnel.ofport))
            .await?;
        info!(switch = %self.name, port = %op.port, segmentation_id = %op.segmentation_id, "port unplugged");
        Ok(())
    }

    async fn query_port_state(&self, port: &str) -> Result<PortState, CoreError> {
        let tunnels = match self.placement {
            Placement::Host => self.host.tunnels_on(port_number(port)?, None).await?,
            Placement::Remote { trunk_port, .. } => {
                self.host
                    .tunnels_on(trunk_port, Some(self.node_vlan(port)?))
                    .await?
            }
        };
        Ok(PortState {
            port: port.to_owned(),
            access_vlan: None,
            tunnels,
            raw: None,
        })
    }
}
