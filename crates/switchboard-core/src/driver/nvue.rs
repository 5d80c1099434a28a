// ── Revision REST driver ──
//
// Every mutation is a revision: create, stage one patch, apply, then poll
// until the switch reports it applied. A change is only durable once the
// poll sees `applied`. Running out of polls leaves the outcome unknown and
// is reported as such.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use switchboard_api::NvueClient;
use switchboard_api::nvue::RevisionState;
use tracing::{debug, info, warn};

use super::{LockScope, SwitchDriver};
use crate::config::{NvueSettings, SwitchConfig};
use crate::error::CoreError;
use crate::model::{AddNetwork, DeleteNetwork, PlugPort, PortState, SegmentationId, UnplugPort};
use crate::session::{ClientFactory, SessionPool};
use crate::template::{Params, PayloadTemplate, RenderedPayload};

const BRIDGE_PATH: &str = "/bridge/domain/{bridge_domain}";
const INTERFACE_PATH: &str = "/interface/{port}/bridge/domain/{bridge_domain}";

/// Bounded wait for a revision to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
struct Payloads {
    add_network: PayloadTemplate,
    delete_network: PayloadTemplate,
    plug_port: PayloadTemplate,
    unplug_port: PayloadTemplate,
}

impl Payloads {
    fn new() -> Self {
        Self {
            add_network: PayloadTemplate::new(
                "add_network",
                BRIDGE_PATH,
                json!({ "vlan": { "{segmentation_id}": {} } }),
            ),
            // Merge-patch semantics: null removes the key.
            delete_network: PayloadTemplate::new(
                "delete_network",
                BRIDGE_PATH,
                json!({ "vlan": { "{segmentation_id}": null } }),
            ),
            plug_port: PayloadTemplate::new(
                "plug_port",
                INTERFACE_PATH,
                json!({ "access": "{segmentation_id}" }),
            ),
            unplug_port: PayloadTemplate::new("unplug_port", INTERFACE_PATH, json!({ "access": null })),
        }
    }
}

#[derive(Debug)]
pub struct NvueDriver {
    name: String,
    pool: SessionPool<ClientFactory<NvueClient>>,
    lock: LockScope,
    bridge_domain: String,
    poll: PollPolicy,
    payloads: Payloads,
}

impl NvueDriver {
    pub fn new(
        switch: &SwitchConfig,
        client: NvueClient,
        bridge_domain: impl Into<String>,
        poll: PollPolicy,
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
            lock,
            bridge_domain: bridge_domain.into(),
            poll,
            payloads: Payloads::new(),
        }
    }

    pub fn from_config(
        switch: &SwitchConfig,
        settings: &NvueSettings,
        lock: LockScope,
    ) -> Result<Self, CoreError> {
        let client = NvueClient::new(
            settings.base_url.clone(),
            settings.username.clone(),
            settings.password.clone(),
            &settings.transport,
        )?;
        let poll = PollPolicy {
            attempts: settings.poll_attempts.max(1),
            interval: settings.poll_interval,
        };
        Ok(Self::new(switch, client, settings.bridge_domain.clone(), poll, lock))
    }

    fn params(&self) -> Params {
        Params::new().with("bridge_domain", &self.bridge_domain)
    }

    /// Create, stage, apply and confirm one revision.
    async fn commit(&self, payload: RenderedPayload) -> Result<(), CoreError> {
        let mut client = self.pool.acquire().await?;

        let staged = async {
            let revision = client.create_revision().await?;
            client.patch(&revision, &payload.path, &payload.body).await?;
            Ok::<_, switchboard_api::Error>(revision)
        }
        .await;

        let revision = match staged {
            Ok(revision) => revision,
            Err(e) => {
                client.discard_if(&e);
                return Err(e.into());
            }
        };

        // From here on the device may have taken the change, so no failure
        // may be retried with a fresh revision.
        let lost = |e: &switchboard_api::Error| CoreError::RevisionStateUnknown {
            revision: revision.clone(),
            message: e.to_string(),
        };
        if let Err(e) = client.apply_revision(&revision).await {
            client.discard_if(&e);
            return Err(if e.is_unreachable() || e.is_transient() {
                lost(&e)
            } else {
                e.into()
            });
        }
        debug!(switch = %self.name, %revision, path = %payload.path, "revision submitted");

        for attempt in 1..=self.poll.attempts {
            let state = match client.revision_state(&revision).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(switch = %self.name, %revision, error = %e, "revision state unreadable after apply");
                    client.discard_if(&e);
                    return Err(lost(&e));
                }
            };
            if state == RevisionState::Applied {
                info!(switch = %self.name, %revision, "revision applied");
                return Ok(());
            }
            if state.is_failed() {
                return Err(CoreError::Device {
                    message: format!("revision {revision} ended in state {state}"),
                    status: None,
                });
            }
            debug!(switch = %self.name, %revision, %state, attempt, "revision not applied yet");
            if attempt < self.poll.attempts {
                tokio::time::sleep(self.poll.interval).await;
            }
        }

        Err(CoreError::RevisionApplyTimeout {
            revision,
            attempts: self.poll.attempts,
        })
    }

    /// Access VLAN currently configured on `port`, if any.
    async fn access_vlan(&self, port: &str) -> Result<(Option<u16>, Value), CoreError> {
        let path = self
            .payloads
            .plug_port
            .render(&self.params().with("port", port).with("segmentation_id", 1))?
            .path;
        let client = self.pool.acquire().await?;
        match client.get(&path).await {
            Ok(value) => {
                let vlan = value
                    .get("access")
                    .and_then(Value::as_u64)
                    .and_then(|v| u16::try_from(v).ok());
                Ok((vlan, value))
            }
            Err(e) if e.is_not_found() => Ok((None, Value::Null)),
            Err(e) => Err(e.into()),
        }
    }

    fn render_vlan(
        &self,
        template: &PayloadTemplate,
        vlan: SegmentationId,
    ) -> Result<RenderedPayload, CoreError> {
        template.render(&self.params().with("segmentation_id", vlan))
    }
}

#[async_trait]
impl SwitchDriver for NvueDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add_network(&self, op: &AddNetwork) -> Result<(), CoreError> {
        let payload = self.render_vlan(&self.payloads.add_network, op.segment.segmentation_id)?;
        self.lock.run(move || self.commit(payload)).await
    }

    async fn delete_network(&self, op: &DeleteNetwork) -> Result<(), CoreError> {
        let payload = self.render_vlan(&self.payloads.delete_network, op.segment.segmentation_id)?;
        self.lock.run(move || self.commit(payload)).await
    }

    async fn plug_port(&self, op: &PlugPort) -> Result<(), CoreError> {
        let payload = self.payloads.plug_port.render(
            &self
                .params()
                .with("port", &op.port)
                .with("segmentation_id", op.segmentation_id),
        )?;
        self.lock
            .run(move || async move {
                let (current, _) = self.access_vlan(&op.port).await?;
                if current == Some(op.segmentation_id.get()) {
                    info!(switch = %self.name, port = %op.port, segmentation_id = %op.segmentation_id, "port already on segment");
                    return Ok(());
                }
                self.commit(payload).await
            })
            .await
    }

    async fn unplug_port(&self, op: &UnplugPort) -> Result<(), CoreError> {
        let payload = self.payloads.unplug_port.render(
            &self
                .params()
                .with("port", &op.port)
                .with("segmentation_id", op.segmentation_id),
        )?;
        self.lock
            .run(move || async move {
                let (current, _) = self.access_vlan(&op.port).await?;
                if current != Some(op.segmentation_id.get()) {
                    info!(switch = %self.name, port = %op.port, segmentation_id = %op.segmentation_id, "port not on segment; nothing to unplug");
                    return Ok(());
                }
                self.commit(payload).await
            })
            .await
    }

    async fn query_port_state(&self, port: &str) -> Result<PortState, CoreError> {
        let (access_vlan, raw) = self.access_vlan(port).await?;
        Ok(PortState {
            port: port.to_owned(),
            access_vlan,
            tunnels: Vec::new(),
            raw: (!raw.is_null()).then(|| raw.to_string()),
        })
    }
}
