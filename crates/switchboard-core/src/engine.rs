// ── Engine ──
//
// The explicit context object every entry point goes through. Built once
// from an `EngineConfig`: picks the coordination backend, builds one driver
// per switch and routes the inbound operations through the supervisor.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{CoordinationConfig, EngineConfig};
use crate::error::CoreError;
use crate::lock::{LockSettings, MemoryBackend, OperationLock, RedisBackend};
use crate::model::{
    AddNetwork, DeleteNetwork, Operation, PlugPort, PortBinding, PortState, UnplugPort,
};
use crate::router::{Router, SwitchEntry};
use crate::supervisor::Supervisor;

pub struct Engine {
    router: Router,
    supervisor: Supervisor,
    lock: Arc<OperationLock>,
    fanout_concurrency: usize,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("switches", &self.router.len())
            .field("locking", &self.lock.is_enabled())
            .field("fanout_concurrency", &self.fanout_concurrency)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Validate `config`, connect the lock backend and build every driver.
    pub async fn connect(config: &EngineConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let lock = Arc::new(build_lock(&config.coordination).await?);
        let router = Router::from_config(config, &lock)?;
        info!(
            switches = router.len(),
            locking = lock.is_enabled(),
            "engine ready"
        );
        Ok(Self::from_parts(
            router,
            Supervisor::new(config.retry),
            lock,
            config.fanout_concurrency,
        ))
    }

    pub fn from_parts(
        router: Router,
        supervisor: Supervisor,
        lock: Arc<OperationLock>,
        fanout_concurrency: usize,
    ) -> Self {
        Self {
            router,
            supervisor,
            lock,
            fanout_concurrency,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn locking_enabled(&self) -> bool {
        self.lock.is_enabled()
    }

    // ── Networks ─────────────────────────────────────────────────────

    /// Add the segment on every VLAN-managing switch in `physnet`.
    pub async fn create_network(&self, op: &AddNetwork, physnet: &str) -> Result<(), CoreError> {
        let target = format!("segment {}", op.segment.segmentation_id);
        let jobs = self.vlan_switches(physnet, Operation::AddNetwork).map(|entry| {
            let target = target.as_str();
            async move {
                self.supervisor
                    .run(entry.name(), Operation::AddNetwork, target, || {
                        entry.driver.add_network(op)
                    })
                    .await
            }
        });
        self.supervisor
            .fan_out(Operation::AddNetwork, self.fanout_concurrency, jobs)
            .await
    }

    /// Remove the segment from every VLAN-managing switch in `physnet`.
    pub async fn delete_network(&self, op: &DeleteNetwork, physnet: &str) -> Result<(), CoreError> {
        let target = format!("segment {}", op.segment.segmentation_id);
        let jobs = self.vlan_switches(physnet, Operation::DeleteNetwork).map(|entry| {
            let target = target.as_str();
            async move {
                self.supervisor
                    .run(entry.name(), Operation::DeleteNetwork, target, || {
                        entry.driver.delete_network(op)
                    })
                    .await
            }
        });
        self.supervisor
            .fan_out(Operation::DeleteNetwork, self.fanout_concurrency, jobs)
            .await
    }

    fn vlan_switches<'a>(
        &'a self,
        physnet: &'a str,
        operation: Operation,
    ) -> impl Iterator<Item = &'a SwitchEntry> + 'a {
        self.router.devices_for_physnet(physnet).filter(move |entry| {
            if !entry.config.manage_vlans {
                info!(switch = entry.name(), %operation, "switch does not manage VLANs; skipping");
            }
            entry.config.manage_vlans
        })
    }

    // ── Ports ────────────────────────────────────────────────────────

    /// Plug the bound port. Returns the switch used, or `None` when the
    /// link descriptor matches no configured switch.
    pub async fn bind_port(&self, binding: &PortBinding) -> Result<Option<String>, CoreError> {
        let Some(entry) = self.router.resolve(&binding.link) else {
            info!(port_id = %binding.port_id, "link matches no configured switch; not binding");
            return Ok(None);
        };
        let op = PlugPort {
            port: binding.link.port_id.clone(),
            segmentation_id: binding.segmentation_id(),
        };
        let target = format!("port {} / segment {}", op.port, op.segmentation_id);
        self.supervisor
            .run(entry.name(), Operation::PlugPort, &target, || {
                entry.driver.plug_port(&op)
            })
            .await?;
        Ok(Some(entry.name().to_owned()))
    }

    pub async fn unbind_port(&self, binding: &PortBinding) -> Result<Option<String>, CoreError> {
        let Some(entry) = self.router.resolve(&binding.link) else {
            info!(port_id = %binding.port_id, "link matches no configured switch; nothing to unbind");
            return Ok(None);
        };
        let op = UnplugPort {
            port: binding.link.port_id.clone(),
            segmentation_id: binding.segmentation_id(),
        };
        let target = format!("port {} / segment {}", op.port, op.segmentation_id);
        self.supervisor
            .run(entry.name(), Operation::UnplugPort, &target, || {
                entry.driver.unplug_port(&op)
            })
            .await?;
        Ok(Some(entry.name().to_owned()))
    }

    pub async fn port_state(&self, switch: &str, port: &str) -> Result<PortState, CoreError> {
        let entry = self.router.get(switch).ok_or_else(|| CoreError::NotFound {
            what: format!("switch '{switch}'"),
        })?;
        let target = format!("port {port}");
        self.supervisor
            .run(entry.name(), Operation::QueryPortState, &target, || {
                entry.driver.query_port_state(port)
            })
            .await
    }
}

// ── Construction ────────────────────────────────────────────────────

async fn build_lock(config: &CoordinationConfig) -> Result<OperationLock, CoreError> {
    let settings = LockSettings {
        acquire_timeout: config.acquire_timeout,
        lease_ttl: config.lease_ttl,
        ..LockSettings::default()
    };
    match config.backend_url.as_deref() {
        None => {
            warn!("no coordination backend configured; device locking is disabled and only one worker may run");
            Ok(OperationLock::disabled())
        }
        Some(url) if url.starts_with("memory://") => {
            Ok(OperationLock::new(Arc::new(MemoryBackend::new()), settings))
        }
        Some(url) if url.starts_with("redis://") || url.starts_with("rediss://") => {
            let backend = RedisBackend::connect(url).await?;
            Ok(OperationLock::new(Arc::new(backend), settings))
        }
        Some(other) => Err(CoreError::Config {
            message: format!("unsupported coordination backend '{other}'"),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::config::{RetryPolicy, SwitchConfig};
    use crate::config::tests::{vfc_host, vfc_remote};
    use crate::model::{LocalLinkInfo, NetworkSegment, SegmentationId};
    use crate::router::tests::{FakeDriver, entry};

    fn unreachable() -> CoreError {
        CoreError::DeviceUnreachable {
            message: "connection refused".into(),
        }
    }

    fn engine(drivers: &[(SwitchConfig, Arc<FakeDriver>)]) -> Engine {
        let mut router = Router::new();
        for (config, driver) in drivers {
            router.insert(entry(config.clone(), Arc::clone(driver)));
        }
        Engine::from_parts(
            router,
            Supervisor::new(RetryPolicy {
                attempts: 1,
                delay: Duration::from_millis(1),
            }),
            Arc::new(OperationLock::disabled()),
            2,
        )
    }

    fn add(vlan: u16) -> AddNetwork {
        AddNetwork::new(NetworkSegment::new(SegmentationId::new(vlan).unwrap(), Uuid::new_v4()))
    }

    #[tokio::test]
    async fn fan_out_continues_past_failures_and_aggregates() {
        let ok1 = Arc::new(FakeDriver::new("sw1"));
        let bad = Arc::new(FakeDriver {
            fail_with: Some(unreachable),
            ..FakeDriver::new("sw2")
        });
        let ok3 = Arc::new(FakeDriver::new("sw3"));
        let e = engine(&[
            (vfc_host("sw1", &[]), Arc::clone(&ok1)),
            (vfc_host("sw2", &[]), Arc::clone(&bad)),
            (vfc_host("sw3", &[]), Arc::clone(&ok3)),
        ]);

        let err = e.create_network(&add(100), "physnet1").await.unwrap_err();

        for d in [&ok1, &bad, &ok3] {
            assert_eq!(*d.calls.lock().unwrap(), vec!["add 100"]);
        }
        match err {
            CoreError::Aggregate { operation, failures } => {
                assert_eq!(operation, Operation::AddNetwork);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].switch(), Some("sw2"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn switches_without_vlan_management_are_skipped() {
        let managed = Arc::new(FakeDriver::new("sw1"));
        let unmanaged = Arc::new(FakeDriver::new("sw2"));
        let mut sw2 = vfc_host("sw2", &[]);
        sw2.manage_vlans = false;
        let e = engine(&[
            (vfc_host("sw1", &[]), Arc::clone(&managed)),
            (sw2, Arc::clone(&unmanaged)),
        ]);

        let segment = add(5).segment;
        e.delete_network(&DeleteNetwork { segment }, "physnet1")
            .await
            .unwrap();

        assert_eq!(*managed.calls.lock().unwrap(), vec!["delete 5"]);
        assert!(unmanaged.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bind_without_segment_uses_default_vlan() {
        let sw = Arc::new(FakeDriver::new("sw1"));
        let e = engine(&[(vfc_host("sw1", &[]), Arc::clone(&sw))]);
        let binding = PortBinding {
            port_id: "neutron-port".into(),
            link: LocalLinkInfo {
                switch_info: Some("sw1".into()),
                switch_id: None,
                port_id: "p 4".into(),
            },
            segmentation_id: None,
        };

        let used = e.bind_port(&binding).await.unwrap();
        assert_eq!(used.as_deref(), Some("sw1"));
        assert_eq!(*sw.calls.lock().unwrap(), vec!["plug p 4 1"]);
    }

    #[tokio::test]
    async fn unknown_switch_is_not_bound() {
        let e = engine(&[(vfc_host("sw1", &[]), Arc::new(FakeDriver::new("sw1")))]);
        let binding = PortBinding {
            port_id: "neutron-port".into(),
            link: LocalLinkInfo {
                switch_info: Some("elsewhere".into()),
                switch_id: None,
                port_id: "p 4".into(),
            },
            segmentation_id: SegmentationId::new(10).ok(),
        };
        assert_eq!(e.bind_port(&binding).await.unwrap(), None);
        assert_eq!(e.unbind_port(&binding).await.unwrap(), None);
    }

    #[tokio::test]
    async fn failing_plug_carries_switch_and_target() {
        let bad = Arc::new(FakeDriver {
            fail_with: Some(unreachable),
            ..FakeDriver::new("sw1")
        });
        let e = engine(&[(vfc_host("sw1", &[]), bad)]);
        let binding = PortBinding {
            port_id: "x".into(),
            link: LocalLinkInfo {
                switch_info: Some("sw1".into()),
                switch_id: None,
                port_id: "p 9".into(),
            },
            segmentation_id: SegmentationId::new(77).ok(),
        };

        let err = e.bind_port(&binding).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("plug_port on sw1 for port p 9 / segment 77"), "{text}");
    }

    #[tokio::test]
    async fn port_state_for_unknown_switch_is_not_found() {
        let e = engine(&[]);
        assert!(matches!(
            e.port_state("nope", "p 1").await,
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn connect_builds_vfc_topology_with_memory_lock() {
        let config = EngineConfig {
            coordination: CoordinationConfig {
                backend_url: Some("memory://".into()),
                ..CoordinationConfig::default()
            },
            switches: [vfc_host("corsa", &[("edge1", 20)]), vfc_remote("edge1", "corsa")]
                .into_iter()
                .map(|s| (s.name.clone(), s))
                .collect(),
            ..EngineConfig::default()
        };

        let e = Engine::connect(&config).await.unwrap();
        assert!(e.locking_enabled());
        assert_eq!(e.router().len(), 2);
        assert_eq!(e.router().get("edge1").unwrap().driver.name(), "edge1");
    }

    #[tokio::test]
    async fn unsupported_backend_is_a_config_error() {
        let config = EngineConfig {
            coordination: CoordinationConfig {
                backend_url: Some("etcd://localhost".into()),
                ..CoordinationConfig::default()
            },
            ..EngineConfig::default()
        };
        assert!(matches!(
            Engine::connect(&config).await,
            Err(CoreError::Config { .. })
        ));
    }
}
