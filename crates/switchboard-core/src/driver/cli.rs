// ── CLI-templated driver ──
//
// Renders dialect templates into command batches and runs them over a
// pooled CLI session. Output is scanned for the dialect's error patterns
// even when the transport reports success, since switches print errors
// and keep going.

use async_trait::async_trait;
use switchboard_api::{CliSession, SshSession, SshTarget};
use tracing::{debug, info};

use super::dialect::CliDialect;
use super::{LockScope, SwitchDriver};
use crate::error::CoreError;
use crate::model::{AddNetwork, DeleteNetwork, PlugPort, PortState, SegmentationId, UnplugPort};
use crate::session::{SessionFactory, SessionPool};
use crate::template::Params;

/// Opens SSH control-master sessions.
#[derive(Debug, Clone)]
pub struct SshFactory {
    target: SshTarget,
}

impl SshFactory {
    pub fn new(target: SshTarget) -> Self {
        Self { target }
    }
}

#[async_trait]
impl SessionFactory for SshFactory {
    type Session = SshSession;

    async fn connect(&self) -> Result<SshSession, CoreError> {
        self.target.connect().await.map_err(|e| match e {
            switchboard_api::Error::Authentication { message } => {
                CoreError::Authentication { message }
            }
            other => CoreError::DeviceUnreachable {
                message: other.to_string(),
            },
        })
    }
}

/// Where a port stands relative to the segment it should be plugged into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlugDecision {
    AlreadyCorrect,
    CleanPort,
    ConflictingVlan(u16),
}

pub struct CliDriver<F: SessionFactory> {
    name: String,
    dialect: CliDialect,
    pool: SessionPool<F>,
    lock: LockScope,
    trunk_ports: Vec<String>,
}

impl<F: SessionFactory> std::fmt::Debug for CliDriver<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliDriver")
            .field("name", &self.name)
            .field("dialect", &self.dialect.kind)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl<F> CliDriver<F>
where
    F: SessionFactory,
    F::Session: CliSession,
{
    pub fn new(
        name: impl Into<String>,
        dialect: CliDialect,
        pool: SessionPool<F>,
        lock: LockScope,
        trunk_ports: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            dialect,
            pool,
            lock,
            trunk_ports,
        }
    }

    pub fn pool(&self) -> &SessionPool<F> {
        &self.pool
    }

    /// Run one batch and classify the result.
    async fn execute(&self, commands: &[String]) -> Result<String, CoreError> {
        let mut session = self.pool.acquire().await?;
        debug!(switch = %self.name, lines = commands.len(), "executing command batch");
        match session.execute(commands).await {
            Ok(output) => match self.dialect.classify(&output) {
                Some(class) => Err(CoreError::CommandRejected { class, output }),
                None => Ok(output),
            },
            Err(e) => {
                session.discard_if(&e);
                Err(self.translate(e))
            }
        }
    }

    fn translate(&self, err: switchboard_api::Error) -> CoreError {
        match err {
            switchboard_api::Error::CommandFailed { output, .. } => {
                match self.dialect.classify(&output) {
                    Some(class) => CoreError::CommandRejected { class, output },
                    None => CoreError::Device {
                        message: output,
                        status: None,
                    },
                }
            }
            other => other.into(),
        }
    }

    /// Run commands inside configuration mode.
    async fn configure(&self, commands: Vec<String>) -> Result<(), CoreError> {
        self.execute(&self.dialect.wrap_config(commands)).await?;
        Ok(())
    }

    /// Compare the port's current untagged VLAN with `target`.
    pub async fn decide(&self, port: &str, target: SegmentationId) -> Result<PlugDecision, CoreError> {
        let Some(query) = &self.dialect.query_port else {
            return Ok(PlugDecision::CleanPort);
        };
        let output = self
            .execute(&query.render(&Params::new().with("port", port))?)
            .await?;

        Ok(match self.dialect.parse_vlan(&output) {
            Some(current) if current == target.get() => PlugDecision::AlreadyCorrect,
            Some(current) if current == SegmentationId::DEFAULT.get() => PlugDecision::CleanPort,
            Some(current) => PlugDecision::ConflictingVlan(current),
            None => PlugDecision::CleanPort,
        })
    }

    fn plug_commands(
        &self,
        port: &str,
        target: SegmentationId,
        decision: PlugDecision,
    ) -> Result<Vec<String>, CoreError> {
        let params = Params::new()
            .with("port", port)
            .with("segmentation_id", target);
        match (decision, &self.dialect.delete_and_plug) {
            (PlugDecision::ConflictingVlan(wrong), Some(combined)) => {
                combined.render(&params.with("wrong_segmentation_id", wrong))
            }
            _ => self.dialect.plug_port.render(&params),
        }
    }
}

#[async_trait]
impl<F> SwitchDriver for CliDriver<F>
where
    F: SessionFactory,
    F::Session: CliSession,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn add_network(&self, op: &AddNetwork) -> Result<(), CoreError> {
        let vlan = op.segment.segmentation_id;
        let mut commands = self.dialect.add_network.render(
            &Params::new()
                .with("segmentation_id", vlan)
                .with("network_name", op.segment.network_id.simple()),
        )?;
        if let Some(trunk) = &self.dialect.add_to_trunk {
            for port in &self.trunk_ports {
                commands.extend(
                    trunk.render(&Params::new().with("port", port).with("segmentation_id", vlan))?,
                );
            }
        }

        self.lock.run(move || self.configure(commands)).await?;
        info!(switch = %self.name, segmentation_id = %vlan, "network added");
        Ok(())
    }

    async fn delete_network(&self, op: &DeleteNetwork) -> Result<(), CoreError> {
        let vlan = op.segment.segmentation_id;
        let mut commands = Vec::new();
        if let Some(trunk) = &self.dialect.remove_from_trunk {
            for port in &self.trunk_ports {
                commands.extend(
                    trunk.render(&Params::new().with("port", port).with("segmentation_id", vlan))?,
                );
            }
        }
        commands.extend(
            self.dialect
                .delete_network
                .render(&Params::new().with("segmentation_id", vlan))?,
        );

        self.lock.run(move || self.configure(commands)).await?;
        info!(switch = %self.name, segmentation_id = %vlan, "network deleted");
        Ok(())
    }

    async fn plug_port(&self, op: &PlugPort) -> Result<(), CoreError> {
        self.lock
            .run(move || async move {
                let decision = self.decide(&op.port, op.segmentation_id).await?;
                if decision == PlugDecision::AlreadyCorrect {
                    info!(switch = %self.name, port = %op.port, segmentation_id = %op.segmentation_id, "port already on segment");
                    return Ok(());
                }
                let commands = self.plug_commands(&op.port, op.segmentation_id, decision)?;
                self.configure(commands).await?;
                info!(
                    switch = %self.name,
                    port = %op.port,
                    segmentation_id = %op.segmentation_id,
                    ?decision,
                    "port plugged"
                );
                Ok(())
            })
            .await
    }

    async fn unplug_port(&self, op: &UnplugPort) -> Result<(), CoreError> {
        let commands = self.dialect.delete_port.render(
            &Params::new()
                .with("port", &op.port)
                .with("segmentation_id", op.segmentation_id),
        )?;
        self.lock.run(move || self.configure(commands)).await?;
        info!(switch = %self.name, port = %op.port, segmentation_id = %op.segmentation_id, "port unplugged");
        Ok(())
    }

    async fn query_port_state(&self, port: &str) -> Result<PortState, CoreError> {
        let output = self
            .execute(&self.dialect.show_port.render(&Params::new().with("port", port))?)
            .await?;
        Ok(PortState {
            port: port.to_owned(),
            access_vlan: self.dialect.parse_vlan(&output),
            tunnels: Vec::new(),
            raw: Some(output),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    use super::*;
    use crate::driver::dialect::{DialectKind, SwitchportMode};
    use crate::error::DeviceErrorClass;
    use crate::lock::OperationLock;
    use crate::model::NetworkSegment;

    type Reply = Result<String, switchboard_api::Error>;

    /// Records every batch and answers from a script; unscripted batches
    /// succeed with empty output.
    #[derive(Default, Clone)]
    struct Script {
        batches: Arc<Mutex<Vec<Vec<String>>>>,
        replies: Arc<Mutex<VecDeque<Reply>>>,
        opened: Arc<AtomicUsize>,
    }

    impl Script {
        fn reply(&self, reply: Reply) -> &Self {
            self.replies.lock().unwrap().push_back(reply);
            self
        }

        fn batches(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().clone()
        }
    }

    struct ScriptedSession(Script);

    #[async_trait]
    impl CliSession for ScriptedSession {
        async fn execute(&mut self, commands: &[String]) -> Result<String, switchboard_api::Error> {
            self.0.batches.lock().unwrap().push(commands.to_vec());
            self.0
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    #[async_trait]
    impl SessionFactory for Script {
        type Session = ScriptedSession;

        async fn connect(&self) -> Result<ScriptedSession, CoreError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedSession(self.clone()))
        }
    }

    fn driver(kind: DialectKind, trunks: &[&str]) -> (CliDriver<Script>, Script) {
        let script = Script::default();
        let pool = SessionPool::new("leaf1", script.clone(), 2, Duration::from_secs(5));
        let lock = LockScope::new(Arc::new(OperationLock::disabled()), "10.0.0.1", 2);
        let driver = CliDriver::new(
            "leaf1",
            CliDialect::new(kind).unwrap(),
            pool,
            lock,
            trunks.iter().map(|t| (*t).to_owned()).collect(),
        );
        (driver, script)
    }

    fn plug(port: &str, vlan: u16) -> PlugPort {
        PlugPort {
            port: port.into(),
            segmentation_id: SegmentationId::new(vlan).unwrap(),
        }
    }

    #[tokio::test]
    async fn plug_on_correct_vlan_only_queries() {
        let (driver, script) = driver(DialectKind::DellOs9, &[]);
        script.reply(Ok("U      60\n".into()));

        driver.plug_port(&plug("Te 0/1", 60)).await.unwrap();

        let batches = script.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec!["show interfaces switchport Te 0/1 | grep ^U"]);
    }

    #[tokio::test]
    async fn plug_from_conflicting_vlan_is_one_combined_batch() {
        let (driver, script) = driver(DialectKind::DellOs9, &[]);
        script.reply(Ok("U      50\n".into()));

        driver.plug_port(&plug("Te 0/1", 60)).await.unwrap();

        let batches = script.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(
            batches[1],
            vec![
                "configure terminal",
                "interface vlan 50",
                "no untagged Te 0/1",
                "interface vlan 60",
                "untagged Te 0/1",
                "exit",
                "end",
            ]
        );
    }

    #[tokio::test]
    async fn plug_on_default_vlan_applies_directly() {
        let (driver, script) = driver(DialectKind::DellOs9, &[]);
        script.reply(Ok("U      1\n".into()));

        driver.plug_port(&plug("Te 0/2", 70)).await.unwrap();

        let batches = script.batches();
        assert_eq!(batches.len(), 2);
        assert!(batches[1].contains(&"untagged Te 0/2".to_owned()));
        assert!(!batches[1].iter().any(|c| c.starts_with("no ")));
    }

    #[tokio::test]
    async fn dialect_without_query_plugs_directly() {
        let (driver, script) =
            driver(DialectKind::DellPowerConnect(SwitchportMode::Access), &[]);

        driver.plug_port(&plug("gi1/0/5", 80)).await.unwrap();

        let batches = script.batches();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].contains(&"switchport access vlan 80".to_owned()));
    }

    #[tokio::test]
    async fn locked_config_db_output_is_classified() {
        let (driver, script) =
            driver(DialectKind::DellPowerConnect(SwitchportMode::Access), &[]);
        script.reply(Ok(
            "Configuration Database locked by another application - try later".into(),
        ));

        let err = driver.plug_port(&plug("gi1/0/5", 80)).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::CommandRejected {
                class: DeviceErrorClass::LockedConfigDb,
                ..
            }
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unmatched_command_failure_is_a_device_error() {
        let (driver, script) = driver(DialectKind::DellFnIoa, &[]);
        script.reply(Err(switchboard_api::Error::CommandFailed {
            host: "leaf1".into(),
            exit_code: 1,
            output: "% Error: unexpected".into(),
        }));

        let err = driver.plug_port(&plug("Te 0/3", 10)).await.unwrap_err();
        assert!(matches!(err, CoreError::Device { status: None, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn broken_session_is_not_reused() {
        let (driver, script) = driver(DialectKind::DellFnIoa, &[]);
        script.reply(Err(switchboard_api::Error::Session {
            host: "leaf1".into(),
            message: "Connection reset by peer".into(),
        }));

        let err = driver.plug_port(&plug("Te 0/3", 10)).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(driver.pool().idle_count(), 0);

        driver.plug_port(&plug("Te 0/3", 10)).await.unwrap();
        assert_eq!(script.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn add_network_tags_trunk_ports() {
        let (driver, script) = driver(DialectKind::DellOs9, &["Po 1"]);
        let network_id = Uuid::nil();
        let segment = NetworkSegment::new(SegmentationId::new(100).unwrap(), network_id);

        driver.add_network(&AddNetwork::new(segment)).await.unwrap();

        let batches = script.batches();
        assert_eq!(
            batches[0],
            vec![
                "configure terminal",
                "interface vlan 100",
                "name 00000000000000000000000000000000",
                "exit",
                "interface vlan 100",
                "tagged Po 1",
                "exit",
                "end",
            ]
        );
    }

    #[tokio::test]
    async fn delete_network_untags_trunks_first() {
        let (driver, script) = driver(DialectKind::DellOs9, &["Po 1"]);
        let segment = NetworkSegment::new(SegmentationId::new(100).unwrap(), Uuid::nil());

        driver
            .delete_network(&DeleteNetwork { segment })
            .await
            .unwrap();

        let batch = &script.batches()[0];
        let untag = batch.iter().position(|c| c == "no tagged Po 1").unwrap();
        let remove = batch.iter().position(|c| c == "no interface vlan 100").unwrap();
        assert!(untag < remove);
    }

    #[tokio::test]
    async fn port_state_reports_access_vlan() {
        let (driver, script) = driver(DialectKind::DellOs9, &[]);
        script.reply(Ok("Name: TenGigabitEthernet 0/1\nU      300\n".into()));

        let state = driver.query_port_state("Te 0/1").await.unwrap();
        assert_eq!(state.access_vlan, Some(300));
        assert!(state.raw.unwrap().contains("TenGigabitEthernet"));
    }
}
