//! Vendor drivers.
//!
//! Every switch is driven through a [`SwitchDriver`] trait object chosen
//! from its configured [`DeviceKind`](crate::config::DeviceKind) at startup:
//!
//! - [`CliDriver`]: templated command batches over a pooled CLI session
//! - [`NvueDriver`]: revision-based REST (create, patch, apply, poll)
//! - [`VfcDriver`]: pooled virtual bridges with tunnel attachments
//!
//! Drivers raise [`CoreError`]s without switch context. The
//! [`Supervisor`](crate::supervisor::Supervisor) adds it.

pub mod cli;
pub mod description;
pub mod dialect;
pub mod numbering;
pub mod nvue;
pub mod vfc;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::lock::OperationLock;
use crate::model::{AddNetwork, DeleteNetwork, PlugPort, PortState, UnplugPort};

pub use cli::{CliDriver, SshFactory};
pub use dialect::{CliDialect, DialectKind, SwitchportMode};
pub use nvue::NvueDriver;
pub use vfc::{VfcDriver, VfcHost};

/// The capability set every vendor family implements.
///
/// Each call either fully applies or returns an error. Calls that find the
/// device already in the requested state succeed without mutating it.
#[async_trait]
pub trait SwitchDriver: Send + Sync + fmt::Debug {
    /// Configured switch name.
    fn name(&self) -> &str;

    async fn add_network(&self, op: &AddNetwork) -> Result<(), CoreError>;

    async fn delete_network(&self, op: &DeleteNetwork) -> Result<(), CoreError>;

    async fn plug_port(&self, op: &PlugPort) -> Result<(), CoreError>;

    async fn unplug_port(&self, op: &UnplugPort) -> Result<(), CoreError>;

    /// Read-only view of one physical port.
    async fn query_port_state(&self, port: &str) -> Result<PortState, CoreError>;
}

/// The lock slots a driver serializes its mutations on.
#[derive(Debug, Clone)]
pub struct LockScope {
    lock: Arc<OperationLock>,
    namespace: String,
    slots: usize,
}

impl LockScope {
    pub fn new(lock: Arc<OperationLock>, namespace: impl Into<String>, slots: usize) -> Self {
        Self {
            lock,
            namespace: namespace.into(),
            slots,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// The same namespace narrowed to a single slot.
    pub fn exclusive(self) -> Self {
        Self { slots: 1, ..self }
    }

    /// Run `op` while holding one of this scope's slots.
    pub async fn run<T, Fut>(&self, op: impl FnOnce() -> Fut) -> Result<T, CoreError>
    where
        Fut: Future<Output = Result<T, CoreError>>,
    {
        self.lock.with_lock(&self.namespace, self.slots, op).await
    }
}
