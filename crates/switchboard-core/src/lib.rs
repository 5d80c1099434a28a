//! Orchestration layer between a network control plane and physical
//! switches.
//!
//! - **[`Engine`]**: the single entry point. [`connect()`](Engine::connect)
//!   validates an [`EngineConfig`], picks the lock backend and builds one
//!   driver per switch. Network create/delete fans out over a physical
//!   network; port bind/unbind resolves one switch from the link descriptor.
//!
//! - **Drivers** ([`driver`]): templated CLI batches, revision-based REST and
//!   pooled virtual bridges, all behind [`SwitchDriver`].
//!
//! - **Coordination**: [`SessionPool`] bounds concurrent sessions per switch;
//!   [`OperationLock`] serializes mutations across workers through a shared
//!   backend.
//!
//! - **[`Supervisor`]**: bounded retry of transient failures, switch context
//!   on every error, and the [`Compensations`] undo log for multi-step
//!   mutations.

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod lock;
pub mod model;
pub mod router;
pub mod session;
pub mod supervisor;
pub mod template;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{
    CliSettings, CoordinationConfig, DeviceKind, EngineConfig, NvueSettings,
    ProvisioningSettings, RetryPolicy, SwitchConfig, VfcHostSettings, VfcRole, VfcSettings,
};
pub use driver::{DialectKind, SwitchDriver, SwitchportMode};
pub use engine::Engine;
pub use error::{CoreError, DeviceErrorClass};
pub use lock::{LockSettings, OperationLock};
pub use model::{
    AddNetwork, ControllerEndpoint, DeleteNetwork, LocalLinkInfo, MacAddress, NetworkSegment,
    Operation, PlugPort, PortBinding, PortState, SegmentationId, TunnelBinding, UnplugPort,
};
pub use router::{Router, SwitchEntry};
pub use session::{SessionFactory, SessionPool};
pub use supervisor::{Compensations, Supervisor};
pub use template::{CommandTemplate, Params, PayloadTemplate};
