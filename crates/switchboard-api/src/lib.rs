// switchboard-api: transports for managed switches (SSH CLI, pooled-bridge REST, revision REST)

pub mod cli;
pub mod error;
pub mod nvue;
pub mod transport;
pub mod vfc;

pub use cli::{CliSession, SshSession, SshTarget};
pub use error::Error;
pub use nvue::NvueClient;
pub use transport::{TlsMode, TransportConfig};
pub use vfc::VfcClient;
