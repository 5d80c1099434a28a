//! Interactive CLI transport for command-templated switches.
//!
//! A [`CliSession`] accepts an ordered batch of command lines and returns
//! the raw device output. The only built-in implementation is
//! [`SshSession`], which multiplexes every batch over one persistent
//! OpenSSH control connection so the device sees a single login per session.

mod ssh;

use async_trait::async_trait;

use crate::error::Error;

pub use ssh::{SshSession, SshTarget};

/// An authenticated, reusable CLI session to one switch.
#[async_trait]
pub trait CliSession: Send {
    /// Send `commands` in order as one batch and return the combined output.
    async fn execute(&mut self, commands: &[String]) -> Result<String, Error>;

    /// Tear the session down. Called when a session is discarded from its
    /// pool; dropping without calling this is allowed but may leave the
    /// remote side to time out on its own.
    async fn close(&mut self) {}
}
