// Pooled-bridge REST API (virtual forwarding contexts on a physical switch)

mod client;
pub mod models;

pub use client::VfcClient;
pub use models::{Bridge, NewBridge, NewController, NewTunnel, Tunnel};
