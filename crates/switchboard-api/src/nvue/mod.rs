// Revision-based REST API (NVUE)

mod client;
pub mod models;

pub use client::NvueClient;
pub use models::RevisionState;
