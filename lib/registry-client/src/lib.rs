//! Agent-side client for the built-in registry
//!
//! Registers an agent over the registry's HTTP control plane, keeps the
//! registration alive with a heartbeat loop and deregisters on shutdown.
pub mod client;
pub mod error;
pub mod heartbeat;
pub mod policy;
pub mod protocol;

pub use client::{RegistrationInfo, RegistryClient};
pub use error::{ClientError, Result};
pub use heartbeat::RegistrationState;
pub use policy::HeartbeatPolicy;
pub use protocol::RegistryApi;
pub use registry_core::resolver::SERVICE_ID_TAG;
