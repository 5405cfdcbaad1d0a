//! Built-in service registry for agent processes
//!
//! This library provides:
//! - Registry store holding the live service entries
//! - Expiry window used to find stale entries without a full scan
//! - Cleanup loop evicting entries that stopped heartbeating
//! - Discovery resolver projecting live entries into RPC instances

pub mod cleanup;
pub mod config;
pub mod entry;
pub mod error;
pub mod expiry;
pub mod protocol;
pub mod registry;
pub mod resolver;

pub use cleanup::CleanupHandle;
pub use config::RegistryConfig;
pub use entry::ServiceEntry;
pub use error::{RegistryError, Result};
pub use protocol::Envelope;
pub use registry::Registry;
pub use resolver::{BuiltinResolver, Change, DiscoveryResult, EndpointInfo, Instance, Resolver};
