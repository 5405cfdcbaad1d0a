//! HTTP control plane exposing the registry to agents
pub mod handlers;
pub mod metrics;
pub mod server;

pub use handlers::ApiState;
pub use metrics::RegistryMetrics;
pub use server::serve;
