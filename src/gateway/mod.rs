//! Gateway server implementation

pub mod auth;
mod router;
mod server;
pub mod upstream;

pub use auth::{ResourceGate, resource_gate};
pub use router::{AppState, DiscoveryDocument, create_router};
pub use server::Gateway;
pub use upstream::Upstream;
