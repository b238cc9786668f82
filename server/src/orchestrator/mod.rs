//! Orchestrator core: client connections, broadcast registry, bus fan-out,
//! session REST and the authenticated `/v1/ws` endpoint.

pub mod connection;
pub mod fanout;
pub mod manager;
pub mod sessions;
pub mod ws;

pub use connection::ClientConnection;
pub use fanout::BusFanout;
pub use manager::ConnectionManager;
pub use sessions::SessionStore;
pub use ws::OrchestratorState;
