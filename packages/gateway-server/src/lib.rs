//! Fan-out gateway server: presence directory (C1), connection registry
//! (C2), inter-gateway router (C3), WebSocket connection handler (C4), and
//! the orchestrator that wires them together (C5).

pub mod config;
pub mod network;
pub mod presence;
pub mod router;

pub use config::GatewayConfig;
