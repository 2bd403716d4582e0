//! HTTP and WebSocket handler definitions for the gateway server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod health;
pub mod websocket;

pub use health::{health_detail_handler, health_handler, liveness_handler, readiness_handler, stats_handler};
pub use websocket::{ws_upgrade_handler, LocalDeliverer};

use std::sync::Arc;
use std::time::Instant;

use gateway_core::GatewayParams;

use super::{ConnectionRegistry, NetworkConfig, ShutdownController};
use crate::presence::PresenceDirectory;
use crate::router::Router as RouterTransport;

/// Shared application state passed to all axum handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    /// This instance's gateway id (spec §3 `gatewayId`).
    pub gateway_id: Arc<str>,
    /// Per-instance `userId ⇄ Connection` index (C2).
    pub registry: Arc<ConnectionRegistry>,
    /// Cluster-wide presence directory (C1).
    pub presence: Arc<dyn PresenceDirectory>,
    /// Inter-gateway router (C3).
    pub router: Arc<dyn RouterTransport>,
    /// Heartbeat/TTL/sweep timing parameters (spec §6).
    pub params: GatewayParams,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Network configuration (bind address, TLS, per-connection settings).
    pub config: Arc<NetworkConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
