//! # swoosh-server
//!
//! Real-time progress relay for cross-chain intent workflows.
//!
//! - `WebSocket` gateway: one connection per subscriber, bound to one workflow
//! - Admission control with global and per-workflow ceilings
//! - Connection registry + workflow subscription index behind a single lock
//! - Progress fan-out with send-then-reap eviction of failed subscribers
//! - Heartbeat monitor evicting unresponsive peers
//! - Snapshot replay for late joiners
//! - HTTP endpoints: health check, Prometheus metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod status;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::{AdmissionError, HubError};
pub use hub::{HubStats, ProgressHub};
pub use server::RelayServer;
pub use status::{NoStatusSource, StatusSource};
