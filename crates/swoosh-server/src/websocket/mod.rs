//! WebSocket connection management, admission, heartbeat, message dispatch, and fan-out.

pub mod admission;
pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod messages;
pub mod registry;
pub mod session;
pub mod transport;
