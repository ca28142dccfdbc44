//! # swoosh-core
//!
//! Shared vocabulary for the Swoosh progress relay.
//!
//! - **Progress model**: [`WorkflowStep`] and its static lookup tables
//!   (progress percentage, message, time-remaining estimate)
//! - **Progress events**: [`ProgressEvent`], the immutable value fanned out to subscribers
//! - **Identifiers**: [`ConnectionId`] (UUID v7, unique for the process lifetime)
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod event;
pub mod ids;
pub mod logging;
pub mod progress;

pub use event::{ProgressEvent, ProgressUpdate};
pub use ids::ConnectionId;
pub use progress::{FAILED_PROGRESS, WorkflowStep};
