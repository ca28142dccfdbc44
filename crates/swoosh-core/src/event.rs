//! Progress events broadcast to workflow subscribers.
//!
//! External collaborators describe what happened with a [`ProgressUpdate`];
//! the hub stamps it with an event ID and timestamp to produce the immutable
//! [`ProgressEvent`] that is fanned out and cached for snapshot replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::progress::{self, WorkflowStep};

/// What a collaborator reports about a workflow. Unset fields fall back to
/// the static tables in [`crate::progress`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Step the workflow reached.
    pub step: WorkflowStep,
    /// Message override.
    pub message: Option<String>,
    /// Related on-chain transaction.
    pub tx_hash: Option<String>,
    /// Chain the transaction lives on.
    pub chain_id: Option<u64>,
    /// Time-remaining override, in seconds.
    pub estimated_seconds_remaining: Option<u64>,
}

impl ProgressUpdate {
    /// Update for `step` with table defaults.
    pub fn new(step: WorkflowStep) -> Self {
        Self {
            step,
            message: None,
            tx_hash: None,
            chain_id: None,
            estimated_seconds_remaining: None,
        }
    }

    /// Replace the table message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach a transaction reference.
    #[must_use]
    pub fn with_tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }

    /// Attach the chain the transaction belongs to.
    #[must_use]
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    /// Replace the table time-remaining estimate.
    #[must_use]
    pub fn with_eta(mut self, secs: u64) -> Self {
        self.estimated_seconds_remaining = Some(secs);
        self
    }
}

/// Immutable progress notification for one workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Monotonically assigned per process.
    pub event_id: u64,
    /// Workflow this event describes.
    pub workflow_id: String,
    /// Step reached.
    pub step: WorkflowStep,
    /// 0–100, or [`progress::FAILED_PROGRESS`] for `failed`.
    pub progress: i8,
    /// Human-readable status line.
    pub message: String,
    /// Related transaction hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Chain of `tx_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Estimated seconds until completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_seconds_remaining: Option<u64>,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Build an event from a collaborator update.
    ///
    /// Progress always comes from the step table so the per-workflow
    /// monotonicity invariant cannot be broken by a caller.
    pub fn new(
        event_id: u64,
        workflow_id: impl Into<String>,
        update: ProgressUpdate,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let step = update.step;
        Self {
            event_id,
            workflow_id: workflow_id.into(),
            step,
            progress: progress::progress_percent(step),
            message: update
                .message
                .unwrap_or_else(|| progress::step_message(step).to_owned()),
            tx_hash: update.tx_hash,
            chain_id: update.chain_id,
            estimated_seconds_remaining: Some(
                update
                    .estimated_seconds_remaining
                    .unwrap_or_else(|| progress::estimated_seconds_remaining(step)),
            ),
            timestamp,
        }
    }

    /// Whether this event ends the workflow.
    pub fn is_terminal(&self) -> bool {
        self.step.is_terminal()
    }
}
