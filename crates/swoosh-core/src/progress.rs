//! Workflow step state machine and its static lookup tables.
//!
//! A cross-chain intent walks the canonical order
//! `pending → validating → validated → routing → executing → swapping →
//! bridging → bridge_pending → bridge_completed → settling → completed`.
//! `failed` is reachable from any non-terminal step. `completed` and `failed`
//! are terminal.
//!
//! Percentages increase and time-remaining estimates decrease along the
//! canonical order. `failed` maps to [`FAILED_PROGRESS`] so clients can tell an
//! error apart from partial progress.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Progress value reported for the terminal failure state.
pub const FAILED_PROGRESS: i8 = -1;

/// One step of a tracked workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    /// Intent accepted, nothing started yet.
    Pending,
    /// Intent parameters are being checked.
    Validating,
    /// Intent passed validation.
    Validated,
    /// Searching for the cheapest route.
    Routing,
    /// Route execution started on the source chain.
    Executing,
    /// Token swap in flight.
    Swapping,
    /// Bridge transfer submitted.
    Bridging,
    /// Waiting for the bridge to deliver on the destination chain.
    BridgePending,
    /// Bridge delivery confirmed.
    BridgeCompleted,
    /// Final settlement on the destination chain.
    Settling,
    /// Workflow finished successfully.
    Completed,
    /// Workflow aborted.
    Failed,
}

impl WorkflowStep {
    /// Every non-failure step in canonical order.
    pub const CANONICAL_ORDER: [Self; 11] = [
        Self::Pending,
        Self::Validating,
        Self::Validated,
        Self::Routing,
        Self::Executing,
        Self::Swapping,
        Self::Bridging,
        Self::BridgePending,
        Self::BridgeCompleted,
        Self::Settling,
        Self::Completed,
    ];

    /// Wire name of the step.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validating => "validating",
            Self::Validated => "validated",
            Self::Routing => "routing",
            Self::Executing => "executing",
            Self::Swapping => "swapping",
            Self::Bridging => "bridging",
            Self::BridgePending => "bridge_pending",
            Self::BridgeCompleted => "bridge_completed",
            Self::Settling => "settling",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no transition may leave this step.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of `step` in the canonical order, `None` for `failed`.
pub fn canonical_rank(step: WorkflowStep) -> Option<usize> {
    WorkflowStep::CANONICAL_ORDER
        .iter()
        .position(|s| *s == step)
}

/// Fixed progress percentage for a step.
pub fn progress_percent(step: WorkflowStep) -> i8 {
    match step {
        WorkflowStep::Pending => 0,
        WorkflowStep::Validating => 10,
        WorkflowStep::Validated => 20,
        WorkflowStep::Routing => 30,
        WorkflowStep::Executing => 40,
        WorkflowStep::Swapping => 50,
        WorkflowStep::Bridging => 60,
        WorkflowStep::BridgePending => 70,
        WorkflowStep::BridgeCompleted => 85,
        WorkflowStep::Settling => 95,
        WorkflowStep::Completed => 100,
        WorkflowStep::Failed => FAILED_PROGRESS,
    }
}

/// Fixed human-readable message for a step.
pub fn step_message(step: WorkflowStep) -> &'static str {
    match step {
        WorkflowStep::Pending => "Intent received, waiting to start",
        WorkflowStep::Validating => "Validating intent parameters",
        WorkflowStep::Validated => "Intent validated",
        WorkflowStep::Routing => "Finding the best route",
        WorkflowStep::Executing => "Executing route on source chain",
        WorkflowStep::Swapping => "Swapping tokens",
        WorkflowStep::Bridging => "Submitting bridge transfer",
        WorkflowStep::BridgePending => "Waiting for bridge confirmation",
        WorkflowStep::BridgeCompleted => "Bridge transfer confirmed",
        WorkflowStep::Settling => "Settling on destination chain",
        WorkflowStep::Completed => "Intent completed",
        WorkflowStep::Failed => "Intent failed",
    }
}

/// Fixed estimate of seconds left once a workflow reaches `step`.
pub fn estimated_seconds_remaining(step: WorkflowStep) -> u64 {
    match step {
        WorkflowStep::Pending => 300,
        WorkflowStep::Validating => 280,
        WorkflowStep::Validated => 260,
        WorkflowStep::Routing => 240,
        WorkflowStep::Executing => 200,
        WorkflowStep::Swapping => 180,
        WorkflowStep::Bridging => 150,
        WorkflowStep::BridgePending => 120,
        WorkflowStep::BridgeCompleted => 30,
        WorkflowStep::Settling => 15,
        WorkflowStep::Completed | WorkflowStep::Failed => 0,
    }
}

/// Whether a workflow currently at `from` may report `to` next.
///
/// Terminal steps accept nothing. `failed` is accepted from any other step.
/// Otherwise the step must not move backwards; repeating a step is allowed.
pub fn can_transition(from: WorkflowStep, to: WorkflowStep) -> bool {
    if from.is_terminal() {
        return false;
    }
    match (canonical_rank(from), canonical_rank(to)) {
        (_, None) => true,
        (Some(a), Some(b)) => b >= a,
        (None, Some(_)) => false,
    }
}
