//! Error types for admission and progress emission.

use swoosh_core::WorkflowStep;
use thiserror::Error;

use crate::websocket::transport::CloseCode;

/// Why a new connection was refused.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The global live-connection ceiling is reached.
    #[error("server is at capacity ({limit} connections)")]
    CapacityGlobal {
        /// Configured ceiling.
        limit: usize,
    },
    /// The per-workflow ceiling is reached.
    #[error("workflow {workflow_id} is at capacity ({limit} subscribers)")]
    CapacityWorkflow {
        /// Target workflow.
        workflow_id: String,
        /// Configured ceiling.
        limit: usize,
    },
    /// Graceful shutdown has started.
    #[error("server is shutting down")]
    ShutdownInProgress,
}

impl AdmissionError {
    /// Stable rejection reason sent to the client.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::CapacityGlobal { .. } => "CAPACITY_GLOBAL",
            Self::CapacityWorkflow { .. } => "CAPACITY_WORKFLOW",
            Self::ShutdownInProgress => "SHUTDOWN_IN_PROGRESS",
        }
    }

    /// Close code for the rejected socket.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::CapacityGlobal { .. } | Self::CapacityWorkflow { .. } => {
                CloseCode::CapacityExceeded
            }
            Self::ShutdownInProgress => CloseCode::ServerShutdown,
        }
    }
}

/// Why a progress event was not emitted.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HubError {
    /// The event would move the workflow backwards.
    #[error("workflow {workflow_id} cannot move from {from} back to {to}")]
    StepRegression {
        /// Workflow.
        workflow_id: String,
        /// Last emitted step.
        from: WorkflowStep,
        /// Rejected step.
        to: WorkflowStep,
    },
    /// The workflow already reached `completed` or `failed`.
    #[error("workflow {workflow_id} already ended in {step}")]
    WorkflowTerminal {
        /// Workflow.
        workflow_id: String,
        /// Terminal step.
        step: WorkflowStep,
    },
    /// Graceful shutdown has started.
    #[error("server is shutting down")]
    ShutdownInProgress,
}
