//! Wire protocol: JSON text frames with a `type` discriminator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use swoosh_core::{ConnectionId, ProgressEvent};
use thiserror::Error;

/// Messages a client may send.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Application-level liveness check, answered with `pong`.
    Ping,
    /// Re-confirm the current subscription.
    Subscribe {
        /// Must match the connection's workflow when present.
        #[serde(default)]
        workflow_id: Option<String>,
    },
    /// Leave; the connection is closed after the ack.
    Unsubscribe,
}

/// Messages the server sends.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Admission acknowledgement.
    Connected {
        /// Assigned connection ID.
        connection_id: ConnectionId,
        /// Workflow being watched.
        workflow_id: String,
        /// Server clock at admission.
        server_time: DateTime<Utc>,
    },
    /// Subscription confirmed.
    Subscribed {
        /// Workflow being watched.
        workflow_id: String,
    },
    /// Subscription dropped.
    Unsubscribed {
        /// Workflow that was watched.
        workflow_id: String,
    },
    /// A progress event.
    Update {
        /// The event.
        data: ProgressEvent,
    },
    /// Something went wrong; may precede a forced close.
    Error {
        /// Human-readable description.
        message: String,
        /// Stable machine-readable code.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    /// Reply to a client `ping`.
    Pong {
        /// Server clock.
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    /// `error` without a code.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: None,
        }
    }

    /// `error` with a stable code.
    pub fn error_with_code(message: impl Into<String>, code: &str) -> Self {
        Self::Error {
            message: message.into(),
            code: Some(code.to_owned()),
        }
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A client frame that could not be understood.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not JSON, or not one of the known message types.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Parse a client text frame.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
