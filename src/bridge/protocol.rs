// ABOUTME: Wire protocol for the control-plane bridge - closed unions for commands, replies,
// and notifications so an unknown message kind is a compile-time-checked change

use serde::{Deserialize, Serialize};

use crate::events::Event;

/// Commands the control plane sends to the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Prompt {
        #[serde(rename = "messageId")]
        message_id: String,
        content: String,
    },
    Stop,
    Ping,
    Error {
        message: Option<String>,
    },
    /// Anything with an unrecognized discriminator; logged and skipped.
    #[serde(other)]
    Unknown,
}

/// Messages the sandbox sends to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    SandboxConnect {
        #[serde(rename = "sandboxId")]
        sandbox_id: String,
        token: String,
    },
    ExecutionStarted {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    ExecutionComplete {
        #[serde(rename = "messageId")]
        message_id: String,
        success: bool,
    },
    Event {
        event: Event,
    },
    Pong,
}

/// The single reply expected after `sandbox_connect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeReply {
    SandboxConnected {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Error {
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Running,
    Closed,
}
