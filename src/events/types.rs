// ABOUTME: Typed domain events reported to the control plane while a session runs

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Closed taxonomy of everything a sandbox reports outward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    GitSync,
    Error,
    Token,
    ToolCall,
    ToolResult,
    ExecutionComplete,
}

/// One immutable progress event. `message_id` ties the event to the prompt
/// that produced it; session-level events (git sync) carry none.
///
/// Wire shape: `{"id","type","timestamp","data","messageId"?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Epoch milliseconds at construction time.
    pub timestamp: i64,
    pub data: Value,
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind, data: Value, message_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now().timestamp_millis(),
            data,
            message_id,
        }
    }
}
