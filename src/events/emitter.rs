// ABOUTME: Best-effort event delivery - prefers the live bridge, falls back to HTTP POST
// Delivery failures are logged and swallowed so a control-plane outage never stalls the agent

use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::auth;
use crate::bridge::protocol::OutboundMessage;
use crate::events::types::{Event, EventKind};

/// Handle into the live bridge's writer queue. Sends are ordered FIFO with
/// the bridge's own notifications.
pub type BridgeSender = mpsc::UnboundedSender<OutboundMessage>;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Relays domain events to the control plane. There is no queue and no
/// retry: an event that cannot be delivered on either path is dropped.
pub struct EventEmitter {
    session_id: String,
    control_plane_url: String,
    secret: String,
    /// `None` when the HTTP client could not be built (TLS backend
    /// initialization failure); the fallback path is then unavailable and
    /// emits degrade to bridge-only.
    client: Option<reqwest::Client>,
    bridge: Mutex<Option<BridgeSender>>,
}

impl EventEmitter {
    pub fn new(
        session_id: impl Into<String>,
        control_plane_url: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        let control_plane_url = control_plane_url.into();
        let client = match reqwest::Client::builder().timeout(HTTP_TIMEOUT).build() {
            Ok(client) => Some(client),
            Err(err) => {
                warn!("HTTP event fallback unavailable: {err}");
                None
            }
        };
        Self {
            session_id: session_id.into(),
            control_plane_url: control_plane_url.trim_end_matches('/').to_string(),
            secret: secret.into(),
            client,
            bridge: Mutex::new(None),
        }
    }

    /// Attach the live bridge as the preferred transport.
    pub fn set_bridge(&self, sender: BridgeSender) {
        if let Ok(mut guard) = self.bridge.lock() {
            *guard = Some(sender);
        }
    }

    /// Detach the bridge; subsequent emits go straight to HTTP.
    pub fn clear_bridge(&self) {
        if let Ok(mut guard) = self.bridge.lock() {
            *guard = None;
        }
    }

    /// Build an event and attempt delivery. Never returns an error and never
    /// retries; the next emit simply re-attempts the live path.
    pub async fn emit(&self, kind: EventKind, data: Value, message_id: Option<String>) {
        let event = Event::new(kind, data, message_id);

        let sender = match self.bridge.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        if let Some(tx) = sender {
            match tx.send(OutboundMessage::Event {
                event: event.clone(),
            }) {
                Ok(()) => return,
                Err(_) => {
                    debug!("Bridge channel closed, falling back to HTTP event delivery");
                }
            }
        }

        self.post_event(&event).await;
    }

    async fn post_event(&self, event: &Event) {
        let Some(client) = &self.client else {
            debug!("No HTTP client, dropping event");
            return;
        };
        let token = auth::mint_token(&self.secret);
        let url = format!("{}/internal/sandbox-event", self.control_plane_url);
        let body = json!({"sessionId": self.session_id, "event": event});

        match client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!("Control plane rejected event: {}", response.status());
            }
            Err(err) => {
                warn!("Failed to deliver event to control plane: {}", err);
            }
        }
    }

    pub async fn git_sync(&self, status: &str, details: Option<Value>) {
        let mut data = json!({"status": status});
        if let (Some(obj), Some(Value::Object(extra))) = (data.as_object_mut(), details) {
            obj.extend(extra);
        }
        self.emit(EventKind::GitSync, data, None).await;
    }

    pub async fn error(&self, message: &str, message_id: Option<&str>) {
        self.emit(
            EventKind::Error,
            json!({"error": message}),
            message_id.map(String::from),
        )
        .await;
    }

    pub async fn token(&self, text: &str, message_id: Option<&str>) {
        self.emit(
            EventKind::Token,
            json!({"token": text}),
            message_id.map(String::from),
        )
        .await;
    }

    pub async fn tool_call(&self, tool: &str, input: Value, message_id: Option<&str>) {
        self.emit(
            EventKind::ToolCall,
            json!({"tool": tool, "input": input}),
            message_id.map(String::from),
        )
        .await;
    }

    pub async fn tool_result(
        &self,
        tool: &str,
        output: Value,
        error: Option<String>,
        message_id: Option<&str>,
    ) {
        let mut data = json!({"tool": tool, "result": output});
        if let (Some(obj), Some(err)) = (data.as_object_mut(), error) {
            obj.insert("error".to_string(), Value::String(err));
        }
        self.emit(EventKind::ToolResult, data, message_id.map(String::from))
            .await;
    }

    pub async fn execution_complete(
        &self,
        success: bool,
        summary: Option<&str>,
        message_id: Option<&str>,
    ) {
        self.emit(
            EventKind::ExecutionComplete,
            json!({"success": success, "summary": summary}),
            message_id.map(String::from),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_without_http_client_is_swallowed() {
        let emitter = EventEmitter {
            session_id: "s-1".to_string(),
            control_plane_url: "http://127.0.0.1:9".to_string(),
            secret: "secret".to_string(),
            client: None,
            bridge: Mutex::new(None),
        };
        // Neither transport is available; the emit must still complete.
        emitter
            .emit(EventKind::Error, json!({"error": "boom"}), None)
            .await;
    }

    #[tokio::test]
    async fn bridge_path_works_without_http_client() {
        let emitter = EventEmitter {
            session_id: "s-1".to_string(),
            control_plane_url: "http://127.0.0.1:9".to_string(),
            secret: "secret".to_string(),
            client: None,
            bridge: Mutex::new(None),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        emitter.set_bridge(tx);
        emitter.token("still delivered", None).await;

        match rx.try_recv() {
            Ok(OutboundMessage::Event { event }) => {
                assert_eq!(event.data["token"], "still delivered");
            }
            other => panic!("expected event on bridge, got {other:?}"),
        }
    }
}
