// ABOUTME: Control-plane bridge state machine - connect/handshake, receive loop, teardown
// Commands dispatch to the runner; everything outbound flows through one FIFO writer task

use std::sync::Arc;

use futures_util::stream::{SplitStream, StreamExt};
use futures_util::SinkExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::auth;
use crate::bridge::protocol::{ConnectionState, HandshakeReply, InboundMessage, OutboundMessage};
use crate::config::{SessionConfig, BRIDGE_HANDSHAKE_TIMEOUT, BRIDGE_RECEIVE_TICK};
use crate::events::EventEmitter;
use crate::runner::AgentRunner;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("failed to connect to control plane: {0}")]
    ConnectFailed(String),
    #[error("connection closed by control plane")]
    ConnectionClosed,
    #[error("websocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("invalid control plane url: {0}")]
    InvalidUrl(String),
    #[error("bridge is not connected")]
    NotConnected,
}

/// One persistent streaming connection per session. No automatic reconnect:
/// a lost connection is fatal here and re-initialization belongs to an
/// outer supervisor.
pub struct ControlPlaneBridge {
    control_plane_url: String,
    sandbox_id: String,
    secret: String,
    emitter: Arc<EventEmitter>,
    state: ConnectionState,
    running: bool,
    reader: Option<SplitStream<WsStream>>,
    outbound_tx: Option<mpsc::UnboundedSender<OutboundMessage>>,
    writer_task: Option<JoinHandle<()>>,
}

impl ControlPlaneBridge {
    pub fn new(config: &SessionConfig, secret: impl Into<String>, emitter: Arc<EventEmitter>) -> Self {
        Self {
            control_plane_url: config.control_plane_url.clone(),
            sandbox_id: config.sandbox_id.clone(),
            secret: secret.into(),
            emitter,
            state: ConnectionState::Disconnected,
            running: false,
            reader: None,
            outbound_tx: None,
            writer_task: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Open the websocket and perform the `sandbox_connect` handshake within
    /// a bounded budget. Anything other than `sandbox_connected` is a
    /// connection failure and the bridge ends up Closed.
    pub async fn connect(&mut self) -> Result<(), BridgeError> {
        if self.state != ConnectionState::Disconnected {
            return Err(BridgeError::ConnectFailed(format!(
                "connect is not valid in state {:?}",
                self.state
            )));
        }
        self.state = ConnectionState::Connecting;

        let url = self.stream_url()?;
        info!("Connecting to control plane bridge");

        let ws = match tokio::time::timeout(BRIDGE_HANDSHAKE_TIMEOUT, connect_async(url.as_str())).await
        {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(err)) => {
                self.state = ConnectionState::Closed;
                return Err(BridgeError::ConnectFailed(err.to_string()));
            }
            Err(_) => {
                self.state = ConnectionState::Closed;
                return Err(BridgeError::ConnectFailed(
                    "websocket handshake timed out".to_string(),
                ));
            }
        };

        let (mut sink, mut stream) = ws.split();

        let hello = OutboundMessage::SandboxConnect {
            sandbox_id: self.sandbox_id.clone(),
            token: auth::mint_token(&self.secret),
        };
        let payload = serde_json::to_string(&hello)
            .map_err(|err| BridgeError::ConnectFailed(err.to_string()))?;
        if let Err(err) = sink.send(tungstenite::Message::Text(payload)).await {
            self.state = ConnectionState::Closed;
            return Err(BridgeError::ConnectFailed(err.to_string()));
        }

        // Exactly one handshake reply is expected.
        let reply = tokio::time::timeout(BRIDGE_HANDSHAKE_TIMEOUT, stream.next()).await;
        let session_id = match reply {
            Ok(Some(Ok(tungstenite::Message::Text(text)))) => {
                match serde_json::from_str::<HandshakeReply>(&text) {
                    Ok(HandshakeReply::SandboxConnected { session_id }) => session_id,
                    Ok(HandshakeReply::Error { message }) => {
                        self.state = ConnectionState::Closed;
                        return Err(BridgeError::ConnectFailed(
                            message.unwrap_or_else(|| "control plane rejected handshake".to_string()),
                        ));
                    }
                    _ => {
                        self.state = ConnectionState::Closed;
                        return Err(BridgeError::ConnectFailed(
                            "unexpected handshake reply".to_string(),
                        ));
                    }
                }
            }
            Ok(Some(Ok(_))) | Ok(Some(Err(_))) | Ok(None) => {
                self.state = ConnectionState::Closed;
                return Err(BridgeError::ConnectFailed(
                    "connection lost during handshake".to_string(),
                ));
            }
            Err(_) => {
                self.state = ConnectionState::Closed;
                return Err(BridgeError::ConnectFailed(
                    "no handshake reply within budget".to_string(),
                ));
            }
        };
        info!("Bridge connected for session {}", session_id);

        // Single writer drains the FIFO so event order is preserved across
        // the emitter and the loop's own notifications.
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!("Failed to encode outbound message: {err}");
                        continue;
                    }
                };
                if let Err(err) = sink.send(tungstenite::Message::Text(json)).await {
                    warn!("Failed to send outbound message: {err}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        self.emitter.set_bridge(outbound_tx.clone());
        self.reader = Some(stream);
        self.outbound_tx = Some(outbound_tx);
        self.writer_task = Some(writer);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    /// Receive loop. Each iteration waits a bounded tick so a requested
    /// close is observed between messages; a tick without traffic simply
    /// continues. Ends on peer close (ConnectionClosed) or transport error.
    pub async fn run(&mut self, runner: &mut AgentRunner) -> Result<(), BridgeError> {
        if self.state != ConnectionState::Connected {
            return Err(BridgeError::NotConnected);
        }
        let mut stream = self.reader.take().ok_or(BridgeError::NotConnected)?;
        self.state = ConnectionState::Running;
        self.running = true;

        let result = loop {
            if !self.running {
                break Ok(());
            }
            match tokio::time::timeout(BRIDGE_RECEIVE_TICK, stream.next()).await {
                // Receive timeout: expected, loop around for the stop check.
                Err(_) => continue,
                Ok(None) => break Err(BridgeError::ConnectionClosed),
                Ok(Some(Err(err))) => break Err(BridgeError::Transport(err)),
                Ok(Some(Ok(tungstenite::Message::Close(_)))) => {
                    info!("Control plane closed the bridge");
                    break Err(BridgeError::ConnectionClosed);
                }
                Ok(Some(Ok(tungstenite::Message::Text(text)))) => {
                    self.dispatch(&text, runner).await;
                }
                Ok(Some(Ok(_))) => {
                    // Binary/ping/pong frames are transport noise here.
                    continue;
                }
            }
        };

        self.teardown().await;
        result
    }

    /// Idempotent: marks the bridge Closed and best-effort closes the socket.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.running = false;
        self.teardown().await;
    }

    async fn dispatch(&mut self, text: &str, runner: &mut AgentRunner) {
        let message = match serde_json::from_str::<InboundMessage>(text) {
            Ok(message) => message,
            Err(err) => {
                warn!("Unparseable control message: {err}");
                return;
            }
        };

        match message {
            InboundMessage::Prompt {
                message_id,
                content,
            } => {
                info!("Prompt received: {}", message_id);
                self.send(OutboundMessage::ExecutionStarted {
                    message_id: message_id.clone(),
                });
                let result = runner.run_prompt(&content, Some(&message_id)).await;
                self.send(OutboundMessage::ExecutionComplete {
                    message_id,
                    success: result.success,
                });
            }
            InboundMessage::Stop => {
                info!("Stop requested by control plane");
                runner.stop_handle().stop().await;
            }
            InboundMessage::Ping => {
                debug!("Ping received");
                self.send(OutboundMessage::Pong);
            }
            InboundMessage::Error { message } => {
                warn!(
                    "Control plane reported error: {}",
                    message.unwrap_or_else(|| "unknown".to_string())
                );
            }
            InboundMessage::Unknown => {
                warn!("Unrecognized control message, ignoring");
            }
        }
    }

    fn send(&self, message: OutboundMessage) {
        if let Some(tx) = &self.outbound_tx {
            if tx.send(message).is_err() {
                warn!("Outbound channel closed, dropping message");
            }
        }
    }

    async fn teardown(&mut self) {
        self.state = ConnectionState::Closed;
        self.running = false;
        self.emitter.clear_bridge();
        self.reader = None;
        // Dropping the sender lets the writer drain its queue and close the
        // socket; bound the wait so teardown cannot hang.
        self.outbound_tx = None;
        if let Some(task) = self.writer_task.take() {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(2), task).await;
        }
    }

    /// Derive the streaming URL from the HTTP base by scheme substitution.
    fn stream_url(&self) -> Result<Url, BridgeError> {
        let mut url = Url::parse(&self.control_plane_url)
            .map_err(|err| BridgeError::InvalidUrl(err.to_string()))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(BridgeError::InvalidUrl(format!(
                    "unsupported scheme: {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| BridgeError::InvalidUrl("scheme substitution failed".to_string()))?;
        let path = format!("{}/internal/sandbox-ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url)
    }
}
