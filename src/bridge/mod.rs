// ABOUTME: Persistent streaming connection carrying commands and events between sandbox and control plane

pub mod connection;
pub mod protocol;

pub use connection::{BridgeError, ControlPlaneBridge};
pub use protocol::{ConnectionState, HandshakeReply, InboundMessage, OutboundMessage};
