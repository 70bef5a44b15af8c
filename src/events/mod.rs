// ABOUTME: Event model and the best-effort emitter that relays progress to the control plane

pub mod emitter;
pub mod types;

pub use emitter::{BridgeSender, EventEmitter};
pub use types::{Event, EventKind};
