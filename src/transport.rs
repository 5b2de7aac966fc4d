//! Session transport contract
//!
//! The controller only talks to the remote endpoint through these two traits,
//! so the WebSocket client can be swapped for a deterministic fake.

use crate::events::{EventSink, MediaEnvelope};
use crate::gemini::{LiveConfig, Result};
use std::sync::Arc;

/// Live connection handle. Shared by the capturer, the sampler and the
/// controller; the connection goes away when the last clone is dropped.
pub trait SessionHandle: Send + Sync {
    /// Queue an envelope for delivery without waiting on the network.
    ///
    /// An `Err` only means the connection is already gone. Callers on the
    /// media path ignore it.
    fn send_realtime_input(&self, envelope: MediaEnvelope) -> Result<()>;
}

pub type SharedHandle = Arc<dyn SessionHandle>;

pub trait SessionTransport {
    /// Start opening a session. Lifecycle and inbound messages arrive on
    /// `events`; the returned handle accepts outbound media immediately.
    fn open(&self, config: LiveConfig, events: EventSink) -> Result<SharedHandle>;
}
