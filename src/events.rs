//! Session state and the values exchanged with the session transport

use tokio::sync::mpsc::UnboundedSender;

/// Connection state owned by the live session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-level unit: a base64 payload plus its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEnvelope {
    payload_base64: String,
    mime_type: String,
}

impl MediaEnvelope {
    pub fn new(payload_base64: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            payload_base64: payload_base64.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn payload_base64(&self) -> &str {
        &self.payload_base64
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn is_text(&self) -> bool {
        self.mime_type.starts_with("text/")
    }
}

/// One inbound server message, reduced to what the session cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveMessage {
    /// Speech audio parts, in the order the server sent them
    pub audio: Vec<MediaEnvelope>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    Open,
    Message(LiveMessage),
    Closed,
    Error(String),
}

/// Event delivered by a transport, tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub session: u64,
    pub kind: TransportEventKind,
}

/// Where a transport delivers its events for one session.
#[derive(Debug, Clone)]
pub struct EventSink {
    session: u64,
    tx: UnboundedSender<TransportEvent>,
}

impl EventSink {
    pub fn new(session: u64, tx: UnboundedSender<TransportEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Returns false once the receiving side is gone.
    pub fn emit(&self, kind: TransportEventKind) -> bool {
        self.tx
            .send(TransportEvent {
                session: self.session,
                kind,
            })
            .is_ok()
    }

    pub fn open(&self) -> bool {
        self.emit(TransportEventKind::Open)
    }

    pub fn message(&self, message: LiveMessage) -> bool {
        self.emit(TransportEventKind::Message(message))
    }

    pub fn closed(&self) -> bool {
        self.emit(TransportEventKind::Closed)
    }

    pub fn error(&self, cause: impl Into<String>) -> bool {
        self.emit(TransportEventKind::Error(cause.into()))
    }
}
