//! Live session controller
//!
//! Owns the connection state machine and wires the transport to the capture
//! and playback sides. Transport events arrive on one channel, tagged with the
//! session that produced them; the owner pumps them through
//! [`LiveSession::handle_event`] from a single task.

use crate::capture::{
    AudioCapturer, CaptureDevices, DeviceError, MicTrack, MicrophoneConstraints,
    CAPTURE_BLOCK_SIZE,
};
use crate::events::{
    ConnectionState, EventSink, LiveMessage, MediaEnvelope, TransportEvent, TransportEventKind,
};
use crate::gemini::{GeminiError, LiveConfig};
use crate::playback::{AudioOutput, AudioPlayer};
use crate::transport::{SessionTransport, SharedHandle};
use crate::video::VideoSampler;
use base64::engine::general_purpose;
use base64::Engine;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub const NORMAL_PERSONA: &str = "You are a friendly and cool AI Party Host. You are chatting with guests waiting for the New Year countdown. Be witty, fun, and engaging.";

pub const CELEBRATION_PERSONA: &str = "You are a high-energy Party Host for a New Year's Eve party! It is officially Midnight! Scream 'Happy New Year!', make noise, be super excited, and congratulate everyone. Keep it short.";

/// System instruction for the requested mode.
pub fn persona(celebration: bool) -> &'static str {
    if celebration {
        CELEBRATION_PERSONA
    } else {
        NORMAL_PERSONA
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no API credential configured")]
    MissingCredential,

    #[error("a session is already {0}")]
    AlreadyActive(ConnectionState),

    #[error("failed to open session: {0}")]
    Transport(#[from] GeminiError),

    #[error("capture device error: {0}")]
    Device(#[from] DeviceError),
}

pub struct LiveSession<T, D, O> {
    api_key: String,
    config: LiveConfig,
    transport: T,
    devices: D,
    player: AudioPlayer<O>,

    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    last_session: u64,
    active_session: Option<u64>,

    status: watch::Sender<ConnectionState>,
    speaking: watch::Sender<bool>,

    handle: Option<SharedHandle>,
    capturer: Option<AudioCapturer>,
    sampler: Option<VideoSampler>,

    mic_track: MicTrack,
    constraints: MicrophoneConstraints,
    block_size: usize,
    video_enabled: bool,
}

impl<T, D, O> LiveSession<T, D, O>
where
    T: SessionTransport,
    D: CaptureDevices,
    O: AudioOutput,
{
    /// `config` is the template every session is opened with; its system
    /// instruction is replaced by the persona on each connect.
    pub fn new(
        api_key: impl Into<String>,
        config: LiveConfig,
        transport: T,
        devices: D,
        output: O,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionState::Disconnected);
        let (speaking, _) = watch::channel(false);

        Self {
            api_key: api_key.into(),
            config,
            transport,
            devices,
            player: AudioPlayer::new(output),
            events_tx,
            events_rx,
            last_session: 0,
            active_session: None,
            status,
            speaking,
            handle: None,
            capturer: None,
            sampler: None,
            mic_track: MicTrack::default(),
            constraints: MicrophoneConstraints::default(),
            block_size: CAPTURE_BLOCK_SIZE,
            video_enabled: true,
        }
    }

    pub fn with_video(mut self, enabled: bool) -> Self {
        self.video_enabled = enabled;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn with_constraints(mut self, constraints: MicrophoneConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    pub fn is_speaking(&self) -> bool {
        *self.speaking.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.subscribe()
    }

    pub fn watch_speaking(&self) -> watch::Receiver<bool> {
        self.speaking.subscribe()
    }

    pub fn is_ai_muted(&self) -> bool {
        self.player.is_muted()
    }

    pub fn is_mic_enabled(&self) -> bool {
        self.mic_track.is_enabled()
    }

    pub fn player(&self) -> &AudioPlayer<O> {
        &self.player
    }

    /// Start a new session.
    ///
    /// Allowed from Disconnected or Error. The result only covers starting the
    /// attempt; the session becomes Connected once the transport reports open.
    pub fn connect(&mut self, celebration: bool) -> Result<(), SessionError> {
        let state = self.status();
        if matches!(state, ConnectionState::Connecting | ConnectionState::Connected) {
            warn!("Ignoring connect while {}", state);
            return Err(SessionError::AlreadyActive(state));
        }

        if self.api_key.trim().is_empty() {
            error!("Cannot connect: no API key configured");
            self.set_status(ConnectionState::Error);
            return Err(SessionError::MissingCredential);
        }

        // Leftovers from a previous failed session.
        self.release_resources();

        self.last_session += 1;
        let session = self.last_session;
        self.set_status(ConnectionState::Connecting);

        let mut config = self.config.clone();
        config.system_instruction = persona(celebration).to_string();
        info!(
            "Connecting session {} ({} mode)",
            session,
            if celebration { "celebration" } else { "normal" }
        );

        let events = EventSink::new(session, self.events_tx.clone());
        match self.transport.open(config, events) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.active_session = Some(session);
                Ok(())
            }
            Err(e) => {
                error!("Failed to open session {}: {}", session, e);
                self.set_status(ConnectionState::Error);
                Err(e.into())
            }
        }
    }

    /// Tear the session down. Safe from any state and idempotent.
    pub fn disconnect(&mut self) {
        if self.active_session.is_some() {
            info!("Disconnecting session {}", self.last_session);
        }
        self.release_resources();
        self.set_status(ConnectionState::Disconnected);
        self.set_speaking(false);
    }

    /// Send a text turn. Silently ignored without a live handle.
    pub fn send_message(&self, text: &str) {
        let Some(handle) = &self.handle else {
            debug!("No session, dropping text message");
            return;
        };
        let envelope = MediaEnvelope::new(general_purpose::STANDARD.encode(text), "text/plain");
        if let Err(e) = handle.send_realtime_input(envelope) {
            debug!("Text message not delivered: {}", e);
        }
    }

    pub fn set_ai_muted(&mut self, muted: bool) {
        self.player.set_mute(muted);
    }

    /// Enable or disable the local microphone track. Kept across reconnects.
    pub fn set_mic_enabled(&mut self, enabled: bool) {
        info!("Microphone {}", if enabled { "enabled" } else { "muted" });
        self.mic_track.set_enabled(enabled);
    }

    /// Wait for the next transport event.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events_rx.recv().await
    }

    /// Handle every event already queued. Returns how many there were.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    pub fn handle_event(&mut self, event: TransportEvent) {
        if self.active_session != Some(event.session) {
            debug!("Ignoring event from stale session {}", event.session);
            return;
        }

        match event.kind {
            TransportEventKind::Open => self.on_open(),
            TransportEventKind::Message(message) => self.on_message(message),
            TransportEventKind::Closed => {
                info!("Session {} closed", event.session);
                self.release_resources();
                self.set_status(ConnectionState::Disconnected);
                self.set_speaking(false);
            }
            TransportEventKind::Error(cause) => {
                error!("Session {} failed: {}", event.session, cause);
                self.release_resources();
                self.set_status(ConnectionState::Error);
                self.set_speaking(false);
            }
        }
    }

    fn on_open(&mut self) {
        if self.status() != ConnectionState::Connecting {
            debug!("Duplicate open event ignored");
            return;
        }
        self.set_status(ConnectionState::Connected);
        info!("Session {} connected", self.last_session);

        if let Err(e) = self.start_media() {
            error!("Failed to start capture: {}", e);
            self.release_resources();
            self.set_status(ConnectionState::Error);
            self.set_speaking(false);
        }
    }

    fn start_media(&mut self) -> Result<(), SessionError> {
        let Some(handle) = self.handle.clone() else {
            return Ok(());
        };

        let microphone = self.devices.open_microphone(&self.constraints)?;
        let camera = if self.video_enabled {
            Some(self.devices.open_camera()?)
        } else {
            None
        };

        self.capturer = Some(AudioCapturer::start(
            microphone,
            handle.clone(),
            self.mic_track.clone(),
            self.block_size,
        )?);
        if let Some(camera) = camera {
            self.sampler = Some(VideoSampler::start(camera, handle));
        }
        Ok(())
    }

    fn on_message(&mut self, message: LiveMessage) {
        for envelope in &message.audio {
            self.set_speaking(true);
            match self.player.play(envelope.payload_base64()) {
                Ok(scheduled) => debug!(
                    "Scheduled {:.3}s of audio at {:.3}",
                    scheduled.duration, scheduled.start
                ),
                Err(e) => debug!("Dropping undecodable audio chunk: {}", e),
            }
        }
        if message.turn_complete {
            self.set_speaking(false);
        }
    }

    /// Drop the handle and stop both producers. Tolerates partial setup.
    fn release_resources(&mut self) {
        self.active_session = None;
        if let Some(sampler) = self.sampler.take() {
            sampler.stop();
        }
        if let Some(mut capturer) = self.capturer.take() {
            capturer.stop();
        }
        if self.handle.take().is_some() {
            debug!("Session handle released");
        }
    }

    fn set_status(&self, state: ConnectionState) {
        let previous = self.status.send_replace(state);
        if previous != state {
            debug!("Connection state {} -> {}", previous, state);
        }
    }

    fn set_speaking(&self, speaking: bool) {
        self.speaking.send_replace(speaking);
    }
}
