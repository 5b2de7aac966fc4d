//! NeonLive - real-time voice and video session with an AI party host
//!
//! Streams microphone audio and camera frames to the Gemini Live API and plays
//! the host's spoken replies back without gaps.

#![forbid(unsafe_code)]

/// PulseAudio microphone and speaker backends
pub mod audio;
pub mod banner;
/// Outbound microphone capture
pub mod capture;
pub mod config;
pub mod countdown;
pub mod events;
/// Gemini Live API wire types
pub mod gemini;
/// WebSocket session transport
pub mod gemini_client;
pub mod pcm;
/// Inbound audio scheduling
pub mod playback;
/// Screen-grab frame source (real frames with the "capture" feature)
pub mod screen;
pub mod session;
pub mod transport;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

pub use events::{ConnectionState, MediaEnvelope};
pub use session::{LiveSession, SessionError};
