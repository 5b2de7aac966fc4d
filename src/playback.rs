//! Inbound audio scheduling
//!
//! The player keeps a cursor on the output device clock and places every
//! decoded chunk exactly where the previous one ends, so speech plays back to
//! back no matter how irregularly the chunks arrive. The mixer is the timeline
//! an output backend renders from.

use crate::pcm::{decode_base64, PcmError, OUTPUT_SAMPLE_RATE};
use tracing::{debug, warn};

/// Length of the mute/unmute gain ramp in seconds.
pub const MUTE_RAMP_SECS: f64 = 0.1;

/// Mono samples ready to be scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Output pipeline the player schedules into.
pub trait AudioOutput: Send {
    /// Monotonic device clock, in seconds.
    fn current_time(&self) -> f64;

    /// Play `buffer` starting at `start_at` on the device clock. A start time
    /// already in the past plays immediately. Returns the start actually used,
    /// read from the same clock the buffer was placed against.
    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) -> f64;

    /// Drop pending gain changes, hold the current gain, then ramp linearly to
    /// `target` over `duration` seconds.
    fn ramp_gain(&mut self, target: f32, duration: f64);
}

/// Where a chunk landed on the device clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub start: f64,
    pub duration: f64,
}

/// Gapless scheduler for inbound speech.
pub struct AudioPlayer<O> {
    output: O,
    sample_rate: u32,
    next_start_time: f64,
    muted: bool,
}

impl<O: AudioOutput> AudioPlayer<O> {
    pub fn new(output: O) -> Self {
        let next_start_time = output.current_time();
        Self {
            output,
            sample_rate: OUTPUT_SAMPLE_RATE,
            next_start_time,
            muted: false,
        }
    }

    /// Decode a base64 PCM chunk and queue it behind everything already queued.
    pub fn play(&mut self, base64_audio: &str) -> Result<ScheduledBuffer, PcmError> {
        let samples = decode_base64(base64_audio)?;
        Ok(self.play_samples(samples))
    }

    pub fn play_samples(&mut self, samples: Vec<f32>) -> ScheduledBuffer {
        let buffer = PlaybackBuffer::new(samples, self.sample_rate);
        let duration = buffer.duration();
        if buffer.samples.is_empty() {
            self.next_start_time = self.next_start_time.max(self.output.current_time());
            return ScheduledBuffer {
                start: self.next_start_time,
                duration,
            };
        }

        // The output moves a stale cursor up to its clock; continue from
        // wherever the chunk actually landed.
        let cursor = self.next_start_time;
        let start = self.output.schedule(buffer, cursor);
        if start > cursor {
            debug!(
                "Playback cursor behind by {:.3}s, snapping forward",
                start - cursor
            );
        }
        self.next_start_time = start + duration;
        ScheduledBuffer { start, duration }
    }

    /// Fade the output in or out. Scheduled audio keeps playing underneath.
    pub fn set_mute(&mut self, muted: bool) {
        self.muted = muted;
        self.output
            .ramp_gain(if muted { 0.0 } else { 1.0 }, MUTE_RAMP_SECS);
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }
}

/// Piecewise linear gain: holds `from` until `start`, ramps to `to` by `end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainAutomation {
    from: f32,
    to: f32,
    start: f64,
    end: f64,
}

impl GainAutomation {
    pub fn constant(value: f32) -> Self {
        Self {
            from: value,
            to: value,
            start: 0.0,
            end: 0.0,
        }
    }

    pub fn value_at(&self, t: f64) -> f32 {
        if t >= self.end {
            self.to
        } else if t <= self.start {
            self.from
        } else {
            let progress = ((t - self.start) / (self.end - self.start)) as f32;
            self.from + (self.to - self.from) * progress
        }
    }

    pub fn ramp_to(&mut self, target: f32, now: f64, duration: f64) {
        let current = self.value_at(now);
        *self = Self {
            from: current,
            to: target,
            start: now,
            end: now + duration.max(0.0),
        };
    }
}

impl Default for GainAutomation {
    fn default() -> Self {
        Self::constant(1.0)
    }
}

struct Voice {
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sample-accurate timeline of scheduled buffers behind one gain stage.
///
/// The device clock is the number of frames rendered so far.
pub struct Mixer {
    sample_rate: u32,
    frames_rendered: u64,
    voices: Vec<Voice>,
    gain: GainAutomation,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_rendered: 0,
            voices: Vec::new(),
            gain: GainAutomation::default(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    pub fn pending_voices(&self) -> usize {
        self.voices.len()
    }

    /// Place `buffer` at `start_at`, or at the current frame if that is later.
    /// Returns the start time used.
    pub fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) -> f64 {
        if buffer.sample_rate != self.sample_rate {
            warn!(
                "Buffer at {} Hz scheduled on a {} Hz mixer",
                buffer.sample_rate, self.sample_rate
            );
        }
        let requested = (start_at * self.sample_rate as f64).round().max(0.0) as u64;
        let start_frame = requested.max(self.frames_rendered);
        self.voices.push(Voice {
            start_frame,
            samples: buffer.samples,
        });
        start_frame as f64 / self.sample_rate as f64
    }

    pub fn ramp_gain(&mut self, target: f32, duration: f64) {
        let now = self.current_time();
        self.gain.ramp_to(target, now, duration);
    }

    /// Render the next `out.len()` frames and advance the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let block_start = self.frames_rendered;
        let block_end = block_start + out.len() as u64;

        for voice in &self.voices {
            let from = voice.start_frame.max(block_start);
            let to = voice.end_frame().min(block_end);
            for frame in from..to {
                out[(frame - block_start) as usize] +=
                    voice.samples[(frame - voice.start_frame) as usize];
            }
        }

        let rate = self.sample_rate as f64;
        for (i, sample) in out.iter_mut().enumerate() {
            let t = (block_start + i as u64) as f64 / rate;
            *sample *= self.gain.value_at(t);
        }

        self.frames_rendered = block_end;
        self.voices.retain(|voice| voice.end_frame() > block_end);
    }
}

impl AudioOutput for Mixer {
    fn current_time(&self) -> f64 {
        Mixer::current_time(self)
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) -> f64 {
        Mixer::schedule(self, buffer, start_at)
    }

    fn ramp_gain(&mut self, target: f32, duration: f64) {
        Mixer::ramp_gain(self, target, duration)
    }
}
