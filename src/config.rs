//! Application configuration
//!
//! Everything comes from the environment with defaults for the rest.

use crate::banner::DEFAULT_BANNER_MODEL;
use crate::gemini::LiveConfig;
use std::env;
use std::time::Duration;

/// How often the banner text is regenerated.
pub const BANNER_REFRESH: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Empty when no key is configured; connecting then fails.
    pub api_key: String,
    pub live_model: String,
    pub voice: String,
    pub banner_model: String,
    pub video_enabled: bool,
    /// PulseAudio source to record from instead of the default one.
    pub audio_source: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let live = LiveConfig::default();
        Self {
            api_key: String::new(),
            live_model: live.model,
            voice: live.voice,
            banner_model: DEFAULT_BANNER_MODEL.to_string(),
            video_enabled: true,
            audio_source: None,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn normalize_model(model: String) -> String {
    if model.starts_with("models/") {
        model
    } else {
        format!("models/{}", model)
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = non_empty("GEMINI_API_KEY")
            .or_else(|| non_empty("API_KEY"))
            .unwrap_or_default();
        let live_model = non_empty("NEONLIVE_LIVE_MODEL")
            .map(normalize_model)
            .unwrap_or(defaults.live_model);
        let voice = non_empty("NEONLIVE_VOICE").unwrap_or(defaults.voice);
        let banner_model = non_empty("NEONLIVE_BANNER_MODEL").unwrap_or(defaults.banner_model);
        let video_enabled = non_empty("NEONLIVE_VIDEO")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(defaults.video_enabled);
        let audio_source = non_empty("NEONLIVE_AUDIO_SOURCE");

        Self {
            api_key,
            live_model,
            voice,
            banner_model,
            video_enabled,
            audio_source,
        }
    }

    pub fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Session template; the persona is filled in on connect.
    pub fn live_config(&self) -> LiveConfig {
        LiveConfig {
            model: self.live_model.clone(),
            voice: self.voice.clone(),
            ..LiveConfig::default()
        }
    }
}
