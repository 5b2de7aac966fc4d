//! Party banner text generation
//!
//! One request per refresh against the `generateContent` endpoint. Failures
//! never leave this module: the caller always gets something to display.

use crate::gemini::{GeminiError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, warn};

pub const BANNER_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_BANNER_MODEL: &str = "gemini-3-flash-preview";

/// Shown when the model answers with nothing.
pub const EMPTY_FALLBACK: &str = "Happy New Year 2025!";
/// Shown when the request fails.
pub const ERROR_FALLBACK: &str = "Celebrate the Future!";

pub const WAITING_CONTEXT: &str = "Waiting for countdown";
pub const CELEBRATION_CONTEXT: &str = "It is New Years! Party time!";

pub fn context_for(celebration: bool) -> &'static str {
    if celebration {
        CELEBRATION_CONTEXT
    } else {
        WAITING_CONTEXT
    }
}

pub fn banner_prompt(context: &str) -> String {
    format!(
        "Write a short, punchy, and inspiring New Year's greeting for a party banner. Context: {}. Max 10 words. Do not use quotes. Be energetic!",
        context
    )
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate, trimmed. Empty when there is none.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

/// Explicitly constructed text-generation client.
#[derive(Debug, Clone)]
pub struct BannerClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl BannerClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: BANNER_ENDPOINT.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }

    /// Generate banner text. Never fails and never retries.
    pub async fn generate(&self, context: &str) -> String {
        match self.request(context).await {
            Ok(text) if text.is_empty() => EMPTY_FALLBACK.to_string(),
            Ok(text) => text,
            Err(e) => {
                warn!("Banner generation failed: {}", e);
                ERROR_FALLBACK.to_string()
            }
        }
    }

    async fn request(&self, context: &str) -> Result<String> {
        let prompt = banner_prompt(context);
        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: &prompt }],
            }],
        };

        let response = self.http.post(self.url()).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GeminiError::Other(format!("{}: {}", status, detail)));
        }

        let parsed: GenerateResponse = response.json().await?;
        let text = parsed.text();
        debug!("Banner text: {:?}", text);
        Ok(text)
    }
}

/// Regenerate the banner every `period`, and at once whenever celebration
/// mode flips. Runs until `tx` or the celebration sender is dropped.
pub async fn refresh_loop<F, Fut>(
    mut generate: F,
    mut celebrate: watch::Receiver<bool>,
    period: Duration,
    tx: mpsc::UnboundedSender<String>,
) where
    F: FnMut(&'static str) -> Fut,
    Fut: Future<Output = String>,
{
    let mut ticker = interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = celebrate.changed() => {
                if changed.is_err() {
                    debug!("Celebration flag dropped, banner refresh stopped");
                    break;
                }
                ticker.reset();
            }
        }

        let context = context_for(*celebrate.borrow_and_update());
        let text = generate(context).await;
        if tx.send(text).is_err() {
            break;
        }
    }
}
