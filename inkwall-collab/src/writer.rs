//! Authoritative write client.
//!
//! Every stroke is submitted exactly once. A rejection of any kind is terminal
//! for that stroke: the caller rolls the pending entry back and never retries.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use inkwall_core::{CanonicalStroke, StrokeDraft};

use crate::config::ClientConfig;

pub const INSERT_STROKE_PATH: &str = "/insert-stroke";
pub const SECRET_HEADER: &str = "x-insert-stroke-secret";

/// Why the backend did not accept a stroke.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("malformed stroke: {0}")]
    Malformed(String),
    #[error("backend unavailable: {0}")]
    ServerUnavailable(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// What the user is told when a stroke is rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveNotice {
    /// Generic "stroke not saved"
    NotSaved,
    /// Drawing too fast; try again shortly
    RateLimited,
    /// Backend or network unreachable
    Unavailable,
}

impl SaveNotice {
    pub fn message(&self) -> &'static str {
        match self {
            SaveNotice::NotSaved => "Stroke not saved",
            SaveNotice::RateLimited => "You're drawing too fast. Wait a moment and try again",
            SaveNotice::Unavailable => "Stroke not saved: server unreachable",
        }
    }
}

impl Rejection {
    pub fn notice(&self) -> SaveNotice {
        match self {
            Rejection::RateLimited(_) => SaveNotice::RateLimited,
            Rejection::ServerUnavailable(_) | Rejection::Transport(_) => SaveNotice::Unavailable,
            Rejection::Unauthorized(_) | Rejection::Malformed(_) => SaveNotice::NotSaved,
        }
    }
}

/// Submits drafts to whoever assigns canonical ids.
pub trait StrokeWriter: Send + Sync {
    fn submit(&self, draft: StrokeDraft) -> BoxFuture<'_, Result<CanonicalStroke, Rejection>>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

/// Map a non-success response to a rejection.
pub fn classify_rejection(status: StatusCode, body: &str) -> Rejection {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().map(|b| b.error.as_str()).unwrap_or("");
    let detail = match &parsed {
        Some(b) if !b.message.is_empty() => b.message.clone(),
        Some(b) if !b.error.is_empty() => b.error.clone(),
        _ => format!("HTTP {}", status.as_u16()),
    };

    match status.as_u16() {
        401 | 403 => Rejection::Unauthorized(detail),
        429 => Rejection::RateLimited(detail),
        400 if code == "rate_limited" => Rejection::RateLimited(detail),
        400 | 405 | 413 | 422 => Rejection::Malformed(detail),
        500..=599 => Rejection::ServerUnavailable(detail),
        _ => Rejection::Transport(detail),
    }
}

/// Writes strokes over HTTP to `POST {api_url}/insert-stroke`.
#[derive(Clone)]
pub struct HttpStrokeWriter {
    client: Client,
    config: ClientConfig,
}

impl HttpStrokeWriter {
    pub fn new(config: ClientConfig) -> Result<Self, Rejection> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Rejection::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn post(&self, draft: StrokeDraft) -> Result<CanonicalStroke, Rejection> {
        let url = self.config.api_endpoint(INSERT_STROKE_PATH);
        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&draft);
        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        if let Some(secret) = &self.config.insert_secret {
            request = request.header(SECRET_HEADER, secret);
        }

        let response = request.send().await.map_err(|e| {
            log::warn!("Network error inserting stroke: {e}");
            Rejection::Transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let rejection = classify_rejection(status, &body);
            log::warn!("Insert stroke rejected ({status}): {rejection}");
            return Err(rejection);
        }

        response
            .json::<CanonicalStroke>()
            .await
            .map_err(|e| Rejection::Transport(format!("unparseable response: {e}")))
    }
}

impl StrokeWriter for HttpStrokeWriter {
    fn submit(&self, draft: StrokeDraft) -> BoxFuture<'_, Result<CanonicalStroke, Rejection>> {
        self.post(draft).boxed()
    }
}
