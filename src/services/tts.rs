use crate::core::error::DubError;
use async_trait::async_trait;
use log::debug;
use serde_json::json;
use std::time::Duration;

/// Everything one synthesis attempt needs.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub role: String,
    pub text: String,
    pub reference_voice: String,
    pub speed: f64,
    pub endpoint: String,
}

/// Stateless adapter issuing one synthesis request per line. No retry built
/// in; a retry is a re-dispatch through the normal pending path. Must be
/// safe to call concurrently up to the scheduler's cap.
#[async_trait]
pub trait SynthesisClient: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, DubError>;
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const ERROR_BODY_LIMIT: usize = 200;

pub struct HttpSynthesisClient {
    http: reqwest::Client,
}

impl HttpSynthesisClient {
    pub fn new() -> Result<Self, DubError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DubError::Transport(e.to_string()))?;
        Ok(Self { http })
    }
}

fn engine_error_message(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        let truncated: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        format!("HTTP {}: {}", status, truncated)
    }
}

#[async_trait]
impl SynthesisClient for HttpSynthesisClient {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, DubError> {
        let payload = json!({
            "text": request.text,
            "reference_voice": request.reference_voice,
            "speed": request.speed,
        });

        debug!(
            "synthesis request: role={} chars={} endpoint={}",
            request.role,
            request.text.chars().count(),
            request.endpoint
        );

        let response = self
            .http
            .post(&request.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DubError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DubError::Engine(engine_error_message(status.as_u16(), &body)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DubError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
