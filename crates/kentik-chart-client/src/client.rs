//! HTTP client for the Kentik `query/topxchart` endpoint

use crate::error::{ClientError, RenderError, Result};
use crate::renderer::Renderer;
use crate::types::{Chart, ChartResponse};
use async_trait::async_trait;
use base64::Engine;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("kentik-image-cache/", env!("CARGO_PKG_VERSION"));

/// Status reported when an attempt runs out of time
pub const TIMEOUT_STATUS: u16 = 500;
/// Status reported when upstream cannot be reached
pub const UNREACHABLE_STATUS: u16 = 504;
/// Status reported when upstream answers with something unusable
pub const BAD_RESPONSE_STATUS: u16 = 502;

/// Client for the Kentik chart rendering API
pub struct KentikClient {
    http: reqwest::Client,
    base_url: String,
    email: String,
    token: String,
}

impl KentikClient {
    /// Default Kentik API v5 base URL
    pub const DEFAULT_BASE_URL: &'static str = "https://api.kentik.com/api/v5";

    /// Create a client for `base_url` authenticating as `email` with `token`
    pub fn new(base_url: &str, email: &str, token: &str) -> Result<Self> {
        let parsed =
            url::Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(format!(
                "unsupported scheme {}",
                parsed.scheme()
            )));
        }

        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            email: email.to_string(),
            token: token.to_string(),
        })
    }

    fn chart_url(&self) -> String {
        format!("{}/query/topxchart", self.base_url)
    }
}

#[async_trait]
impl Renderer for KentikClient {
    async fn render(
        &self,
        query: &serde_json::Value,
        timeout: Duration,
    ) -> std::result::Result<Chart, RenderError> {
        let url = self.chart_url();
        debug!(url = %url, "Requesting chart");

        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .header("X-CH-Auth-Email", &self.email)
            .header("X-CH-Auth-API-Token", &self.token)
            .json(query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, url = %url, "Chart request failed");
            let message = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("Error").to_string()
            } else {
                body.trim().to_string()
            };
            return Err(status_error(status.as_u16(), message));
        }

        let body: ChartResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                transport_error(e)
            } else {
                RenderError::permanent(
                    BAD_RESPONSE_STATUS,
                    format!("Invalid chart response: {}", e),
                )
            }
        })?;

        let chart = decode_data_uri(&body.data_uri)?;
        debug!(
            size = chart.data.len(),
            content_type = %chart.content_type,
            "Received chart"
        );
        Ok(chart)
    }
}

/// Map a failed HTTP status to a render error
pub fn status_error(status: u16, message: String) -> RenderError {
    if status == 429 || (500..=599).contains(&status) {
        RenderError::Transient { status, message }
    } else {
        RenderError::Permanent { status, message }
    }
}

fn transport_error(err: reqwest::Error) -> RenderError {
    if err.is_timeout() {
        RenderError::transient(TIMEOUT_STATUS, "Request timeout")
    } else {
        RenderError::transient(UNREACHABLE_STATUS, err.to_string())
    }
}

/// Decode a `data:<mime>;base64,<payload>` URI into a chart
pub fn decode_data_uri(uri: &str) -> std::result::Result<Chart, RenderError> {
    let invalid = |msg: &str| RenderError::permanent(BAD_RESPONSE_STATUS, msg.to_string());

    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| invalid("Chart is not a data URI"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| invalid("Chart data URI has no payload"))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| invalid("Chart data URI is not base64 encoded"))?;

    let data = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| invalid(&format!("Invalid chart payload: {}", e)))?;

    let content_type = if mime.is_empty() {
        "application/octet-stream".to_string()
    } else {
        mime.to_string()
    };

    Ok(Chart { content_type, data })
}
