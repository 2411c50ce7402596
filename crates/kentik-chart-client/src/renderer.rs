use crate::error::RenderError;
use crate::types::Chart;
use async_trait::async_trait;
use std::time::Duration;

/// Something that can render a chart query into an image.
///
/// One call is one attempt; retrying is the caller's business. `timeout`
/// bounds the whole attempt.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        query: &serde_json::Value,
        timeout: Duration,
    ) -> std::result::Result<Chart, RenderError>;
}
