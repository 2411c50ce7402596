//! In-process renderer and engine builders for tests

use crate::engine::{CacheEngine, EngineSettings};
use crate::fetcher::{FetchPolicy, Fetcher};
use async_trait::async_trait;
use entry_store::EntryStore;
use kentik_chart_client::{Chart, RenderError, Renderer};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Render(Chart),
    Fail(RenderError),
    Hang,
}

/// Renderer that plays back a script, then repeats a fallback step.
///
/// A gated renderer holds every call until [`ScriptedRenderer::release`]
/// lets it through, which keeps entries pending for as long as a test needs.
pub(crate) struct ScriptedRenderer {
    calls: AtomicUsize,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    gate: Option<Semaphore>,
}

impl ScriptedRenderer {
    fn with_fallback(fallback: Step) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            fallback,
            gate: None,
        }
    }

    pub(crate) fn succeeding() -> Self {
        Self::with_fallback(Step::Render(png()))
    }

    pub(crate) fn failing(err: RenderError) -> Self {
        Self::with_fallback(Step::Fail(err))
    }

    pub(crate) fn hanging() -> Self {
        Self::with_fallback(Step::Hang)
    }

    pub(crate) fn with_script(self, steps: Vec<Step>) -> Self {
        *self.script.lock().unwrap() = steps.into();
        self
    }

    pub(crate) fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub(crate) fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    /// Number of render calls started, gated or not
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn render(
        &self,
        _query: &serde_json::Value,
        _timeout: Duration,
    ) -> Result<Chart, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Render(chart) => Ok(chart),
            Step::Fail(err) => Err(err),
            Step::Hang => loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            },
        }
    }
}

pub(crate) fn png() -> Chart {
    Chart {
        content_type: "image/png".to_string(),
        data: b"\x89PNG\r\n\x1a\nchart".to_vec(),
    }
}

pub(crate) fn test_settings() -> EngineSettings {
    EngineSettings {
        poll_interval: Duration::from_millis(50),
        max_concurrent_fetches: 4,
        ..EngineSettings::default()
    }
}

pub(crate) fn test_policy() -> FetchPolicy {
    FetchPolicy {
        retries: 2,
        attempt_timeout: Duration::from_secs(5),
        retry_delay: Duration::from_millis(1),
    }
}

/// Open a store under `dir` and build an engine around `renderer`
pub(crate) async fn engine_with(dir: &Path, renderer: Arc<ScriptedRenderer>) -> CacheEngine {
    let store = EntryStore::new(dir);
    store.init().await.unwrap();
    CacheEngine::new(
        store,
        Fetcher::new(renderer, test_policy()),
        test_settings(),
    )
}
