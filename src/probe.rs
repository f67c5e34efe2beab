//! Capability prober
//!
//! Determines once per process whether the local engine can run, loading it
//! if so. Concurrent callers serialize on the cache lock, so the local engine
//! is loaded at most once per probe.

use crate::engine::EngineState;
use crate::llm::LocalEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CapabilityProber {
    local: Option<Arc<dyn LocalEngine>>,
    remote_configured: bool,
    timeout: Duration,
    cached: Mutex<Option<EngineState>>,
    progress_tx: Arc<watch::Sender<f32>>,
}

impl CapabilityProber {
    pub fn new(local: Option<Arc<dyn LocalEngine>>, remote_configured: bool, timeout: Duration) -> Self {
        let (progress_tx, _) = watch::channel(0.0);
        Self {
            local,
            remote_configured,
            timeout,
            cached: Mutex::new(None),
            progress_tx: Arc::new(progress_tx),
        }
    }

    /// Probe the environment; the first result is cached
    pub async fn probe(&self) -> EngineState {
        let mut cached = self.cached.lock().await;
        if let Some(state) = *cached {
            return state;
        }
        let state = self.run_probe().await;
        *cached = Some(state);
        state
    }

    /// Discard the cached result and probe again
    pub async fn reprobe(&self) -> EngineState {
        let mut cached = self.cached.lock().await;
        self.progress_tx.send_replace(0.0);
        let state = self.run_probe().await;
        *cached = Some(state);
        state
    }

    /// Local load progress in [0, 1], never decreasing within one probe
    pub fn progress(&self) -> watch::Receiver<f32> {
        self.progress_tx.subscribe()
    }

    fn fallback_state(&self) -> EngineState {
        if self.remote_configured {
            EngineState::RemoteActive
        } else {
            EngineState::Degraded
        }
    }

    async fn run_probe(&self) -> EngineState {
        let Some(local) = &self.local else {
            let state = self.fallback_state();
            tracing::info!(state = state.as_str(), "No local engine available");
            return state;
        };

        let tx = Arc::clone(&self.progress_tx);
        let report = Arc::new(move |fraction: f32| {
            let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
            tx.send_if_modified(|current| {
                if fraction > *current {
                    *current = fraction;
                    true
                } else {
                    false
                }
            });
        });

        let start = std::time::Instant::now();
        let state = match tokio::time::timeout(self.timeout, local.load(report)).await {
            Ok(Ok(())) => {
                self.progress_tx.send_replace(1.0);
                EngineState::LocalReady
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    model = local.model_id(),
                    error = %e,
                    kind = e.kind.as_str(),
                    "Local engine failed to load"
                );
                self.fallback_state()
            }
            Err(_) => {
                tracing::warn!(
                    model = local.model_id(),
                    timeout_secs = self.timeout.as_secs(),
                    "Local engine load timed out"
                );
                self.fallback_state()
            }
        };

        tracing::info!(
            state = state.as_str(),
            duration_ms = %start.elapsed().as_millis(),
            "Capability probe complete"
        );
        state
    }
}
