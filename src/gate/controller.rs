use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{BackendKind, GateBackend};

struct GateState {
    /// The one scheduled auto-close, if any.
    pending: Option<JoinHandle<()>>,
    /// Bumped by every successful actuation; a fired job only acts if it
    /// still matches.
    generation: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub status: &'static str,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_close_in: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateStatus {
    pub is_open: bool,
    #[serde(rename = "type")]
    pub backend: BackendKind,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Clone, Copy)]
enum Action {
    Open,
    Close,
}

/// Gate state machine over a single backend.
///
/// A successful open schedules a close after `auto_close`. A manual close
/// cancels that job, and a repeated open replaces it, so the gate always
/// stays open for a full period after the latest open.
#[derive(Clone)]
pub struct GateController {
    backend: Arc<StdMutex<Box<dyn GateBackend>>>,
    kind: BackendKind,
    /// Captured up front; `status` never waits on an actuation.
    details: Arc<Map<String, Value>>,
    /// Written only while `state` is held.
    is_open: Arc<AtomicBool>,
    state: Arc<Mutex<GateState>>,
    auto_close: Duration,
}

impl GateController {
    pub fn new(backend: Box<dyn GateBackend>, auto_close: Duration) -> Self {
        Self {
            kind: backend.kind(),
            details: Arc::new(backend.details()),
            backend: Arc::new(StdMutex::new(backend)),
            is_open: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(GateState {
                pending: None,
                generation: 0,
            })),
            auto_close,
        }
    }

    pub fn auto_close(&self) -> Duration {
        self.auto_close
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    async fn actuate(&self, action: Action) -> Result<()> {
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || {
            let mut backend = backend.lock().unwrap_or_else(PoisonError::into_inner);
            match action {
                Action::Open => backend.open(),
                Action::Close => backend.close(),
            }
        })
        .await
        .context("gate worker")?
    }

    pub async fn open(&self) -> Result<ActionReport> {
        let mut state = self.state.lock().await;
        self.actuate(Action::Open)
            .await
            .context("failed to open gate")?;
        self.is_open.store(true, Ordering::SeqCst);
        state.generation += 1;
        if let Some(stale) = state.pending.take() {
            stale.abort();
        }

        let generation = state.generation;
        let controller = self.clone();
        state.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(controller.auto_close).await;
            controller.fire_auto_close(generation).await;
        }));
        log::info!("gate opened, closing in {:?}", self.auto_close);

        Ok(ActionReport {
            status: "success",
            action: "opened",
            auto_close_in: Some(self.auto_close.as_secs()),
        })
    }

    pub async fn close(&self) -> Result<ActionReport> {
        let mut state = self.state.lock().await;
        self.actuate(Action::Close)
            .await
            .context("failed to close gate")?;
        self.is_open.store(false, Ordering::SeqCst);
        state.generation += 1;
        if let Some(pending) = state.pending.take() {
            pending.abort();
            log::debug!("pending auto-close cancelled");
        }
        log::info!("gate closed");

        Ok(ActionReport {
            status: "success",
            action: "closed",
            auto_close_in: None,
        })
    }

    async fn fire_auto_close(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            return;
        }
        // This task is the pending job; drop our own handle.
        state.pending = None;
        match self.actuate(Action::Close).await {
            Ok(()) => {
                self.is_open.store(false, Ordering::SeqCst);
                state.generation += 1;
                log::info!("gate auto-closed after {} seconds", self.auto_close.as_secs());
            }
            Err(err) => log::error!("auto-close failed: {:#}", err),
        }
    }

    pub async fn status(&self) -> GateStatus {
        GateStatus {
            is_open: self.is_open(),
            backend: self.kind,
            details: (*self.details).clone(),
        }
    }

    /// Wait for a scheduled auto-close to run. Returns at once when none is
    /// pending.
    pub async fn wait_auto_close(&self) {
        let pending = self.state.lock().await.pending.take();
        if let Some(job) = pending {
            if let Err(err) = job.await {
                if !err.is_cancelled() {
                    log::error!("auto-close task failed: {}", err);
                }
            }
        }
    }

    /// Cancel the pending auto-close and close the gate now if it is open,
    /// so nothing stays open once the owner goes away.
    pub async fn shutdown(&self) {
        if self.is_open() {
            if let Err(err) = self.close().await {
                log::error!("gate left open on shutdown: {:#}", err);
            }
        }
        if let Some(job) = self.state.lock().await.pending.take() {
            job.abort();
        }
    }
}
