use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use facegate_vision::{FaceEncoding, FaceMatcher, MatchResult};
use serde::Serialize;
use tokio::time::Instant;

use crate::camera::{CameraManager, Role};
use crate::gate::{ActionReport, GateController};
use crate::matcher;
use crate::Result;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    NoFrame,
    NoFace { night_mode: bool },
    Rejected { best: Option<MatchResult> },
    Admitted { reference: usize, result: MatchResult, gate: ActionReport },
    /// Matched, but the actuator refused.
    GateFailed { reference: usize, result: MatchResult, error: String },
}

/// Pacing for [`Checkpoint::watch`].
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub interval: Duration,
    /// Stop after the first admission, once the gate has closed again.
    pub once: bool,
    /// How long the camera may go without a frame before it is reset.
    pub reset_after: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            once: false,
            reset_after: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatchSummary {
    pub scans: u64,
    pub failures: u64,
    pub admissions: u64,
    pub resets: u64,
}

/// Wires camera, face pipeline and gate: pull a frame, match it, actuate.
pub struct Checkpoint {
    cameras: Arc<CameraManager>,
    matcher: Arc<FaceMatcher>,
    gate: GateController,
}

impl Checkpoint {
    pub fn new(cameras: Arc<CameraManager>, matcher: Arc<FaceMatcher>, gate: GateController) -> Self {
        Self {
            cameras,
            matcher,
            gate,
        }
    }

    pub async fn scan(&self, role: Role, references: &[FaceEncoding]) -> Result<ScanOutcome> {
        let Some(frame) = self.cameras.get_frame(role).await else {
            return Ok(ScanOutcome::NoFrame);
        };

        let matcher = self.matcher.clone();
        let (night_mode, encoding) = tokio::task::spawn_blocking(move || {
            let prepared = matcher.preprocess(frame.into_image());
            matcher
                .encode(&prepared.image, None)
                .map(|e| (prepared.night_mode, e))
        })
        .await??;

        let Some(probe) = encoding else {
            return Ok(ScanOutcome::NoFace { night_mode });
        };
        let threshold = self.matcher.config().threshold;
        let (reference, result) = match matcher::best_match(references, &probe, threshold) {
            Some((reference, result)) if result.is_match => (reference, result),
            best => {
                log::info!(
                    "{} camera: face rejected (best distance {:?})",
                    role,
                    best.map(|(_, r)| r.distance)
                );
                return Ok(ScanOutcome::Rejected {
                    best: best.map(|(_, r)| r),
                });
            }
        };

        log::info!(
            "{} camera: reference {} matched at distance {:.3}",
            role,
            reference,
            result.distance
        );
        Ok(match self.gate.open().await {
            Ok(gate) => ScanOutcome::Admitted {
                reference,
                result,
                gate,
            },
            Err(err) => {
                log::error!("{:#}", err);
                ScanOutcome::GateFailed {
                    reference,
                    result,
                    error: format!("{:#}", err),
                }
            }
        })
    }

    /// Scan `role` every `interval` until `stop` resolves.
    ///
    /// A failed scan is logged and the loop carries on. Admissions and gate
    /// failures are handed to `on_event`. A camera that stays silent for
    /// `reset_after` is reset on its current source.
    pub async fn watch<S, E>(
        &self,
        role: Role,
        references: &[FaceEncoding],
        options: WatchOptions,
        stop: S,
        mut on_event: E,
    ) -> WatchSummary
    where
        S: Future<Output = ()>,
        E: FnMut(&ScanOutcome),
    {
        tokio::pin!(stop);
        let mut ticker = tokio::time::interval(options.interval.max(Duration::from_millis(1)));
        let mut summary = WatchSummary::default();
        let mut silent_since: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = &mut stop => {
                    log::info!("stopped watching {} camera", role);
                    break;
                }
                _ = ticker.tick() => {}
            }

            summary.scans += 1;
            let outcome = match self.scan(role, references).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    summary.failures += 1;
                    log::error!("{} scan failed: {}", role, err);
                    continue;
                }
            };

            if let ScanOutcome::NoFrame = outcome {
                let since = *silent_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= options.reset_after {
                    silent_since = None;
                    summary.resets += 1;
                    let source = self.cameras.source(role).await;
                    let report = match role {
                        Role::Entry => self.cameras.reset(Some(source), None, false).await,
                        Role::Exit => self.cameras.reset(None, Some(source), false).await,
                    };
                    log::warn!("{} camera produced no frames, reset: {:?}", role, report);
                }
                continue;
            }
            silent_since = None;

            match &outcome {
                ScanOutcome::Admitted { .. } => {
                    summary.admissions += 1;
                    on_event(&outcome);
                    if options.once {
                        self.gate.wait_auto_close().await;
                        break;
                    }
                }
                ScanOutcome::GateFailed { .. } => on_event(&outcome),
                _ => {}
            }
        }
        summary
    }
}
