use facegate_vision::{CameraSource, CaptureHandle, DriverKind, DriverSet, Frame};
use serde::Serialize;

use super::Role;

/// Result of trying one driver during a connect.
#[derive(Debug, Clone, Serialize)]
pub struct DriverAttempt {
    pub driver: DriverKind,
    pub outcome: Result<(), String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectReport {
    pub connected: bool,
    pub attempts: Vec<DriverAttempt>,
}

/// One camera bound to a role. Holds at most one live capture handle.
pub struct CameraStream {
    role: Role,
    source: CameraSource,
    handle: Option<Box<dyn CaptureHandle>>,
}

impl CameraStream {
    pub fn new(role: Role, source: CameraSource) -> Self {
        Self {
            role,
            source,
            handle: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn source(&self) -> &CameraSource {
        &self.source
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// Release the handle, if any. Binding a new source always goes through here.
    pub fn disconnect(&mut self) {
        if self.handle.take().is_some() {
            log::info!("{} camera ({}) released", self.role, self.source);
        }
    }

    pub fn rebind(&mut self, source: CameraSource) {
        self.disconnect();
        self.source = source;
    }

    /// Walk the candidate drivers until one opens the source.
    pub fn connect(&mut self, drivers: &DriverSet) -> ConnectReport {
        self.disconnect();

        let candidates = drivers.candidates(&self.source);
        if candidates.is_empty() {
            log::warn!("{} camera: no driver handles {}", self.role, self.source);
        }

        let mut attempts = Vec::with_capacity(candidates.len());
        for driver in candidates {
            let kind = driver.kind();
            match driver.open(&self.source) {
                Ok(handle) if handle.is_open() => {
                    log::info!("{} camera connected to {} via {}", self.role, self.source, kind);
                    attempts.push(DriverAttempt {
                        driver: kind,
                        outcome: Ok(()),
                    });
                    self.handle = Some(handle);
                    break;
                }
                Ok(_) => {
                    log::warn!("{} camera: {} opened {} but it is not streaming", self.role, kind, self.source);
                    attempts.push(DriverAttempt {
                        driver: kind,
                        outcome: Err("device did not report open".to_string()),
                    });
                }
                Err(err) => {
                    log::warn!("{} camera: {} failed on {}: {:#}", self.role, kind, self.source, err);
                    attempts.push(DriverAttempt {
                        driver: kind,
                        outcome: Err(format!("{:#}", err)),
                    });
                }
            }
        }

        ConnectReport {
            connected: self.is_connected(),
            attempts,
        }
    }

    /// Blocking read. Failures are logged and reported as no frame.
    pub fn read(&mut self) -> Option<Frame> {
        let handle = self.handle.as_mut()?;
        match handle.read() {
            Ok(frame) => Some(frame),
            Err(err) => {
                log::warn!("{} camera read failed: {:#}", self.role, err);
                None
            }
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.disconnect();
    }
}
