use std::fmt;

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Mock,
    HttpRelay,
    SerialRelay,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Mock => "mock",
            BackendKind::HttpRelay => "http_relay",
            BackendKind::SerialRelay => "serial_relay",
        })
    }
}

/// A physical (or pretend) gate actuator.
///
/// Calls may block on I/O; the controller runs them off the async executor.
pub trait GateBackend: Send {
    fn kind(&self) -> BackendKind;

    fn open(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Backend-specific status fields. Read once when the controller is
    /// built, so they must describe the backend as constructed.
    fn details(&self) -> Map<String, Value> {
        Map::new()
    }
}
