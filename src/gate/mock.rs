use anyhow::Result;

use super::{BackendKind, GateBackend};

/// Logs instead of switching anything. For benches without a relay attached.
#[derive(Debug, Default)]
pub struct MockGate;

impl MockGate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GateBackend for MockGate {
    fn kind(&self) -> BackendKind {
        BackendKind::Mock
    }

    fn open(&mut self) -> Result<()> {
        log::info!("mock gate: opening");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        log::info!("mock gate: closing");
        Ok(())
    }
}
