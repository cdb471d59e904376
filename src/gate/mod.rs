//! Gate actuator: backends plus the open/close state machine.

mod backend;
mod controller;
mod http;
mod mock;
mod serial;

use std::time::Duration;

pub use backend::{BackendKind, GateBackend};
pub use controller::{ActionReport, GateController, GateStatus};
pub use http::HttpRelay;
pub use mock::MockGate;
pub use serial::SerialRelay;

use crate::config::{BackendChoice, GateConfig};

/// Build the configured backend. Called once at startup.
pub fn from_config(cfg: &GateConfig) -> GateController {
    let backend: Box<dyn GateBackend> = match cfg.backend {
        BackendChoice::Mock => Box::new(MockGate::new()),
        BackendChoice::Http => Box::new(HttpRelay::new(
            &cfg.host,
            cfg.port,
            Duration::from_secs(cfg.request_timeout_secs),
        )),
        BackendChoice::Serial => Box::new(SerialRelay::new(
            &cfg.serial_port,
            cfg.baud_rate,
            Duration::from_millis(cfg.write_timeout_ms),
        )),
    };
    log::info!("gate backend: {}", backend.kind());
    GateController::new(backend, cfg.auto_close())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn factory_picks_configured_backend() {
        let gate = from_config(&GateConfig::default());
        assert_eq!(gate.status().await.backend, BackendKind::Mock);
        assert_eq!(gate.auto_close(), Duration::from_secs(5));

        let cfg = GateConfig {
            backend: BackendChoice::Serial,
            serial_port: "/dev/does-not-exist".to_string(),
            ..GateConfig::default()
        };
        let status = from_config(&cfg).status().await;
        assert_eq!(status.backend, BackendKind::SerialRelay);
        assert_eq!(status.details["connected"], serde_json::Value::from(false));
    }
}
