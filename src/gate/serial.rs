use std::io::Write;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use serialport::SerialPort;

use super::{BackendKind, GateBackend};

/// Relay driven by line commands over a serial link.
pub struct SerialRelay {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialRelay {
    /// A port that fails to open leaves the relay inert rather than failing
    /// startup; every actuation then errors.
    pub fn new(path: &str, baud_rate: u32, timeout: Duration) -> Self {
        let port = match serialport::new(path, baud_rate).timeout(timeout).open() {
            Ok(port) => Some(port),
            Err(err) => {
                log::error!("serial relay {} unavailable: {}", path, err);
                None
            }
        };
        Self {
            path: path.to_string(),
            port,
        }
    }

    fn send(&mut self, command: &[u8]) -> Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| anyhow!("serial relay {} is not connected", self.path))?;
        port.write_all(command)
            .and_then(|_| port.flush())
            .with_context(|| format!("write to {}", self.path))
    }
}

impl GateBackend for SerialRelay {
    fn kind(&self) -> BackendKind {
        BackendKind::SerialRelay
    }

    fn open(&mut self) -> Result<()> {
        self.send(b"OPEN\n")
    }

    fn close(&mut self) -> Result<()> {
        self.send(b"CLOSE\n")
    }

    fn details(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("connected".into(), Value::from(self.port.is_some()));
        map.insert("port".into(), Value::from(self.path.clone()));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_port_leaves_relay_inert() {
        let mut relay = SerialRelay::new("/dev/does-not-exist", 9600, Duration::from_millis(100));
        assert!(relay.open().is_err());
        assert!(relay.close().is_err());
        assert_eq!(relay.details()["connected"], Value::from(false));
    }
}
