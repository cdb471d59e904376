use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};

use super::{BackendKind, GateBackend};

/// Network relay board switched with `GET /relay/on` and `GET /relay/off`.
pub struct HttpRelay {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpRelay {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            base_url: format!("http://{}:{}", host, port),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn switch(&self, state: &str) -> Result<()> {
        let url = format!("{}/relay/{}", self.base_url, state);
        let response = self
            .agent
            .get(&url)
            .call()
            .with_context(|| format!("relay request {}", url))?;
        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(anyhow!("relay {} answered {}", url, status));
        }
        Ok(())
    }
}

impl GateBackend for HttpRelay {
    fn kind(&self) -> BackendKind {
        BackendKind::HttpRelay
    }

    fn open(&mut self) -> Result<()> {
        self.switch("on")
    }

    fn close(&mut self) -> Result<()> {
        self.switch("off")
    }

    fn details(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("url".into(), Value::from(self.base_url.clone()));
        map
    }
}
