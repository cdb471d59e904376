use anyhow::{anyhow, Context, Result};
use facegate_vision::{CameraSource, MatcherConfig, ModelPaths};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_CONFIG_PATH").unwrap_or("/usr/local/etc/facegate/config.toml"))
});

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vision: VisionConfig,
    pub cameras: CameraConfig,
    pub gate: GateConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub models: ModelPaths,
    #[serde(flatten)]
    pub matcher: MatcherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub entry: CameraSource,
    pub exit: CameraSource,
    /// Local indices probed by `cameras`, starting at 0.
    pub probe_limit: u32,
    pub ffmpeg: String,
    pub network_timeout_secs: u64,
    /// A local read that waits longer than this fails instead of hanging.
    pub read_timeout_secs: u64,
    /// Upper bound for each OS recovery step during a reset.
    pub recovery_timeout_secs: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            entry: CameraSource::Local(0),
            exit: CameraSource::Local(1),
            probe_limit: 10,
            ffmpeg: "ffmpeg".to_string(),
            network_timeout_secs: 10,
            read_timeout_secs: 5,
            recovery_timeout_secs: 10,
        }
    }
}

impl CameraConfig {
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs.max(1))
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    #[default]
    Mock,
    Http,
    Serial,
}

impl FromStr for BackendChoice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "http" => Ok(Self::Http),
            "serial" => Ok(Self::Serial),
            other => Err(anyhow!("unknown gate backend {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub backend: BackendChoice,
    /// Seconds the gate stays open before closing itself.
    pub open_duration: u64,
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub serial_port: String,
    pub baud_rate: u32,
    pub write_timeout_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Mock,
            open_duration: 5,
            host: "192.168.1.50".to_string(),
            port: 80,
            request_timeout_secs: 5,
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            write_timeout_ms: 1000,
        }
    }
}

impl GateConfig {
    pub fn auto_close(&self) -> Duration {
        Duration::from_secs(self.open_duration)
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let mut cfg = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
    } else {
        Config::default()
    };
    cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("{}={:?}: {}", key, value, e))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{}={:?}: expected a boolean", key, value)),
    }
}

impl Config {
    /// Overlay `FACEGATE_*` variables on top of the file values.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let matcher = &mut self.vision.matcher;
        if let Some(v) = lookup("FACEGATE_DETECTION_MODEL") {
            matcher.detection = parse("FACEGATE_DETECTION_MODEL", &v)?;
        }
        if let Some(v) = lookup("FACEGATE_ENCODING_MODEL") {
            matcher.encoding = parse("FACEGATE_ENCODING_MODEL", &v)?;
        }
        if let Some(v) = lookup("FACEGATE_MATCH_THRESHOLD") {
            matcher.threshold = parse("FACEGATE_MATCH_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("FACEGATE_NIGHT_MODE_THRESHOLD") {
            matcher.night_mode_threshold = parse("FACEGATE_NIGHT_MODE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("FACEGATE_ENABLE_ENHANCEMENT") {
            matcher.enhancement = parse_bool("FACEGATE_ENABLE_ENHANCEMENT", &v)?;
        }

        if let Some(v) = lookup("FACEGATE_ENTRY_CAMERA") {
            self.cameras.entry = parse("FACEGATE_ENTRY_CAMERA", &v)?;
        }
        if let Some(v) = lookup("FACEGATE_EXIT_CAMERA") {
            self.cameras.exit = parse("FACEGATE_EXIT_CAMERA", &v)?;
        }

        let gate = &mut self.gate;
        if let Some(v) = lookup("FACEGATE_GATE_BACKEND") {
            gate.backend = parse("FACEGATE_GATE_BACKEND", &v)?;
        }
        if let Some(v) = lookup("FACEGATE_GATE_HOST") {
            gate.host = v;
        }
        if let Some(v) = lookup("FACEGATE_GATE_PORT") {
            gate.port = parse("FACEGATE_GATE_PORT", &v)?;
        }
        if let Some(v) = lookup("FACEGATE_GATE_SERIAL_PORT") {
            gate.serial_port = v;
        }
        if let Some(v) = lookup("FACEGATE_GATE_BAUD_RATE") {
            gate.baud_rate = parse("FACEGATE_GATE_BAUD_RATE", &v)?;
        }
        if let Some(v) = lookup("FACEGATE_GATE_OPEN_DURATION") {
            gate.open_duration = parse("FACEGATE_GATE_OPEN_DURATION", &v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_vision::{DetectionModel, EncodingModel};
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg.cameras.entry, CameraSource::Local(0));
        assert_eq!(cfg.cameras.exit, CameraSource::Local(1));
        assert_eq!(cfg.gate.auto_close(), Duration::from_secs(5));
        assert_eq!(cfg.vision.matcher.night_mode_threshold, 50.0);
        assert_eq!(cfg.cameras.read_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[vision]
detection = "cnn"
threshold = 0.8

[cameras]
exit = "rtsp://10.0.0.9/stream"

[gate]
backend = "http"
port = 8080
"#,
        )
        .unwrap();

        let cfg: Config = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(cfg.vision.matcher.detection, DetectionModel::Accurate);
        assert_eq!(cfg.vision.matcher.threshold, 0.8);
        assert!(cfg.vision.matcher.enhancement);
        assert_eq!(
            cfg.cameras.exit,
            CameraSource::Network("rtsp://10.0.0.9/stream".into())
        );
        assert_eq!(cfg.cameras.entry, CameraSource::Local(0));
        assert_eq!(cfg.gate.backend, BackendChoice::Http);
        assert_eq!(cfg.gate.port, 8080);
        assert_eq!(cfg.gate.host, "192.168.1.50");
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut cfg = Config::default();
        cfg.cameras.entry = CameraSource::Local(3);
        save_config(&cfg, Some(&path)).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let back: Config = toml::from_str(&raw).unwrap();
        assert_eq!(back.cameras.entry, CameraSource::Local(3));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(env(&[
            ("FACEGATE_DETECTION_MODEL", "accurate"),
            ("FACEGATE_ENCODING_MODEL", "small"),
            ("FACEGATE_MATCH_THRESHOLD", "0.45"),
            ("FACEGATE_ENABLE_ENHANCEMENT", "false"),
            ("FACEGATE_ENTRY_CAMERA", "2"),
            ("FACEGATE_GATE_BACKEND", "serial"),
            ("FACEGATE_GATE_SERIAL_PORT", "/dev/ttyACM0"),
            ("FACEGATE_GATE_OPEN_DURATION", "12"),
        ]))
        .unwrap();

        assert_eq!(cfg.vision.matcher.detection, DetectionModel::Accurate);
        assert_eq!(cfg.vision.matcher.encoding, EncodingModel::Small);
        assert_eq!(cfg.vision.matcher.threshold, 0.45);
        assert!(!cfg.vision.matcher.enhancement);
        assert_eq!(cfg.cameras.entry, CameraSource::Local(2));
        assert_eq!(cfg.gate.backend, BackendChoice::Serial);
        assert_eq!(cfg.gate.serial_port, "/dev/ttyACM0");
        assert_eq!(cfg.gate.auto_close(), Duration::from_secs(12));
    }

    #[test]
    fn bad_env_values_are_errors() {
        let mut cfg = Config::default();
        assert!(cfg
            .apply_env_overrides(env(&[("FACEGATE_GATE_BACKEND", "gpio")]))
            .is_err());
        assert!(cfg
            .apply_env_overrides(env(&[("FACEGATE_GATE_PORT", "eighty")]))
            .is_err());
        assert!(cfg
            .apply_env_overrides(env(&[("FACEGATE_ENABLE_ENHANCEMENT", "maybe")]))
            .is_err());
    }
}
