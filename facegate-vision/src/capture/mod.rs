//! Frame capture drivers.
//!
//! A [`CaptureDriver`] knows one way of talking to a video device and hands
//! out an exclusively owned [`CaptureHandle`] per connection. Releasing a
//! handle is dropping it. [`DriverSet`] ranks drivers for a source: local
//! device indices go through the platform list in order, network URLs go to
//! the single driver that accepts their scheme.

mod network;
mod synthetic;
mod v4l2;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

pub use network::{HttpMjpegDriver, JpegStream, RtspDriver};
pub use synthetic::SyntheticDriver;
pub use v4l2::{V4l2Driver, V4l2Mode};

/// Where a camera's pictures come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CameraSource {
    Local(u32),
    Network(String),
}

impl CameraSource {
    pub fn local_index(&self) -> Option<u32> {
        match self {
            CameraSource::Local(index) => Some(*index),
            CameraSource::Network(_) => None,
        }
    }
}

impl FromStr for CameraSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow!("empty camera source"));
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(CameraSource::Local(s.parse()?));
        }
        Ok(CameraSource::Network(s.to_string()))
    }
}

impl TryFrom<String> for CameraSource {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CameraSource> for String {
    fn from(source: CameraSource) -> Self {
        source.to_string()
    }
}

impl fmt::Display for CameraSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSource::Local(index) => write!(f, "{}", index),
            CameraSource::Network(url) => f.write_str(url),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    V4l2Mmap,
    V4l2UserPtr,
    RtspFfmpeg,
    HttpMjpeg,
    /// Test and simulation drivers.
    Synthetic,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverKind::V4l2Mmap => "v4l2-mmap",
            DriverKind::V4l2UserPtr => "v4l2-userptr",
            DriverKind::RtspFfmpeg => "rtsp-ffmpeg",
            DriverKind::HttpMjpeg => "http-mjpeg",
            DriverKind::Synthetic => "synthetic",
        };
        f.write_str(name)
    }
}

/// What probing a local index revealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub index: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A live connection to one device. Dropping it releases the device.
pub trait CaptureHandle: Send {
    /// Whether the backend reports the device as opened and streaming.
    fn is_open(&self) -> bool;

    /// Blocking read of the next frame.
    fn read(&mut self) -> Result<Frame>;
}

pub trait CaptureDriver: Send + Sync {
    fn kind(&self) -> DriverKind;

    fn accepts(&self, source: &CameraSource) -> bool;

    fn open(&self, source: &CameraSource) -> Result<Box<dyn CaptureHandle>>;

    /// Identify a local device without streaming from it.
    fn describe(&self, index: u32) -> Result<DeviceInfo> {
        Err(anyhow!("{} cannot probe local index {}", self.kind(), index))
    }
}

/// Ranked drivers for local devices plus the network protocol handlers.
#[derive(Clone)]
pub struct DriverSet {
    local: Vec<Arc<dyn CaptureDriver>>,
    network: Vec<Arc<dyn CaptureDriver>>,
}

impl DriverSet {
    pub fn new(local: Vec<Arc<dyn CaptureDriver>>, network: Vec<Arc<dyn CaptureDriver>>) -> Self {
        Self { local, network }
    }

    /// Linux order: memory-mapped V4L2 streaming, then user-pointer streaming
    /// for drivers whose mmap path misbehaves. `stub://` URLs get synthetic
    /// frames.
    pub fn platform(options: DriverOptions) -> Self {
        Self::new(
            vec![
                Arc::new(V4l2Driver::new(V4l2Mode::Mmap).with_timeout(options.read_timeout)),
                Arc::new(V4l2Driver::new(V4l2Mode::UserPtr).with_timeout(options.read_timeout)),
            ],
            vec![
                Arc::new(RtspDriver::new(options.ffmpeg.clone(), options.timeout)),
                Arc::new(HttpMjpegDriver::new(options.timeout)),
                Arc::new(SyntheticDriver::gray()),
            ],
        )
    }

    /// Drivers to try for `source`, in order.
    pub fn candidates(&self, source: &CameraSource) -> Vec<Arc<dyn CaptureDriver>> {
        match source {
            CameraSource::Local(_) => self
                .local
                .iter()
                .filter(|d| d.accepts(source))
                .cloned()
                .collect(),
            CameraSource::Network(_) => self
                .network
                .iter()
                .find(|d| d.accepts(source))
                .cloned()
                .into_iter()
                .collect(),
        }
    }

    /// The preferred local driver, used for probing indices.
    pub fn primary(&self) -> Option<&Arc<dyn CaptureDriver>> {
        self.local.first()
    }
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub ffmpeg: String,
    /// Connect and read bound for network sources.
    pub timeout: std::time::Duration,
    /// How long a local read may wait for the next buffer.
    pub read_timeout: std::time::Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            timeout: std::time::Duration::from_secs(10),
            read_timeout: std::time::Duration::from_secs(5),
        }
    }
}
