//! Network sources: RTSP through an `ffmpeg` child process re-encoding to an
//! MJPEG pipe, and HTTP cameras serving MJPEG or single JPEG snapshots.

use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use super::{CameraSource, CaptureDriver, CaptureHandle, DriverKind};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 8 * 1024 * 1024;

/// Splits a byte stream into JPEG images on SOI/EOI markers.
pub struct JpegStream<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: Read> JpegStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    pub fn next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 16 * 1024];
        loop {
            if let Some((start, end)) = jpeg_bounds(&self.buffer) {
                let jpeg = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(jpeg);
            }

            let read = self.reader.read(&mut chunk).context("read jpeg stream")?;
            if read == 0 {
                return Err(anyhow!("jpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            // A runaway buffer means we lost sync; keep only the tail.
            if self.buffer.len() > MAX_JPEG_BYTES {
                let drain = self.buffer.len() - 2;
                self.buffer.drain(..drain);
            }
        }
    }
}

fn jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

fn decode_jpeg(bytes: &[u8]) -> Result<Frame> {
    let image = image::load_from_memory(bytes).context("decode jpeg frame")?;
    Ok(Frame::new(image.into_rgb8()))
}

// ----------------------------------------------------------------------------
// RTSP via ffmpeg
// ----------------------------------------------------------------------------

pub struct RtspDriver {
    ffmpeg: String,
    timeout: Duration,
}

impl RtspDriver {
    pub fn new(ffmpeg: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            timeout,
        }
    }
}

impl CaptureDriver for RtspDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::RtspFfmpeg
    }

    fn accepts(&self, source: &CameraSource) -> bool {
        matches!(source, CameraSource::Network(url) if url.starts_with("rtsp://") || url.starts_with("rtsps://"))
    }

    fn open(&self, source: &CameraSource) -> Result<Box<dyn CaptureHandle>> {
        let CameraSource::Network(url) = source else {
            anyhow::bail!("rtsp driver needs a network url, got {}", source);
        };
        // ffmpeg takes the socket timeout in microseconds.
        let timeout_us = self.timeout.as_micros().to_string();
        let mut child = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-rtsp_transport", "tcp"])
            .args(["-timeout", &timeout_us, "-i", url])
            .args(["-an", "-f", "image2pipe", "-c:v", "mjpeg", "-q:v", "4", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn {}", self.ffmpeg))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("ffmpeg stdout not captured"))?;
        let mut handle = RtspHandle {
            child,
            stream: JpegStream::new(stdout),
            pending: None,
        };
        // The stream only counts as open once a picture has come through.
        let first = handle.next_frame().with_context(|| format!("no frames from {}", url))?;
        handle.pending = Some(first);
        log::info!("rtsp stream {} opened", url);
        Ok(Box::new(handle))
    }
}

struct RtspHandle {
    child: Child,
    stream: JpegStream<ChildStdout>,
    pending: Option<Frame>,
}

impl RtspHandle {
    fn next_frame(&mut self) -> Result<Frame> {
        let jpeg = self.stream.next_jpeg()?;
        decode_jpeg(&jpeg)
    }
}

impl CaptureHandle for RtspHandle {
    fn is_open(&self) -> bool {
        true
    }

    fn read(&mut self) -> Result<Frame> {
        match self.pending.take() {
            Some(frame) => Ok(frame),
            None => self.next_frame(),
        }
    }
}

impl Drop for RtspHandle {
    fn drop(&mut self) {
        if let Err(err) = self.child.kill() {
            log::debug!("ffmpeg already gone: {}", err);
        }
        let _ = self.child.wait();
    }
}

// ----------------------------------------------------------------------------
// HTTP MJPEG / snapshot
// ----------------------------------------------------------------------------

pub struct HttpMjpegDriver {
    agent: ureq::Agent,
}

impl HttpMjpegDriver {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(timeout)
                .timeout_read(timeout)
                .build(),
        }
    }
}

impl CaptureDriver for HttpMjpegDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::HttpMjpeg
    }

    fn accepts(&self, source: &CameraSource) -> bool {
        matches!(source, CameraSource::Network(url) if url.starts_with("http://") || url.starts_with("https://"))
    }

    fn open(&self, source: &CameraSource) -> Result<Box<dyn CaptureHandle>> {
        let CameraSource::Network(url) = source else {
            anyhow::bail!("http driver needs a network url, got {}", source);
        };
        let response = self
            .agent
            .get(url)
            .call()
            .with_context(|| format!("connect to {}", url))?;
        let multipart = response
            .header("Content-Type")
            .unwrap_or("")
            .to_ascii_lowercase()
            .contains("multipart");

        let mode = if multipart {
            let reader: Box<dyn Read + Send> = response.into_reader();
            HttpMode::Mjpeg(JpegStream::new(reader))
        } else {
            let mut bytes = Vec::new();
            response
                .into_reader()
                .take(MAX_JPEG_BYTES as u64)
                .read_to_end(&mut bytes)
                .context("read jpeg snapshot")?;
            decode_jpeg(&bytes).with_context(|| format!("{} did not serve an image", url))?;
            HttpMode::Snapshot
        };
        log::info!("http camera {} opened ({})", url, if multipart { "mjpeg" } else { "snapshot" });
        Ok(Box::new(HttpHandle {
            agent: self.agent.clone(),
            url: url.clone(),
            mode,
        }))
    }
}

enum HttpMode {
    Mjpeg(JpegStream<Box<dyn Read + Send>>),
    Snapshot,
}

struct HttpHandle {
    agent: ureq::Agent,
    url: String,
    mode: HttpMode,
}

impl CaptureHandle for HttpHandle {
    fn is_open(&self) -> bool {
        true
    }

    fn read(&mut self) -> Result<Frame> {
        let jpeg = match &mut self.mode {
            HttpMode::Mjpeg(stream) => stream.next_jpeg()?,
            HttpMode::Snapshot => {
                let response = self
                    .agent
                    .get(&self.url)
                    .call()
                    .with_context(|| format!("fetch snapshot from {}", self.url))?;
                let mut bytes = Vec::new();
                response
                    .into_reader()
                    .take(MAX_JPEG_BYTES as u64)
                    .read_to_end(&mut bytes)
                    .context("read jpeg snapshot")?;
                bytes
            }
        };
        decode_jpeg(&jpeg)
    }
}
