use std::time::Duration;

use anyhow::{Context, Result};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use super::{CameraSource, CaptureDriver, CaptureHandle, DeviceInfo, DriverKind};
use crate::frame::Frame;

const BUFFER_COUNT: u32 = 4;

/// Buffer exchange strategy with the kernel driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum V4l2Mode {
    Mmap,
    UserPtr,
}

pub struct V4l2Driver {
    mode: V4l2Mode,
    read_timeout: Duration,
}

impl V4l2Driver {
    pub fn new(mode: V4l2Mode) -> Self {
        Self {
            mode,
            read_timeout: Duration::from_secs(5),
        }
    }

    /// A wedged device fails the read after `timeout` instead of blocking.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

fn device_path(index: u32) -> String {
    format!("/dev/video{}", index)
}

impl CaptureDriver for V4l2Driver {
    fn kind(&self) -> DriverKind {
        match self.mode {
            V4l2Mode::Mmap => DriverKind::V4l2Mmap,
            V4l2Mode::UserPtr => DriverKind::V4l2UserPtr,
        }
    }

    fn accepts(&self, source: &CameraSource) -> bool {
        matches!(source, CameraSource::Local(_))
    }

    fn open(&self, source: &CameraSource) -> Result<Box<dyn CaptureHandle>> {
        let index = source
            .local_index()
            .ok_or_else(|| anyhow::anyhow!("v4l2 needs a device index, got {}", source))?;
        let path = device_path(index);
        let dev = Device::with_path(&path).with_context(|| format!("open {}", path))?;

        let mut fmt = dev.format().context("get format")?;
        // Prefer RGB, then YUYV, then MJPG; otherwise take what the device has.
        for fourcc in [b"RGB3", b"YUYV", b"MJPG"] {
            let desired = Format::new(fmt.width, fmt.height, FourCC::new(fourcc));
            fmt = dev.set_format(&desired).unwrap_or(fmt);
            if fmt.fourcc == FourCC::new(fourcc) {
                break;
            }
        }

        let stream = match self.mode {
            V4l2Mode::Mmap => {
                let mut s =
                    v4l::io::mmap::Stream::with_buffers(&dev, Type::VideoCapture, BUFFER_COUNT)
                        .context("mmap stream")?;
                s.set_timeout(self.read_timeout);
                Stream::Mmap(s)
            }
            V4l2Mode::UserPtr => {
                let mut s =
                    v4l::io::userptr::Stream::with_buffers(&dev, Type::VideoCapture, BUFFER_COUNT)
                        .context("userptr stream")?;
                s.set_timeout(self.read_timeout);
                Stream::UserPtr(s)
            }
        };
        log::info!(
            "{} opened via {}: {}x{} {:?}",
            path,
            self.kind(),
            fmt.width,
            fmt.height,
            fmt.fourcc
        );

        Ok(Box::new(V4l2Handle {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        }))
    }

    fn describe(&self, index: u32) -> Result<DeviceInfo> {
        let path = device_path(index);
        let dev = Device::with_path(&path).with_context(|| format!("open {}", path))?;
        let caps = dev.query_caps().context("query capabilities")?;
        // Metadata nodes share the numbering but cannot capture.
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            anyhow::bail!("{} is not a capture device", path);
        }
        dev.format().context("get format")?;

        let kind = if caps.bus.starts_with("usb") {
            "usb"
        } else if caps.bus.starts_with("platform") {
            "builtin"
        } else {
            "v4l2"
        };
        Ok(DeviceInfo {
            index,
            name: caps.card,
            kind: kind.to_string(),
        })
    }
}

enum Stream {
    Mmap(v4l::io::mmap::Stream<'static>),
    UserPtr(v4l::io::userptr::Stream),
}

struct V4l2Handle {
    stream: Stream,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl CaptureHandle for V4l2Handle {
    fn is_open(&self) -> bool {
        true
    }

    fn read(&mut self) -> Result<Frame> {
        let data = match &mut self.stream {
            Stream::Mmap(s) => s.next().context("capture frame")?.0,
            Stream::UserPtr(s) => s.next().context("capture frame")?.0,
        };
        log::trace!(
            "captured frame: {}x{} {:?} len={}",
            self.width,
            self.height,
            self.fourcc,
            data.len()
        );
        to_frame(self.fourcc, self.width, self.height, data)
    }
}

fn to_frame(fourcc: FourCC, width: u32, height: u32, data: &[u8]) -> Result<Frame> {
    if fourcc == FourCC::new(b"MJPG") {
        let image = image::load_from_memory(data).context("decode mjpg frame")?;
        return Ok(Frame::new(image.into_rgb8()));
    }
    let mut rgb = if fourcc == FourCC::new(b"RGB3") {
        data.to_vec()
    } else if fourcc == FourCC::new(b"YUYV") {
        yuyv_to_rgb(width, height, data)?
    } else if fourcc == FourCC::new(b"GREY") {
        grey_to_rgb(width, height, data)?
    } else {
        anyhow::bail!("unsupported pixel format {:?}", fourcc);
    };
    let expected = (width * height * 3) as usize;
    if rgb.len() < expected {
        anyhow::bail!("short frame: got {} bytes, expected {}", rgb.len(), expected);
    }
    rgb.truncate(expected);
    Frame::from_raw(width, height, rgb)
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        anyhow::bail!("short YUYV buffer");
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        anyhow::bail!("short GREY buffer");
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}
