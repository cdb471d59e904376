use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use super::{CameraSource, CaptureDriver, CaptureHandle, DeviceInfo, DriverKind};
use crate::frame::Frame;

/// Serves a fixed picture for `stub://` URLs and for a chosen set of local
/// indices. Used on benches without cameras and in tests.
#[derive(Clone)]
pub struct SyntheticDriver {
    picture: RgbImage,
    indices: Vec<u32>,
}

impl SyntheticDriver {
    pub fn new(picture: RgbImage) -> Self {
        Self {
            picture,
            indices: Vec::new(),
        }
    }

    /// Mid-gray 640x480 frames.
    pub fn gray() -> Self {
        Self::new(RgbImage::from_pixel(640, 480, Rgb([128, 128, 128])))
    }

    /// Also answer for these local device indices.
    pub fn with_indices(mut self, indices: &[u32]) -> Self {
        self.indices = indices.to_vec();
        self
    }
}

impl CaptureDriver for SyntheticDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Synthetic
    }

    fn accepts(&self, source: &CameraSource) -> bool {
        match source {
            CameraSource::Local(_) => true,
            CameraSource::Network(url) => url.starts_with("stub://"),
        }
    }

    fn open(&self, source: &CameraSource) -> Result<Box<dyn CaptureHandle>> {
        if let CameraSource::Local(index) = source {
            if !self.indices.contains(index) {
                return Err(anyhow!("no synthetic camera at index {}", index));
            }
        }
        Ok(Box::new(SyntheticHandle {
            picture: self.picture.clone(),
        }))
    }

    fn describe(&self, index: u32) -> Result<DeviceInfo> {
        if !self.indices.contains(&index) {
            return Err(anyhow!("no synthetic camera at index {}", index));
        }
        Ok(DeviceInfo {
            index,
            name: format!("Synthetic Camera {}", index),
            kind: "synthetic".to_string(),
        })
    }
}

struct SyntheticHandle {
    picture: RgbImage,
}

impl CaptureHandle for SyntheticHandle {
    fn is_open(&self) -> bool {
        true
    }

    fn read(&mut self) -> Result<Frame> {
        Ok(Frame::new(self.picture.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_only_configured_indices() {
        let driver = SyntheticDriver::gray().with_indices(&[1]);
        assert!(driver.open(&CameraSource::Local(0)).is_err());
        let mut handle = driver.open(&CameraSource::Local(1)).unwrap();
        assert_eq!(handle.read().unwrap().width(), 640);
        assert!(driver
            .open(&CameraSource::Network("stub://bench".into()))
            .is_ok());
        assert_eq!(driver.describe(1).unwrap().name, "Synthetic Camera 1");
    }
}
