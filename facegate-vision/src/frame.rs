use std::io::Cursor;
use std::time::Instant;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, RgbImage};

/// A single captured picture. Owned by whoever pulled it; capture streams keep
/// no reference after handing it out.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }

    pub fn from_raw(width: u32, height: u32, rgb: Vec<u8>) -> Result<Self> {
        let image = RgbImage::from_raw(width, height, rgb)
            .ok_or_else(|| anyhow::anyhow!("rgb buffer does not match {}x{}", width, height))?;
        Ok(Self::new(image))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// JPEG-encode the frame for callers that want image bytes.
    pub fn to_jpeg(&self) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(self.image.clone())
            .write_to(&mut out, ImageFormat::Jpeg)
            .context("encode frame as jpeg")?;
        Ok(out.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_rejects_short_buffer() {
        assert!(Frame::from_raw(4, 4, vec![0; 10]).is_err());
        let frame = Frame::from_raw(2, 2, vec![7; 12]).unwrap();
        assert_eq!((frame.width(), frame.height()), (2, 2));
    }

    #[test]
    fn jpeg_bytes_decode_back() {
        let frame = Frame::new(RgbImage::from_pixel(16, 8, image::Rgb([200, 10, 10])));
        let bytes = frame.to_jpeg().unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }
}
