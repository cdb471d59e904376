//! Byte-level face operations and their JSON reports.

use std::sync::Arc;

use facegate_vision::{decode_image, FaceEncoding, FaceLocation, FaceMatcher, MatchResult};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::camera::{CameraManager, Role};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct DetectReport {
    pub faces_detected: usize,
    pub face_locations: Vec<FaceLocation>,
    pub is_night_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeReport {
    pub encoding: Vec<f32>,
}

impl EncodeReport {
    pub fn to_encoding(&self) -> anyhow::Result<FaceEncoding> {
        FaceEncoding::new(self.encoding.clone())
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

pub async fn detect(matcher: Arc<FaceMatcher>, bytes: Vec<u8>) -> Result<DetectReport> {
    blocking(move || {
        let image = decode(&bytes)?;
        let prepared = matcher.preprocess(image);
        let (width, height) = prepared.image.dimensions();
        let face_locations: Vec<_> = matcher
            .detect(&prepared.image)?
            .iter()
            .map(|d| d.location(width, height))
            .collect();
        Ok(DetectReport {
            faces_detected: face_locations.len(),
            face_locations,
            is_night_mode: prepared.night_mode,
        })
    })
    .await
}

fn decode(bytes: &[u8]) -> Result<RgbImage> {
    Ok(decode_image(bytes)?.into_rgb8())
}

/// Preprocess and encode the first face in a decoded image.
fn encode_image(matcher: &FaceMatcher, image: RgbImage) -> Result<FaceEncoding> {
    matcher.encode_frame(image)?.ok_or(Error::NoFace)
}

pub async fn encode(matcher: Arc<FaceMatcher>, bytes: Vec<u8>) -> Result<EncodeReport> {
    blocking(move || {
        let encoding = encode_image(&matcher, decode(&bytes)?)?;
        Ok(EncodeReport {
            encoding: encoding.to_vec(),
        })
    })
    .await
}

pub async fn compare(matcher: Arc<FaceMatcher>, a: Vec<u8>, b: Vec<u8>) -> Result<MatchResult> {
    blocking(move || {
        // Both inputs must decode before any face work starts.
        let (a, b) = (decode(&a)?, decode(&b)?);
        let first = encode_image(&matcher, a)?;
        let second = encode_image(&matcher, b)?;
        Ok(matcher.compare(&first, &second, None))
    })
    .await
}

/// Current frame of `role` as JPEG bytes.
pub async fn snapshot(cameras: &CameraManager, role: Role) -> Result<Vec<u8>> {
    let frame = cameras.get_frame(role).await.ok_or(Error::NoFrame(role))?;
    blocking(move || Ok(frame.to_jpeg()?)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result as AnyResult;
    use facegate_vision::pipeline::{DetectionModel, EncodingModel, FaceDetector, FaceEncoder};
    use facegate_vision::{Detection, MatcherConfig, ENCODING_DIM};
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    /// Finds one face unless the picture is pure black.
    struct CornerDetector;

    impl FaceDetector for CornerDetector {
        fn detect(&mut self, img: &RgbImage, _: DetectionModel) -> AnyResult<Vec<Detection>> {
            if img.pixels().all(|p| p.0 == [0, 0, 0]) {
                return Ok(Vec::new());
            }
            Ok(vec![Detection {
                bbox: [2.0, 4.0, 10.0, 12.0],
                score: 0.95,
                landmarks: None,
            }])
        }
    }

    /// Maps the red channel of the top-left pixel onto the unit circle.
    struct RedEncoder;

    impl FaceEncoder for RedEncoder {
        fn encode(&mut self, img: &RgbImage, _: &Detection, _: EncodingModel) -> AnyResult<FaceEncoding> {
            let angle = img.get_pixel(0, 0).0[0] as f32 / 255.0 * std::f32::consts::FRAC_PI_2;
            let mut v = vec![0.0; ENCODING_DIM];
            v[0] = angle.cos();
            v[1] = angle.sin();
            FaceEncoding::normalized(v)
        }
    }

    fn matcher() -> Arc<FaceMatcher> {
        let config = MatcherConfig {
            enhancement: false,
            ..MatcherConfig::default()
        };
        Arc::new(FaceMatcher::new(
            config,
            Box::new(CornerDetector),
            Box::new(RedEncoder),
        ))
    }

    fn png(color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(32, 32, Rgb(color));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[tokio::test]
    async fn detect_reports_locations_and_night_mode() {
        let report = detect(matcher(), png([200, 180, 160])).await.unwrap();
        assert_eq!(report.faces_detected, 1);
        assert!(!report.is_night_mode);
        let loc = report.face_locations[0];
        assert_eq!((loc.top, loc.right, loc.bottom, loc.left), (4, 12, 16, 2));

        let dark = detect(matcher(), png([10, 10, 10])).await.unwrap();
        assert!(dark.is_night_mode);
    }

    #[tokio::test]
    async fn encode_without_face_is_no_face() {
        let err = encode(matcher(), png([0, 0, 0])).await.unwrap_err();
        assert!(matches!(err, Error::NoFace));

        let report = encode(matcher(), png([255, 255, 255])).await.unwrap();
        assert_eq!(report.encoding.len(), ENCODING_DIM);
        assert!(report.to_encoding().is_ok());
    }

    #[tokio::test]
    async fn undecodable_input_is_invalid_image() {
        let err = detect(matcher(), b"GIF89a-not-really".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
        let err = compare(matcher(), vec![0; 16], png([200, 200, 200]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
    }

    #[tokio::test]
    async fn compare_checks_both_images_before_looking_for_faces() {
        let faceless = png([0, 0, 0]);
        let err = compare(matcher(), faceless.clone(), b"not an image".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));

        let err = compare(matcher(), faceless, png([200, 200, 200]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoFace));
    }

    #[tokio::test]
    async fn compare_is_symmetric() {
        let a = png([250, 200, 200]);
        let b = png([60, 200, 200]);
        let ab = compare(matcher(), a.clone(), b.clone()).await.unwrap();
        let ba = compare(matcher(), b, a.clone()).await.unwrap();
        assert_eq!(ab.is_match, ba.is_match);
        assert!((ab.distance - ba.distance).abs() < 1e-6);

        let same = compare(matcher(), a.clone(), a).await.unwrap();
        assert!(same.is_match);
        assert!(same.distance < 1e-6);
        assert!((same.confidence - 1.0).abs() < 1e-6);
    }
}
