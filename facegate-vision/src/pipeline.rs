use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::enhance::{self, ClaheParams};
use crate::face::{Detection, FaceEncoding, MatchResult};
use crate::model::{self, ModelPaths};
use crate::sface::SfaceEncoder;
use crate::yunet::YunetDetector;

/// Speed/accuracy trade-off for face detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionModel {
    #[default]
    #[serde(alias = "hog")]
    Fast,
    #[serde(alias = "cnn")]
    Accurate,
}

impl FromStr for DetectionModel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fast" | "hog" => Ok(Self::Fast),
            "accurate" | "cnn" => Ok(Self::Accurate),
            other => Err(anyhow!("unknown detection model {:?}", other)),
        }
    }
}

/// How many landmarks drive alignment before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingModel {
    Small,
    #[default]
    Large,
}

impl FromStr for EncodingModel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "small" => Ok(Self::Small),
            "large" => Ok(Self::Large),
            other => Err(anyhow!("unknown encoding model {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub detection: DetectionModel,
    pub encoding: EncodingModel,
    /// Largest distance still accepted as the same person.
    pub threshold: f32,
    /// Mean brightness below which a frame counts as low-light.
    pub night_mode_threshold: f64,
    pub enhancement: bool,
    pub clahe_clip_limit: f32,
    pub clahe_grid: u32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            detection: DetectionModel::Fast,
            encoding: EncodingModel::Large,
            threshold: 1.0,
            night_mode_threshold: 50.0,
            enhancement: true,
            clahe_clip_limit: 3.0,
            clahe_grid: 8,
        }
    }
}

pub trait FaceDetector: Send {
    fn detect(&mut self, img: &RgbImage, model: DetectionModel) -> Result<Vec<Detection>>;
}

pub trait FaceEncoder: Send {
    fn encode(&mut self, img: &RgbImage, face: &Detection, model: EncodingModel)
        -> Result<FaceEncoding>;
}

/// Output of the first pipeline stage.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub image: RgbImage,
    pub brightness: f64,
    /// Whether the input frame was classified as low-light.
    pub night_mode: bool,
}

/// preprocess -> detect -> encode -> compare, one frame at a time.
///
/// Model sessions need exclusive access while running, so each sits behind
/// its own lock; everything else is stateless.
pub struct FaceMatcher {
    config: MatcherConfig,
    detector: Mutex<Box<dyn FaceDetector>>,
    encoder: Mutex<Box<dyn FaceEncoder>>,
}

impl FaceMatcher {
    pub fn new(
        config: MatcherConfig,
        detector: Box<dyn FaceDetector>,
        encoder: Box<dyn FaceEncoder>,
    ) -> Self {
        Self {
            config,
            detector: Mutex::new(detector),
            encoder: Mutex::new(encoder),
        }
    }

    /// YuNet + SFace loaded from disk.
    pub fn from_models(config: MatcherConfig, paths: &ModelPaths) -> Result<Self> {
        let detector = YunetDetector::new(model::detector_session(paths)?);
        let encoder = SfaceEncoder::new(model::encoder_session(paths)?);
        Ok(Self::new(config, Box::new(detector), Box::new(encoder)))
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn is_night_mode(&self, img: &RgbImage) -> bool {
        enhance::mean_brightness(img) < self.config.night_mode_threshold
    }

    pub fn preprocess(&self, image: RgbImage) -> Preprocessed {
        let brightness = enhance::mean_brightness(&image);
        let night_mode = brightness < self.config.night_mode_threshold;
        let image = if self.config.enhancement && night_mode {
            log::debug!("low-light frame (brightness {:.1}), equalising", brightness);
            enhance::enhance_low_light(
                &image,
                ClaheParams {
                    clip_limit: self.config.clahe_clip_limit,
                    grid: self.config.clahe_grid,
                },
            )
        } else {
            image
        };
        Preprocessed {
            image,
            brightness,
            night_mode,
        }
    }

    pub fn detect(&self, img: &RgbImage) -> Result<Vec<Detection>> {
        let mut detector = self
            .detector
            .lock()
            .map_err(|_| anyhow!("face detector lock poisoned"))?;
        detector.detect(img, self.config.detection)
    }

    /// Encode `face`, or the first detected face when none is given.
    /// `Ok(None)` means there was no face to encode.
    pub fn encode(&self, img: &RgbImage, face: Option<&Detection>) -> Result<Option<FaceEncoding>> {
        let detected;
        let face = match face {
            Some(face) => face,
            None => {
                detected = self.detect(img)?;
                match detected.first() {
                    Some(face) => face,
                    None => return Ok(None),
                }
            }
        };
        let mut encoder = self
            .encoder
            .lock()
            .map_err(|_| anyhow!("face encoder lock poisoned"))?;
        encoder.encode(img, face, self.config.encoding).map(Some)
    }

    /// Preprocess then encode the first face of a raw frame.
    pub fn encode_frame(&self, img: RgbImage) -> Result<Option<FaceEncoding>> {
        let prepared = self.preprocess(img);
        self.encode(&prepared.image, None)
    }

    pub fn compare(&self, a: &FaceEncoding, b: &FaceEncoding, threshold: Option<f32>) -> MatchResult {
        MatchResult::from_distance(a.distance(b), threshold.unwrap_or(self.config.threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::ENCODING_DIM;
    use image::Rgb;
    use std::sync::{Arc, Mutex as StdMutex};

    struct FixedDetector(Vec<Detection>);

    impl FaceDetector for FixedDetector {
        fn detect(&mut self, _: &RgbImage, _: DetectionModel) -> Result<Vec<Detection>> {
            Ok(self.0.clone())
        }
    }

    /// Encodes the detection's x coordinate into the first component.
    struct RecordingEncoder(Arc<StdMutex<Vec<f32>>>);

    impl FaceEncoder for RecordingEncoder {
        fn encode(&mut self, _: &RgbImage, face: &Detection, _: EncodingModel) -> Result<FaceEncoding> {
            self.0.lock().unwrap().push(face.bbox[0]);
            let mut v = vec![0.0; ENCODING_DIM];
            v[0] = 1.0;
            v[1] = face.bbox[0];
            FaceEncoding::normalized(v)
        }
    }

    fn det(x: f32) -> Detection {
        Detection {
            bbox: [x, 0.0, 10.0, 10.0],
            score: 0.9,
            landmarks: None,
        }
    }

    fn matcher(faces: Vec<Detection>, config: MatcherConfig) -> (FaceMatcher, Arc<StdMutex<Vec<f32>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let m = FaceMatcher::new(
            config,
            Box::new(FixedDetector(faces)),
            Box::new(RecordingEncoder(seen.clone())),
        );
        (m, seen)
    }

    #[test]
    fn no_face_is_none_not_error() {
        let (m, seen) = matcher(vec![], MatcherConfig::default());
        let img = RgbImage::from_pixel(20, 20, Rgb([120, 120, 120]));
        assert!(m.encode(&img, None).unwrap().is_none());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn first_detection_is_encoded_when_none_given() {
        let (m, seen) = matcher(vec![det(3.0), det(40.0)], MatcherConfig::default());
        let img = RgbImage::from_pixel(20, 20, Rgb([120, 120, 120]));
        assert!(m.encode(&img, None).unwrap().is_some());
        m.encode(&img, Some(&det(7.0))).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![3.0, 7.0]);
    }

    #[test]
    fn brightness_at_threshold_is_not_night_mode() {
        let (m, _) = matcher(vec![], MatcherConfig::default());
        let at = RgbImage::from_pixel(8, 8, Rgb([50, 50, 50]));
        let below = RgbImage::from_pixel(8, 8, Rgb([49, 49, 49]));
        assert!(!m.is_night_mode(&at));
        assert!(m.is_night_mode(&below));
        assert!(!m.preprocess(at).night_mode);

        let red = RgbImage::from_pixel(8, 8, Rgb([200, 0, 0]));
        let green = RgbImage::from_pixel(8, 8, Rgb([0, 70, 0]));
        assert!(!m.is_night_mode(&red));
        assert!(m.is_night_mode(&green));
    }

    #[test]
    fn enhancement_only_runs_on_dark_frames_when_enabled() {
        let dark = RgbImage::from_fn(32, 32, |x, y| {
            let v = ((x * 3 + y) % 30) as u8;
            Rgb([v, v, v])
        });
        let (m, _) = matcher(vec![], MatcherConfig::default());
        let out = m.preprocess(dark.clone());
        assert!(out.night_mode);
        assert_ne!(out.image, dark);

        let disabled = MatcherConfig {
            enhancement: false,
            ..MatcherConfig::default()
        };
        let (m, _) = matcher(vec![], disabled);
        let out = m.preprocess(dark.clone());
        assert!(out.night_mode);
        assert_eq!(out.image, dark);

        let bright = RgbImage::from_pixel(16, 16, Rgb([180, 170, 160]));
        let (m, _) = matcher(vec![], MatcherConfig::default());
        assert_eq!(m.preprocess(bright.clone()).image, bright);
    }

    #[test]
    fn compare_is_symmetric_and_uses_default_threshold() {
        let (m, _) = matcher(vec![], MatcherConfig::default());
        let mut a = vec![0.0; ENCODING_DIM];
        a[0] = 1.0;
        let mut b = vec![0.0; ENCODING_DIM];
        b[0] = 1.0;
        b[1] = 1.0;
        let a = FaceEncoding::normalized(a).unwrap();
        let b = FaceEncoding::normalized(b).unwrap();

        let ab = m.compare(&a, &b, None);
        let ba = m.compare(&b, &a, None);
        assert_eq!(ab.is_match, ba.is_match);
        assert_eq!(ab.distance, ba.distance);
        // distance ~0.765 against the default 1.0
        assert!(ab.is_match);
        assert!(!m.compare(&a, &b, Some(0.5)).is_match);
    }

    #[test]
    fn model_names_parse_with_legacy_aliases() {
        assert_eq!("hog".parse::<DetectionModel>().unwrap(), DetectionModel::Fast);
        assert_eq!("CNN".parse::<DetectionModel>().unwrap(), DetectionModel::Accurate);
        assert_eq!("small".parse::<EncodingModel>().unwrap(), EncodingModel::Small);
        assert!("medium".parse::<EncodingModel>().is_err());
    }
}
