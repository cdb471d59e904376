//! YuNet face detector.
//!
//! The network takes a `[1, 3, 640, 640]` BGR tensor and answers with twelve
//! tensors: `cls`, `obj`, `bbox`, `kps` for each of the strides 8, 16 and 32,
//! in that grouping order. Decoding is anchor-free: every grid cell `(i, j)`
//! predicts offsets relative to its own corner, scaled by the stride.

use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use ndarray::{Array2, Array4};
use ort::{session::Session, value::Value};

use crate::face::{self, Detection};
use crate::pipeline::{DetectionModel, FaceDetector};

pub const INPUT_SIZE: usize = 640;
const STRIDES: [usize; 3] = [8, 16, 32];
const NMS_IOU: f32 = 0.3;

/// Per-stride slices of the network output.
#[derive(Debug, Clone)]
pub struct Head {
    pub stride: usize,
    /// `sqrt(cls * obj)`, shape `[cells, 1]`.
    pub scores: Array2<f32>,
    pub bbox: Array2<f32>,
    pub kps: Array2<f32>,
}

/// Coordinates normalised to the square network input.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4],
    pub score: f32,
    pub landmarks: [f32; 10],
}

pub struct YunetDetector {
    session: Session,
}

impl YunetDetector {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    fn run_pass(&mut self, img: &RgbImage, score_threshold: f32) -> Result<Vec<Detection>> {
        let letterbox = Letterbox::fit(img.width(), img.height());
        let input = letterbox.tensor(img)?;

        let outputs = self.session.run(ort::inputs![input])?;
        let mut owned: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
        for (_name, output) in outputs.iter() {
            let (shape, data) = output.try_extract_tensor::<f32>()?;
            owned.push((shape.iter().copied().collect(), data.to_vec()));
        }
        let refs: Vec<(&[i64], &[f32])> = owned
            .iter()
            .map(|(s, d)| (s.as_slice(), d.as_slice()))
            .collect();

        let heads = parse_outputs(&refs, INPUT_SIZE).context("parse yunet outputs")?;
        let raw = decode(&heads, score_threshold, INPUT_SIZE)?;
        Ok(raw.into_iter().map(|d| letterbox.restore(&d)).collect())
    }
}

impl FaceDetector for YunetDetector {
    fn detect(&mut self, img: &RgbImage, model: DetectionModel) -> Result<Vec<Detection>> {
        match model {
            DetectionModel::Fast => {
                let found = self.run_pass(img, 0.6)?;
                Ok(face::nms(&found, NMS_IOU))
            }
            DetectionModel::Accurate => {
                let mut found = self.run_pass(img, 0.5)?;
                let mirrored = imageops::flip_horizontal(img);
                let width = img.width() as f32;
                found.extend(
                    self.run_pass(&mirrored, 0.5)?
                        .into_iter()
                        .map(|d| unmirror(d, width)),
                );
                Ok(face::nms(&found, NMS_IOU))
            }
        }
    }
}

/// Map a detection from a horizontally flipped frame back onto the original.
fn unmirror(mut d: Detection, width: f32) -> Detection {
    d.bbox[0] = width - d.bbox[0] - d.bbox[2];
    if let Some(lm) = d.landmarks.as_mut() {
        for i in 0..5 {
            lm[i * 2] = width - lm[i * 2];
        }
        // Left/right swap for the eyes and the mouth corners.
        lm.swap(0, 2);
        lm.swap(1, 3);
        lm.swap(6, 8);
        lm.swap(7, 9);
    }
    d
}

/// Aspect-preserving resize onto a black square canvas.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    offset_x: u32,
    offset_y: u32,
    width: u32,
    height: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let target = INPUT_SIZE as u32;
        let scale = target as f32 / width.max(height).max(1) as f32;
        let width = ((width as f32 * scale) as u32).clamp(1, target);
        let height = ((height as f32 * scale) as u32).clamp(1, target);
        Self {
            scale,
            offset_x: (target - width) / 2,
            offset_y: (target - height) / 2,
            width,
            height,
        }
    }

    /// Planar BGR float tensor in `[0, 255]`.
    fn tensor(&self, img: &RgbImage) -> Result<Value> {
        let resized = imageops::resize(img, self.width, self.height, imageops::FilterType::Triangle);
        let mut canvas = RgbImage::new(INPUT_SIZE as u32, INPUT_SIZE as u32);
        imageops::overlay(
            &mut canvas,
            &resized,
            self.offset_x as i64,
            self.offset_y as i64,
        );

        let plane = INPUT_SIZE * INPUT_SIZE;
        let mut data = vec![0f32; 3 * plane];
        for (i, px) in canvas.pixels().enumerate() {
            data[i] = px[2] as f32;
            data[plane + i] = px[1] as f32;
            data[2 * plane + i] = px[0] as f32;
        }
        let array = Array4::from_shape_vec((1, 3, INPUT_SIZE, INPUT_SIZE), data)?;
        Ok(Value::from_array(array)?.into_dyn())
    }

    fn restore(&self, raw: &RawDetection) -> Detection {
        let to_x = |v: f32| (v * INPUT_SIZE as f32 - self.offset_x as f32) / self.scale;
        let to_y = |v: f32| (v * INPUT_SIZE as f32 - self.offset_y as f32) / self.scale;
        let to_len = |v: f32| v * INPUT_SIZE as f32 / self.scale;

        let mut landmarks = [0f32; 10];
        for i in 0..5 {
            landmarks[i * 2] = to_x(raw.landmarks[i * 2]);
            landmarks[i * 2 + 1] = to_y(raw.landmarks[i * 2 + 1]);
        }
        Detection {
            bbox: [
                to_x(raw.bbox[0]),
                to_y(raw.bbox[1]),
                to_len(raw.bbox[2]),
                to_len(raw.bbox[3]),
            ],
            score: raw.score,
            landmarks: Some(landmarks),
        }
    }
}

/// Split the twelve output tensors into one [`Head`] per stride.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Vec<Head>> {
    if outputs.len() < 12 {
        anyhow::bail!("expected 12 yunet outputs, got {}", outputs.len());
    }

    let tensor = |idx: usize, cells: usize, width: usize| -> Result<Array2<f32>> {
        let (shape, data) = outputs[idx];
        if shape.len() != 3 || shape[0] != 1 || shape[1] as usize != cells || shape[2] as usize != width {
            anyhow::bail!(
                "yunet output {} has shape {:?}, expected [1, {}, {}]",
                idx,
                shape,
                cells,
                width
            );
        }
        Ok(Array2::from_shape_vec((cells, width), data.to_vec())?)
    };

    STRIDES
        .iter()
        .enumerate()
        .map(|(k, &stride)| {
            let side = input_size / stride;
            let cells = side * side;
            let cls = tensor(k, cells, 1)?;
            let obj = tensor(k + 3, cells, 1)?;
            Ok(Head {
                stride,
                scores: (cls * obj).mapv(|v| v.clamp(0.0, 1.0).sqrt()),
                bbox: tensor(k + 6, cells, 4)?,
                kps: tensor(k + 9, cells, 10)?,
            })
        })
        .collect()
}

/// Grid decode; results are normalised to `[0, 1]` of the input square.
pub fn decode(heads: &[Head], score_threshold: f32, input_size: usize) -> Result<Vec<RawDetection>> {
    let size = input_size as f32;
    let mut detections = Vec::new();

    for head in heads {
        let side = input_size / head.stride;
        if head.scores.nrows() != side * side {
            anyhow::bail!(
                "stride {} expects {} cells, got {}",
                head.stride,
                side * side,
                head.scores.nrows()
            );
        }
        let stride = head.stride as f32;

        for idx in 0..side * side {
            let score = head.scores[[idx, 0]];
            if score < score_threshold {
                continue;
            }
            let row = (idx / side) as f32;
            let col = (idx % side) as f32;

            let cx = (col + head.bbox[[idx, 0]]) * stride;
            let cy = (row + head.bbox[[idx, 1]]) * stride;
            let w = head.bbox[[idx, 2]] * stride;
            let h = head.bbox[[idx, 3]] * stride;

            let mut landmarks = [0f32; 10];
            for k in 0..5 {
                landmarks[k * 2] = (col + head.kps[[idx, k * 2]]) * stride / size;
                landmarks[k * 2 + 1] = (row + head.kps[[idx, k * 2 + 1]]) * stride / size;
            }

            detections.push(RawDetection {
                bbox: [(cx - w / 2.0) / size, (cy - h / 2.0) / size, w / size, h / size],
                score,
                landmarks,
            });
        }
    }

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_head(stride: usize) -> Head {
        let cells = (INPUT_SIZE / stride).pow(2);
        Head {
            stride,
            scores: Array2::zeros((cells, 1)),
            bbox: Array2::zeros((cells, 4)),
            kps: Array2::zeros((cells, 10)),
        }
    }

    #[test]
    fn decodes_single_cell_on_coarsest_grid() {
        let mut head32 = empty_head(32);
        let idx = 10 * 20 + 10;
        head32.scores[[idx, 0]] = 0.9;
        head32.bbox[[idx, 0]] = 0.5;
        head32.bbox[[idx, 1]] = 0.3;
        head32.bbox[[idx, 2]] = 4.0;
        head32.bbox[[idx, 3]] = 4.0;

        let heads = vec![empty_head(8), empty_head(16), head32];
        let found = decode(&heads, 0.5, INPUT_SIZE).unwrap();
        assert_eq!(found.len(), 1);

        // centre (10.5 * 32, 10.3 * 32) = (336, 329.6), size 128
        let d = &found[0];
        assert!((d.bbox[0] - 0.425).abs() < 1e-5);
        assert!((d.bbox[1] - 0.415).abs() < 1e-5);
        assert!((d.bbox[2] - 0.2).abs() < 1e-5);
        assert!((d.landmarks[0] - 0.5).abs() < 1e-5);
        assert!((d.score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn parse_rejects_wrong_shapes() {
        let shape = [1i64, 3, 1];
        let data = [0f32; 3];
        let outputs: Vec<(&[i64], &[f32])> = (0..12).map(|_| (&shape[..], &data[..])).collect();
        assert!(parse_outputs(&outputs, INPUT_SIZE).is_err());
        assert!(parse_outputs(&outputs[..4], INPUT_SIZE).is_err());
    }

    #[test]
    fn letterbox_round_trips_coordinates() {
        let lb = Letterbox::fit(1280, 720);
        assert_eq!(lb.offset_x, 0);
        assert_eq!(lb.offset_y, (640 - 360) / 2);
        let raw = RawDetection {
            bbox: [0.25, 0.5, 0.1, 0.1],
            score: 0.9,
            landmarks: [0.5; 10],
        };
        let d = lb.restore(&raw);
        assert!((d.bbox[0] - 320.0).abs() < 1e-3);
        assert!((d.bbox[1] - 360.0).abs() < 1e-3);
        assert!((d.bbox[2] - 128.0).abs() < 1e-3);
    }

    #[test]
    fn mirrored_detection_swaps_sides() {
        let d = Detection {
            bbox: [10.0, 5.0, 20.0, 20.0],
            score: 0.9,
            landmarks: Some([12.0, 8.0, 25.0, 8.0, 18.0, 14.0, 13.0, 20.0, 24.0, 20.0]),
        };
        let back = unmirror(d, 100.0);
        assert_eq!(back.bbox[0], 70.0);
        let lm = back.landmarks.unwrap();
        // Former right eye (x=25) becomes the left eye at 100-25.
        assert_eq!(lm[0], 75.0);
        assert_eq!(lm[2], 88.0);
    }
}
