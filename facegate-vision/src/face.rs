use anyhow::Result;
use image::{Rgb, RgbImage};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Length of every face encoding produced by the SFace model.
pub const ENCODING_DIM: usize = 128;

/// Side of the aligned face crop fed to the encoder.
pub const ALIGNED_SIZE: u32 = 112;

/// ArcFace reference positions in a 112x112 crop: left eye, right eye, nose,
/// left mouth corner, right mouth corner.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Bounding region in frame pixels, same corner order as the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceLocation {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceLocation {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// A face found by the detector.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    /// Five points as x1,y1,...,x5,y5; absent when the region came from a caller.
    pub landmarks: Option<[f32; 10]>,
}

impl Detection {
    /// Wrap a caller-supplied region. Encoding falls back to a plain crop.
    pub fn from_location(loc: FaceLocation) -> Self {
        Self {
            bbox: [
                loc.left as f32,
                loc.top as f32,
                loc.width() as f32,
                loc.height() as f32,
            ],
            score: 1.0,
            landmarks: None,
        }
    }

    /// Pixel rectangle clipped to a `width` x `height` frame.
    pub fn location(&self, width: u32, height: u32) -> FaceLocation {
        let clip = |v: f32, max: u32| v.round().clamp(0.0, max as f32) as u32;
        let [x, y, w, h] = self.bbox;
        FaceLocation {
            top: clip(y, height),
            right: clip(x + w, width),
            bottom: clip(y + h, height),
            left: clip(x, width),
        }
    }
}

/// Fixed-length descriptor of one face, L2-normalised.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceEncoding {
    vector: Array1<f32>,
}

impl FaceEncoding {
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if values.len() != ENCODING_DIM {
            anyhow::bail!(
                "face encoding must have {} values, got {}",
                ENCODING_DIM,
                values.len()
            );
        }
        Ok(Self {
            vector: Array1::from_vec(values),
        })
    }

    /// Build an encoding from raw model output, normalising to unit length.
    pub fn normalized(values: Vec<f32>) -> Result<Self> {
        let mut encoding = Self::new(values)?;
        let norm = encoding.vector.dot(&encoding.vector).sqrt();
        if norm > 0.0 {
            encoding.vector.mapv_inplace(|v| v / norm);
        }
        Ok(encoding)
    }

    pub fn as_slice(&self) -> &[f32] {
        self.vector.as_slice().unwrap_or(&[])
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }

    /// Euclidean distance; symmetric and never negative.
    pub fn distance(&self, other: &FaceEncoding) -> f32 {
        let diff = &self.vector - &other.vector;
        diff.dot(&diff).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchResult {
    pub is_match: bool,
    pub distance: f32,
    /// `max(0, 1 - distance)`; reporting only.
    pub confidence: f32,
}

impl MatchResult {
    pub fn from_distance(distance: f32, threshold: f32) -> Self {
        Self {
            is_match: distance <= threshold,
            distance,
            confidence: (1.0 - distance).max(0.0),
        }
    }
}

/// Drop overlapping detections, keeping the highest score of each cluster.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| compute_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Rotation + uniform scale + translation: `x' = a*x - b*y + tx`, `y' = b*x + a*y + ty`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares similarity taking `src` points onto `dst` points.
    pub fn fit(src: &[(f32, f32)], dst: &[(f32, f32)]) -> Option<Self> {
        let n = src.len().min(dst.len());
        if n < 2 {
            return None;
        }
        let mean = |pts: &[(f32, f32)]| {
            let (sx, sy) = pts[..n]
                .iter()
                .fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
            (sx / n as f32, sy / n as f32)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut dot = 0.0;
        let mut cross = 0.0;
        let mut norm = 0.0;
        for i in 0..n {
            let (sx, sy) = (src[i].0 - msx, src[i].1 - msy);
            let (dx, dy) = (dst[i].0 - mdx, dst[i].1 - mdy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }
        if norm <= f32::EPSILON {
            return None;
        }
        let a = dot / norm;
        let b = cross / norm;
        Some(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    fn invert(&self, (x, y): (f32, f32)) -> (f32, f32) {
        let det = self.a * self.a + self.b * self.b;
        let (u, v) = (x - self.tx, y - self.ty);
        ((self.a * u + self.b * v) / det, (-self.b * u + self.a * v) / det)
    }
}

/// How much of the landmark set drives alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    EyesOnly,
    FivePoint,
}

/// Produce the `ALIGNED_SIZE` square crop the encoder expects.
pub fn align_face(img: &RgbImage, detection: &Detection, alignment: Alignment) -> RgbImage {
    let transform = detection
        .landmarks
        .and_then(|lm| {
            let points: Vec<(f32, f32)> = (0..5).map(|i| (lm[i * 2], lm[i * 2 + 1])).collect();
            match alignment {
                Alignment::EyesOnly => Similarity::fit(&points[..2], &REFERENCE_LANDMARKS[..2]),
                Alignment::FivePoint => Similarity::fit(&points, &REFERENCE_LANDMARKS),
            }
        })
        .unwrap_or_else(|| crop_transform(detection));
    warp(img, &transform, ALIGNED_SIZE)
}

/// Square crop around the box centre, scaled to the aligned size.
fn crop_transform(detection: &Detection) -> Similarity {
    let [x, y, w, h] = detection.bbox;
    let side = w.max(h).max(1.0);
    let x0 = x + w / 2.0 - side / 2.0;
    let y0 = y + h / 2.0 - side / 2.0;
    let scale = ALIGNED_SIZE as f32 / side;
    Similarity {
        a: scale,
        b: 0.0,
        tx: -scale * x0,
        ty: -scale * y0,
    }
}

fn warp(img: &RgbImage, transform: &Similarity, size: u32) -> RgbImage {
    let (img_w, img_h) = img.dimensions();
    let mut output = RgbImage::new(size, size);
    if img_w == 0 || img_h == 0 {
        return output;
    }

    for out_y in 0..size {
        for out_x in 0..size {
            let (in_x, in_y) = transform.invert((out_x as f32, out_y as f32));
            if in_x < 0.0 || in_y < 0.0 || in_x >= img_w as f32 || in_y >= img_h as f32 {
                continue;
            }
            let x0 = in_x.floor() as u32;
            let y0 = in_y.floor() as u32;
            let x1 = (x0 + 1).min(img_w - 1);
            let y1 = (y0 + 1).min(img_h - 1);
            let fx = in_x - x0 as f32;
            let fy = in_y - y0 as f32;

            let p00 = img.get_pixel(x0, y0);
            let p10 = img.get_pixel(x1, y0);
            let p01 = img.get_pixel(x0, y1);
            let p11 = img.get_pixel(x1, y1);
            let blend = |c: usize| {
                let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
                let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
                (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
            };
            output.put_pixel(out_x, out_y, Rgb([blend(0), blend(1), blend(2)]));
        }
    }
    output
}
