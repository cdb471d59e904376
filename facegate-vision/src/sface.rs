use anyhow::Result;
use image::RgbImage;
use ndarray::Array4;
use ort::{session::Session, value::Value};

use crate::face::{self, Alignment, Detection, FaceEncoding, ALIGNED_SIZE};
use crate::pipeline::{EncodingModel, FaceEncoder};

/// SFace recogniser: aligned 112x112 BGR crop in, 128 floats out.
pub struct SfaceEncoder {
    session: Session,
}

impl SfaceEncoder {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    fn embed(&mut self, crop: &RgbImage) -> Result<FaceEncoding> {
        let size = ALIGNED_SIZE as usize;
        let plane = size * size;
        let mut data = vec![0f32; 3 * plane];
        for (i, px) in crop.pixels().enumerate() {
            data[i] = px[2] as f32;
            data[plane + i] = px[1] as f32;
            data[2 * plane + i] = px[0] as f32;
        }
        let input = Value::from_array(Array4::from_shape_vec((1, 3, size, size), data)?)?;

        let outputs = self.session.run(ort::inputs![input])?;
        let (shape, values) = outputs[0].try_extract_tensor::<f32>()?;
        let len = if shape.len() == 2 {
            shape[1] as usize
        } else {
            values.len()
        };
        FaceEncoding::normalized(values[..len.min(values.len())].to_vec())
    }
}

impl FaceEncoder for SfaceEncoder {
    fn encode(
        &mut self,
        img: &RgbImage,
        face: &Detection,
        model: EncodingModel,
    ) -> Result<FaceEncoding> {
        let alignment = match model {
            EncodingModel::Small => Alignment::EyesOnly,
            EncodingModel::Large => Alignment::FivePoint,
        };
        let crop = face::align_face(img, face, alignment);
        self.embed(&crop)
    }
}
