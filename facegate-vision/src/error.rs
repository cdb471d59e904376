use image::DynamicImage;

/// Failures a caller of the face pipeline must be able to tell apart.
///
/// A missing face is not an error; the pipeline reports it as `None`.
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("invalid image: {0}")]
    InvalidImage(#[from] image::ImageError),

    #[error("face model inference failed: {0:#}")]
    Inference(#[from] anyhow::Error),
}

pub type VisionResult<T> = std::result::Result<T, VisionError>;

/// Decode an uploaded image payload, rejecting anything `image` cannot parse.
pub fn decode_image(bytes: &[u8]) -> VisionResult<DynamicImage> {
    Ok(image::load_from_memory(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_are_invalid_image() {
        let err = decode_image(b"definitely not a picture").unwrap_err();
        assert!(matches!(err, VisionError::InvalidImage(_)));
    }
}
