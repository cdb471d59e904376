use facegate_vision::VisionError;

/// Errors surfaced to callers of the face and camera operations.
///
/// Missing faces and missing frames only become errors at the operation
/// boundary; inside the pipeline they are plain `None`s.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("no face detected")]
    NoFace,

    #[error("no frame available from the {0} camera")]
    NoFrame(crate::camera::Role),

    #[error("background task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<VisionError> for Error {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::InvalidImage(e) => Error::InvalidImage(e.to_string()),
            VisionError::Inference(e) => Error::Internal(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undecodable_bytes_map_to_invalid_image() {
        let err: Error = facegate_vision::decode_image(&[1, 2, 3]).unwrap_err().into();
        assert!(matches!(err, Error::InvalidImage(_)));
    }
}
