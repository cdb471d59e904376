pub mod camera;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod gate;
pub mod matcher;
pub mod report;

pub use error::{Error, Result};

// Re-export vision types for convenience
pub use facegate_vision::{
    CameraSource, FaceEncoding, FaceLocation, FaceMatcher, Frame, MatchResult,
};
