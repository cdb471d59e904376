pub mod capture;
pub mod enhance;
pub mod error;
pub mod face;
pub mod frame;
pub mod model;
pub mod pipeline;
pub mod sface;
pub mod yunet;

// Re-export commonly used types
pub use capture::{
    CameraSource, CaptureDriver, CaptureHandle, DeviceInfo, DriverKind, DriverSet, SyntheticDriver,
};
pub use error::{decode_image, VisionError, VisionResult};
pub use face::{Detection, FaceEncoding, FaceLocation, MatchResult, ENCODING_DIM};
pub use frame::Frame;
pub use model::ModelPaths;
pub use pipeline::{DetectionModel, EncodingModel, FaceMatcher, MatcherConfig};
