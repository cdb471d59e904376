use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DETECTOR_MODEL: &str =
    "/usr/local/share/facegate/models/face_detection_yunet_2023mar.onnx";
pub const DEFAULT_ENCODER_MODEL: &str =
    "/usr/local/share/facegate/models/face_recognition_sface_2021dec.onnx";

/// Where the ONNX weights live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub encoder: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            detector: PathBuf::from(DEFAULT_DETECTOR_MODEL),
            encoder: PathBuf::from(DEFAULT_ENCODER_MODEL),
        }
    }
}

impl ModelPaths {
    pub fn exist(&self) -> bool {
        self.detector.exists() && self.encoder.exists()
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

fn load(path: &Path, what: &str) -> Result<Session> {
    log::info!("loading {} model from {}", what, path.display());
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load {} model {}", what, path.display()))
}

pub fn detector_session(paths: &ModelPaths) -> Result<Session> {
    load(&paths.detector, "detector")
}

pub fn encoder_session(paths: &ModelPaths) -> Result<Session> {
    load(&paths.encoder, "encoder")
}
