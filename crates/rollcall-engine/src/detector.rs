//! Detector capability boundary.
//!
//! Producing landmarks and a 128-dim descriptor from an image region
//! is supplied by an external detector component; the engine only
//! consumes its output through [`FaceDetector`]. [`SidecarDetector`]
//! is the production adapter: the capture pipeline writes the detector
//! output as JSON next to each image.

use std::path::{Path, PathBuf};

use image::RgbImage;
use rollcall_core::types::{FaceDescriptor, FaceSample};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("failed to read capture: {0}")]
    Image(#[from] image::ImageError),
    #[error("capture io: {0}")]
    Io(#[from] std::io::Error),
    #[error("no detector output next to {0} (expected {0}.faces.json)")]
    MissingSidecar(PathBuf),
    #[error("malformed detector output: {0}")]
    Malformed(String),
}

/// A decoded capture frame plus, when loaded from disk, its origin.
pub struct Capture {
    pub image: RgbImage,
    pub source: Option<PathBuf>,
}

impl Capture {
    pub fn from_path(path: &Path) -> Result<Self, DetectorError> {
        let image = image::open(path)?.to_rgb8();
        Ok(Self {
            image,
            source: Some(path.to_path_buf()),
        })
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self {
            image,
            source: None,
        }
    }
}

/// One detected face: the sample for quality gating plus the
/// descriptor for matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub sample: FaceSample,
    pub descriptor: FaceDescriptor,
}

/// The external detector capability. May legitimately return zero
/// faces or several; the orchestrator maps those onto the rejection
/// taxonomy.
pub trait FaceDetector: Send {
    fn detect(&mut self, capture: &Capture) -> Result<Vec<Detection>, DetectorError>;
}

/// Reads detector output from `<image>.faces.json` beside the capture.
pub struct SidecarDetector;

impl SidecarDetector {
    fn sidecar_path(image_path: &Path) -> PathBuf {
        let mut name = image_path.as_os_str().to_os_string();
        name.push(".faces.json");
        PathBuf::from(name)
    }
}

impl FaceDetector for SidecarDetector {
    fn detect(&mut self, capture: &Capture) -> Result<Vec<Detection>, DetectorError> {
        let Some(source) = &capture.source else {
            return Err(DetectorError::Malformed(
                "in-memory capture has no sidecar".into(),
            ));
        };
        let path = Self::sidecar_path(source);
        if !path.exists() {
            return Err(DetectorError::MissingSidecar(source.clone()));
        }
        let raw = std::fs::read_to_string(&path)?;
        let detections: Vec<Detection> =
            serde_json::from_str(&raw).map_err(|e| DetectorError::Malformed(e.to_string()))?;
        tracing::debug!(
            capture = %source.display(),
            faces = detections.len(),
            "sidecar detections loaded"
        );
        Ok(detections)
    }
}
