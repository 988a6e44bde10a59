//! Inference engines.
//!
//! The worker talks to engines through [`InferenceEngine`]. The ONNX backed
//! [`Detector`] is a closed set of variants, one per supported model family.

use std::path::PathBuf;

use crate::config::{Device, FilterConfig, ModelSize};
use crate::error::Result;
use crate::types::{BgrImage, DetectionSet};

pub mod labels;
pub mod preprocess;

#[cfg(feature = "onnx")]
mod edgeyolo;
#[cfg(feature = "onnx")]
mod session;
#[cfg(feature = "onnx")]
mod yunet;

#[cfg(feature = "onnx")]
pub use edgeyolo::EdgeYolo;
#[cfg(feature = "onnx")]
pub use yunet::YuNet;

/// Capability the worker needs from a detector.
pub trait InferenceEngine: Send + 'static {
    /// Applied before every call, so threshold changes need no reload
    fn set_confidence_threshold(&mut self, threshold: f32);

    /// Detect objects in a BGR image. Rectangles are in `image` coordinates.
    fn infer(&mut self, image: &BgrImage) -> Result<DetectionSet>;

    /// True when `infer` already removes overlapping detections
    fn deduplicates(&self) -> bool {
        true
    }
}

/// Model family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    /// Bundled multi-class EdgeYOLO models
    EdgeYolo,
    /// Bundled single-class YuNet face detector
    YuNet,
    /// User supplied YOLO-style graph
    External,
}

/// Everything needed to construct a detector
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub kind: DetectorKind,
    pub model_path: PathBuf,
    pub class_names: Vec<String>,
    pub device: Device,
    /// 0 lets the runtime decide
    pub num_threads: u32,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
}

impl ModelSpec {
    /// Map a configuration onto a model file and class names.
    ///
    /// External models need a sibling `.json` labels file with `names`.
    pub fn resolve(config: &FilterConfig) -> Result<Self> {
        let (kind, model_path, class_names) = match config.model_size {
            ModelSize::Small | ModelSize::Medium | ModelSize::Large | ModelSize::Face => {
                // bundled_file() is Some for every bundled size
                let file = config.model_size.bundled_file().unwrap_or_default();
                let path = config.models_dir.join(file);
                if config.model_size == ModelSize::Face {
                    (DetectorKind::YuNet, path, labels::face_class_names())
                } else {
                    (DetectorKind::EdgeYolo, path, labels::coco_class_names())
                }
            }
            ModelSize::External => {
                let path = config
                    .external_model_path
                    .clone()
                    .filter(|p| !p.as_os_str().is_empty())
                    .ok_or_else(|| {
                        crate::Error::Configuration(
                            "External model file path is empty".to_string(),
                        )
                    })?;
                let names = labels::read_class_names(&path)?;
                (DetectorKind::External, path, names)
            }
        };

        Ok(Self {
            kind,
            model_path,
            class_names,
            device: config.use_gpu,
            num_threads: config.num_threads,
            confidence_threshold: config.confidence_threshold,
            nms_threshold: config.nms_threshold,
        })
    }
}

/// ONNX Runtime backed detector
#[cfg(feature = "onnx")]
pub enum Detector {
    EdgeYolo(EdgeYolo),
    YuNet(YuNet),
    External(EdgeYolo),
}

#[cfg(feature = "onnx")]
impl Detector {
    /// Create the session for `spec` on the requested device.
    pub fn load(spec: &ModelSpec) -> Result<Self> {
        tracing::info!(
            "Loading {:?} model from {} on {} ({} threads)",
            spec.kind,
            spec.model_path.display(),
            spec.device,
            spec.num_threads
        );
        let detector = match spec.kind {
            DetectorKind::EdgeYolo => Detector::EdgeYolo(EdgeYolo::load(spec)?),
            DetectorKind::YuNet => Detector::YuNet(YuNet::load(spec)?),
            DetectorKind::External => Detector::External(EdgeYolo::load(spec)?),
        };
        tracing::info!("Model loaded successfully");
        Ok(detector)
    }
}

#[cfg(feature = "onnx")]
impl InferenceEngine for Detector {
    fn set_confidence_threshold(&mut self, threshold: f32) {
        match self {
            Detector::EdgeYolo(model) | Detector::External(model) => {
                model.set_confidence_threshold(threshold)
            }
            Detector::YuNet(model) => model.set_confidence_threshold(threshold),
        }
    }

    fn infer(&mut self, image: &BgrImage) -> Result<DetectionSet> {
        match self {
            Detector::EdgeYolo(model) | Detector::External(model) => model.infer(image),
            Detector::YuNet(model) => model.infer(image),
        }
    }

    fn deduplicates(&self) -> bool {
        match self {
            Detector::EdgeYolo(_) | Detector::External(_) => true,
            Detector::YuNet(_) => false,
        }
    }
}
