//! Filter configuration.
//!
//! `FilterConfig` is replaced wholesale by `on_configuration_update`; readers
//! hold an `Arc` snapshot so they never observe a half-applied update.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::nms::DEFAULT_IOU_THRESHOLD;
use crate::rate_limit::DEFAULT_MIN_INTERVAL;

/// Highest accepted `numThreads`
pub const MAX_THREADS: u32 = 8;

/// Inference device / execution provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
    #[serde(alias = "dml")]
    DirectMl,
    CoreMl,
    TensorRt,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
            Device::DirectMl => "directml",
            Device::CoreMl => "coreml",
            Device::TensorRt => "tensorrt",
        };
        f.write_str(name)
    }
}

/// Which model to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    #[default]
    Small,
    Medium,
    Large,
    /// Single-class face detector
    Face,
    /// User supplied ONNX graph with a sibling labels file
    External,
}

impl ModelSize {
    /// File name of the bundled model, `None` for external models
    pub fn bundled_file(self) -> Option<&'static str> {
        match self {
            ModelSize::Small => Some("edgeyolo_tiny_lrelu_coco_256x416.onnx"),
            ModelSize::Medium => Some("edgeyolo_tiny_lrelu_coco_480x800.onnx"),
            ModelSize::Large => Some("edgeyolo_tiny_lrelu_coco_736x1280.onnx"),
            ModelSize::Face => Some("face_detection_yunet_2023mar.onnx"),
            ModelSize::External => None,
        }
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
            ModelSize::Face => "face",
            ModelSize::External => "external",
        };
        f.write_str(name)
    }
}

/// Category filter: keep every label, or only one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CategoryRepr", into = "CategoryRepr")]
pub enum ObjectCategory {
    #[default]
    Any,
    Label(u32),
}

impl ObjectCategory {
    pub fn matches(self, label: u32) -> bool {
        match self {
            ObjectCategory::Any => true,
            ObjectCategory::Label(wanted) => wanted == label,
        }
    }
}

/// Wire form: a label id, `-1`, or `"any"`
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CategoryRepr {
    Id(i64),
    Name(String),
}

impl TryFrom<CategoryRepr> for ObjectCategory {
    type Error = String;

    fn try_from(repr: CategoryRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            CategoryRepr::Id(-1) => Ok(ObjectCategory::Any),
            CategoryRepr::Id(id) => u32::try_from(id)
                .map(ObjectCategory::Label)
                .map_err(|_| format!("invalid object category id: {id}")),
            CategoryRepr::Name(name) if name.eq_ignore_ascii_case("any") => {
                Ok(ObjectCategory::Any)
            }
            CategoryRepr::Name(name) => name
                .parse::<u32>()
                .map(ObjectCategory::Label)
                .map_err(|_| format!("invalid object category: {name}")),
        }
    }
}

impl From<ObjectCategory> for CategoryRepr {
    fn from(category: ObjectCategory) -> Self {
        match category {
            ObjectCategory::Any => CategoryRepr::Name("any".to_string()),
            ObjectCategory::Label(id) => CategoryRepr::Id(i64::from(id)),
        }
    }
}

/// Pixel insets from each frame edge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropRegion {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

/// Resolved crop rectangle inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn is_full_frame(&self, width: u32, height: u32) -> bool {
        *self == Self::full(width, height)
    }

    /// Offset that maps crop-local coordinates back to the full frame
    pub fn origin(&self) -> (f32, f32) {
        (self.x as f32, self.y as f32)
    }
}

impl CropRegion {
    /// Resolve the insets against a frame. Insets that leave no positive
    /// area fall back to the full frame.
    pub fn resolve(&self, width: u32, height: u32) -> CropRect {
        let horizontal = u64::from(self.left) + u64::from(self.right);
        let vertical = u64::from(self.top) + u64::from(self.bottom);
        if horizontal >= u64::from(width) || vertical >= u64::from(height) {
            return CropRect::full(width, height);
        }
        CropRect {
            x: self.left,
            y: self.top,
            width: width - self.left - self.right,
            height: height - self.top - self.bottom,
        }
    }
}

/// Settings that force a model reload when they change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelKey {
    pub device: Device,
    pub num_threads: u32,
    pub model_size: ModelSize,
    pub external_model_path: Option<PathBuf>,
    pub models_dir: PathBuf,
}

/// Complete filter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterConfig {
    #[serde(rename = "useGPU")]
    pub use_gpu: Device,
    /// Inference threads (0 = runtime default)
    pub num_threads: u32,
    pub model_size: ModelSize,
    /// Required when `model_size` is `External`
    pub external_model_path: Option<PathBuf>,
    /// Directory holding the bundled models
    pub models_dir: PathBuf,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub object_category: ObjectCategory,
    /// `None` disables cropping
    pub crop_region: Option<CropRegion>,
    /// Detections smaller than this many pixels are dropped
    pub min_area_threshold: u32,
    /// Detections file, overwritten after every inference pass
    pub detections_output_path: Option<PathBuf>,
    pub preview_enabled: bool,
    pub inference_enabled: bool,
    /// Minimum spacing between inference passes
    pub min_inference_interval_ms: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            use_gpu: Device::Cpu,
            num_threads: 1,
            model_size: ModelSize::Small,
            external_model_path: None,
            models_dir: PathBuf::from("models"),
            confidence_threshold: 0.5,
            nms_threshold: DEFAULT_IOU_THRESHOLD,
            object_category: ObjectCategory::Any,
            crop_region: None,
            min_area_threshold: 0,
            detections_output_path: None,
            preview_enabled: true,
            inference_enabled: false,
            min_inference_interval_ms: DEFAULT_MIN_INTERVAL.as_millis() as u64,
        }
    }
}

impl FilterConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_json_slice(json.as_bytes())
    }

    /// Parse raw bytes, e.g. a C string from the host. Invalid UTF-8 is a
    /// serialization error.
    pub fn from_json_slice(json: &[u8]) -> Result<Self> {
        let config: FilterConfig = serde_json::from_slice(json)?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Reject values outside the ranges the configuration surface allows.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::Configuration(
                "confidenceThreshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            return Err(Error::Configuration(
                "nmsThreshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.num_threads > MAX_THREADS {
            return Err(Error::Configuration(format!(
                "numThreads must be between 0 and {MAX_THREADS}"
            )));
        }
        if self.model_size == ModelSize::External
            && self
                .external_model_path
                .as_ref()
                .map_or(true, |p| p.as_os_str().is_empty())
        {
            return Err(Error::Configuration(
                "External model file path is empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn min_inference_interval(&self) -> Duration {
        Duration::from_millis(self.min_inference_interval_ms)
    }

    /// Crop rectangle for a frame of the given size
    pub fn crop_rect(&self, width: u32, height: u32) -> CropRect {
        match self.crop_region {
            Some(region) => region.resolve(width, height),
            None => CropRect::full(width, height),
        }
    }

    pub fn model_key(&self) -> ModelKey {
        ModelKey {
            device: self.use_gpu,
            num_threads: self.num_threads,
            model_size: self.model_size,
            external_model_path: self.external_model_path.clone(),
            models_dir: self.models_dir.clone(),
        }
    }

    /// Detections output path, ignoring an empty string
    pub fn output_path(&self) -> Option<&Path> {
        self.detections_output_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = FilterConfig::from_json_str("{}").unwrap();
        assert_eq!(config, FilterConfig::default());
        assert!(!config.inference_enabled);
        assert!(config.preview_enabled);
        assert_eq!(config.model_size, ModelSize::Small);
    }

    #[test]
    fn test_camel_case_keys() {
        let config = FilterConfig::from_json_str(
            r#"{
                "useGPU": "cuda",
                "numThreads": 4,
                "modelSize": "face",
                "confidenceThreshold": 0.7,
                "objectCategory": 3,
                "cropRegion": {"left": 10, "right": 20, "top": 5, "bottom": 0},
                "minAreaThreshold": 100,
                "detectionsOutputPath": "/tmp/detections.json",
                "previewEnabled": false,
                "inferenceEnabled": true
            }"#,
        )
        .unwrap();

        assert_eq!(config.use_gpu, Device::Cuda);
        assert_eq!(config.num_threads, 4);
        assert_eq!(config.model_size, ModelSize::Face);
        assert_eq!(config.object_category, ObjectCategory::Label(3));
        assert_eq!(
            config.crop_region,
            Some(CropRegion {
                left: 10,
                right: 20,
                top: 5,
                bottom: 0
            })
        );
        assert_eq!(config.min_area_threshold, 100);
        assert!(config.inference_enabled);
        assert!(!config.preview_enabled);
    }

    #[test]
    fn test_object_category_forms() {
        for json in [r#"{"objectCategory": -1}"#, r#"{"objectCategory": "any"}"#] {
            let config = FilterConfig::from_json_str(json).unwrap();
            assert_eq!(config.object_category, ObjectCategory::Any);
        }
        let config = FilterConfig::from_json_str(r#"{"objectCategory": "7"}"#).unwrap();
        assert_eq!(config.object_category, ObjectCategory::Label(7));
        assert!(FilterConfig::from_json_str(r#"{"objectCategory": -5}"#).is_err());
    }

    #[test]
    fn test_object_category_round_trip_any() {
        let json = serde_json::to_value(FilterConfig::default()).unwrap();
        assert_eq!(json["objectCategory"], "any");
        assert_eq!(json["useGPU"], "cpu");
    }

    #[test]
    fn test_device_dml_alias() {
        let config = FilterConfig::from_json_str(r#"{"useGPU": "dml"}"#).unwrap();
        assert_eq!(config.use_gpu, Device::DirectMl);
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = FilterConfig::default();
        assert!(config.validate().is_ok());

        config.confidence_threshold = 1.5;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let mut config = FilterConfig::default();
        config.num_threads = 9;
        assert!(config.validate().is_err());

        let mut config = FilterConfig::default();
        config.model_size = ModelSize::External;
        assert!(config.validate().is_err());
        config.external_model_path = Some(PathBuf::from("/models/custom.onnx"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_crop_resolve() {
        let region = CropRegion {
            left: 10,
            right: 20,
            top: 30,
            bottom: 40,
        };
        assert_eq!(
            region.resolve(640, 480),
            CropRect {
                x: 10,
                y: 30,
                width: 610,
                height: 410
            }
        );
    }

    #[test]
    fn test_crop_non_positive_falls_back_to_full_frame() {
        let region = CropRegion {
            left: 400,
            right: 240,
            top: 0,
            bottom: 0,
        };
        assert_eq!(region.resolve(640, 480), CropRect::full(640, 480));

        let huge = CropRegion {
            left: u32::MAX,
            right: u32::MAX,
            top: 1,
            bottom: 1,
        };
        assert_eq!(huge.resolve(640, 480), CropRect::full(640, 480));
    }

    #[test]
    fn test_model_key_ignores_live_settings() {
        let a = FilterConfig::default();
        let mut b = a.clone();
        b.confidence_threshold = 0.9;
        b.object_category = ObjectCategory::Label(2);
        assert_eq!(a.model_key(), b.model_key());

        b.num_threads = 2;
        assert_ne!(a.model_key(), b.model_key());
    }

    #[test]
    fn test_empty_output_path_ignored() {
        let mut config = FilterConfig::default();
        config.detections_output_path = Some(PathBuf::new());
        assert!(config.output_path().is_none());
    }

    #[test]
    fn test_from_json_slice_rejects_invalid_utf8() {
        let config = FilterConfig::from_json_slice(br#"{"numThreads": 2}"#).unwrap();
        assert_eq!(config.num_threads, 2);
        assert!(matches!(
            FilterConfig::from_json_slice(b"{\"modelsDir\": \"\xff\"}"),
            Err(Error::Serialization(_))
        ));
    }
}
