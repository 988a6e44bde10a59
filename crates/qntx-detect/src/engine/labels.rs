//! Class names for the bundled and external models.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// COCO class names used by the bundled EdgeYOLO models
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck",
    "boat", "traffic light", "fire hydrant", "stop sign", "parking meter", "bench",
    "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra",
    "giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee",
    "skis", "snowboard", "sports ball", "kite", "baseball bat", "baseball glove",
    "skateboard", "surfboard", "tennis racket", "bottle", "wine glass", "cup",
    "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

/// Single class of the face detector
pub const FACE_CLASSES: [&str; 1] = ["face"];

pub fn coco_class_names() -> Vec<String> {
    COCO_CLASSES.iter().map(|s| s.to_string()).collect()
}

pub fn face_class_names() -> Vec<String> {
    FACE_CLASSES.iter().map(|s| s.to_string()).collect()
}

#[derive(Deserialize)]
struct LabelsFile {
    names: Option<Vec<String>>,
}

/// Labels file expected next to an external model (`model.onnx` → `model.json`)
pub fn labels_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("json")
}

/// Read the `names` array from the labels file that sits beside `model_path`.
pub fn read_class_names(model_path: &Path) -> Result<Vec<String>> {
    let path = labels_path(model_path);
    let json = std::fs::read_to_string(&path).map_err(|_| {
        Error::Configuration(format!("JSON file not found: {}", path.display()))
    })?;
    let file: LabelsFile = serde_json::from_str(&json).map_err(|e| {
        Error::Configuration(format!("invalid labels file {}: {}", path.display(), e))
    })?;
    let names = file.names.ok_or_else(|| {
        Error::Configuration("JSON file does not contain 'names' field".to_string())
    })?;

    debug!("Loaded {} class names from {}", names.len(), path.display());
    Ok(names)
}

/// Display name for a label id, falling back to the id itself
pub fn class_name(names: &[String], label: u32) -> String {
    names
        .get(label as usize)
        .cloned()
        .unwrap_or_else(|| label.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_path_swaps_extension() {
        assert_eq!(
            labels_path(Path::new("/models/custom.onnx")),
            PathBuf::from("/models/custom.json")
        );
    }

    #[test]
    fn test_read_class_names() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("custom.onnx");
        std::fs::write(dir.path().join("custom.json"), r#"{"names": ["cat", "dog"]}"#).unwrap();

        assert_eq!(read_class_names(&model).unwrap(), vec!["cat", "dog"]);
    }

    #[test]
    fn test_missing_names_field() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("custom.onnx");
        std::fs::write(dir.path().join("custom.json"), r#"{"labels": ["cat"]}"#).unwrap();

        let err = read_class_names(&model).unwrap_err();
        assert!(err.to_string().contains("'names'"));
    }

    #[test]
    fn test_missing_labels_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_class_names(&dir.path().join("absent.onnx")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_class_name_fallback() {
        let names = coco_class_names();
        assert_eq!(class_name(&names, 2), "car");
        assert_eq!(class_name(&names, 500), "500");
    }
}
