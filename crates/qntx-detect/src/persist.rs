//! Detections file.
//!
//! The file holds the detections of the most recent inference pass only and
//! is replaced on every pass.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::labels::class_name;
use crate::error::{Error, Result};
use crate::types::{Detection, Rect};

/// One entry of the detections file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub label: String,
    pub confidence: f32,
    pub rect: Rect,
    pub id: u64,
}

impl DetectionRecord {
    pub fn from_detection(det: &Detection, class_names: &[String]) -> Self {
        Self {
            label: class_name(class_names, det.label),
            confidence: det.confidence,
            rect: det.rect,
            id: det.id,
        }
    }
}

/// Overwrite `path` with the given detections as a JSON array.
///
/// Written to a sibling temp file first so readers never see a partial file.
pub fn write_detections(path: &Path, detections: &[Detection], class_names: &[String]) -> Result<()> {
    let records: Vec<DetectionRecord> = detections
        .iter()
        .map(|d| DetectionRecord::from_detection(d, class_names))
        .collect();
    let json = serde_json::to_vec_pretty(&records)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    let write = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    };
    write().map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        Error::Persistence(format!("{}: {}", path.display(), e))
    })
}

pub fn read_detections(path: &Path) -> Result<Vec<DetectionRecord>> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names() -> Vec<String> {
        vec!["person".into(), "bicycle".into()]
    }

    #[test]
    fn test_write_uses_class_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.json");
        let dets = vec![
            Detection::new(1, 0.8, Rect::new(1.0, 2.0, 3.0, 4.0)).with_id(7),
            Detection::new(9, 0.6, Rect::new(0.0, 0.0, 1.0, 1.0)).with_id(8),
        ];

        write_detections(&path, &dets, &names()).unwrap();
        let records = read_detections(&path).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].label, "bicycle");
        assert_eq!(records[0].rect, Rect::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(records[0].id, 7);
        assert_eq!(records[1].label, "9");
    }

    #[test]
    fn test_each_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.json");
        let det = Detection::new(0, 0.9, Rect::new(0.0, 0.0, 5.0, 5.0)).with_id(1);

        write_detections(&path, &[det.clone(), det], &names()).unwrap();
        write_detections(&path, &[], &names()).unwrap();

        assert!(read_detections(&path).unwrap().is_empty());
        assert!(!dir.path().join("detections.json.tmp").exists());
    }

    #[test]
    fn test_unwritable_path_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("detections.json");
        let err = write_detections(&path, &[], &names()).unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }

    #[test]
    fn test_record_shape() {
        let det = Detection::new(0, 0.5, Rect::new(1.0, 2.0, 3.0, 4.0)).with_id(3);
        let value = serde_json::to_value(DetectionRecord::from_detection(&det, &names())).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "label": "person",
                "confidence": 0.5,
                "rect": {"x": 1.0, "y": 2.0, "width": 3.0, "height": 4.0},
                "id": 3
            })
        );
    }
}
