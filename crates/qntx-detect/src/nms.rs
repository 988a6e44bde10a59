//! Non-maximum suppression over detection sets.
//!
//! Greedy and class-agnostic. Quadratic in the number of detections, which
//! stays in the tens per frame.

use crate::types::Detection;

/// Default IoU threshold used by the bundled detectors
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Indices of the detections kept by NMS, in descending confidence order.
///
/// Candidates are visited by descending confidence (stable, so ties keep
/// their input order). A candidate is rejected when its IoU with any already
/// accepted detection exceeds `iou_threshold`.
pub fn suppress(objects: &[Detection], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..objects.len()).collect();
    order.sort_by(|&a, &b| objects[b].confidence.total_cmp(&objects[a].confidence));

    let mut picked: Vec<usize> = Vec::with_capacity(objects.len());
    for i in order {
        let candidate = &objects[i].rect;
        let overlaps = picked
            .iter()
            .any(|&j| candidate.iou(&objects[j].rect) > iou_threshold);
        if !overlaps {
            picked.push(i);
        }
    }
    picked
}

/// Run [`suppress`] and return the surviving detections.
pub fn apply(objects: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let picked = suppress(&objects, iou_threshold);
    let mut slots: Vec<Option<Detection>> = objects.into_iter().map(Some).collect();
    picked
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}
