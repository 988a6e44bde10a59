//! Inference worker thread.
//!
//! ```text
//! Idle → Dequeuing → Preprocessing → Inferring → PostProcessing → Publishing → Idle
//!            │                           │
//!            └── stop ──► Stopping ──► Terminated
//!                                        (model absent/busy: skip, back to Dequeuing)
//! ```

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{FilterConfig, ObjectCategory};
use crate::engine::labels::class_name;
use crate::engine::preprocess::to_bgr;
use crate::engine::InferenceEngine;
use crate::error::Error;
use crate::logging::prefix;
use crate::nms;
use crate::overlay;
use crate::persist;
use crate::queue::FrameQueue;
use crate::state::{PipelineState, WorkerPhase};
use crate::types::{Detection, DetectionSet, Frame};

/// State shared between the controller and the worker
pub(crate) struct Shared<E> {
    pub config: RwLock<Arc<FilterConfig>>,
    /// Taken with `try_lock` by the worker, blocking by reconfiguration
    pub model: Mutex<Option<E>>,
    /// Names for the loaded model, replaced together with it
    pub class_names: RwLock<Arc<[String]>>,
    pub queue: FrameQueue<Frame>,
    pub state: PipelineState,
}

impl<E> Shared<E> {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            model: Mutex::new(None),
            class_names: RwLock::new(Arc::from(Vec::new())),
            queue: FrameQueue::new(),
            state: PipelineState::new(),
        }
    }

    pub fn config(&self) -> Arc<FilterConfig> {
        self.config.read().clone()
    }
}

pub(crate) fn spawn<E: InferenceEngine>(shared: Arc<Shared<E>>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("qntx-detect-worker".to_string())
        .spawn(move || run(&shared))
}

fn run<E: InferenceEngine>(shared: &Shared<E>) {
    info!("{} Inference worker started", prefix::OPEN);
    let state = &shared.state;

    while !shared.queue.is_stopped() {
        state.set_phase(WorkerPhase::Dequeuing);
        let Some(frame) = shared.queue.take_blocking() else {
            break;
        };
        if shared.queue.is_stopped() {
            debug!("Discarding frame dequeued during shutdown");
            break;
        }
        process_frame(shared, frame);
        state.set_phase(WorkerPhase::Idle);
    }

    state.set_phase(WorkerPhase::Stopping);
    debug!("Inference worker leaving loop");
    state.set_phase(WorkerPhase::Terminated);
    info!("{} Inference worker stopped", prefix::CLOSE);
}

fn micros_since(start: Instant) -> u64 {
    start.elapsed().as_micros() as u64
}

fn process_frame<E: InferenceEngine>(shared: &Shared<E>, frame: Frame) {
    let state = &shared.state;
    let config = shared.config();

    state.set_phase(WorkerPhase::Preprocessing);
    let preprocess_start = Instant::now();
    let (width, height) = frame.dimensions();
    let crop = config.crop_rect(width, height);
    let input = to_bgr(&frame.image, crop);
    let preprocess_us = micros_since(preprocess_start);

    state.set_phase(WorkerPhase::Inferring);
    let Some(mut guard) = shared.model.try_lock() else {
        debug!("{}, skipping frame", Error::ModelBusy);
        state.stats.record_skipped();
        return;
    };
    let Some(model) = guard.as_mut() else {
        debug!("No model loaded, skipping frame");
        state.stats.record_skipped();
        return;
    };
    let class_names = shared.class_names.read().clone();

    let inference_start = Instant::now();
    model.set_confidence_threshold(config.confidence_threshold);
    let result = model.infer(&input);
    let deduplicates = model.deduplicates();
    drop(guard);
    let inference_us = micros_since(inference_start);
    state.stats.record_processed();

    let (raw, succeeded) = match result {
        Ok(detections) => {
            state.mark_inference(Instant::now());
            (detections, true)
        }
        Err(e) => {
            warn!("Inference error: {}", e);
            state.stats.record_inference_error();
            (Vec::new(), false)
        }
    };
    debug!("Inference returned {} objects (before filtering)", raw.len());

    state.set_phase(WorkerPhase::PostProcessing);
    let postprocess_start = Instant::now();
    let nms_threshold = (!deduplicates).then_some(config.nms_threshold);
    let mut detections = postprocess(
        raw,
        crop.origin(),
        config.object_category,
        nms_threshold,
        config.min_area_threshold,
    );
    for det in &mut detections {
        det.id = state.next_detection_id();
    }

    if succeeded {
        if let Some(path) = config.output_path() {
            if let Err(e) = persist::write_detections(path, &detections, &class_names) {
                warn!("{}", e);
                state.stats.record_persistence_error();
            }
        }
    }
    let postprocess_us = micros_since(postprocess_start);

    state.set_phase(WorkerPhase::Publishing);
    let top = top_detection(&detections);
    let name = top
        .map(|d| class_name(&class_names, d.label))
        .unwrap_or_default();
    if state.publish_label(top.map(|d| d.label), name.clone()) {
        state.stats.record_label_change();
        if name.is_empty() {
            info!("{} No object detected", prefix::DETECT);
        } else {
            info!("{} Detected object: {}", prefix::DETECT, name);
        }
    }

    if config.preview_enabled {
        let image = overlay::compose_preview(&frame.image, &detections, crop);
        state.store_preview(Frame {
            image,
            captured_at: frame.captured_at,
        });
    }

    state
        .stats
        .record_timings(preprocess_us, inference_us, postprocess_us, detections.len());
}

/// Remap, filter by category, deduplicate and drop small boxes, in that order.
///
/// `nms_threshold` is `None` when the engine already suppressed overlaps.
pub(crate) fn postprocess(
    raw: DetectionSet,
    (dx, dy): (f32, f32),
    category: ObjectCategory,
    nms_threshold: Option<f32>,
    min_area: u32,
) -> DetectionSet {
    let remapped: DetectionSet = raw
        .into_iter()
        .map(|mut det| {
            det.rect = det.rect.translate(dx, dy);
            det
        })
        .filter(|det| category.matches(det.label))
        .collect();

    let deduplicated = match nms_threshold {
        Some(threshold) => nms::apply(remapped, threshold),
        None => remapped,
    };

    let min_area = min_area as f32;
    deduplicated
        .into_iter()
        .filter(|det| det.rect.area() >= min_area)
        .collect()
}

/// Highest confidence detection; the earliest wins a tie.
pub(crate) fn top_detection(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().fold(None, |best: Option<&Detection>, det| match best {
        Some(b) if b.confidence >= det.confidence => Some(b),
        _ => Some(det),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;
    use pretty_assertions::assert_eq;

    fn det(label: u32, confidence: f32, x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection::new(label, confidence, Rect::new(x, y, w, h))
    }

    #[test]
    fn test_remap_adds_crop_origin() {
        let out = postprocess(
            vec![det(1, 0.9, 5.0, 6.0, 20.0, 30.0)],
            (100.0, 50.0),
            ObjectCategory::Any,
            None,
            0,
        );
        assert_eq!(out[0].rect, Rect::new(105.0, 56.0, 20.0, 30.0));
    }

    #[test]
    fn test_zero_crop_keeps_coordinates() {
        let input = vec![det(1, 0.9, 5.0, 6.0, 20.0, 30.0)];
        let out = postprocess(input.clone(), (0.0, 0.0), ObjectCategory::Any, None, 0);
        assert_eq!(out, input);
    }

    #[test]
    fn test_category_filter() {
        let input = vec![
            det(3, 0.9, 0.0, 0.0, 10.0, 10.0),
            det(7, 0.8, 50.0, 50.0, 10.0, 10.0),
            det(3, 0.7, 100.0, 100.0, 10.0, 10.0),
        ];
        let out = postprocess(input.clone(), (0.0, 0.0), ObjectCategory::Label(3), None, 0);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|d| d.label == 3));

        let all = postprocess(input.clone(), (0.0, 0.0), ObjectCategory::Any, None, 0);
        assert_eq!(all, input);
    }

    #[test]
    fn test_nms_only_when_requested() {
        let input = vec![
            det(0, 0.6, 0.0, 0.0, 10.0, 10.0),
            det(0, 0.9, 0.0, 0.0, 10.0, 10.0),
        ];
        let raw = postprocess(input.clone(), (0.0, 0.0), ObjectCategory::Any, None, 0);
        assert_eq!(raw.len(), 2);

        let deduped = postprocess(input, (0.0, 0.0), ObjectCategory::Any, Some(0.45), 0);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].confidence, 0.9);
    }

    #[test]
    fn test_min_area_drops_small_boxes() {
        let input = vec![
            det(0, 0.9, 0.0, 0.0, 2.0, 2.0),
            det(1, 0.8, 50.0, 50.0, 20.0, 20.0),
        ];
        let out = postprocess(input, (0.0, 0.0), ObjectCategory::Any, None, 100);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, 1);
    }

    #[test]
    fn test_top_detection_prefers_first_on_tie() {
        let dets = vec![
            det(4, 0.5, 0.0, 0.0, 1.0, 1.0),
            det(2, 0.8, 0.0, 0.0, 1.0, 1.0),
            det(9, 0.8, 0.0, 0.0, 1.0, 1.0),
        ];
        assert_eq!(top_detection(&dets).map(|d| d.label), Some(2));
        assert!(top_detection(&[]).is_none());
    }
}
