//! Per-instance pipeline state shared by the tick/render thread and the
//! inference worker.
//!
//! Flags and counters are atomics. The preview buffer and the last captured
//! frame sit behind independent locks so rendering never waits on capture.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::types::Frame;

const NO_LABEL: i64 = -1;

/// Stage the inference worker is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkerPhase {
    Idle = 0,
    Dequeuing = 1,
    Preprocessing = 2,
    Inferring = 3,
    PostProcessing = 4,
    Publishing = 5,
    Stopping = 6,
    Terminated = 7,
}

impl WorkerPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerPhase::Dequeuing,
            2 => WorkerPhase::Preprocessing,
            3 => WorkerPhase::Inferring,
            4 => WorkerPhase::PostProcessing,
            5 => WorkerPhase::Publishing,
            6 => WorkerPhase::Stopping,
            7 => WorkerPhase::Terminated,
            _ => WorkerPhase::Idle,
        }
    }
}

/// Counters for monitoring the worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    frames_offered: AtomicU64,
    frames_replaced: AtomicU64,
    frames_processed: AtomicU64,
    frames_skipped_busy: AtomicU64,
    inference_errors: AtomicU64,
    persistence_errors: AtomicU64,
    label_changes: AtomicU64,
    last_preprocess_us: AtomicU64,
    last_inference_us: AtomicU64,
    last_postprocess_us: AtomicU64,
    last_detections: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Frames handed to the queue by the tick thread
    pub frames_offered: u64,
    /// Pending frames discarded because a newer one arrived
    pub frames_replaced: u64,
    /// Frames that went through inference (including failed calls)
    pub frames_processed: u64,
    /// Frames dropped because the model was absent or locked
    pub frames_skipped_busy: u64,
    pub inference_errors: u64,
    pub persistence_errors: u64,
    /// Edge-triggered updates of the published label
    pub label_changes: u64,
    pub last_preprocess_us: u64,
    pub last_inference_us: u64,
    pub last_postprocess_us: u64,
    /// Detections surviving the last pass
    pub last_detections: u64,
}

impl WorkerStats {
    pub(crate) fn record_offer(&self, replaced: bool) {
        self.frames_offered.fetch_add(1, Ordering::Relaxed);
        if replaced {
            self.frames_replaced.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_processed(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.frames_skipped_busy.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_inference_error(&self) {
        self.inference_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_persistence_error(&self) {
        self.persistence_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_label_change(&self) {
        self.label_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timings(
        &self,
        preprocess_us: u64,
        inference_us: u64,
        postprocess_us: u64,
        detections: usize,
    ) {
        self.last_preprocess_us.store(preprocess_us, Ordering::Relaxed);
        self.last_inference_us.store(inference_us, Ordering::Relaxed);
        self.last_postprocess_us.store(postprocess_us, Ordering::Relaxed);
        self.last_detections
            .store(detections as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_offered: self.frames_offered.load(Ordering::Relaxed),
            frames_replaced: self.frames_replaced.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_skipped_busy: self.frames_skipped_busy.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            persistence_errors: self.persistence_errors.load(Ordering::Relaxed),
            label_changes: self.label_changes.load(Ordering::Relaxed),
            last_preprocess_us: self.last_preprocess_us.load(Ordering::Relaxed),
            last_inference_us: self.last_inference_us.load(Ordering::Relaxed),
            last_postprocess_us: self.last_postprocess_us.load(Ordering::Relaxed),
            last_detections: self.last_detections.load(Ordering::Relaxed),
        }
    }
}

/// Mutable state of one filter instance
pub struct PipelineState {
    /// Host activation (activate/deactivate)
    active: AtomicBool,
    /// Set while a reconfiguration is in progress or after it failed
    disabled: AtomicBool,
    inference_enabled: AtomicBool,
    /// Last inference flag seen by the tick thread, for change logging
    logged_inference_enabled: AtomicBool,
    model_loaded: AtomicBool,
    last_label: AtomicI64,
    detected_object: RwLock<String>,
    last_inference: Mutex<Option<Instant>>,
    next_detection_id: AtomicU64,
    phase: AtomicU8,
    preview: Mutex<Option<Frame>>,
    captured: Mutex<Option<Frame>>,
    pub(crate) stats: WorkerStats,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            disabled: AtomicBool::new(false),
            inference_enabled: AtomicBool::new(false),
            logged_inference_enabled: AtomicBool::new(false),
            model_loaded: AtomicBool::new(false),
            last_label: AtomicI64::new(NO_LABEL),
            detected_object: RwLock::new(String::new()),
            last_inference: Mutex::new(None),
            next_detection_id: AtomicU64::new(1),
            phase: AtomicU8::new(WorkerPhase::Idle as u8),
            preview: Mutex::new(None),
            captured: Mutex::new(None),
            stats: WorkerStats::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Release);
    }

    pub fn inference_enabled(&self) -> bool {
        self.inference_enabled.load(Ordering::Acquire)
    }

    /// Returns the previous value
    pub(crate) fn set_inference_enabled(&self, enabled: bool) -> bool {
        self.inference_enabled.swap(enabled, Ordering::AcqRel)
    }

    /// True when the inference flag differs from the last logged value
    pub(crate) fn take_inference_flag_change(&self) -> Option<bool> {
        let current = self.inference_enabled();
        let previous = self
            .logged_inference_enabled
            .swap(current, Ordering::AcqRel);
        (previous != current).then_some(current)
    }

    pub fn model_loaded(&self) -> bool {
        self.model_loaded.load(Ordering::Acquire)
    }

    pub(crate) fn set_model_loaded(&self, loaded: bool) {
        self.model_loaded.store(loaded, Ordering::Release);
    }

    /// Label id of the last published detection, `None` when nothing is detected
    pub fn last_detected_label(&self) -> Option<u32> {
        let value = self.last_label.load(Ordering::Acquire);
        u32::try_from(value).ok()
    }

    /// Publish a new top label. Returns false when it equals the current one.
    pub(crate) fn publish_label(&self, label: Option<u32>, name: String) -> bool {
        let encoded = label.map_or(NO_LABEL, i64::from);
        if self.last_label.load(Ordering::Acquire) == encoded {
            return false;
        }
        *self.detected_object.write() = name;
        self.last_label.store(encoded, Ordering::Release);
        true
    }

    /// Name of the last detected object, empty when none
    pub fn detected_object(&self) -> String {
        self.detected_object.read().clone()
    }

    pub fn last_inference(&self) -> Option<Instant> {
        *self.last_inference.lock()
    }

    pub(crate) fn mark_inference(&self, at: Instant) {
        *self.last_inference.lock() = Some(at);
    }

    pub(crate) fn next_detection_id(&self) -> u64 {
        self.next_detection_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn phase(&self) -> WorkerPhase {
        WorkerPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, phase: WorkerPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub(crate) fn store_preview(&self, frame: Frame) {
        *self.preview.lock() = Some(frame);
    }

    /// Latest overlay, only if it matches the given dimensions
    pub(crate) fn preview_matching(&self, dimensions: (u32, u32)) -> Option<Frame> {
        self.preview
            .lock()
            .as_ref()
            .filter(|frame| frame.dimensions() == dimensions)
            .cloned()
    }

    pub(crate) fn store_captured(&self, frame: Frame) {
        *self.captured.lock() = Some(frame);
    }

    pub(crate) fn captured_dimensions(&self) -> Option<(u32, u32)> {
        self.captured.lock().as_ref().map(Frame::dimensions)
    }

    pub(crate) fn captured(&self) -> Option<Frame> {
        self.captured.lock().clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_label_is_none() {
        let state = PipelineState::new();
        assert_eq!(state.last_detected_label(), None);
        assert_eq!(state.detected_object(), "");
    }

    #[test]
    fn test_publish_is_edge_triggered() {
        let state = PipelineState::new();
        assert!(state.publish_label(Some(3), "car".into()));
        assert!(!state.publish_label(Some(3), "car".into()));
        assert_eq!(state.detected_object(), "car");

        assert!(state.publish_label(None, String::new()));
        assert_eq!(state.last_detected_label(), None);
        assert!(!state.publish_label(None, String::new()));
    }

    #[test]
    fn test_inference_flag_change_reported_once() {
        let state = PipelineState::new();
        assert_eq!(state.take_inference_flag_change(), None);
        state.set_inference_enabled(true);
        assert_eq!(state.take_inference_flag_change(), Some(true));
        assert_eq!(state.take_inference_flag_change(), None);
    }

    #[test]
    fn test_phase_round_trip() {
        let state = PipelineState::new();
        assert_eq!(state.phase(), WorkerPhase::Idle);
        state.set_phase(WorkerPhase::Inferring);
        assert_eq!(state.phase(), WorkerPhase::Inferring);
    }

    #[test]
    fn test_preview_dimension_match() {
        let state = PipelineState::new();
        state.store_preview(Frame::filled(4, 2, [0, 0, 0, 255]));
        assert!(state.preview_matching((4, 2)).is_some());
        assert!(state.preview_matching((2, 4)).is_none());
    }
}
