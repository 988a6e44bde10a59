//! Filter controller: the tick, render and configuration entry points.
//!
//! The host calls these from its render thread. None of them waits on
//! inference; only reconfiguration blocks, and only on the model lock.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::capture::CaptureSource;
use crate::config::{FilterConfig, ModelKey};
use crate::engine::{InferenceEngine, ModelSpec};
use crate::error::{Error, Result};
use crate::overlay;
use crate::rate_limit::should_admit;
use crate::state::{StatsSnapshot, WorkerPhase};
use crate::types::Frame;
use crate::worker::{self, Shared};

/// Builds an engine for a resolved model
pub type EngineLoader<E> = Box<dyn Fn(&ModelSpec) -> Result<E> + Send + Sync>;

/// What a tick did with the captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Host deactivated the filter
    Inactive,
    /// Reconfiguration in progress, last configuration invalid, or shut down
    Disabled,
    /// Capture had nothing to offer
    NoFrame,
    /// Raw frame published as preview; no model to run
    NoModel,
    InferenceOff,
    RateLimited,
    /// Frame handed to the worker
    Enqueued { replaced: bool },
}

/// Result of the render entry point
#[derive(Debug, Clone)]
pub enum RenderOutput {
    /// Draw the unmodified source
    Passthrough,
    /// Draw this frame instead of the source
    Frame(Frame),
}

/// One detection filter instance with its own worker thread.
pub struct DetectFilter<C: CaptureSource, E: InferenceEngine> {
    shared: Arc<Shared<E>>,
    capture: Mutex<C>,
    loader: EngineLoader<E>,
    /// Key of the loaded model, `None` when no load has succeeded
    loaded_key: Mutex<Option<ModelKey>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[cfg(feature = "onnx")]
impl<C: CaptureSource> DetectFilter<C, crate::engine::Detector> {
    /// Filter backed by the ONNX Runtime detectors.
    pub fn with_onnx(capture: C, config: FilterConfig) -> Result<Self> {
        Self::new(capture, config, Box::new(crate::engine::Detector::load))
    }
}

impl<C: CaptureSource, E: InferenceEngine> DetectFilter<C, E> {
    /// Start the worker and apply the initial configuration.
    ///
    /// An invalid configuration is an error. A model that fails to load is
    /// not: the filter comes up with inference paused and the next update
    /// retries the load.
    pub fn new(capture: C, config: FilterConfig, loader: EngineLoader<E>) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared::new(config.clone()));
        let handle = worker::spawn(shared.clone())?;

        let filter = Self {
            shared,
            capture: Mutex::new(capture),
            loader,
            loaded_key: Mutex::new(None),
            worker: Mutex::new(Some(handle)),
        };

        if let Err(e) = filter.on_configuration_update(config) {
            warn!("Filter created with inference paused: {}", e);
        }
        Ok(filter)
    }

    /// Capture a frame and, if admitted, hand it to the worker.
    pub fn on_tick(&self) -> TickOutcome {
        let state = &self.shared.state;

        if let Some(enabled) = state.take_inference_flag_change() {
            info!(
                "Inference state changed to: {}",
                if enabled { "ENABLED" } else { "DISABLED" }
            );
        }
        if !state.is_active() {
            return TickOutcome::Inactive;
        }
        if state.is_disabled() {
            debug!("Filter is disabled, skipping tick");
            return TickOutcome::Disabled;
        }

        let Some(frame) = self.capture.lock().capture_frame() else {
            return TickOutcome::NoFrame;
        };
        state.store_captured(frame.clone());

        if !state.model_loaded() {
            debug!("Model not loaded, showing raw frame");
            if self.shared.config().preview_enabled {
                state.store_preview(frame);
            }
            return TickOutcome::NoModel;
        }
        if !state.inference_enabled() {
            return TickOutcome::InferenceOff;
        }

        let interval = self.shared.config().min_inference_interval();
        if !should_admit(Instant::now(), state.last_inference(), interval) {
            return TickOutcome::RateLimited;
        }

        let replaced = self.shared.queue.offer(frame);
        state.stats.record_offer(replaced);
        TickOutcome::Enqueued { replaced }
    }

    /// Frame to draw for this render pass.
    ///
    /// Prefers the latest overlay when it matches the captured size, falls back
    /// to the raw capture, and always adds the centre reticle.
    pub fn on_render(&self) -> RenderOutput {
        let state = &self.shared.state;
        if !state.is_active() || !self.shared.config().preview_enabled {
            return RenderOutput::Passthrough;
        }
        let Some(dimensions) = state.captured_dimensions() else {
            return RenderOutput::Passthrough;
        };
        let Some(mut frame) = state
            .preview_matching(dimensions)
            .or_else(|| state.captured())
        else {
            return RenderOutput::Passthrough;
        };

        overlay::draw_reticle(&mut frame.image);
        RenderOutput::Frame(frame)
    }

    /// Swap in a new configuration, reloading the model when needed.
    ///
    /// Ticks are refused for the duration. An invalid configuration leaves
    /// them refused until a valid one arrives; a failed model load leaves
    /// the filter showing raw video without inference.
    pub fn on_configuration_update(&self, config: FilterConfig) -> Result<()> {
        let state = &self.shared.state;
        state.set_disabled(true);

        if self.shared.queue.is_stopped() {
            warn!("Ignoring configuration update after shutdown");
            return Err(Error::Configuration("filter is shut down".to_string()));
        }
        if let Err(e) = config.validate() {
            error!("Rejected configuration: {}", e);
            return Err(e);
        }

        let key = config.model_key();
        let reload = self.loaded_key.lock().as_ref() != Some(&key);
        *self.shared.config.write() = Arc::new(config.clone());
        state.set_inference_enabled(config.inference_enabled);

        if reload {
            info!(
                "Loading model: device={}, threads={}, size={}",
                config.use_gpu, config.num_threads, config.model_size
            );
            self.reload_model(&config, key)?;
        } else {
            debug!("Model settings unchanged, keeping loaded model");
        }

        state.set_disabled(false);
        Ok(())
    }

    /// Apply a JSON configuration document.
    ///
    /// A document that does not parse is rejected like an invalid
    /// configuration: ticks stay refused until a valid one arrives.
    pub fn on_configuration_json(&self, json: &[u8]) -> Result<()> {
        match FilterConfig::from_json_slice(json) {
            Ok(config) => self.on_configuration_update(config),
            Err(e) => {
                self.shared.state.set_disabled(true);
                error!("Rejected configuration: {}", e);
                Err(Error::Configuration(e.to_string()))
            }
        }
    }

    fn reload_model(&self, config: &FilterConfig, key: ModelKey) -> Result<()> {
        let state = &self.shared.state;
        let mut model = self.shared.model.lock();
        *model = None;
        state.set_model_loaded(false);
        *self.loaded_key.lock() = None;

        let loaded = ModelSpec::resolve(config).and_then(|spec| {
            let engine = (self.loader)(&spec)?;
            Ok((spec, engine))
        });
        match loaded {
            Ok((spec, engine)) => {
                *model = Some(engine);
                *self.shared.class_names.write() = Arc::from(spec.class_names);
                *self.loaded_key.lock() = Some(key);
                // Label ids of the previous model mean nothing under the new names
                if state.publish_label(None, String::new()) {
                    state.stats.record_label_change();
                }
                state.set_model_loaded(true);
                Ok(())
            }
            Err(e) => {
                error!("Failed to load model: {}", e);
                // Ticks keep showing raw video; nothing is enqueued without a model
                state.set_disabled(false);
                Err(match e {
                    e @ (Error::ModelLoad(_) | Error::Configuration(_)) => e,
                    other => Error::ModelLoad(other.to_string()),
                })
            }
        }
    }

    /// Host activation, independent of configuration.
    pub fn set_active(&self, active: bool) {
        self.shared.state.set_active(active);
    }

    pub fn is_active(&self) -> bool {
        self.shared.state.is_active()
    }

    pub fn is_disabled(&self) -> bool {
        self.shared.state.is_disabled()
    }

    pub fn model_loaded(&self) -> bool {
        self.shared.state.model_loaded()
    }

    pub fn config(&self) -> Arc<FilterConfig> {
        self.shared.config()
    }

    /// Name of the last detected object, empty when none
    pub fn last_detected_object(&self) -> String {
        self.shared.state.detected_object()
    }

    pub fn last_detected_label(&self) -> Option<u32> {
        self.shared.state.last_detected_label()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.state.stats()
    }

    pub fn phase(&self) -> WorkerPhase {
        self.shared.state.phase()
    }

    /// Stop and join the worker, then release the model.
    ///
    /// Safe to call more than once; `Drop` calls it too.
    pub fn shutdown(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        self.shared.state.set_disabled(true);
        self.shared.queue.stop();
        if handle.join().is_err() {
            error!("Inference worker panicked");
        }

        *self.shared.model.lock() = None;
        self.shared.state.set_model_loaded(false);
        debug!("Detection filter shut down");
    }
}

impl<C: CaptureSource, E: InferenceEngine> Drop for DetectFilter<C, E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BgrImage, DetectionSet};

    struct NullEngine;

    impl InferenceEngine for NullEngine {
        fn set_confidence_threshold(&mut self, _threshold: f32) {}

        fn infer(&mut self, _image: &BgrImage) -> Result<DetectionSet> {
            Ok(Vec::new())
        }
    }

    struct Still(Option<Frame>);

    impl CaptureSource for Still {
        fn capture_frame(&mut self) -> Option<Frame> {
            self.0.clone()
        }
    }

    fn loader() -> EngineLoader<NullEngine> {
        Box::new(|_: &ModelSpec| Ok(NullEngine))
    }

    #[test]
    fn test_inactive_filter_skips_tick() {
        let filter = DetectFilter::new(Still(None), FilterConfig::default(), loader()).unwrap();
        filter.set_active(false);
        assert_eq!(filter.on_tick(), TickOutcome::Inactive);
        assert!(matches!(filter.on_render(), RenderOutput::Passthrough));
    }

    #[test]
    fn test_no_capture() {
        let filter = DetectFilter::new(Still(None), FilterConfig::default(), loader()).unwrap();
        assert_eq!(filter.on_tick(), TickOutcome::NoFrame);
    }

    #[test]
    fn test_inference_off_still_renders_capture() {
        let frame = Frame::filled(64, 48, [0, 0, 0, 255]);
        let filter =
            DetectFilter::new(Still(Some(frame)), FilterConfig::default(), loader()).unwrap();

        assert_eq!(filter.on_tick(), TickOutcome::InferenceOff);
        match filter.on_render() {
            RenderOutput::Frame(f) => assert_eq!(f.dimensions(), (64, 48)),
            RenderOutput::Passthrough => panic!("expected a frame"),
        }
    }

    #[test]
    fn test_preview_disabled_passes_through() {
        let frame = Frame::filled(8, 8, [0, 0, 0, 255]);
        let config = FilterConfig {
            preview_enabled: false,
            ..FilterConfig::default()
        };
        let filter = DetectFilter::new(Still(Some(frame)), config, loader()).unwrap();
        filter.on_tick();
        assert!(matches!(filter.on_render(), RenderOutput::Passthrough));
    }

    #[test]
    fn test_invalid_initial_config_is_rejected() {
        let config = FilterConfig {
            confidence_threshold: 2.0,
            ..FilterConfig::default()
        };
        assert!(DetectFilter::new(Still(None), config, loader()).is_err());
    }

    #[test]
    fn test_update_after_shutdown_is_refused() {
        let filter = DetectFilter::new(Still(None), FilterConfig::default(), loader()).unwrap();
        filter.shutdown();

        let config = FilterConfig {
            num_threads: 2,
            ..FilterConfig::default()
        };
        assert!(matches!(
            filter.on_configuration_update(config),
            Err(Error::Configuration(_))
        ));
        assert!(!filter.model_loaded());
        assert!(filter.is_disabled());
    }

    #[test]
    fn test_unparseable_json_disables() {
        let filter = DetectFilter::new(Still(None), FilterConfig::default(), loader()).unwrap();
        assert!(matches!(
            filter.on_configuration_json(b"{not json"),
            Err(Error::Configuration(_))
        ));
        assert!(filter.is_disabled());

        filter.on_configuration_json(b"{}").unwrap();
        assert!(!filter.is_disabled());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let filter = DetectFilter::new(Still(None), FilterConfig::default(), loader()).unwrap();
        filter.shutdown();
        assert_eq!(filter.phase(), WorkerPhase::Terminated);
        assert!(!filter.model_loaded());
        filter.shutdown();
    }
}
