//! QNTX Object Detection Filter
//!
//! Real-time object detection on live video without stalling the video
//! pipeline. The host's tick thread captures frames and hands them to a
//! single inference worker through a one-slot queue that always keeps the
//! newest frame.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────┐   ┌──────────────────┐
//! │ CaptureSource│──▶│ on_tick      │──▶│ FrameQueue │──▶│ worker thread    │
//! │ (BGRA frame) │   │ rate limiter │   │ (1 slot)   │   │ crop → infer →   │
//! └──────────────┘   └──────────────┘   └────────────┘   │ remap → filter → │
//!                                                        │ NMS → persist    │
//!                    ┌──────────────┐   ┌────────────┐   └────────┬─────────┘
//!                    │ on_render    │◀──│ preview    │◀───────────┘
//!                    │ (+ reticle)  │   │ buffer     │
//!                    └──────────────┘   └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! # #[cfg(feature = "onnx")]
//! # fn main() -> qntx_detect::Result<()> {
//! use qntx_detect::{DetectFilter, FilterConfig, PushSource, RenderOutput};
//!
//! let source = PushSource::new();
//! let config = FilterConfig {
//!     inference_enabled: true,
//!     ..FilterConfig::default()
//! };
//! let filter = DetectFilter::with_onnx(source.clone(), config)?;
//!
//! // per host frame
//! # let (bgra, width, height) = (vec![0u8; 640 * 480 * 4], 640, 480);
//! source.push(&bgra, width, height, width as usize * 4)?;
//! filter.on_tick();
//! if let RenderOutput::Frame(frame) = filter.on_render() {
//!     // draw frame.image
//! }
//! println!("{}", filter.last_detected_object());
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "onnx"))]
//! # fn main() {}
//! ```
//!
//! ## Memory Ownership (C ABI)
//!
//! - `qntx_detect_new()` allocates on the Rust heap, caller owns the pointer
//! - `qntx_detect_free()` joins the worker and then releases the model
//! - Returned strings are freed with `qntx_detect_string_free()`

pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod nms;
pub mod overlay;
pub mod persist;
pub mod pipeline;
pub mod queue;
pub mod rate_limit;
pub mod state;
pub mod types;
mod worker;

#[cfg(feature = "onnx")]
pub mod ffi;

// Re-export main types
pub use capture::{CaptureSource, PushSource, StillImageSource};
pub use config::{CropRegion, Device, FilterConfig, ModelSize, ObjectCategory};
pub use engine::{DetectorKind, InferenceEngine, ModelSpec};
pub use error::{Error, Result};
pub use pipeline::{DetectFilter, EngineLoader, RenderOutput, TickOutcome};
pub use state::{StatsSnapshot, WorkerPhase};
pub use types::{BgrImage, BgraImage, Detection, DetectionSet, Frame, Rect};

#[cfg(feature = "onnx")]
pub use engine::Detector;
