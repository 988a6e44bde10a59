//! QNTX Detect - command line driver
//!
//! Runs the detection filter over still images at a fixed tick rate, the way
//! a video host would drive it.
//!
//! Usage:
//!     qntx-detect --input street.jpg --model-size medium --threshold 0.4
//!     qntx-detect --input a.png --input b.png --config filter.json --preview-out out.png

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use qntx_detect::capture::bgra_to_rgba;
use qntx_detect::{
    logging, DetectFilter, Device, FilterConfig, ModelSize, ObjectCategory, RenderOutput,
    StillImageSource,
};

#[derive(Parser, Debug)]
#[command(name = "qntx-detect")]
#[command(about = "Run the QNTX object detection filter over images")]
#[command(version)]
struct Args {
    /// Input image(s), cycled as video frames
    #[arg(short, long, required = true)]
    input: Vec<PathBuf>,

    /// Filter configuration JSON (camelCase keys)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// small, medium, large, face or external
    #[arg(long, value_parser = parse_value::<ModelSize>)]
    model_size: Option<ModelSize>,

    /// cpu, cuda, directml, coreml or tensorrt
    #[arg(long, value_parser = parse_value::<Device>)]
    device: Option<Device>,

    /// Confidence threshold (0.0-1.0)
    #[arg(short, long)]
    threshold: Option<f32>,

    /// Label id to keep, or "any"
    #[arg(long, value_parser = parse_category)]
    category: Option<ObjectCategory>,

    /// Write detections JSON here after every inference pass
    #[arg(long)]
    detections_out: Option<PathBuf>,

    /// Directory holding the bundled models
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Tick rate
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Number of ticks to run
    #[arg(long, default_value = "30")]
    frames: u32,

    /// Save the last rendered frame as PNG
    #[arg(long)]
    preview_out: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_value<T: DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.to_lowercase())).map_err(|e| e.to_string())
}

fn parse_category(s: &str) -> Result<ObjectCategory, String> {
    let value = match s.parse::<i64>() {
        Ok(id) => serde_json::Value::from(id),
        Err(_) => serde_json::Value::String(s.to_string()),
    };
    serde_json::from_value(value).map_err(|e| e.to_string())
}

fn build_config(args: &Args) -> qntx_detect::Result<FilterConfig> {
    let mut config = match &args.config {
        Some(path) => FilterConfig::from_file(path)?,
        None => FilterConfig::default(),
    };
    config.inference_enabled = true;

    if let Some(size) = args.model_size {
        config.model_size = size;
    }
    if let Some(device) = args.device {
        config.use_gpu = device;
    }
    if let Some(threshold) = args.threshold {
        config.confidence_threshold = threshold;
    }
    if let Some(category) = args.category {
        config.object_category = category;
    }
    if let Some(path) = &args.detections_out {
        config.detections_output_path = Some(path.clone());
    }
    if let Some(dir) = &args.models_dir {
        config.models_dir = dir.clone();
    }
    if args.preview_out.is_some() {
        config.preview_enabled = true;
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init_with_filter(&args.log_level);

    info!("Starting QNTX Detect v{}", env!("CARGO_PKG_VERSION"));

    let config = build_config(&args)?;
    let source = StillImageSource::open(&args.input)?;
    let filter = DetectFilter::with_onnx(source, config)?;
    if !filter.model_loaded() {
        warn!("Model not loaded, frames will pass through without detection");
    }

    let interval = Duration::from_secs_f64(1.0 / f64::from(args.fps.max(1)));
    let mut last_frame = None;
    for _ in 0..args.frames {
        let tick_start = Instant::now();
        filter.on_tick();
        if let RenderOutput::Frame(frame) = filter.on_render() {
            last_frame = Some(frame);
        }
        thread::sleep(interval.saturating_sub(tick_start.elapsed()));
    }

    filter.shutdown();

    let summary = serde_json::json!({
        "lastDetectedObject": filter.last_detected_object(),
        "lastDetectedLabel": filter.last_detected_label(),
        "phase": filter.phase(),
        "stats": filter.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(path) = &args.preview_out {
        match last_frame {
            Some(frame) => {
                bgra_to_rgba(&frame.image).save(path)?;
                info!("Wrote preview to {}", path.display());
            }
            None => warn!("No frame was rendered, nothing written to {}", path.display()),
        }
    }

    Ok(())
}
