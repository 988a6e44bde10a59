//! ONNX Runtime session shared by the detectors.

use std::collections::HashMap;

use ndarray::{Array4, ArrayD};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, DirectMLExecutionProvider,
    ExecutionProviderDispatch, TensorRTExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use tracing::{debug, info, warn};

use super::ModelSpec;
use crate::config::Device;
use crate::error::{Error, Result};

/// Input edge used when the model declares a dynamic spatial dimension
const DYNAMIC_INPUT_FALLBACK: u32 = 640;

pub(crate) struct OnnxSession {
    session: Session,
    input_name: String,
    input_width: u32,
    input_height: u32,
}

fn execution_providers(device: Device) -> Vec<ExecutionProviderDispatch> {
    match device {
        Device::Cpu => Vec::new(),
        Device::Cuda => vec![CUDAExecutionProvider::default().build()],
        Device::DirectMl => vec![DirectMLExecutionProvider::default().build()],
        Device::CoreMl => vec![CoreMLExecutionProvider::default().build()],
        Device::TensorRt => vec![TensorRTExecutionProvider::default().build()],
    }
}

fn spatial_dim(value: i64) -> u32 {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .unwrap_or(DYNAMIC_INPUT_FALLBACK)
}

impl OnnxSession {
    pub fn load(spec: &ModelSpec) -> Result<Self> {
        if !spec.model_path.exists() {
            return Err(Error::ModelLoad(format!(
                "model file not found: {}",
                spec.model_path.display()
            )));
        }

        let mut builder = Session::builder()
            .map_err(|e| Error::ModelLoad(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| Error::ModelLoad(e.to_string()))?
            .with_parallel_execution(true)
            .map_err(|e| Error::ModelLoad(e.to_string()))?;

        if spec.num_threads > 0 {
            let threads = spec.num_threads as usize;
            builder = builder
                .with_intra_threads(threads)
                .map_err(|e| Error::ModelLoad(e.to_string()))?
                .with_inter_threads(threads)
                .map_err(|e| Error::ModelLoad(e.to_string()))?;
        }

        let providers = execution_providers(spec.device);
        if !providers.is_empty() {
            builder = builder
                .with_execution_providers(providers)
                .map_err(|e| Error::ModelLoad(e.to_string()))?;
        }

        let session = builder
            .commit_from_file(&spec.model_path)
            .map_err(|e| Error::ModelLoad(e.to_string()))?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| Error::ModelLoad("model has no inputs".to_string()))?;
        let dims = input
            .input_type
            .tensor_dimensions()
            .map(|d| d.to_vec())
            .unwrap_or_default();
        if dims.len() != 4 {
            return Err(Error::ModelLoad(format!(
                "expected NCHW input, got shape {:?}",
                dims
            )));
        }
        let input_name = input.name.clone();
        let input_height = spatial_dim(dims[2]);
        let input_width = spatial_dim(dims[3]);
        if dims[2] <= 0 || dims[3] <= 0 {
            warn!(
                "Model input has dynamic size, using {}x{}",
                input_width, input_height
            );
        }

        info!(
            "Input {} is {}x{}, {} outputs",
            input_name,
            input_width,
            input_height,
            session.outputs.len()
        );
        for output in &session.outputs {
            debug!("Output name: {}", output.name);
        }

        Ok(Self {
            session,
            input_name,
            input_width,
            input_height,
        })
    }

    /// Model input as (width, height)
    pub fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    pub fn output_names(&self) -> Vec<String> {
        self.session.outputs.iter().map(|o| o.name.clone()).collect()
    }

    /// Run one forward pass and copy every f32 output out of the session.
    pub fn run(&self, blob: Array4<f32>) -> Result<HashMap<String, ArrayD<f32>>> {
        let outputs = self
            .session
            .run(
                ort::inputs! {
                    self.input_name.as_str() => blob,
                }
                .map_err(|e| Error::Inference(e.to_string()))?,
            )
            .map_err(|e| Error::Inference(e.to_string()))?;

        let mut tensors = HashMap::new();
        for name in self.output_names() {
            let Some(value) = outputs.get(name.as_str()) else {
                continue;
            };
            let view: ndarray::ArrayViewD<f32> = value
                .try_extract_tensor()
                .map_err(|e| Error::Inference(e.to_string()))?;
            tensors.insert(name, view.to_owned());
        }
        Ok(tensors)
    }
}
