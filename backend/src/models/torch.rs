use ndarray::Array2;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tch::{CModule, Device, Kind, Tensor};

use super::ModelLoadError;
use crate::pipeline::{FeatureExtractor, GateModel, ModelError, ModelResult, NormalizedTensor};

/// TorchScript module shared across requests.
///
/// Forward passes are serialized through the mutex so a single device never
/// sees concurrent submissions from this handle.
#[derive(Clone)]
pub struct TorchModel {
    name: String,
    model: Arc<Mutex<CModule>>,
    device: Device,
}

impl TorchModel {
    pub fn load(name: &str, model_path: &Path) -> Result<Self, ModelLoadError> {
        let device = Device::cuda_if_available();
        let module = CModule::load_on_device(model_path, device).map_err(|e| {
            ModelLoadError::Backend(format!("{} ({}): {}", name, model_path.display(), e))
        })?;
        log::info!(
            "Loaded {} from {} on {:?}",
            name,
            model_path.display(),
            device
        );
        Ok(Self {
            name: name.to_string(),
            model: Arc::new(Mutex::new(module)),
            device,
        })
    }

    /// Runs one forward pass and returns the output shape with its flattened values.
    fn forward(&self, input: &NormalizedTensor) -> ModelResult<(Vec<i64>, Vec<f32>)> {
        let [n, c, h, w] = input.shape();
        let tensor = Tensor::from_slice(input.as_slice())
            .reshape([n as i64, c as i64, h as i64, w as i64])
            .to_device(self.device);

        let model = self
            .model
            .lock()
            .map_err(|_| ModelError::new(format!("{} lock poisoned", self.name)))?;
        let output = tch::no_grad(|| model.forward_ts(&[tensor]))
            .map_err(|e| ModelError::new(format!("{} forward pass failed: {}", self.name, e)))?;
        drop(model);

        let output = output.to_device(Device::Cpu).to_kind(Kind::Float);
        let dims = output.size();
        let output_flat = output.view([-1]);
        let num_elements = output_flat.size()[0] as usize;
        let mut values = vec![0.0f32; num_elements];
        output_flat.copy_data(&mut values, num_elements);
        Ok((dims, values))
    }
}

impl GateModel for TorchModel {
    fn scores(&self, input: &NormalizedTensor) -> ModelResult<Vec<f32>> {
        let (dims, values) = self.forward(input)?;
        match dims.as_slice() {
            [1, _] | [_] => Ok(values),
            other => Err(ModelError::new(format!(
                "{} returned logits of shape {:?}, expected [1, classes]",
                self.name, other
            ))),
        }
    }
}

impl FeatureExtractor for TorchModel {
    fn features(&self, input: &NormalizedTensor) -> ModelResult<Array2<f32>> {
        let (dims, values) = self.forward(input)?;
        let (tokens, dim) = match dims.as_slice() {
            [1, tokens, dim] => (*tokens as usize, *dim as usize),
            [1, dim] => (1, *dim as usize),
            other => {
                return Err(ModelError::new(format!(
                    "{} returned features of shape {:?}, expected [1, tokens, dim] or [1, dim]",
                    self.name, other
                )));
            }
        };
        Array2::from_shape_vec((tokens, dim), values)
            .map_err(|e| ModelError::new(format!("{} feature reshape failed: {}", self.name, e)))
    }
}
