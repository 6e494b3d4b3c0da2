use crate::models::lesion::LesionCategory;
use crate::utils::error::SpotError;
use crate::{Config, Result};
use ndarray::Array4;
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// 病变分类模型接口：输入 `[1, H, W, 3]` 张量，输出各类别概率
pub trait LesionModel: Send + Sync {
    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>>;

    fn name(&self) -> &str;
}

pub struct OnnxClassifier {
    session: Arc<Mutex<Session>>,
    input_name: String,
    output_name: String, // 动态发现的输出名称
    model_name: String,
}

impl OnnxClassifier {
    pub fn new(config: &Config) -> Result<Self> {
        let model_path = &config.model_path;

        if !model_path.exists() {
            return Err(SpotError::ModelLoad(format!(
                "Model file not found: {}",
                model_path.display()
            )));
        }

        tracing::info!("Loading lesion model from: {}", model_path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.onnx_config.intra_threads)?
            .commit_from_file(model_path)?;

        let input_name = match session.inputs.first() {
            Some(input) => input.name.clone(),
            None => {
                return Err(SpotError::ModelLoad("Model has no inputs".to_string()));
            }
        };

        let output_name = match session.outputs.first() {
            Some(output) => output.name.clone(),
            None => {
                return Err(SpotError::ModelLoad("Model has no outputs".to_string()));
            }
        };

        tracing::info!("Model input: '{}', output: '{}'", input_name, output_name);
        for (i, output) in session.outputs.iter().enumerate() {
            tracing::debug!("Model output[{}]: '{}'", i, output.name);
        }

        let model_name = model_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("model")
            .to_string();

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            input_name,
            output_name,
            model_name,
        })
    }
}

impl LesionModel for OnnxClassifier {
    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>> {
        if input.shape()[0] != 1 {
            return Err(SpotError::Inference(format!(
                "Expected batch size 1, got {}",
                input.shape()[0]
            )));
        }

        let input_tensor = Tensor::from_array(input.clone())?;
        let predictions = {
            let mut session = self.session.lock();
            let outputs = session.run(inputs![self.input_name.as_str() => input_tensor])?;

            match outputs.get(self.output_name.as_str()) {
                Some(output) => output.try_extract_array::<f32>()?.into_owned(),
                None => {
                    let available_outputs: Vec<String> =
                        outputs.keys().map(|s| s.to_string()).collect();
                    return Err(SpotError::Inference(format!(
                        "Output '{}' not found. Available outputs: {:?}",
                        self.output_name, available_outputs
                    )));
                }
            }
        };

        // 期望输出形状 [1, 7]
        let shape = predictions.shape().to_vec();
        if shape.len() != 2 || shape[0] != 1 || shape[1] != LesionCategory::COUNT {
            return Err(SpotError::Inference(format!(
                "Unexpected output shape {:?}, expected [1, {}]",
                shape,
                LesionCategory::COUNT
            )));
        }

        Ok(predictions.iter().copied().collect())
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

/// 测试用的固定输出模型
#[cfg(test)]
pub(crate) struct FixedModel {
    pub distribution: Vec<f32>,
    pub calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl FixedModel {
    pub fn new(distribution: Vec<f32>) -> Self {
        Self {
            distribution,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl LesionModel for FixedModel {
    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>> {
        assert_eq!(input.shape(), &[1, 75, 100, 3]);
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.distribution.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}
