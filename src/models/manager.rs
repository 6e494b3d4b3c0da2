use crate::models::{LesionCategory, LesionModel, OnnxClassifier, Prediction};
use crate::utils::error::SpotError;
use crate::{Config, Result};
use ndarray::Array4;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// 模型管理器：启动时加载一次，之后通过应用状态注入到请求处理中
#[derive(Clone)]
pub struct ModelManager {
    model: Arc<dyn LesionModel>,
    config: Config,
    startup_check: Option<SelfCheck>,
}

/// 自检结果：用全零输入跑一次推理
#[derive(Debug, Clone, Serialize)]
pub struct SelfCheck {
    pub output_classes: usize,
    pub latency_ms: u64,
    pub checked_at: String,
}

impl ModelManager {
    /// 从配置的模型文件加载分类器，并在启动时校验输出
    pub fn load(config: Config) -> Result<Self> {
        tracing::info!("Initializing model manager...");

        let model = Arc::new(OnnxClassifier::new(&config)?);
        let manager = Self::verified(model, config)?;

        tracing::info!("Model manager initialized successfully");
        Ok(manager)
    }

    /// 使用已构建的模型，不做自检
    pub fn with_model(model: Arc<dyn LesionModel>, config: Config) -> Self {
        Self {
            model,
            config,
            startup_check: None,
        }
    }

    /// 使用已构建的模型，输出类别数与类别表不一致时拒绝启动
    pub fn verified(model: Arc<dyn LesionModel>, config: Config) -> Result<Self> {
        let mut manager = Self::with_model(model, config);
        let check = manager
            .run_self_check()
            .map_err(|e| SpotError::ModelLoad(format!("Model self-check failed: {}", e)))?;

        tracing::info!(
            "Model self-check passed: {} classes in {}ms",
            check.output_classes,
            check.latency_ms
        );
        manager.startup_check = Some(check);
        Ok(manager)
    }

    pub fn model(&self) -> Arc<dyn LesionModel> {
        Arc::clone(&self.model)
    }

    /// 健康检查会真正执行一次推理
    pub fn health_check(&self) -> Result<SelfCheck> {
        tracing::debug!("Performing model health check...");
        self.run_self_check()
    }

    fn run_self_check(&self) -> Result<SelfCheck> {
        let (width, height) = self.config.onnx_config.input_size;
        let input = Array4::<f32>::zeros((1, height as usize, width as usize, 3));

        let start = Instant::now();
        let probabilities = self.model.predict(&input)?;
        let latency = start.elapsed();

        let output_classes = probabilities.len();
        Prediction::from_distribution(probabilities)?;

        Ok(SelfCheck {
            output_classes,
            latency_ms: latency.as_millis() as u64,
            checked_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    pub fn get_stats(&self) -> ModelStats {
        ModelStats {
            model: self.model.name().to_string(),
            num_classes: LesionCategory::COUNT,
            labels: LesionCategory::ALL.iter().map(|c| c.name()).collect(),
            input_width: self.config.onnx_config.input_size.0,
            input_height: self.config.onnx_config.input_size.1,
            intra_threads: self.config.onnx_config.intra_threads,
            startup_check: self.startup_check.clone(),
        }
    }
}

/// 模型统计信息
#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub model: String,
    pub num_classes: usize,
    pub labels: Vec<&'static str>,
    pub input_width: u32,
    pub input_height: u32,
    pub intra_threads: usize,
    pub startup_check: Option<SelfCheck>,
}
