use crate::{
    acquire::AcquiredImage,
    analysis::{AnalysisResult, AnalysisStats},
    image::ImagePreprocessor,
    models::{LesionModel, Prediction},
    utils::error::SpotError,
    Result,
};
use std::sync::Arc;
use std::time::Instant;

/// 预处理 → 推理 → 预测结果
pub struct AnalysisPipeline;

impl AnalysisPipeline {
    /// 在阻塞线程池中执行解码和推理
    pub async fn analyze(
        model: Arc<dyn LesionModel>,
        image: AcquiredImage,
        input_size: (u32, u32),
    ) -> Result<AnalysisResult> {
        tokio::task::spawn_blocking(move || Self::analyze_blocking(model.as_ref(), image, input_size))
            .await
            .map_err(|e| SpotError::Internal(format!("Analysis task failed: {}", e)))?
    }

    pub fn analyze_blocking(
        model: &dyn LesionModel,
        image: AcquiredImage,
        input_size: (u32, u32),
    ) -> Result<AnalysisResult> {
        let start_time = Instant::now();
        let (width, height) = input_size;

        let tensor = ImagePreprocessor::load_tensor(image.path(), width, height)?;
        let preprocessing_time = start_time.elapsed();

        let inference_start = Instant::now();
        let probabilities = model.predict(&tensor)?;
        let inference_time = inference_start.elapsed();

        let prediction = Prediction::from_distribution(probabilities)?;
        let total_time = start_time.elapsed();

        tracing::info!(
            "Analysis completed: image={}, label={}, confidence={:.4}, total_time={:.3}s",
            image.name(),
            prediction.label,
            prediction.confidence,
            total_time.as_secs_f32()
        );

        Ok(AnalysisResult {
            image,
            prediction,
            stats: AnalysisStats {
                preprocessing_time_ms: preprocessing_time.as_millis() as u64,
                inference_time_ms: inference_time.as_millis() as u64,
                total_time_ms: total_time.as_millis() as u64,
            },
        })
    }
}
