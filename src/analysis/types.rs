use crate::acquire::AcquiredImage;
use crate::models::Prediction;
use serde::Serialize;

/// 处理耗时统计
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisStats {
    /// 解码与缩放耗时（毫秒）
    pub preprocessing_time_ms: u64,
    /// 推理耗时（毫秒）
    pub inference_time_ms: u64,
    /// 总耗时（毫秒）
    pub total_time_ms: u64,
}

/// 一次完整的分析结果
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub image: AcquiredImage,
    pub prediction: Prediction,
    pub stats: AnalysisStats,
}
