pub mod pipeline;
pub mod types;

pub use pipeline::AnalysisPipeline;
pub use types::{AnalysisResult, AnalysisStats};
