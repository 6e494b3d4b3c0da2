pub mod classifier;
pub mod lesion;
pub mod manager;

pub use classifier::{LesionModel, OnnxClassifier};
pub use lesion::{LesionCategory, Prediction};
pub use manager::{ModelManager, ModelStats, SelfCheck};
