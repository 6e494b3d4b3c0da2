pub mod acquire;
pub mod analysis;
pub mod config;
pub mod image;
pub mod models;
pub mod notify;
pub mod session;
pub mod utils;
pub mod web;

// 重新导出主要类型
pub use config::Config;
pub use models::{LesionCategory, Prediction};
pub use utils::error::SpotError;

pub type Result<T> = std::result::Result<T, SpotError>;
