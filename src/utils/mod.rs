pub mod error;

pub use error::SpotError;
