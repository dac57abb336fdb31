pub mod cleaner;
pub mod config;
pub mod prompts;

pub use cleaner::{AiPostprocessor, CleanedSegment, PostprocessError};
pub use config::PostprocessConfig;
