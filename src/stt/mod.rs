pub mod config;
pub mod interface;
pub mod openai;

#[cfg(test)]
mod tests;

pub use config::{load_config, TranscriberConfig};
pub use interface::{
    SpeakerSample, SttEngine, TranscribeError, TranscribeParams, TranscriptResult,
    TranscriptSegment, TranscriptWord, TranscriptionModel,
};
pub use openai::OpenAITranscriber;
