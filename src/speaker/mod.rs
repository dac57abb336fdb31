pub mod sampler;

pub use sampler::{FfmpegSpeakerSampler, SampleError, SpeakerSampler};
