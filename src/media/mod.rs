pub mod probe;
pub mod splitter;
pub mod tools;

pub use splitter::{
    AudioInput, AudioSplitter, ChunkInfo, FfmpegSplitter, SplitError, SplitResult, SplitterConfig,
};
pub use tools::{check_binaries, ToolError};
