//! # clipmill-engine
//!
//! The transcoding-engine boundary for clipmill.
//!
//! This crate provides:
//!
//! - **The engine contract** ([`TranscodeEngine`], [`EngineFactory`]) -- the
//!   asynchronous interface the orchestration layer drives: readiness gate,
//!   duration probe, virtual-filesystem reads/writes, progress subscription,
//!   and the transcode call itself.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for running external processes, including a streaming variant
//!   that surfaces stdout lines as they arrive.
//! - **Progress parsing** ([`progress::ProgressEvent`]) -- typed parsing of
//!   the engine's `key=value` progress stream.
//! - **The fixed preset** ([`preset::conversion_args`]) -- the MP4 argument
//!   list every job is executed with.
//! - **A process-backed engine** ([`FfmpegEngine`]) -- drives a local
//!   ffmpeg/ffprobe install with a temporary directory as the virtual
//!   filesystem namespace.

pub mod command;
pub mod engine;
pub mod ffmpeg;
pub mod preset;
pub mod progress;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use engine::{EngineFactory, TranscodeEngine};
pub use ffmpeg::{FfmpegEngine, FfmpegEngineFactory};
pub use preset::conversion_args;
pub use progress::{parse_progress_line, percent_from_out_time, ProgressEvent};
