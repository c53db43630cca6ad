//! FFmpeg integration for alpha-channel conversion.
//!
//! This crate provides:
//! - Deterministic chroma-key filter graphs built from [`ConvertOptions`]
//! - Type-safe FFmpeg command building
//! - A runner with a hard timeout and a time-based progress estimator
//!
//! [`ConvertOptions`]: alphavid_models::ConvertOptions

pub mod command;
pub mod error;
pub mod filters;
pub mod progress;
pub mod transcode;

pub use command::{check_ffmpeg, ffmpeg_version, EngineRun, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use filters::build_filter_graph;
pub use progress::ProgressEstimator;
pub use transcode::{output_file_name, TranscodeSpec, OUTPUT_EXTENSION};
