//! Shared data models for the AlphaVid converter.
//!
//! This crate provides Serde-serializable types for:
//! - File and task records
//! - The task state machine
//! - Conversion options and their validation
//! - Upload limits and error codes

pub mod error_code;
pub mod file;
pub mod ids;
pub mod limits;
pub mod options;
pub mod task;
pub mod transition;
pub mod validation;

// Re-export common types
pub use error_code::ErrorCode;
pub use file::{FileRecord, NewFile};
pub use ids::{FileId, TaskId};
pub use limits::UploadLimits;
pub use options::{ConvertOptions, KeyColor, WatermarkRegion};
pub use task::{TaskRecord, TaskStatus};
pub use transition::{TaskTransition, TransitionError, MAX_RUNNING_PROGRESS};
pub use validation::{ValidationCode, ValidationError};
