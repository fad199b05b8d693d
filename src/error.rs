//! Error types for the offline render pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::format::ProcessingFormat;

/// Why a render call did not produce a usable block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderFault {
    /// The source ran dry before the frames it advertised were delivered.
    #[error("insufficient data from source")]
    InsufficientData,

    /// A node or the source reported an error while rendering.
    #[error("node error: {0}")]
    NodeError(String),

    /// The graph reported success without rendering any frame.
    #[error("graph reported success with zero frames")]
    NoProgress,

    /// The graph rendered more frames than were requested.
    #[error("graph rendered {rendered} frames, only {requested} requested")]
    Overshoot { requested: usize, rendered: usize },
}

/// Errors that abort a processing job.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Input path does not exist
    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Input exists but cannot be probed or decoded
    #[error("Unreadable source format: {0}")]
    UnreadableSourceFormat(String),

    /// Two adjacent graph nodes disagree on the processing format
    #[error("Format mismatch at {node}: expected {expected}, found {found}")]
    FormatMismatch {
        node: &'static str,
        expected: ProcessingFormat,
        found: ProcessingFormat,
    },

    /// Graph could not be prepared or started
    #[error("Engine failed to start: {0}")]
    EngineStartFailure(String),

    /// A block failed to render; `at` is the clock position of that block
    #[error("Render failed at frame {at}: {fault}")]
    RenderFailure { at: u64, fault: RenderFault },

    /// Output file or encoder could not be created
    #[error("Failed to create output: {0}")]
    SinkCreateFailure(String),

    /// Writing or finalizing the output failed
    #[error("Failed to write output: {0}")]
    SinkWriteFailure(String),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
