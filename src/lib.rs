//! Offline "8D audio" renderer.
//!
//! Decodes an audio file, runs it through a hall reverb and a slowly rotating
//! equal-power pan, and encodes the result to AAC in an MPEG-4 container,
//! faster than real time and deterministically.

pub mod automation;
pub mod dsp;
pub mod error;
pub mod format;
pub mod graph;
pub mod pipeline;
pub mod render;
pub mod settings;
pub mod sink;
pub mod source;
pub mod worker;

pub use crate::error::{PipelineError, RenderFault, Result};
pub use crate::format::{ProcessingFormat, RenderBlock};
pub use crate::pipeline::{process_file, process_file_with};
pub use crate::render::{OfflineRenderer, RenderState, RenderSummary};
pub use crate::settings::{RenderSettings, default_output_path};
pub use crate::worker::{JobOutcome, RenderJob, RenderWorker};

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
