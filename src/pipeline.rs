//! Job entry points: file in, spatialized AAC file out.

use std::path::Path;

use log::info;

use crate::error::Result;
use crate::format::ProcessingFormat;
use crate::graph::EffectGraph;
use crate::render::{OfflineRenderer, RenderSummary};
use crate::settings::RenderSettings;
use crate::sink::{AacFileSink, BlockSink};
use crate::source::FileSource;

/// Render `input` through the 8D graph into an MPEG-4/AAC file at `output`.
///
/// A job that fails before the graph starts leaves `output` untouched. Any
/// later failure leaves no file at `output`.
pub fn process_file(input: &Path, output: &Path, settings: &RenderSettings) -> Result<RenderSummary> {
    info!("Processing {} -> {}", input.display(), output.display());
    process_file_with(input, settings, |format| {
        AacFileSink::create(output, format, &settings.encoder)
    })
}

/// Render `input` into whatever sink `open_sink` produces.
pub fn process_file_with<K, O>(input: &Path, settings: &RenderSettings, open_sink: O) -> Result<RenderSummary>
where
    K: BlockSink,
    O: FnOnce(&ProcessingFormat) -> Result<K>,
{
    OfflineRenderer::new(settings.clone()).run(
        || Ok(EffectGraph::new(FileSource::open(input)?, settings)),
        open_sink,
    )
}
