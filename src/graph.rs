//! Effect graph: source → hall reverb → pan mixer → output block.
//!
//! The graph runs in manual (offline) rendering mode: nothing happens until
//! the caller pulls a block with [`OfflineGraph::render_next_block`]. There
//! is no internal clock or timer, so the output is a pure function of the
//! input frames and the pan values applied before each pull.

use log::{debug, trace, warn};

use crate::dsp::pan::{PanHandle, pan_stereo};
use crate::dsp::reverb::Reverb;
use crate::error::{PipelineError, Result};
use crate::format::{ProcessingFormat, RenderBlock};
use crate::settings::{ReverbSettings, RenderSettings};
use crate::source::AudioSource;

/// Status of one manual render call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderStatus {
    Success,
    /// The source delivered fewer frames than it still advertised.
    InsufficientData,
    Error(String),
}

/// Result of pulling one block from the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    pub frames: usize,
    pub status: RenderStatus,
}

impl RenderOutcome {
    pub fn success(frames: usize) -> Self {
        Self {
            frames,
            status: RenderStatus::Success,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            frames: 0,
            status: RenderStatus::Error(msg.into()),
        }
    }
}

/// The manual-rendering surface the render loop drives.
pub trait OfflineGraph {
    /// Format of the blocks the graph renders.
    fn format(&self) -> ProcessingFormat;

    /// Length of the source feeding the graph.
    fn total_frames(&self) -> u64;

    /// Validate the node chain and allocate node state.
    fn prepare(&mut self, max_block_frames: usize) -> Result<()>;

    /// Largest block a single render call can produce. Valid after `prepare`.
    fn max_block_frames(&self) -> usize;

    /// Enter offline rendering. Requires a successful `prepare`.
    fn start(&mut self) -> Result<()>;

    fn stop(&mut self);

    /// Writer side of the mixer's pan parameter.
    fn pan(&self) -> &PanHandle;

    /// Render up to `frames` frames into `block`.
    fn render_next_block(&mut self, frames: usize, block: &mut RenderBlock) -> RenderOutcome;
}

/// A format-preserving processing stage.
pub trait Node: Send {
    fn name(&self) -> &'static str;

    /// Accept `input` and return the format this node emits.
    fn prepare(&mut self, input: &ProcessingFormat, max_frames: usize) -> Result<ProcessingFormat>;

    /// Process the valid frames of `block` in place.
    fn process(&mut self, block: &mut RenderBlock);
}

fn check_mono_or_stereo(node: &'static str, format: &ProcessingFormat) -> Result<()> {
    if format.interleaved {
        return Err(PipelineError::EngineStartFailure(format!(
            "{node} requires planar buffers"
        )));
    }
    if !(1..=2).contains(&format.channels) {
        return Err(PipelineError::EngineStartFailure(format!(
            "{node} supports mono or stereo, got {} channels",
            format.channels
        )));
    }
    if !(format.sample_rate.is_finite() && format.sample_rate > 0.0) {
        return Err(PipelineError::EngineStartFailure(format!(
            "{node} got invalid sample rate {}",
            format.sample_rate
        )));
    }
    Ok(())
}

/// Hall reverb stage with a fixed preset and wet/dry mix.
pub struct ReverbNode {
    settings: ReverbSettings,
    reverb: Option<Reverb>,
    channels: u16,
}

impl ReverbNode {
    pub fn new(settings: ReverbSettings) -> Self {
        Self {
            settings,
            reverb: None,
            channels: 0,
        }
    }
}

impl Node for ReverbNode {
    fn name(&self) -> &'static str {
        "reverb"
    }

    fn prepare(&mut self, input: &ProcessingFormat, _max_frames: usize) -> Result<ProcessingFormat> {
        check_mono_or_stereo(self.name(), input)?;
        self.reverb = Some(Reverb::new(
            input.sample_rate,
            self.settings.preset,
            self.settings.wet_dry_mix,
        ));
        self.channels = input.channels;
        Ok(*input)
    }

    fn process(&mut self, block: &mut RenderBlock) {
        let Some(reverb) = self.reverb.as_mut() else {
            return;
        };
        if self.channels == 1 {
            reverb.process_mono_block(block.channel_mut(0));
        } else if let Some((left, right)) = block.stereo_mut() {
            reverb.process_stereo(left, right);
        }
    }
}

/// Stereo pan/mix stage. Reads the shared pan value once per block.
pub struct PanMixerNode {
    pan: PanHandle,
    channels: u16,
}

impl PanMixerNode {
    pub fn new(pan: PanHandle) -> Self {
        Self { pan, channels: 0 }
    }
}

impl Node for PanMixerNode {
    fn name(&self) -> &'static str {
        "pan-mixer"
    }

    fn prepare(&mut self, input: &ProcessingFormat, _max_frames: usize) -> Result<ProcessingFormat> {
        check_mono_or_stereo(self.name(), input)?;
        self.channels = input.channels;
        Ok(*input)
    }

    fn process(&mut self, block: &mut RenderBlock) {
        let pan = self.pan.get();
        // A single channel has no balance to move.
        if self.channels != 2 {
            return;
        }
        if let Some((left, right)) = block.stereo_mut() {
            pan_stereo(left, right, pan);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Configured,
    Ready,
    Running,
    Stopped,
}

/// The fixed spatializer chain over one source.
pub struct EffectGraph {
    source: Box<dyn AudioSource>,
    nodes: Vec<Box<dyn Node>>,
    pan: PanHandle,
    format: ProcessingFormat,
    total_frames: u64,
    max_block_frames: usize,
    sample_time: u64,
    state: EngineState,
}

impl EffectGraph {
    /// Attach and connect source → reverb → pan mixer.
    pub fn new(source: impl AudioSource + 'static, settings: &RenderSettings) -> Self {
        let pan = PanHandle::new();
        let nodes: Vec<Box<dyn Node>> = vec![
            Box::new(ReverbNode::new(settings.reverb.clone())),
            Box::new(PanMixerNode::new(pan.clone())),
        ];
        Self::with_nodes(source, nodes, pan)
    }

    /// Build a graph over an explicit node chain.
    pub fn with_nodes(
        source: impl AudioSource + 'static,
        nodes: Vec<Box<dyn Node>>,
        pan: PanHandle,
    ) -> Self {
        let format = source.format();
        let total_frames = source.total_frames();
        Self {
            source: Box::new(source),
            nodes,
            pan,
            format,
            total_frames,
            max_block_frames: 0,
            sample_time: 0,
            state: EngineState::Configured,
        }
    }

    /// Frames rendered since `start`.
    pub fn sample_time(&self) -> u64 {
        self.sample_time
    }
}

impl OfflineGraph for EffectGraph {
    fn format(&self) -> ProcessingFormat {
        self.format
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn prepare(&mut self, max_block_frames: usize) -> Result<()> {
        if max_block_frames == 0 {
            return Err(PipelineError::EngineStartFailure(
                "maximum block size must be non-zero".to_string(),
            ));
        }

        let mut format = self.format;
        for node in &mut self.nodes {
            let out = node.prepare(&format, max_block_frames)?;
            if out != format {
                return Err(PipelineError::FormatMismatch {
                    node: node.name(),
                    expected: format,
                    found: out,
                });
            }
            format = out;
        }

        self.max_block_frames = max_block_frames;
        self.state = EngineState::Ready;
        debug!(
            "Graph prepared: {} → {} nodes, max {} frames/block",
            self.format,
            self.nodes.len(),
            max_block_frames
        );
        Ok(())
    }

    fn max_block_frames(&self) -> usize {
        self.max_block_frames
    }

    fn start(&mut self) -> Result<()> {
        if self.state != EngineState::Ready {
            return Err(PipelineError::EngineStartFailure(format!(
                "cannot start graph in state {:?}",
                self.state
            )));
        }
        self.sample_time = 0;
        self.state = EngineState::Running;
        Ok(())
    }

    fn stop(&mut self) {
        if self.state == EngineState::Running {
            debug!("Graph stopped at frame {}", self.sample_time);
        }
        self.state = EngineState::Stopped;
    }

    fn pan(&self) -> &PanHandle {
        &self.pan
    }

    fn render_next_block(&mut self, frames: usize, block: &mut RenderBlock) -> RenderOutcome {
        if self.state != EngineState::Running {
            return RenderOutcome::error("graph is not running");
        }
        if *block.format() != self.format {
            return RenderOutcome::error(format!(
                "block format {} does not match graph format {}",
                block.format(),
                self.format
            ));
        }

        let remaining = self.total_frames - self.sample_time;
        let wanted = frames
            .min(self.max_block_frames)
            .min(block.capacity())
            .min(usize::try_from(remaining).unwrap_or(usize::MAX));

        let got = match self.source.read(block, wanted) {
            Ok(got) => got,
            Err(e) => {
                warn!("Source read failed at frame {}: {}", self.sample_time, e);
                block.set_frame_length(0);
                return RenderOutcome::error(e.to_string());
            }
        };
        block.set_frame_length(got);

        if got < wanted {
            return RenderOutcome {
                frames: got,
                status: RenderStatus::InsufficientData,
            };
        }

        for node in &mut self.nodes {
            node.process(block);
        }
        self.sample_time += got as u64;
        trace!("Rendered {} frames, graph at {}", got, self.sample_time);

        RenderOutcome::success(got)
    }
}
