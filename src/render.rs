//! Offline render loop. Drives the graph block by block into the sink.
//!
//! ```text
//! Idle ─▶ Preparing ─▶ Rendering ─▶ Finalizing ─▶ Done
//!             │            │             │
//!             └────────────┴─────────────┴──▶ Failed
//! ```
//!
//! Before every pull the pan automation is evaluated at the block's starting
//! clock and written to the mixer, so each block is rendered with exactly one
//! pan value. Frames reach the sink in clock order, once each; the loop ends
//! when the clock equals the source length and never overshoots it.

use std::time::{Duration, Instant};

use log::{debug, error, info, trace};
use serde::Serialize;

use crate::automation::PanAutomation;
use crate::error::{PipelineError, RenderFault, Result};
use crate::format::{ProcessingFormat, RenderBlock};
use crate::graph::{OfflineGraph, RenderStatus};
use crate::settings::RenderSettings;
use crate::sink::BlockSink;

/// Lifecycle of one render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RenderState {
    Idle,
    Preparing,
    Rendering,
    Finalizing,
    Done,
    Failed,
}

/// Monotonic count of frames rendered, bounded by the source length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderClock {
    frames: u64,
    total: u64,
}

impl RenderClock {
    pub fn new(total: u64) -> Self {
        Self { frames: 0, total }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn remaining(&self) -> u64 {
        self.total - self.frames
    }

    pub fn is_complete(&self) -> bool {
        self.frames == self.total
    }

    /// Advance by `frames`. Refuses to move past the total.
    pub fn advance(&mut self, frames: usize) -> std::result::Result<(), RenderFault> {
        let remaining = self.remaining();
        if frames as u64 > remaining {
            return Err(RenderFault::Overshoot {
                requested: usize::try_from(remaining).unwrap_or(usize::MAX),
                rendered: frames,
            });
        }
        self.frames += frames as u64;
        Ok(())
    }
}

/// Statistics of a completed render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderSummary {
    pub format: ProcessingFormat,
    pub total_frames: u64,
    /// Number of render calls, i.e. blocks written to the sink.
    pub blocks: usize,
    /// Frames in the final block.
    pub last_block_frames: usize,
    pub elapsed: Duration,
}

impl RenderSummary {
    /// Seconds of audio rendered per second of wall time.
    pub fn speed_factor(&self) -> f64 {
        let audio_secs = self.total_frames as f64 / self.format.sample_rate;
        audio_secs / self.elapsed.as_secs_f64().max(f64::EPSILON)
    }
}

/// Runs render jobs through the state machine above.
#[derive(Debug)]
pub struct OfflineRenderer {
    settings: RenderSettings,
    state: RenderState,
}

impl OfflineRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            settings,
            state: RenderState::Idle,
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Render one job.
    ///
    /// `build_graph` opens the source and assembles the graph. `open_sink` is
    /// only called once the graph has started, so a job that cannot start
    /// never touches its output. On failure the sink is dropped without being
    /// closed.
    pub fn run<G, K, B, O>(&mut self, build_graph: B, open_sink: O) -> Result<RenderSummary>
    where
        G: OfflineGraph,
        K: BlockSink,
        B: FnOnce() -> Result<G>,
        O: FnOnce(&ProcessingFormat) -> Result<K>,
    {
        self.state = RenderState::Idle;
        let started = Instant::now();

        match self.drive(build_graph, open_sink, started) {
            Ok(summary) => {
                self.enter(RenderState::Done);
                info!(
                    "Rendered {} frames in {} blocks ({:.1}x realtime)",
                    summary.total_frames,
                    summary.blocks,
                    summary.speed_factor()
                );
                Ok(summary)
            }
            Err(e) => {
                error!("Render job failed during {:?}: {}", self.state, e);
                self.enter(RenderState::Failed);
                Err(e)
            }
        }
    }

    fn enter(&mut self, next: RenderState) {
        debug!("Render state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn drive<G, K, B, O>(&mut self, build_graph: B, open_sink: O, started: Instant) -> Result<RenderSummary>
    where
        G: OfflineGraph,
        K: BlockSink,
        B: FnOnce() -> Result<G>,
        O: FnOnce(&ProcessingFormat) -> Result<K>,
    {
        self.enter(RenderState::Preparing);
        let mut graph = build_graph()?;
        let format = graph.format();
        let mut block = start_graph(&mut graph, self.settings.max_block_frames)?;

        self.enter(RenderState::Rendering);
        let automation = PanAutomation::new(self.settings.rotation_hz, format.sample_rate);
        let rendered = render_blocks(&mut graph, &mut block, &automation, open_sink);
        graph.stop();
        let (sink, blocks, last_block_frames) = rendered?;

        self.enter(RenderState::Finalizing);
        sink.close()?;

        Ok(RenderSummary {
            format,
            total_frames: graph.total_frames(),
            blocks,
            last_block_frames,
            elapsed: started.elapsed(),
        })
    }
}

/// Prepare and start the graph, allocating the one block reused for the job.
fn start_graph<G: OfflineGraph>(graph: &mut G, max_block_frames: usize) -> Result<RenderBlock> {
    let as_start_failure = |e: PipelineError| match e {
        PipelineError::EngineStartFailure(_) => e,
        other => PipelineError::EngineStartFailure(other.to_string()),
    };

    graph.prepare(max_block_frames).map_err(as_start_failure)?;
    let capacity = graph.max_block_frames();
    if capacity == 0 {
        return Err(PipelineError::EngineStartFailure(
            "graph reported a zero block capacity".to_string(),
        ));
    }
    let block = RenderBlock::new(graph.format(), capacity);
    graph.start().map_err(as_start_failure)?;
    Ok(block)
}

fn render_blocks<G, K, O>(
    graph: &mut G,
    block: &mut RenderBlock,
    automation: &PanAutomation,
    open_sink: O,
) -> Result<(K, usize, usize)>
where
    G: OfflineGraph,
    K: BlockSink,
    O: FnOnce(&ProcessingFormat) -> Result<K>,
{
    let mut sink = open_sink(&graph.format())?;
    let mut clock = RenderClock::new(graph.total_frames());
    let mut blocks = 0usize;
    let mut last_block_frames = 0usize;

    info!("Rendering {} frames ({})", clock.total(), graph.format());

    while !clock.is_complete() {
        let at = clock.frames();
        let pan = automation.pan_at(at);
        graph.pan().set(pan);

        let requested = clock.remaining().min(block.capacity() as u64) as usize;
        let outcome = graph.render_next_block(requested, block);
        let fail = |fault| PipelineError::RenderFailure { at, fault };

        match outcome.status {
            RenderStatus::Success => {}
            RenderStatus::InsufficientData => return Err(fail(RenderFault::InsufficientData)),
            RenderStatus::Error(msg) => return Err(fail(RenderFault::NodeError(msg))),
        }
        if outcome.frames == 0 {
            return Err(fail(RenderFault::NoProgress));
        }
        if outcome.frames > requested {
            return Err(fail(RenderFault::Overshoot {
                requested,
                rendered: outcome.frames,
            }));
        }

        clock.advance(outcome.frames).map_err(fail)?;
        block.set_frame_length(outcome.frames);
        sink.write(block)?;
        blocks += 1;
        last_block_frames = outcome.frames;
        trace!("Block {} at {} (pan {:.3}): {} frames", blocks, at, pan, outcome.frames);
    }

    Ok((sink, blocks, last_block_frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::pan::PanHandle;
    use crate::graph::{EffectGraph, RenderOutcome};
    use crate::source::MemorySource;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[derive(Default)]
    struct GraphTrace {
        pans: Vec<(u64, f32)>,
        stopped: bool,
    }

    /// Writes each frame's clock position into channel 0.
    struct ScriptedGraph {
        format: ProcessingFormat,
        total: u64,
        capacity: usize,
        sample_time: u64,
        pan: PanHandle,
        fail_start: bool,
        fail_at: Option<u64>,
        stall_at: Option<u64>,
        overshoot: bool,
        trace: Rc<RefCell<GraphTrace>>,
    }

    impl ScriptedGraph {
        fn new(total: u64, capacity: usize) -> Self {
            Self {
                format: ProcessingFormat::planar(44100.0, 1),
                total,
                capacity,
                sample_time: 0,
                pan: PanHandle::new(),
                fail_start: false,
                fail_at: None,
                stall_at: None,
                overshoot: false,
                trace: Rc::default(),
            }
        }
    }

    impl OfflineGraph for ScriptedGraph {
        fn format(&self) -> ProcessingFormat {
            self.format
        }
        fn total_frames(&self) -> u64 {
            self.total
        }
        fn prepare(&mut self, _max_block_frames: usize) -> Result<()> {
            Ok(())
        }
        fn max_block_frames(&self) -> usize {
            self.capacity
        }
        fn start(&mut self) -> Result<()> {
            if self.fail_start {
                return Err(PipelineError::EngineStartFailure("simulated".to_string()));
            }
            Ok(())
        }
        fn stop(&mut self) {
            self.trace.borrow_mut().stopped = true;
        }
        fn pan(&self) -> &PanHandle {
            &self.pan
        }
        fn render_next_block(&mut self, frames: usize, block: &mut RenderBlock) -> RenderOutcome {
            self.trace.borrow_mut().pans.push((self.sample_time, self.pan.get()));
            if self.fail_at.is_some_and(|at| self.sample_time >= at) {
                return RenderOutcome::error("simulated");
            }
            if self.stall_at.is_some_and(|at| self.sample_time >= at) {
                return RenderOutcome::success(0);
            }
            let frames = if self.overshoot { frames + 1 } else { frames };
            let frames = frames.min(block.capacity());
            block.set_frame_length(frames);
            for (i, s) in block.channel_mut(0).iter_mut().enumerate() {
                *s = (self.sample_time + i as u64) as f32;
            }
            self.sample_time += frames as u64;
            RenderOutcome::success(frames)
        }
    }

    #[derive(Default)]
    struct SinkTrace {
        block_frames: Vec<usize>,
        next_expected: u64,
        in_order: bool,
        closed: bool,
    }

    struct RecordingSink {
        trace: Rc<RefCell<SinkTrace>>,
    }

    impl RecordingSink {
        fn open(trace: &Rc<RefCell<SinkTrace>>) -> Result<Self> {
            trace.borrow_mut().in_order = true;
            Ok(Self { trace: trace.clone() })
        }
    }

    impl BlockSink for RecordingSink {
        fn write(&mut self, block: &RenderBlock) -> Result<()> {
            let mut trace = self.trace.borrow_mut();
            for &s in block.channel(0) {
                if s != trace.next_expected as f32 {
                    trace.in_order = false;
                }
                trace.next_expected += 1;
            }
            trace.block_frames.push(block.frame_length());
            Ok(())
        }

        fn close(self) -> Result<()> {
            self.trace.borrow_mut().closed = true;
            Ok(())
        }
    }

    #[test]
    fn ten_seconds_of_mono_takes_108_blocks() {
        init_logging();
        let graph = ScriptedGraph::new(441_000, 4096);
        let sink_trace = Rc::new(RefCell::new(SinkTrace::default()));
        let mut renderer = OfflineRenderer::new(RenderSettings::default());

        let summary = renderer
            .run(|| Ok(graph), |_| RecordingSink::open(&sink_trace))
            .unwrap();

        assert_eq!(renderer.state(), RenderState::Done);
        assert_eq!(summary.blocks, 108);
        assert_eq!(summary.last_block_frames, 2728);
        assert_eq!(summary.total_frames, 441_000);

        let trace = sink_trace.borrow();
        assert!(trace.closed);
        assert!(trace.in_order);
        assert_eq!(trace.block_frames.len(), 108);
        assert_eq!(trace.block_frames.iter().sum::<usize>(), 441_000);
        assert_eq!(trace.block_frames.last(), Some(&2728));
    }

    #[test]
    fn pan_is_set_from_each_block_start() {
        let graph = ScriptedGraph::new(100_000, 4096);
        let graph_trace = graph.trace.clone();
        let sink_trace = Rc::new(RefCell::new(SinkTrace::default()));
        let settings = RenderSettings::default();
        let automation = PanAutomation::new(settings.rotation_hz, 44100.0);

        OfflineRenderer::new(settings)
            .run(|| Ok(graph), |_| RecordingSink::open(&sink_trace))
            .unwrap();

        let trace = graph_trace.borrow();
        assert_eq!(trace.pans[0], (0, 0.0));
        for &(clock, pan) in &trace.pans {
            assert_eq!(clock % 4096, 0);
            assert_eq!(pan, automation.pan_at(clock));
        }
        assert!(trace.stopped);
    }

    #[test]
    fn zero_frame_success_fails_fast() {
        let mut graph = ScriptedGraph::new(44_100, 4096);
        graph.stall_at = Some(8192);
        let graph_trace = graph.trace.clone();
        let sink_trace = Rc::new(RefCell::new(SinkTrace::default()));
        let mut renderer = OfflineRenderer::new(RenderSettings::default());

        let err = renderer
            .run(|| Ok(graph), |_| RecordingSink::open(&sink_trace))
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::RenderFailure { at: 8192, fault: RenderFault::NoProgress }
        ));
        assert_eq!(renderer.state(), RenderState::Failed);
        assert_eq!(graph_trace.borrow().pans.len(), 3);
        assert!(graph_trace.borrow().stopped);
        assert!(!sink_trace.borrow().closed);
    }

    #[test]
    fn start_failure_never_opens_the_sink() {
        let mut graph = ScriptedGraph::new(44_100, 4096);
        graph.fail_start = true;
        let graph_trace = graph.trace.clone();
        let mut opened = false;
        let mut renderer = OfflineRenderer::new(RenderSettings::default());

        let err = renderer
            .run(
                || Ok(graph),
                |_| {
                    opened = true;
                    RecordingSink::open(&Rc::default())
                },
            )
            .unwrap_err();

        assert!(matches!(err, PipelineError::EngineStartFailure(_)));
        assert_eq!(renderer.state(), RenderState::Failed);
        assert!(!opened);
        assert!(graph_trace.borrow().pans.is_empty());
    }

    #[test]
    fn render_error_mid_stream_is_fatal() {
        let mut graph = ScriptedGraph::new(441_000, 4000);
        graph.fail_at = Some(200_000);
        let sink_trace = Rc::new(RefCell::new(SinkTrace::default()));
        let mut renderer = OfflineRenderer::new(RenderSettings::default());

        let err = renderer
            .run(|| Ok(graph), |_| RecordingSink::open(&sink_trace))
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::RenderFailure { at: 200_000, fault: RenderFault::NodeError(_) }
        ));
        assert_eq!(renderer.state(), RenderState::Failed);
        let trace = sink_trace.borrow();
        assert!(!trace.closed);
        assert_eq!(trace.block_frames.iter().sum::<usize>(), 200_000);
    }

    #[test]
    fn overshoot_is_rejected() {
        let mut graph = ScriptedGraph::new(10_000, 4096);
        graph.overshoot = true;
        let sink_trace = Rc::new(RefCell::new(SinkTrace::default()));

        // Third pull asks for the remaining 1808 frames and gets one more.
        let err = OfflineRenderer::new(RenderSettings::default())
            .run(|| Ok(graph), |_| RecordingSink::open(&sink_trace))
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::RenderFailure {
                fault: RenderFault::Overshoot { requested: 1808, rendered: 1809 },
                ..
            }
        ));
        assert_eq!(sink_trace.borrow().block_frames.iter().sum::<usize>(), 8192);
    }

    #[test]
    fn sink_create_failure_stops_the_graph() {
        let graph = ScriptedGraph::new(1000, 256);
        let graph_trace = graph.trace.clone();
        let mut renderer = OfflineRenderer::new(RenderSettings::default());

        let err = renderer
            .run(
                || Ok(graph),
                |_| -> Result<RecordingSink> {
                    Err(PipelineError::SinkCreateFailure("read-only".to_string()))
                },
            )
            .unwrap_err();

        assert!(matches!(err, PipelineError::SinkCreateFailure(_)));
        assert_eq!(renderer.state(), RenderState::Failed);
        assert!(graph_trace.borrow().stopped);
    }

    #[test]
    fn source_open_failure_fails_in_preparing() {
        let mut renderer = OfflineRenderer::new(RenderSettings::default());
        let err = renderer
            .run(
                || -> Result<ScriptedGraph> {
                    Err(PipelineError::SourceNotFound("missing.wav".into()))
                },
                |_| RecordingSink::open(&Rc::default()),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::SourceNotFound(_)));
        assert_eq!(renderer.state(), RenderState::Failed);
    }

    #[test]
    fn empty_source_finishes_without_blocks() {
        let sink_trace = Rc::new(RefCell::new(SinkTrace::default()));
        let summary = OfflineRenderer::new(RenderSettings::default())
            .run(|| Ok(ScriptedGraph::new(0, 4096)), |_| RecordingSink::open(&sink_trace))
            .unwrap();
        assert_eq!(summary.blocks, 0);
        assert!(sink_trace.borrow().closed);
    }

    /// Counts frames and checks the format the sink was opened with.
    struct CountingSink {
        frames: Rc<RefCell<u64>>,
    }

    impl BlockSink for CountingSink {
        fn write(&mut self, block: &RenderBlock) -> Result<()> {
            *self.frames.borrow_mut() += block.frame_length() as u64;
            Ok(())
        }
        fn close(self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn effect_graph_renders_every_frame() {
        let frames = Rc::new(RefCell::new(0u64));
        let settings = RenderSettings {
            max_block_frames: 1000,
            ..RenderSettings::default()
        };
        let graph_settings = settings.clone();

        let summary = OfflineRenderer::new(settings)
            .run(
                || {
                    let source = MemorySource::silence(48000.0, 2, 12_345);
                    Ok(EffectGraph::new(source, &graph_settings))
                },
                |format| {
                    assert_eq!(*format, ProcessingFormat::planar(48000.0, 2));
                    Ok(CountingSink { frames: frames.clone() })
                },
            )
            .unwrap();

        assert_eq!(*frames.borrow(), 12_345);
        assert_eq!(summary.blocks, 13);
        assert_eq!(summary.last_block_frames, 345);
    }

    #[test]
    fn clock_refuses_to_overshoot() {
        let mut clock = RenderClock::new(10);
        assert_eq!(clock.advance(6), Ok(()));
        assert_eq!(
            clock.advance(5),
            Err(RenderFault::Overshoot { requested: 4, rendered: 5 })
        );
        assert_eq!(clock.frames(), 6);
        assert_eq!(clock.advance(4), Ok(()));
        assert!(clock.is_complete());
    }
}
