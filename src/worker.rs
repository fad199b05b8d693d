//! Background render worker
//!
//! Owns one thread that runs submitted jobs strictly one at a time, so the
//! caller's thread never blocks on a render. Each job reports once, on
//! completion; there is no per-block progress.
//!
//! ```text
//! caller ── submit(job) ──▶ mpsc queue ──▶ render thread
//!    ▲                                          │ process_file()
//!    └──────── oneshot / callback ◀── JobOutcome┘
//! ```

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use log::{error, info};
use tokio::sync::oneshot;

use crate::error::Result;
use crate::pipeline::process_file;
use crate::render::RenderSummary;
use crate::settings::{RenderSettings, default_output_path};

/// One input file to spatialize into one output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl RenderJob {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }

    /// Job writing to the well-known output path.
    pub fn to_default_output(input: impl Into<PathBuf>) -> Self {
        Self::new(input, default_output_path())
    }
}

/// What the caller learns about a job. Failure detail goes to the log only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { output: PathBuf },
    Failed,
}

type Processor = Box<dyn Fn(&RenderJob, &RenderSettings) -> Result<RenderSummary> + Send>;
type Completion = Box<dyn FnOnce(JobOutcome) + Send>;

struct Submission {
    job: RenderJob,
    done: Completion,
}

/// Single-job executor for render jobs.
pub struct RenderWorker {
    sender: Option<Sender<Submission>>,
    handle: Option<JoinHandle<()>>,
}

impl RenderWorker {
    /// Start the worker thread with the file pipeline.
    pub fn spawn(settings: RenderSettings) -> std::io::Result<Self> {
        Self::with_processor(settings, |job, settings| {
            process_file(&job.input, &job.output, settings)
        })
    }

    /// Start the worker thread with a custom job processor.
    pub fn with_processor<F>(settings: RenderSettings, processor: F) -> std::io::Result<Self>
    where
        F: Fn(&RenderJob, &RenderSettings) -> Result<RenderSummary> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let processor: Processor = Box::new(processor);
        let handle = thread::Builder::new()
            .name("render-worker".to_string())
            .spawn(move || run_jobs(receiver, settings, processor))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Queue `job`; the returned receiver yields its outcome.
    ///
    /// Await it from async code or call `blocking_recv` from a plain thread.
    pub fn submit(&self, job: RenderJob) -> oneshot::Receiver<JobOutcome> {
        let (tx, rx) = oneshot::channel();
        self.submit_with(job, move |outcome| {
            let _ = tx.send(outcome);
        });
        rx
    }

    /// Queue `job` and hand its outcome to `on_complete` on the worker thread.
    pub fn submit_with<F>(&self, job: RenderJob, on_complete: F)
    where
        F: FnOnce(JobOutcome) + Send + 'static,
    {
        let submission = Submission {
            job,
            done: Box::new(on_complete),
        };
        let rejected = match &self.sender {
            Some(sender) => sender.send(submission).err().map(|e| e.0),
            None => Some(submission),
        };
        if let Some(submission) = rejected {
            error!("Render worker is gone, dropping job for {}", submission.job.input.display());
            (submission.done)(JobOutcome::Failed);
        }
    }
}

impl Drop for RenderWorker {
    /// Finishes queued jobs, then joins the thread.
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Render worker panicked");
            }
        }
    }
}

fn run_jobs(receiver: Receiver<Submission>, settings: RenderSettings, processor: Processor) {
    for Submission { job, done } in receiver {
        info!("Starting render job {}", job.input.display());
        let outcome = match processor(&job, &settings) {
            Ok(summary) => {
                info!(
                    "Render job finished: {} ({} frames)",
                    job.output.display(),
                    summary.total_frames
                );
                JobOutcome::Completed { output: job.output }
            }
            Err(e) => {
                error!("Render job for {} failed: {}", job.input.display(), e);
                JobOutcome::Failed
            }
        };
        done(outcome);
    }
}
