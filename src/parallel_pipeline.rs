// THEORY:
// The `parallel_pipeline` module runs a whole log file through the engine. Frames are
// read in order, fanned out to a pool of analysis workers, and put back into file
// order before they reach the single writer.
//
// Key architectural principles:
// 1.  **Fan Out, Fan In**: Kinematics, classification and panorama stitching share no
//     state between frames, so workers process them concurrently. Each submitted
//     frame is paired with a oneshot receiver, and receivers are awaited strictly in
//     submission order, which restores file order without a reorder buffer.
// 2.  **Bounded Memory**: At most `max_in_flight` frames are outstanding. The reader is
//     not asked for another frame until the oldest one has been handed off.
// 3.  **One Writer Owner**: Only the task driving `process_file` talks to the writer,
//     one frame at a time, so writers need no internal locking.
// 4.  **Clean Cancellation**: Cancellation is observed between frames. Frames already
//     written stay written; frames still in flight are dropped without being written.

use crate::config::{EngineConfig, ThresholdConfig};
use crate::core_modules::frame_sample::FrameSample;
use crate::core_modules::kinematics::KinematicsError;
use crate::error::{EngineError, Result};
use crate::persistence::{FrameId, FrameWriter, WriterError};
use crate::pipeline::{FrameAnalysis, FrameAnalyzer};
use crate::summary::FileSummary;
use crate::telemetry_reader::FrameSource;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

type FrameOutcome = std::result::Result<FrameAnalysis, (u64, KinematicsError)>;

pub struct FrameTask {
    pub file_id: Arc<str>,
    pub frame: FrameSample,
    pub result_sender: oneshot::Sender<FrameOutcome>,
}

/// Requests cancellation of a running pipeline.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancel_tx: Arc<watch::Sender<bool>>,
}

/// Observes cancellation requests.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancel_rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelToken) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (Self { cancel_tx: Arc::new(cancel_tx) }, CancelToken { cancel_rx })
    }

    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<FrameTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers. Must be called inside a tokio runtime.
    pub fn new(analyzer: Arc<FrameAnalyzer>, size: usize) -> Self {
        let size = size.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<FrameTask>();
        let mut workers = Vec::with_capacity(size + 1);

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::unbounded_channel::<FrameTask>()).unzip();

        // Dispatcher: round-robin over workers.
        workers.push(tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                if worker_senders[worker_idx].send(task).is_err() {
                    error!(worker = worker_idx, "analysis worker channel closed");
                }
                worker_idx = (worker_idx + 1) % size;
            }
        }));

        for (worker_idx, mut worker_receiver) in worker_receivers.into_iter().enumerate() {
            let analyzer = Arc::clone(&analyzer);

            workers.push(tokio::spawn(async move {
                while let Some(task) = worker_receiver.recv().await {
                    let FrameTask { file_id, frame, result_sender } = task;
                    let analyzer = Arc::clone(&analyzer);
                    let sequence = frame.sequence;

                    // The math is CPU bound; keep it off the async threads.
                    let outcome = tokio::task::spawn_blocking(move || {
                        analyzer.analyze(&file_id, frame).map_err(|e| (sequence, e))
                    })
                    .await;

                    match outcome {
                        Ok(outcome) => {
                            // The receiver is gone when the run was cancelled.
                            let _ = result_sender.send(outcome);
                        }
                        Err(e) => error!(worker = worker_idx, sequence, error = %e, "frame analysis panicked"),
                    }
                }
            }));
        }

        Self { task_sender, workers }
    }

    pub fn submit(&self, file_id: Arc<str>, frame: FrameSample) -> Result<oneshot::Receiver<FrameOutcome>> {
        let (result_sender, result_receiver) = oneshot::channel();
        self.task_sender
            .send(FrameTask { file_id, frame, result_sender })
            .map_err(|_| EngineError::WorkerLost)?;
        Ok(result_receiver)
    }

    /// Stops accepting work and waits for every worker to drain.
    pub async fn shutdown(self) {
        drop(self.task_sender);
        for joined in futures::future::join_all(self.workers).await {
            if let Err(e) = joined {
                error!(error = %e, "worker task failed during shutdown");
            }
        }
    }
}

pub struct ParallelPipeline {
    config: EngineConfig,
    worker_pool: WorkerPool,
    cancel: CancelToken,
}

impl ParallelPipeline {
    /// Must be called inside a tokio runtime.
    pub fn new(thresholds: ThresholdConfig, config: EngineConfig, cancel: CancelToken) -> Self {
        let analyzer = Arc::new(FrameAnalyzer::new(thresholds, &config));
        let worker_pool = WorkerPool::new(analyzer, config.workers);
        Self { config, worker_pool, cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Processes one log file end to end. Returns the file's summary, or an error if
    /// the file became unreadable or storage failed fatally.
    pub async fn process_file<W: FrameWriter + ?Sized>(
        &self,
        source: &mut dyn FrameSource,
        writer: &mut W,
    ) -> Result<FileSummary> {
        let file_id: Arc<str> = Arc::from(source.file_id());
        let mut summary = FileSummary::new(file_id.as_ref());
        let mut pending: VecDeque<oneshot::Receiver<FrameOutcome>> = VecDeque::new();
        let max_in_flight = self.config.max_in_flight.max(1);

        info!(file = %file_id, workers = self.config.workers, "processing file");

        loop {
            if self.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if pending.len() >= max_in_flight {
                if let Some(next) = pending.pop_front() {
                    self.hand_off(next, writer, &mut summary).await?;
                }
                continue;
            }
            match source.next_frame() {
                None => break,
                Some(Ok(frame)) => {
                    summary.frames_read += 1;
                    pending.push_back(self.worker_pool.submit(Arc::clone(&file_id), frame)?);
                }
                Some(Err(e)) if e.is_recoverable() => {
                    summary.frames_read += 1;
                    summary.frames_skipped_malformed += 1;
                    warn!(file = %file_id, error = %e, "skipping unreadable frame");
                }
                Some(Err(e)) => {
                    error!(file = %file_id, error = %e, "log file became unreadable");
                    return Err(e.into());
                }
            }
        }

        while !pending.is_empty() {
            if self.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if let Some(next) = pending.pop_front() {
                self.hand_off(next, writer, &mut summary).await?;
            }
        }

        if summary.cancelled {
            summary.frames_discarded = pending.len() as u64;
            warn!(file = %file_id, discarded = summary.frames_discarded, "cancelled; in-flight frames discarded");
        }
        summary.log();
        Ok(summary)
    }

    async fn hand_off<W: FrameWriter + ?Sized>(
        &self,
        next: oneshot::Receiver<FrameOutcome>,
        writer: &mut W,
        summary: &mut FileSummary,
    ) -> Result<()> {
        let analysis = match next.await.map_err(|_| EngineError::WorkerLost)? {
            Ok(analysis) => analysis,
            Err((sequence, e)) => {
                warn!(file = %summary.file_id, sequence, error = %e, "skipping frame with malformed motion history");
                summary.frames_skipped_malformed += 1;
                return Ok(());
            }
        };

        match self.write_with_retry(&analysis, writer).await {
            Ok(id) => {
                debug!(
                    file = %summary.file_id,
                    sequence = analysis.record.sequence,
                    frame_id = %id,
                    edge_cases = analysis.edge_cases.len(),
                    "frame stored"
                );
                summary.frames_written += 1;
                if analysis.record.thumbnail.is_some() {
                    summary.thumbnails += 1;
                }
                summary.stats.observe(&analysis.record, &analysis.edge_cases);
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                error!(file = %summary.file_id, error = %e, "storage failed");
                Err(e.into())
            }
            Err(e) => {
                warn!(
                    file = %summary.file_id,
                    sequence = analysis.record.sequence,
                    error = %e,
                    "frame write failed after retry; skipping"
                );
                summary.frames_skipped_write_failure += 1;
                Ok(())
            }
        }
    }

    async fn write_with_retry<W: FrameWriter + ?Sized>(
        &self,
        analysis: &FrameAnalysis,
        writer: &mut W,
    ) -> std::result::Result<FrameId, WriterError> {
        match writer.write(&analysis.record, &analysis.edge_cases) {
            Ok(id) => Ok(id),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(sequence = analysis.record.sequence, error = %e, "frame write failed; retrying");
                tokio::time::sleep(self.config.write_retry_backoff).await;
                writer.write(&analysis.record, &analysis.edge_cases)
            }
        }
    }

    pub async fn shutdown(self) {
        self.worker_pool.shutdown().await;
    }
}
