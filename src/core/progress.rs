/*!
 * Progress event publisher for real-time job monitoring
 *
 * A publish-subscribe system for job dispatch, per-job percent updates, and
 * terminal outcomes; consumed by the CLI's UI layer and orthogonal to the
 * tracing log used by operators.
 */

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a job, derived from its plan key.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct JobId(String);

impl JobId {
    pub fn new(key: &std::path::Path) -> Self {
        JobId(key.display().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What kind of job a progress event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Copy,
    Archive,
}

/// Progress event types emitted by the supervisor's worker pool.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A worker picked up a job for dispatch.
    JobStarted {
        job_id: JobId,
        kind: JobKind,
        worker_id: usize,
        size: u64,
        timestamp: u64,
    },

    /// Percent-complete update (0..=100), sourced either from the copier's
    /// subprocess parsing or the archiver's member count.
    JobProgress {
        job_id: JobId,
        worker_id: usize,
        percent: u8,
        timestamp: u64,
    },

    /// Job finished successfully.
    JobSucceeded {
        job_id: JobId,
        worker_id: usize,
        dest_path: PathBuf,
        duration_ms: u64,
        timestamp: u64,
    },

    /// Job failed; the session continues with the next job.
    JobFailed {
        job_id: JobId,
        worker_id: usize,
        error: String,
        timestamp: u64,
    },

    /// Phase 1 (parallel copy) has finished dispatching all copy jobs.
    CopyPhaseComplete { succeeded: u64, failed: u64, timestamp: u64 },

    /// Phase 2 (serial archive) has finished dispatching all archive jobs.
    ArchivePhaseComplete { succeeded: u64, failed: u64, timestamp: u64 },

    /// The supervisor observed a cancellation signal and stopped dispatching.
    CancellationRequested { timestamp: u64 },
}

impl ProgressEvent {
    fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    pub fn job_started(job_id: JobId, kind: JobKind, worker_id: usize, size: u64) -> Self {
        ProgressEvent::JobStarted {
            job_id,
            kind,
            worker_id,
            size,
            timestamp: Self::current_timestamp(),
        }
    }

    pub fn job_progress(job_id: JobId, worker_id: usize, percent: u8) -> Self {
        ProgressEvent::JobProgress {
            job_id,
            worker_id,
            percent,
            timestamp: Self::current_timestamp(),
        }
    }

    pub fn job_succeeded(job_id: JobId, worker_id: usize, dest_path: PathBuf, duration_ms: u64) -> Self {
        ProgressEvent::JobSucceeded {
            job_id,
            worker_id,
            dest_path,
            duration_ms,
            timestamp: Self::current_timestamp(),
        }
    }

    pub fn job_failed(job_id: JobId, worker_id: usize, error: String) -> Self {
        ProgressEvent::JobFailed {
            job_id,
            worker_id,
            error,
            timestamp: Self::current_timestamp(),
        }
    }

    pub fn copy_phase_complete(succeeded: u64, failed: u64) -> Self {
        ProgressEvent::CopyPhaseComplete { succeeded, failed, timestamp: Self::current_timestamp() }
    }

    pub fn archive_phase_complete(succeeded: u64, failed: u64) -> Self {
        ProgressEvent::ArchivePhaseComplete { succeeded, failed, timestamp: Self::current_timestamp() }
    }

    pub fn cancellation_requested() -> Self {
        ProgressEvent::CancellationRequested { timestamp: Self::current_timestamp() }
    }
}

/// Progress publisher — sends events to subscribers. Correctness of the
/// core never depends on the queue being drained.
#[derive(Clone)]
pub struct ProgressPublisher {
    sender: Option<Sender<ProgressEvent>>,
}

impl ProgressPublisher {
    /// Create a new publisher with a bounded channel.
    pub fn new(buffer_size: usize) -> (Self, ProgressSubscriber) {
        let (tx, rx) = bounded(buffer_size);
        (
            ProgressPublisher { sender: Some(tx) },
            ProgressSubscriber { receiver: rx },
        )
    }

    /// Create a new publisher with an unbounded channel.
    pub fn unbounded() -> (Self, ProgressSubscriber) {
        let (tx, rx) = unbounded();
        (
            ProgressPublisher { sender: Some(tx) },
            ProgressSubscriber { receiver: rx },
        )
    }

    /// A no-op publisher, for when progress tracking is disabled.
    pub fn noop() -> Self {
        ProgressPublisher { sender: None }
    }

    pub fn publish(&self, event: ProgressEvent) {
        if let Some(ref tx) = self.sender {
            let _ = tx.send(event);
        }
    }
}

/// Progress subscriber — receives events.
pub struct ProgressSubscriber {
    receiver: Receiver<ProgressEvent>,
}

impl ProgressSubscriber {
    pub fn receiver(&self) -> &Receiver<ProgressEvent> {
        &self.receiver
    }

    pub fn try_recv(&self) -> Option<ProgressEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn recv(&self) -> Option<ProgressEvent> {
        self.receiver.recv().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = ProgressEvent> + '_ {
        self.receiver.iter()
    }
}

/// Shared progress publisher that can be cloned across threads.
pub type SharedProgressPublisher = Arc<ProgressPublisher>;
