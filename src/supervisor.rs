/*!
 * Supervisor (§4.8): a two-phase worker pool. Phase 1 runs `threads`
 * concurrent copy workers, each with a stable ID from a free-list; phase 2
 * archives sequences one at a time on a single worker.
 */

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{info, warn};

use crate::archiver;
use crate::config::Config;
use crate::copier::CopyExecutor;
use crate::core::progress::{JobId, JobKind, ProgressEvent, ProgressPublisher};
use crate::disk::DiskManager;
use crate::model::{FileJob, Plan, SequenceJob};
use crate::state::StateStore;

/// Assigns stable integer IDs to workers from a free-list so the UI can
/// render a bounded slot table; IDs are returned to the pool on drop.
struct WorkerIdPool {
    free: Mutex<VecDeque<usize>>,
}

impl WorkerIdPool {
    fn new(count: usize) -> Arc<Self> {
        Arc::new(Self { free: Mutex::new((0..count).collect()) })
    }

    fn acquire(self: &Arc<Self>) -> WorkerId {
        let id = self.free.lock().unwrap().pop_front().unwrap_or(0);
        WorkerId { pool: self.clone(), id }
    }
}

struct WorkerId {
    pool: Arc<WorkerIdPool>,
    id: usize,
}

impl Drop for WorkerId {
    fn drop(&mut self) {
        self.pool.free.lock().unwrap().push_back(self.id);
    }
}

/// Resolve an absolute destination path for `source`, under the chosen
/// mount `dest_mount`, honoring `source_root`/`destination_root` rewriting
/// (§6).
pub fn resolve_dest_path(
    source: &Path,
    dest_mount: &Path,
    source_root: Option<&Path>,
    destination_root: Option<&Path>,
) -> PathBuf {
    let rel: PathBuf = match source_root {
        Some(root) if source.starts_with(root) => source.strip_prefix(root).unwrap().to_path_buf(),
        _ => {
            let s = source.to_string_lossy();
            PathBuf::from(s.trim_start_matches(std::path::MAIN_SEPARATOR))
        }
    };

    let dest_root_stripped: PathBuf = match destination_root {
        Some(root) => {
            let s = root.to_string_lossy();
            PathBuf::from(s.trim_start_matches(std::path::MAIN_SEPARATOR))
        }
        None => PathBuf::new(),
    };

    crate::manifest::normalize_path(&dest_mount.join(dest_root_stripped).join(rel))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RunOutcome {
    pub copy_succeeded: u64,
    pub copy_failed: u64,
    pub archive_succeeded: u64,
    pub archive_failed: u64,
}

pub struct Supervisor<'a> {
    config: &'a Config,
    disk: &'a DiskManager,
    state: &'a StateStore,
    copier: &'a dyn CopyExecutor,
    publisher: ProgressPublisher,
    cancel: Arc<AtomicBool>,
}

impl<'a> Supervisor<'a> {
    pub fn new(
        config: &'a Config,
        disk: &'a DiskManager,
        state: &'a StateStore,
        copier: &'a dyn CopyExecutor,
        publisher: ProgressPublisher,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self { config, disk, state, copier, publisher, cancel }
    }

    pub fn run(&self, plan: &Plan) -> RunOutcome {
        let (copy_succeeded, copy_failed) = self.run_copy_phase(&plan.copy_jobs);
        self.publisher
            .publish(ProgressEvent::copy_phase_complete(copy_succeeded, copy_failed));

        if self.cancel.load(Ordering::SeqCst) {
            return RunOutcome { copy_succeeded, copy_failed, archive_succeeded: 0, archive_failed: 0 };
        }

        let (archive_succeeded, archive_failed) = self.run_archive_phase(&plan.archive_jobs);
        self.publisher
            .publish(ProgressEvent::archive_phase_complete(archive_succeeded, archive_failed));

        RunOutcome { copy_succeeded, copy_failed, archive_succeeded, archive_failed }
    }

    fn run_copy_phase(&self, jobs: &[FileJob]) -> (u64, u64) {
        let queue: Mutex<VecDeque<&FileJob>> = Mutex::new(jobs.iter().collect());
        let pool = WorkerIdPool::new(self.config.threads.max(1));
        let succeeded = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let failed = Arc::new(std::sync::atomic::AtomicU64::new(0));

        std::thread::scope(|scope| {
            for _ in 0..self.config.threads.max(1) {
                let queue = &queue;
                let pool = &pool;
                let succeeded = Arc::clone(&succeeded);
                let failed = Arc::clone(&failed);

                scope.spawn(move || {
                    let worker = pool.acquire();
                    loop {
                        if self.cancel.load(Ordering::SeqCst) {
                            break;
                        }
                        let job = {
                            let mut q = queue.lock().unwrap();
                            q.pop_front()
                        };
                        let Some(job) = job else { break };

                        match self.process_copy_job(job, worker.id) {
                            Ok(()) => {
                                succeeded.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(e) if e.is_cancellation() => {
                                self.cancel.store(true, Ordering::SeqCst);
                                self.publisher.publish(ProgressEvent::cancellation_requested());
                                break;
                            }
                            Err(e) => {
                                failed.fetch_add(1, Ordering::SeqCst);
                                self.state.record_error(&job.key, &e.to_string());
                                self.publisher.publish(ProgressEvent::job_failed(
                                    JobId::new(&job.key),
                                    worker.id,
                                    e.to_string(),
                                ));
                            }
                        }
                    }
                });
            }
        });

        (succeeded.load(Ordering::SeqCst), failed.load(Ordering::SeqCst))
    }

    fn process_copy_job(&self, job: &FileJob, worker_id: usize) -> crate::error::Result<()> {
        let job_id = JobId::new(&job.key);
        self.publisher
            .publish(ProgressEvent::job_started(job_id.clone(), JobKind::Copy, worker_id, job.size));

        let mount = self.disk.choose_destination(job.size)?;
        let dest = resolve_dest_path(
            &job.key,
            &mount,
            self.config.source_root.as_deref(),
            self.config.destination_root.as_deref(),
        );

        let started = Instant::now();
        let publisher = &self.publisher;
        let job_id_for_progress = job_id.clone();
        let mut on_progress = |percent: u8| {
            publisher.publish(ProgressEvent::job_progress(job_id_for_progress.clone(), worker_id, percent));
        };

        crate::copier::copy_file(self.copier, &job.key, &dest, &mut on_progress)?;

        self.state.record_success(&[job.key.clone()], &job.key, &dest)?;
        self.publisher.publish(ProgressEvent::job_succeeded(
            job_id,
            worker_id,
            dest,
            started.elapsed().as_millis() as u64,
        ));
        info!(job = %job.key.display(), worker_id, "copy job complete");
        Ok(())
    }

    fn run_archive_phase(&self, jobs: &[SequenceJob]) -> (u64, u64) {
        let mut succeeded = 0u64;
        let mut failed = 0u64;

        for job in jobs {
            if self.cancel.load(Ordering::SeqCst) {
                break;
            }
            match self.process_archive_job(job) {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    failed += 1;
                    self.state.record_error(&job.key, &e.to_string());
                    self.publisher.publish(ProgressEvent::job_failed(JobId::new(&job.key), 0, e.to_string()));
                }
            }
        }

        (succeeded, failed)
    }

    fn process_archive_job(&self, job: &SequenceJob) -> crate::error::Result<()> {
        let job_id = JobId::new(&job.key);
        self.publisher
            .publish(ProgressEvent::job_started(job_id.clone(), JobKind::Archive, 0, job.size));

        let mount = self.disk.choose_destination(job.size)?;
        let dest = resolve_dest_path(
            &job.dir.join(&job.tar_name),
            &mount,
            self.config.source_root.as_deref(),
            self.config.destination_root.as_deref(),
        );

        let started = Instant::now();
        let outcome = archiver::archive_sequence(job, &dest)?;
        if outcome.missing_members > 0 {
            warn!(job = %job.key.display(), missing = outcome.missing_members, "sequence members missing during archive");
        }

        self.state.record_success(&job.members, &job.key, &dest)?;
        self.publisher.publish(ProgressEvent::job_succeeded(
            job_id,
            0,
            dest,
            started.elapsed().as_millis() as u64,
        ));
        Ok(())
    }
}
