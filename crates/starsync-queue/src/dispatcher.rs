use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use starsync_client::RemoteStore;
use starsync_core::{DispatchConfig, EntityKind, Result, SyncError};
use tracing::{debug, error, info, warn};

use crate::fence::DeleteFence;
use crate::job::{BatchJob, DispatchReport, Job, JobOutcome, Operation, OutcomeStatus};

/// Receives flushed batches. Implemented by [`WriteDispatcher`]; tests
/// substitute a recorder.
pub trait BatchSink {
    fn submit(&mut self, batch: BatchJob) -> Result<()>;

    /// Block while too much work is queued.
    fn wait_for_capacity(&mut self) -> Result<()>;

    /// Wait for everything submitted so far and report on it.
    fn finish(&mut self) -> Result<DispatchReport>;
}

/// State shared between the producer and the workers. Workers never see
/// the in-memory indices, only this and the store.
struct Shared {
    depth: AtomicUsize,
    fence: DeleteFence,
    fatal: Mutex<Option<String>>,
}

impl Shared {
    fn fatal(&self) -> Option<String> {
        self.fatal.lock().clone()
    }
}

/// Fixed pool of worker threads draining a FIFO queue of bulk writes.
pub struct WriteDispatcher {
    config: DispatchConfig,
    jobs: Sender<Job>,
    leftovers: Receiver<Job>,
    results: Receiver<JobOutcome>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
    next_seq: u64,
    last_delete: HashMap<EntityKind, u64>,
    report: DispatchReport,
}

impl WriteDispatcher {
    pub fn start(store: Arc<dyn RemoteStore>, config: DispatchConfig) -> Result<Self> {
        let (job_tx, job_rx) = unbounded::<Job>();
        let (result_tx, result_rx) = unbounded::<JobOutcome>();
        let shared = Arc::new(Shared {
            depth: AtomicUsize::new(0),
            fence: DeleteFence::new(),
            fatal: Mutex::new(None),
        });

        let worker_count = config.workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let worker = Worker {
                index,
                jobs: job_rx.clone(),
                results: result_tx.clone(),
                store: store.clone(),
                shared: shared.clone(),
                config: config.clone(),
            };
            let handle = thread::Builder::new()
                .name(format!("starsync-writer-{}", index))
                .spawn(move || worker.run())?;
            workers.push(handle);
        }
        debug!("write dispatcher started with {} workers", worker_count);

        Ok(Self {
            config,
            jobs: job_tx,
            leftovers: job_rx,
            results: result_rx,
            workers,
            shared,
            next_seq: 0,
            last_delete: HashMap::new(),
            report: DispatchReport::default(),
        })
    }

    /// Jobs queued or running, sentinels included.
    pub fn depth(&self) -> usize {
        self.shared.depth.load(Ordering::Acquire)
    }

    fn check_fatal(&self) -> Result<()> {
        match self.shared.fatal() {
            Some(msg) => Err(SyncError::Connection(msg)),
            None => Ok(()),
        }
    }

    fn drain_results(&mut self) {
        while let Ok(outcome) = self.results.try_recv() {
            self.report.record(&outcome);
        }
    }

    fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for _ in 0..self.workers.len() {
            self.shared.depth.fetch_add(1, Ordering::AcqRel);
            if self.jobs.send(Job::Stop).is_err() {
                self.shared.depth.fetch_sub(1, Ordering::AcqRel);
            }
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("write worker exited abnormally");
            }
        }
    }
}

impl BatchSink for WriteDispatcher {
    fn submit(&mut self, batch: BatchJob) -> Result<()> {
        self.check_fatal()?;
        if batch.is_empty() {
            return Ok(());
        }
        self.next_seq += 1;
        let seq = self.next_seq;
        let kind = batch.kind();
        let after_delete = match batch.operation() {
            Operation::Delete => {
                self.shared.fence.register(kind, seq);
                self.last_delete.insert(kind, seq);
                None
            }
            Operation::Create => self.last_delete.get(&kind).copied(),
            Operation::Update => None,
        };
        debug!("queue {} {} batch #{} ({} rows)", kind, batch.operation(), seq, batch.len());
        self.shared.depth.fetch_add(1, Ordering::AcqRel);
        self.jobs
            .send(Job::Write {
                seq,
                after_delete,
                batch,
            })
            .map_err(|_| SyncError::Connection("write workers are gone".to_string()))
    }

    fn wait_for_capacity(&mut self) -> Result<()> {
        let limit = self.config.max_queue_depth();
        while self.depth() > limit {
            self.check_fatal()?;
            self.drain_results();
            thread::sleep(self.config.poll_interval());
        }
        self.drain_results();
        self.check_fatal()
    }

    /// Send one sentinel per worker, wait for every job to be acknowledged,
    /// then drain the result channel. Errors if the store became unreachable.
    fn finish(&mut self) -> Result<DispatchReport> {
        self.shutdown();
        self.drain_results();

        // left behind only if a worker died before its sentinel
        while let Ok(job) = self.leftovers.try_recv() {
            if let Job::Write { batch, .. } = job {
                warn!("{} {} batch never ran ({} rows)", batch.kind(), batch.operation(), batch.len());
                self.report.jobs += 1;
                self.report.lost_jobs += 1;
                self.report.rows_lost += batch.len();
            }
        }

        let report = std::mem::take(&mut self.report);
        info!(
            "writes complete: {} jobs, {} rows written, {} lost jobs, {} retries",
            report.jobs, report.rows_written, report.lost_jobs, report.retries
        );
        self.check_fatal()?;
        Ok(report)
    }
}

impl Drop for WriteDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    index: usize,
    jobs: Receiver<Job>,
    results: Sender<JobOutcome>,
    store: Arc<dyn RemoteStore>,
    shared: Arc<Shared>,
    config: DispatchConfig,
}

impl Worker {
    fn run(self) {
        while let Ok(job) = self.jobs.recv() {
            match job {
                Job::Stop => {
                    self.shared.depth.fetch_sub(1, Ordering::AcqRel);
                    break;
                }
                Job::Write {
                    seq,
                    after_delete,
                    batch,
                } => {
                    let kind = batch.kind();
                    let operation = batch.operation();
                    if let Some(up_to) = after_delete {
                        self.shared.fence.wait_clear(kind, up_to);
                    }

                    let outcome = match catch_unwind(AssertUnwindSafe(|| self.execute(&batch))) {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            error!("worker {} panicked writing {} {} batch", self.index, kind, operation);
                            JobOutcome {
                                kind,
                                operation,
                                rows: batch.len(),
                                rows_written: 0,
                                retries: 0,
                                status: OutcomeStatus::Lost("worker panicked".to_string()),
                            }
                        }
                    };

                    if operation == Operation::Delete {
                        self.shared.fence.complete(kind, seq);
                    }
                    self.shared.depth.fetch_sub(1, Ordering::AcqRel);
                    let _ = self.results.send(outcome);
                }
            }
        }
    }

    fn execute(&self, batch: &BatchJob) -> JobOutcome {
        let kind = batch.kind();
        let operation = batch.operation();
        let mut outcome = JobOutcome {
            kind,
            operation,
            rows: batch.len(),
            rows_written: 0,
            retries: 0,
            status: OutcomeStatus::Written,
        };

        if let Some(msg) = self.shared.fatal() {
            outcome.status = OutcomeStatus::Lost(format!("session aborted: {}", msg));
            return outcome;
        }

        let result = match batch {
            BatchJob::Create { rows, .. } => {
                self.with_retry(kind, operation, &mut outcome.retries, || {
                    self.store.bulk_create(kind, rows)
                })
            }
            BatchJob::Update { rows, .. } => {
                self.with_retry(kind, operation, &mut outcome.retries, || {
                    self.store.bulk_update(kind, rows)
                })
            }
            BatchJob::Delete { ids, .. } => {
                let mut deleted = 0;
                let mut failure = None;
                for id in ids {
                    match self.with_retry(kind, operation, &mut outcome.retries, || {
                        self.store.destroy(kind, *id)
                    }) {
                        Ok(()) => deleted += 1,
                        Err(e) if e.is_fatal() => {
                            failure = Some(e);
                            break;
                        }
                        Err(e) => {
                            warn!("{} delete of {} dropped: {}", kind, id, e);
                        }
                    }
                }
                match failure {
                    Some(e) => {
                        outcome.rows_written = deleted;
                        Err(e)
                    }
                    None => Ok(deleted),
                }
            }
        };

        match result {
            Ok(written) => outcome.rows_written = written,
            Err(e) => {
                if e.is_fatal() {
                    error!("{} {} batch: store unreachable: {}", kind, operation, e);
                    let mut fatal = self.shared.fatal.lock();
                    if fatal.is_none() {
                        *fatal = Some(e.to_string());
                    }
                } else {
                    error!(
                        "{} {} batch of {} rows dropped, will resync on next full pass: {}",
                        kind,
                        operation,
                        batch.len(),
                        e
                    );
                }
                outcome.status = OutcomeStatus::Lost(e.to_string());
            }
        }
        outcome
    }

    /// Retry busy/locked failures after a fixed delay, up to the configured count.
    fn with_retry<T>(
        &self,
        kind: EntityKind,
        operation: Operation,
        retries: &mut u32,
        mut call: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            match call() {
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    *retries += 1;
                    warn!(
                        "{} {} failed (attempt {}/{}), retrying: {}",
                        kind,
                        operation,
                        attempt,
                        self.config.max_retries + 1,
                        e
                    );
                    thread::sleep(self.config.retry_delay());
                }
                other => return other,
            }
        }
    }
}
