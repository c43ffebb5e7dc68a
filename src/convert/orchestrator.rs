//! The batch orchestrator and presentation-layer facade.
//!
//! One batch run may be active at a time: `Idle → Running → Idle`. Starting
//! while running is a no-op; stopping cancels the run's token and reports
//! idle immediately without touching in-flight jobs. Per-job failures are
//! collapsed into the job record and never abort siblings or the batch.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use clipmill_core::config::Config;
use clipmill_core::events::{Event, EventBus, EventPayload};
use clipmill_core::{JobId, ProcessingMode, Result};
use clipmill_engine::{conversion_args, EngineFactory};

use crate::convert::job::{Job, JobStatus, SourcePayload};
use crate::convert::pool::EnginePool;
use crate::convert::relay::ProgressRelay;
use crate::convert::store::JobStore;
use crate::convert::ArtifactRegistry;

/// The conversion orchestrator: accepts a queue of jobs, drives the engine
/// layer through the selected execution strategy, and exposes the job-state
/// model to a presentation layer.
pub struct ConversionOrchestrator {
    store: Arc<JobStore>,
    events: Arc<EventBus>,
    factory: Arc<dyn EngineFactory>,
    config: Config,
    processing: AtomicBool,
    run_seq: AtomicU64,
    cancel: Mutex<Option<(u64, CancellationToken)>>,
}

impl ConversionOrchestrator {
    /// Create an orchestrator over an engine factory and artifact registry.
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        registry: Arc<dyn ArtifactRegistry>,
        config: Config,
    ) -> Self {
        Self {
            store: Arc::new(JobStore::new(registry)),
            events: Arc::new(EventBus::default()),
            factory,
            config,
            processing: AtomicBool::new(false),
            run_seq: AtomicU64::new(0),
            cancel: Mutex::new(None),
        }
    }

    // -- Presentation-layer facade -------------------------------------------

    /// The event bus carrying job and batch lifecycle events.
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Snapshot of all job records, in insertion order.
    pub fn jobs(&self) -> Vec<Job> {
        self.store.jobs()
    }

    /// Snapshot of one job record.
    pub fn job(&self, id: JobId) -> Option<Job> {
        self.store.get(id)
    }

    /// Enqueue one pending job per payload; returns the new identifiers.
    pub fn add_jobs(&self, payloads: Vec<SourcePayload>) -> Vec<JobId> {
        let added = self.store.add_jobs(payloads);
        for job in &added {
            tracing::debug!("queued {} ({} bytes) as job {}", job.source.name, job.source.size(), job.id);
            self.events.broadcast(EventPayload::JobQueued {
                job_id: job.id,
                file_name: job.source.name.clone(),
            });
        }
        added.into_iter().map(|j| j.id).collect()
    }

    /// Remove one job. `Converting` jobs cannot be removed; a completed
    /// job's artifact reference is released first.
    pub fn remove_job(&self, id: JobId) -> Result<()> {
        self.store.remove(id)?;
        self.events.broadcast(EventPayload::JobRemoved { job_id: id });
        Ok(())
    }

    /// Remove all completed jobs, releasing their artifact references.
    /// Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let removed = self.store.clear_completed();
        for job_id in &removed {
            self.events.broadcast(EventPayload::JobRemoved { job_id: *job_id });
        }
        removed.len()
    }

    /// Remove every job that is not currently converting. Returns how many
    /// were removed.
    pub fn clear_all(&self) -> usize {
        let removed = self.store.clear_all();
        for job_id in &removed {
            self.events.broadcast(EventPayload::JobRemoved { job_id: *job_id });
        }
        removed.len()
    }

    /// Whether the engine stack is usable at all.
    pub fn is_ready(&self) -> bool {
        self.factory.available()
    }

    /// Whether a batch run is currently active.
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    // -- Batch lifecycle -----------------------------------------------------

    /// Run a batch over all jobs that are pending right now.
    ///
    /// Jobs added after the call are not part of this run. A call while a
    /// run is active is a no-op. The future resolves when the batch is done
    /// dispatching (and, absent a stop, every selected job is terminal).
    pub async fn start_conversion(&self, mode: ProcessingMode) {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("start_conversion ignored; a batch is already running");
            return;
        }

        let seq = self.run_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        *self.cancel.lock() = Some((seq, token.clone()));

        // Snapshot at call time.
        let pending = self.store.pending_ids();
        tracing::info!("starting {mode} batch over {} pending job(s)", pending.len());
        self.events.broadcast(EventPayload::BatchStarted {
            mode,
            jobs: pending.len(),
        });

        match mode {
            ProcessingMode::Sequential => self.run_sequential(&pending, &token).await,
            ProcessingMode::Parallel => self.run_parallel(&pending, &token).await,
        }

        let (completed, failed) = self.tally(&pending);
        tracing::info!("batch finished: {completed} completed, {failed} failed");

        // A stop may already have reported idle and taken the token; only
        // clean up after our own run.
        {
            let mut cancel = self.cancel.lock();
            if matches!(*cancel, Some((s, _)) if s == seq) {
                *cancel = None;
            }
        }
        self.processing.store(false, Ordering::SeqCst);
        self.events
            .broadcast(EventPayload::BatchFinished { completed, failed });
    }

    /// Request cooperative cancellation of the active run and report idle
    /// immediately. In-flight jobs are not interrupted: engine execution is
    /// not preemptible from outside.
    pub fn stop_conversion(&self) {
        let taken = self.cancel.lock().take();
        let Some((_, token)) = taken else {
            return;
        };
        tracing::info!("stop requested; no further jobs will be dispatched");
        token.cancel();
        self.processing.store(false, Ordering::SeqCst);
        self.events.broadcast(EventPayload::BatchStopped);
    }

    // -- Batch strategies ----------------------------------------------------

    /// Strict queue order, one job at a time on a single shared engine.
    /// The cancellation token is checked before each job, never mid-job.
    async fn run_sequential(&self, pending: &[JobId], token: &CancellationToken) {
        let pool = EnginePool::new(
            ProcessingMode::Sequential,
            Arc::clone(&self.factory),
            self.config.engine.init_timeout(),
        );
        for &job_id in pending {
            if token.is_cancelled() {
                tracing::info!("batch cancelled; remaining jobs stay pending");
                break;
            }
            self.convert_one(&pool, job_id).await;
        }
    }

    /// All jobs dispatched concurrently, each on its own engine, with no
    /// ordering guarantee between completions. Cancellation is advisory
    /// only once dispatch has happened.
    async fn run_parallel(&self, pending: &[JobId], token: &CancellationToken) {
        if token.is_cancelled() {
            return;
        }
        let pool = EnginePool::new(
            ProcessingMode::Parallel,
            Arc::clone(&self.factory),
            self.config.engine.init_timeout(),
        );
        futures::future::join_all(
            pending.iter().map(|&job_id| self.convert_one(&pool, job_id)),
        )
        .await;
    }

    // -- Per-job procedure ---------------------------------------------------

    /// Convert one job to its terminal state. Every failure mode collapses
    /// into the job record; nothing propagates.
    async fn convert_one(&self, pool: &EnginePool, job_id: JobId) {
        // The job may have been removed since the batch snapshot.
        let Some(job) = self.store.get(job_id) else {
            return;
        };
        if job.status != JobStatus::Pending {
            return;
        }
        let source = job.source;

        let started = Instant::now();

        // Mark converting before anything can fail, so every terminal state
        // is reached through Converting.
        if self.store.with_job(job_id, |j| j.start()).is_none() {
            return;
        }
        self.events.broadcast(EventPayload::JobStarted { job_id });
        tracing::info!("converting {} ({} bytes)", source.name, source.size());

        match self.run_job(pool, job_id, &source).await {
            Ok(output) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let output_bytes = output.len() as u64;
                if self
                    .store
                    .complete_job(job_id, output, elapsed_ms)
                    .is_some()
                {
                    tracing::info!(
                        "completed {} -> {output_bytes} bytes in {elapsed_ms} ms",
                        source.name
                    );
                    self.events.broadcast(EventPayload::JobCompleted {
                        job_id,
                        output_bytes,
                        elapsed_ms,
                    });
                }
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!("conversion of {} failed: {error}", source.name);
                self.store.with_job(job_id, |j| j.fail(&error));
                self.events
                    .broadcast(EventPayload::JobFailed { job_id, error });
            }
        }
    }

    /// The fallible middle of the per-job procedure: acquire, probe, write,
    /// execute with a scoped progress subscription, read the output back.
    async fn run_job(
        &self,
        pool: &EnginePool,
        job_id: JobId,
        source: &SourcePayload,
    ) -> Result<Bytes> {
        let engine = pool.acquire().await?;

        // Full input payload; `Bytes` clones share the buffer.
        let bytes = source.bytes.clone();

        // Probe failure degrades progress reporting to indeterminate.
        let duration_secs = match engine.probe(&bytes).await {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(
                    "duration probe for {} failed ({e}); progress will be indeterminate",
                    source.name
                );
                None
            }
        };

        let (input_name, output_name) = pool.virtual_names(job_id, &source.name);
        engine.write_input(&input_name, bytes).await?;

        // Subscription scoped to this job's execution window only.
        let relay = ProgressRelay::attach(
            Arc::clone(&self.store),
            Arc::clone(&self.events),
            job_id,
            duration_secs,
            engine.subscribe(),
        );

        let args = conversion_args(&input_name, &output_name, &self.config.conversion);
        let exec_result = engine.execute(&args).await;
        drop(relay);
        exec_result?;

        engine.read_output(&output_name).await
    }

    fn tally(&self, selected: &[JobId]) -> (usize, usize) {
        let mut completed = 0;
        let mut failed = 0;
        for &id in selected {
            match self.store.get(id).map(|j| j.status) {
                Some(JobStatus::Completed) => completed += 1,
                Some(JobStatus::Failed) => failed += 1,
                _ => {}
            }
        }
        (completed, failed)
    }
}
