//! The progress relay: engine event stream → job record updates.
//!
//! One relay is attached per job, for the duration of that job's transcode
//! call only. Dropping the relay aborts its listener task, which is what
//! scopes a subscription to a single job's execution window: a later job on
//! the same shared engine can never update the wrong record. The abort can
//! only land on the channel-receive await, never inside a store update.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use clipmill_core::events::{EventBus, EventPayload};
use clipmill_core::JobId;
use clipmill_engine::{parse_progress_line, percent_from_out_time, ProgressEvent};

use crate::convert::store::JobStore;

/// A live subscription translating one engine's progress lines into updates
/// of one job record.
pub struct ProgressRelay {
    handle: Option<JoinHandle<()>>,
}

impl ProgressRelay {
    /// Attach a relay for `job_id`.
    ///
    /// `duration_secs` is the probed source duration; without it, percentage
    /// reports are skipped entirely (indeterminate progress) and only output
    /// sizes flow through.
    pub fn attach(
        store: Arc<JobStore>,
        events: Arc<EventBus>,
        job_id: JobId,
        duration_secs: Option<f64>,
        mut lines: broadcast::Receiver<String>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                let line = match lines.recv().await {
                    Ok(line) => line,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("progress relay for job {job_id} lagged {skipped} lines");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                match parse_progress_line(&line) {
                    ProgressEvent::OutTime { us } => {
                        let Some(duration) = duration_secs else {
                            continue;
                        };
                        let percent = percent_from_out_time(us, duration);
                        Self::apply(&store, &events, job_id, |job| {
                            job.record_progress(percent);
                        });
                    }
                    ProgressEvent::TotalSize { bytes } => {
                        Self::apply(&store, &events, job_id, |job| {
                            job.record_output_bytes(bytes);
                        });
                    }
                    ProgressEvent::Unknown => {}
                }
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    /// Wait for the listener to exit on its own; the line stream must have
    /// been closed first.
    #[cfg(test)]
    async fn joined(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    fn apply(
        store: &JobStore,
        events: &EventBus,
        job_id: JobId,
        update: impl FnOnce(&mut crate::convert::job::Job),
    ) {
        let current = store.with_job(job_id, |job| {
            update(job);
            (job.progress_percent, job.output_bytes)
        });
        if let Some((percent, output_bytes)) = current {
            events.broadcast(EventPayload::JobProgress {
                job_id,
                percent,
                output_bytes,
            });
        }
    }
}

impl Drop for ProgressRelay {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::artifact::MemoryRegistry;
    use crate::convert::job::SourcePayload;
    use bytes::Bytes;

    fn converting_job(store: &JobStore, name: &str) -> JobId {
        let id = store.add_jobs(vec![SourcePayload::new(name, Bytes::from_static(b"in"))])[0].id;
        store.with_job(id, |j| j.start());
        id
    }

    async fn drain(relay: ProgressRelay) {
        // Closing the channel lets the listener exit on its own.
        relay.joined().await;
    }

    #[tokio::test]
    async fn relays_percent_and_size() {
        let store = Arc::new(JobStore::new(Arc::new(MemoryRegistry::new())));
        let events = Arc::new(EventBus::default());
        let id = converting_job(&store, "a.mov");

        let (tx, rx) = broadcast::channel(16);
        let relay = ProgressRelay::attach(store.clone(), events.clone(), id, Some(1.0), rx);

        tx.send("out_time_ms=500000".to_string()).unwrap();
        tx.send("total_size=1048576".to_string()).unwrap();
        drop(tx);
        drain(relay).await;

        let job = store.get(id).unwrap();
        assert_eq!(job.progress_percent, 50);
        assert_eq!(job.output_bytes, 1_048_576);
    }

    #[tokio::test]
    async fn unknown_duration_skips_percent_reports() {
        let store = Arc::new(JobStore::new(Arc::new(MemoryRegistry::new())));
        let events = Arc::new(EventBus::default());
        let id = converting_job(&store, "a.mov");

        let (tx, rx) = broadcast::channel(16);
        let relay = ProgressRelay::attach(store.clone(), events.clone(), id, None, rx);

        tx.send("out_time_ms=500000".to_string()).unwrap();
        tx.send("total_size=2048".to_string()).unwrap();
        drop(tx);
        drain(relay).await;

        let job = store.get(id).unwrap();
        // Indeterminate progress: no ratio is ever computed.
        assert_eq!(job.progress_percent, 0);
        assert_eq!(job.output_bytes, 2048);
    }

    #[tokio::test]
    async fn unrecognized_lines_are_ignored() {
        let store = Arc::new(JobStore::new(Arc::new(MemoryRegistry::new())));
        let events = Arc::new(EventBus::default());
        let id = converting_job(&store, "a.mov");

        let (tx, rx) = broadcast::channel(16);
        let relay = ProgressRelay::attach(store.clone(), events.clone(), id, Some(1.0), rx);

        tx.send("fps=30.0".to_string()).unwrap();
        tx.send("progress=continue".to_string()).unwrap();
        drop(tx);
        drain(relay).await;

        let job = store.get(id).unwrap();
        assert_eq!(job.progress_percent, 0);
        assert_eq!(job.output_bytes, 0);
    }

    #[tokio::test]
    async fn intermediate_reports_never_reach_one_hundred() {
        let store = Arc::new(JobStore::new(Arc::new(MemoryRegistry::new())));
        let events = Arc::new(EventBus::default());
        let id = converting_job(&store, "a.mov");

        let (tx, rx) = broadcast::channel(16);
        let relay = ProgressRelay::attach(store.clone(), events.clone(), id, Some(1.0), rx);

        // Overshoot: the engine can report past the probed duration.
        tx.send("out_time_ms=3000000".to_string()).unwrap();
        drop(tx);
        drain(relay).await;

        assert_eq!(store.get(id).unwrap().progress_percent, 99);
    }

    #[tokio::test]
    async fn progress_events_are_broadcast() {
        let store = Arc::new(JobStore::new(Arc::new(MemoryRegistry::new())));
        let events = Arc::new(EventBus::default());
        let mut event_rx = events.subscribe();
        let id = converting_job(&store, "a.mov");

        let (tx, rx) = broadcast::channel(16);
        let relay = ProgressRelay::attach(store.clone(), events.clone(), id, Some(2.0), rx);

        tx.send("out_time_ms=1000000".to_string()).unwrap();
        drop(tx);
        drain(relay).await;

        let event = event_rx.recv().await.unwrap();
        match event.payload {
            EventPayload::JobProgress {
                job_id,
                percent,
                output_bytes,
            } => {
                assert_eq!(job_id, id);
                assert_eq!(percent, 50);
                assert_eq!(output_bytes, 0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn two_relays_update_their_own_jobs_only() {
        let store = Arc::new(JobStore::new(Arc::new(MemoryRegistry::new())));
        let events = Arc::new(EventBus::default());
        let id_a = converting_job(&store, "a.mov");
        let id_b = converting_job(&store, "b.avi");

        let (tx_a, rx_a) = broadcast::channel(16);
        let (tx_b, rx_b) = broadcast::channel(16);
        let relay_a = ProgressRelay::attach(store.clone(), events.clone(), id_a, Some(1.0), rx_a);
        let relay_b = ProgressRelay::attach(store.clone(), events.clone(), id_b, Some(1.0), rx_b);

        tx_a.send("out_time_ms=250000".to_string()).unwrap();
        tx_b.send("out_time_ms=750000".to_string()).unwrap();
        drop(tx_a);
        drop(tx_b);
        drain(relay_a).await;
        drain(relay_b).await;

        assert_eq!(store.get(id_a).unwrap().progress_percent, 25);
        assert_eq!(store.get(id_b).unwrap().progress_percent, 75);
    }
}
