//! Shared test harness for integration tests.
//!
//! Provides a scripted in-memory engine whose per-job behavior (probe
//! result, progress lines, failure injection, completion pacing) is
//! controlled by the test, a factory that counts instance creation and
//! records execution/write order across engines, and a counting artifact
//! registry for verifying the release-exactly-once contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Barrier, Notify};

use clipmill::{ArtifactRef, ArtifactRegistry, ConversionOrchestrator, SourcePayload};
use clipmill_core::config::Config;
use clipmill_core::{ArtifactId, Error, JobId, Result};
use clipmill_engine::{EngineFactory, TranscodeEngine};

/// Buffer size for scripted progress channels.
const CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// JobScript
// ---------------------------------------------------------------------------

/// Scripted behavior for one job, keyed by its source filename.
#[derive(Clone, Default)]
pub struct JobScript {
    /// Probed duration in seconds.
    pub duration: Option<f64>,
    /// Fail the probe call (the job must still proceed).
    pub probe_fails: bool,
    /// Progress lines emitted during execute, in order.
    pub lines: Vec<String>,
    /// Fail the execute call with this message.
    pub execute_error: Option<String>,
    /// Sleep inside execute, to control completion order.
    pub delay: Option<Duration>,
    /// Park inside execute until the test calls `notify_one`.
    pub hold: Option<Arc<Notify>>,
    /// Rendezvous inside execute; passes only when enough jobs run at once.
    pub barrier: Option<Arc<Barrier>>,
    /// Output bytes returned from read_output (default: `mp4:<name>`).
    pub output: Option<Bytes>,
}

// ---------------------------------------------------------------------------
// ScriptedEngine
// ---------------------------------------------------------------------------

pub struct ScriptedEngine {
    scripts: Arc<HashMap<String, JobScript>>,
    exec_log: Arc<Mutex<Vec<String>>>,
    write_log: Arc<Mutex<Vec<String>>>,
    progress_tx: broadcast::Sender<String>,
    current: Mutex<Option<String>>,
}

impl ScriptedEngine {
    /// Match a virtual input name (possibly job-prefixed) back to its script.
    fn script_for_input(&self, input_name: &str) -> Option<(String, JobScript)> {
        self.scripts
            .iter()
            .find(|(key, _)| input_name.ends_with(key.as_str()))
            .map(|(key, script)| (key.clone(), script.clone()))
    }
}

#[async_trait]
impl TranscodeEngine for ScriptedEngine {
    async fn ready(&self) -> Result<()> {
        Ok(())
    }

    async fn probe(&self, bytes: &[u8]) -> Result<Option<f64>> {
        // Payloads are built as `<name><padding>`; match on the leading name.
        let Some(script) = self
            .scripts
            .iter()
            .find(|(key, _)| bytes.starts_with(key.as_bytes()))
            .map(|(_, s)| s)
        else {
            return Ok(None);
        };
        if script.probe_fails {
            return Err(Error::probe("scripted probe failure"));
        }
        Ok(script.duration)
    }

    async fn write_input(&self, name: &str, _bytes: Bytes) -> Result<()> {
        self.write_log.lock().push(name.to_string());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.progress_tx.subscribe()
    }

    async fn execute(&self, args: &[String]) -> Result<()> {
        let input = args
            .iter()
            .position(|a| a == "-i")
            .and_then(|i| args.get(i + 1))
            .cloned()
            .ok_or_else(|| Error::execute("no -i argument"))?;
        let (key, script) = self
            .script_for_input(&input)
            .unwrap_or_else(|| (input.clone(), JobScript::default()));

        self.exec_log.lock().push(format!("start:{key}"));
        *self.current.lock() = Some(key.clone());

        if let Some(ref barrier) = script.barrier {
            barrier.wait().await;
        }
        for line in &script.lines {
            let _ = self.progress_tx.send(line.clone());
        }
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(ref hold) = script.hold {
            hold.notified().await;
        }

        self.exec_log.lock().push(format!("end:{key}"));
        match script.execute_error {
            Some(message) => Err(Error::execute(message)),
            None => Ok(()),
        }
    }

    async fn read_output(&self, name: &str) -> Result<Bytes> {
        let current = self.current.lock().clone();
        let Some(key) = current else {
            return Err(Error::read(name, "nothing executed"));
        };
        let script = self.scripts.get(&key).cloned().unwrap_or_default();
        Ok(script
            .output
            .unwrap_or_else(|| Bytes::from(format!("mp4:{key}"))))
    }
}

// ---------------------------------------------------------------------------
// ScriptedFactory
// ---------------------------------------------------------------------------

pub struct ScriptedFactory {
    scripts: Arc<HashMap<String, JobScript>>,
    created: AtomicUsize,
    exec_log: Arc<Mutex<Vec<String>>>,
    write_log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedFactory {
    pub fn new(scripts: Vec<(&str, JobScript)>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Arc::new(
                scripts
                    .into_iter()
                    .map(|(name, script)| (name.to_string(), script))
                    .collect(),
            ),
            created: AtomicUsize::new(0),
            exec_log: Arc::new(Mutex::new(Vec::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// How many engine instances have been created.
    pub fn engines_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// `start:<name>` / `end:<name>` markers across all engines, in order.
    pub fn executions(&self) -> Vec<String> {
        self.exec_log.lock().clone()
    }

    /// Virtual input names written across all engines, in order.
    pub fn writes(&self) -> Vec<String> {
        self.write_log.lock().clone()
    }
}

#[async_trait]
impl EngineFactory for ScriptedFactory {
    async fn create(&self) -> Result<Arc<dyn TranscodeEngine>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let (progress_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Ok(Arc::new(ScriptedEngine {
            scripts: Arc::clone(&self.scripts),
            exec_log: Arc::clone(&self.exec_log),
            write_log: Arc::clone(&self.write_log),
            progress_tx,
            current: Mutex::new(None),
        }))
    }
}

// ---------------------------------------------------------------------------
// CountingRegistry
// ---------------------------------------------------------------------------

/// Artifact registry that counts issues and per-reference revokes.
#[derive(Default)]
pub struct CountingRegistry {
    issued: AtomicUsize,
    revokes: Mutex<HashMap<ArtifactId, usize>>,
}

impl CountingRegistry {
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn total_revokes(&self) -> usize {
        self.revokes.lock().values().sum()
    }

    /// Largest revoke count observed for any single reference.
    pub fn max_revokes_per_ref(&self) -> usize {
        self.revokes.lock().values().copied().max().unwrap_or(0)
    }
}

impl ArtifactRegistry for CountingRegistry {
    fn issue(&self, _bytes: &Bytes) -> ArtifactRef {
        self.issued.fetch_add(1, Ordering::SeqCst);
        let id = ArtifactId::new();
        ArtifactRef::new(id, format!("test://artifacts/{id}"))
    }

    fn revoke(&self, href: &ArtifactRef) {
        *self.revokes.lock().entry(href.id()).or_insert(0) += 1;
    }
}

// ---------------------------------------------------------------------------
// TestHarness
// ---------------------------------------------------------------------------

pub struct TestHarness {
    pub orchestrator: Arc<ConversionOrchestrator>,
    pub factory: Arc<ScriptedFactory>,
    pub registry: Arc<CountingRegistry>,
}

impl TestHarness {
    pub fn new(scripts: Vec<(&str, JobScript)>) -> Self {
        let factory = ScriptedFactory::new(scripts);
        let registry = Arc::new(CountingRegistry::default());
        let orchestrator = Arc::new(ConversionOrchestrator::new(
            factory.clone(),
            registry.clone(),
            Config::default(),
        ));
        Self {
            orchestrator,
            factory,
            registry,
        }
    }

    /// Enqueue one job per name. Payload bytes lead with the name so the
    /// scripted probe can identify them.
    pub fn add(&self, names: &[&str]) -> Vec<JobId> {
        self.add_sized(&names.iter().map(|n| (*n, 64usize)).collect::<Vec<_>>())
    }

    /// Enqueue jobs with explicit payload sizes.
    pub fn add_sized(&self, files: &[(&str, usize)]) -> Vec<JobId> {
        let payloads = files
            .iter()
            .map(|(name, size)| SourcePayload::new(*name, payload_bytes(name, *size)))
            .collect();
        self.orchestrator.add_jobs(payloads)
    }
}

fn payload_bytes(name: &str, size: usize) -> Bytes {
    let mut data = name.as_bytes().to_vec();
    data.resize(data.len().max(size), 0);
    Bytes::from(data)
}

/// Poll until `cond` holds, panicking after `timeout_ms`.
pub async fn wait_until(timeout_ms: u64, mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_millis(timeout_ms), async {
        loop {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
