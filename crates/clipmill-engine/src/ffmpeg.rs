//! Process-backed [`TranscodeEngine`] driving a local ffmpeg/ffprobe install.
//!
//! Each instance owns a temporary directory that serves as its virtual
//! filesystem namespace; virtual filenames never leave that directory.
//! Readiness means the ffmpeg binary has been located and answers
//! `-version`; verification runs in the background so construction itself
//! stays cheap.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tempfile::TempDir;
use tokio::sync::{broadcast, watch};

use clipmill_core::config::EngineConfig;
use clipmill_core::{EngineId, Error, Result};

use crate::command::ToolCommand;
use crate::engine::{EngineFactory, TranscodeEngine};

/// Buffer size for the progress-line fan-out channel.
const PROGRESS_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
enum ReadyState {
    Pending,
    Ready,
    Failed(String),
}

// ---------------------------------------------------------------------------
// FfmpegEngine
// ---------------------------------------------------------------------------

/// An engine instance backed by local ffmpeg and ffprobe binaries.
pub struct FfmpegEngine {
    id: EngineId,
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    workdir: TempDir,
    config: EngineConfig,
    ready_rx: watch::Receiver<ReadyState>,
    progress_tx: broadcast::Sender<String>,
}

impl FfmpegEngine {
    /// Create a new engine instance.
    ///
    /// Tool paths come from the config when set, otherwise from `PATH`.
    /// Verification of the ffmpeg install happens asynchronously; callers
    /// observe the outcome through [`TranscodeEngine::ready`].
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let ffmpeg = resolve_tool(config.ffmpeg_path.as_deref(), "ffmpeg")?;
        let ffprobe = resolve_tool(config.ffprobe_path.as_deref(), "ffprobe")?;

        let workdir = TempDir::new()
            .map_err(|e| Error::engine_init(format!("failed to create workdir: {e}")))?;

        let (ready_tx, ready_rx) = watch::channel(ReadyState::Pending);
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);

        let id = EngineId::new();
        tracing::debug!("Engine {id} created (ffmpeg: {})", ffmpeg.display());

        // Background verification; the readiness gate resolves when this
        // finishes.
        let verify_path = ffmpeg.clone();
        let verify_timeout = config.init_timeout();
        tokio::spawn(async move {
            let result = ToolCommand::new(verify_path)
                .arg("-version")
                .timeout(verify_timeout)
                .execute()
                .await;
            let state = match result {
                Ok(_) => ReadyState::Ready,
                Err(e) => ReadyState::Failed(e.to_string()),
            };
            let _ = ready_tx.send(state);
        });

        Ok(Self {
            id,
            ffmpeg,
            ffprobe,
            workdir,
            config: config.clone(),
            ready_rx,
            progress_tx,
        })
    }

    /// This instance's identifier (used in logs).
    pub fn id(&self) -> EngineId {
        self.id
    }

    fn virtual_path(&self, name: &str) -> Result<PathBuf> {
        validate_virtual_name(name)?;
        Ok(self.workdir.path().join(name))
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    async fn ready(&self) -> Result<()> {
        let mut rx = self.ready_rx.clone();
        let wait = rx.wait_for(|s| !matches!(s, ReadyState::Pending));
        let result = match tokio::time::timeout(self.config.init_timeout(), wait).await {
            Ok(Ok(state)) => match &*state {
                ReadyState::Ready => Ok(()),
                ReadyState::Failed(msg) => Err(Error::engine_init(msg.clone())),
                ReadyState::Pending => Err(Error::engine_init("readiness signal lost")),
            },
            Ok(Err(_)) => Err(Error::engine_init("readiness channel closed")),
            Err(_) => Err(Error::timeout("readiness", self.config.init_timeout())),
        };
        result
    }

    async fn probe(&self, bytes: &[u8]) -> Result<Option<f64>> {
        let name = format!("probe-{}.bin", uuid::Uuid::new_v4().simple());
        let path = self.workdir.path().join(&name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::probe(format!("failed to stage probe input: {e}")))?;

        let mut cmd = ToolCommand::new(self.ffprobe.clone());
        cmd.timeout(self.config.probe_timeout());
        cmd.args(["-v", "error", "-print_format", "json", "-show_format"]);
        cmd.arg(path.to_string_lossy().as_ref());

        let result = cmd.execute().await;
        let _ = tokio::fs::remove_file(&path).await;

        let output = match result {
            Ok(output) => output,
            Err(e @ Error::Timeout { .. }) => return Err(e),
            Err(e) => return Err(Error::probe(e.to_string())),
        };

        parse_probe_duration(&output.stdout)
    }

    async fn write_input(&self, name: &str, bytes: Bytes) -> Result<()> {
        let path = self.virtual_path(name)?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| Error::write(name, e.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.progress_tx.subscribe()
    }

    async fn execute(&self, args: &[String]) -> Result<()> {
        tracing::debug!("Engine {} exec: ffmpeg {}", self.id, args.join(" "));

        let tx = self.progress_tx.clone();
        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.args(args.iter().cloned());
        cmd.current_dir(self.workdir.path());
        cmd.timeout(self.config.exec_timeout());

        cmd.execute_streaming(|line| {
            // Ignore send errors (no active subscription).
            let _ = tx.send(line.to_string());
        })
        .await?;

        Ok(())
    }

    async fn read_output(&self, name: &str) -> Result<Bytes> {
        let path = self.virtual_path(name)?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::read(name, e.to_string()))?;
        Ok(Bytes::from(data))
    }
}

// ---------------------------------------------------------------------------
// FfmpegEngineFactory
// ---------------------------------------------------------------------------

/// Factory producing [`FfmpegEngine`] instances from one shared config.
#[derive(Debug, Clone)]
pub struct FfmpegEngineFactory {
    config: EngineConfig,
}

impl FfmpegEngineFactory {
    /// Create a factory for the given engine configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineFactory for FfmpegEngineFactory {
    async fn create(&self) -> Result<Arc<dyn TranscodeEngine>> {
        let engine = FfmpegEngine::new(&self.config)?;
        Ok(Arc::new(engine))
    }

    fn available(&self) -> bool {
        resolve_tool(self.config.ffmpeg_path.as_deref(), "ffmpeg").is_ok()
            && resolve_tool(self.config.ffprobe_path.as_deref(), "ffprobe").is_ok()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn resolve_tool(explicit: Option<&Path>, name: &str) -> Result<PathBuf> {
    match explicit {
        Some(p) if p.exists() => Ok(p.to_path_buf()),
        Some(p) => Err(Error::engine_init(format!(
            "{name} not found at {}",
            p.display()
        ))),
        None => which::which(name)
            .map_err(|_| Error::engine_init(format!("{name} not found on PATH"))),
    }
}

/// A virtual filename must stay inside the workdir and must not be mistaken
/// for a flag by the tool's argument parser.
fn validate_virtual_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.starts_with('-')
    {
        return Err(Error::write(name, "invalid virtual filename"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_probe_duration(stdout: &str) -> Result<Option<f64>> {
    let parsed: ProbeOutput = serde_json::from_str(stdout)
        .map_err(|e| Error::probe(format!("ffprobe JSON parse error: {e}")))?;
    Ok(parsed.format.duration.and_then(|s| s.parse::<f64>().ok()))
}
