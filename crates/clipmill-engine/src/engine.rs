//! The transcoding-engine contract.
//!
//! The engine is an external collaborator: it accepts input bytes under a
//! virtual filename, runs a command-line-style argument list, emits a
//! textual `key=value` progress stream, and produces an output byte buffer.
//! Its codec internals are opaque to this crate.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use clipmill_core::Result;

/// A single engine instance.
///
/// One instance is shared across a whole batch in sequential mode; parallel
/// mode creates a dedicated instance per job, which keeps each job's virtual
/// filesystem namespace private. Within one instance, calls for a given job
/// are strictly ordered by the caller: probe before write, write before
/// execute, execute before read.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    /// Suspend until the instance reports ready.
    ///
    /// Readiness is a one-shot signal: once an instance has become ready,
    /// subsequent calls return immediately. A readiness failure is terminal
    /// for the instance.
    async fn ready(&self) -> Result<()>;

    /// Probe raw input bytes for a source duration in seconds.
    ///
    /// `Ok(None)` means the container carried no duration. Callers treat any
    /// error the same way they treat `None`: progress reporting degrades to
    /// indeterminate, the job proceeds.
    async fn probe(&self, bytes: &[u8]) -> Result<Option<f64>>;

    /// Write input bytes into the engine's virtual filesystem.
    async fn write_input(&self, name: &str, bytes: Bytes) -> Result<()>;

    /// Subscribe to the textual progress stream.
    ///
    /// Lines are `key=value` pairs in whatever order the engine emits them;
    /// no reordering or deduplication is performed. The receiver only sees
    /// lines emitted while a subscription is held, which is how a caller
    /// scopes observation to one job's execution window.
    fn subscribe(&self) -> broadcast::Receiver<String>;

    /// Run the transcode with the given argument list.
    async fn execute(&self, args: &[String]) -> Result<()>;

    /// Read an output buffer back out of the virtual filesystem.
    async fn read_output(&self, name: &str) -> Result<Bytes>;
}

/// Constructor of engine instances.
///
/// The pool manager decides how many instances a batch needs; the factory
/// decides how one is built. Scripted factories stand in for the real one in
/// tests.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Create a fresh engine instance. The caller awaits readiness itself.
    async fn create(&self) -> Result<Arc<dyn TranscodeEngine>>;

    /// Whether the engine stack is usable at all (e.g. tools installed).
    fn available(&self) -> bool {
        true
    }
}
