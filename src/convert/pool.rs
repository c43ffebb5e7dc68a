//! Engine provisioning per processing mode.
//!
//! Sequential mode shares one engine across the whole batch: it is created
//! once, its readiness awaited before the first job dispatches, then reused.
//! Parallel mode creates a dedicated engine per job so concurrent jobs never
//! share a virtual filesystem namespace, at the cost of per-job engine
//! initialization.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use clipmill_core::{Error, JobId, ProcessingMode, Result};
use clipmill_engine::{EngineFactory, TranscodeEngine};

/// Engine handles for one batch run.
pub struct EnginePool {
    mode: ProcessingMode,
    factory: Arc<dyn EngineFactory>,
    init_timeout: Duration,
    shared: OnceCell<Arc<dyn TranscodeEngine>>,
}

impl EnginePool {
    /// Create a pool for one batch run.
    pub fn new(
        mode: ProcessingMode,
        factory: Arc<dyn EngineFactory>,
        init_timeout: Duration,
    ) -> Self {
        Self {
            mode,
            factory,
            init_timeout,
            shared: OnceCell::new(),
        }
    }

    /// The pool's processing mode.
    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    /// Return a ready-to-use engine handle for one job.
    ///
    /// An acquisition failure (construction, readiness, or the readiness
    /// deadline) fails only the calling job; in sequential mode the next
    /// job's acquire retries shared-engine creation.
    pub async fn acquire(&self) -> Result<Arc<dyn TranscodeEngine>> {
        match self.mode {
            ProcessingMode::Sequential => {
                let engine = self
                    .shared
                    .get_or_try_init(|| async {
                        let engine = self.factory.create().await?;
                        self.await_ready(&engine).await?;
                        Ok::<_, Error>(engine)
                    })
                    .await?;
                Ok(Arc::clone(engine))
            }
            ProcessingMode::Parallel => {
                let engine = self.factory.create().await?;
                self.await_ready(&engine).await?;
                Ok(engine)
            }
        }
    }

    async fn await_ready(&self, engine: &Arc<dyn TranscodeEngine>) -> Result<()> {
        match tokio::time::timeout(self.init_timeout, engine.ready()).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout("engine readiness", self.init_timeout)),
        }
    }

    /// Virtual input/output filenames for one job.
    ///
    /// Parallel mode prefixes both names with the job id so concurrent jobs
    /// cannot collide; sequential mode needs no prefix because only one job
    /// occupies the shared namespace at a time.
    pub fn virtual_names(&self, job_id: JobId, source_name: &str) -> (String, String) {
        let prefix = match self.mode {
            ProcessingMode::Parallel => format!("{}-", job_id.simple()),
            ProcessingMode::Sequential => String::new(),
        };
        let input = format!("{prefix}{}", sanitize_filename(source_name));
        let output = format!("{prefix}output.mp4");
        (input, output)
    }
}

/// Reduce a declared filename to something safe as a virtual filename:
/// alphanumerics plus `.`/`-`/`_`, no leading flag or dot characters.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches(['-', '.']);
    if trimmed.is_empty() {
        "input".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    struct NullEngine {
        hang_readiness: bool,
    }

    #[async_trait]
    impl TranscodeEngine for NullEngine {
        async fn ready(&self) -> Result<()> {
            if self.hang_readiness {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn probe(&self, _bytes: &[u8]) -> Result<Option<f64>> {
            Ok(None)
        }

        async fn write_input(&self, _name: &str, _bytes: Bytes) -> Result<()> {
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<String> {
            let (_tx, rx) = broadcast::channel(1);
            rx
        }

        async fn execute(&self, _args: &[String]) -> Result<()> {
            Ok(())
        }

        async fn read_output(&self, _name: &str) -> Result<Bytes> {
            Ok(Bytes::new())
        }
    }

    struct CountingFactory {
        created: AtomicUsize,
        hang_readiness: bool,
    }

    impl CountingFactory {
        fn new(hang_readiness: bool) -> Arc<Self> {
            Arc::new(Self {
                created: AtomicUsize::new(0),
                hang_readiness,
            })
        }
    }

    #[async_trait]
    impl EngineFactory for CountingFactory {
        async fn create(&self) -> Result<Arc<dyn TranscodeEngine>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullEngine {
                hang_readiness: self.hang_readiness,
            }))
        }
    }

    #[tokio::test]
    async fn sequential_reuses_one_engine() {
        let factory = CountingFactory::new(false);
        let pool = EnginePool::new(
            ProcessingMode::Sequential,
            factory.clone(),
            Duration::from_secs(1),
        );

        pool.acquire().await.unwrap();
        pool.acquire().await.unwrap();
        pool.acquire().await.unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parallel_creates_engine_per_acquire() {
        let factory = CountingFactory::new(false);
        let pool = EnginePool::new(
            ProcessingMode::Parallel,
            factory.clone(),
            Duration::from_secs(1),
        );

        pool.acquire().await.unwrap();
        pool.acquire().await.unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn readiness_deadline_surfaces_timeout() {
        let factory = CountingFactory::new(true);
        let pool = EnginePool::new(
            ProcessingMode::Sequential,
            factory,
            Duration::from_millis(20),
        );

        let result = pool.acquire().await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn virtual_names_prefix_only_in_parallel() {
        let factory = CountingFactory::new(false);
        let job_id = JobId::new();

        let sequential = EnginePool::new(
            ProcessingMode::Sequential,
            factory.clone(),
            Duration::from_secs(1),
        );
        let (input, output) = sequential.virtual_names(job_id, "a.mov");
        assert_eq!(input, "a.mov");
        assert_eq!(output, "output.mp4");

        let parallel = EnginePool::new(
            ProcessingMode::Parallel,
            factory,
            Duration::from_secs(1),
        );
        let (input, output) = parallel.virtual_names(job_id, "a.mov");
        let prefix = format!("{}-", job_id.simple());
        assert_eq!(input, format!("{prefix}a.mov"));
        assert_eq!(output, format!("{prefix}output.mp4"));
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("a.mov"), "a.mov");
        assert_eq!(sanitize_filename("my clip (1).mov"), "my_clip__1_.mov");
        assert_eq!(sanitize_filename("../escape.mov"), "_escape.mov");
        assert_eq!(sanitize_filename("-looks-like-a-flag"), "looks-like-a-flag");
        assert_eq!(sanitize_filename("///"), "input");
        assert_eq!(sanitize_filename(""), "input");
    }
}
