mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};

use clipmill::{ConversionOrchestrator, JobStatus, MemoryRegistry, SourcePayload};
use clipmill_core::config::Config;
use clipmill_core::events::EventPayload;
use clipmill_core::ProcessingMode;
use clipmill_engine::{EngineFactory, FfmpegEngine, FfmpegEngineFactory, TranscodeEngine};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise use defaults based on the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "clipmill=trace,clipmill_engine=debug,clipmill_core=debug".to_string()
        } else {
            "clipmill=info,clipmill_engine=info".to_string()
        }
    });
    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    let config = Config::load_or_default(cli.config.as_deref());
    for warning in config.validate() {
        tracing::warn!("config: {warning}");
    }

    match cli.command {
        Commands::Convert {
            inputs,
            parallel,
            output_dir,
        } => convert(config, inputs, parallel, output_dir).await,
        Commands::Probe { file } => probe(config, file).await,
        Commands::CheckTools => check_tools(config),
        Commands::Validate { config: path } => validate(path),
    }
}

async fn convert(
    config: Config,
    inputs: Vec<PathBuf>,
    parallel: bool,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let mode = if parallel {
        ProcessingMode::Parallel
    } else {
        ProcessingMode::Sequential
    };

    let factory = Arc::new(FfmpegEngineFactory::new(config.engine.clone()));
    anyhow::ensure!(
        factory.available(),
        "ffmpeg/ffprobe not found; install them or set engine paths in the config"
    );

    if let Some(ref dir) = output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    }

    let mut payloads = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let bytes = std::fs::read(input)
            .with_context(|| format!("failed to read {}", input.display()))?;
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "input".to_string());
        payloads.push(SourcePayload::new(name, bytes));
    }

    let orchestrator =
        ConversionOrchestrator::new(factory, Arc::new(MemoryRegistry::new()), config);

    // Surface live progress in the logs while the batch runs.
    let mut events = orchestrator.subscribe();
    let progress_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let EventPayload::JobProgress {
                job_id,
                percent,
                output_bytes,
            } = event.payload
            {
                tracing::info!("job {job_id}: {percent}% ({output_bytes} bytes)");
            }
        }
    });

    let ids = orchestrator.add_jobs(payloads);
    orchestrator.start_conversion(mode).await;
    progress_task.abort();

    let mut failed = 0usize;
    for (id, input) in ids.iter().zip(&inputs) {
        let Some(job) = orchestrator.job(*id) else {
            continue;
        };
        match job.status {
            JobStatus::Completed => {
                let artifact = job
                    .artifact()
                    .context("completed job is missing its artifact")?;
                let dest = destination_path(input, output_dir.as_deref());
                std::fs::write(&dest, artifact.bytes())
                    .with_context(|| format!("failed to write {}", dest.display()))?;
                tracing::info!("wrote {}", dest.display());
            }
            JobStatus::Failed => {
                failed += 1;
            }
            _ => {}
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} conversion(s) failed");
    }
    Ok(())
}

fn destination_path(input: &std::path::Path, output_dir: Option<&std::path::Path>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let dir = output_dir
        .map(|d| d.to_path_buf())
        .or_else(|| input.parent().map(|p| p.to_path_buf()))
        .unwrap_or_default();
    dir.join(format!("{stem}.mp4"))
}

async fn probe(config: Config, file: PathBuf) -> Result<()> {
    let bytes = std::fs::read(&file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let engine = FfmpegEngine::new(&config.engine)?;
    engine.ready().await?;

    match engine.probe(&bytes).await? {
        Some(duration) => println!("{}: {duration:.3} s", file.display()),
        None => println!("{}: no duration reported", file.display()),
    }
    Ok(())
}

fn check_tools(config: Config) -> Result<()> {
    let factory = FfmpegEngineFactory::new(config.engine);
    if factory.available() {
        println!("ffmpeg and ffprobe found");
        Ok(())
    } else {
        anyhow::bail!("ffmpeg or ffprobe missing; install them or set engine paths in the config")
    }
}

fn validate(path: Option<PathBuf>) -> Result<()> {
    let config = Config::load_or_default(path.as_deref());
    let warnings = config.validate();
    if warnings.is_empty() {
        println!("configuration OK");
    } else {
        for warning in warnings {
            println!("warning: {warning}");
        }
    }
    Ok(())
}
