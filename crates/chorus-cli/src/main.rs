use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use chorus_core::app::{Watchdog, WatchdogConfig, WorkerBuilder, WorkerGroup};
use chorus_core::audio::FfmpegEncoder;
use chorus_core::config::{LoggingSettings, Settings};
use chorus_core::domain::{ChapterId, ChapterTask, JobId, NewTask, TaskId, TaskType, TextSource};
use chorus_core::impls::{ObjectArtifactStore, PgCompletionSink, PgTaskStore, create_pool};
use chorus_core::ports::{TaskStore, TokioSleeper, TracingEventSink};
use chorus_core::tts::HttpSynthesisBackend;

#[derive(Debug, Parser)]
#[command(name = "chorus", version, about = "Chapter-to-audio task worker")]
struct Cli {
    /// TOML config file; environment variables override it.
    #[arg(long, short, global = true, env = "CHORUS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Claim and render chapter tasks until interrupted.
    Worker {
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Reclaim tasks whose lease expired.
    Watchdog,
    /// Worker group and watchdog in one process.
    Run {
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Create the task and artifact tables.
    Migrate,
    /// Queue one chapter.
    Enqueue {
        /// Inline chapter text.
        #[arg(long, conflicts_with_all = ["text_file", "artifact"])]
        text: Option<String>,
        /// Read the chapter text from a local file.
        #[arg(long, conflicts_with = "artifact")]
        text_file: Option<PathBuf>,
        /// Path of a text artifact in the artifact store.
        #[arg(long)]
        artifact: Option<String>,
        #[arg(long)]
        voice: String,
        /// Existing job id; a new one is generated otherwise.
        #[arg(long)]
        job_id: Option<JobId>,
        /// Chapter position; also the task's sequence number.
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u32).range(..=i64::from(i32::MAX)))]
        index: u32,
        #[arg(long)]
        title: Option<String>,
        /// Backend-specific synthesis parameters as JSON.
        #[arg(long)]
        params: Option<String>,
    },
    /// Queue depth, or one task as JSON.
    Status {
        #[arg(long)]
        task_id: Option<TaskId>,
    },
}

fn init_tracing(config: &LoggingSettings) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.filter));

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn task_store(settings: &Settings) -> Result<Arc<PgTaskStore>> {
    let pool = create_pool(settings.database_url()?, &settings.pool_config())
        .await
        .context("connecting to the task database")?;
    Ok(Arc::new(PgTaskStore::new(pool)))
}

fn artifact_store(settings: &Settings) -> Result<Arc<ObjectArtifactStore>> {
    let mut store = ObjectArtifactStore::local(&settings.storage.root)
        .with_context(|| format!("opening artifact root {}", settings.storage.root.display()))?;
    if let Some(base) = &settings.storage.public_base_url {
        store = store.with_public_base_url(base.clone());
    }
    Ok(Arc::new(store))
}

fn worker_builder(settings: &Settings, store: &Arc<PgTaskStore>) -> Result<WorkerBuilder> {
    settings.validate_for_worker()?;
    let synthesis = &settings.synthesis;
    let backend = HttpSynthesisBackend::new(
        synthesis.endpoint.clone().unwrap_or_default(),
        synthesis.api_key.clone().unwrap_or_default(),
        Duration::from_secs(synthesis.request_timeout_secs),
    )?;
    let encoder = FfmpegEncoder::new(
        settings.audio.ffmpeg_path.clone(),
        Duration::from_secs(settings.audio.encode_timeout_secs),
    );

    Ok(WorkerBuilder::new()
        .store(store.clone())
        .artifacts(artifact_store(settings)?)
        .completion_sink(Arc::new(PgCompletionSink::new(store.pool().clone())))
        .synthesis_backend(Arc::new(backend))
        .encoder(Arc::new(encoder))
        .sleeper(Arc::new(TokioSleeper))
        .events(Arc::new(TracingEventSink))
        .max_chunk_chars(settings.worker.max_chunk_chars)
        .poll_interval(Duration::from_secs(settings.worker.poll_interval_secs))
        .error_cooldown(Duration::from_secs(settings.worker.error_cooldown_secs))
        .poll_policy(settings.poll_policy())
        .retry_policy(settings.retry_policy())
        .formats(settings.audio.primary_format, settings.audio.fallback_format))
}

fn spawn_workers(
    settings: &Settings,
    store: &Arc<PgTaskStore>,
    concurrency: Option<usize>,
    cancel: &CancellationToken,
) -> Result<WorkerGroup> {
    let builder = worker_builder(settings, store)?;
    let n = concurrency.unwrap_or(settings.worker.concurrency);
    if n == 0 {
        bail!("concurrency must be at least 1");
    }

    let mut workers = Vec::with_capacity(n);
    for i in 0..n {
        let id = format!("{}-{}-{}", settings.worker.id_prefix, std::process::id(), i);
        workers.push(Arc::new(builder.clone().worker_id(id).build()?));
    }
    tracing::info!(workers = n, "Starting worker group");
    Ok(WorkerGroup::spawn(workers, cancel))
}

fn watchdog(settings: &Settings, store: &Arc<PgTaskStore>) -> Watchdog {
    Watchdog::new(
        WatchdogConfig {
            interval: Duration::from_secs(settings.watchdog.interval_secs),
            lease_timeout: Duration::from_secs(settings.watchdog.lease_timeout_secs),
        },
        store.clone(),
        Arc::new(TokioSleeper),
        Arc::new(TracingEventSink),
    )
}

#[allow(clippy::too_many_arguments)]
async fn enqueue(
    settings: &Settings,
    text: Option<String>,
    text_file: Option<PathBuf>,
    artifact: Option<String>,
    voice: String,
    job_id: Option<JobId>,
    index: u32,
    title: Option<String>,
    params: Option<String>,
) -> Result<()> {
    let source = match (text, text_file, artifact) {
        (Some(text), _, _) => TextSource::Inline { text },
        (_, Some(path), _) => TextSource::Inline {
            text: std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?,
        },
        (_, _, Some(path)) => TextSource::Artifact { path },
        _ => bail!("one of --text, --text-file or --artifact is required"),
    };
    let params = match params {
        Some(raw) => serde_json::from_str(&raw).context("--params is not valid JSON")?,
        None => serde_json::Value::Null,
    };

    let chapter = ChapterTask {
        chapter_id: ChapterId::generate(),
        job_id: job_id.unwrap_or_else(JobId::generate),
        index,
        title,
        source,
        voice_ref: voice,
        params,
        output_path: None,
    };

    let store = task_store(settings).await?;
    let task_id = store
        .enqueue(NewTask {
            job_id: chapter.job_id,
            task_type: TaskType::audio_chapter(),
            sequence: i32::try_from(index).context("--index is too large")?,
            input: serde_json::to_value(&chapter)?,
        })
        .await?;

    println!(
        "{}",
        serde_json::json!({
            "task_id": task_id.to_string(),
            "job_id": chapter.job_id.to_string(),
            "chapter_id": chapter.chapter_id.to_string(),
        })
    );
    Ok(())
}

async fn status(settings: &Settings, task_id: Option<TaskId>) -> Result<()> {
    let store = task_store(settings).await?;
    let value = match task_id {
        Some(id) => {
            let task = store
                .get(id)
                .await?
                .with_context(|| format!("task {id} not found"))?;
            serde_json::to_value(task)?
        }
        None => serde_json::to_value(store.counts_by_status().await?)?,
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    init_tracing(&settings.logging);

    let cancel = CancellationToken::new();

    match cli.command {
        Command::Migrate => {
            task_store(&settings).await?.migrate().await?;
        }
        Command::Enqueue {
            text,
            text_file,
            artifact,
            voice,
            job_id,
            index,
            title,
            params,
        } => {
            enqueue(
                &settings, text, text_file, artifact, voice, job_id, index, title, params,
            )
            .await?;
        }
        Command::Status { task_id } => status(&settings, task_id).await?,
        Command::Worker { concurrency } => {
            let store = task_store(&settings).await?;
            let group = spawn_workers(&settings, &store, concurrency, &cancel)?;

            wait_for_shutdown_signal().await;
            tracing::info!("Shutdown requested, finishing in-flight tasks");
            group.shutdown_and_join().await;
        }
        Command::Watchdog => {
            let store = task_store(&settings).await?;
            let handle = tokio::spawn(watchdog(&settings, &store).run(cancel.clone()));

            wait_for_shutdown_signal().await;
            cancel.cancel();
            handle.await?;
        }
        Command::Run { concurrency } => {
            let store = task_store(&settings).await?;
            let group = spawn_workers(&settings, &store, concurrency, &cancel)?;
            let dog = tokio::spawn(watchdog(&settings, &store).run(cancel.clone()));

            wait_for_shutdown_signal().await;
            tracing::info!("Shutdown requested, finishing in-flight tasks");
            cancel.cancel();
            group.join().await;
            dog.await?;
        }
    }

    Ok(())
}
