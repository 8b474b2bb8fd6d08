use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser as _;
use tokio::sync::watch;

use novelpress::app::model::{JobId, JobStatus};
use novelpress::app::worker::Worker;
use novelpress::app::{Engine, build_engine};
use novelpress::cli::{Cli, Command, IngestArgs, JobsArgs, NovelsArgs, StatusArgs};
use novelpress::config::AppConfig;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    novelpress::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let config = AppConfig::from_env().context("load config")?;
    let engine = build_engine(config).context("build engine")?;

    match cli.command {
        Command::Ingest(args) => ingest(&engine, args).await.context("ingest")?,
        Command::Status(args) => status(&engine, args).await.context("status")?,
        Command::Jobs(args) => list_jobs(&engine, args).await.context("jobs")?,
        Command::Novels(args) => list_novels(&engine, args).await.context("novels")?,
        Command::Genres => list_genres(&engine).await.context("genres")?,
        Command::Requeue => {
            let requeued = engine
                .coordinator
                .requeue_pending()
                .await
                .context("requeue")?;
            println!("requeued {requeued} jobs");
        }
        Command::Worker => run_worker(&engine).await.context("worker")?,
    }

    Ok(())
}

async fn ingest(engine: &Engine, args: IngestArgs) -> anyhow::Result<()> {
    let job = engine.coordinator.create_job(&args.url).await?;
    println!("created job {} for {}", job.id, job.source_url);

    if !args.wait {
        return Ok(());
    }

    // Slack past the job timeout so a timed-out job is still reported.
    let deadline = tokio::time::Instant::now() + engine.config.job_timeout + Duration::from_secs(60);
    loop {
        let Some(current) = engine.coordinator.job_status(&job.id).await? else {
            anyhow::bail!("job disappeared: {}", job.id);
        };
        if current.status.is_terminal() {
            match current.status {
                JobStatus::Done => println!("job {} done", current.id),
                _ => println!(
                    "job {} failed: {}",
                    current.id,
                    current.error_message.as_deref().unwrap_or("unknown error")
                ),
            }
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("gave up waiting for job {} (status: {})", job.id, current.status);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

async fn status(engine: &Engine, args: StatusArgs) -> anyhow::Result<()> {
    let job_id = JobId::from(args.job_id.as_str());
    let Some(job) = engine.coordinator.job_status(&job_id).await? else {
        anyhow::bail!("job not found: {}", args.job_id);
    };

    println!("id:      {}", job.id);
    println!("url:     {}", job.source_url);
    println!("status:  {}", job.status);
    println!("created: {}", job.created_at.to_rfc3339());
    println!("updated: {}", job.updated_at.to_rfc3339());
    if let Some(message) = &job.error_message {
        println!("error:   {message}");
    }
    Ok(())
}

async fn list_jobs(engine: &Engine, args: JobsArgs) -> anyhow::Result<()> {
    let jobs = engine.coordinator.list_jobs(args.limit).await?;

    println!("{:<32} {:<10} {:<50} {:<25}", "ID", "STATUS", "URL", "CREATED");
    for job in &jobs {
        println!(
            "{:<32} {:<10} {:<50} {:<25}",
            job.id,
            job.status.as_str(),
            truncate(&job.source_url, 50),
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
        if let Some(message) = &job.error_message {
            println!("    error: {}", truncate(message, 100));
        }
    }
    println!("total: {} jobs", jobs.len());
    Ok(())
}

async fn list_novels(engine: &Engine, args: NovelsArgs) -> anyhow::Result<()> {
    let mut novels = engine.storage.novels().await?;
    novels.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    novels.truncate(args.limit);

    println!("{:<6} {:<40} {:<12} {:<10} {}", "ID", "TITLE", "STATUS", "WORDS", "SLUG");
    for novel in &novels {
        println!(
            "{:<6} {:<40} {:<12} {:<10} {}",
            novel.id,
            truncate(&novel.title, 40),
            truncate(&novel.status, 12),
            novel.word_count,
            novel.slug,
        );
    }
    println!("total: {} novels", novels.len());
    Ok(())
}

async fn list_genres(engine: &Engine) -> anyhow::Result<()> {
    let mut genres = engine.storage.genres().await?;
    genres.sort_by(|a, b| a.name.cmp(&b.name));

    println!("{:<6} {:<30} {}", "ID", "NAME", "SLUG");
    for genre in &genres {
        println!("{:<6} {:<30} {}", genre.id, genre.name, genre.slug);
    }
    println!("total: {} genres", genres.len());
    Ok(())
}

async fn run_worker(engine: &Engine) -> anyhow::Result<()> {
    let worker = Worker::new(
        engine.queue.clone(),
        engine.job_store.clone(),
        engine.executor.clone(),
        engine.config.job_timeout,
        engine.config.dequeue_wait,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await;
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}
