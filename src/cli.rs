use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create and enqueue an ingestion job for a novel URL.
    Ingest(IngestArgs),
    /// Show one ingestion job.
    Status(StatusArgs),
    /// List ingestion jobs, newest first.
    Jobs(JobsArgs),
    /// List stored novels.
    Novels(NovelsArgs),
    /// List stored genres.
    Genres,
    /// Re-enqueue every job still in queued status.
    Requeue,
    /// Run a worker loop until interrupted.
    Worker,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Novel main page URL (must belong to a supported source).
    pub url: String,

    /// Poll until the job reaches a terminal status.
    #[arg(long)]
    pub wait: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Job id as printed by `ingest`.
    pub job_id: String,
}

#[derive(Debug, Args)]
pub struct JobsArgs {
    /// Maximum number of jobs to show.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct NovelsArgs {
    /// Maximum number of novels to show.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}
