use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use open_scribe::cli::{Cli, Commands, JobsArgs, TranscribeArgs};
use open_scribe::config::Config;
use open_scribe::ledger::JobLedger;
use open_scribe::output::{self, ConsoleProgress, StdinConfirmer};
use open_scribe::pipeline::{Pipeline, ProgressSink, SubmitOutcome, TracingProgress};
use open_scribe::{utils, ScribeError};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "open_scribe=debug"
    } else {
        "open_scribe=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Transcribe(args) => transcribe(config, &args, cli.quiet).await?,
        Commands::Jobs(args) => list_jobs(&config, &args).await?,
        Commands::Show { id } => {
            let ledger = open_ledger(&config).await?;
            let job = ledger.require(id).await?;
            output::print_job(&job);
        }
        Commands::Stats => {
            let ledger = open_ledger(&config).await?;
            output::print_stats(&ledger.stats().await?);
        }
        Commands::Cancel { id } => {
            config.paths.create_dirs()?;
            let pipeline = Pipeline::new(config, Arc::new(TracingProgress), Arc::new(StdinConfirmer)).await?;
            match pipeline.cancel(id).await {
                Ok(job) => println!("Job #{} cancelled", job.id),
                Err(ScribeError::AlreadyFinished { status, .. }) => {
                    anyhow::bail!("Job #{} is already {} and cannot be cancelled", id, status)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Prune { days } => {
            let ledger = open_ledger(&config).await?;
            let removed = ledger.prune(chrono::Duration::days(i64::from(days))).await?;
            println!("Removed {} finished job(s) older than {} day(s)", removed, days);
        }
        Commands::Engines => output::print_engines(&config.engines.default),
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                let path = Config::config_path(cli.config.as_deref())?;
                println!("Configuration file: {}\n", path.display());
                print!(
                    "{}",
                    serde_yaml::to_string(&config).context("Failed to serialize config")?
                );
            }
        }
    }

    Ok(())
}

async fn open_ledger(config: &Config) -> Result<JobLedger> {
    let path = config.paths.database_path();
    let ledger = JobLedger::open(&path, chrono::Duration::minutes(config.jobs.stale_after_minutes))
        .await
        .with_context(|| format!("Failed to open job database {}", path.display()))?;
    Ok(ledger)
}

async fn list_jobs(config: &Config, args: &JobsArgs) -> Result<()> {
    let ledger = open_ledger(config).await?;
    let page = ledger.search(&args.query()).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
    } else {
        output::print_job_page(&page);
    }
    Ok(())
}

async fn transcribe(config: Config, args: &TranscribeArgs, quiet: bool) -> Result<()> {
    // Check for required external dependencies (non-fatal, tools may live elsewhere)
    let missing = utils::check_dependencies(&config.paths.yt_dlp, &config.audio.ffmpeg, &config.audio.ffprobe).await;
    if !missing.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing {
            eprintln!("   • {}", dep);
        }
    }

    config.paths.create_dirs()?;

    let progress: Arc<dyn ProgressSink> = if quiet {
        Arc::new(TracingProgress)
    } else {
        Arc::new(ConsoleProgress::new())
    };
    let pipeline = Pipeline::new(config, progress, Arc::new(StdinConfirmer))
        .await
        .context("Failed to start the pipeline")?;

    tracing::info!(url = %args.url, "Submitting");
    let outcomes = pipeline.submit(&args.url, &args.submit_options()).await?;

    for outcome in &outcomes {
        output::print_outcome(outcome);
    }

    let unsuccessful = outcomes
        .iter()
        .filter(|o| !o.is_success() && !matches!(o, SubmitOutcome::Duplicate(_)))
        .count();
    if unsuccessful > 0 {
        anyhow::bail!("{} of {} job(s) did not complete", unsuccessful, outcomes.len());
    }
    Ok(())
}
