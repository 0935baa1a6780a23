use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use soc_relay::admin::{self, AdminCommand};
use soc_relay::channels::{MailSource, OpenAiGenerator, SpoolMailSource, TelegramChannel};
use soc_relay::config::Settings;
use soc_relay::db::Database;
use soc_relay::dedup::DedupEngine;
use soc_relay::dispatch::{LlmRenderer, Renderer, Router, RuleRenderer};
use soc_relay::error::ConfigError;
use soc_relay::ingest::{FetchMode, Pipeline, PipelineConfig};
use soc_relay::utils::Shutdown;

const EXIT_MISCONFIGURED: u8 = 2;
const EXIT_CONFIRMATION_REQUIRED: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "soc-relay")]
#[command(about = "Relay security alert mails to Telegram with dedup and risk routing")]
#[command(version)]
struct Args {
    /// Database path (use :memory: for in-memory)
    #[arg(short, long)]
    database: Option<String>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the mail source until Ctrl-C or SIGTERM
    Run,

    /// Run a single ingestion cycle
    RunOnce {
        #[arg(long, value_enum, default_value_t = FetchMode::Unseen)]
        mode: FetchMode,

        /// Maximum messages to fetch (defaults to mail.fetch_limit)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete the database file
    ResetDb {
        #[arg(long)]
        yes: bool,
    },

    /// Operator tooling
    #[command(subcommand)]
    Admin(AdminCommand),
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_pipeline(settings: &Settings, db: Arc<Database>, shutdown: Shutdown) -> Result<Pipeline> {
    let source: Arc<dyn MailSource> = Arc::new(SpoolMailSource::new(&settings.mail.spool_dir));

    let channel = TelegramChannel::new(
        &settings.telegram.api_base,
        &settings.telegram.bot_token,
        Duration::from_secs(settings.telegram.timeout_secs),
    )?;

    let renderer: Arc<dyn Renderer> = if settings.llm.enabled {
        let generator = OpenAiGenerator::new(
            &settings.llm.base_url,
            &settings.llm.api_key,
            &settings.llm.model,
            Duration::from_secs(settings.llm.timeout_secs),
        )?;
        tracing::info!("Text generation enabled (model {})", settings.llm.model);
        Arc::new(LlmRenderer::new(
            Arc::new(generator),
            db.clone(),
            settings.retry.enrichment,
            shutdown.clone(),
        ))
    } else {
        Arc::new(RuleRenderer)
    };

    let router = Router::new(
        db.clone(),
        Arc::new(channel),
        settings.telegram.admin_addresses.clone(),
        settings.retry.delivery,
        shutdown.clone(),
    );
    let dedup = DedupEngine::new(
        db.clone(),
        settings.dedup.window_secs,
        settings.dedup.repeat_threshold,
    );
    let config = PipelineConfig {
        sender_filter: settings.mail.sender_filter.clone(),
        fetch_limit: settings.mail.fetch_limit,
        poll_interval: settings.poll_interval(),
        mark_processed: settings.mail.mark_processed,
        source_retry: settings.retry.source,
    };

    Ok(Pipeline::new(db, source, dedup, renderer, router, config, shutdown))
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}

async fn run_service(mut settings: Settings) -> Result<()> {
    settings.validate()?;
    let db = Arc::new(Database::open(&settings.database_path)?);

    let (trigger, shutdown) = Shutdown::new();
    let pipeline = Arc::new(build_pipeline(&settings, db, shutdown)?);

    let mut worker = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.run().await }
    });
    let mut signals = tokio::spawn(wait_for_signal());

    // Whichever task ends first stops the other
    let worker_done = tokio::select! {
        res = &mut worker => {
            res?;
            true
        }
        res = &mut signals => {
            match res {
                Ok(Ok(())) => tracing::info!("Shutdown signal received, finishing current cycle"),
                Ok(Err(e)) => tracing::warn!("Signal listener failed: {}", e),
                Err(e) => tracing::warn!("Signal listener task failed: {}", e),
            }
            false
        }
    };

    trigger.trigger();
    signals.abort();
    if !worker_done {
        worker.await?;
    }
    tracing::info!("Stopped");
    Ok(())
}

async fn run_once(mut settings: Settings, mode: FetchMode, limit: Option<usize>) -> Result<()> {
    settings.validate()?;
    let db = Arc::new(Database::open(&settings.database_path)?);
    let limit = limit.unwrap_or(settings.mail.fetch_limit).max(1);

    let pipeline = build_pipeline(&settings, db, Shutdown::never())?;
    let report = pipeline.run_cycle(mode, limit).await?;

    println!(
        "fetched={} acknowledged={}",
        report.fetched, report.acknowledged
    );
    for (uid, outcome) in &report.outcomes {
        println!("  {}: {:?}", uid, outcome);
    }
    Ok(())
}

/// Database file plus its WAL side files, whichever exist
fn database_files(path: &str) -> Vec<PathBuf> {
    if path == ":memory:" {
        return Vec::new();
    }
    [String::new(), "-wal".to_string(), "-shm".to_string()]
        .iter()
        .map(|suffix| PathBuf::from(format!("{}{}", path, suffix)))
        .filter(|p| p.exists())
        .collect()
}

fn reset_db(path: &str, confirmed: bool) -> Result<ExitCode> {
    let files = database_files(path);
    if files.is_empty() {
        println!("Nothing to delete at {}", path);
        return Ok(ExitCode::SUCCESS);
    }

    if !confirmed {
        println!("This would delete:");
        for f in &files {
            println!("  {}", f.display());
        }
        println!("Re-run with --yes to confirm.");
        return Ok(ExitCode::from(EXIT_CONFIRMATION_REQUIRED));
    }

    for f in &files {
        std::fs::remove_file(f)?;
        tracing::info!("Deleted {}", f.display());
    }
    println!("Database reset");
    Ok(ExitCode::SUCCESS)
}

fn run_admin(settings: &Settings, cmd: AdminCommand) -> Result<()> {
    let db = Database::open(&settings.database_path)?;
    let mut out = std::io::stdout().lock();
    admin::execute(&db, cmd, Utc::now(), &mut out)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut settings = match Settings::load(args.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ExitCode::from(EXIT_MISCONFIGURED);
        }
    };
    if let Some(path) = args.database {
        settings.database_path = path;
    }

    init_tracing(&settings.log_level);

    let result = match args.command {
        Command::Run => run_service(settings).await.map(|_| ExitCode::SUCCESS),
        Command::RunOnce { mode, limit } => {
            run_once(settings, mode, limit).await.map(|_| ExitCode::SUCCESS)
        }
        Command::ResetDb { yes } => reset_db(&settings.database_path, yes),
        Command::Admin(cmd) => run_admin(&settings, cmd).map(|_| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            if let Some(cfg) = e.downcast_ref::<ConfigError>() {
                eprintln!("Configuration error: {}", cfg);
                return ExitCode::from(EXIT_MISCONFIGURED);
            }
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
