use crate::{
    client::ApiClient,
    config::Config,
    orchestrate::Orchestrator,
    queue,
    repair,
    supervise::ProcScanner,
    util::ensure_dir,
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "deckshot")]
#[command(about = "Office document preview generator (supervised conversion, fallback, repair)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./deckshot.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Probe the external tools every conversion depends on.
    Doctor {},
    /// Convert one remote document by identifier.
    Convert {
        #[arg(long)]
        doc_id: u64,
    },
    /// Drain the job source through the worker pool.
    Run {
        /// Maximum number of job identifiers to enumerate.
        #[arg(long, default_value_t = 100)]
        limit: usize,
        /// Worker count override; 0 uses the configured value.
        #[arg(long, default_value_t = 0)]
        workers: usize,
        /// First job identifier to enumerate from.
        #[arg(long)]
        start: Option<u64>,
    },
    /// Convert a local file, writing preview images to a directory.
    Local {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "previews")]
        out_dir: PathBuf,
    },
    /// Repair a local zip-based document in place (writes a -repaired copy).
    Repair {
        #[arg(long)]
        input: PathBuf,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref())?;
    let cfg = Config::load(&cfg_path)?;
    let _guard = init_logging(&args, &cfg)?;

    match &args.cmd {
        Command::Doctor {} => doctor(&cfg),
        Command::Convert { doc_id } => convert(&cfg, *doc_id),
        Command::Run {
            limit,
            workers,
            start,
        } => run(&cfg, *limit, *workers, *start),
        Command::Local { input, out_dir } => local(&cfg, input, out_dir),
        Command::Repair { input } => repair_local(&cfg, input),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = user {
        return Ok(p.to_path_buf());
    }
    let default = PathBuf::from("deckshot.toml");
    if default.exists() {
        Ok(default)
    } else {
        Ok(PathBuf::from("deckshot.example.toml"))
    }
}

fn init_logging(args: &Args, cfg: &Config) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = resolve_log_path(cfg) {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(&path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.paths.work_dir).join("deckshot.log"))
}

fn doctor(cfg: &Config) -> Result<()> {
    let diag = serde_json::json!({
        "soffice": probe_tool(&cfg.backends.soffice_exe, "--version"),
        "unoconv": probe_tool(&cfg.backends.unoconv_exe, "--version"),
        "pdftoppm": probe_tool(&cfg.raster.pdftoppm_exe, "-v"),
        "pdfinfo": probe_tool(&cfg.raster.pdfinfo_exe, "-v"),
        "xvfb_run": crate::backend::xvfb_available(),
    });
    println!("{}", serde_json::to_string_pretty(&diag)?);
    Ok(())
}

fn probe_tool(exe: &str, arg: &str) -> Option<String> {
    let output = std::process::Command::new(exe).arg(arg).output().ok()?;
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    text.lines().next().map(|l| l.trim().to_string())
}

fn convert(cfg: &Config, doc_id: u64) -> Result<()> {
    let client = ApiClient::new(cfg)?;
    let finder = ProcScanner;
    let orchestrator = Orchestrator::new(cfg, &finder);

    let report = orchestrator.process_remote(&client, doc_id)?;
    if cfg.global.print_summary || cfg.debug.dump_reports {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    if report.status.is_failure() {
        // Nonzero exit feeds the external retry wrapper.
        return Err(anyhow!("doc_id={doc_id} failed"));
    }
    Ok(())
}

fn run(cfg: &Config, limit: usize, workers_override: usize, start: Option<u64>) -> Result<()> {
    let client = ApiClient::new(cfg)?;
    let finder = ProcScanner;
    let orchestrator = Orchestrator::new(cfg, &finder);

    let workers = if workers_override > 0 {
        workers_override
    } else {
        queue::default_workers(cfg.queue.workers)
    };
    let capacity = workers * cfg.queue.capacity_multiplier.max(1);
    let pace = Duration::from_millis(cfg.queue.pace_ms);

    info!("starting pool: {workers} worker(s), queue capacity {capacity}");

    let feed = client.feed(start, limit, pace);
    let stats = queue::run_pool(feed, workers, capacity, |doc_id| {
        match orchestrator.process_remote(&client, doc_id) {
            Ok(report) => !report.status.is_failure(),
            Err(err) => {
                error!("doc_id={doc_id}: {err:#}");
                false
            }
        }
    });

    info!(
        "pool drained: {} processed, {} failed",
        stats.processed, stats.failed
    );
    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "processed": stats.processed,
                "failed": stats.failed,
            }))?
        );
    }
    Ok(())
}

fn local(cfg: &Config, input: &Path, out_dir: &Path) -> Result<()> {
    let finder = ProcScanner;
    let orchestrator = Orchestrator::new(cfg, &finder);
    let report = orchestrator.process_local(input, out_dir)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.status.is_failure() {
        return Err(anyhow!("conversion failed: {}", input.display()));
    }
    Ok(())
}

fn repair_local(cfg: &Config, input: &Path) -> Result<()> {
    anyhow::ensure!(input.exists(), "input does not exist: {}", input.display());
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let format = crate::job::DeclaredFormat::from_file_type(ext);

    let finder = ProcScanner;
    let work_dir = input.parent().unwrap_or_else(|| Path::new("."));
    let marker = format!("deckshot-{}-repair", std::process::id());
    let timeout = Duration::from_secs(cfg.limits.timeout_base_seconds);

    match repair::repair(cfg, &finder, input, format, work_dir, &marker, timeout)? {
        Some(outcome) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "repaired": outcome.repaired_path,
                    "dropped_members": outcome.dropped_members,
                }))?
            );
            Ok(())
        }
        None => Err(anyhow!("unrepairable input: {}", input.display())),
    }
}
