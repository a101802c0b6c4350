//! agentlens - live metrics for AI coding agent session logs
//!
//! Tails provider session logs (Claude Code, Codex, Gemini CLI), feeds them
//! through the agentlens-core pipeline, and prints the aggregated metrics
//! snapshot.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Snapshots: $XDG_DATA_HOME/agentlens/snapshots/
//! - Logs: $XDG_STATE_HOME/agentlens/agentlens.log
//! - Config: $XDG_CONFIG_HOME/agentlens/config.toml

mod tail;

use agentlens_core::ingest::SessionPipeline;
use agentlens_core::{snapshot, Config, EventAggregator, PipelineConfig, Provider};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tail::FileTailer;

#[derive(Parser)]
#[command(name = "agentlens")]
#[command(about = "Live metrics for AI coding agent session logs")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Tail-follow a session log and update metrics live
    Watch {
        /// Path to the session log file
        file: PathBuf,

        /// Provider (claude_code, codex, gemini); guessed from the path
        /// when omitted
        #[arg(short, long)]
        provider: Option<String>,

        /// Print each classified event as it arrives
        #[arg(short, long)]
        verbose: bool,

        /// Ignore any existing snapshot and start from scratch
        #[arg(long)]
        fresh: bool,

        /// Seconds between snapshot saves
        #[arg(long, default_value = "15")]
        save_interval: u64,
    },

    /// Replay a complete session log from a cold start
    Replay {
        /// Path to the session log file
        file: PathBuf,

        /// Provider (claude_code, codex, gemini); guessed from the path
        /// when omitted
        #[arg(short, long)]
        provider: Option<String>,

        /// Print the full metrics snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// List discovered session logs for installed providers
    Discover,

    /// Print the persisted metrics snapshot for a session log
    Stats {
        /// Path to the session log file the snapshot belongs to
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        agentlens_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("agentlens starting");

    let pipeline_config = PipelineConfig::from_settings(&config.pipeline);

    match args.command {
        Command::Watch {
            file,
            provider,
            verbose,
            fresh,
            save_interval,
        } => {
            let provider = resolve_provider(provider.as_deref(), &file)?;
            run_watch(&file, provider, pipeline_config, verbose, fresh, save_interval).await
        }
        Command::Replay {
            file,
            provider,
            json,
        } => {
            let provider = resolve_provider(provider.as_deref(), &file)?;
            run_replay(&file, provider, pipeline_config, json)
        }
        Command::Discover => run_discover(&config),
        Command::Stats { file } => run_stats(&file, pipeline_config),
    }
}

/// Resolve the provider from the flag, falling back to path detection.
fn resolve_provider(flag: Option<&str>, file: &Path) -> Result<Provider> {
    if let Some(s) = flag {
        return s
            .parse::<Provider>()
            .map_err(|e| anyhow::anyhow!("{}", e));
    }
    match Provider::detect_from_path(file) {
        Some(p) => Ok(p),
        None => bail!(
            "could not detect provider from {}; pass --provider",
            file.display()
        ),
    }
}

// ============================================
// watch
// ============================================

async fn run_watch(
    file: &Path,
    provider: Provider,
    pipeline_config: PipelineConfig,
    verbose: bool,
    fresh: bool,
    save_interval: u64,
) -> Result<()> {
    if !file.exists() {
        bail!("no such file: {}", file.display());
    }

    // Resume from a persisted snapshot when one exists
    let resume = if fresh {
        let _ = snapshot::remove(file);
        None
    } else {
        load_resume_state(file, provider, &pipeline_config)
    };
    let (mut pipeline, mut tailer) = match resume {
        Some((pipeline, offset)) => {
            println!("Resuming from snapshot (offset {})", offset);
            (pipeline, FileTailer::from_offset(file, offset))
        }
        None => (
            SessionPipeline::new(provider, pipeline_config.clone()),
            FileTailer::new(file),
        ),
    };

    println!(
        "Watching {} ({})",
        file.display(),
        provider.display_name()
    );

    // Catch up with whatever is already on disk
    drain(&mut tailer, &mut pipeline, verbose)?;

    // File watcher on its own thread, bridged over a channel; the pipeline
    // itself stays synchronous.
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(16);
    spawn_watcher(file.to_path_buf(), tx)?;

    let mut save_tick = tokio::time::interval(Duration::from_secs(save_interval.max(1)));
    save_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    save_tick.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            changed = rx.recv() => {
                if changed.is_none() {
                    tracing::warn!("watcher channel closed, stopping");
                    break;
                }
                drain(&mut tailer, &mut pipeline, verbose)?;
            }
            _ = save_tick.tick() => {
                // Poll as a fallback for missed notifications
                drain(&mut tailer, &mut pipeline, verbose)?;
                save_state(file, &pipeline, tailer.offset());
                print_status(&pipeline);
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    pipeline.flush();
    save_state(file, &pipeline, tailer.offset());
    print_summary(&pipeline);
    Ok(())
}

/// Restore pipeline + byte offset from a persisted snapshot, when present
/// and well-formed.
fn load_resume_state(
    file: &Path,
    provider: Provider,
    pipeline_config: &PipelineConfig,
) -> Option<(SessionPipeline, u64)> {
    let saved = snapshot::load(file).ok().flatten()?;
    let offset = saved.get("offset").and_then(serde_json::Value::as_u64)?;
    let blob = saved.get("aggregator")?;
    let aggregator = EventAggregator::restore(pipeline_config.clone(), blob);
    Some((
        SessionPipeline::with_aggregator(provider, pipeline_config.clone(), aggregator),
        offset,
    ))
}

fn save_state(file: &Path, pipeline: &SessionPipeline, offset: u64) {
    let wrapped = serde_json::json!({
        "offset": offset,
        "aggregator": pipeline.aggregator().serialize(),
    });
    if let Err(e) = snapshot::save(file, &wrapped) {
        tracing::warn!(error = %e, "failed to save snapshot");
    }
}

/// Read newly appended bytes and push them through the pipeline.
fn drain(tailer: &mut FileTailer, pipeline: &mut SessionPipeline, verbose: bool) -> Result<()> {
    let read = tailer.read_new()?;
    if read.truncated {
        // The session file was rewritten; the parser and normalizer state
        // refer to the old content
        pipeline.reset();
    }
    if read.bytes.is_empty() {
        return Ok(());
    }

    if verbose {
        pipeline.feed_with_sink(&read.bytes, |classified| {
            if classified.hard_noise {
                return;
            }
            let ts = classified.event.timestamp.format("%H:%M:%S");
            println!(
                "{} [{}] {}",
                ts,
                classified.class.as_str(),
                classified.event.message.text().lines().next().unwrap_or("")
            );
        });
    } else {
        pipeline.feed(&read.bytes);
    }
    Ok(())
}

fn spawn_watcher(file: PathBuf, tx: tokio::sync::mpsc::Sender<()>) -> Result<()> {
    use notify::RecursiveMode;
    use notify_debouncer_mini::{new_debouncer, DebouncedEvent};

    let watch_dir = file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    std::thread::spawn(move || {
        let target = file.clone();
        let mut debouncer = match new_debouncer(
            Duration::from_millis(250),
            move |res: Result<Vec<DebouncedEvent>, notify::Error>| match res {
                Ok(events) => {
                    if events.iter().any(|e| e.path == target) {
                        let _ = tx.blocking_send(());
                    }
                }
                Err(e) => {
                    tracing::warn!(error = ?e, "file watcher error");
                }
            },
        ) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = ?e, "failed to create file watcher");
                return;
            }
        };

        if let Err(e) = debouncer
            .watcher()
            .watch(&watch_dir, RecursiveMode::NonRecursive)
        {
            tracing::error!(error = ?e, "failed to watch directory");
            return;
        }

        // Keep thread alive
        loop {
            std::thread::sleep(Duration::from_secs(60));
        }
    });

    Ok(())
}

fn print_status(pipeline: &SessionPipeline) {
    let m = pipeline.metrics();
    println!(
        "{} events | {} tokens | {:.0} tok/min | {} tool calls | {} in flight",
        m.counts.total_events,
        m.totals.total(),
        pipeline.aggregator().tokens_per_minute(),
        m.counts.tool_uses,
        pipeline.in_flight().len(),
    );
}

// ============================================
// replay
// ============================================

fn run_replay(
    file: &Path,
    provider: Provider,
    pipeline_config: PipelineConfig,
    json: bool,
) -> Result<()> {
    let mut pipeline = SessionPipeline::new(provider, pipeline_config);
    let report = pipeline
        .replay_file(file)
        .with_context(|| format!("failed to replay {}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(pipeline.metrics())?);
        return Ok(());
    }

    println!(
        "Replayed {} ({}): {} lines, {} skipped, {} events",
        file.display(),
        provider.display_name(),
        report.lines_parsed,
        report.lines_skipped,
        report.events_emitted
    );
    print_summary(&pipeline);
    Ok(())
}

fn print_summary(pipeline: &SessionPipeline) {
    let m = pipeline.metrics();

    println!("\nSession summary");
    if let Some(duration) = m.session_duration() {
        println!("  duration: {}m {}s", duration.num_minutes(), duration.num_seconds() % 60);
    }
    println!(
        "  messages: {} user / {} assistant",
        m.counts.user_messages, m.counts.assistant_messages
    );
    println!(
        "  tokens:   {} in / {} out / {} cache ({:.4} USD reported)",
        m.totals.input_tokens,
        m.totals.output_tokens,
        m.totals.cache_write_tokens + m.totals.cache_read_tokens,
        m.totals.cost_usd
    );

    for (model, usage) in &m.per_model {
        println!("  model:    {} ({} calls, {} tokens)", model, usage.calls, usage.tokens());
    }

    let mut tools: Vec<_> = m.tool_stats.iter().collect();
    tools.sort_by(|a, b| b.1.calls().cmp(&a.1.calls()));
    for (name, stats) in tools.iter().take(5) {
        println!(
            "  tool:     {} ({} ok, {} failed, {} pending, {}ms total)",
            name, stats.success, stats.failure, stats.pending, stats.total_duration_ms
        );
    }

    if !m.compactions.is_empty() {
        println!("  compactions: {}", m.compactions.len());
    }
    let latency = m.latency_summary();
    if latency.count > 0 {
        println!(
            "  latency:  {:.0}ms mean / {}ms p95 over {} prompts",
            latency.mean_ms, latency.p95_ms, latency.count
        );
    }
}

// ============================================
// discover
// ============================================

fn run_discover(config: &Config) -> Result<()> {
    let files = agentlens_core::discover::discover_all(&config.providers);

    if files.is_empty() {
        println!("No session logs found");
        return Ok(());
    }

    println!("Discovered {} session log(s):", files.len());
    for f in files {
        println!(
            "  {:12} {:>9}  {}  {}",
            f.provider.display_name(),
            human_size(f.size_bytes),
            f.modified_at.format("%Y-%m-%d %H:%M"),
            f.path.display()
        );
    }
    Ok(())
}

fn human_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================
// stats
// ============================================

fn run_stats(file: &Path, pipeline_config: PipelineConfig) -> Result<()> {
    let Some(saved) = snapshot::load(file)? else {
        bail!("no snapshot found for {}", file.display());
    };
    let blob = saved
        .get("aggregator")
        .cloned()
        .unwrap_or(saved);
    let aggregator = EventAggregator::restore(pipeline_config, &blob);
    println!("{}", serde_json::to_string_pretty(aggregator.metrics())?);
    Ok(())
}
