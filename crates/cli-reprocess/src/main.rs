use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use clap::{Parser, ValueEnum};
use humansize::{format_size, DECIMAL};
use log::{error, info, warn};
use reprocess::{
    log_channel, scan, AlwaysAnswer, AppConfig, Catalog, CleanupRules, Codec, ConfirmPolicy, FfmpegEngine,
    FileJob, HwAccel, JobStatus, OptionsUpdate, Orchestrator, Preset, RunSummary,
};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Batch video reprocessor driving ffmpeg one file at a time
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input files or directories (directories are searched for media files)
    #[arg(required_unless_present = "list_catalog")]
    inputs: Vec<PathBuf>,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Upper quantizer bound (lower is better quality)
    #[arg(short, long)]
    quality: Option<u8>,

    #[arg(long)]
    codec: Option<Codec>,

    #[arg(long)]
    preset: Option<Preset>,

    #[arg(long)]
    hwaccel: Option<HwAccel>,

    /// Filter short name from the catalog (repeatable)
    #[arg(short, long = "filter")]
    filters: Vec<String>,

    /// Modifier as NAME=VALUE, e.g. ss=10 (repeatable)
    #[arg(short, long = "modifier", value_parser = parse_modifier)]
    modifiers: Vec<(String, String)>,

    /// Two-pass vidstab stabilization
    #[arg(long)]
    stabilize: bool,

    /// Tag originals as processed after a successful encode
    #[arg(long)]
    tag_original: bool,

    /// What to do with files tagged as processed by an earlier run
    #[arg(long, value_enum, default_value_t = TaggedChoice::Ask)]
    tagged: TaggedChoice,

    /// After the run, delete originals whose output came out smaller
    #[arg(long)]
    delete_smaller_originals: bool,

    /// After the run, delete outputs that came out larger than the original
    #[arg(long)]
    delete_larger_outputs: bool,

    /// Do not ask before deleting files
    #[arg(short, long)]
    yes: bool,

    /// Write each file's log to this directory
    #[arg(long)]
    save_logs: Option<PathBuf>,

    /// Print the filter and modifier catalog and exit
    #[arg(long)]
    list_catalog: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TaggedChoice {
    Ask,
    Reprocess,
    Skip,
}

fn parse_modifier(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got {:?}", s)),
    }
}

/// Asks on the terminal before reprocessing a tagged file
struct StdinConfirm;

#[async_trait]
impl ConfirmPolicy for StdinConfirm {
    async fn confirm_reprocess(&self, job: &FileJob) -> bool {
        let question = format!(
            "{} is already tagged as processed. Reprocess anyway?",
            job.name
        );
        ask(question).await
    }
}

/// Prompt for a yes/no answer; anything but y/yes is a no
async fn ask(question: String) -> bool {
    tokio::task::spawn_blocking(move || {
        print!("{} [y/N] ", question);
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    })
    .await
    .unwrap_or(false)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if args.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.format_timestamp_secs().init();

    let mut cfg = AppConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    let catalog = Catalog::load(&cfg.catalog_dir)
        .with_context(|| format!("Failed to load catalog from {}", cfg.catalog_dir.display()))?;

    if args.list_catalog {
        print_catalog(&catalog);
        return Ok(());
    }

    cfg.options.merge(OptionsUpdate {
        filters: (!args.filters.is_empty()).then(|| args.filters.clone()),
        modifiers: (!args.modifiers.is_empty()).then(|| args.modifiers.clone()),
        quality: args.quality,
        codec: args.codec,
        preset: args.preset,
        hwaccel: args.hwaccel,
        tag_original: args.tag_original.then_some(true),
        stabilize: args.stabilize.then_some(true),
    });
    for filter in &cfg.options.filters {
        if catalog.filter(filter).is_none() {
            warn!("Unknown filter {} will be ignored", filter);
        }
    }
    info!("Options: {}", cfg.options.flags_description());

    let inputs: Vec<PathBuf> = args.inputs.iter().map(|p| scan::absolutize(p)).collect();
    let files = scan::expand_inputs(&inputs, &cfg.media_extensions);
    if files.is_empty() {
        anyhow::bail!("No media files found in the given inputs");
    }

    let (logs, events) = log_channel();
    let engine = Arc::new(FfmpegEngine::new(&cfg, logs));
    let orchestrator = Arc::new(Orchestrator::start(engine, events));

    let confirm: Box<dyn ConfirmPolicy> = match args.tagged {
        TaggedChoice::Ask => Box::new(StdinConfirm),
        TaggedChoice::Reprocess => Box::new(AlwaysAnswer(true)),
        TaggedChoice::Skip => Box::new(AlwaysAnswer(false)),
    };
    orchestrator.add_files(files, confirm.as_ref()).await;

    let abort_watch = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; stopping after the current file");
                if let Err(e) = orchestrator.request_abort().await {
                    warn!("Could not signal ffmpeg: {}", e);
                }
            }
        }
    });

    let summary = orchestrator.run(cfg.options.clone()).await?;
    abort_watch.abort();

    print_report(&orchestrator.jobs(), &summary);

    let rules = CleanupRules {
        delete_originals_if_smaller_output: args.delete_smaller_originals,
        delete_outputs_if_larger_than_original: args.delete_larger_outputs,
    };
    if rules.delete_originals_if_smaller_output || rules.delete_outputs_if_larger_than_original {
        cleanup(&orchestrator, &rules, args.yes).await?;
    }

    orchestrator.shutdown().await;
    if let Some(dir) = &args.save_logs {
        save_logs(&orchestrator, dir)?;
    }

    if summary.was_aborted {
        anyhow::bail!("Run aborted");
    }
    if summary.failed > 0 {
        anyhow::bail!("{} file(s) failed", summary.failed);
    }
    Ok(())
}

fn print_catalog(catalog: &Catalog) {
    println!("Filters:");
    for f in &catalog.filters {
        println!("  {:<14} {:>4}  {:<38} {}", f.short_name, f.priority, f.long_name, f.code);
    }
    println!("Modifiers:");
    for m in &catalog.modifiers {
        println!("  {:<14} {:<44} {}", m.short_name, m.long_name, m.code);
    }
}

fn print_report(jobs: &[FileJob], summary: &RunSummary) {
    println!();
    for job in jobs {
        let detail = match (&job.status, &job.stats, &job.error) {
            (JobStatus::Done, Some(stats), _) => format!(
                "{} -> {} ({:.0}%, {:.1}s) {}",
                format_size(stats.original_size, DECIMAL),
                format_size(stats.new_size, DECIMAL),
                stats.size_ratio().unwrap_or(0.0) * 100.0,
                stats.duration_secs,
                stats.output_path
            ),
            (_, _, Some(err)) => err.clone(),
            _ => String::new(),
        };
        println!("{:<10} {:<40} {}", job.status.as_str().to_uppercase(), job.name, detail);
    }
    println!(
        "\n{} done, {} failed, {} aborted, {} skipped",
        summary.done, summary.failed, summary.aborted, summary.skipped
    );
}

async fn cleanup(orchestrator: &Orchestrator<FfmpegEngine>, rules: &CleanupRules, yes: bool) -> Result<()> {
    let set = orchestrator.cleanup_candidates(rules);
    if set.is_empty() {
        info!("Nothing to clean up");
        return Ok(());
    }

    println!("\nFiles selected for deletion:");
    for candidate in set.candidates() {
        println!(
            "  [{:?}] {} ({})",
            candidate.kind,
            candidate.path,
            format_size(candidate.size, DECIMAL)
        );
    }

    let question = format!(
        "Delete {} file(s), {}?",
        set.len(),
        format_size(set.total_bytes(), DECIMAL)
    );
    if !yes && !ask(question).await {
        info!("Cleanup cancelled");
        return Ok(());
    }

    let outcomes = orchestrator.apply_deletion(set.paths()).await?;
    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    for outcome in &outcomes {
        if let Err(e) = &outcome.result {
            error!("Failed to delete {}: {}", outcome.path, e);
        }
    }
    info!("Deleted {} file(s), {} failure(s)", outcomes.len() - failed, failed);
    Ok(())
}

fn save_logs(orchestrator: &Orchestrator<FfmpegEngine>, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    let exported = Local::now().format("%Y-%m-%d %H:%M:%S");

    for (index, job) in orchestrator.jobs().iter().enumerate() {
        let lines = orchestrator.logs().get(&job.path);
        if lines.is_empty() {
            continue;
        }
        let file = dir.join(log_file_name(index, &job.name));
        let mut text = format!("# {}\n# status: {}\n# exported: {}\n", job.path, job.status, exported);
        for line in lines {
            text.push_str(&line);
            text.push('\n');
        }
        std::fs::write(&file, text)
            .with_context(|| format!("Failed to write log file: {}", file.display()))?;
    }
    info!("Logs written to {}", dir.display());
    Ok(())
}

/// Position in the file list keeps same-named inputs from different folders apart
fn log_file_name(index: usize, name: &str) -> String {
    format!("{:03}_{}.log", index + 1, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_names_are_unique_per_position() {
        assert_eq!(log_file_name(0, "clip.mp4"), "001_clip.mp4.log");
        assert_ne!(log_file_name(0, "clip.mp4"), log_file_name(1, "clip.mp4"));
    }

    #[test]
    fn test_parse_modifier() {
        assert_eq!(parse_modifier("ss=10"), Ok(("ss".to_string(), "10".to_string())));
        assert_eq!(parse_modifier("crop="), Ok(("crop".to_string(), String::new())));
        assert!(parse_modifier("=5").is_err());
        assert!(parse_modifier("ss").is_err());
    }
}
