//! acex - audio cache extractor CLI
//!
//! Thin host around the extractor core: resolves configuration (flags over
//! TOML over compiled defaults), subscribes to the event bus for progress
//! lines, runs one extraction, and prints the report.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use acex_common::config as common_config;
use acex_common::human_time::format_elapsed;
use acex_common::{ExtractorEvent, RunPhase};
use acex_core::{AudioCodec, CacheExtractor, Classification, RunConfig, TranscodeConfig};

#[derive(Parser, Debug)]
#[command(name = "acex", version, about = "Extract embedded audio from a game client cache")]
struct Args {
    /// Cache root to scan (defaults to the client's conventional location)
    #[arg(short, long, env = "ACEX_INPUT")]
    input: Option<PathBuf>,

    /// Output root for the extracted tree (defaults to <input>/extracted)
    #[arg(short, long, env = "ACEX_OUTPUT")]
    output: Option<PathBuf>,

    /// Worker pool size (defaults to min(32, 2 x CPU count))
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Classify by "duration" (external probe) or "size"
    #[arg(short, long)]
    classify: Option<String>,

    /// Skip the client's SQLite index
    #[arg(long)]
    no_index_db: bool,

    /// Also transcode the extracted tree to this codec (mp3, wav, flac, aac, m4a)
    #[arg(long)]
    convert_to: Option<String>,

    /// Processed-source history file
    #[arg(long)]
    history: Option<PathBuf>,

    /// Forget every previously-processed source before scanning
    #[arg(long)]
    clear_history: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = resolve_config(&args)?;

    if args.clear_history {
        let history = acex_core::history::ExtractHistory::load(&cfg.processed_set_path);
        history.clear();
        history.persist();
        tracing::info!(path = %cfg.processed_set_path.display(), "Extraction history cleared");
    }

    let extractor = CacheExtractor::new(cfg);
    let mut events = extractor.event_bus().subscribe();

    // Progress printer; dies with the bus when the run ends
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExtractorEvent::PhaseChanged { phase, .. } => {
                    tracing::info!("--> {}", phase);
                }
                ExtractorEvent::Progress {
                    processed_so_far,
                    total,
                    items_per_second,
                    ..
                } => {
                    tracing::info!(
                        "{}/{} items, {:.1}/s",
                        processed_so_far,
                        total,
                        items_per_second
                    );
                }
                _ => {}
            }
        }
    });

    let report = extractor.run().await;
    printer.abort();

    println!();
    println!("Extraction {}", report.phase);
    println!("  extracted          {}", report.processed);
    println!("  duplicates         {}", report.duplicates_content);
    println!("  already processed  {}", report.already_processed_source);
    println!("  errors             {}", report.errors);
    println!(
        "  elapsed            {} ({:.1} files/s)",
        format_elapsed(report.duration_seconds),
        report.files_per_second
    );
    println!("  output             {}", report.output_dir.display());
    if let Some(transcode) = &report.transcode {
        println!(
            "  converted          {} ({} failed, {} skipped) -> {}",
            transcode.converted,
            transcode.failed,
            transcode.skipped_conversion,
            transcode.output_dir.display()
        );
    }

    if report.phase == RunPhase::Failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Merge CLI flags over the TOML config over compiled defaults
fn resolve_config(args: &Args) -> Result<RunConfig> {
    let toml = common_config::load_toml_config();

    let input_root = args
        .input
        .clone()
        .or_else(|| toml.cache_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(common_config::default_cache_dir);

    let output_root = args
        .output
        .clone()
        .or_else(|| toml.output_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| common_config::default_output_dir(&input_root));

    let mut cfg = RunConfig::new(input_root, output_root);

    if let Some(workers) = args.workers.or(toml.workers) {
        cfg.workers = workers;
    }
    if let Some(classify) = args.classify.as_deref().or(toml.classification.as_deref()) {
        cfg.classification = classify.parse::<Classification>()?;
    }
    if args.no_index_db {
        cfg.scan_index_db = false;
    } else if let Some(scan) = toml.scan_index_db {
        cfg.scan_index_db = scan;
    }
    if let Some(codec) = args.convert_to.as_deref().or(toml.convert_to.as_deref()) {
        cfg.transcode = Some(TranscodeConfig::new(codec.parse::<AudioCodec>()?));
    }
    if let Some(history) = &args.history {
        cfg.processed_set_path = history.clone();
    } else {
        cfg.processed_set_path = common_config::default_history_path();
    }

    Ok(cfg)
}
