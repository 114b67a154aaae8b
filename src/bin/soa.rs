//! soa CLI: operator commands over persisted timelines.
//!
//! Usage:
//!   soa validate <timeline.json>
//!   soa merge <a.json> <b.json>... --origins text,vision --out merged.json
//!   soa fixup <timeline.json> <verdicts.json> [--threshold 0.7] [--keep] [--out path]
//!   soa provenance <timeline.json>
//!   soa run --text chunk.txt... --page page1.png... --out timeline.json
//!
//! Logging goes to stderr; set `RUST_LOG` to change the level.

use clap::{Parser, Subcommand};
use serde_json::Value;
use soa_reconcile::fixup::parse_verdicts;
use soa_reconcile::model::HeaderStructure;
use soa_reconcile::storage::{read_timeline, write_timeline};
use soa_reconcile::validate::validate_with_metrics;
use soa_reconcile::{
    merge_sources, CommandProvider, ExtractionInput, FixupApplier, MergeError, MergeSource, Origin,
    PageImage, Pipeline, PipelineError, PipelineOutput, ReconcileConfig, ServiceClient, Stage,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "soa",
    version,
    about = "Schedule-of-Activities reconciliation and provenance engine"
)]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check referential integrity of a timeline file
    Validate {
        timeline: PathBuf,
    },
    /// Merge independently extracted timelines by entity name
    Merge {
        /// Timeline files to merge
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Origin of each input, in order (text, vision, ...); missing ones are `default`
        #[arg(long, value_delimiter = ',')]
        origins: Vec<Origin>,
        /// Output timeline path
        #[arg(long)]
        out: PathBuf,
        /// Override merge.name_match_threshold
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Apply validation-pass verdicts to a timeline
    Fixup {
        timeline: PathBuf,
        /// Verdict file: {"cells": [...]} or a bare array
        verdicts: PathBuf,
        /// Override fixup.confidence_threshold
        #[arg(long)]
        threshold: Option<f64>,
        /// Report probable hallucinations without removing them
        #[arg(long)]
        keep: bool,
        /// Write here instead of in place
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Summarize the provenance record of a timeline
    Provenance {
        timeline: PathBuf,
    },
    /// Run the full extraction pipeline through the configured command provider
    Run {
        /// Text chunk files, one service call each
        #[arg(long = "text", required = true)]
        text: Vec<PathBuf>,
        /// Page images, numbered in the order given
        #[arg(long = "page")]
        pages: Vec<PathBuf>,
        /// Reuse a header from an earlier anchor pass
        #[arg(long)]
        header: Option<PathBuf>,
        /// Output timeline path
        #[arg(long)]
        out: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<ReconcileConfig, String> {
    match path {
        Some(path) => ReconcileConfig::load(path)
            .map_err(|e| format!("Failed to load config {}: {}", path.display(), e)),
        None => Ok(ReconcileConfig::default()),
    }
}

fn print_report(output: &PipelineOutput) {
    if !output.report.is_clean() {
        eprint!("{}", output.report);
    }
}

fn cmd_validate(path: &Path) -> i32 {
    let stored = match read_timeline(path) {
        Ok(stored) => stored,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let report = validate_with_metrics(stored.document.timeline());
    let m = &report.metrics;
    println!(
        "{} activities, {} encounters, {} timepoints, {} epochs, {} groups, {} cells",
        m.activities, m.encounters, m.planned_timepoints, m.epochs, m.activity_groups, m.activity_timepoints
    );
    if report.is_clean() {
        println!("No linkage errors");
        return 0;
    }
    for error in &report.errors {
        println!("  {}", error);
    }
    println!("{} linkage error(s)", report.errors.len());
    1
}

fn cmd_merge(
    config: &ReconcileConfig,
    inputs: &[PathBuf],
    origins: &[Origin],
    out: &Path,
) -> i32 {
    let sources: Vec<MergeSource> = inputs
        .iter()
        .enumerate()
        .map(|(i, path)| MergeSource::read(path, origins.get(i).copied().unwrap_or(Origin::Default)))
        .collect();

    let output = match merge_sources(config, &sources) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let PipelineError::Merge(MergeError::NoValidInput { skipped, .. }) = &e {
                for source in skipped {
                    eprintln!("  {}", source);
                }
            }
            return 1;
        }
    };
    print_report(&output);
    if let Err(e) = write_timeline(out, &output.document, &output.provenance) {
        eprintln!("Error: {}", e);
        return 1;
    }
    let t = output.timeline();
    println!(
        "Merged {} source(s) into {}: {} activities, {} timepoints, {} cells",
        output
            .report
            .stage(Stage::Merge)
            .map_or(0, |merge| merge.succeeded),
        out.display(),
        t.activities.len(),
        t.planned_timepoints.len(),
        t.activity_timepoints.len()
    );
    0
}

fn cmd_fixup(
    config: &ReconcileConfig,
    timeline_path: &Path,
    verdicts_path: &Path,
    out: Option<&Path>,
) -> i32 {
    let mut stored = match read_timeline(timeline_path) {
        Ok(stored) => stored,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let verdicts = match std::fs::read_to_string(verdicts_path)
        .map_err(|e| e.to_string())
        .and_then(|text| parse_verdicts(&text).map_err(|e| e.to_string()))
    {
        Ok(verdicts) => verdicts,
        Err(e) => {
            eprintln!("Error: failed to read verdicts: {}", e);
            return 1;
        }
    };

    let applier = FixupApplier::new(config.fixup.clone());
    let outcome = applier.apply(
        stored.document.timeline_mut(),
        &mut stored.provenance,
        &verdicts,
    );
    let target = out.unwrap_or(timeline_path);
    if let Err(e) = write_timeline(target, &stored.document, &stored.provenance) {
        eprintln!("Error: {}", e);
        return 1;
    }

    println!(
        "{} removed, {} confirmed, {} need review, {} disputed",
        outcome.removed.len(),
        outcome.confirmed.len(),
        outcome.needs_review.len(),
        outcome.disputed.len()
    );
    for cell in &outcome.needs_review {
        println!("  needs review: {}", cell);
    }
    0
}

fn cmd_provenance(path: &Path) -> i32 {
    let stored = match read_timeline(path) {
        Ok(stored) => stored,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let provenance = &stored.provenance;
    if provenance.entity_count() == 0 && provenance.cell_count() == 0 {
        println!("No provenance recorded for {}", path.display());
        return 0;
    }
    println!("Entities ({}):", provenance.entity_count());
    for (origin, count) in provenance.entity_origin_counts() {
        println!("  {:<13} {}", origin, count);
    }
    println!("Cells ({}):", provenance.cell_count());
    for (origin, count) in provenance.cell_origin_counts() {
        println!("  {:<13} {}", origin, count);
    }
    0
}

fn cmd_run(
    config: &ReconcileConfig,
    text: &[PathBuf],
    pages: &[PathBuf],
    header: Option<&Path>,
    out: &Path,
) -> i32 {
    let Some(provider) = CommandProvider::from_argv(&config.service.command) else {
        eprintln!("Error: service.command is not configured");
        return 1;
    };

    let mut input = ExtractionInput::default();
    for path in text {
        match std::fs::read_to_string(path) {
            Ok(chunk) => input.text_chunks.push(chunk),
            Err(e) => {
                eprintln!("Error: failed to read {}: {}", path.display(), e);
                return 1;
            }
        }
    }
    input.page_images = pages
        .iter()
        .enumerate()
        .map(|(i, path)| PageImage::new(i as u32 + 1, path.clone()))
        .collect();
    if let Some(path) = header {
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()))
            .and_then(|value| HeaderStructure::from_value(&value).map_err(|e| e.to_string()));
        match parsed {
            Ok(h) => input.header = Some(h),
            Err(e) => {
                eprintln!("Error: failed to read header {}: {}", path.display(), e);
                return 1;
            }
        }
    }

    let client = ServiceClient::from_config(Arc::new(provider), &config.service);
    let pipeline = Pipeline::new(client, config.clone());
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return 1;
        }
    };

    let output = match runtime.block_on(pipeline.run(&input)) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    print_report(&output);
    if let Err(e) = write_timeline(out, &output.document, &output.provenance) {
        eprintln!("Error: {}", e);
        return 1;
    }
    let t = output.timeline();
    println!(
        "Wrote {}: {} activities, {} timepoints, {} cells, {} linkage error(s)",
        out.display(),
        t.activities.len(),
        t.planned_timepoints.len(),
        t.activity_timepoints.len(),
        output.linkage.errors.len()
    );
    0
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Validate { timeline } => cmd_validate(&timeline),
        Commands::Merge {
            inputs,
            origins,
            out,
            threshold,
        } => {
            if let Some(t) = threshold {
                config.merge.name_match_threshold = t;
            }
            match config.validate() {
                Ok(()) => cmd_merge(&config, &inputs, &origins, &out),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    1
                }
            }
        }
        Commands::Fixup {
            timeline,
            verdicts,
            threshold,
            keep,
            out,
        } => {
            if let Some(t) = threshold {
                config.fixup.confidence_threshold = t;
            }
            if keep {
                config.fixup.remove_hallucinations = false;
            }
            match config.validate() {
                Ok(()) => cmd_fixup(&config, &timeline, &verdicts, out.as_deref()),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    1
                }
            }
        }
        Commands::Provenance { timeline } => cmd_provenance(&timeline),
        Commands::Run {
            text,
            pages,
            header,
            out,
        } => cmd_run(&config, &text, &pages, header.as_deref(), &out),
    };
    std::process::exit(code);
}
