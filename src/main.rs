use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use reupload_detect::config::DetectionConfig;
use reupload_detect::core::report::{DetectionReport, GroupedReport, ReportStatistics};
use reupload_detect::core::video::{SegmentBounds, format_timestamp};
use reupload_detect::core::{DetectionOrchestrator, DetectionProgress};
use reupload_detect::services::export::{HISTORY_FILE, ReportFile, read_history, read_report};
use reupload_detect::services::{BatchInput, ReportWriter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(
    name = "reupload-detect",
    version,
    about = "Find reuploaded videos from extracted audio and visual features"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cluster a batch and write the report
    Detect {
        /// Batch JSON with videos and features
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
        /// Detection config JSON (defaults when omitted)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Override the combined similarity threshold
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Report path (default: `<input>.report.json`)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Only compare videos that share a group key
        #[arg(long)]
        grouped: bool,
        /// Build matrices on a single thread
        #[arg(long)]
        sequential: bool,
    },

    /// Summarize a previously written report
    Stats {
        #[arg(short, long, value_name = "FILE")]
        report: PathBuf,
    },

    /// Print or write the default configuration
    Config {
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// List past detection runs recorded next to the reports
    History {
        /// Directory containing the reports
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    configure_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Detect {
            input,
            config,
            threshold,
            output,
            grouped,
            sequential,
        } => {
            let mut config = match config {
                Some(path) => DetectionConfig::from_json_file(&path)
                    .with_context(|| format!("Failed to load config {:?}", path))?,
                None => DetectionConfig::default(),
            };
            if let Some(threshold) = threshold {
                config = config.with_combined_threshold(threshold);
                config.validate()?;
            }
            if sequential {
                config.matrix.parallel = false;
            }
            let output = output.unwrap_or_else(|| input.with_extension("report.json"));
            detect(&input, &output, config, grouped)?;
        }

        Commands::Stats { report } => match read_report(&report)? {
            ReportFile::Single(report) => {
                println!("🗂️  Report generated {}", report.generated_at.to_rfc3339());
                println!("   Outcome: {}", report.outcome.describe());
                print_statistics(&report.statistics, report.threshold);
            }
            ReportFile::Grouped(report) => {
                println!("🗂️  Grouped report generated {}", report.generated_at.to_rfc3339());
                for (key, group) in &report.groups {
                    println!(
                        "   [{}] {} videos, {} reuploads ({})",
                        key,
                        group.statistics.total_videos,
                        group.statistics.reuploads,
                        group.outcome.describe()
                    );
                }
                print_grouped_totals(&report);
            }
        },

        Commands::Config { output } => {
            let json = serde_json::to_string_pretty(&DetectionConfig::default())?;
            match output {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("Failed to write config {:?}", path))?;
                    println!("✅ Wrote default config to {}", path.display());
                }
                None => println!("{}", json),
            }
        }

        Commands::History { path } => {
            let history_file = path.join(HISTORY_FILE);
            let runs = read_history(&history_file)?;
            println!("🗂️  Detection History:");
            for (i, run) in runs.iter().enumerate() {
                println!(
                    "[{}] {}\n     input: {}\n     report: {}\n     \
                     videos: {}, clusters: {}, reuploads: {}, threshold: {:.2}{}\n",
                    i,
                    run.timestamp,
                    run.input,
                    run.output,
                    run.videos,
                    run.clusters,
                    run.reuploads,
                    run.threshold,
                    if run.grouped { " (grouped)" } else { "" }
                );
            }
        }
    }

    Ok(())
}

fn detect(input: &Path, output: &Path, config: DetectionConfig, grouped: bool) -> Result<()> {
    let batch = benchmark("loading batch", || BatchInput::load(input))?;
    let audio = batch.audio_vectors();
    let visual = batch.visual_vectors();

    println!(
        "▶ Detecting reuploads across {} videos ({} with audio, {} with visual features)",
        batch.videos.len(),
        audio.len(),
        visual.len()
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Building similarity matrices…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<DetectionProgress>();
    let orchestrator = DetectionOrchestrator::new(config).with_progress_sender(progress_tx);
    let threshold = orchestrator.config().thresholds.combined;

    let bar = spinner.clone();
    let listener = thread::spawn(move || {
        while let Some(progress) = progress_rx.blocking_recv() {
            let scope = progress.group.as_deref().unwrap_or("batch");
            bar.set_message(format!(
                "[{}/{}] {}: {}",
                progress.stages_completed, progress.total_stages, scope, progress.stage
            ));
        }
    });

    let writer = ReportWriter::new(output);
    let summary = if grouped {
        let report = benchmark("grouped detection", || {
            orchestrator.run_grouped(&batch.videos, &audio, &visual)
        });
        drop(orchestrator);
        finish(listener, &spinner)?;
        let report = report?;

        for (key, group) in &report.groups {
            if !group.clusters.is_empty() {
                println!("\n📁 Group {}:", key);
                print_clusters(group);
            }
        }
        print_grouped_totals(&report);
        writer.write_grouped(&report, input, threshold)?
    } else {
        let report = benchmark("detection", || {
            orchestrator.run(&batch.videos, &audio, &visual)
        });
        drop(orchestrator);
        finish(listener, &spinner)?;
        let report = report?;

        if report.clusters.is_empty() {
            println!("No reuploads found: {}.", report.outcome.describe());
        } else {
            println!("Found {} cluster(s):", report.clusters.len());
            print_clusters(&report);
        }
        print_statistics(&report.statistics, report.threshold);
        writer.write_report(&report, input)?
    };

    println!("\n✅ Wrote report to {}", writer.output().display());
    println!(
        "✅ Recorded run ({} reuploads) in {}",
        summary.reuploads,
        writer.history_path().display()
    );
    Ok(())
}

fn finish(listener: thread::JoinHandle<()>, spinner: &ProgressBar) -> Result<()> {
    listener
        .join()
        .map_err(|_| anyhow!("Progress listener thread panicked"))?;
    spinner.finish_with_message("Detection complete");
    Ok(())
}

fn print_clusters(report: &DetectionReport) {
    for (i, cluster) in report.clusters.iter().enumerate() {
        let original = &report.records[cluster.original];
        println!("\n✨ Cluster {}:", i + 1);
        println!(
            "   🏆 Original → {} [{}] {}{}",
            cluster.original_id,
            cluster.content_type,
            describe_date(original.upload_date),
            describe_segment(original.segment)
        );
        for reupload in &cluster.reuploads {
            let record = &report.records[reupload.index];
            let score = reupload
                .similarity
                .map_or_else(|| "n/a".to_string(), |s| format!("{:.3}", s));
            println!(
                "   📼 {} [{}] {} similarity {} ({:?}){}",
                reupload.video_id,
                reupload.content_type,
                describe_date(reupload.upload_date),
                score,
                reupload.link,
                describe_segment(record.segment)
            );
        }
    }
}

fn print_statistics(stats: &ReportStatistics, threshold: f64) {
    println!(
        "\n📊 {} videos, {} originals, {} reuploads ({:.1}%) at threshold {:.2}",
        stats.total_videos, stats.originals, stats.reuploads, stats.reupload_percentage, threshold
    );
    for (content_type, count) in &stats.reuploads_by_type {
        println!("   {}: {}", content_type, count);
    }
    if let Some(avg) = stats.average_similarity {
        println!("   Average similarity to original: {:.3}", avg);
    }
    for (name, matrix) in [
        ("audio", &stats.audio_matrix),
        ("visual", &stats.visual_matrix),
        ("combined", &stats.combined_matrix),
    ] {
        println!(
            "   {} matrix: {} defined / {} undefined pairs, max {}",
            name,
            matrix.defined_pairs,
            matrix.undefined_pairs,
            matrix.max.map_or_else(|| "n/a".to_string(), |m| format!("{:.3}", m))
        );
    }
}

fn print_grouped_totals(report: &GroupedReport) {
    let stats = &report.statistics;
    println!(
        "\n📊 {} groups, {} videos, {} originals, {} reuploads ({:.1}%)",
        stats.groups,
        stats.total_videos,
        stats.originals,
        stats.reuploads,
        stats.reupload_percentage
    );
}

fn describe_date(date: Option<chrono::NaiveDate>) -> String {
    date.map_or_else(|| "unknown date".to_string(), |d| d.to_string())
}

fn describe_segment(segment: Option<SegmentBounds>) -> String {
    match segment {
        Some(SegmentBounds {
            start_secs,
            end_secs: Some(end),
        }) => format!(" @ {} - {}", format_timestamp(start_secs), format_timestamp(end)),
        Some(SegmentBounds {
            start_secs,
            end_secs: None,
        }) => format!(" @ {} -", format_timestamp(start_secs)),
        None => String::new(),
    }
}

/// Logs go to stderr so stdout stays readable; `RUST_LOG` overrides the default level.
fn configure_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(filter)
        .init();
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
