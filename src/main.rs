mod db;
mod extract;
mod fetch;
mod pipeline;
mod resolve;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use fetch::clock::SystemClock;
use fetch::transport::HttpTransport;
use fetch::ThrottledFetcher;
use pipeline::{Pipeline, ResultRow, RowStatus};

#[derive(Parser)]
#[command(name = "bsr_sampler", about = "Best-seller rank sampler for category listings")]
struct Cli {
    /// Settings file (default: bsr_sampler.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample the Nth best seller of each category and classify its rank
    Run {
        /// Category label to process (repeatable; default: configured list)
        #[arg(short, long = "category")]
        categories: Vec<String>,
        /// Shortlist ranks strictly below this
        #[arg(short, long)]
        threshold: Option<u64>,
        /// Listing position to sample (1-based)
        #[arg(short, long)]
        rank: Option<usize>,
        /// Print only, do not write the run to the database
        #[arg(long)]
        no_store: bool,
    },
    /// Show rows from a stored run
    Results {
        /// Run id (default: latest)
        #[arg(long)]
        run: Option<i64>,
        /// Only rows that met the threshold
        #[arg(short, long)]
        shortlist: bool,
        /// One JSON object per line
        #[arg(long)]
        json: bool,
        /// Max rows to display
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// List category links harvested from the root page
    Candidates,
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Run {
            categories,
            threshold,
            rank,
            no_store,
        } => {
            if !categories.is_empty() {
                settings.categories = categories;
            }
            if let Some(t) = threshold {
                settings.bsr_threshold = t;
            }
            if let Some(r) = rank {
                settings.target_rank = r;
            }
            settings.validate()?;
            run(&settings, no_store)
        }
        Commands::Results {
            run,
            shortlist,
            json,
            limit,
        } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let run_id = match run {
                Some(id) => id,
                None => match db::latest_run_id(&conn)? {
                    Some(id) => id,
                    None => {
                        println!("No runs stored yet. Run 'run' first.");
                        return Ok(ExitCode::SUCCESS);
                    }
                },
            };
            let Some(summary) = db::fetch_run(&conn, run_id)? else {
                anyhow::bail!("no run with id {run_id}");
            };
            let rows = db::fetch_results(&conn, run_id, shortlist, limit)?;

            if json {
                for r in &rows {
                    println!("{}", serde_json::to_string(r)?);
                }
            } else {
                println!(
                    "Run {} | {} -> {} | {} categories, {} classified, {} shortlisted{}",
                    summary.id,
                    summary.started_at,
                    summary.finished_at,
                    summary.categories,
                    summary.classified,
                    summary.shortlisted,
                    if summary.failed { " | FAILED (no usable titles)" } else { "" }
                );
                print_table(&rows);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Candidates => {
            let mut pipeline = build_pipeline(&settings)?;
            let links = pipeline.candidates()?;
            for link in &links {
                println!("{:<40} {}", truncate(&link.label, 40), link.url);
            }
            println!("\n{} candidate categories", links.len());
            Ok(ExitCode::SUCCESS)
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn build_pipeline(settings: &settings::Settings) -> anyhow::Result<Pipeline<HttpTransport>> {
    let gateway = settings.gateway();
    match &gateway {
        Some(g) => info!(endpoint = %g.endpoint, "fetching through scraping gateway"),
        None => info!("no api key configured, fetching pages directly"),
    }
    let transport = HttpTransport::new(gateway, settings.request_timeout()).context("building http client")?;
    let fetcher = ThrottledFetcher::new(
        transport,
        SystemClock,
        settings.retry_policy(),
        settings.politeness(),
    );
    Ok(Pipeline::new(fetcher, settings.pipeline_options()?))
}

fn run(settings: &settings::Settings, no_store: bool) -> anyhow::Result<ExitCode> {
    let mut pipeline = build_pipeline(settings)?;

    println!(
        "Sampling rank #{} in {} categories (threshold {})...",
        settings.target_rank,
        settings.categories.len(),
        settings.bsr_threshold
    );
    let pb = ProgressBar::new(settings.categories.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("progress template")?
            .progress_chars("#>-"),
    );
    let report = pipeline.run(&settings.categories, &pb);
    pb.finish_and_clear();
    let report = report?;

    print_table(&report.rows);

    let shortlist: Vec<&ResultRow> = report.shortlist().collect();
    println!("\n--- Shortlist (rank < {}) ---", settings.bsr_threshold);
    if shortlist.is_empty() {
        println!("  (none)");
    }
    for r in &shortlist {
        println!(
            "  {}: {} (#{})",
            r.category,
            r.title.as_deref().unwrap_or("-"),
            r.popularity_rank.map(|n| n.to_string()).unwrap_or_default()
        );
    }

    println!(
        "\n{} categories | {} classified | {} shortlisted | {} with titles",
        report.rows.len(),
        report.classified(),
        shortlist.len(),
        report.usable_titles()
    );

    if !no_store {
        let conn = db::connect(&settings.db_path)?;
        db::init_schema(&conn)?;
        let id = db::save_run(&conn, &report)?;
        println!("Saved as run {} in {}", id, settings.db_path);
    }

    if report.failed() {
        eprintln!("No usable titles captured in this run.");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_table(rows: &[ResultRow]) {
    if rows.is_empty() {
        println!("No rows.");
        return;
    }
    println!(
        "{:>3} | {:<28} | {:<10} | {:<36} | {:>8} | {:<4} | {}",
        "#", "Category", "ID", "Title", "Rank", "Hit", "Notes"
    );
    println!("{}", "-".repeat(120));

    for (i, r) in rows.iter().enumerate() {
        let hit = match (r.status, r.meets_threshold) {
            (RowStatus::Skipped, _) => "skip",
            (_, true) => "yes",
            (_, false) => "no",
        };
        println!(
            "{:>3} | {:<28} | {:<10} | {:<36} | {:>8} | {:<4} | {}",
            i + 1,
            truncate(&r.category, 28),
            r.catalog_id.as_deref().unwrap_or("-"),
            truncate(r.title.as_deref().unwrap_or("-"), 36),
            r.popularity_rank.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
            hit,
            r.notes_text()
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_width() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Anxieties & Phobias", 10), "Anxieti...");
        assert_eq!(truncate("Anxieties & Phobias", 10).chars().count(), 10);
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(std::time::Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(std::time::Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(std::time::Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn cli_parses_run_overrides() {
        let cli = Cli::try_parse_from([
            "bsr_sampler", "run", "--category", "Anxiety", "-c", "Happiness", "--threshold", "15000", "--no-store",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                categories,
                threshold,
                rank,
                no_store,
            } => {
                assert_eq!(categories, vec!["Anxiety", "Happiness"]);
                assert_eq!(threshold, Some(15000));
                assert_eq!(rank, None);
                assert!(no_store);
            }
            _ => panic!("expected run"),
        }
    }
}
