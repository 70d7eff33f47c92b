mod config;
mod db;
mod enrich;
mod error;
mod fetch;
mod parser;
mod pipeline;
mod search;

use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};

use config::{Catalog, Settings};
use db::{Backend, SessionStatus};
use fetch::{FetchMethod, Fetcher};
use pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "yad2_scraper", about = "Yad2 car listings scraper")]
struct Cli {
    /// Where to store results
    #[arg(long, global = true, value_enum, default_value_t = Backend::Local)]
    db: Backend,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape listings and store them
    Run {
        /// Manufacturer key or English name (default: every manufacturer in the catalog)
        #[arg(short, long)]
        manufacturer: Option<String>,
        /// Model key or English name (default: every model of the manufacturer)
        #[arg(long)]
        model: Option<String>,
        /// Listings to scrape per model
        #[arg(short = 'n', long, default_value = "10")]
        listings: usize,
        /// How pages are fetched
        #[arg(long, value_enum, default_value_t = FetchMethod::Http)]
        fetch: FetchMethod,
        /// Drop and recreate all tables first
        #[arg(long)]
        reset: bool,
    },
    /// Show table counts and recent sessions
    Stats,
    /// Drop and recreate all tables
    Reset,
    /// Recompute derived fields of stored listings
    Enrich,
    /// List manufacturers and models in the catalog
    Catalog,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load().context("loading settings")?;

    let result = match cli.command {
        Commands::Run {
            manufacturer,
            model,
            listings,
            fetch,
            reset,
        } => {
            let catalog = Catalog::load(&settings.catalog_path)?;
            let targets = catalog.targets(manufacturer.as_deref(), model.as_deref())?;
            if targets.is_empty() {
                println!("Nothing to scrape.");
                return Ok(());
            }

            let store = db::open(cli.db, &settings).await?;
            if reset {
                store.reset().await.context("resetting tables")?;
                println!("Tables reset.");
            }
            let fetcher = Fetcher::from_method(fetch, &settings)?;
            let run_number = store.next_run_number().await?;
            println!(
                "Run #{}: {} target(s), up to {} listings each, via {} into {}",
                run_number,
                targets.len(),
                listings,
                fetcher.method(),
                store.backend()
            );

            let pipeline = Pipeline {
                store: store.as_ref(),
                fetcher: &fetcher,
                settings: &settings,
                run_number,
            };
            let mut reports = Vec::with_capacity(targets.len());
            for target in &targets {
                reports.push(pipeline.run_session(target, listings).await);
            }
            fetcher.close().await;

            println!(
                "\n{:<28} | {:<8} | {:>5} | {:>6} | {:>7} | {:>8}",
                "Target", "Status", "URLs", "Stored", "Skipped", "Time"
            );
            println!("{}", "-".repeat(78));
            for r in &reports {
                println!(
                    "{:<28} | {:<8} | {:>5} | {:>6} | {:>7} | {:>8}",
                    truncate(&r.target, 28),
                    r.status.as_str(),
                    r.urls,
                    r.stored,
                    r.skipped,
                    format_duration(r.duration)
                );
            }
            let stored: usize = reports.iter().map(|r| r.stored).sum();
            let failed = reports
                .iter()
                .filter(|r| r.status == SessionStatus::Failed)
                .count();
            println!("\nStored {} listings ({} failed sessions).", stored, failed);
            Ok(())
        }
        Commands::Stats => {
            let store = db::open(cli.db, &settings).await?;
            let s = store.stats().await?;
            println!("Backend:       {}", store.backend());
            println!("Manufacturers: {}", s.manufacturers);
            println!("Listings:      {}", s.listings);
            println!("Sessions:      {}", s.scraping_logs);
            println!("Raw pages:     {}", s.raw_data);

            if !s.per_manufacturer.is_empty() {
                println!(
                    "\n{:<20} | {:>8} | {:>10} | {:>9}",
                    "Manufacturer", "Listings", "Avg price", "Years"
                );
                println!("{}", "-".repeat(56));
                for m in &s.per_manufacturer {
                    let avg = m
                        .avg_price
                        .map(|p| format!("{:.0}", p))
                        .unwrap_or_else(|| "-".into());
                    let years = match (m.min_year, m.max_year) {
                        (Some(lo), Some(hi)) => format!("{}-{}", lo, hi),
                        _ => "-".into(),
                    };
                    println!(
                        "{:<20} | {:>8} | {:>10} | {:>9}",
                        truncate(&m.name, 20),
                        m.listings,
                        avg,
                        years
                    );
                }
            }

            if !s.recent_sessions.is_empty() {
                println!("\n--- Recent sessions ---");
                for r in &s.recent_sessions {
                    let target = match &r.model_name {
                        Some(model) => format!("{} {}", r.manufacturer_name, model),
                        None => r.manufacturer_name.clone(),
                    };
                    println!(
                        "  {} | {:<24} | {:<7} | {:>3} cars | {:.1}s{}",
                        r.inserted_at,
                        truncate(&target, 24),
                        r.status,
                        r.cars_found,
                        r.scraping_duration,
                        r.error_message
                            .as_deref()
                            .map(|e| format!(" | {}", truncate(e, 60)))
                            .unwrap_or_default()
                    );
                }
            }
            Ok(())
        }
        Commands::Reset => {
            let store = db::open(cli.db, &settings).await?;
            store.reset().await.context("resetting tables")?;
            println!("All tables dropped and recreated ({}).", store.backend());
            Ok(())
        }
        Commands::Enrich => {
            let store = db::open(cli.db, &settings).await?;
            let today = Utc::now().date_naive();
            let updated = pipeline::reenrich(store.as_ref(), today, settings.annual_km).await?;
            println!("Recomputed derived fields for {} listings.", updated);
            Ok(())
        }
        Commands::Catalog => {
            let catalog = Catalog::load(&settings.catalog_path)?;
            for (key, m) in &catalog.manufacturers {
                println!("{:<12} {:>4}  {} ({})", key, m.manufacturer_id, m.english, m.hebrew);
                for (model_key, model) in &m.models {
                    println!(
                        "  {:<10} {:>6}  {} ({})",
                        model_key, model.model_id, model.english, model.hebrew
                    );
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
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
