use std::path::PathBuf;

use anyhow::{ensure, Context};
use chrono::{Local, NaiveDateTime, Timelike};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod evaluate;
mod guidelines;
mod local;
mod log_csv;
mod models;
mod outside;
mod remote;
mod report;
mod sync;

use crate::config::{DataPaths, StorageConfig};
use crate::guidelines::{GuidelineConfig, OUTSIDE_REFERENCE};
use crate::local::LocalCache;
use crate::models::{dew_point, Location, Measurement, OutsideSnapshot};
use crate::outside::OutsideProvider;
use crate::remote::{ObjectStore, SpacesStore};
use crate::report::{format_dt, format_value};
use crate::sync::{LoadSource, Reconciler};

#[derive(Parser)]
#[command(name = "env-monitor")]
#[command(about = "Environmental monitoring log for special collections storage", long_about = None)]
struct Cli {
    /// Directory holding the local log cache and saved settings
    #[arg(long, global = true, env = "ENV_MONITOR_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a new reading
    Record {
        #[arg(long, value_enum)]
        location: Location,
        /// Temperature in C
        #[arg(long, allow_negative_numbers = true)]
        temp: f64,
        /// Relative humidity in %
        #[arg(long)]
        rh: f64,
        #[arg(long)]
        lux: Option<f64>,
        /// UV in uW/lm
        #[arg(long)]
        uv: Option<f64>,
        #[arg(long)]
        co2: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
        /// Reading time (defaults to now, local time)
        #[arg(long)]
        at: Option<String>,
    },
    /// Latest status per location
    Status,
    /// Recorded readings, newest first
    List {
        #[arg(long, value_enum)]
        location: Option<Location>,
    },
    /// Current outside conditions
    Outside,
    /// Write the log as CSV
    Export {
        #[arg(long)]
        out: PathBuf,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Remove every recorded reading
    Clear {
        /// Confirm clearing all data
        #[arg(long)]
        yes: bool,
    },
    /// Remote storage sync
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Remote storage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Upload the local log to remote storage now
    Push,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective settings with credentials masked
    Show,
    /// Save settings; omitted fields keep their current value
    Set {
        #[arg(long)]
        bucket: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long)]
        object_key: Option<String>,
        #[arg(long)]
        access_key_id: Option<String>,
        #[arg(long)]
        secret_access_key: Option<String>,
    },
    /// Remove saved settings
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let paths = DataPaths::new(&cli.data_dir);
    let guidelines = GuidelineConfig::default();

    match cli.command {
        Commands::Record {
            location,
            temp,
            rh,
            lux,
            uv,
            co2,
            notes,
            at,
        } => {
            ensure!((-10.0..=50.0).contains(&temp), "temperature must be between -10 and 50 C");
            ensure!((0.0..=100.0).contains(&rh), "relative humidity must be between 0 and 100%");
            for (name, value) in [("lux", lux), ("uv", uv), ("co2", co2)] {
                ensure!(value.map_or(true, |v| v >= 0.0), "{name} must not be negative");
            }
            let timestamp = match at {
                Some(raw) => log_csv::parse_datetime(&raw)
                    .with_context(|| format!("could not parse reading time '{raw}'"))?,
                None => now_to_minute(),
            };

            let mut reconciler = open_reconciler(&paths)?;
            load(&mut reconciler).await?;
            let provider = OutsideProvider::new()?;
            let outside = fetch_reference(&provider).await;

            let measurement = Measurement {
                id: uuid::Uuid::new_v4().to_string(),
                timestamp,
                location,
                temperature_c: temp,
                relative_humidity_pct: rh,
                lux,
                uv,
                co2_ppm: co2,
                outside,
                notes: notes
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty()),
            };
            let id = measurement.id.clone();
            let outcome = reconciler.append(measurement).await?;
            if let Some(warning) = outcome.warning() {
                println!("Warning: {warning}");
            }
            println!("Measurement recorded ({id}).");
        }
        Commands::Status => {
            let mut reconciler = open_reconciler(&paths)?;
            load(&mut reconciler).await?;
            let provider = OutsideProvider::new()?;
            let outside = fetch_reference(&provider).await;
            let evaluated = evaluate::evaluate(&reconciler.snapshot(), &guidelines);

            let stats = report::log_stats(&evaluated);
            let last = stats
                .last_reading
                .map(|(at, location)| format!("{} ({})", format_dt(&at), location))
                .unwrap_or_else(|| "--".to_string());
            println!("Total readings: {}", stats.total);
            println!("Last reading: {last}");
            println!(
                "Locations covered: {}/{}",
                stats.locations_covered,
                Location::ALL.len()
            );
            print_outside(outside.as_ref());
            println!();

            for location in Location::ALL {
                let Some(latest) = evaluate::latest_for(&evaluated, location) else {
                    println!("{location}: Awaiting first reading");
                    continue;
                };
                let m = &latest.measurement;
                println!(
                    "{location}: {} | {:.1} C / {:.1}% RH | {}",
                    latest.range_status.title(),
                    m.temperature_c,
                    m.relative_humidity_pct,
                    format_dt(&m.timestamp)
                );
                if let Some((temp_c, rh)) = outside.as_ref().and_then(|o| o.temp_c.zip(o.rh)) {
                    println!(
                        "  Delta vs outside: {:+.1} C / {:+.1}% RH",
                        m.temperature_c - temp_c,
                        m.relative_humidity_pct - rh
                    );
                }
                println!("  {}", latest.flags_text());
            }
        }
        Commands::List { location } => {
            let mut reconciler = open_reconciler(&paths)?;
            load(&mut reconciler).await?;
            let mut evaluated = evaluate::evaluate(&reconciler.snapshot(), &guidelines);
            if let Some(filter) = location {
                evaluated.retain(|e| e.measurement.location == filter);
            }
            if evaluated.is_empty() {
                println!("No measurements recorded yet.");
                return Ok(());
            }
            evaluated.sort_by(|a, b| b.measurement.timestamp.cmp(&a.measurement.timestamp));

            println!(
                "Date | Location | Temp (C) | RH (%) | Dew Point (C) | Outside Temp (C) | Outside RH (%) | Outside Dew Point (C) | Delta Temp (C) | Delta RH (%) | Status | Flags"
            );
            for e in &evaluated {
                let m = &e.measurement;
                let outside = m.outside.clone().unwrap_or_default();
                println!(
                    "{} | {} | {:.1} | {:.1} | {} | {} | {} | {} | {} | {} | {} | {}",
                    format_dt(&m.timestamp),
                    m.location,
                    m.temperature_c,
                    m.relative_humidity_pct,
                    format_value(dew_point(m.temperature_c, m.relative_humidity_pct)),
                    format_value(outside.temp_c),
                    format_value(outside.rh),
                    format_value(outside.dew_point_c),
                    format_value(e.outside_temp_delta()),
                    format_value(e.outside_rh_delta()),
                    e.range_status.title(),
                    e.flags_text()
                );
            }
        }
        Commands::Outside => {
            let provider = OutsideProvider::new()?;
            print_outside(fetch_reference(&provider).await.as_ref());
        }
        Commands::Export { out } => {
            let mut reconciler = open_reconciler(&paths)?;
            load(&mut reconciler).await?;
            if reconciler.is_empty() {
                println!("No data to export yet.");
                return Ok(());
            }
            LocalCache::new(&out)
                .write(reconciler.entries())
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Exported {} rows to {}.", reconciler.len(), out.display());
        }
        Commands::Report { out } => {
            let mut reconciler = open_reconciler(&paths)?;
            load(&mut reconciler).await?;
            let provider = OutsideProvider::new()?;
            let outside = fetch_reference(&provider).await;
            let evaluated = evaluate::evaluate(&reconciler.snapshot(), &guidelines);
            let report = report::build_report(now_to_minute(), &evaluated, outside.as_ref());
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Clear { yes } => {
            ensure!(yes, "pass --yes to confirm clearing all data");
            let mut reconciler = open_reconciler(&paths)?;
            load(&mut reconciler).await?;
            let outcome = reconciler.clear().await?;
            if let Some(warning) = outcome.warning() {
                println!("Warning: {warning}");
            }
            println!("All measurements cleared.");
        }
        Commands::Sync {
            command: SyncCommands::Push,
        } => {
            let reconciler = open_reconciler(&paths)?;
            let pushed = reconciler
                .push_local()
                .await
                .context("could not import the local log to remote storage")?;
            println!("Local log imported to remote storage ({pushed} readings).");
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                println!("{}", config::resolve_storage(&paths).describe());
            }
            ConfigCommands::Set {
                bucket,
                region,
                endpoint,
                object_key,
                access_key_id,
                secret_access_key,
            } => {
                let current = config::resolve_storage(&paths);
                let updated = config::apply_update(
                    &paths,
                    StorageConfig {
                        bucket: bucket.unwrap_or(current.bucket),
                        region: region.unwrap_or(current.region),
                        endpoint: endpoint.unwrap_or(current.endpoint),
                        object_key: object_key.unwrap_or(current.object_key),
                        access_key_id: access_key_id.unwrap_or_default(),
                        secret_access_key: secret_access_key.unwrap_or_default(),
                    },
                )?;
                println!("Remote storage settings saved.");
                println!("{}", updated.describe());
            }
            ConfigCommands::Clear => {
                config::clear_saved(&paths.settings_file())?;
                println!("Remote storage settings cleared.");
            }
        },
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("env_monitor={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn now_to_minute() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

fn open_reconciler(paths: &DataPaths) -> anyhow::Result<Reconciler> {
    let storage = config::resolve_storage(paths);
    let remote = SpacesStore::from_config(&storage)
        .context("failed to build remote storage client")?
        .map(|store| Box::new(store) as Box<dyn ObjectStore>);
    debug!(data_dir = %paths.data_dir.display(), "opening measurement log");
    Ok(Reconciler::new(LocalCache::new(paths.log_file()), remote))
}

async fn load(reconciler: &mut Reconciler) -> anyhow::Result<()> {
    let outcome = reconciler.load().await?;
    debug!(
        source = ?outcome.source,
        sync = reconciler.sync_enabled(),
        local_reset = outcome.local_reset,
        rows = reconciler.len(),
        "measurement log loaded"
    );
    for warning in &outcome.warnings {
        println!("Warning: {warning}");
    }
    match outcome.source {
        LoadSource::LocalFallback { repaired: true } => {
            println!("Remote storage was unreadable; it has been rewritten from the local log.")
        }
        LoadSource::SeededRemote { pushed: true } => {
            println!("Remote storage was empty; seeded it from the local log.")
        }
        _ => {}
    }
    Ok(())
}

async fn fetch_reference(provider: &OutsideProvider) -> Option<OutsideSnapshot> {
    provider
        .fetch_outside(
            OUTSIDE_REFERENCE.latitude,
            OUTSIDE_REFERENCE.longitude,
            OUTSIDE_REFERENCE.timezone,
        )
        .await
}

fn print_outside(outside: Option<&OutsideSnapshot>) {
    match outside {
        Some(snapshot) => println!(
            "Outside ({}): {} C / {}% RH / dew point {} C, updated {}",
            OUTSIDE_REFERENCE.label,
            format_value(snapshot.temp_c),
            format_value(snapshot.rh),
            format_value(snapshot.dew_point_c),
            report::format_outside_time(snapshot.time.as_deref())
        ),
        None => println!("Outside data unavailable right now."),
    }
}
