use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use clap::Parser;
use locness_data::{
    parse_bound, BackendAdapter, BackendDescriptor, DashConfig, DatasetManager, ManagerOptions,
    RefreshDriver, View,
};

/// Summarize an underway dataset and optionally follow it as it grows.
#[derive(Parser, Debug)]
#[command(name = "locness-data", version)]
struct Cli {
    /// SQLite database, or a .parquet / .arrow snapshot file
    #[arg(long, conflicts_with_all = ["table", "config"])]
    file: Option<PathBuf>,

    /// Managed table name
    #[arg(long, requires = "region", conflicts_with = "config")]
    table: Option<String>,

    #[arg(long)]
    region: Option<String>,

    /// config.toml with a [locness_dash] section
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Rows to print from each end
    #[arg(long, short = 'n', default_value_t = 5)]
    rows: usize,

    /// Range start (RFC 3339, or naive UTC)
    #[arg(long)]
    start: Option<String>,

    /// Range end (RFC 3339, or naive UTC)
    #[arg(long)]
    end: Option<String>,

    /// Also print a resampled tail, e.g. 1min or 10 MINUTES
    #[arg(long)]
    resample: Option<String>,

    /// Keep refreshing and report new records until Ctrl-C
    #[arg(long)]
    follow: bool,

    /// Seconds between refreshes while following
    #[arg(long)]
    interval: Option<u64>,
}

struct Setup {
    descriptor: BackendDescriptor,
    options: ManagerOptions,
    interval: Duration,
    resample: Option<String>,
}

fn setup(cli: &Cli) -> Result<Setup, Box<dyn Error>> {
    let mut setup = match &cli.config {
        Some(path) => {
            let config = DashConfig::load(path)?;
            Setup {
                descriptor: config.backend_descriptor()?,
                options: config.manager_options(),
                interval: config.refresh_interval(),
                resample: config.default_resampling.clone(),
            }
        }
        None => Setup {
            descriptor: BackendDescriptor::from_parts(
                cli.file.clone(),
                cli.table.clone(),
                cli.region.clone(),
            )?,
            options: ManagerOptions::default(),
            interval: Duration::from_secs(5),
            resample: None,
        },
    };
    if let Some(secs) = cli.interval {
        setup.interval = Duration::from_secs(secs.max(1));
    }
    if cli.resample.is_some() {
        setup.resample = cli.resample.clone();
    }
    Ok(setup)
}

fn head_tail(batch: &RecordBatch, n: usize) -> Vec<RecordBatch> {
    let rows = batch.num_rows();
    if rows <= 2 * n {
        return vec![batch.clone()];
    }
    vec![batch.slice(0, n), batch.slice(rows - n, n)]
}

fn print_view(title: &str, view: &View, n: usize) -> Result<(), Box<dyn Error>> {
    println!("\n{title} ({} rows)", view.num_rows());
    if view.is_empty() {
        return Ok(());
    }
    for part in head_tail(view.batch(), n) {
        println!("{}", pretty_format_batches(&[part])?);
    }
    Ok(())
}

fn summarize(manager: &DatasetManager, cli: &Cli, resample: Option<&str>) -> Result<(), Box<dyn Error>> {
    let start = cli.start.as_deref().map(parse_bound).transpose()?;
    let end = cli.end.as_deref().map(parse_bound).transpose()?;

    println!("{}", manager.diagnostics());

    let view = manager.query(start, end, None)?;
    println!("\nColumns:");
    for field in view.batch().schema().fields() {
        println!("  {:<28} {}", field.name(), field.data_type());
    }
    println!("\nPlottable fields: {}", manager.available_fields().join(", "));
    let map_fields = manager.map_fields();
    if !map_fields.is_empty() {
        println!("Map fields: {}", map_fields.join(", "));
    }
    print_view("Data", &view, cli.rows)?;

    if let Some(freq) = resample {
        let resampled = manager.query(start, end, Some(freq))?;
        match resampled.resample_interval() {
            Some(_) => print_view(&format!("Resampled to {freq}"), &resampled, cli.rows)?,
            None => println!("\n{freq} is not coarser than the native sampling interval; no resampling"),
        }
    }
    if let Some(latest) = view.latest_timestamp() {
        println!("\nMost recent data: {latest}");
    }
    Ok(())
}

async fn follow(manager: Arc<DatasetManager>, interval: Duration) {
    let mut handle = RefreshDriver::new(Arc::clone(&manager), interval).spawn();
    println!("\nFollowing every {interval:?}; Ctrl-C to stop");

    loop {
        tokio::select! {
            report = handle.next_report() => match report {
                Some(report) if report.new_records > 0 => {
                    let watermark = manager
                        .store()
                        .watermark()
                        .map(|w| w.to_rfc3339())
                        .unwrap_or_default();
                    println!(
                        "tick {}: {} new records, {} total, latest {}",
                        report.tick,
                        report.new_records,
                        manager.store().len(),
                        watermark
                    );
                }
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
    println!("\n{}", manager.diagnostics());
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let setup = setup(&cli)?;

    // Opened outside any runtime: the managed-table client drives its own.
    let backend = BackendAdapter::open(&setup.descriptor)?;
    let manager = DatasetManager::with_backend(backend, setup.options)?;
    summarize(&manager, &cli, setup.resample.as_deref())?;

    if cli.follow {
        // Keep the last reference out here so the manager is never dropped
        // inside the runtime.
        let manager = Arc::new(manager);
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(follow(Arc::clone(&manager), setup.interval));
    }
    Ok(())
}
