//! CLI entry point for the bike-share forecaster.
//!
//! Provides subcommands for the offline pipeline (hourly averages, weektype
//! labels, training, strategy) and for serving single or batched
//! predictions.

use anyhow::{Context, Result};
use bikeshare_forecast::batch::{read_requests, serve_batch};
use bikeshare_forecast::config::{ForecastSettings, WEATHER_API_KEY_ENV};
use bikeshare_forecast::dispatch::{Dispatcher, PredictionRequest};
use bikeshare_forecast::output::{append_record, print_json, print_pretty};
use bikeshare_forecast::reference::weektype::label_from_hourly_counts;
use bikeshare_forecast::types::{Task, Tier};
use bikeshare_forecast::weather::WeatherService;
use bikeshare_forecast::{strategy, training};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "bikeshare_forecast")]
#[command(about = "Hourly bike-share pickup/dropoff forecasting", long_about = None)]
struct Cli {
    /// JSON settings file (directories and weather options)
    #[arg(long, global = true, env = "FORECAST_SETTINGS")]
    settings: Option<PathBuf>,

    /// Directory for models, metrics, strategy and hourly averages
    #[arg(long, global = true, env = "FORECAST_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Directory holding the station cluster and weektype tables
    #[arg(long, global = true, env = "FORECAST_PROCESSED_DIR")]
    processed_dir: Option<PathBuf>,

    /// Directory holding the per-task feature tables
    #[arg(long, global = true, env = "FORECAST_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute per-station hourly averages from the feature tables
    Averages,
    /// Label every station as weekday- or weekend-dominant
    Weektypes {
        /// Hourly count table (defaults to the processed pickup counts)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Train models for the given tiers and write their metrics
    Train {
        /// Tiers to train, comma separated
        #[arg(short, long, value_delimiter = ',', default_value = "global,cluster,station")]
        tier: Vec<Tier>,
    },
    /// Choose a tier per station and task from the training metrics
    Strategy,
    /// Predict one station, date and hour
    Predict {
        /// Station name as it appears in the station table
        #[arg(short, long)]
        station: String,

        /// Date as YYYY-MM-DD
        #[arg(short, long)]
        date: NaiveDate,

        /// Hour of day
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..24))]
        hour: u32,

        /// pickup or dropoff
        #[arg(short, long, default_value = "pickup")]
        task: Task,

        /// Print the full response as JSON
        #[arg(long, default_value_t = false)]
        json: bool,

        /// CSV file to append the response to
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Serve every request in a CSV (station_name,date,hour,task)
    PredictBatch {
        /// Request CSV
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// CSV file to append responses to
        #[arg(short, long, default_value = "predictions.csv")]
        output: PathBuf,

        /// Maximum number of requests in flight
        #[arg(short, long, default_value_t = 8)]
        concurrency: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/bikeshare_forecast.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("bikeshare_forecast.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;

    match cli.command {
        Commands::Averages => {
            let written = training::write_hourly_averages(&settings)?;
            for (task, stations) in written {
                info!(task = %task, stations, "Hourly averages ready");
            }
        }
        Commands::Weektypes { input } => {
            let input = input.unwrap_or_else(|| settings.hourly_counts_path(Task::Pickup));
            let labels = label_from_hourly_counts(&input)
                .with_context(|| format!("labelling stations from {}", input.display()))?;

            let output = settings.weektype_path();
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            labels.write(&output)?;
            info!(stations = labels.len(), path = %output.display(), "Weektype labels written");
        }
        Commands::Train { tier } => {
            let report = training::train(&settings, &tier)?;
            info!(
                global = report.global.len(),
                cluster = report.cluster.values().map(|units| units.len()).sum::<usize>(),
                station = report.station.values().map(|units| units.len()).sum::<usize>(),
                "Training complete"
            );
        }
        Commands::Strategy => {
            strategy::generate(&settings)?;
        }
        Commands::Predict {
            station,
            date,
            hour,
            task,
            json,
            history,
        } => {
            let dispatcher = build_dispatcher(&settings)?;
            let request = PredictionRequest {
                station_name: station,
                date,
                hour,
                task,
            };
            let prediction = dispatcher.serve(&request).await?;

            print_pretty(&prediction);
            if json {
                print_json(&prediction)?;
            } else {
                println!("{prediction}");
            }
            if let Some(path) = history {
                append_record(&path, &prediction.to_record())?;
            }
        }
        Commands::PredictBatch {
            input,
            output,
            concurrency,
        } => {
            let dispatcher = Arc::new(build_dispatcher(&settings)?);
            predict_batch(dispatcher, &input, &output, concurrency).await?;
        }
    }

    Ok(())
}

/// Settings file first, then directory flags (or their env vars) on top.
fn resolve_settings(cli: &Cli) -> Result<ForecastSettings> {
    let mut settings = ForecastSettings::load(cli.settings.as_deref())?;
    if let Some(dir) = &cli.model_dir {
        settings.model_dir = dir.clone();
    }
    if let Some(dir) = &cli.processed_dir {
        settings.processed_dir = dir.clone();
    }
    if let Some(dir) = &cli.data_dir {
        settings.data_dir = dir.clone();
    }
    Ok(settings)
}

fn build_dispatcher(settings: &ForecastSettings) -> Result<Dispatcher> {
    let api_key = std::env::var(WEATHER_API_KEY_ENV).ok();
    let weather = WeatherService::from_settings(&settings.weather, api_key)?;
    Dispatcher::from_settings(settings, weather)
}

/// Serves every request in `input` and appends the responses to `output` in
/// input order.
#[tracing::instrument(skip(dispatcher, input, output), fields(input = %input.display(), output = %output.display()))]
async fn predict_batch(
    dispatcher: Arc<Dispatcher>,
    input: &Path,
    output: &Path,
    concurrency: usize,
) -> Result<()> {
    let requests = read_requests(input)?;
    for prediction in serve_batch(dispatcher, requests, concurrency).await {
        append_record(output, &prediction.to_record())?;
    }
    info!(path = %output.display(), "Predictions written");
    Ok(())
}
