//! CLI entry point for ratp_poll.
//!
//! Fetches stop schedules once for a single query or a stops file, or runs a
//! daemon that keeps appending batches to an output file.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ratp_poll::{
    config::{DEFAULT_API_BASE, DEFAULT_MAX_CONNECTIONS, DEFAULT_TIMEOUT_SECS, FetchConfig},
    daemon::{Daemon, DaemonConfig, DaemonExit},
    fetch::{get_stop_times, run_batch},
    output::OutputMode,
    parser::parse_batch,
    query::{Query, TransportType, Way, load_queries},
};
use tracing::{debug, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "ratp_poll")]
#[command(about = "Poll RATP stop schedules", long_about = None)]
struct Cli {
    /// Write fetch logs in CSV format to this file
    #[arg(long, global = true, value_name = "FILE")]
    fetch_log: Option<PathBuf>,

    /// Fetching timeout in seconds per request
    #[arg(long, global = true, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Maximum simultaneous connections per batch
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    /// Base URL of the schedules API
    #[arg(long, global = true, env = "RATP_API_BASE", default_value = DEFAULT_API_BASE)]
    api_base: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Get the stop times of one line at one station
    Gst {
        transport_type: TransportType,
        line_code: String,
        station_name: String,
        way: Way,
    },
    /// Get the stop times for every query in a stops file, as JSON
    Gstb {
        #[arg(value_name = "STOPS_FILE")]
        stops_file: PathBuf,
    },
    /// Get the parsed stop times for every query in a stops file, as CSV
    Gstbp {
        #[arg(value_name = "STOPS_FILE")]
        stops_file: PathBuf,
    },
    /// Periodically run gstb or gstbp and append the output to a file
    Daemon {
        /// Period of the daemon in seconds
        #[arg(long, default_value_t = 60)]
        interval: u64,

        /// Maximum batch cycles running at once
        #[arg(long, default_value_t = 5)]
        processes: usize,

        /// Test connection limits in random order: start, stop, step, repetitions
        #[arg(
            long,
            num_args = 4,
            allow_negative_numbers = true,
            value_names = ["START", "STOP", "STEP", "REPETITIONS"]
        )]
        max_conn_test: Option<Vec<i64>>,

        #[arg(value_enum, ignore_case = true)]
        function: Function,

        #[arg(value_name = "STOPS_FILE")]
        stops_file: PathBuf,

        #[arg(value_name = "OUTPUT_FILE")]
        output_file: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Function {
    Gstb,
    Gstbp,
}

impl From<Function> for OutputMode {
    fn from(function: Function) -> Self {
        match function {
            Function::Gstb => OutputMode::Raw,
            Function::Gstbp => OutputMode::Parsed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/ratp_poll.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("ratp_poll.log"));

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
    let fetch_config = FetchConfig {
        api_base: cli.api_base,
        timeout: Duration::from_secs(cli.timeout),
        max_connections: cli.max_connections,
        fetch_log: cli.fetch_log,
    };
    fetch_config.validate()?;

    match cli.command {
        Commands::Gst {
            transport_type,
            line_code,
            station_name,
            way,
        } => {
            let query = Query::new(transport_type, line_code, station_name, way);
            debug!(query = ?query, "Single query");
            let (body, elapsed) = get_stop_times(&query, &fetch_config).await?;
            println!("{body}");
            info!(request_secs = elapsed.as_secs_f64(), "Request time");
        }
        Commands::Gstb { stops_file } => {
            let queries = load_queries(&stops_file)?;
            let batch = run_batch(&queries, &fetch_config).await?;
            println!("{}", batch.bodies.join("\n"));
            info!(total_secs = batch.elapsed.as_secs_f64(), "Requests total time");
        }
        Commands::Gstbp { stops_file } => {
            let queries = load_queries(&stops_file)?;
            let batch = run_batch(&queries, &fetch_config).await?;
            let parsed = parse_batch(&batch);
            println!("{}", parsed.rows.join("\n"));
            info!(total_secs = parsed.elapsed.as_secs_f64(), "Requests total time");
        }
        Commands::Daemon {
            interval,
            processes,
            max_conn_test,
            function,
            stops_file,
            output_file,
        } => {
            let queries = load_queries(&stops_file)?;
            let config = DaemonConfig {
                interval: Duration::from_secs(interval),
                processes,
                mode: function.into(),
                output_file,
                max_conn_test,
            };
            let daemon = Daemon::new(config, fetch_config, queries)
                .context("invalid daemon configuration")?;

            let exit = daemon
                .run_until(async {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => info!("Received Ctrl+C, draining in-flight batches"),
                        Err(e) => {
                            warn!(error = %e, "Cannot listen for Ctrl+C");
                            std::future::pending::<()>().await;
                        }
                    }
                })
                .await?;
            if exit == DaemonExit::SweepFinished {
                info!("Connection sweep complete");
            }
        }
    }

    Ok(())
}
