//! Periodic batch collection.
//!
//! Every tick submits one batch cycle (fetch, optionally parse, append to the
//! output file) to a bounded pool and then sleeps. Ticks are not held back by
//! slow cycles; only a full pool delays the next submission.

mod sweep;

pub use sweep::SweepPlan;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, debug, error, info, info_span};

use crate::config::FetchConfig;
use crate::error::{PollError, Result};
use crate::fetch::{BasicClient, HttpClient, run_batch_with};
use crate::lock::OUTPUT_LOCK_TIMEOUT;
use crate::output::{OutputMode, ensure_header, write_batch};
use crate::parser::parse_batch;
use crate::query::Query;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Time between two submissions.
    pub interval: Duration,
    /// Maximum number of batch cycles running at once.
    pub processes: usize,
    pub mode: OutputMode,
    pub output_file: PathBuf,
    /// `(start, stop, step, repetitions)` for a connection-limit sweep.
    pub max_conn_test: Option<Vec<i64>>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            processes: 5,
            mode: OutputMode::Raw,
            output_file: PathBuf::from("output.txt"),
            max_conn_test: None,
        }
    }
}

/// Why [`Daemon::run_until`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonExit {
    /// Every sweep value was used and all submitted cycles completed.
    SweepFinished,
    /// The shutdown signal fired; in-flight cycles were drained.
    Shutdown,
}

type Connector<C> = Arc<dyn Fn(&FetchConfig) -> Result<C> + Send + Sync>;

pub struct Daemon<C> {
    config: DaemonConfig,
    fetch_config: FetchConfig,
    queries: Arc<Vec<Query>>,
    sweep: Option<SweepPlan>,
    connect: Connector<C>,
}

impl Daemon<BasicClient> {
    /// A daemon fetching over a fresh reqwest pool per cycle.
    pub fn new(
        config: DaemonConfig,
        fetch_config: FetchConfig,
        queries: Vec<Query>,
    ) -> Result<Self> {
        Self::with_connector(config, fetch_config, queries, BasicClient::from_config)
    }
}

impl<C: HttpClient + 'static> Daemon<C> {
    /// Validates the configuration and builds the sweep plan, if any.
    ///
    /// `connect` builds the client a cycle fetches with, from that cycle's
    /// configuration snapshot.
    pub fn with_connector<F>(
        config: DaemonConfig,
        fetch_config: FetchConfig,
        queries: Vec<Query>,
        connect: F,
    ) -> Result<Self>
    where
        F: Fn(&FetchConfig) -> Result<C> + Send + Sync + 'static,
    {
        fetch_config.validate()?;
        if config.processes == 0 {
            return Err(PollError::Configuration(
                "processes must be at least 1".into(),
            ));
        }

        let sweep = match &config.max_conn_test {
            Some(args) => {
                let plan = SweepPlan::from_args(args)?;
                debug!(plan = ?plan, "Connection sweep planned");
                Some(plan)
            }
            None => None,
        };

        Ok(Self {
            config,
            fetch_config,
            queries: Arc::new(queries),
            sweep,
            connect: Arc::new(connect),
        })
    }

    /// Runs until a sweep finishes. Without a sweep, runs forever.
    pub async fn run(self) -> Result<DaemonExit> {
        self.run_until(std::future::pending()).await
    }

    /// Runs until a sweep finishes or `shutdown` resolves, then waits for the
    /// cycles already submitted.
    pub async fn run_until<F: Future<Output = ()>>(mut self, shutdown: F) -> Result<DaemonExit> {
        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            processes = self.config.processes,
            queries = self.queries.len(),
            output = %self.config.output_file.display(),
            "Starting daemon"
        );

        if let Some(header) = self.config.mode.header() {
            let path = self.config.output_file.clone();
            tokio::task::spawn_blocking(move || ensure_header(&path, header, OUTPUT_LOCK_TIMEOUT))
                .await
                .map_err(join_to_io)??;
        }

        let pool = Arc::new(Semaphore::new(self.config.processes));
        let mut in_flight = JoinSet::new();
        tokio::pin!(shutdown);
        let mut tick: u64 = 0;

        let exit = loop {
            while let Some(finished) = in_flight.try_join_next() {
                report_cycle(finished);
            }

            let fetch_config = match self.sweep.as_mut().and_then(|plan| plan.next()) {
                Some(max_connections) => self.fetch_config.with_max_connections(max_connections),
                None => self.fetch_config.clone(),
            };

            let permit = tokio::select! {
                permit = Arc::clone(&pool).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break DaemonExit::Shutdown,
                },
                _ = &mut shutdown => break DaemonExit::Shutdown,
            };

            tick += 1;
            info!(
                tick,
                max_connections = fetch_config.max_connections,
                spawned_at = %Local::now(),
                "Spawned batch cycle"
            );

            let connect = Arc::clone(&self.connect);
            let queries = Arc::clone(&self.queries);
            let mode = self.config.mode;
            let output = self.config.output_file.clone();
            in_flight.spawn(
                async move {
                    let _permit = permit;
                    run_cycle(&*connect, &queries, fetch_config, mode, output).await
                }
                .instrument(info_span!("cycle", tick)),
            );

            if self.sweep.as_ref().is_some_and(SweepPlan::is_empty) {
                break DaemonExit::SweepFinished;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = &mut shutdown => break DaemonExit::Shutdown,
            }
        };

        while let Some(finished) = in_flight.join_next().await {
            report_cycle(finished);
        }

        match exit {
            DaemonExit::SweepFinished => info!(ticks = tick, "Finished max_conn_test"),
            DaemonExit::Shutdown => info!(ticks = tick, "Daemon stopped"),
        }
        Ok(exit)
    }
}

/// One batch cycle: fetch, parse when needed, append to the output file.
async fn run_cycle<C: HttpClient + 'static>(
    connect: &(dyn Fn(&FetchConfig) -> Result<C> + Send + Sync),
    queries: &[Query],
    config: FetchConfig,
    mode: OutputMode,
    output: PathBuf,
) -> Result<()> {
    let client = Arc::new(connect(&config)?);
    let batch = run_batch_with(client, queries, &config).await;

    let (lines, elapsed) = match mode {
        OutputMode::Raw => (batch.bodies, batch.elapsed),
        OutputMode::Parsed => {
            let parsed = parse_batch(&batch);
            (parsed.rows, parsed.elapsed)
        }
    };
    info!(
        total_secs = elapsed.as_secs_f64(),
        lines = lines.len(),
        "Total iteration time"
    );

    tokio::task::spawn_blocking(move || write_batch(&output, mode, &lines))
        .await
        .map_err(join_to_io)??;

    info!(finished_at = %Local::now(), "Finished batch cycle");
    Ok(())
}

fn report_cycle(finished: std::result::Result<Result<()>, JoinError>) {
    match finished {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Batch cycle failed"),
        Err(e) => error!(error = %e, "Batch cycle panicked"),
    }
}

fn join_to_io(err: JoinError) -> PollError {
    PollError::Io(std::io::Error::other(err))
}
