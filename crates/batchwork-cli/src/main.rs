//! batchwork demo: push generated records through a RecordBuffer into a
//! simulated, intermittently failing sink.
//!
//! ```text
//! batchwork-cli [sequential|parallel] [--options options.json] [--max-retries N]
//!               [--max-in-flight N] [--unresolved-batch-limit N] [--records N]
//! ```
//!
//! Every flag can also come from the environment (`BATCHWORK_MODE`,
//! `BATCHWORK_OPTIONS`, `BATCHWORK_MAX_RETRIES`, ...); flags win over the
//! options file. `RUST_LOG` sets the log filter (default `info`).

use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use clap::Parser;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use batchwork_core::impls::{ChannelReporter, RecordBuffer};
use batchwork_core::{
    Executor, Failure, ManagerBuilder, ManagerOptions, ManagerRegistry, ManagerStatus, Mode,
    RecordSink, TaskError,
};

/// Sink that acknowledges after a delay and rejects every `fail_every`-th call.
struct SimulatedSink {
    calls: AtomicU32,
    fail_every: u32,
    latency: Duration,
}

#[async_trait]
impl RecordSink for SimulatedSink {
    async fn send_batch(&self, records: Vec<Value>) -> Result<(), TaskError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        sleep(self.latency).await;
        if self.fail_every > 0 && call % self.fail_every == 0 {
            return Err(format!("sink rejected batch of {} records (call {call})", records.len()).into());
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct Summary {
    records: u64,
    batches_acknowledged: usize,
    failures: Vec<Failure>,
    status: ManagerStatus,
}

#[derive(Parser, Debug)]
#[command(name = "batchwork-cli")]
#[command(about = "Push generated records through a batch manager into a flaky sink")]
#[command(version)]
struct Cli {
    /// Execution mode (overrides the options file)
    #[arg(env = "BATCHWORK_MODE")]
    mode: Option<Mode>,

    /// JSON options file
    #[arg(short, long, env = "BATCHWORK_OPTIONS")]
    options: Option<PathBuf>,

    #[arg(long, env = "BATCHWORK_MAX_RETRIES")]
    max_retries: Option<u32>,

    #[arg(long, env = "BATCHWORK_MAX_IN_FLIGHT")]
    max_in_flight: Option<usize>,

    #[arg(long, env = "BATCHWORK_UNRESOLVED_BATCH_LIMIT")]
    unresolved_batch_limit: Option<usize>,

    /// Number of records to generate
    #[arg(long, env = "BATCHWORK_RECORDS", default_value_t = 1000)]
    records: u64,

    /// The sink rejects every N-th batch (0 never fails)
    #[arg(long, default_value_t = 4)]
    fail_every: u32,
}

impl Cli {
    fn manager_options(&self) -> Result<ManagerOptions, Box<dyn Error>> {
        let mut options = match &self.options {
            Some(path) => ManagerOptions::from_json(&std::fs::read_to_string(path)?)?,
            None => ManagerOptions::default(),
        };
        if let Some(mode) = self.mode {
            options.mode = mode;
        }
        if let Some(max_retries) = self.max_retries {
            options.max_retries = max_retries;
        }
        if let Some(max_in_flight) = self.max_in_flight {
            options.max_in_flight = max_in_flight;
        }
        if let Some(limit) = self.unresolved_batch_limit {
            options.unresolved_batch_limit = limit;
        }
        Ok(options)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let options = cli.manager_options()?;

    // (A) registry と reporter
    let registry = ManagerRegistry::new();
    let (reporter, mut failures_rx) = ChannelReporter::new();

    // (B) manager を構築（options は Fail-fast で検証される）
    let manager = ManagerBuilder::new()
        .options(options)
        .registry(&registry)
        .reporter(reporter)
        .build::<()>()?;
    info!(manager = %manager.name(), mode = %manager.mode(), "demo started");

    // (C) records を投入
    let buffer = RecordBuffer::new(SimulatedSink {
        calls: AtomicU32::new(0),
        fail_every: cli.fail_every,
        latency: Duration::from_millis(200),
    });
    for n in 0..cli.records {
        buffer
            .push(json!({ "id": n, "payload": format!("record-{n}") }), &manager)
            .await?;
    }
    buffer.flush(&manager).await?;

    // (D) 完了待ち
    manager.wait_idle().await;

    let mut failures = Vec::new();
    while let Ok(failure) = failures_rx.try_recv() {
        warn!(item = %failure.item, attempts = failure.attempts, error = %failure.err, "batch dropped");
        failures.push(failure);
    }

    let summary = Summary {
        records: buffer.received(),
        batches_acknowledged: manager.results_len(),
        failures,
        status: manager.status(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    manager.retire();
    Ok(())
}
