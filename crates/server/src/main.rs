mod loads;
mod opt;
mod profiling;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use streamwatch_bus::{MessageSink, MessageSource, PulsarSink, PulsarSource};
use streamwatch_store::SharedLog;
use streamwatch_telemetry::Telemetry;
use tokio::sync::{mpsc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::opt::Opt;

/// Directory of the shared persistent window log.
const PERSISTENT_LOG_PATH: &str = "persistent_data";

fn init_logging(level: &str) {
    // panic/fatal exist for operator compatibility; tracing tops out at error.
    let level = match level {
        "panic" | "fatal" => "error",
        other => other,
    };
    let filter = EnvFilter::try_new(level).unwrap_or_else(|e| {
        eprintln!("failed to parse log level ({e}); falling back to info");
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt().json().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    init_logging(&opt.log_level);
    info!("{opt:?}");

    let telemetry =
        Arc::new(Telemetry::new(opt.activate_timing_collection).context("telemetry")?);
    if opt.prometheus_port > 0 {
        tokio::spawn(streamwatch_telemetry::serve(
            telemetry.registry(),
            opt.prometheus_port,
        ));
    }

    let shared_log = SharedLog::new(PERSISTENT_LOG_PATH);
    let loaded = loads::load(&opt.monitors_dir, &shared_log)?;
    let namespaces = Arc::new(loaded.namespaces);
    let filters = Arc::new(loaded.filters);
    telemetry.set_namespace_count(namespaces.len());

    let source = PulsarSource::connect(&opt.source_endpoint(), &opt.consumer_config())
        .await
        .context("failed to create consumer")?;
    let sink = PulsarSink::connect(&opt.dest_endpoint(), &opt.producer_config())
        .await
        .context("failed to create producer")?;
    let source: Arc<dyn MessageSource> = source;
    let sink: Arc<dyn MessageSink> = sink;

    let (ack_tx, ack_rx) = mpsc::channel(streamwatch_flow::ACK_QUEUE_CAPACITY);
    let (write_tx, write_rx) = mpsc::channel(streamwatch_flow::WRITE_QUEUE_CAPACITY);
    let (monitor_tick_tx, monitor_tick_rx) =
        mpsc::channel(streamwatch_flow::MONITOR_TICK_QUEUE_CAPACITY);
    let (store_tick_tx, store_tick_rx) = mpsc::channel(1);

    tokio::spawn(streamwatch_flow::producer(
        write_rx,
        sink,
        telemetry.clone(),
    ));

    tokio::spawn(streamwatch_flow::store_ticker(
        Duration::from_secs(opt.ticker_seconds.max(1)),
        store_tick_tx,
    ));

    let store_tick = Arc::new(Mutex::new(store_tick_rx));
    for worker in 0..opt.consumer_threads.max(1) {
        tokio::spawn(streamwatch_flow::consumer(
            worker,
            source.clone(),
            ack_tx.clone(),
            namespaces.clone(),
            filters.clone(),
            store_tick.clone(),
            telemetry.clone(),
        ));
    }
    drop(ack_tx);

    let monitor_tick_rx = Arc::new(Mutex::new(monitor_tick_rx));
    for _ in 0..opt.monitor_threads.max(1) {
        tokio::spawn(streamwatch_flow::monitor_worker(
            namespaces.clone(),
            monitor_tick_rx.clone(),
            write_tx.clone(),
        ));
    }
    drop(write_tx);

    for namespace in namespaces.values() {
        tokio::spawn(streamwatch_flow::monitor_ticker(
            namespace.clone(),
            monitor_tick_tx.clone(),
            telemetry.clone(),
        ));
    }
    drop(monitor_tick_tx);

    if opt.pprof_on {
        tokio::spawn(profiling::run(
            opt.pprof_dir.clone(),
            Duration::from_secs(opt.pprof_duration),
        ));
    }

    streamwatch_flow::acks(source, ack_rx, telemetry).await;
    Ok(())
}
