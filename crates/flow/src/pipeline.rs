//! The worker tasks and their queues.
//!
//! ```text
//! bus → consumer workers → filter tree → namespace stores
//!         │                                   ▲
//!         └→ ack queue → ack worker → bus     │ (store ticker)
//! monitor tickers → monitor tick queue → monitor workers → write queue
//!                                                → producer → bus
//! ```
//!
//! Every queue is bounded and senders block, which is the back-pressure
//! story: a slow stage stalls its upstream instead of growing memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use streamwatch_bus::{InboundMessage, MessageSink, MessageSource};
use streamwatch_telemetry::Telemetry;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::filter_tree::FilterTree;
use crate::namespace::Namespace;

pub const ACK_QUEUE_CAPACITY: usize = 2000;
pub const WRITE_QUEUE_CAPACITY: usize = 2000;
pub const MONITOR_TICK_QUEUE_CAPACITY: usize = 500;

/// Cadence of the rate diagnostics logged by consumers and the ack worker.
const RATE_LOG_PERIOD: Duration = Duration::from_secs(60);

/// One monitor emission on its way to the bus.
#[derive(Debug, Clone)]
pub struct WriteJob {
    pub namespace: String,
    pub payload: Vec<u8>,
}

fn rate_log_interval() -> tokio::time::Interval {
    let mut interval = interval_at(Instant::now() + RATE_LOG_PERIOD, RATE_LOG_PERIOD);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

// ── Consumer ─────────────────────────────────────────────────────────

/// Consumer worker: pulls messages, runs the filter tree, pushes metrics
/// into their namespaces, and forwards the message for acknowledgement.
///
/// The store ticker channel is shared by every consumer; each pulse is
/// serviced by exactly one of them, which ticks every namespace with the
/// last observed publish time.
pub async fn consumer(
    worker: usize,
    source: Arc<dyn MessageSource>,
    ack_tx: mpsc::Sender<InboundMessage>,
    namespaces: Arc<HashMap<String, Arc<Namespace>>>,
    filters: Arc<FilterTree>,
    store_tick: Arc<Mutex<mpsc::Receiver<()>>>,
    telemetry: Arc<Telemetry>,
) {
    let mut n_read: f64 = 0.0;
    let mut last_instant = std::time::Instant::now();
    let mut last_publish_time = DateTime::<Utc>::UNIX_EPOCH;
    let mut log_tick = rate_log_interval();

    loop {
        tokio::select! {
            received = source.recv() => {
                let Some(msg) = received else {
                    info!(worker, "message source closed");
                    return;
                };
                n_read += 1.0;
                last_publish_time = msg.publish_time;

                let consume_start = std::time::Instant::now();
                let metrics = filters.filter(&msg.payload);
                let filter_elapsed = consume_start.elapsed();

                let push_start = std::time::Instant::now();
                for metric in &metrics {
                    telemetry.inc_filtered_msg(&metric.namespace);
                    match namespaces.get(&metric.namespace) {
                        Some(namespace) => namespace.push(metric),
                        None => error!("no namespace named: {}", metric.namespace),
                    }
                }
                telemetry.observe_push_time(push_start.elapsed());

                if ack_tx.send(msg).await.is_err() {
                    info!(worker, "ack queue closed");
                    return;
                }

                telemetry.observe_filter_time(filter_elapsed);
                telemetry.observe_processing_time(consume_start.elapsed());
            }
            pulse = async { store_tick.lock().await.recv().await } => {
                if pulse.is_none() {
                    return;
                }
                for namespace in namespaces.values() {
                    namespace.tick(last_publish_time);
                }
            }
            _ = log_tick.tick() => {
                let since = last_instant.elapsed().as_secs_f64().max(1.0);
                last_instant = std::time::Instant::now();
                info!(
                    worker,
                    "read rate: {:.3} msg/s (last publish time {last_publish_time})",
                    n_read / since
                );
                n_read = 0.0;
            }
        }
    }
}

/// Emits one store-tick pulse per period into the shared channel.
pub async fn store_ticker(period: Duration, tick_tx: mpsc::Sender<()>) {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if tick_tx.send(()).await.is_err() {
            return;
        }
    }
}

// ── Acknowledgement ──────────────────────────────────────────────────

/// Singleton ack worker: drains the ack queue back to the bus.
pub async fn acks(
    source: Arc<dyn MessageSource>,
    mut ack_rx: mpsc::Receiver<InboundMessage>,
    telemetry: Arc<Telemetry>,
) {
    let mut acked: f64 = 0.0;
    let mut last_instant = std::time::Instant::now();
    let mut log_tick = rate_log_interval();

    loop {
        tokio::select! {
            received = ack_rx.recv() => {
                let Some(msg) = received else { return };
                if let Err(e) = source.ack(&msg).await {
                    warn!("acks: {e}");
                }
                acked += 1.0;
                telemetry.inc_processed_msg();
            }
            _ = log_tick.tick() => {
                let since = last_instant.elapsed().as_secs_f64().max(1.0);
                last_instant = std::time::Instant::now();
                info!("ack rate: {:.3} msg/s", acked / since);
                acked = 0.0;
            }
        }
    }
}

// ── Monitors ─────────────────────────────────────────────────────────

/// One ticker per namespace: fires the namespace name into the monitor
/// tick queue at the namespace's cadence. Never terminates on its own.
pub async fn monitor_ticker(
    namespace: Arc<Namespace>,
    tick_tx: mpsc::Sender<String>,
    telemetry: Arc<Telemetry>,
) {
    let period = namespace.interval();
    info!(namespace = %namespace.name(), "creating monitor: every {period:?}");

    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if tick_tx.send(namespace.name().to_string()).await.is_err() {
            return;
        }
        telemetry.inc_monitors_ticks(namespace.name());
    }
}

/// Monitor worker: runs the named namespace's monitor program against a
/// full snapshot and queues every yielded value for publishing.
pub async fn monitor_worker(
    namespaces: Arc<HashMap<String, Arc<Namespace>>>,
    tick_rx: Arc<Mutex<mpsc::Receiver<String>>>,
    write_tx: mpsc::Sender<WriteJob>,
) {
    loop {
        let name = { tick_rx.lock().await.recv().await };
        let Some(name) = name else { return };
        debug!("running monitor: {name}");

        let Some(namespace) = namespaces.get(&name) else {
            error!("monitor tick for unknown namespace: {name}");
            continue;
        };

        for output in namespace.run_monitor() {
            match output {
                streamwatch_program::Output::Error(e) => error!("monitor {name}: {e}"),
                streamwatch_program::Output::Value(value) => {
                    match serde_json::to_vec(&value) {
                        Ok(payload) => {
                            let job = WriteJob {
                                namespace: name.clone(),
                                payload,
                            };
                            if write_tx.send(job).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => error!("monitor marshal: {e}"),
                    }
                }
            }
        }
    }
}

// ── Producer ─────────────────────────────────────────────────────────

/// Singleton producer: submits write jobs to the bus keyed by namespace.
/// The send callback settles the `monitors_sent` counter.
pub async fn producer(
    mut write_rx: mpsc::Receiver<WriteJob>,
    sink: Arc<dyn MessageSink>,
    telemetry: Arc<Telemetry>,
) {
    while let Some(job) = write_rx.recv().await {
        let telemetry = telemetry.clone();
        let namespace = job.namespace.clone();
        sink.send(
            job.namespace,
            job.payload,
            Box::new(move |result| match result {
                Ok(()) => telemetry.inc_monitors_sent(&namespace, "ok"),
                Err(e) => telemetry.inc_monitors_sent(&namespace, &e),
            }),
        )
        .await;
    }
}
