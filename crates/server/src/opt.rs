//! CLI options.
//!
//! Flag names are the historical ones (underscores, and one long-standing
//! misspelling) so existing deployment manifests keep working.

use std::path::PathBuf;

use clap::Parser;
use streamwatch_bus::{ConsumerConfig, EndpointConfig, ProducerConfig};

#[derive(Parser, Debug)]
#[command(name = "streamwatch", version, about = "Streaming metrics aggregation engine")]
pub struct Opt {
    #[arg(long = "source_pulsar", default_value = "pulsar://localhost:6650", help = "Source pulsar address")]
    pub source_pulsar: String,

    #[arg(long = "source_topic", default_value = "persistent://public/default/in", help = "Source topic names (separated by ;)")]
    pub source_topic: String,

    #[arg(long = "source_subscription", default_value = "streaming_monitors", help = "Source subscription name")]
    pub source_subscription: String,

    #[arg(long = "source_name", default_value = "streaming_monitors_consumer", help = "Source consumer name")]
    pub source_name: String,

    #[arg(long = "source_trust_certs", default_value = "", help = "Path for source pem file, for ca.cert")]
    pub source_trust_certs: String,

    #[arg(long = "source_cert_file", default_value = "", help = "Path for source cert.pem file")]
    pub source_cert_file: String,

    #[arg(long = "source_key_file", default_value = "", help = "Path for source key-pk8.pem file")]
    pub source_key_file: String,

    #[arg(long = "source_allow_insecure_connection", help = "Source allow insecure connection")]
    pub source_allow_insecure_connection: bool,

    #[arg(long = "dest_pulsar", default_value = "pulsar://localhost:6650", help = "Destination pulsar address")]
    pub dest_pulsar: String,

    #[arg(long = "dest_topic", default_value = "persistent://public/default/out", help = "Destination topic name")]
    pub dest_topic: String,

    #[arg(long = "dest_name", default_value = "streaming_monitors_producer", help = "Destination producer name")]
    pub dest_name: String,

    #[arg(long = "dest_trust_certs", default_value = "", help = "Path for destination pem file, for ca.cert")]
    pub dest_trust_certs: String,

    #[arg(long = "dest_cert_file", default_value = "", help = "Path for destination cert.pem file")]
    pub dest_cert_file: String,

    #[arg(long = "dest_key_file", default_value = "", help = "Path for destination key-pk8.pem file")]
    pub dest_key_file: String,

    #[arg(long = "dest_allow_insecure_connection", help = "Dest allow insecure connection")]
    pub dest_allow_insecure_connection: bool,

    #[arg(long = "batch_max_publish_delay", default_value_t = 100, help = "How long to wait for batching in milliseconds")]
    pub batch_max_publish_delay: u64,

    #[arg(long = "batch_max_messages", default_value_t = 300, help = "Max batch messages")]
    pub batch_max_messages: u32,

    #[arg(long = "batch_max_size", default_value_t = 131_072, help = "Max batch size in bytes")]
    pub batch_max_size: usize,

    #[arg(long = "consumer_threads", default_value_t = 6, help = "Number of consumer workers")]
    pub consumer_threads: usize,

    #[arg(long = "monitor_threads", default_value_t = 2, help = "Number of monitor workers")]
    pub monitor_threads: usize,

    #[arg(long = "monitors_dir", default_value = "./monitors", help = "Directory of all the jq monitor files")]
    pub monitors_dir: PathBuf,

    #[arg(long = "ticker_seconds", default_value_t = 1, help = "Period of the store tick pulse in seconds")]
    pub ticker_seconds: u64,

    #[arg(long = "prometheus_port", default_value_t = 7700, help = "Prometheus port (0 disables the endpoint)")]
    pub prometheus_port: u16,

    // The flag name is misspelled; operators depend on it as-is.
    #[arg(long = "activatete_timing_colection", help = "Collect processing-time metrics (may hinder performance!)")]
    pub activate_timing_collection: bool,

    #[arg(long = "pprof_on", help = "Profiling on?")]
    pub pprof_on: bool,

    #[arg(long = "pprof_dir", default_value = "./pprof", help = "Directory for profile output")]
    pub pprof_dir: PathBuf,

    #[arg(long = "pprof_duration", default_value_t = 120, help = "Number of seconds to sample the CPU")]
    pub pprof_duration: u64,

    #[arg(long = "log_level", default_value = "info", help = "Logging level: panic - fatal - error - warn - info - debug - trace")]
    pub log_level: String,
}

impl Opt {
    pub fn source_endpoint(&self) -> EndpointConfig {
        EndpointConfig {
            url: self.source_pulsar.clone(),
            trust_certs: self.source_trust_certs.clone(),
            cert_file: self.source_cert_file.clone(),
            key_file: self.source_key_file.clone(),
            allow_insecure: self.source_allow_insecure_connection,
        }
    }

    pub fn dest_endpoint(&self) -> EndpointConfig {
        EndpointConfig {
            url: self.dest_pulsar.clone(),
            trust_certs: self.dest_trust_certs.clone(),
            cert_file: self.dest_cert_file.clone(),
            key_file: self.dest_key_file.clone(),
            allow_insecure: self.dest_allow_insecure_connection,
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            topics: self
                .source_topic
                .split(';')
                .filter(|topic| !topic.is_empty())
                .map(str::to_string)
                .collect(),
            subscription: self.source_subscription.clone(),
            name: self.source_name.clone(),
        }
    }

    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            topic: self.dest_topic.clone(),
            name: self.dest_name.clone(),
            batch_max_messages: self.batch_max_messages,
            batch_max_size: self.batch_max_size,
            batch_max_publish_delay_ms: self.batch_max_publish_delay,
        }
    }
}
