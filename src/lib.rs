//! Library side of `kafka-protobuf-console-consumer`.
//!
//! Holds the command-line configuration and the [`run`] entry point so the
//! binary stays a thin wrapper and the wiring can be tested without a broker.

use anyhow::Context;
use clap::Parser;
use kafka_protobuf::{
    Client, ConsumerConfig, DecodeErrorPolicy, FormatOptions, RecordSink, SessionSummary,
    WriterSink,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use kafka_protobuf;
pub use kafka_types;

/// Prefix of generated consumer group names.
pub const GROUP_PREFIX: &str = "kafka-protobuf-console-consumer";

/// Command-line configuration.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "kafka-protobuf-console-consumer",
    version,
    about = "Print protobuf-encoded Kafka records as JSON"
)]
pub struct Config {
    /// Kafka brokers (comma-separated)
    #[clap(
        short = 'b',
        long,
        value_delimiter = ',',
        default_value = "localhost:9092",
        env = "KAFKA_BROKERS"
    )]
    pub broker_list: Vec<String>,
    /// Consumer group to join. A unique group is generated when absent.
    #[clap(short = 'c', long)]
    pub consumer_group: Option<String>,
    /// Topic to consume from
    #[clap(short = 't', long)]
    pub topic: String,
    /// Schema search directory; repeat for every directory imports live in.
    /// Defaults to the current directory.
    #[clap(long = "proto-dir")]
    pub proto_dirs: Vec<PathBuf>,
    /// Root schema file, relative to a search directory (e.g. baz/a.proto)
    #[clap(long)]
    pub file: String,
    /// Fully-qualified protobuf message name
    #[clap(long)]
    pub message: String,
    /// Start from the earliest offset when the group has none committed
    #[clap(long)]
    pub from_beginning: bool,
    /// Indent output
    #[clap(long)]
    pub pretty: bool,
    /// Print a separator line after every record. Useful with --pretty.
    #[clap(long)]
    pub with_separator: bool,
    /// Enable debug logs, including the Kafka client's own
    #[clap(short = 'd', long)]
    pub debug: bool,
    /// What to do with records that fail to decode: skip or abort
    #[clap(long, default_value = "skip")]
    pub on_decode_error: DecodeErrorPolicy,
    /// Session timeout in milliseconds
    #[clap(long, default_value = "6000")]
    pub session_timeout_ms: String,
    /// Broker version to assume when API version discovery is unavailable
    #[clap(long, default_value = "0.10.2")]
    pub broker_version_fallback: String,
    /// Records buffered per partition before fetching from it pauses
    #[clap(long, default_value = "256")]
    pub partition_buffer: usize,
}

impl Config {
    /// Check required parameters before anything connects.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.brokers().is_empty() {
            anyhow::bail!("at least one broker is required (--broker-list)");
        }
        if self.topic.trim().is_empty() {
            anyhow::bail!("a topic is required (--topic)");
        }
        if self.file.trim().is_empty() {
            anyhow::bail!("a root schema file is required (--file)");
        }
        if self.message.trim().is_empty() {
            anyhow::bail!("a message type is required (--message)");
        }
        self.session_timeout_ms
            .parse::<u32>()
            .with_context(|| {
                format!(
                    "--session-timeout-ms must be a number of milliseconds, got '{}'",
                    self.session_timeout_ms
                )
            })?;
        if self.partition_buffer == 0 {
            anyhow::bail!("--partition-buffer must be at least 1");
        }
        Ok(())
    }

    /// Non-empty, trimmed broker addresses.
    pub fn brokers(&self) -> Vec<&str> {
        self.broker_list
            .iter()
            .map(|b| b.trim())
            .filter(|b| !b.is_empty())
            .collect()
    }

    pub fn search_dirs(&self) -> Vec<PathBuf> {
        if self.proto_dirs.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            self.proto_dirs.clone()
        }
    }

    /// The configured group, or a fresh one named after the current time.
    pub fn group_id(&self) -> String {
        match &self.consumer_group {
            Some(group) if !group.is_empty() => group.clone(),
            _ => {
                let millis = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis())
                    .unwrap_or_default();
                format!("{GROUP_PREFIX}-{millis}")
            }
        }
    }

    pub fn consumer_config(&self, group_id: String) -> ConsumerConfig {
        ConsumerConfig {
            brokers: self.brokers().join(","),
            group_id,
            topic: self.topic.clone(),
            auto_offset_reset: if self.from_beginning {
                "earliest".to_string()
            } else {
                "latest".to_string()
            },
            session_timeout_ms: self.session_timeout_ms.clone(),
            broker_version_fallback: self.broker_version_fallback.clone(),
            api_version_request: true,
            debug: self.debug,
            partition_buffer: self.partition_buffer,
        }
    }

    pub fn format_options(&self) -> FormatOptions {
        FormatOptions {
            pretty: self.pretty,
            with_separator: self.with_separator,
        }
    }

    /// Default log filter when `RUST_LOG` is unset.
    pub fn default_log_filter(&self) -> &'static str {
        if self.debug {
            "warn,kafka_protobuf=debug,kafka_protobuf_console_consumer=debug,librdkafka=debug"
        } else {
            "warn"
        }
    }
}

/// Resolve the schema, then consume the topic to stdout until Ctrl-C or a
/// fatal error.
pub async fn run(config: Config) -> anyhow::Result<SessionSummary> {
    config.validate().context("Invalid configuration")?;

    let group_id = config.group_id();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        brokers = ?config.brokers(),
        group = %group_id,
        "Starting consumer"
    );

    let client = Client::from_proto_file(
        config.search_dirs(),
        &config.file,
        &config.message,
        config.consumer_config(group_id),
    )
    .with_context(|| format!("Failed to load message {} from {}", config.message, config.file))?
    .with_format(config.format_options())
    .with_decode_error_policy(config.on_decode_error);

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupted, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
        ctrl_c.cancel();
    });

    let sink: Arc<dyn RecordSink> = Arc::new(WriterSink::stdout());
    let summary = client
        .run(sink, shutdown)
        .await
        .context("Consumer session failed")?;
    info!(
        written = summary.records_written,
        skipped = summary.records_skipped,
        "Consumer stopped"
    );
    Ok(summary)
}
