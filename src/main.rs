//! Command-line interface for kafka-protobuf-console-consumer
//!
//! # Usage Examples
//!
//! ```bash
//! # Print new records of a topic, resolving imports from two directories
//! kafka-protobuf-console-consumer \
//!   --broker-list localhost:9092 \
//!   --topic users \
//!   --proto-dir /schemas/common --proto-dir /schemas/users \
//!   --file users/v1/user.proto \
//!   --message users.v1.User
//!
//! # Replay the topic from the beginning, indented, with separators
//! kafka-protobuf-console-consumer -t users --from-beginning --pretty --with-separator \
//!   --proto-dir /schemas --file users/v1/user.proto --message users.v1.User
//! ```
//!
//! Records go to stdout, one per line. Logs and decode diagnostics go to
//! stderr; set `RUST_LOG` to override the default filter.

use clap::Parser;
use kafka_protobuf_console_consumer::{run, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing on stderr so stdout carries only records
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(config).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
