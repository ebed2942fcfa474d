use async_trait::async_trait;
use kafka_protobuf::{Client, ConsumerConfig, FormatOptions, RecordSink};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Example printing a topic's records with a custom sink
///
/// This example shows how to:
/// 1. Resolve a message type from a .proto file on disk
/// 2. Create a client for a consumer group
/// 3. Plug in a sink that numbers every record
/// 4. Stop the session with a cancellation token
///
/// To run this example:
/// 1. Start Kafka with Docker
///   docker run -d --name kafka -p 9092:9092 apache/kafka:latest
/// 2. Produce some `example.UserEvent` records to `user-events`
/// 3. Run the example
///   cargo run --example print_topic

struct NumberedSink {
    count: AtomicU64,
}

#[async_trait]
impl RecordSink for NumberedSink {
    async fn write_record(&self, text: &str) -> io::Result<()> {
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        println!("#{n} {text}");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    if let Err(e) = run_main().await {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}

async fn run_main() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(
        dir.path().join("user_event.proto"),
        r#"
        syntax = "proto3";

        package example;

        message UserEvent {
            string user_id = 1;
            string event_type = 2;
            int64 timestamp = 3;
            string data = 4;
        }
    "#,
    )?;

    let config = ConsumerConfig {
        brokers: "localhost:9092".to_string(),
        group_id: "print-topic-example".to_string(),
        topic: "user-events".to_string(),
        auto_offset_reset: "earliest".to_string(),
        ..Default::default()
    };

    let client = Client::from_proto_file([dir.path()], "user_event.proto", "example.UserEvent", config)?
        .with_format(FormatOptions {
            pretty: true,
            with_separator: false,
        });

    let shutdown = CancellationToken::new();
    let stop = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        stop.cancel();
    });

    let sink = Arc::new(NumberedSink {
        count: AtomicU64::new(0),
    });
    let summary = client.run(sink, shutdown).await?;
    println!(
        "Printed {} records, skipped {}",
        summary.records_written, summary.records_skipped
    );
    Ok(())
}
