use crate::consumer::{ConsumerConfig, GroupConsumer};
use crate::coordinator::{Coordinator, DecodeErrorPolicy, SessionSummary};
use crate::error::Result;
use crate::format::FormatOptions;
use crate::proto::{ProtoDecoder, SchemaResolver};
use crate::sink::RecordSink;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Kafka client that prints one topic's protobuf records
pub struct Client {
    decoder: ProtoDecoder,
    config: ConsumerConfig,
    format: FormatOptions,
    policy: DecodeErrorPolicy,
}

impl Client {
    /// Create a new client by resolving `message_type` from `root_file`
    ///
    /// The schema is loaded once here; a missing file, syntax error, or
    /// unknown type fails before any connection is made.
    pub fn from_proto_file<I, P>(
        search_dirs: I,
        root_file: &str,
        message_type: &str,
        config: ConsumerConfig,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let resolved = SchemaResolver::new(search_dirs).resolve(root_file, message_type)?;
        info!(
            message = resolved.type_name(),
            fields = resolved.descriptor().fields.len(),
            "Resolved message type"
        );
        Ok(Self::new(ProtoDecoder::new(resolved), config))
    }

    pub fn new(decoder: ProtoDecoder, config: ConsumerConfig) -> Self {
        Self {
            decoder,
            config,
            format: FormatOptions::default(),
            policy: DecodeErrorPolicy::default(),
        }
    }

    pub fn with_format(mut self, format: FormatOptions) -> Self {
        self.format = format;
        self
    }

    pub fn with_decode_error_policy(mut self, policy: DecodeErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Join the group and print records to `sink` until `shutdown` fires or
    /// the session fails.
    pub async fn run(
        &self,
        sink: Arc<dyn RecordSink>,
        shutdown: CancellationToken,
    ) -> Result<SessionSummary> {
        let group = GroupConsumer::start(&self.config, shutdown.clone())?;
        let coordinator = Coordinator::new(
            self.decoder.clone(),
            self.format,
            self.policy,
            sink,
            group.acknowledger,
        );

        let result = coordinator.run(group.events, shutdown.clone()).await;

        // Stop the dispatcher whether the session ended cleanly or not.
        shutdown.cancel();
        if let Err(e) = group.dispatcher.await {
            warn!(error = %e, "Dispatcher task failed");
        }
        result
    }

    /// Get the decoder
    pub fn decoder(&self) -> &ProtoDecoder {
        &self.decoder
    }

    /// Get the config
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use kafka_types::SchemaError;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_from_proto_file() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(
            dir.path().join("event.proto"),
            "syntax = \"proto3\";\npackage ev;\nmessage Event { string id = 1; }\n",
        )
        .expect("Failed to write schema");

        let client = Client::from_proto_file(
            [dir.path()],
            "event.proto",
            "ev.Event",
            ConsumerConfig::default(),
        )
        .expect("Failed to create client");
        assert_eq!(client.decoder().descriptor().name, "ev.Event");
        assert_eq!(client.config().brokers, "localhost:9092");
    }

    #[test]
    fn test_unknown_type_fails_before_connecting() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(
            dir.path().join("event.proto"),
            "syntax = \"proto3\";\nmessage Event { string id = 1; }\n",
        )
        .expect("Failed to write schema");

        let result = Client::from_proto_file(
            [dir.path()],
            "event.proto",
            "Missing",
            ConsumerConfig::default(),
        );
        assert!(matches!(
            result,
            Err(Error::Schema(SchemaError::TypeNotFound { .. }))
        ));
    }
}
