use kafka_types::{DecodeError, SchemaError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Protobuf decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Decode error on {topic}[{partition}] at offset {offset}: {source}")]
    RecordDecode {
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: DecodeError,
    },

    #[error("Delivery error: {message}")]
    Delivery { message: String, fatal: bool },

    #[error("Failed to render record: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Output sink error: {0}")]
    Sink(#[source] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid session transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: crate::coordinator::SessionState,
        to: crate::coordinator::SessionState,
    },

    #[error("Partition worker for {0} failed to join: {1}")]
    Worker(String, String),
}

pub type Result<T> = std::result::Result<T, Error>;
