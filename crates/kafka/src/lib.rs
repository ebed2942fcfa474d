//! Kafka consumer library that prints protobuf-encoded records as JSON.
//!
//! Features:
//!
//! - Runtime Protobuf Support: Load `.proto` files and their imports at runtime and decode
//!   payloads without code generation
//! - Consumer Groups: Join a consumer group and consume each claimed partition in its own task
//! - At-least-once Output: Offsets are committed only after a record has been written out
//! - Compact or Pretty Output: Declaration-ordered JSON, one record per line or indented

/// High-level API for running a consumer session
///
/// Resolves the message type once, then joins the group and drives the
/// coordinator until shutdown.
pub mod client;

/// rdkafka adapter: client configuration, rebalance callbacks, record
/// dispatch, and offset commits
pub mod consumer;

/// Per-partition workers and the group session state machine
pub mod coordinator;
pub mod error;
pub mod format;
pub mod proto;
pub mod sink;

// Re-export main types for easy access
pub use client::Client;
pub use consumer::{ConsumerConfig, GroupConsumer, DEFAULT_PARTITION_BUFFER};
pub use coordinator::{
    Acknowledger, Coordinator, DecodeErrorPolicy, GroupEvent, PartitionFeed, SessionState,
    SessionSummary,
};
pub use error::{Error, Result};
pub use format::{format, FormatOptions, RECORD_SEPARATOR};
pub use proto::decoder::ProtoDecoder;
pub use proto::resolver::{ResolvedMessage, SchemaResolver};
pub use sink::{RecordSink, WriterSink};
