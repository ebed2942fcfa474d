//! Shared data model for kafka-protobuf-console-consumer.
//!
//! This crate defines the types that flow between the schema resolver, the
//! wire decoder, the output formatter and the consumption coordinator. It has
//! no knowledge of Kafka clients or `.proto` parsing.
//!
//! # Architecture
//!
//! ```text
//! .proto files ──resolver──> SchemaGraph ──lookup──> MessageDescriptor
//! StreamRecord.value ──decoder(MessageDescriptor)──> ValueNode ──formatter──> text
//! ```
//!
//! # Modules
//!
//! - [`proto`] - Immutable descriptor graph (`SchemaGraph`, `MessageDescriptor`, ...)
//! - [`value`] - Generic decoded value tree (`ValueNode`)
//! - [`message`] - Records delivered by the group-consumption client
//! - [`error`] - Schema and decode error types

pub mod error;
pub mod message;
pub mod proto;
pub mod value;

pub use error::{DecodeError, SchemaError};
pub use message::{StreamRecord, TopicPartition};
pub use proto::{
    EnumDescriptor, FieldDescriptor, FieldKind, MessageDescriptor, ScalarKind, SchemaFile,
    SchemaGraph, WireType,
};
pub use value::{EnumSymbol, MessageNode, Scalar, ScalarValue, ValueNode};
