//! Runtime protobuf support: schema resolution and wire-format decoding.

pub mod decoder;
pub mod resolver;

pub use decoder::{ProtoDecoder, RECURSION_LIMIT};
pub use resolver::{ResolvedMessage, SchemaResolver};
