//! Error types for schema resolution and payload decoding.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building the schema graph or resolving a type in it.
///
/// Every variant is fatal to startup: no record can be decoded without a
/// resolved descriptor.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema file not found: {path} (searched: {})", display_dirs(.search_dirs))]
    FileNotFound {
        path: String,
        search_dirs: Vec<PathBuf>,
    },

    #[error("Schema syntax error in {file}{}: {message}", display_line(.line))]
    Syntax {
        file: String,
        line: Option<u32>,
        message: String,
    },

    #[error("Import cycle detected: {}", .chain.join(" -> "))]
    ImportCycle { chain: Vec<String> },

    #[error("Message type not found: {type_name}")]
    TypeNotFound { type_name: String },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn display_dirs(dirs: &[PathBuf]) -> String {
    dirs.iter()
        .map(|d| d.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn display_line(line: &Option<u32>) -> String {
    match line {
        Some(line) => format!(":{line}"),
        None => String::new(),
    }
}

/// Errors raised while decoding a single payload.
///
/// Offsets are byte positions into the top-level payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed wire format at byte {offset}: {reason}")]
    MalformedWireFormat { offset: u64, reason: String },

    #[error("Invalid UTF-8 in string field at byte {offset}")]
    InvalidUtf8 { offset: u64 },

    #[error("Message nesting exceeds recursion limit at byte {offset}")]
    RecursionLimit { offset: u64 },

    #[error("Type referenced by descriptor is missing from the schema graph: {type_name}")]
    UnresolvedType { type_name: String },
}

impl DecodeError {
    pub fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        DecodeError::MalformedWireFormat {
            offset,
            reason: reason.into(),
        }
    }

    /// Byte offset at fault, when the error is tied to a payload position.
    pub fn offset(&self) -> Option<u64> {
        match self {
            DecodeError::MalformedWireFormat { offset, .. }
            | DecodeError::InvalidUtf8 { offset }
            | DecodeError::RecursionLimit { offset } => Some(*offset),
            DecodeError::UnresolvedType { .. } => None,
        }
    }
}
