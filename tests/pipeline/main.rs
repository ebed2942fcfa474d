//! Pipeline tests
//!
//! Exercise schema resolution, decoding, formatting, and the consumption
//! coordinator together. No broker is needed: records are fed through the
//! same event channel the rdkafka adapter uses.

mod common;
mod decode_format;
mod schema_imports;
mod session;
