//! Text rendering of decoded value trees.
//!
//! Records render as JSON objects whose keys follow field declaration order.
//! 64-bit integers are already decimal strings in the tree and stay strings,
//! bytes are base64, enums render as their symbol or, when the number has no
//! symbol, its decimal string.

use crate::error::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kafka_types::{MessageNode, ScalarValue, ValueNode};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// Line written after each record when separators are enabled.
pub const RECORD_SEPARATOR: &str = "---";

/// Output formatting options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatOptions {
    /// Indent nested structures over multiple lines.
    pub pretty: bool,
    /// Follow every record with [`RECORD_SEPARATOR`] on its own line.
    pub with_separator: bool,
}

/// Render one record. The result carries no trailing newline.
pub fn format(node: &ValueNode, options: &FormatOptions) -> Result<String> {
    let mut text = if options.pretty {
        serde_json::to_string_pretty(&Render(node))?
    } else {
        serde_json::to_string(&Render(node))?
    };
    if options.with_separator {
        text.push('\n');
        text.push_str(RECORD_SEPARATOR);
    }
    Ok(text)
}

/// Serialize adapter over a value tree.
struct Render<'a>(&'a ValueNode);

impl Serialize for Render<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.0 {
            ValueNode::Scalar(scalar) => serialize_scalar(&scalar.value, serializer),
            ValueNode::Enum(symbol) => serializer.serialize_str(&symbol.display_name()),
            ValueNode::Message(message) => RenderMessage(message).serialize(serializer),
            ValueNode::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&Render(item))?;
                }
                seq.end()
            }
        }
    }
}

struct RenderMessage<'a>(&'a MessageNode);

impl Serialize for RenderMessage<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0.fields {
            map.serialize_entry(name, &Render(value))?;
        }
        map.end()
    }
}

fn serialize_scalar<S: Serializer>(
    value: &ScalarValue,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        ScalarValue::Bool(b) => serializer.serialize_bool(*b),
        ScalarValue::Int(i) => serializer.serialize_i32(*i),
        ScalarValue::Uint(u) => serializer.serialize_u32(*u),
        ScalarValue::Float(f) => serialize_float(f64::from(*f), serializer),
        ScalarValue::Double(d) => serialize_float(*d, serializer),
        ScalarValue::Decimal(text) | ScalarValue::String(text) => serializer.serialize_str(text),
        ScalarValue::Bytes(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
    }
}

// JSON has no literal for non-finite numbers.
fn serialize_float<S: Serializer>(value: f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if value.is_nan() {
        serializer.serialize_str("NaN")
    } else if value.is_infinite() {
        serializer.serialize_str(if value > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        serializer.serialize_f64(value)
    }
}
