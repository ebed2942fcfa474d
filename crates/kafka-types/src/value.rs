//! Generic decoded value tree.
//!
//! A [`ValueNode`] is built fresh for every decoded record and handed to the
//! formatter. Consumers match on the four variants instead of reflecting on
//! generated types.

use crate::proto::ScalarKind;

/// Decoded value of a scalar field.
///
/// 64-bit integers are held as decimal text so they survive serialization
/// to formats with a 53-bit numeric range.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    /// 32-bit signed kinds (`int32`, `sint32`, `sfixed32`)
    Int(i32),
    /// 32-bit unsigned kinds (`uint32`, `fixed32`)
    Uint(u32),
    Float(f32),
    Double(f64),
    /// 64-bit integer kinds, in decimal
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
}

/// A scalar value tagged with its declared kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Scalar {
    pub kind: ScalarKind,
    pub value: ScalarValue,
}

impl Scalar {
    pub fn new(kind: ScalarKind, value: ScalarValue) -> Self {
        Self { kind, value }
    }

    /// Zero value of a kind, used for map entries that omit their value.
    pub fn default_for(kind: ScalarKind) -> Self {
        let value = match kind {
            ScalarKind::Bool => ScalarValue::Bool(false),
            ScalarKind::Int32 | ScalarKind::Sint32 | ScalarKind::Sfixed32 => ScalarValue::Int(0),
            ScalarKind::Uint32 | ScalarKind::Fixed32 => ScalarValue::Uint(0),
            ScalarKind::Float => ScalarValue::Float(0.0),
            ScalarKind::Double => ScalarValue::Double(0.0),
            ScalarKind::Int64
            | ScalarKind::Uint64
            | ScalarKind::Sint64
            | ScalarKind::Fixed64
            | ScalarKind::Sfixed64 => ScalarValue::Decimal("0".to_string()),
            ScalarKind::String => ScalarValue::String(String::new()),
            ScalarKind::Bytes => ScalarValue::Bytes(Vec::new()),
        };
        Self { kind, value }
    }

    /// Text form used as a map key.
    pub fn key_text(&self) -> String {
        match &self.value {
            ScalarValue::Bool(b) => b.to_string(),
            ScalarValue::Int(i) => i.to_string(),
            ScalarValue::Uint(u) => u.to_string(),
            ScalarValue::Float(f) => f.to_string(),
            ScalarValue::Double(d) => d.to_string(),
            ScalarValue::Decimal(s) | ScalarValue::String(s) => s.clone(),
            ScalarValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }
}

/// Decoded enum value. `symbol` is `None` when the number has no name in
/// the descriptor; it then renders as the decimal number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumSymbol {
    pub symbol: Option<String>,
    pub number: i32,
}

impl EnumSymbol {
    /// Symbolic name, falling back to the decimal number.
    pub fn display_name(&self) -> String {
        match &self.symbol {
            Some(symbol) => symbol.clone(),
            None => self.number.to_string(),
        }
    }
}

/// Ordered field name → value pairs.
///
/// Field order follows descriptor declaration order for messages and arrival
/// order for map entries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageNode {
    pub type_name: String,
    pub fields: Vec<(String, ValueNode)>,
}

impl MessageNode {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ValueNode> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Insert or replace a key, keeping the position of the first insertion.
    pub fn upsert(&mut self, name: String, value: ValueNode) {
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
    }
}

/// Generic decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueNode {
    Scalar(Scalar),
    Enum(EnumSymbol),
    Message(MessageNode),
    List(Vec<ValueNode>),
}

impl ValueNode {
    pub fn as_message(&self) -> Option<&MessageNode> {
        match self {
            ValueNode::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ValueNode]> {
        match self {
            ValueNode::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            ValueNode::Scalar(s) => Some(s),
            _ => None,
        }
    }
}
