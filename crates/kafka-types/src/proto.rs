//! Protobuf descriptor graph.
//!
//! These types are the runtime metadata the decoder walks instead of
//! generated code. A [`SchemaGraph`] is built once by the resolver in the
//! kafka-protobuf crate and is never mutated afterwards, so it is shared
//! behind an `Arc` by every decode call.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Wire type carried in the low three bits of a field tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    /// Map the tag's wire type bits. Groups (3, 4) and the reserved values are
    /// rejected by returning `None`.
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(WireType::Varint),
            1 => Some(WireType::Fixed64),
            2 => Some(WireType::LengthDelimited),
            5 => Some(WireType::Fixed32),
            _ => None,
        }
    }
}

/// Protobuf scalar field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarKind {
    /// Wire type a single (unpacked) value of this kind is encoded with.
    pub fn wire_type(self) -> WireType {
        match self {
            ScalarKind::Int32
            | ScalarKind::Int64
            | ScalarKind::Uint32
            | ScalarKind::Uint64
            | ScalarKind::Sint32
            | ScalarKind::Sint64
            | ScalarKind::Bool => WireType::Varint,
            ScalarKind::Double | ScalarKind::Fixed64 | ScalarKind::Sfixed64 => WireType::Fixed64,
            ScalarKind::Float | ScalarKind::Fixed32 | ScalarKind::Sfixed32 => WireType::Fixed32,
            ScalarKind::String | ScalarKind::Bytes => WireType::LengthDelimited,
        }
    }

    /// Whether repeated values of this kind may be packed into one blob.
    pub fn is_packable(self) -> bool {
        self.wire_type() != WireType::LengthDelimited
    }

    /// 64-bit integer kinds, rendered as decimal strings.
    pub fn is_64_bit_integer(self) -> bool {
        matches!(
            self,
            ScalarKind::Int64
                | ScalarKind::Uint64
                | ScalarKind::Sint64
                | ScalarKind::Fixed64
                | ScalarKind::Sfixed64
        )
    }

    pub fn type_name(self) -> &'static str {
        match self {
            ScalarKind::Double => "double",
            ScalarKind::Float => "float",
            ScalarKind::Int32 => "int32",
            ScalarKind::Int64 => "int64",
            ScalarKind::Uint32 => "uint32",
            ScalarKind::Uint64 => "uint64",
            ScalarKind::Sint32 => "sint32",
            ScalarKind::Sint64 => "sint64",
            ScalarKind::Fixed32 => "fixed32",
            ScalarKind::Fixed64 => "fixed64",
            ScalarKind::Sfixed32 => "sfixed32",
            ScalarKind::Sfixed64 => "sfixed64",
            ScalarKind::Bool => "bool",
            ScalarKind::String => "string",
            ScalarKind::Bytes => "bytes",
        }
    }
}

impl std::fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Declared type of a field.
///
/// Message and enum references hold the fully-qualified type name (without a
/// leading dot) and are resolved against the owning [`SchemaGraph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarKind),
    Message(String),
    Enum(String),
}

impl FieldKind {
    /// Wire type a single (unpacked) value of this kind is encoded with.
    pub fn wire_type(&self) -> WireType {
        match self {
            FieldKind::Scalar(kind) => kind.wire_type(),
            FieldKind::Message(_) => WireType::LengthDelimited,
            FieldKind::Enum(_) => WireType::Varint,
        }
    }

    pub fn is_packable(&self) -> bool {
        match self {
            FieldKind::Scalar(kind) => kind.is_packable(),
            FieldKind::Message(_) => false,
            FieldKind::Enum(_) => true,
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::Scalar(kind) => write!(f, "{kind}"),
            FieldKind::Message(name) => write!(f, "message:{name}"),
            FieldKind::Enum(name) => write!(f, "enum:{name}"),
        }
    }
}

/// Describes a single field in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name as declared in the schema
    pub name: String,
    /// Field number (tag)
    pub number: u32,
    /// Declared type
    pub kind: FieldKind,
    /// Whether the field is repeated
    pub is_repeated: bool,
    /// Whether the field is a `map<K, V>`; implies `is_repeated` and a
    /// `FieldKind::Message` pointing at the synthesized entry type
    pub is_map: bool,
    /// Whether the schema asks for packed encoding. The decoder accepts both
    /// encodings regardless.
    pub is_packed: bool,
}

/// Describes a message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescriptor {
    /// Fully qualified message name (e.g. "mypackage.Outer.Inner")
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<FieldDescriptor>,
    /// Whether this is a synthesized map entry (`key = 1`, `value = 2`)
    pub is_map_entry: bool,
    by_number: HashMap<u32, usize>,
}

impl MessageDescriptor {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>, is_map_entry: bool) -> Self {
        let by_number = fields
            .iter()
            .enumerate()
            .map(|(index, field)| (field.number, index))
            .collect();
        Self {
            name: name.into(),
            fields,
            is_map_entry,
            by_number,
        }
    }

    /// Position of the field with this number in declaration order.
    pub fn field_index(&self, number: u32) -> Option<usize> {
        self.by_number.get(&number).copied()
    }

    pub fn field_by_number(&self, number: u32) -> Option<&FieldDescriptor> {
        self.field_index(number).map(|index| &self.fields[index])
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// List all field names in declaration order.
    pub fn list_fields(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Simple (unqualified) name.
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// Describes an enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDescriptor {
    /// Fully qualified enum name
    pub name: String,
    /// (symbol, number) pairs in declaration order
    pub values: Vec<(String, i32)>,
}

impl EnumDescriptor {
    /// Symbol for a numeric value. With `allow_alias` the first declared
    /// symbol wins.
    pub fn symbol(&self, number: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, n)| *n == number)
            .map(|(name, _)| name.as_str())
    }
}

/// One parsed schema file and its import edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaFile {
    /// Logical path, relative to the search directory it was found in
    pub path: String,
    /// Declared package, if any
    pub package: Option<String>,
    /// Logical paths of the files this one imports
    pub imports: Vec<String>,
    /// Fully qualified names of the messages declared in this file, nested
    /// messages included
    pub messages: Vec<String>,
}

/// Immutable set of parsed schema files with every message and enum they
/// declare, keyed by fully qualified name.
#[derive(Debug, Clone, Default)]
pub struct SchemaGraph {
    files: BTreeMap<String, SchemaFile>,
    messages: HashMap<String, Arc<MessageDescriptor>>,
    enums: HashMap<String, EnumDescriptor>,
}

impl SchemaGraph {
    pub fn new(
        files: Vec<SchemaFile>,
        messages: Vec<MessageDescriptor>,
        enums: Vec<EnumDescriptor>,
    ) -> Self {
        Self {
            files: files.into_iter().map(|f| (f.path.clone(), f)).collect(),
            messages: messages
                .into_iter()
                .map(|m| (m.name.clone(), Arc::new(m)))
                .collect(),
            enums: enums.into_iter().map(|e| (e.name.clone(), e)).collect(),
        }
    }

    /// Get a message descriptor by fully qualified name.
    pub fn message(&self, name: &str) -> Option<&MessageDescriptor> {
        self.message_arc(name).map(|m| m.as_ref())
    }

    /// Shared handle to a message descriptor, for holders that outlive a
    /// borrow of the graph.
    pub fn message_arc(&self, name: &str) -> Option<&Arc<MessageDescriptor>> {
        self.messages.get(name.strip_prefix('.').unwrap_or(name))
    }

    pub fn messages(&self) -> impl Iterator<Item = &MessageDescriptor> {
        self.messages.values().map(|m| m.as_ref())
    }

    /// Get an enum descriptor by fully qualified name.
    pub fn enum_type(&self, name: &str) -> Option<&EnumDescriptor> {
        self.enums.get(name.strip_prefix('.').unwrap_or(name))
    }

    pub fn file(&self, path: &str) -> Option<&SchemaFile> {
        self.files.get(path)
    }

    pub fn files(&self) -> impl Iterator<Item = &SchemaFile> {
        self.files.values()
    }

    /// List all message type names, sorted.
    pub fn list_messages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.messages.keys().cloned().collect();
        names.sort();
        names
    }

    /// Messages whose fully qualified name ends with `.{simple}` or equals it.
    /// `simple` may itself be a dotted suffix such as `Outer.Inner`.
    pub fn messages_named(&self, simple: &str) -> Vec<&Arc<MessageDescriptor>> {
        let suffix = format!(".{simple}");
        self.messages
            .values()
            .filter(|m| m.name == simple || m.name.ends_with(&suffix))
            .collect()
    }
}
