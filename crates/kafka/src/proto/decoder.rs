//! Protobuf decoder implementation.
//!
//! Walks a binary payload tag by tag and decodes each known field against
//! the runtime descriptor from the resolver, producing a [`ValueNode`] tree
//! from kafka-types. Unknown fields are skipped. Decoding either returns a
//! complete tree or an error; nothing is shared or mutated on failure.

use crate::proto::resolver::ResolvedMessage;
use kafka_types::{
    DecodeError, EnumSymbol, FieldDescriptor, FieldKind, MessageDescriptor, MessageNode, Scalar,
    ScalarKind, ScalarValue, SchemaGraph, ValueNode, WireType,
};
use protobuf::CodedInputStream;
use std::sync::Arc;

/// Maximum depth of embedded messages, matching the protobuf runtime default.
pub const RECURSION_LIMIT: u32 = 100;

type Result<T> = std::result::Result<T, DecodeError>;

/// Runtime protobuf decoder.
///
/// Holds the resolved root type and the graph it lives in. Cheap to clone
/// and safe to share across partition workers.
#[derive(Debug, Clone)]
pub struct ProtoDecoder {
    message: ResolvedMessage,
}

impl ProtoDecoder {
    pub fn new(message: ResolvedMessage) -> Self {
        Self { message }
    }

    pub fn graph(&self) -> &Arc<SchemaGraph> {
        self.message.graph()
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        self.message.descriptor()
    }

    /// Decode a payload as the resolved root type.
    pub fn decode(&self, data: &[u8]) -> Result<ValueNode> {
        self.decode_as(self.message.descriptor(), data)
    }

    /// Decode a payload as any message type of the graph.
    pub fn decode_as(&self, descriptor: &MessageDescriptor, data: &[u8]) -> Result<ValueNode> {
        let mut stream = CodedInputStream::from_bytes(data);
        let node = self.decode_message(descriptor, &mut stream, data.len() as u64, 0, None)?;
        Ok(ValueNode::Message(node))
    }

    fn decode_message(
        &self,
        descriptor: &MessageDescriptor,
        stream: &mut CodedInputStream,
        end: u64,
        depth: u32,
        prior: Option<MessageNode>,
    ) -> Result<MessageNode> {
        // One slot per declared field so output follows declaration order.
        let mut slots: Vec<Option<ValueNode>> = vec![None; descriptor.fields.len()];
        if let Some(prior) = prior {
            for (name, value) in prior.fields {
                if let Some(index) = descriptor.fields.iter().position(|f| f.name == name) {
                    slots[index] = Some(value);
                }
            }
        }

        while stream.pos() < end {
            let tag_at = stream.pos();
            let tag = stream
                .read_raw_varint32()
                .map_err(|e| DecodeError::malformed(tag_at, format!("bad tag: {e}")))?;

            let number = tag >> 3;
            if number == 0 {
                return Err(DecodeError::malformed(tag_at, "field number 0 is invalid"));
            }
            let wire_type = WireType::from_bits(tag & 7).ok_or_else(|| {
                DecodeError::malformed(
                    tag_at,
                    format!("unsupported wire type {} for field {number}", tag & 7),
                )
            })?;

            match descriptor.field_index(number) {
                Some(index) => {
                    let field = &descriptor.fields[index];
                    self.decode_field(field, wire_type, stream, end, depth, &mut slots[index])?;
                }
                None => skip_value(stream, wire_type, end)?,
            }

            if stream.pos() > end {
                return Err(DecodeError::malformed(
                    tag_at,
                    format!("field {number} overruns its enclosing message"),
                ));
            }
        }

        let mut node = MessageNode::new(descriptor.name.clone());
        node.fields = descriptor
            .fields
            .iter()
            .zip(slots)
            .filter_map(|(field, slot)| slot.map(|value| (field.name.clone(), value)))
            .collect();
        Ok(node)
    }

    fn decode_field(
        &self,
        field: &FieldDescriptor,
        wire_type: WireType,
        stream: &mut CodedInputStream,
        end: u64,
        depth: u32,
        slot: &mut Option<ValueNode>,
    ) -> Result<()> {
        let declared = field.kind.wire_type();

        if field.is_map {
            if wire_type != WireType::LengthDelimited {
                return skip_value(stream, wire_type, end);
            }
            let (entry_name, key, value) = self.decode_map_entry(field, stream, end, depth)?;
            match slot {
                Some(ValueNode::Message(entries)) => entries.upsert(key, value),
                _ => {
                    let mut entries = MessageNode::new(entry_name);
                    entries.upsert(key, value);
                    *slot = Some(ValueNode::Message(entries));
                }
            }
            return Ok(());
        }

        if field.is_repeated {
            let mut items = match slot.take() {
                Some(ValueNode::List(items)) => items,
                _ => Vec::new(),
            };
            let outcome = if wire_type == WireType::LengthDelimited && field.kind.is_packable() {
                self.decode_packed(field, stream, end, &mut items)
            } else if wire_type == declared {
                self.decode_single(&field.kind, stream, end, depth)
                    .map(|item| items.push(item))
            } else {
                skip_value(stream, wire_type, end)
            };
            *slot = Some(ValueNode::List(items));
            return outcome;
        }

        if wire_type != declared {
            return skip_value(stream, wire_type, end);
        }
        match &field.kind {
            // Repeated occurrences of an embedded message merge into one.
            FieldKind::Message(name) => {
                let descriptor = self.lookup_message(name)?;
                let prior = match slot.take() {
                    Some(ValueNode::Message(node)) => Some(node),
                    _ => None,
                };
                let node = self.decode_embedded(descriptor, stream, end, depth, prior)?;
                *slot = Some(ValueNode::Message(node));
            }
            // Last occurrence of a singular scalar wins.
            kind => *slot = Some(self.decode_single(kind, stream, end, depth)?),
        }
        Ok(())
    }

    /// Expand one length-delimited blob of packed scalars or enums.
    fn decode_packed(
        &self,
        field: &FieldDescriptor,
        stream: &mut CodedInputStream,
        end: u64,
        items: &mut Vec<ValueNode>,
    ) -> Result<()> {
        let (len, blob_start) = read_length(stream, end)?;
        let blob_end = blob_start + len;
        let old_limit = stream
            .push_limit(len)
            .map_err(|e| DecodeError::malformed(blob_start, e.to_string()))?;

        while stream.pos() < blob_end {
            items.push(self.decode_single(&field.kind, stream, blob_end, 0)?);
        }
        stream.pop_limit(old_limit);

        if stream.pos() != blob_end {
            return Err(DecodeError::malformed(
                blob_start,
                format!("packed field {} does not end on a value boundary", field.name),
            ));
        }
        Ok(())
    }

    fn decode_map_entry(
        &self,
        field: &FieldDescriptor,
        stream: &mut CodedInputStream,
        end: u64,
        depth: u32,
    ) -> Result<(String, String, ValueNode)> {
        let entry_at = stream.pos();
        let entry_type = match &field.kind {
            FieldKind::Message(name) => self.lookup_message(name)?,
            other => {
                return Err(DecodeError::UnresolvedType {
                    type_name: other.to_string(),
                })
            }
        };
        let entry = self.decode_embedded(entry_type, stream, end, depth, None)?;

        let mut key = None;
        let mut value = None;
        for (name, node) in entry.fields {
            match name.as_str() {
                "key" => key = Some(node),
                "value" => value = Some(node),
                _ => {}
            }
        }

        let key_text = match key {
            Some(ValueNode::Scalar(scalar)) => scalar.key_text(),
            Some(_) => {
                return Err(DecodeError::malformed(entry_at, "map key is not a scalar"));
            }
            None => match entry_type.field_by_number(1).map(|f| &f.kind) {
                Some(FieldKind::Scalar(kind)) => Scalar::default_for(*kind).key_text(),
                _ => String::new(),
            },
        };
        let value = match value {
            Some(value) => value,
            None => match entry_type.field_by_number(2) {
                Some(value_field) => self.default_value(&value_field.kind)?,
                None => return Err(DecodeError::malformed(entry_at, "map entry has no value field")),
            },
        };
        Ok((entry_type.name.clone(), key_text, value))
    }

    /// Zero value of a kind, for map entries that omit their value.
    fn default_value(&self, kind: &FieldKind) -> Result<ValueNode> {
        Ok(match kind {
            FieldKind::Scalar(kind) => ValueNode::Scalar(Scalar::default_for(*kind)),
            FieldKind::Enum(name) => ValueNode::Enum(self.enum_symbol(name, 0)?),
            FieldKind::Message(name) => {
                ValueNode::Message(MessageNode::new(self.lookup_message(name)?.name.clone()))
            }
        })
    }

    fn decode_single(
        &self,
        kind: &FieldKind,
        stream: &mut CodedInputStream,
        end: u64,
        depth: u32,
    ) -> Result<ValueNode> {
        match kind {
            FieldKind::Scalar(kind) => Ok(ValueNode::Scalar(read_scalar(*kind, stream, end)?)),
            FieldKind::Enum(name) => {
                let at = stream.pos();
                let number = stream
                    .read_int32()
                    .map_err(|e| DecodeError::malformed(at, e.to_string()))?;
                Ok(ValueNode::Enum(self.enum_symbol(name, number)?))
            }
            FieldKind::Message(name) => {
                let descriptor = self.lookup_message(name)?;
                let node = self.decode_embedded(descriptor, stream, end, depth, None)?;
                Ok(ValueNode::Message(node))
            }
        }
    }

    /// Decode a length-delimited embedded message, merging it over `prior`
    /// when the field was already seen.
    fn decode_embedded(
        &self,
        descriptor: &MessageDescriptor,
        stream: &mut CodedInputStream,
        end: u64,
        depth: u32,
        prior: Option<MessageNode>,
    ) -> Result<MessageNode> {
        let at = stream.pos();
        if depth + 1 > RECURSION_LIMIT {
            return Err(DecodeError::RecursionLimit { offset: at });
        }
        let (len, body_start) = read_length(stream, end)?;
        let old_limit = stream
            .push_limit(len)
            .map_err(|e| DecodeError::malformed(body_start, e.to_string()))?;
        let node = self.decode_message(descriptor, stream, body_start + len, depth + 1, prior)?;
        stream.pop_limit(old_limit);
        Ok(node)
    }

    fn enum_symbol(&self, enum_name: &str, number: i32) -> Result<EnumSymbol> {
        let enum_type = self
            .graph()
            .enum_type(enum_name)
            .ok_or_else(|| DecodeError::UnresolvedType {
                type_name: enum_name.to_string(),
            })?;
        Ok(EnumSymbol {
            symbol: enum_type.symbol(number).map(str::to_string),
            number,
        })
    }

    fn lookup_message(&self, name: &str) -> Result<&MessageDescriptor> {
        self.graph()
            .message(name)
            .ok_or_else(|| DecodeError::UnresolvedType {
                type_name: name.to_string(),
            })
    }
}

/// Read a length prefix and check it fits before `end`. Returns the length
/// and the position of the first byte after the prefix.
fn read_length(stream: &mut CodedInputStream, end: u64) -> Result<(u64, u64)> {
    let at = stream.pos();
    let len = stream
        .read_raw_varint64()
        .map_err(|e| DecodeError::malformed(at, format!("bad length prefix: {e}")))?;
    let start = stream.pos();
    let remaining = end.saturating_sub(start);
    if len > remaining {
        return Err(DecodeError::malformed(
            at,
            format!("length-delimited field of {len} bytes exceeds the {remaining} remaining"),
        ));
    }
    Ok((len, start))
}

fn read_raw(stream: &mut CodedInputStream, end: u64) -> Result<(u64, Vec<u8>)> {
    let (len, start) = read_length(stream, end)?;
    let bytes = stream
        .read_raw_bytes(len as u32)
        .map_err(|e| DecodeError::malformed(start, e.to_string()))?;
    Ok((start, bytes))
}

fn read_scalar(kind: ScalarKind, stream: &mut CodedInputStream, end: u64) -> Result<Scalar> {
    let at = stream.pos();
    let malformed = |e: protobuf::Error| DecodeError::malformed(at, e.to_string());

    let value = match kind {
        ScalarKind::Double => ScalarValue::Double(stream.read_double().map_err(malformed)?),
        ScalarKind::Float => ScalarValue::Float(stream.read_float().map_err(malformed)?),
        ScalarKind::Int32 => ScalarValue::Int(stream.read_int32().map_err(malformed)?),
        ScalarKind::Sint32 => ScalarValue::Int(stream.read_sint32().map_err(malformed)?),
        ScalarKind::Sfixed32 => ScalarValue::Int(stream.read_sfixed32().map_err(malformed)?),
        ScalarKind::Uint32 => ScalarValue::Uint(stream.read_uint32().map_err(malformed)?),
        ScalarKind::Fixed32 => ScalarValue::Uint(stream.read_fixed32().map_err(malformed)?),
        ScalarKind::Int64 => {
            ScalarValue::Decimal(stream.read_int64().map_err(malformed)?.to_string())
        }
        ScalarKind::Sint64 => {
            ScalarValue::Decimal(stream.read_sint64().map_err(malformed)?.to_string())
        }
        ScalarKind::Sfixed64 => {
            ScalarValue::Decimal(stream.read_sfixed64().map_err(malformed)?.to_string())
        }
        ScalarKind::Uint64 => {
            ScalarValue::Decimal(stream.read_uint64().map_err(malformed)?.to_string())
        }
        ScalarKind::Fixed64 => {
            ScalarValue::Decimal(stream.read_fixed64().map_err(malformed)?.to_string())
        }
        ScalarKind::Bool => ScalarValue::Bool(stream.read_bool().map_err(malformed)?),
        ScalarKind::String => {
            let (start, bytes) = read_raw(stream, end)?;
            ScalarValue::String(
                String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 { offset: start })?,
            )
        }
        ScalarKind::Bytes => ScalarValue::Bytes(read_raw(stream, end)?.1),
    };
    Ok(Scalar::new(kind, value))
}

/// Skip the value of an unknown or mismatched field.
fn skip_value(stream: &mut CodedInputStream, wire_type: WireType, end: u64) -> Result<()> {
    let at = stream.pos();
    let malformed = |e: protobuf::Error| DecodeError::malformed(at, e.to_string());
    match wire_type {
        WireType::Varint => {
            stream.read_raw_varint64().map_err(malformed)?;
        }
        WireType::Fixed64 => {
            stream.read_raw_little_endian64().map_err(malformed)?;
        }
        WireType::Fixed32 => {
            stream.read_raw_little_endian32().map_err(malformed)?;
        }
        WireType::LengthDelimited => {
            read_raw(stream, end)?;
        }
    }
    Ok(())
}
