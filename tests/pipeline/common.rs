use kafka_protobuf_console_consumer::kafka_protobuf::{ProtoDecoder, SchemaResolver};
use kafka_protobuf_console_consumer::kafka_types::{
    FieldKind, MessageDescriptor, ScalarKind, ScalarValue, SchemaGraph, ValueNode,
};
use protobuf::CodedOutputStream;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Write `(relative path, source)` pairs below a fresh directory.
pub fn schema_dir(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    write_files(dir.path(), files);
    dir
}

pub fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (path, source) in files {
        let full = root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("Failed to create schema dir");
        }
        fs::write(full, source).expect("Failed to write schema");
    }
}

pub fn decoder(dirs: &[&Path], file: &str, message: &str) -> ProtoDecoder {
    let resolved = SchemaResolver::new(dirs.iter().copied())
        .resolve(file, message)
        .expect("Failed to resolve message");
    ProtoDecoder::new(resolved)
}

pub fn encode(write: impl FnOnce(&mut CodedOutputStream)) -> Vec<u8> {
    let mut buffer = Vec::new();
    {
        let mut stream = CodedOutputStream::vec(&mut buffer);
        write(&mut stream);
        stream.flush().expect("Failed to flush");
    }
    buffer
}

/// Reference encoder: writes a decoded tree back to the wire using the
/// descriptor it was decoded with. Repeated fields are written unpacked and
/// map fields are not supported.
pub fn encode_node(graph: &SchemaGraph, descriptor: &MessageDescriptor, node: &ValueNode) -> Vec<u8> {
    let message = node.as_message().expect("Expected message node");
    encode(|stream| {
        for (name, value) in &message.fields {
            let field = descriptor
                .field_by_name(name)
                .expect("Tree field missing from descriptor");
            let items: Vec<&ValueNode> = match value {
                ValueNode::List(items) => items.iter().collect(),
                single => vec![single],
            };
            for item in items {
                encode_value(graph, field.number, &field.kind, item, stream);
            }
        }
    })
}

fn encode_value(
    graph: &SchemaGraph,
    number: u32,
    kind: &FieldKind,
    value: &ValueNode,
    stream: &mut CodedOutputStream,
) {
    match (kind, value) {
        (FieldKind::Scalar(kind), ValueNode::Scalar(scalar)) => {
            encode_scalar(number, *kind, &scalar.value, stream)
        }
        (FieldKind::Enum(_), ValueNode::Enum(symbol)) => {
            stream.write_enum(number, symbol.number).unwrap()
        }
        (FieldKind::Message(type_name), node @ ValueNode::Message(_)) => {
            let nested = graph.message(type_name).expect("Unknown nested type");
            let bytes = encode_node(graph, nested, node);
            stream.write_bytes(number, &bytes).unwrap()
        }
        (kind, value) => panic!("Value {value:?} does not match field kind {kind}"),
    }
}

fn encode_scalar(number: u32, kind: ScalarKind, value: &ScalarValue, stream: &mut CodedOutputStream) {
    let written = match (kind, value) {
        (ScalarKind::Double, ScalarValue::Double(v)) => stream.write_double(number, *v),
        (ScalarKind::Float, ScalarValue::Float(v)) => stream.write_float(number, *v),
        (ScalarKind::Int32, ScalarValue::Int(v)) => stream.write_int32(number, *v),
        (ScalarKind::Sint32, ScalarValue::Int(v)) => stream.write_sint32(number, *v),
        (ScalarKind::Sfixed32, ScalarValue::Int(v)) => stream.write_sfixed32(number, *v),
        (ScalarKind::Uint32, ScalarValue::Uint(v)) => stream.write_uint32(number, *v),
        (ScalarKind::Fixed32, ScalarValue::Uint(v)) => stream.write_fixed32(number, *v),
        (ScalarKind::Int64, ScalarValue::Decimal(v)) => {
            stream.write_int64(number, v.parse().unwrap())
        }
        (ScalarKind::Sint64, ScalarValue::Decimal(v)) => {
            stream.write_sint64(number, v.parse().unwrap())
        }
        (ScalarKind::Sfixed64, ScalarValue::Decimal(v)) => {
            stream.write_sfixed64(number, v.parse().unwrap())
        }
        (ScalarKind::Uint64, ScalarValue::Decimal(v)) => {
            stream.write_uint64(number, v.parse().unwrap())
        }
        (ScalarKind::Fixed64, ScalarValue::Decimal(v)) => {
            stream.write_fixed64(number, v.parse().unwrap())
        }
        (ScalarKind::Bool, ScalarValue::Bool(v)) => stream.write_bool(number, *v),
        (ScalarKind::String, ScalarValue::String(v)) => stream.write_string(number, v),
        (ScalarKind::Bytes, ScalarValue::Bytes(v)) => stream.write_bytes(number, v),
        (kind, value) => panic!("Scalar {value:?} does not match kind {kind}"),
    };
    written.unwrap()
}
