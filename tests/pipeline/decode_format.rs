//! Decode then format, end to end.

use crate::common::{decoder, encode, encode_node, schema_dir};
use kafka_protobuf_console_consumer::kafka_protobuf::{format, FormatOptions, RECORD_SEPARATOR};

const PROFILE: &str = r#"
syntax = "proto3";
package people;

enum Role {
  ROLE_UNKNOWN = 0;
  ROLE_ADMIN = 1;
  ROLE_MEMBER = 2;
}

message Contact {
  string email = 1;
  bool verified = 2;
}

message Profile {
  int64 id = 1;
  string name = 2;
  Role role = 3;
  repeated Contact contacts = 4;
  repeated sint32 deltas = 5;
  double score = 6;
  bytes avatar = 7;
  fixed32 flags = 8;
  uint64 visits = 9;
  float ratio = 10;
  sfixed64 balance = 11;
}
"#;

#[test]
fn test_id_and_name_render_compact() {
    let dir = schema_dir(&[("people.proto", PROFILE)]);
    let decoder = decoder(&[dir.path()], "people.proto", "people.Profile");
    let payload = encode(|s| {
        s.write_int64(1, 42).unwrap();
        s.write_string(2, "x").unwrap();
    });

    let node = decoder.decode(&payload).expect("Failed to decode");
    let text = format(&node, &FormatOptions::default()).expect("Failed to format");
    assert_eq!(text, r#"{"id":"42","name":"x"}"#);
}

#[test]
fn test_reencoding_reproduces_the_tree() {
    let dir = schema_dir(&[("people.proto", PROFILE)]);
    let decoder = decoder(&[dir.path()], "people.proto", "people.Profile");

    let contact = |email: &str, verified: bool| {
        encode(|s| {
            s.write_string(1, email).unwrap();
            s.write_bool(2, verified).unwrap();
        })
    };
    let payload = encode(|s| {
        s.write_int64(1, -7).unwrap();
        s.write_string(2, "Ada").unwrap();
        s.write_enum(3, 1).unwrap();
        s.write_bytes(4, &contact("ada@example.com", true)).unwrap();
        s.write_bytes(4, &contact("ada@work.example", false)).unwrap();
        s.write_sint32(5, -3).unwrap();
        s.write_sint32(5, 12).unwrap();
        s.write_double(6, 0.25).unwrap();
        s.write_bytes(7, &[0, 1, 2, 255]).unwrap();
        s.write_fixed32(8, 0xdead_beef).unwrap();
        s.write_uint64(9, u64::MAX).unwrap();
        s.write_float(10, 1.5).unwrap();
        s.write_sfixed64(11, i64::MIN).unwrap();
    });

    let first = decoder.decode(&payload).expect("Failed to decode");
    let reencoded = encode_node(decoder.graph(), decoder.descriptor(), &first);
    let second = decoder.decode(&reencoded).expect("Failed to decode re-encoded payload");
    assert_eq!(first, second);
    assert_eq!(first.as_message().expect("message").len(), 11);
}

#[test]
fn test_unknown_fields_and_enum_numbers() {
    let dir = schema_dir(&[("people.proto", PROFILE)]);
    let decoder = decoder(&[dir.path()], "people.proto", "people.Profile");
    let payload = encode(|s| {
        s.write_string(2, "x").unwrap();
        s.write_string(50, "from a newer schema").unwrap();
        s.write_enum(3, 9).unwrap();
    });

    let node = decoder.decode(&payload).expect("Unknown fields should be skipped");
    let text = format(&node, &FormatOptions::default()).expect("Failed to format");
    assert_eq!(text, r#"{"name":"x","role":"9"}"#);
}

#[test]
fn test_pretty_output_matches_compact() {
    let dir = schema_dir(&[("people.proto", PROFILE)]);
    let decoder = decoder(&[dir.path()], "people.proto", "people.Profile");
    let payload = encode(|s| {
        s.write_int64(1, 1).unwrap();
        s.write_enum(3, 2).unwrap();
        s.write_bytes(4, &encode(|c| c.write_string(1, "a@b.c").unwrap()))
            .unwrap();
        s.write_bytes(7, b"raw").unwrap();
    });
    let node = decoder.decode(&payload).expect("Failed to decode");

    let compact = format(&node, &FormatOptions::default()).expect("Failed to format");
    let pretty = format(
        &node,
        &FormatOptions {
            pretty: true,
            with_separator: true,
        },
    )
    .expect("Failed to format");

    let body = pretty
        .strip_suffix(&format!("\n{RECORD_SEPARATOR}"))
        .expect("Separator should close the record");
    let compact: serde_json::Value = serde_json::from_str(&compact).expect("Invalid JSON");
    let pretty: serde_json::Value = serde_json::from_str(body).expect("Invalid JSON");
    assert_eq!(compact, pretty);
    assert_eq!(pretty["avatar"], "cmF3");
    assert_eq!(pretty["contacts"][0]["email"], "a@b.c");
}

#[test]
fn test_truncated_payload_fails_with_offset() {
    let dir = schema_dir(&[("people.proto", PROFILE)]);
    let decoder = decoder(&[dir.path()], "people.proto", "people.Profile");
    let mut payload = encode(|s| {
        s.write_int64(1, 1).unwrap();
        s.write_string(2, "truncated").unwrap();
    });
    payload.truncate(payload.len() - 3);

    let err = decoder.decode(&payload).expect_err("Truncated payload should fail");
    assert_eq!(err.offset(), Some(3));
}
