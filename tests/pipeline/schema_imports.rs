//! Schemas split across files and search directories.

use crate::common::{decoder, encode, schema_dir};
use kafka_protobuf_console_consumer::kafka_protobuf::{format, FormatOptions, SchemaResolver};
use kafka_protobuf_console_consumer::kafka_types::SchemaError;

const COMMON: &str = r#"
syntax = "proto3";
package common.v1;

message Money {
  string currency = 1;
  int64 units = 2;
}

enum Channel {
  CHANNEL_UNSPECIFIED = 0;
  CHANNEL_WEB = 1;
  CHANNEL_STORE = 2;
}
"#;

const ORDER: &str = r#"
syntax = "proto3";
package shop.v1;

import "common/v1/money.proto";
import "google/protobuf/timestamp.proto";

message Order {
  string id = 1;
  common.v1.Money total = 2;
  common.v1.Channel channel = 3;
  google.protobuf.Timestamp placed_at = 4;
  repeated Line lines = 5;

  message Line {
    string sku = 1;
    uint32 quantity = 2;
  }
}
"#;

#[test]
fn test_imports_resolve_across_search_dirs() {
    let common = schema_dir(&[("common/v1/money.proto", COMMON)]);
    let shop = schema_dir(&[("shop/v1/order.proto", ORDER)]);
    let decoder = decoder(
        &[shop.path(), common.path()],
        "shop/v1/order.proto",
        "shop.v1.Order",
    );

    let total = encode(|s| {
        s.write_string(1, "EUR").unwrap();
        s.write_int64(2, 1250).unwrap();
    });
    let placed_at = encode(|s| {
        s.write_int64(1, 1_700_000_000).unwrap();
        s.write_int32(2, 5).unwrap();
    });
    let line = encode(|s| {
        s.write_string(1, "A-1").unwrap();
        s.write_uint32(2, 3).unwrap();
    });
    let payload = encode(|s| {
        s.write_string(1, "o-1").unwrap();
        s.write_bytes(2, &total).unwrap();
        s.write_enum(3, 2).unwrap();
        s.write_bytes(4, &placed_at).unwrap();
        s.write_bytes(5, &line).unwrap();
    });

    let node = decoder.decode(&payload).expect("Failed to decode order");
    let text = format(&node, &FormatOptions::default()).expect("Failed to format");
    assert_eq!(
        text,
        concat!(
            r#"{"id":"o-1","total":{"currency":"EUR","units":"1250"},"channel":"CHANNEL_STORE","#,
            r#""placed_at":{"seconds":"1700000000","nanos":5},"lines":[{"sku":"A-1","quantity":3}]}"#
        )
    );
}

#[test]
fn test_first_search_dir_wins() {
    let first = schema_dir(&[(
        "common/v1/money.proto",
        "syntax = \"proto3\";\npackage common.v1;\nmessage Money { string currency = 1; }\nenum Channel { CHANNEL_UNSPECIFIED = 0; CHANNEL_WEB = 1; CHANNEL_STORE = 2; }\n",
    )]);
    let second = schema_dir(&[("common/v1/money.proto", COMMON), ("shop/v1/order.proto", ORDER)]);

    let graph = SchemaResolver::new([first.path(), second.path()])
        .load("shop/v1/order.proto")
        .expect("Failed to load schema");
    let money = graph.message("common.v1.Money").expect("Money should exist");
    assert_eq!(money.list_fields(), vec!["currency"]);
}

#[test]
fn test_missing_import_names_the_file() {
    let shop = schema_dir(&[("shop/v1/order.proto", ORDER)]);
    let err = SchemaResolver::new([shop.path()])
        .load("shop/v1/order.proto")
        .expect_err("Missing import should fail");

    match err {
        SchemaError::FileNotFound { path, search_dirs } => {
            assert_eq!(path, "common/v1/money.proto");
            assert_eq!(search_dirs, vec![shop.path().to_path_buf()]);
        }
        other => panic!("Expected FileNotFound, got {other:?}"),
    }
}

#[test]
fn test_import_cycle_is_reported() {
    let dir = schema_dir(&[
        ("a.proto", "syntax = \"proto3\";\nimport \"b.proto\";\nmessage A {}\n"),
        ("b.proto", "syntax = \"proto3\";\nimport \"c.proto\";\nmessage B {}\n"),
        ("c.proto", "syntax = \"proto3\";\nimport \"a.proto\";\nmessage C {}\n"),
    ]);
    let err = SchemaResolver::new([dir.path()])
        .load("a.proto")
        .expect_err("Cycle should fail");

    match err {
        SchemaError::ImportCycle { chain } => {
            assert_eq!(chain, vec!["a.proto", "b.proto", "c.proto", "a.proto"]);
        }
        other => panic!("Expected ImportCycle, got {other:?}"),
    }
}

#[test]
fn test_simple_name_lookup() {
    let common = schema_dir(&[("common/v1/money.proto", COMMON)]);
    let shop = schema_dir(&[("shop/v1/order.proto", ORDER)]);
    let resolved = SchemaResolver::new([shop.path(), common.path()])
        .resolve("shop/v1/order.proto", "Money")
        .expect("Unique simple name should resolve");
    assert_eq!(resolved.type_name(), "common.v1.Money");
}
