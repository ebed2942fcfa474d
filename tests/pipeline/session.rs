//! Coordinator sessions driven by an in-memory group client.

use crate::common::{decoder, encode, schema_dir};
use async_trait::async_trait;
use kafka_protobuf_console_consumer::kafka_protobuf::{
    Acknowledger, Coordinator, DecodeErrorPolicy, Error, FormatOptions, GroupEvent,
    PartitionFeed, RecordSink, Result, SessionState, WriterSink,
};
use kafka_protobuf_console_consumer::kafka_types::{StreamRecord, TopicPartition};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "events";
const FEED_CAPACITY: usize = 64;
const SCHEMA: &str = "syntax = \"proto3\";\npackage ev;\nmessage Event { int64 seq = 1; string source = 2; }\n";

/// In-memory stand-in for the broker side of a group session.
struct FakeGroup {
    events: mpsc::UnboundedSender<GroupEvent>,
    partitions: HashMap<i32, mpsc::Sender<StreamRecord>>,
}

impl FakeGroup {
    fn new() -> (Self, mpsc::UnboundedReceiver<GroupEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                events,
                partitions: HashMap::new(),
            },
            rx,
        )
    }

    fn assign(&mut self, partitions: &[i32]) {
        let mut feeds = Vec::new();
        for &partition in partitions {
            let (tx, records) = mpsc::channel(FEED_CAPACITY);
            self.partitions.insert(partition, tx);
            feeds.push(PartitionFeed {
                partition: TopicPartition::new(TOPIC, partition),
                records,
            });
        }
        self.events.send(GroupEvent::Assigned(feeds)).unwrap();
    }

    fn deliver(&self, partition: i32, offset: i64, value: Vec<u8>) {
        self.partitions[&partition]
            .try_send(StreamRecord {
                topic: TOPIC.to_string(),
                partition,
                offset,
                key: Some(format!("k{offset}").into_bytes()),
                value,
                timestamp: Some(1_700_000_000_000 + offset),
            })
            .unwrap();
    }
}

/// Records every acknowledgement and signals when `expected` have arrived.
struct RecordingAcknowledger {
    acked: Mutex<Vec<(i32, i64)>>,
    expected: usize,
    done: CancellationToken,
}

impl Acknowledger for RecordingAcknowledger {
    fn acknowledge(&self, record: &StreamRecord) -> Result<()> {
        let mut acked = self.acked.lock().unwrap();
        acked.push((record.partition, record.offset));
        if acked.len() >= self.expected {
            self.done.cancel();
        }
        Ok(())
    }
}

fn event(seq: i64, source: &str) -> Vec<u8> {
    encode(|s| {
        s.write_int64(1, seq).unwrap();
        s.write_string(2, source).unwrap();
    })
}

#[tokio::test]
async fn test_partitions_are_consumed_in_order() {
    let dir = schema_dir(&[("event.proto", SCHEMA)]);
    let decoder = decoder(&[dir.path()], "event.proto", "ev.Event");

    let done = CancellationToken::new();
    let acks = Arc::new(RecordingAcknowledger {
        acked: Mutex::new(Vec::new()),
        expected: 40,
        done: done.clone(),
    });
    let sink = Arc::new(WriterSink::new(Vec::new()));
    let coordinator = Coordinator::new(
        decoder,
        FormatOptions::default(),
        DecodeErrorPolicy::Skip,
        sink.clone(),
        acks.clone(),
    );

    let (mut group, events) = FakeGroup::new();
    group.assign(&[0, 1]);
    for offset in 0..20 {
        group.deliver(0, offset, event(offset, "p0"));
        group.deliver(1, 100 + offset, event(offset, "p1"));
    }

    // The session ends once every record has been acknowledged.
    let summary = timeout(Duration::from_secs(10), coordinator.run(events, done))
        .await
        .expect("Session did not finish")
        .expect("Session failed");
    assert_eq!(summary.records_written, 40);

    let acked = acks.acked.lock().unwrap().clone();
    for partition in [0, 1] {
        let offsets: Vec<i64> = acked
            .iter()
            .filter(|(p, _)| *p == partition)
            .map(|(_, o)| *o)
            .collect();
        let base = if partition == 0 { 0 } else { 100 };
        assert_eq!(offsets, (base..base + 20).collect::<Vec<_>>());
    }

    let sink = Arc::try_unwrap(sink).unwrap_or_else(|_| panic!("Sink still shared"));
    let output = String::from_utf8(sink.into_inner()).expect("Output should be UTF-8");
    let p0: Vec<String> = output
        .lines()
        .filter(|line| line.contains("\"p0\""))
        .map(str::to_string)
        .collect();
    assert_eq!(p0.len(), 20);
    assert_eq!(p0[0], r#"{"seq":"0","source":"p0"}"#);
    assert_eq!(p0[19], r#"{"seq":"19","source":"p0"}"#);
}

#[tokio::test]
async fn test_malformed_record_is_skipped_and_acknowledged() {
    let dir = schema_dir(&[("event.proto", SCHEMA)]);
    let decoder = decoder(&[dir.path()], "event.proto", "ev.Event");

    let done = CancellationToken::new();
    let acks = Arc::new(RecordingAcknowledger {
        acked: Mutex::new(Vec::new()),
        expected: 3,
        done: done.clone(),
    });
    let sink = Arc::new(WriterSink::new(Vec::new()));
    let coordinator = Coordinator::new(
        decoder,
        FormatOptions::default(),
        DecodeErrorPolicy::Skip,
        sink.clone(),
        acks.clone(),
    );

    let (mut group, events) = FakeGroup::new();
    group.assign(&[2]);
    group.deliver(2, 7, event(1, "ok"));
    group.deliver(2, 8, vec![0x12, 0xff, 0x01]);
    group.deliver(2, 9, Vec::new());

    let summary = timeout(Duration::from_secs(10), coordinator.run(events, done))
        .await
        .expect("Session did not finish")
        .expect("Session failed");

    assert_eq!(summary.records_written, 2);
    assert_eq!(summary.records_skipped, 1);
    assert_eq!(*acks.acked.lock().unwrap(), vec![(2, 7), (2, 8), (2, 9)]);

    let sink = Arc::try_unwrap(sink).unwrap_or_else(|_| panic!("Sink still shared"));
    let output = String::from_utf8(sink.into_inner()).expect("Output should be UTF-8");
    assert_eq!(output, "{\"seq\":\"1\",\"source\":\"ok\"}\n{}\n");
}

/// Sink that rejects the record whose text contains a marker.
struct RejectingSink {
    marker: &'static str,
    accepted: Mutex<Vec<String>>,
}

#[async_trait]
impl RecordSink for RejectingSink {
    async fn write_record(&self, text: &str) -> io::Result<()> {
        if text.contains(self.marker) {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.accepted.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_failed_write_is_never_acknowledged() {
    let dir = schema_dir(&[("event.proto", SCHEMA)]);
    let decoder = decoder(&[dir.path()], "event.proto", "ev.Event");

    let acks = Arc::new(RecordingAcknowledger {
        acked: Mutex::new(Vec::new()),
        expected: usize::MAX,
        done: CancellationToken::new(),
    });
    let sink = Arc::new(RejectingSink {
        marker: "\"11\"",
        accepted: Mutex::new(Vec::new()),
    });
    let coordinator = Coordinator::new(
        decoder,
        FormatOptions::default(),
        DecodeErrorPolicy::Skip,
        sink.clone(),
        acks.clone(),
    );
    let state = coordinator.subscribe();

    let (mut group, events) = FakeGroup::new();
    group.assign(&[0]);
    for offset in [10, 11, 12] {
        group.deliver(0, offset, event(offset, "p0"));
    }

    let result = timeout(
        Duration::from_secs(10),
        coordinator.run(events, CancellationToken::new()),
    )
    .await
    .expect("Session did not finish");

    assert!(matches!(result, Err(Error::Sink(_))));
    assert_eq!(*acks.acked.lock().unwrap(), vec![(0, 10)]);
    assert_eq!(sink.accepted.lock().unwrap().len(), 1);
    assert_eq!(*state.borrow(), SessionState::Closed);
}
