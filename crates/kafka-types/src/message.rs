//! Records delivered by the group-consumption client.
//!
//! The coordinator only reads these; they are produced by whatever client
//! implements the delivery boundary (rdkafka in production, in-memory feeds
//! in tests).

use std::fmt;

/// A raw, undecoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    /// Kafka topic name
    pub topic: String,
    /// Kafka partition number
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Message key (if any)
    pub key: Option<Vec<u8>>,
    /// Message value; a null value is delivered as empty bytes
    pub value: Vec<u8>,
    /// Timestamp in milliseconds since epoch (if available)
    pub timestamp: Option<i64>,
}

impl StreamRecord {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(&self.topic, self.partition)
    }
}

/// A topic/partition pair, the unit of assignment in a consumer group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}
