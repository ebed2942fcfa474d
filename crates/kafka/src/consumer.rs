use crate::coordinator::{Acknowledger, GroupEvent, PartitionFeed};
use crate::error::{Error, Result};
use kafka_types::{StreamRecord, TopicPartition};
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer as RdkafkaConsumer, ConsumerContext, Rebalance,
    StreamConsumer,
};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, Message as RdkafkaMessage};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// librdkafka debug contexts enabled by `debug`.
const DEBUG_CONTEXTS: &str = "consumer,cgrp,topic,fetch";

/// Records queued per partition before fetching from it is paused.
pub const DEFAULT_PARTITION_BUFFER: usize = 256;

/// How often the dispatcher moves held records into drained partition feeds.
const REFILL_INTERVAL: Duration = Duration::from_millis(20);

/// Configuration for the Kafka group consumer
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Kafka brokers (comma-separated list)
    pub brokers: String,
    /// Consumer group ID
    pub group_id: String,
    /// Topic to consume from
    ///
    /// Every payload on the topic must be of the message type the decoder
    /// was resolved for.
    pub topic: String,
    /// Auto offset reset strategy ("earliest" or "latest")
    ///
    /// Only applies when the group has no committed offset for a partition.
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    pub session_timeout_ms: String,
    /// Broker version assumed when the broker cannot report its API versions
    pub broker_version_fallback: String,
    /// Ask brokers for their supported API versions on connect
    pub api_version_request: bool,
    /// Enable librdkafka's own debug logging
    pub debug: bool,
    /// Records buffered per partition ahead of its worker
    ///
    /// When a partition's buffer is full, fetching from that partition is
    /// paused until its worker catches up.
    pub partition_buffer: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "kafka-protobuf-console-consumer".to_string(),
            topic: "".to_string(),
            auto_offset_reset: "latest".to_string(),
            session_timeout_ms: "6000".to_string(),
            broker_version_fallback: "0.10.2".to_string(),
            api_version_request: true,
            debug: false,
            partition_buffer: DEFAULT_PARTITION_BUFFER,
        }
    }
}

impl ConsumerConfig {
    /// Build the librdkafka client configuration.
    ///
    /// Auto commit is always off: offsets are committed only once a record
    /// has been written out.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", &self.session_timeout_ms)
            .set("enable.partition.eof", "false")
            .set("broker.version.fallback", &self.broker_version_fallback)
            .set("api.version.request", self.api_version_request.to_string());
        if self.debug {
            config
                .set("debug", DEBUG_CONTEXTS)
                .set_log_level(RDKafkaLogLevel::Debug);
        }
        config
    }
}

/// Routing changes produced by rebalance callbacks for the dispatcher.
#[derive(Debug)]
enum RouteChange {
    Add(Vec<(TopicPartition, mpsc::Sender<StreamRecord>)>),
    Remove(Vec<TopicPartition>),
}

/// Client context translating librdkafka callbacks into group events.
pub struct GroupContext {
    events: mpsc::UnboundedSender<GroupEvent>,
    routes: mpsc::UnboundedSender<RouteChange>,
    buffer: usize,
}

impl GroupContext {
    fn assign(&self, partitions: Vec<TopicPartition>) {
        let mut feeds = Vec::with_capacity(partitions.len());
        let mut senders = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let (tx, records) = mpsc::channel(self.buffer.max(1));
            senders.push((partition.clone(), tx));
            feeds.push(PartitionFeed { partition, records });
        }
        let _ = self.routes.send(RouteChange::Add(senders));
        let _ = self.events.send(GroupEvent::Assigned(feeds));
    }

    fn revoke(&self, partitions: Vec<TopicPartition>) {
        let _ = self.routes.send(RouteChange::Remove(partitions.clone()));
        let _ = self.events.send(GroupEvent::Revoked(partitions));
    }

    fn report(&self, message: String, fatal: bool) {
        let _ = self.events.send(GroupEvent::Error { message, fatal });
    }
}

impl ClientContext for GroupContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => {
                error!(target: "librdkafka", facility = fac, "{log_message}")
            }
            RDKafkaLogLevel::Warning => warn!(target: "librdkafka", facility = fac, "{log_message}"),
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => {
                info!(target: "librdkafka", facility = fac, "{log_message}")
            }
            RDKafkaLogLevel::Debug => debug!(target: "librdkafka", facility = fac, "{log_message}"),
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        let fatal = error.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal);
        self.report(format!("{error}: {reason}"), fatal);
    }
}

impl ConsumerContext for GroupContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(tpl) => self.revoke(partitions_of(tpl)),
            Rebalance::Assign(_) => {}
            Rebalance::Error(e) => self.report(format!("Rebalance failed: {e}"), false),
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Assign(tpl) = rebalance {
            self.assign(partitions_of(tpl));
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!(count = offsets.count(), "Offsets committed"),
            Err(e) => warn!(error = %e, "Offset commit failed"),
        }
    }
}

fn partitions_of(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|elem| TopicPartition::new(elem.topic(), elem.partition()))
        .collect()
}

/// Converts a received message into an owned record. A null value is an
/// empty payload, which decodes as the empty message.
fn to_record(message: &BorrowedMessage<'_>) -> StreamRecord {
    StreamRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        timestamp: message.timestamp().to_millis(),
    }
}

/// Stops and restarts fetching for a single partition.
trait PartitionFlow {
    fn pause(&self, partition: &TopicPartition) -> KafkaResult<()>;
    fn resume(&self, partition: &TopicPartition) -> KafkaResult<()>;
}

fn partition_list(partition: &TopicPartition) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition(&partition.topic, partition.partition);
    tpl
}

impl PartitionFlow for StreamConsumer<GroupContext> {
    fn pause(&self, partition: &TopicPartition) -> KafkaResult<()> {
        <Self as RdkafkaConsumer<GroupContext>>::pause(self, &partition_list(partition))
    }

    fn resume(&self, partition: &TopicPartition) -> KafkaResult<()> {
        <Self as RdkafkaConsumer<GroupContext>>::resume(self, &partition_list(partition))
    }
}

/// Feed of one claimed partition.
///
/// Records that do not fit in the feed wait in `held`, in offset order,
/// while fetching from the partition is paused.
struct Route {
    tx: mpsc::Sender<StreamRecord>,
    held: VecDeque<StreamRecord>,
    paused: bool,
}

impl Route {
    fn new(tx: mpsc::Sender<StreamRecord>) -> Self {
        Self {
            tx,
            held: VecDeque::new(),
            paused: false,
        }
    }

    fn hold(
        &mut self,
        partition: &TopicPartition,
        record: StreamRecord,
        flow: &impl PartitionFlow,
    ) {
        self.held.push_back(record);
        if self.paused {
            return;
        }
        match flow.pause(partition) {
            Ok(()) => {
                debug!(%partition, "Partition buffer full, pausing fetch");
                self.paused = true;
            }
            Err(e) => warn!(%partition, error = %e, "Failed to pause partition"),
        }
    }

    /// Move held records into the feed. Returns false once the worker is gone.
    fn drain_held(&mut self) -> bool {
        while let Some(record) = self.held.pop_front() {
            match self.tx.try_send(record) {
                Ok(()) => {}
                Err(TrySendError::Full(record)) => {
                    self.held.push_front(record);
                    break;
                }
                Err(TrySendError::Closed(_)) => return false,
            }
        }
        true
    }

    /// Resume once nothing is held and at least half the feed is free.
    fn ready_to_resume(&self) -> bool {
        self.paused && self.held.is_empty() && self.tx.capacity() * 2 >= self.tx.max_capacity()
    }
}

/// Per-partition record routes, owned by the dispatcher.
#[derive(Default)]
struct Router {
    routes: HashMap<TopicPartition, Route>,
}

impl Router {
    fn apply(&mut self, change: RouteChange, flow: &impl PartitionFlow) {
        match change {
            RouteChange::Add(senders) => {
                for (partition, tx) in senders {
                    let stale = self.routes.insert(partition.clone(), Route::new(tx));
                    if stale.is_some_and(|route| route.paused) {
                        if let Err(e) = flow.resume(&partition) {
                            warn!(%partition, error = %e, "Failed to resume partition");
                        }
                    }
                }
            }
            RouteChange::Remove(partitions) => {
                for partition in partitions {
                    self.routes.remove(&partition);
                }
            }
        }
    }

    fn route(&mut self, record: StreamRecord, flow: &impl PartitionFlow) {
        let partition = record.topic_partition();
        let Some(route) = self.routes.get_mut(&partition) else {
            // The record stays uncommitted and is redelivered to the
            // partition's next owner.
            debug!(%partition, "Dropping record for unclaimed partition");
            return;
        };
        if !route.held.is_empty() {
            route.hold(&partition, record, flow);
            return;
        }
        match route.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => route.hold(&partition, record, flow),
            Err(TrySendError::Closed(_)) => {
                debug!(%partition, "Dropping record for stopped partition worker");
                self.routes.remove(&partition);
            }
        }
    }

    /// Top up feeds from held records and resume partitions that drained.
    fn refill(&mut self, flow: &impl PartitionFlow) {
        let mut closed = Vec::new();
        for (partition, route) in &mut self.routes {
            if !route.drain_held() {
                closed.push(partition.clone());
                continue;
            }
            if route.ready_to_resume() {
                match flow.resume(partition) {
                    Ok(()) => {
                        debug!(%partition, "Partition buffer drained, resuming fetch");
                        route.paused = false;
                    }
                    Err(e) => warn!(%partition, error = %e, "Failed to resume partition"),
                }
            }
        }
        for partition in closed {
            self.routes.remove(&partition);
        }
    }

    /// Total records waiting outside the feeds.
    #[cfg(test)]
    fn held(&self) -> usize {
        self.routes.values().map(|route| route.held.len()).sum()
    }
}

fn apply_changes(
    router: &mut Router,
    changes: &mut mpsc::UnboundedReceiver<RouteChange>,
    flow: &impl PartitionFlow,
) {
    while let Ok(change) = changes.try_recv() {
        router.apply(change, flow);
    }
}

/// Receives from the shared consumer and fans records out per partition.
async fn dispatch(
    consumer: Arc<StreamConsumer<GroupContext>>,
    mut changes: mpsc::UnboundedReceiver<RouteChange>,
    shutdown: CancellationToken,
) {
    let mut router = Router::default();
    let mut refill = tokio::time::interval(REFILL_INTERVAL);
    refill.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = refill.tick() => {
                apply_changes(&mut router, &mut changes, &*consumer);
                router.refill(&*consumer);
            }
            received = consumer.recv() => {
                let received = received.map(|message| to_record(&message));
                // Rebalance callbacks run inside recv; apply their routes first.
                apply_changes(&mut router, &mut changes, &*consumer);
                match received {
                    Ok(record) => router.route(record, &*consumer),
                    Err(e) => warn!(error = %e, "Failed to receive message"),
                }
            }
        }
    }
    debug!("Dispatcher stopped");
}

/// Commits `offset + 1` for each acknowledged record.
pub struct KafkaAcknowledger {
    consumer: Arc<StreamConsumer<GroupContext>>,
}

impl Acknowledger for KafkaAcknowledger {
    fn acknowledge(&self, record: &StreamRecord) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &record.topic,
            record.partition,
            Offset::Offset(record.offset + 1),
        )?;
        self.consumer.commit(&tpl, CommitMode::Async)?;
        Ok(())
    }
}

/// A subscribed group consumer, split into the parts the coordinator needs.
pub struct GroupConsumer {
    pub events: mpsc::UnboundedReceiver<GroupEvent>,
    pub acknowledger: Arc<dyn Acknowledger>,
    pub dispatcher: JoinHandle<()>,
}

impl GroupConsumer {
    /// Create the consumer, subscribe to the topic, and start dispatching
    /// records until `shutdown` fires.
    pub fn start(config: &ConsumerConfig, shutdown: CancellationToken) -> Result<Self> {
        if config.topic.is_empty() {
            return Err(Error::InvalidConfig("topic must not be empty".to_string()));
        }
        let (events_tx, events) = mpsc::unbounded_channel();
        let (routes_tx, routes) = mpsc::unbounded_channel();
        let context = GroupContext {
            events: events_tx,
            routes: routes_tx,
            buffer: config.partition_buffer,
        };

        let consumer: StreamConsumer<GroupContext> =
            config.client_config().create_with_context(context)?;
        consumer.subscribe(&[&config.topic])?;
        info!(
            brokers = %config.brokers,
            group = %config.group_id,
            topic = %config.topic,
            "Subscribed to topic"
        );

        let consumer = Arc::new(consumer);
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&consumer), routes, shutdown));
        Ok(Self {
            events,
            acknowledger: Arc::new(KafkaAcknowledger { consumer }),
            dispatcher,
        })
    }
}
