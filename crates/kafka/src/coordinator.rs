//! Consumption coordinator.
//!
//! Runs one worker task per claimed partition. Each worker takes a record,
//! decodes it, writes the formatted text to the shared sink and only then
//! acknowledges its offset, strictly in delivery order. Group events
//! (assignments, revocations, client errors) arrive on their own channel and
//! are drained by the coordinator loop independently of the workers.

use crate::error::{Error, Result};
use crate::format::{format, FormatOptions};
use crate::proto::ProtoDecoder;
use crate::sink::RecordSink;
use kafka_types::{StreamRecord, TopicPartition};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of a consumer group session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Group membership not yet established.
    Joining,
    /// Partitions are assigned and being consumed.
    Claimed,
    /// Partitions were revoked; waiting for the next assignment.
    Rebalancing,
    /// Terminal.
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Joining, Claimed)
                | (Claimed, Claimed)
                | (Claimed, Rebalancing)
                | (Rebalancing, Rebalancing)
                | (Rebalancing, Claimed)
                | (Joining | Claimed | Rebalancing, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Joining => "joining",
            SessionState::Claimed => "claimed",
            SessionState::Rebalancing => "rebalancing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Records for one newly claimed partition, in delivery order.
#[derive(Debug)]
pub struct PartitionFeed {
    pub partition: TopicPartition,
    pub records: mpsc::Receiver<StreamRecord>,
}

/// Notifications from the group client.
#[derive(Debug)]
pub enum GroupEvent {
    Assigned(Vec<PartitionFeed>),
    Revoked(Vec<TopicPartition>),
    Error { message: String, fatal: bool },
}

/// Commits a record's offset back to the group.
pub trait Acknowledger: Send + Sync {
    fn acknowledge(&self, record: &StreamRecord) -> Result<()>;
}

/// What to do with a record whose payload does not decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeErrorPolicy {
    /// Report the record and acknowledge it.
    #[default]
    Skip,
    /// Report the record, leave it unacknowledged, and end the session.
    Abort,
}

impl FromStr for DecodeErrorPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(Error::InvalidConfig(format!(
                "unknown decode error policy '{other}', expected 'skip' or 'abort'"
            ))),
        }
    }
}

/// Counts reported when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub records_written: u64,
    pub records_skipped: u64,
}

struct WorkerFailure {
    partition: TopicPartition,
    error: Error,
}

/// State shared by every partition worker.
struct WorkerContext {
    decoder: ProtoDecoder,
    format: FormatOptions,
    policy: DecodeErrorPolicy,
    sink: Arc<dyn RecordSink>,
    acknowledger: Arc<dyn Acknowledger>,
    written: AtomicU64,
    skipped: AtomicU64,
    failures: mpsc::UnboundedSender<WorkerFailure>,
}

impl WorkerContext {
    async fn process(&self, record: &StreamRecord) -> Result<()> {
        match self.decoder.decode(&record.value) {
            Ok(node) => {
                let text = format(&node, &self.format)?;
                self.sink.write_record(&text).await.map_err(Error::Sink)?;
                self.acknowledger.acknowledge(record)?;
                self.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(source) => {
                error!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %source,
                    "Failed to decode record"
                );
                match self.policy {
                    DecodeErrorPolicy::Skip => {
                        self.acknowledger.acknowledge(record)?;
                        self.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    DecodeErrorPolicy::Abort => {
                        return Err(Error::RecordDecode {
                            topic: record.topic.clone(),
                            partition: record.partition,
                            offset: record.offset,
                            source,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            records_written: self.written.load(Ordering::Relaxed),
            records_skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

struct PartitionWorker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PartitionWorker {
    /// Stop taking records and wait for the in-flight one to finish.
    async fn stop(self, partition: &TopicPartition) -> Result<()> {
        self.cancel.cancel();
        self.handle
            .await
            .map_err(|e| Error::Worker(partition.to_string(), e.to_string()))
    }
}

async fn consume_partition(
    ctx: Arc<WorkerContext>,
    partition: TopicPartition,
    mut records: mpsc::Receiver<StreamRecord>,
    cancel: CancellationToken,
) {
    debug!(%partition, "Partition worker started");
    loop {
        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = records.recv() => match next {
                Some(record) => record,
                None => break,
            },
        };

        if let Err(error) = ctx.process(&record).await {
            error!(%partition, offset = record.offset, %error, "Partition worker failed");
            let _ = ctx.failures.send(WorkerFailure { partition, error });
            return;
        }
    }
    debug!(%partition, "Partition worker stopped");
}

/// Drives a group session from its event stream until shutdown, a fatal
/// client error, or a worker failure.
pub struct Coordinator {
    decoder: ProtoDecoder,
    format: FormatOptions,
    policy: DecodeErrorPolicy,
    sink: Arc<dyn RecordSink>,
    acknowledger: Arc<dyn Acknowledger>,
    state: watch::Sender<SessionState>,
}

impl Coordinator {
    pub fn new(
        decoder: ProtoDecoder,
        format: FormatOptions,
        policy: DecodeErrorPolicy,
        sink: Arc<dyn RecordSink>,
        acknowledger: Arc<dyn Acknowledger>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Joining);
        Self {
            decoder,
            format,
            policy,
            sink,
            acknowledger,
            state,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state changes from outside the session.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn transition(&self, next: SessionState) -> Result<()> {
        let from = self.state();
        if !from.can_transition_to(next) {
            return Err(Error::InvalidTransition { from, to: next });
        }
        if from != next {
            debug!(%from, to = %next, "Session state changed");
        }
        self.state.send_replace(next);
        Ok(())
    }

    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<GroupEvent>,
        shutdown: CancellationToken,
    ) -> Result<SessionSummary> {
        let (failures, mut failed) = mpsc::unbounded_channel();
        let ctx = Arc::new(WorkerContext {
            decoder: self.decoder.clone(),
            format: self.format,
            policy: self.policy,
            sink: Arc::clone(&self.sink),
            acknowledger: Arc::clone(&self.acknowledger),
            written: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failures,
        });
        let mut workers: HashMap<TopicPartition, PartitionWorker> = HashMap::new();

        let mut outcome = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping partition workers");
                    break Ok(());
                }
                Some(failure) = failed.recv() => {
                    workers.remove(&failure.partition);
                    break Err(failure.error);
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("Group event channel closed");
                        break Ok(());
                    };
                    if let Err(e) = self.handle_event(event, &ctx, &mut workers, &shutdown).await {
                        break Err(e);
                    }
                }
            }
        };

        for (partition, worker) in workers.drain() {
            if let Err(e) = worker.stop(&partition).await {
                warn!(%partition, error = %e, "Partition worker did not stop cleanly");
            }
        }
        // A worker may have failed while the others were stopping.
        if outcome.is_ok() {
            if let Ok(failure) = failed.try_recv() {
                outcome = Err(failure.error);
            }
        }
        self.state.send_replace(SessionState::Closed);

        let summary = ctx.summary();
        info!(
            written = summary.records_written,
            skipped = summary.records_skipped,
            "Session closed"
        );
        outcome.map(|()| summary)
    }

    async fn handle_event(
        &self,
        event: GroupEvent,
        ctx: &Arc<WorkerContext>,
        workers: &mut HashMap<TopicPartition, PartitionWorker>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        match event {
            GroupEvent::Assigned(feeds) => {
                for feed in feeds {
                    info!(partition = %feed.partition, "Partition assigned");
                    let cancel = shutdown.child_token();
                    let handle = tokio::spawn(consume_partition(
                        Arc::clone(ctx),
                        feed.partition.clone(),
                        feed.records,
                        cancel.clone(),
                    ));
                    if let Some(previous) = workers.insert(feed.partition.clone(), PartitionWorker { cancel, handle }) {
                        previous.stop(&feed.partition).await?;
                    }
                }
                self.transition(SessionState::Claimed)
            }
            GroupEvent::Revoked(partitions) => {
                if self.state() == SessionState::Joining {
                    debug!("Ignoring revocation before first assignment");
                    return Ok(());
                }
                for partition in partitions {
                    if let Some(worker) = workers.remove(&partition) {
                        info!(%partition, "Partition revoked");
                        worker.stop(&partition).await?;
                    }
                }
                self.transition(SessionState::Rebalancing)
            }
            GroupEvent::Error { message, fatal: true } => {
                error!(%message, "Fatal consumer group error");
                Err(Error::Delivery {
                    message,
                    fatal: true,
                })
            }
            GroupEvent::Error { message, fatal: false } => {
                warn!(%message, "Consumer group error");
                Ok(())
            }
        }
    }
}
