//! Output sinks shared by all partition workers.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Destination for formatted records.
///
/// Implementations must write each record atomically with respect to other
/// callers, since partition workers write concurrently.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Write one formatted record followed by a newline. Returns only once
    /// the record has been handed to the underlying writer in full.
    async fn write_record(&self, text: &str) -> io::Result<()>;
}

/// Sink over any async writer, serialising whole records behind a mutex.
pub struct WriterSink<W> {
    writer: Mutex<W>,
}

impl<W> WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl WriterSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> RecordSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_record(&self, text: &str) -> io::Result<()> {
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }
}
