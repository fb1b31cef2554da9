use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::Mutex,
};

use crate::{
    Acknowledger, BusMessage, Delivery, DeliveryStats, MessagePublisher, MessageSubscription,
    Settlement,
};

/// File-backed publisher appending one JSON object per message.
#[derive(Debug, Clone)]
pub struct FileMessagePublisher {
    path: PathBuf,
}

#[derive(Serialize)]
struct TopicRecord<'a> {
    topic: &'a str,
    #[serde(flatten)]
    message: &'a BusMessage,
}

impl FileMessagePublisher {
    /// Creates a publisher that appends JSON lines to the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Destination file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MessagePublisher for FileMessagePublisher {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<String> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;
        let mut data = serde_json::to_vec(&TopicRecord {
            topic,
            message: &message,
        })?;
        data.push(b'\n');
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(message.id)
    }
}

/// Inbound line shape. Lines that do not parse as this are taken as raw text.
#[derive(Deserialize)]
struct InboundLine {
    #[serde(default)]
    id: Option<String>,
    data: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

fn parse_line(line: Vec<u8>) -> BusMessage {
    let Ok(text) = std::str::from_utf8(&line) else {
        return BusMessage::new(line);
    };
    match serde_json::from_str::<InboundLine>(text) {
        Ok(inbound) => {
            let mut message = BusMessage::new(inbound.data).with_attributes(inbound.attributes);
            if let Some(id) = inbound.id {
                message.id = id;
            }
            message
        }
        Err(_) => BusMessage::new(line),
    }
}

fn trim_line_ending(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
}

/// Subscription reading one message per line from an async reader.
///
/// Each line is either a JSON object `{"data": "...", "attributes": {...}}`
/// or plain text used verbatim as the message body. Bytes that are not UTF-8
/// are kept as the raw body. Blank lines are skipped.
/// Settlements are tallied; a line stream cannot redeliver.
pub struct JsonLinesSubscription<R> {
    reader: Mutex<R>,
    stats: Arc<DeliveryStats>,
}

impl<R> std::fmt::Debug for JsonLinesSubscription<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSubscription")
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSubscription<R> {
    /// Wraps a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader: Mutex::new(reader),
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    /// Settlement totals.
    #[must_use]
    pub fn stats(&self) -> Arc<DeliveryStats> {
        Arc::clone(&self.stats)
    }
}

impl JsonLinesSubscription<BufReader<tokio::io::Stdin>> {
    /// Reads messages from standard input.
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl JsonLinesSubscription<BufReader<File>> {
    /// Reads messages from a file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .await
            .with_context(|| format!("opening inbox {}", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> MessageSubscription for JsonLinesSubscription<R> {
    async fn next(&self) -> Result<Option<Delivery>> {
        let mut reader = self.reader.lock().await;
        loop {
            let mut line = Vec::new();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                return Ok(None);
            }
            trim_line_ending(&mut line);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let mut message = parse_line(line);
            message.delivery_attempt = 1;
            return Ok(Some(Delivery::new(
                message,
                TallyAcker(Arc::clone(&self.stats)),
            )));
        }
    }
}

struct TallyAcker(Arc<DeliveryStats>);

impl Acknowledger for TallyAcker {
    fn settle(self: Box<Self>, settlement: Settlement) {
        self.0.record(settlement);
    }
}
