//! Session recording and offline replay.
//!
//! [`RecorderHandler`] wraps a strategy and keeps every raw message the
//! strategy claims. Whenever the connection is lost, or the buffer reaches its
//! limit, the buffered lines are handed to a writer thread that appends them
//! to the file, one message per line. [`RecorderHandler::flush`] waits for
//! every handed-off line to be written. [`replay_file`] feeds such a file back
//! into a strategy without a network.

use crate::cex::kucoin::types::{CandleTopic, TickerPair};
use crate::common::{Result, WiredExchangeError};
use crate::websocket::handler::{
    CandleStrategy, HandlerScope, MessageHandler, Notification, TickerStrategy,
};
use crate::websocket::message::InboundMessage;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::{debug, error, info};

/// Lines kept in memory before they are handed to the writer.
pub const DEFAULT_MAX_BUFFERED: usize = 1_000;

struct Batch {
    lines: Vec<String>,
    done: Option<mpsc::Sender<Result<usize>>>,
}

/// Appends batches to one file, in the order they were sent.
struct RecordWriter {
    batches: mpsc::Sender<Batch>,
}

impl RecordWriter {
    fn spawn(path: PathBuf) -> Result<Self> {
        let (batches, incoming) = mpsc::channel::<Batch>();
        std::thread::Builder::new()
            .name("wired-recorder".to_string())
            .spawn(move || {
                for batch in incoming {
                    let result = append_lines(&path, &batch.lines);
                    match batch.done {
                        Some(done) => {
                            let _ = done.send(result);
                        }
                        None => {
                            if let Err(e) = result {
                                error!(error = %e, path = %path.display(), "failed to write recorded messages");
                            }
                        }
                    }
                }
            })?;
        Ok(Self { batches })
    }

    fn send(&self, batch: Batch) -> Result<()> {
        self.batches.send(batch).map_err(|_| writer_stopped())
    }
}

fn writer_stopped() -> WiredExchangeError {
    WiredExchangeError::Io(std::io::Error::other("recorder writer stopped"))
}

fn append_lines(path: &Path, lines: &[String]) -> Result<usize> {
    if lines.is_empty() {
        return Ok(0);
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    file.flush()?;
    debug!(written = lines.len(), path = %path.display(), "recorded messages written");
    Ok(lines.len())
}

pub struct RecorderHandler<S> {
    inner: S,
    path: PathBuf,
    buffer: Vec<String>,
    max_buffered: usize,
    writer: Option<RecordWriter>,
}

impl<S: MessageHandler> RecorderHandler<S> {
    pub fn new(inner: S, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            path: path.into(),
            buffer: Vec::new(),
            max_buffered: DEFAULT_MAX_BUFFERED,
            writer: None,
        }
    }

    /// Hands the buffer to the writer once it holds `max` lines.
    pub fn with_max_buffered(mut self, max: usize) -> Self {
        self.max_buffered = max.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Messages recorded but not yet handed to the writer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Writes the buffer and waits until every earlier hand-off is on disk.
    /// Returns how many lines this call wrote. Blocks the calling thread.
    pub fn flush(&mut self) -> Result<usize> {
        let lines = std::mem::take(&mut self.buffer);
        let (done, written) = mpsc::channel();
        self.writer()?.send(Batch {
            lines,
            done: Some(done),
        })?;
        written.recv().map_err(|_| writer_stopped())?
    }

    /// Hands the buffer to the writer without waiting.
    fn hand_off(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let lines = std::mem::take(&mut self.buffer);
        let count = lines.len();
        let sent = self
            .writer()
            .and_then(|writer| writer.send(Batch { lines, done: None }));
        if let Err(e) = sent {
            error!(error = %e, dropped = count, path = %self.path.display(), "failed to hand off recorded messages");
        }
    }

    fn writer(&mut self) -> Result<&RecordWriter> {
        if self.writer.is_none() {
            self.writer = Some(RecordWriter::spawn(self.path.clone())?);
        }
        self.writer.as_ref().ok_or_else(writer_stopped)
    }
}

impl<S: MessageHandler> MessageHandler for RecorderHandler<S> {
    fn can_handle(&self, message: &InboundMessage) -> bool {
        self.inner.can_handle(message)
    }

    fn handle(&mut self, message: &InboundMessage) -> Result<bool> {
        self.buffer.push(message.text().trim_end().to_string());
        if self.buffer.len() >= self.max_buffered {
            self.hand_off();
        }
        self.inner.handle(message)
    }

    fn on_notification(&mut self, notification: Notification) {
        if notification == Notification::ConnectionLost {
            self.hand_off();
        }
        self.inner.on_notification(notification);
    }

    fn scope(&self) -> HandlerScope {
        self.inner.scope()
    }
}

impl<S: CandleStrategy> CandleStrategy for RecorderHandler<S> {
    fn topics(&self) -> Vec<CandleTopic> {
        self.inner.topics()
    }
}

impl<S: TickerStrategy> TickerStrategy for RecorderHandler<S> {
    fn tickers(&self) -> Option<Vec<TickerPair>> {
        self.inner.tickers()
    }
}

/// Feeds every message `strategy` claims to it, in order. Returns how many were handled.
pub fn replay_messages<I, H>(messages: I, strategy: &mut H) -> usize
where
    I: IntoIterator,
    I::Item: AsRef<str>,
    H: MessageHandler + ?Sized,
{
    let mut handled = 0;
    for text in messages {
        let text = text.as_ref().trim_end();
        if text.is_empty() {
            continue;
        }
        let message = InboundMessage::new(text);
        if !strategy.can_handle(&message) {
            continue;
        }
        handled += 1;
        if let Err(e) = strategy.handle(&message) {
            error!(error = %e, message = %text, "strategy failed on replayed message");
        }
    }
    handled
}

/// [`replay_messages`] over the lines of a recorded file.
pub fn replay_file<H>(path: impl AsRef<Path>, strategy: &mut H) -> Result<usize>
where
    H: MessageHandler + ?Sized,
{
    let path = path.as_ref();
    let reader = BufReader::new(std::fs::File::open(path)?);
    let lines = reader.lines().collect::<std::io::Result<Vec<_>>>()?;
    let handled = replay_messages(lines, strategy);
    info!(handled, path = %path.display(), "replay finished");
    Ok(handled)
}
