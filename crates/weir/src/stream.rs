// Channel adapters over the blocking protocol. Each endpoint spawns one
// background worker that owns its own store connection, so a parked
// blocking pop never wedges the caller's handle.
use crate::config::stream_buffer;
use crate::error::{QueueError, Result};
use crate::queue::Queue;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use weir_store::StoreError;

enum ReadEvent {
    Payload(Bytes),
    Fatal(QueueError),
}

/// Consumer endpoint fed by a background worker looping on `get`.
pub struct ReadStream {
    events: mpsc::Receiver<ReadEvent>,
}

impl ReadStream {
    /// Next payload in FIFO order. `Ok(None)` once the queue has closed
    /// and drained; a worker fault surfaces here once, then the stream
    /// ends.
    pub async fn recv(&mut self) -> Result<Option<Bytes>> {
        match self.events.recv().await {
            Some(ReadEvent::Payload(payload)) => Ok(Some(payload)),
            Some(ReadEvent::Fatal(err)) => Err(err),
            None => Ok(None),
        }
    }
}

/// Producer endpoint draining into a background worker that calls `put`.
///
/// Backpressure is end to end: a full queue parks the worker, which fills
/// this channel, which parks `send`.
pub struct WriteStream {
    payloads: mpsc::Sender<Bytes>,
    fatal: oneshot::Receiver<QueueError>,
}

impl WriteStream {
    /// Hand a payload to the background producer.
    pub async fn send(&mut self, payload: Bytes) -> Result<()> {
        if self.payloads.send(payload).await.is_ok() {
            return Ok(());
        }
        // The worker is gone; report why if it told us.
        match self.fatal.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Err(worker_gone()),
        }
    }

    /// Stop accepting payloads, wait for the worker to drain the channel,
    /// and report its final state.
    pub async fn finish(self) -> Result<()> {
        drop(self.payloads);
        match self.fatal.await {
            Ok(err) => Err(err),
            // The worker dropped its sender without reporting: clean exit.
            Err(_) => Ok(()),
        }
    }
}

impl Queue {
    /// Spawn a consumer worker on its own connection and return the
    /// receiving end. `buffer` of zero selects the configured default.
    pub async fn open_read_stream(&self, buffer: usize) -> Result<ReadStream> {
        let depth = stream_buffer(buffer);
        let queue = self.detached().await?;
        let (events_tx, events_rx) = mpsc::channel(depth);
        tokio::spawn(run_read_worker(queue, events_tx, depth));
        Ok(ReadStream { events: events_rx })
    }

    /// Spawn a producer worker on its own connection and return the
    /// sending end. `buffer` of zero selects the configured default.
    pub async fn open_write_stream(&self, buffer: usize) -> Result<WriteStream> {
        let depth = stream_buffer(buffer);
        let queue = self.detached().await?;
        let (payloads_tx, payloads_rx) = mpsc::channel(depth);
        let (fatal_tx, fatal_rx) = oneshot::channel();
        tokio::spawn(run_write_worker(queue, payloads_rx, fatal_tx));
        Ok(WriteStream {
            payloads: payloads_tx,
            fatal: fatal_rx,
        })
    }
}

async fn run_read_worker(mut queue: Queue, events: mpsc::Sender<ReadEvent>, depth: usize) {
    loop {
        match queue.get().await {
            Ok(payload) => {
                if events.send(ReadEvent::Payload(payload)).await.is_err() {
                    // Receiver dropped; nobody is listening anymore.
                    break;
                }
                metrics::gauge!("weir_stream_queue_len", "side" => "read")
                    .set(depth.saturating_sub(events.capacity()) as f64);
            }
            // A closed-and-drained queue ends the stream cleanly.
            Err(QueueError::QueueIsClosed) => break,
            Err(err) => {
                metrics::counter!("weir_stream_worker_errors_total", "side" => "read")
                    .increment(1);
                tracing::debug!(error = %err, "read stream worker stopped");
                let _ = events.send(ReadEvent::Fatal(err)).await;
                break;
            }
        }
    }
}

async fn run_write_worker(
    mut queue: Queue,
    mut payloads: mpsc::Receiver<Bytes>,
    fatal: oneshot::Sender<QueueError>,
) {
    let failure = loop {
        match payloads.recv().await {
            Some(payload) => {
                if let Err(err) = queue.put(payload).await {
                    break Some(err);
                }
            }
            // Sender dropped and channel drained: clean shutdown.
            None => break None,
        }
    };
    if let Some(err) = failure {
        metrics::counter!("weir_stream_worker_errors_total", "side" => "write").increment(1);
        tracing::debug!(error = %err, "write stream worker stopped");
        payloads.close();
        let _ = fatal.send(err);
    }
}

fn worker_gone() -> QueueError {
    StoreError::Unexpected(anyhow::anyhow!("stream worker stopped without reporting")).into()
}
