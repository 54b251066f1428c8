//! # Purpose
//! Exercise the full queue protocol in one process: create a bounded queue
//! on an in-memory store, pump messages through a producer stream and a
//! consumer stream, then print the counters the queue kept.
//!
//! # Flow summary
//! 1. Create the queue with the requested bound.
//! 2. Spawn a producer task feeding a write stream.
//! 3. Drain a read stream until the queue closes.
//! 4. Print the queue's stats and tear it down.
use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use weir::Queue;
use weir_store::MemoryStore;

#[derive(Parser, Debug)]
#[command(name = "pipeline-demo")]
#[command(about = "Pump messages through a store-backed queue")]
struct Args {
    /// Queue capacity (0 = unbounded)
    #[arg(long, default_value = "8")]
    bound: u64,

    /// Number of messages to transfer
    #[arg(long, default_value = "64")]
    messages: u64,

    /// Stream channel depth
    #[arg(long, default_value = "5")]
    buffer: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let store = Arc::new(MemoryStore::new());

    let mut queue = Queue::open(store.clone(), "demo", "pipeline")
        .await
        .context("open queue")?;
    queue.create(args.bound).await.context("create queue")?;
    info!(bound = args.bound, messages = args.messages, "queue created");

    let mut writer = queue
        .open_write_stream(args.buffer)
        .await
        .context("open write stream")?;
    let mut reader = queue
        .open_read_stream(args.buffer)
        .await
        .context("open read stream")?;

    let total = args.messages;
    let producer = tokio::spawn(async move {
        for index in 0..total {
            let body = format!("message-{index:04}");
            writer.send(Bytes::from(body)).await?;
        }
        writer.finish().await
    });

    let mut received = 0u64;
    while received < total {
        match reader.recv().await.context("recv")? {
            Some(payload) => {
                received += 1;
                if received % 16 == 0 {
                    info!(received, last = %String::from_utf8_lossy(&payload), "progress");
                }
            }
            None => break,
        }
    }

    producer
        .await
        .context("producer task")?
        .context("producer stream")?;

    let stats = queue.stats().await.context("stats")?;
    info!(
        produced_messages = stats.produced_messages,
        produced_bytes = stats.produced_bytes,
        consumed_messages = stats.consumed_messages,
        consumed_bytes = stats.consumed_bytes,
        "transfer complete"
    );

    queue.close().await.context("close queue")?;
    queue.delete().await.context("delete queue")?;
    info!("queue deleted");
    Ok(())
}
