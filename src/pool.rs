//! Bounded-concurrency scheduler with periodic checkpointing.
//!
//! Products are processed in consecutive batches of the configured width;
//! every worker in a batch gets its own browser session, and a new batch
//! starts only after every session of the previous one has closed. That
//! caps simultaneous browser sessions, outbound sockets, and peak memory in
//! one place. Completed work is flushed to the checkpoint on a product-count
//! cadence so a crash or rate-limit ban never loses finished products.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::sync::mpsc;

use crate::checkpoint::CheckpointSink;
use crate::config::{EngineConfig, Selectors};
use crate::model::{ProductRecord, UNAVAILABLE};
use crate::session::Driver;
use crate::worker::ProductWorker;

/// Progress events emitted while the pool runs.
#[derive(Debug, Clone)]
pub enum CrawlEvent {
    /// One product finished (resolved or marked unavailable).
    ProductDone { id: String, availability: String },
    /// A checkpoint flush completed.
    Flushed { products: usize },
}

/// Runs the variant walk over the whole product set.
pub struct CheckpointedPool {
    driver: Arc<dyn Driver>,
    sink: Arc<dyn CheckpointSink>,
    worker: ProductWorker,
    concurrency: usize,
    checkpoint_every: usize,
}

impl CheckpointedPool {
    pub fn new(
        driver: Arc<dyn Driver>,
        sink: Arc<dyn CheckpointSink>,
        engine: &EngineConfig,
        selectors: &Selectors,
    ) -> Result<Self> {
        Ok(Self {
            driver,
            sink,
            worker: ProductWorker::new(engine, selectors)?,
            concurrency: engine.concurrency.max(1),
            checkpoint_every: engine.checkpoint_every.max(1),
        })
    }

    /// Process every pending record in place, flushing on cadence and once
    /// more at the end.
    ///
    /// Per-product failures are absorbed (the product is marked
    /// unavailable); only checkpoint-write failures abort the run.
    pub async fn run(
        &self,
        records: &mut [ProductRecord],
        event_tx: mpsc::Sender<CrawlEvent>,
    ) -> Result<()> {
        let total = records.len();
        tracing::info!(
            total,
            concurrency = self.concurrency,
            checkpoint_every = self.checkpoint_every,
            "starting variant walk"
        );

        let mut processed = 0usize;
        let mut last_flush_on_boundary = false;

        let mut start = 0usize;
        while start < total {
            let end = (start + self.concurrency).min(total);
            {
                let batch = &mut records[start..end];
                join_all(
                    batch
                        .iter_mut()
                        .map(|record| self.run_one(record, &event_tx)),
                )
                .await;
            }

            // Cadence accounting is per completed product, independent of
            // where batch boundaries fall.
            for _ in start..end {
                processed += 1;
                last_flush_on_boundary = processed % self.checkpoint_every == 0;
                if last_flush_on_boundary {
                    self.flush(records, &event_tx).await?;
                }
            }
            start = end;
        }

        // Unconditional final flush, except when the last completion already
        // landed exactly on a cadence boundary.
        if !last_flush_on_boundary {
            self.flush(records, &event_tx).await?;
        }

        tracing::info!(total, "variant walk finished");
        Ok(())
    }

    async fn flush(
        &self,
        records: &[ProductRecord],
        event_tx: &mpsc::Sender<CrawlEvent>,
    ) -> Result<()> {
        // Losing progress silently would defeat the point of checkpointing,
        // so a failed flush is fatal to the run.
        self.sink
            .flush(records)
            .context("writing checkpoint snapshot")?;
        let _ = event_tx
            .send(CrawlEvent::Flushed {
                products: records.len(),
            })
            .await;
        Ok(())
    }

    /// Run one product to completion, absorbing every failure.
    async fn run_one(&self, record: &mut ProductRecord, event_tx: &mpsc::Sender<CrawlEvent>) {
        if !record.needs_sizes() {
            tracing::debug!(product = %record.id, "already resolved, skipping");
            return;
        }

        // Products without variant refs never need a browser session.
        if record.variants.is_empty() {
            record.sizes = Some(UNAVAILABLE.to_string());
        } else if let Err(err) = self.process(record).await {
            tracing::warn!(
                product = %record.id,
                error = %err,
                "worker failed, marking product unavailable"
            );
            record.sizes = Some(UNAVAILABLE.to_string());
        }

        let availability = record.sizes.clone().unwrap_or_default();
        let _ = event_tx
            .send(CrawlEvent::ProductDone {
                id: record.id.clone(),
                availability,
            })
            .await;
    }

    async fn process(&self, record: &mut ProductRecord) -> Result<()> {
        let session = self
            .driver
            .open_session()
            .await
            .context("opening browser session")?;
        let result = self.worker.run(record, session.as_ref()).await;
        if let Err(err) = session.close().await {
            tracing::debug!(error = %err, "closing session failed");
        }
        result
    }
}
