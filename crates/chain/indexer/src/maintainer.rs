//! Per-height index maintenance.
//!
//! A height is committed exactly once through [`IndexMaintainer::process_block`]
//! (or a batch through [`IndexMaintainer::process_blocks`]): primary data and
//! every derived index land in one store transaction, then the block, its
//! transactions and its logs are offered to the event bus. Publishing is
//! best effort and never fails the height.
//!
//! A height whose primary data was stored without its index batch is
//! repaired with [`IndexMaintainer::reindex_height`], which rebuilds the
//! bundle from the store and replaces the height's secondary rows.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chainidx_events::{EventBus, IndexedEvent};
use chainidx_operations::config::ChainConfig;
use chainidx_operations::IndexerMetrics;
use chainidx_primitives::{BlockBundle, InternalCall, InternalTransaction};
use chainidx_store::{IndexBatch, IndexStore, StoreResultExt};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::decoder::EventDecoder;
use crate::derive::{announced_epoch, derive_batch, Derivation, EpochOverlay, IndexSelection};
use crate::error::{IndexerError, IndexerResult};

/// Chain parameters that affect derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintainerConfig {
    /// Chain id authorizations must name to apply (zero always applies).
    pub chain_id: u64,
    /// Blocks per WBFT epoch.
    pub epoch_length: u64,
}

impl From<&ChainConfig> for MaintainerConfig {
    fn from(config: &ChainConfig) -> Self {
        Self {
            chain_id: config.chain_id,
            epoch_length: config.epoch_length,
        }
    }
}

/// Outcome of committing one height.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub height: u64,
    pub transactions: u64,
    /// Secondary rows written.
    pub records: u64,
    /// Logs, extra data or authorizations skipped as undecodable.
    pub decode_failures: u64,
    pub events_published: u64,
    pub events_rejected: u64,
}

/// Derives and commits secondary indexes for a store.
pub struct IndexMaintainer<S> {
    store: Arc<S>,
    decoder: Arc<EventDecoder>,
    config: MaintainerConfig,
    selection: IndexSelection,
    bus: Option<EventBus>,
    metrics: Option<IndexerMetrics>,
}

impl<S: IndexStore> IndexMaintainer<S> {
    /// Index families are chosen from what the store supports.
    pub fn new(
        store: Arc<S>,
        decoder: Arc<EventDecoder>,
        config: MaintainerConfig,
        bus: Option<EventBus>,
        metrics: Option<IndexerMetrics>,
    ) -> Self {
        let selection = IndexSelection::from_capabilities(store.as_ref());
        info!(
            chain_id = config.chain_id,
            epoch_length = config.epoch_length,
            ?selection,
            publishing = bus.is_some(),
            "Index maintainer ready"
        );
        Self {
            store,
            decoder,
            config,
            selection,
            bus,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn decoder(&self) -> &Arc<EventDecoder> {
        &self.decoder
    }

    pub fn selection(&self) -> IndexSelection {
        self.selection
    }

    /// Derive a height's batch without writing anything.
    ///
    /// Validator sets come from the store, so a height whose epoch was
    /// announced by an uncommitted height only resolves through
    /// [`Self::process_blocks`].
    pub fn derive_batch(&self, bundle: &BlockBundle) -> IndexerResult<IndexBatch> {
        bundle.validate()?;
        let overlay = EpochOverlay::new(self.store.consensus());
        Ok(self.derive(bundle, &overlay)?.batch)
    }

    /// Validate, derive, commit and publish one height.
    pub fn process_block(&self, bundle: &BlockBundle) -> IndexerResult<CommitSummary> {
        bundle.validate()?;
        let started = Instant::now();
        let overlay = EpochOverlay::new(self.store.consensus());
        let derivation = self.derive(bundle, &overlay)?;
        self.commit(bundle, derivation, started.elapsed())
    }

    /// Index several heights: derived in parallel, committed in height order.
    ///
    /// Every bundle is validated before anything is written. Epochs announced
    /// by earlier heights of the batch are visible to later ones. On a store
    /// error the heights before the failing one stay committed.
    pub fn process_blocks(&self, bundles: &[BlockBundle]) -> IndexerResult<Vec<CommitSummary>> {
        let mut ordered: Vec<&BlockBundle> = bundles.iter().collect();
        ordered.sort_by_key(|bundle| bundle.number());
        for (previous, next) in ordered.iter().zip(ordered.iter().skip(1)) {
            if previous.number() == next.number() {
                return Err(IndexerError::InvalidInput(format!(
                    "height {} appears more than once",
                    next.number()
                )));
            }
        }
        for bundle in &ordered {
            bundle.validate()?;
        }

        let mut overlay = EpochOverlay::new(self.store.consensus());
        if self.selection.consensus {
            for bundle in &ordered {
                if let Ok(Some(epoch)) = announced_epoch(&bundle.block, self.config.epoch_length) {
                    overlay.insert(epoch);
                }
            }
        }

        let derived: Vec<IndexerResult<(Derivation, Duration)>> = ordered
            .par_iter()
            .map(|bundle| {
                let started = Instant::now();
                let derivation = self.derive(bundle, &overlay)?;
                Ok((derivation, started.elapsed()))
            })
            .collect();

        let mut summaries = Vec::with_capacity(ordered.len());
        for (bundle, result) in ordered.into_iter().zip(derived) {
            let (derivation, elapsed) = result?;
            summaries.push(self.commit(bundle, derivation, elapsed)?);
        }
        debug!(
            heights = summaries.len(),
            announced_epochs = overlay.len(),
            "Indexed batch"
        );
        Ok(summaries)
    }

    /// Rebuild a stored height's secondary indexes from its primary data.
    ///
    /// Nothing is published: subscribers only hear about a height once.
    pub fn reindex_height(&self, height: u64) -> IndexerResult<CommitSummary> {
        let started = Instant::now();
        let bundle = self.load_bundle(height)?;
        bundle.validate()?;

        let overlay = EpochOverlay::new(self.store.consensus());
        let derivation = self.derive(&bundle, &overlay)?;
        self.store.commit_index(&derivation.batch)?;

        let summary = CommitSummary {
            height,
            transactions: bundle.transactions.len() as u64,
            records: derivation.batch.record_count() as u64,
            decode_failures: derivation.decode_failures,
            ..CommitSummary::default()
        };
        self.observe(&summary, started.elapsed());
        info!(
            height,
            records = summary.records,
            "Reindexed height"
        );
        Ok(summary)
    }

    /// Reindex up to `limit` heights whose index phase never completed.
    pub fn reindex_pending(&self, limit: usize) -> IndexerResult<Vec<CommitSummary>> {
        self.store
            .pending_index_heights(limit)?
            .into_iter()
            .map(|height| self.reindex_height(height))
            .collect()
    }

    /// Remove a height and everything derived from it.
    pub fn rollback_height(&self, height: u64) -> IndexerResult<()> {
        self.store.delete_block(height)?;
        if let Some(metrics) = &self.metrics {
            metrics.heights_rolled_back.inc();
            self.refresh_watermarks(metrics);
        }
        info!(height, "Rolled back height");
        Ok(())
    }

    /// Highest contiguous height with primary data, `None` when empty.
    pub fn raw_watermark(&self) -> IndexerResult<Option<u64>> {
        Ok(self.store.raw_height().optional()?)
    }

    /// Highest contiguous height with committed indexes, `None` when empty.
    pub fn indexed_watermark(&self) -> IndexerResult<Option<u64>> {
        Ok(self.store.latest_height().optional()?)
    }

    fn derive(&self, bundle: &BlockBundle, overlay: &EpochOverlay<'_>) -> IndexerResult<Derivation> {
        Ok(derive_batch(
            bundle,
            self.selection,
            &self.decoder,
            &self.config,
            overlay,
        )?)
    }

    fn commit(
        &self,
        bundle: &BlockBundle,
        derivation: Derivation,
        derive_time: Duration,
    ) -> IndexerResult<CommitSummary> {
        let started = Instant::now();
        self.store.commit_height(bundle, &derivation.batch)?;

        let (events_published, events_rejected) = self.publish(bundle);
        let summary = CommitSummary {
            height: bundle.number(),
            transactions: bundle.transactions.len() as u64,
            records: derivation.batch.record_count() as u64,
            decode_failures: derivation.decode_failures,
            events_published,
            events_rejected,
        };
        self.observe(&summary, derive_time + started.elapsed());
        debug!(
            height = summary.height,
            transactions = summary.transactions,
            records = summary.records,
            decode_failures = summary.decode_failures,
            "Indexed height"
        );
        Ok(summary)
    }

    fn publish(&self, bundle: &BlockBundle) -> (u64, u64) {
        let Some(bus) = &self.bus else {
            return (0, 0);
        };
        let (mut published, mut rejected) = (0u64, 0u64);
        for event in IndexedEvent::from_bundle(bundle) {
            if bus.publish(event) {
                published += 1;
            } else {
                rejected += 1;
            }
        }
        if rejected > 0 {
            warn!(
                height = bundle.number(),
                rejected,
                "Event bus refused events"
            );
        }
        (published, rejected)
    }

    fn observe(&self, summary: &CommitSummary, elapsed: Duration) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        metrics.record_block(
            summary.height,
            summary.transactions,
            summary.records,
            elapsed.as_secs_f64(),
        );
        metrics.decode_failures.inc_by(summary.decode_failures);
        metrics.record_publish(summary.events_published, summary.events_rejected);
        self.refresh_watermarks(metrics);
    }

    fn refresh_watermarks(&self, metrics: &IndexerMetrics) {
        match (self.raw_watermark(), self.indexed_watermark()) {
            (Ok(raw), Ok(indexed)) => metrics.set_watermarks(raw, indexed),
            (Err(err), _) | (_, Err(err)) => {
                warn!(%err, "Could not read watermarks");
            }
        }
    }

    /// Reassemble the bundle a height was committed from.
    fn load_bundle(&self, height: u64) -> IndexerResult<BlockBundle> {
        let block = self.store.get_block(height)?;
        let transactions = self.store.get_block_transactions(height)?;
        let receipts = self.store.get_receipts_by_block_number(height)?;

        let mut internal_calls = Vec::new();
        if let Some(reader) = self.store.internal_transactions() {
            for tx in &transactions {
                internal_calls.extend(
                    reader
                        .internal_transactions_by_transaction(tx.hash)?
                        .into_iter()
                        .map(call_from_record),
                );
            }
        }

        let balance_snapshots = match self.store.balances() {
            Some(reader) => reader.balance_snapshots_at(height)?,
            None => Vec::new(),
        };

        Ok(BlockBundle {
            block,
            transactions,
            receipts,
            internal_calls,
            balance_snapshots,
        })
    }
}

fn call_from_record(record: InternalTransaction) -> InternalCall {
    InternalCall {
        transaction_hash: record.transaction_hash,
        call_index: record.call_index,
        call_type: record.call_type,
        from: record.from,
        to: record.to,
        value: record.value,
        gas: record.gas,
        gas_used: record.gas_used,
        input: record.input,
        depth: record.depth,
        error: record.error,
    }
}
