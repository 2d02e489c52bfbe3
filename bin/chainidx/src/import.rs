//! `chainidx import`: feed JSON-lines block bundles through the maintainer.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chainidx_events::{EventBus, IndexedEvent, SubscriptionFilter, SubscriptionHandle};
use chainidx_operations::{IndexerConfig, MetricsRegistry};
use chainidx_primitives::BlockBundle;
use clap::Args;

use crate::{open_maintainer, CliResult};

#[derive(Args)]
pub(crate) struct ImportArgs {
    /// File with one JSON-encoded block bundle per line
    #[arg(long)]
    file: PathBuf,

    /// Heights derived in parallel and committed together
    #[arg(long, default_value_t = 64)]
    batch_size: usize,

    /// Print Prometheus metrics when the import finishes
    #[arg(long)]
    metrics: bool,
}

/// Parse a JSON-lines file. Blank lines are skipped; the first malformed
/// line aborts with its line number.
pub(crate) fn read_bundles(path: &Path) -> CliResult<Vec<BlockBundle>> {
    let reader = BufReader::new(File::open(path)?);
    let mut bundles = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let bundle = serde_json::from_str(&line)
            .map_err(|err| format!("{}:{}: {err}", path.display(), index + 1))?;
        bundles.push(bundle);
    }
    Ok(bundles)
}

pub(crate) async fn run(config: IndexerConfig, args: ImportArgs) -> CliResult<()> {
    if args.batch_size == 0 {
        return Err("--batch-size must be at least 1".into());
    }
    let bundles = read_bundles(&args.file)?;
    tracing::info!(file = %args.file.display(), bundles = bundles.len(), "Importing block bundles");

    let bus = EventBus::spawn(config.events.clone())?;
    let deliveries = tokio::spawn(log_deliveries(
        bus.subscribe_default("import-log", SubscriptionFilter::all())?,
    ));
    let registry = config
        .observability
        .metrics_enabled
        .then(MetricsRegistry::new);
    let maintainer = open_maintainer(&config, Some(bus.clone()), registry.as_ref())?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current batch");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let batch_size = args.batch_size;
    let (heights, transactions) = tokio::task::spawn_blocking(move || -> CliResult<(u64, u64)> {
        let (mut heights, mut transactions) = (0u64, 0u64);
        for batch in bundles.chunks(batch_size) {
            if interrupted.load(Ordering::SeqCst) {
                break;
            }
            for summary in maintainer.process_blocks(batch)? {
                heights += 1;
                transactions += summary.transactions;
            }
            tracing::info!(
                indexed = ?maintainer.indexed_watermark()?,
                "Batch committed"
            );
        }
        Ok((heights, transactions))
    })
    .await??;

    bus.shutdown().await;
    let delivered = deliveries.await?;
    let stats = bus.stats();
    tracing::info!(
        heights,
        transactions,
        delivered,
        published = stats.published,
        rejected = stats.rejected,
        "Import finished"
    );

    if args.metrics {
        if let Some(registry) = &registry {
            print!("{}", registry.encode_prometheus());
        }
    }
    Ok(())
}

/// Log each delivered event until the bus shuts down.
async fn log_deliveries(mut subscription: SubscriptionHandle) -> u64 {
    let mut delivered = 0u64;
    while let Some(event) = subscription.recv().await {
        delivered += 1;
        match &event {
            IndexedEvent::Block(block) => {
                tracing::debug!(height = block.number, hash = %block.hash, "Block delivered");
            }
            IndexedEvent::Transaction(tx) => {
                tracing::trace!(hash = %tx.transaction.hash, "Transaction delivered");
            }
            IndexedEvent::Log(log) => {
                tracing::trace!(address = %log.address, index = log.log_index, "Log delivered");
            }
        }
    }
    delivered
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chainidx_testing::chain;
    use std::io::Write;

    #[test]
    fn test_read_bundles_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.jsonl");
        let mut file = File::create(&path).unwrap();
        for bundle in chain(3) {
            writeln!(file, "{}", serde_json::to_string(&bundle).unwrap()).unwrap();
            writeln!(file).unwrap();
        }
        drop(file);

        let bundles = read_bundles(&path).unwrap();
        assert_eq!(bundles, chain(3));
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.jsonl");
        let first = serde_json::to_string(&chain(1)[0]).unwrap();
        std::fs::write(&path, format!("{first}\n{{\"block\": 7}}\n")).unwrap();

        let err = read_bundles(&path).unwrap_err().to_string();
        assert!(err.contains("blocks.jsonl:2"), "{err}");
    }
}
