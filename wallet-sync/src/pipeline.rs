//! Block prefetch pipeline.
//!
//! Downloaded blocks wait in a FIFO queue until the wallet has processed them. The queue is
//! refilled in the background while its approximate memory usage is below the configured budget
//! and only one download is ever in flight.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::FutureExt;
use memuse::DynamicUsage;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinError, JoinHandle};

use crate::client::{self, FetchRequest, WalletSyncData, WalletSyncRequest};
use crate::error::ServerError;
use crate::primitives::{Block, BlockHash, TopBlock};
use crate::sync::SyncEvent;
use crate::sync_status::{SynchronizationStatus, LAST_KNOWN_BLOCK_HASHES_SIZE};

/// Memory usage of the queue is only sampled when a block at a multiple of this height is dropped.
pub(crate) const DROP_SAMPLE_INTERVAL: u64 = 10;

/// Result of a download, applied to the pipeline once the download settles.
#[derive(Debug)]
pub(crate) enum FetchOutcome {
    /// Node chain is lower than the wallet height.
    NodeBehind { node_height: u64, wallet_height: u64 },
    /// No more blocks, the wallet is at the top of the chain.
    Synced(TopBlock),
    /// No blocks and no top block.
    NoBlocks,
    /// New blocks in ascending height order.
    Blocks(Vec<Block>),
}

/// Sync position to restart from once an in-flight download settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingReset {
    pub(crate) scan_height: u64,
    pub(crate) scan_timestamp: u64,
}

type DownloadHandle = JoinHandle<Result<FetchOutcome, ServerError>>;

enum FetchState {
    Idle,
    Fetching(DownloadHandle),
    // a reset arrived while downloading. applied after the download's outcome.
    FetchingWithPendingReset(DownloadHandle, PendingReset),
}

pub(crate) struct BlockPipeline {
    fetch_request_sender: UnboundedSender<FetchRequest>,
    stored_blocks: VecDeque<Arc<Block>>,
    synchronization_status: SynchronizationStatus,
    start_height: u64,
    start_timestamp: u64,
    fetch_state: FetchState,
    block_request_size: u32,
    block_store_memory_limit: usize,
    event_senders: Vec<UnboundedSender<SyncEvent>>,
}

impl BlockPipeline {
    pub(crate) fn new(
        fetch_request_sender: UnboundedSender<FetchRequest>,
        synchronization_status: SynchronizationStatus,
        start_height: u64,
        start_timestamp: u64,
        block_request_size: u32,
        block_store_memory_limit: usize,
    ) -> Self {
        Self {
            fetch_request_sender,
            stored_blocks: VecDeque::new(),
            synchronization_status,
            start_height,
            start_timestamp,
            fetch_state: FetchState::Idle,
            block_request_size,
            block_store_memory_limit,
            event_senders: Vec::new(),
        }
    }

    pub(crate) fn height(&self) -> u64 {
        self.synchronization_status.height()
    }

    pub(crate) fn synchronization_status(&self) -> &SynchronizationStatus {
        &self.synchronization_status
    }

    pub(crate) fn scan_heights(&self) -> (u64, u64) {
        (self.start_height, self.start_timestamp)
    }

    #[cfg(test)]
    pub(crate) fn stored_block_count(&self) -> usize {
        self.stored_blocks.len()
    }

    pub(crate) fn is_fetching(&self) -> bool {
        !matches!(self.fetch_state, FetchState::Idle)
    }

    pub(crate) fn fetch_request_sender(&self) -> UnboundedSender<FetchRequest> {
        self.fetch_request_sender.clone()
    }

    pub(crate) fn set_fetch_request_sender(
        &mut self,
        fetch_request_sender: UnboundedSender<FetchRequest>,
    ) {
        self.fetch_request_sender = fetch_request_sender;
    }

    pub(crate) fn subscribe(&mut self) -> UnboundedReceiver<SyncEvent> {
        let (event_sender, event_receiver) = tokio::sync::mpsc::unbounded_channel();
        self.event_senders.push(event_sender);

        event_receiver
    }

    /// Returns up to `block_count` blocks from the front of the queue without removing them.
    ///
    /// Waits for a download if the queue is empty.
    pub(crate) async fn fetch_blocks(&mut self, block_count: usize) -> Vec<Arc<Block>> {
        self.poll();

        if self.stored_blocks.is_empty() {
            tracing::debug!("No blocks stored, fetching more.");
            self.start_fetch();
            self.settle().await;
        }

        self.stored_blocks
            .iter()
            .take(block_count)
            .cloned()
            .collect()
    }

    /// Removes the processed block from the front of the queue and records it in the sync status.
    ///
    /// Only removes the block if it is at the front of the queue, so dropping the same block twice
    /// has no further effect.
    pub(crate) fn drop_block(&mut self, block_height: u64, block_hash: BlockHash) {
        self.poll();

        if self
            .stored_blocks
            .front()
            .is_some_and(|block| block.height() == block_height && block.hash() == block_hash)
        {
            self.stored_blocks.pop_front();
            self.synchronization_status
                .store_block_hash(block_height, block_hash);
        }

        if block_height % DROP_SAMPLE_INTERVAL == 0 && self.should_fetch_more_blocks() {
            self.start_fetch();
        }
    }

    /// Discards all stored blocks and restarts sync from `scan_height`.
    ///
    /// If a download is in flight, the reset is deferred until the download has settled so its
    /// blocks can not be queued after the reset. If this future is dropped before the download
    /// settles, the reset is still applied once it does.
    pub(crate) async fn reset(&mut self, reset: PendingReset) {
        self.poll();

        let handle = match std::mem::replace(&mut self.fetch_state, FetchState::Idle) {
            FetchState::Idle => {
                self.apply_reset(reset);
                return;
            }
            FetchState::Fetching(handle) | FetchState::FetchingWithPendingReset(handle, _) => {
                handle
            }
        };

        tracing::debug!("Download in progress, deferring reset until it completes.");
        self.fetch_state = FetchState::FetchingWithPendingReset(handle, reset);
        self.settle().await;
    }

    /// Applies the outcome of a finished download without waiting.
    pub(crate) fn poll(&mut self) {
        let result = match &mut self.fetch_state {
            FetchState::Idle => return,
            FetchState::Fetching(handle) | FetchState::FetchingWithPendingReset(handle, _) => {
                handle.now_or_never()
            }
        };

        if let Some(result) = result {
            self.complete_fetch(result);
        }
    }

    /// Waits for the in-flight download, if any, and applies its outcome.
    pub(crate) async fn settle(&mut self) {
        let result = match &mut self.fetch_state {
            FetchState::Idle => return,
            FetchState::Fetching(handle) | FetchState::FetchingWithPendingReset(handle, _) => {
                handle.await
            }
        };

        self.complete_fetch(result);
    }

    /// Starts a download in the background unless one is already in flight.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn start_fetch(&mut self) {
        if self.is_fetching() {
            return;
        }

        let request = WalletSyncRequest {
            block_hash_checkpoints: self.block_checkpoints(),
            start_height: self.start_height,
            start_timestamp: self.start_timestamp,
            block_count: self.block_request_size,
        };

        let handle = tokio::spawn(download_blocks(
            self.fetch_request_sender.clone(),
            self.height(),
            request,
        ));
        self.fetch_state = FetchState::Fetching(handle);
    }

    pub(crate) fn approximate_stored_blocks_usage(&self) -> usize {
        self.stored_blocks
            .iter()
            .map(|block| std::mem::size_of::<Block>() + block.dynamic_usage())
            .sum()
    }

    fn should_fetch_more_blocks(&self) -> bool {
        if self.is_fetching() {
            return false;
        }

        let ram_usage = self.approximate_stored_blocks_usage();

        if ram_usage < self.block_store_memory_limit {
            tracing::debug!(
                "Approximate ram usage of stored blocks: {} bytes, fetching more.",
                ram_usage
            );

            return true;
        }

        false
    }

    // hashes of unprocessed then processed blocks, most recent first, followed by the sparse
    // checkpoints
    fn block_checkpoints(&self) -> Vec<BlockHash> {
        let mut checkpoints = self
            .stored_blocks
            .iter()
            .rev()
            .map(|block| block.hash())
            .chain(self.synchronization_status.recent_block_hashes().copied())
            .take(LAST_KNOWN_BLOCK_HASHES_SIZE)
            .collect::<Vec<_>>();
        checkpoints.extend(self.synchronization_status.block_checkpoints().copied());

        checkpoints
    }

    fn complete_fetch(&mut self, result: Result<Result<FetchOutcome, ServerError>, JoinError>) {
        let pending_reset = match std::mem::replace(&mut self.fetch_state, FetchState::Idle) {
            FetchState::FetchingWithPendingReset(_, reset) => Some(reset),
            _ => None,
        };

        match result {
            Ok(Ok(outcome)) => self.apply_outcome(outcome),
            Ok(Err(e)) => tracing::debug!("Failed to get blocks from daemon. {}", e),
            Err(e) => tracing::debug!("Block download task failed. {}", e),
        }

        if let Some(reset) = pending_reset {
            self.apply_reset(reset);
        }
    }

    fn apply_outcome(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::NodeBehind {
                node_height,
                wallet_height,
            } => {
                tracing::debug!(
                    "Node height {} is behind wallet height {}, not fetching blocks.",
                    node_height,
                    wallet_height
                );
            }
            FetchOutcome::Synced(top_block) => {
                // queued blocks advance the sync height as they are dropped
                if !self.stored_blocks.is_empty() {
                    tracing::debug!(
                        "Zero blocks received from daemon, {} blocks still queued",
                        self.stored_blocks.len()
                    );
                    return;
                }

                // keeps the sync height current when the latest blocks hold nothing to scan
                self.synchronization_status
                    .store_block_hash(top_block.height(), top_block.hash());
                self.emit(SyncEvent::HeightChange(top_block.height()));

                tracing::debug!("Zero blocks received from daemon, fully synced");
            }
            FetchOutcome::NoBlocks => {
                tracing::debug!("Zero blocks received from daemon, possibly fully synced");
            }
            FetchOutcome::Blocks(blocks) => {
                // timestamps differ between nodes, a height does not
                if self.start_timestamp != 0 {
                    if let Some(first_block) = blocks.first() {
                        let timestamp = std::mem::replace(&mut self.start_timestamp, 0);
                        self.start_height = first_block.height();

                        tracing::info!(
                            "Scan timestamp {} resolved to height {}",
                            timestamp,
                            self.start_height
                        );
                        self.emit(SyncEvent::ScanHeightResolved {
                            timestamp,
                            height: self.start_height,
                        });
                    }
                }

                self.stored_blocks.extend(blocks.into_iter().map(Arc::new));
            }
        }
    }

    fn apply_reset(&mut self, reset: PendingReset) {
        tracing::info!(
            "Resetting sync to height {}, timestamp {}",
            reset.scan_height,
            reset.scan_timestamp
        );

        self.start_height = reset.scan_height;
        self.start_timestamp = reset.scan_timestamp;
        self.synchronization_status =
            SynchronizationStatus::new(reset.scan_height.saturating_sub(1));
        self.stored_blocks.clear();
    }

    fn emit(&mut self, event: SyncEvent) {
        self.event_senders
            .retain(|event_sender| event_sender.send(event).is_ok());
    }
}

async fn download_blocks(
    fetch_request_sender: UnboundedSender<FetchRequest>,
    wallet_height: u64,
    request: WalletSyncRequest,
) -> Result<FetchOutcome, ServerError> {
    let node_height = client::get_local_node_block_count(fetch_request_sender.clone()).await?;

    if node_height < wallet_height {
        return Ok(FetchOutcome::NodeBehind {
            node_height,
            wallet_height,
        });
    }

    let WalletSyncData { blocks, top_block } =
        client::get_wallet_sync_data(fetch_request_sender, request).await?;

    check_block_order(&blocks)?;

    Ok(match top_block {
        _ if !blocks.is_empty() => FetchOutcome::Blocks(blocks),
        Some(top_block) => FetchOutcome::Synced(top_block),
        None => FetchOutcome::NoBlocks,
    })
}

// blocks must be stored in chain order for drop_block to advance the height
fn check_block_order(blocks: &[Block]) -> Result<(), ServerError> {
    for pair in blocks.windows(2) {
        if pair[1].height() != pair[0].height() + 1 {
            return Err(ServerError::InvalidData(format!(
                "block at height {} followed by block at height {}",
                pair[0].height(),
                pair[1].height()
            )));
        }
    }

    Ok(())
}
