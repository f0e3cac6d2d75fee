//! Entrypoint for sync engine

use std::io::{self, Read, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use getset::{CopyGetters, Getters};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;

use crate::cancelled::CancelledTransactions;
use crate::client::{self, fetch::fetch, NodeClient};
use crate::config::SyncConfig;
use crate::error::{ServerError, SyncError};
use crate::keys::{CryptoOps, ScanningKeys};
use crate::pipeline::{BlockPipeline, PendingReset};
use crate::primitives::{
    Block, BlockHash, PublicKey, SecretKey, TransactionData, TransactionInput, TxHash,
};
use crate::scan::{scan_block_outputs, BlockScanResults};
use crate::sync_status::SynchronizationStatus;
use crate::traits::{SyncTransactions, SyncWallet};
use crate::transaction::process_block;

/// Notifications sent to subscribers of a [`Synchronizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// The wallet reached the top of the chain at this height with no blocks left to process.
    HeightChange(u64),
    /// A timestamp start position was resolved to a block height. Sync continues by height.
    ScanHeightResolved {
        /// Timestamp sync was started from
        timestamp: u64,
        /// Height of the first block at or after `timestamp`
        height: u64,
    },
}

/// Persistent part of a [`Synchronizer`].
///
/// Downloaded blocks and cancelled transaction fail counts are not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct SynchronizerState {
    /// Private view key shared by every scanned spend key
    #[getset(get_copy = "pub")]
    private_view_key: SecretKey,
    /// Height sync starts from. Ignored while `start_timestamp` is set.
    #[getset(get_copy = "pub")]
    start_height: u64,
    /// Timestamp sync starts from, 0 once resolved to a height
    #[getset(get_copy = "pub")]
    start_timestamp: u64,
    /// Committed block hashes
    #[getset(get = "pub")]
    synchronization_status: SynchronizationStatus,
}

impl SynchronizerState {
    /// Creates new SynchronizerState from parts
    pub fn from_parts(
        private_view_key: SecretKey,
        start_height: u64,
        start_timestamp: u64,
        synchronization_status: SynchronizationStatus,
    ) -> Self {
        Self {
            private_view_key,
            start_height,
            start_timestamp,
            synchronization_status,
        }
    }

    /// Serialized version
    pub fn serialized_version() -> u64 {
        0
    }

    /// Serialize into `writer`
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(Self::serialized_version())?;
        writer.write_all(self.private_view_key.as_bytes())?;
        writer.write_u64::<LittleEndian>(self.start_height)?;
        writer.write_u64::<LittleEndian>(self.start_timestamp)?;
        self.synchronization_status.write(&mut writer)
    }

    /// Deserialize from `reader`
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let version = reader.read_u64::<LittleEndian>()?;
        if version > Self::serialized_version() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported synchronizer state version {version}"),
            ));
        }

        let mut private_view_key = [0u8; 32];
        reader.read_exact(&mut private_view_key)?;
        let start_height = reader.read_u64::<LittleEndian>()?;
        let start_timestamp = reader.read_u64::<LittleEndian>()?;
        let synchronization_status = SynchronizationStatus::read(&mut reader)?;

        Ok(Self {
            private_view_key: SecretKey::from_bytes(private_view_key),
            start_height,
            start_timestamp,
            synchronization_status,
        })
    }
}

/// Keeps a wallet in sync with the chain served by a remote node.
///
/// Blocks are prefetched in the background and handed out in height order by
/// [`Synchronizer::fetch_blocks`]. Once the wallet has stored what it found in a block, the block
/// is committed with [`Synchronizer::drop_block`].
pub struct Synchronizer<C> {
    pipeline: BlockPipeline,
    cancelled_transactions: CancelledTransactions,
    crypto: C,
    private_view_key: SecretKey,
    config: SyncConfig,
    fetcher_handle: JoinHandle<()>,
}

impl<C> Synchronizer<C>
where
    C: CryptoOps,
{
    /// Creates a new Synchronizer starting from `start_height`, or from the first block at or
    /// after `start_timestamp` if it is non-zero.
    ///
    /// Launches the fetcher task for `node`, so must be called from within a tokio runtime.
    pub fn new<N: NodeClient>(
        node: N,
        crypto: C,
        private_view_key: SecretKey,
        start_height: u64,
        start_timestamp: u64,
        config: SyncConfig,
    ) -> Self {
        Self::from_state(
            node,
            crypto,
            SynchronizerState::from_parts(
                private_view_key,
                start_height,
                start_timestamp,
                SynchronizationStatus::new(start_height.saturating_sub(1)),
            ),
            config,
        )
    }

    /// Restores a Synchronizer from a saved [`SynchronizerState`].
    ///
    /// Launches the fetcher task for `node`, so must be called from within a tokio runtime.
    pub fn from_state<N: NodeClient>(
        node: N,
        crypto: C,
        state: SynchronizerState,
        config: SyncConfig,
    ) -> Self {
        let (fetch_request_sender, fetch_request_receiver) = mpsc::unbounded_channel();
        let fetcher_handle = tokio::spawn(fetch(fetch_request_receiver, node));

        tracing::info!(
            "Starting sync at height {}, start height {}, start timestamp {}",
            state.synchronization_status.height(),
            state.start_height,
            state.start_timestamp
        );

        Self {
            pipeline: BlockPipeline::new(
                fetch_request_sender,
                state.synchronization_status,
                state.start_height,
                state.start_timestamp,
                config.block_request_size(),
                config.block_store_memory_limit,
            ),
            cancelled_transactions: CancelledTransactions::new(),
            crypto,
            private_view_key: state.private_view_key,
            config,
            fetcher_handle,
        }
    }

    /// Snapshot of the persistent state.
    pub fn state(&self) -> SynchronizerState {
        let (start_height, start_timestamp) = self.pipeline.scan_heights();

        SynchronizerState::from_parts(
            self.private_view_key,
            start_height,
            start_timestamp,
            self.pipeline.synchronization_status().clone(),
        )
    }

    /// Replaces the remote node.
    ///
    /// Any in-flight download from the previous node is completed first.
    pub async fn swap_node<N: NodeClient>(&mut self, node: N) {
        self.pipeline.settle().await;

        let (fetch_request_sender, fetch_request_receiver) = mpsc::unbounded_channel();
        // the previous fetcher returns once its last sender is dropped
        self.fetcher_handle = tokio::spawn(fetch(fetch_request_receiver, node));
        self.pipeline.set_fetch_request_sender(fetch_request_sender);

        tracing::info!("Remote node replaced.");
    }

    /// Returns a receiver for [`SyncEvent`]s.
    pub fn subscribe(&mut self) -> UnboundedReceiver<SyncEvent> {
        self.pipeline.subscribe()
    }

    /// Height of the last processed block
    pub fn height(&self) -> u64 {
        self.pipeline.height()
    }

    /// Start height and start timestamp. The timestamp is 0 once it has been resolved to a height.
    pub fn scan_heights(&self) -> (u64, u64) {
        self.pipeline.scan_heights()
    }

    /// Returns up to `block_count` blocks in height order, starting at the next block to process.
    ///
    /// Blocks stay queued until they are dropped with [`Self::drop_block`], so a repeated call
    /// returns the same blocks. An empty result means the node has no further blocks or could not
    /// be reached.
    pub async fn fetch_blocks(&mut self, block_count: usize) -> Vec<Arc<Block>> {
        self.pipeline.fetch_blocks(block_count).await
    }

    /// Commits a processed block.
    ///
    /// Has no effect unless the block is the next block in the queue.
    pub fn drop_block(&mut self, block_height: u64, block_hash: BlockHash) {
        self.pipeline.drop_block(block_height, block_hash);
    }

    /// Discards all downloaded blocks and restarts sync from `scan_height`, or from the first
    /// block at or after `scan_timestamp` if it is non-zero.
    ///
    /// Resolves once the reset has taken effect. A download in flight completes first and its
    /// blocks are discarded.
    pub async fn reset(&mut self, scan_height: u64, scan_timestamp: u64) {
        self.pipeline
            .reset(PendingReset {
                scan_height,
                scan_timestamp,
            })
            .await;
    }

    /// Restarts sync from `scan_height`. See [`Self::reset`].
    pub async fn rewind(&mut self, scan_height: u64) {
        self.reset(scan_height, 0).await;
    }

    /// Returns the sent transactions the node has consistently reported as neither in the pool
    /// nor in the chain.
    ///
    /// `transaction_hashes` are the wallet's unconfirmed outgoing transactions. A transaction is
    /// only returned after [`crate::cancelled::CANCELLED_TRANSACTION_THRESHOLD`] consecutive
    /// misses. A failed node request leaves the fail counts untouched.
    pub async fn find_cancelled_transactions(
        &mut self,
        transaction_hashes: &[TxHash],
    ) -> Result<Vec<TxHash>, ServerError> {
        if transaction_hashes.is_empty() {
            return Ok(Vec::new());
        }

        let missing_hashes = client::get_cancelled_transactions(
            self.pipeline.fetch_request_sender(),
            transaction_hashes.to_vec(),
        )
        .await?;

        let cancelled = self.cancelled_transactions.check(&missing_hashes);
        if !cancelled.is_empty() {
            tracing::info!("{} sent transactions cancelled", cancelled.len());
        }

        Ok(cancelled)
    }

    /// Scanning keys of `wallet`, sharing this synchronizer's private view key.
    pub fn scanning_keys<W: SyncWallet>(&self, wallet: &W) -> Result<ScanningKeys, W::Error> {
        ScanningKeys::from_wallet(self.private_view_key, wallet)
    }

    /// Finds the outputs in `block` that belong to the wallet.
    ///
    /// Transactions that failed to scan are returned alongside the outputs found in the rest of
    /// the block.
    pub fn process_block_outputs(
        &self,
        block: &Block,
        scanning_keys: &ScanningKeys,
    ) -> BlockScanResults {
        scan_block_outputs(
            &self.crypto,
            scanning_keys,
            block,
            self.config.scan_coinbase_transactions,
        )
    }

    /// Builds the wallet transactions of `block` from the owned outputs found in it.
    pub fn process_block<W: SyncWallet>(
        &self,
        block: &Block,
        inputs: Vec<(PublicKey, TransactionInput)>,
        wallet: &W,
    ) -> Result<TransactionData, SyncError<W::Error>> {
        process_block(
            block,
            inputs,
            wallet,
            self.config.scan_coinbase_transactions,
        )
        .map_err(SyncError::WalletError)
    }

    /// Processes up to `block_count` blocks into `wallet`.
    ///
    /// Each block is scanned, stored in the wallet and committed before the next one, so a wallet
    /// error leaves the failed block at the front of the queue to be retried. A block holding a
    /// transaction that failed to scan is not stored and is returned as [`SyncError::ScanError`].
    ///
    /// Returns the number of blocks committed. 0 means there are currently no blocks to process.
    pub async fn sync_blocks<W>(
        &mut self,
        wallet: &mut W,
        block_count: usize,
    ) -> Result<usize, SyncError<W::Error>>
    where
        W: SyncTransactions,
    {
        let blocks = self.fetch_blocks(block_count).await;
        if blocks.is_empty() {
            return Ok(0);
        }

        let scanning_keys = self
            .scanning_keys(wallet)
            .map_err(SyncError::WalletError)?;

        for block in blocks.iter() {
            let scan_results = self.process_block_outputs(block, &scanning_keys);
            if let Some((transaction_hash, source)) =
                scan_results.failed_transactions.into_iter().next()
            {
                return Err(SyncError::ScanError {
                    block_height: block.height(),
                    transaction_hash,
                    source,
                });
            }
            let transaction_data = self.process_block(block, scan_results.inputs, wallet)?;

            if !transaction_data.transactions_to_add.is_empty() {
                tracing::debug!(
                    "Found {} wallet transactions at height {}",
                    transaction_data.transactions_to_add.len(),
                    block.height()
                );
            }

            wallet
                .store_transaction_data(transaction_data)
                .map_err(SyncError::WalletError)?;
            self.drop_block(block.height(), block.hash());
        }

        Ok(blocks.len())
    }
}

impl<C> Drop for Synchronizer<C> {
    fn drop(&mut self) {
        self.fetcher_handle.abort();
    }
}
