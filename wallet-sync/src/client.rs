//! Module for handling all connections to the remote node

use async_trait::async_trait;
use tokio::sync::{mpsc::UnboundedSender, oneshot};

use crate::error::ServerError;
use crate::primitives::{Block, BlockHash, TopBlock, TxHash};

pub mod fetch;

/// The remote node serving blockchain data.
///
/// Only [`crate::client::fetch::fetch`] calls into the node, one request at a time.
#[async_trait]
pub trait NodeClient: Send + 'static {
    /// Height of the node's local chain.
    async fn local_node_block_count(&mut self) -> Result<u64, ServerError>;

    /// Blocks following the newest checkpoint the node recognises, or following the start
    /// height/timestamp if it recognises none.
    async fn wallet_sync_data(
        &mut self,
        request: WalletSyncRequest,
    ) -> Result<WalletSyncData, ServerError>;

    /// The subset of `transaction_hashes` currently in neither the pool nor the chain.
    async fn cancelled_transactions(
        &mut self,
        transaction_hashes: Vec<TxHash>,
    ) -> Result<Vec<TxHash>, ServerError>;
}

/// Request for the blocks following the wallet's sync position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSyncRequest {
    /// Recent block hashes, most recent first, followed by sparse checkpoints
    pub block_hash_checkpoints: Vec<BlockHash>,
    /// Height to start from if no checkpoint is recognised
    pub start_height: u64,
    /// Timestamp to start from if no checkpoint is recognised. 0 if sync starts by height.
    pub start_timestamp: u64,
    /// Maximum number of blocks to return
    pub block_count: u32,
}

/// Wallet sync response of the remote node
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WalletSyncData {
    /// Blocks in ascending height order
    pub blocks: Vec<Block>,
    /// Top of the node's chain. Served with an empty block list when the wallet is synced.
    pub top_block: Option<TopBlock>,
}

/// Fetch requests are created and sent to the [`crate::client::fetch::fetch`] task when a connection to the node is required.
///
/// Each variant includes a [`tokio::sync::oneshot::Sender`] for returning the fetched data to the requester.
#[derive(Debug)]
pub enum FetchRequest {
    /// Gets the height of the node's local chain.
    BlockCount(oneshot::Sender<Result<u64, ServerError>>),
    /// Gets the blocks following the wallet's sync position.
    WalletSyncData(
        oneshot::Sender<Result<WalletSyncData, ServerError>>,
        WalletSyncRequest,
    ),
    /// Gets the hashes that are in neither the pool nor the chain.
    CancelledTransactions(
        oneshot::Sender<Result<Vec<TxHash>, ServerError>>,
        Vec<TxHash>,
    ),
}

/// Gets the height of the node's local chain.
///
/// Requires [`crate::client::fetch::fetch`] to be running concurrently, connected via the `fetch_request` channel.
pub async fn get_local_node_block_count(
    fetch_request_sender: UnboundedSender<FetchRequest>,
) -> Result<u64, ServerError> {
    let (reply_sender, reply_receiver) = oneshot::channel();
    fetch_request_sender
        .send(FetchRequest::BlockCount(reply_sender))
        .map_err(|_| ServerError::FetcherDropped)?;

    reply_receiver
        .await
        .map_err(|_| ServerError::FetcherDropped)?
}

/// Gets the blocks following the wallet's sync position.
///
/// Requires [`crate::client::fetch::fetch`] to be running concurrently, connected via the `fetch_request` channel.
pub async fn get_wallet_sync_data(
    fetch_request_sender: UnboundedSender<FetchRequest>,
    request: WalletSyncRequest,
) -> Result<WalletSyncData, ServerError> {
    let (reply_sender, reply_receiver) = oneshot::channel();
    fetch_request_sender
        .send(FetchRequest::WalletSyncData(reply_sender, request))
        .map_err(|_| ServerError::FetcherDropped)?;

    reply_receiver
        .await
        .map_err(|_| ServerError::FetcherDropped)?
}

/// Gets the hashes of `transaction_hashes` that are in neither the pool nor the chain.
///
/// Requires [`crate::client::fetch::fetch`] to be running concurrently, connected via the `fetch_request` channel.
pub async fn get_cancelled_transactions(
    fetch_request_sender: UnboundedSender<FetchRequest>,
    transaction_hashes: Vec<TxHash>,
) -> Result<Vec<TxHash>, ServerError> {
    let (reply_sender, reply_receiver) = oneshot::channel();
    fetch_request_sender
        .send(FetchRequest::CancelledTransactions(
            reply_sender,
            transaction_hashes,
        ))
        .map_err(|_| ServerError::FetcherDropped)?;

    reply_receiver
        .await
        .map_err(|_| ServerError::FetcherDropped)?
}
