//! Sync configuration.

/// The node serves at most this many blocks per wallet sync request.
pub const MAX_BLOCKS_PER_DAEMON_REQUEST: u32 = 100;

/// Default memory budget of the downloaded block queue, 50MiB.
pub const DEFAULT_BLOCK_STORE_MEMORY_LIMIT: usize = 50 * 1024 * 1024;

/// Sync configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Number of blocks requested from the node per fetch. Clamped to
    /// [`MAX_BLOCKS_PER_DAEMON_REQUEST`].
    pub blocks_per_daemon_request: u32,
    /// Approximate memory budget, in bytes, for downloaded blocks waiting to be processed.
    pub block_store_memory_limit: usize,
    /// Most wallets never mine a block. Skipping coinbase transactions speeds up sync.
    pub scan_coinbase_transactions: bool,
}

impl SyncConfig {
    /// Sets the number of blocks requested per fetch
    pub fn with_blocks_per_daemon_request(mut self, blocks_per_daemon_request: u32) -> Self {
        self.blocks_per_daemon_request = blocks_per_daemon_request;
        self
    }

    /// Sets the memory budget of the block queue
    pub fn with_block_store_memory_limit(mut self, block_store_memory_limit: usize) -> Self {
        self.block_store_memory_limit = block_store_memory_limit;
        self
    }

    /// Enables or disables coinbase transaction scanning
    pub fn with_scan_coinbase_transactions(mut self, scan_coinbase_transactions: bool) -> Self {
        self.scan_coinbase_transactions = scan_coinbase_transactions;
        self
    }

    /// Number of blocks to request per fetch, at least 1 and at most
    /// [`MAX_BLOCKS_PER_DAEMON_REQUEST`].
    pub fn block_request_size(&self) -> u32 {
        self.blocks_per_daemon_request
            .clamp(1, MAX_BLOCKS_PER_DAEMON_REQUEST)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            blocks_per_daemon_request: MAX_BLOCKS_PER_DAEMON_REQUEST,
            block_store_memory_limit: DEFAULT_BLOCK_STORE_MEMORY_LIMIT,
            scan_coinbase_transactions: true,
        }
    }
}
