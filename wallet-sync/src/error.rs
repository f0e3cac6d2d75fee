//! Top level error module for the crate

use crate::primitives::{PublicKey, TxHash};

/// Top level error enum encapsulating any error that may occur during sync
#[derive(Debug, thiserror::Error)]
pub enum SyncError<E>
where
    E: std::fmt::Debug + std::fmt::Display,
{
    /// A transaction in the block could not be scanned. The block is not committed.
    #[error("failed to scan transaction {transaction_hash} at height {block_height}. {source}")]
    ScanError {
        /// Height of the block holding the transaction
        block_height: u64,
        /// Hash of the transaction that failed to scan
        transaction_hash: TxHash,
        /// Underlying crypto error
        source: CryptoError,
    },
    /// Wallet error.
    #[error("wallet error. {0}")]
    WalletError(E),
}

/// Server errors.
///
/// Errors associated with connecting to the remote node and receiving invalid data.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Node request failed.
    #[error("node request failed. {0}")]
    RequestFailed(String),
    /// Node returned data that could not be parsed.
    #[error("node returned invalid data. {0}")]
    InvalidData(String),
    /// Fetcher task was dropped.
    #[error("fetcher task was dropped.")]
    FetcherDropped,
}

/// Errors raised by a [`crate::keys::CryptoOps`] back-end.
///
/// A crypto error is scoped to the transaction being scanned. The rest of the block is still
/// scanned but the block is not committed to the wallet.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Public key is not a valid curve point.
    #[error("invalid public key {0}")]
    InvalidPublicKey(PublicKey),
    /// Secret key is not a reduced scalar.
    #[error("invalid secret key")]
    InvalidSecretKey,
    /// Key derivation could not be used.
    #[error("invalid key derivation")]
    InvalidKeyDerivation,
    /// Back-end specific failure, e.g. an accelerator that is unavailable.
    #[error("crypto back-end failure. {0}")]
    Backend(String),
}
