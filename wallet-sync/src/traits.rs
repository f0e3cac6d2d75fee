//! Traits for interfacing a wallet with the sync engine

use std::fmt::{Debug, Display};

use crate::primitives::{KeyImage, PublicKey, SecretKey, TransactionData};

/// Key management functionality the sync engine needs from the wallet
pub trait SyncWallet {
    /// Errors associated with interfacing the sync engine with wallet data
    type Error: Debug + Display;

    /// Returns the public spend key of every subwallet, paired with its private spend key.
    ///
    /// The private spend key is `None` for view wallets.
    fn get_spend_keys(&self) -> Result<Vec<(PublicKey, Option<SecretKey>)>, Self::Error>;

    /// Returns the public spend key of the subwallet owning the input with `key_image`, if the
    /// wallet owns it.
    fn get_key_image_owner(&self, key_image: &KeyImage) -> Result<Option<PublicKey>, Self::Error>;
}

/// Trait for interfacing [`crate::primitives::TransactionData`] with wallet data
pub trait SyncTransactions: SyncWallet {
    /// Stores the transactions, inputs and spends found in a block.
    ///
    /// Called once per block, in block order, before the block is dropped from the sync queue.
    fn store_transaction_data(
        &mut self,
        transaction_data: TransactionData,
    ) -> Result<(), Self::Error>;
}
