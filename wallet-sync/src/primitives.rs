//! Module for primitive structs associated with the sync engine

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use getset::{CopyGetters, Getters};
use memuse::DynamicUsage;

macro_rules! define_key_type {
    ($(#[$meta:meta])* $name:ident) => {
        define_key_type!(@common $(#[$meta])* $name);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
    // secret material is kept out of logs
    ($(#[$meta:meta])* $name:ident, redacted) => {
        define_key_type!(@common $(#[$meta])* $name);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(<redacted>)", stringify!($name))
            }
        }
    };
    (@common $(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Creates from raw bytes
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Returns the raw bytes
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes)?;

                Ok(Self(bytes))
            }
        }

        impl DynamicUsage for $name {
            #[inline(always)]
            fn dynamic_usage(&self) -> usize {
                0
            }

            #[inline(always)]
            fn dynamic_usage_bounds(&self) -> (usize, Option<usize>) {
                (0, Some(0))
            }
        }
    };
}

define_key_type!(
    /// Block hash
    BlockHash
);
define_key_type!(
    /// Transaction hash
    TxHash
);
define_key_type!(
    /// Ed25519 public key: spend keys, view keys, one-time output keys and transaction public keys
    PublicKey
);
define_key_type!(
    /// Ed25519 secret key
    SecretKey,
    redacted
);
define_key_type!(
    /// Shared secret between a transaction public key and a private view key
    KeyDerivation
);
define_key_type!(
    /// Deterministic identifier of an output, published when the output is spent
    KeyImage
);

/// Top of the chain as reported by the remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct TopBlock {
    /// Height of the newest block
    height: u64,
    /// Hash of the newest block
    hash: BlockHash,
}

impl TopBlock {
    /// Creates new TopBlock from parts
    pub fn from_parts(height: u64, hash: BlockHash) -> Self {
        Self { height, hash }
    }
}

/// Key input of a raw transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct KeyInput {
    /// Amount of the output being spent
    amount: u64,
    /// Key image of the output being spent
    key_image: KeyImage,
}

impl KeyInput {
    /// Creates new KeyInput from parts
    pub fn from_parts(amount: u64, key_image: KeyImage) -> Self {
        Self { amount, key_image }
    }
}

/// Key output of a raw transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct KeyOutput {
    /// Amount in atomic units
    amount: u64,
    /// One-time output key
    key: PublicKey,
    /// Global output index, not every node serves it
    global_index: Option<u64>,
}

impl KeyOutput {
    /// Creates new KeyOutput from parts
    pub fn from_parts(amount: u64, key: PublicKey, global_index: Option<u64>) -> Self {
        Self {
            amount,
            key,
            global_index,
        }
    }
}

impl DynamicUsage for KeyOutput {
    #[inline(always)]
    fn dynamic_usage(&self) -> usize {
        0
    }

    #[inline(always)]
    fn dynamic_usage_bounds(&self) -> (usize, Option<usize>) {
        (0, Some(0))
    }
}

impl DynamicUsage for KeyInput {
    #[inline(always)]
    fn dynamic_usage(&self) -> usize {
        0
    }

    #[inline(always)]
    fn dynamic_usage_bounds(&self) -> (usize, Option<usize>) {
        (0, Some(0))
    }
}

/// Fields shared by coinbase and regular transactions that the output scanner needs.
pub trait ScannableTransaction {
    /// Transaction hash
    fn hash(&self) -> TxHash;

    /// Transaction public key
    fn transaction_public_key(&self) -> PublicKey;

    /// Unlock time of the outputs
    fn unlock_time(&self) -> u64;

    /// Outputs in transaction order
    fn key_outputs(&self) -> &[KeyOutput];
}

/// Block reward transaction. No inputs, no fee and no payment ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCoinbaseTransaction {
    hash: TxHash,
    transaction_public_key: PublicKey,
    unlock_time: u64,
    key_outputs: Vec<KeyOutput>,
}

impl RawCoinbaseTransaction {
    /// Creates new RawCoinbaseTransaction from parts
    pub fn from_parts(
        hash: TxHash,
        transaction_public_key: PublicKey,
        unlock_time: u64,
        key_outputs: Vec<KeyOutput>,
    ) -> Self {
        Self {
            hash,
            transaction_public_key,
            unlock_time,
            key_outputs,
        }
    }
}

impl ScannableTransaction for RawCoinbaseTransaction {
    fn hash(&self) -> TxHash {
        self.hash
    }

    fn transaction_public_key(&self) -> PublicKey {
        self.transaction_public_key
    }

    fn unlock_time(&self) -> u64 {
        self.unlock_time
    }

    fn key_outputs(&self) -> &[KeyOutput] {
        &self.key_outputs
    }
}

impl DynamicUsage for RawCoinbaseTransaction {
    fn dynamic_usage(&self) -> usize {
        self.key_outputs.dynamic_usage()
    }

    fn dynamic_usage_bounds(&self) -> (usize, Option<usize>) {
        self.key_outputs.dynamic_usage_bounds()
    }
}

/// Regular transaction as served by the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    hash: TxHash,
    transaction_public_key: PublicKey,
    unlock_time: u64,
    key_outputs: Vec<KeyOutput>,
    key_inputs: Vec<KeyInput>,
    payment_id: String,
}

impl RawTransaction {
    /// Creates new RawTransaction from parts
    pub fn from_parts(
        hash: TxHash,
        transaction_public_key: PublicKey,
        unlock_time: u64,
        key_outputs: Vec<KeyOutput>,
        key_inputs: Vec<KeyInput>,
        payment_id: String,
    ) -> Self {
        Self {
            hash,
            transaction_public_key,
            unlock_time,
            key_outputs,
            key_inputs,
            payment_id,
        }
    }

    /// Inputs in transaction order
    pub fn key_inputs(&self) -> &[KeyInput] {
        &self.key_inputs
    }

    /// Payment ID, empty if the transaction has none
    pub fn payment_id(&self) -> &str {
        &self.payment_id
    }
}

impl ScannableTransaction for RawTransaction {
    fn hash(&self) -> TxHash {
        self.hash
    }

    fn transaction_public_key(&self) -> PublicKey {
        self.transaction_public_key
    }

    fn unlock_time(&self) -> u64 {
        self.unlock_time
    }

    fn key_outputs(&self) -> &[KeyOutput] {
        &self.key_outputs
    }
}

impl DynamicUsage for RawTransaction {
    fn dynamic_usage(&self) -> usize {
        self.key_outputs.dynamic_usage()
            + self.key_inputs.dynamic_usage()
            + self.payment_id.capacity()
    }

    fn dynamic_usage_bounds(&self) -> (usize, Option<usize>) {
        let usage = self.dynamic_usage();
        (usage, Some(usage))
    }
}

/// Block data served by the node for wallet sync
#[derive(Debug, Clone, PartialEq, Eq, CopyGetters)]
pub struct Block {
    /// Block height
    #[getset(get_copy = "pub")]
    height: u64,
    /// Block hash
    #[getset(get_copy = "pub")]
    hash: BlockHash,
    /// Block timestamp in seconds since the Unix epoch
    #[getset(get_copy = "pub")]
    timestamp: u64,
    coinbase_transaction: Option<RawCoinbaseTransaction>,
    transactions: Vec<RawTransaction>,
}

impl Block {
    /// Creates new Block from parts
    pub fn from_parts(
        height: u64,
        hash: BlockHash,
        timestamp: u64,
        coinbase_transaction: Option<RawCoinbaseTransaction>,
        transactions: Vec<RawTransaction>,
    ) -> Self {
        Self {
            height,
            hash,
            timestamp,
            coinbase_transaction,
            transactions,
        }
    }

    /// Coinbase transaction, if the node served it
    pub fn coinbase_transaction(&self) -> Option<&RawCoinbaseTransaction> {
        self.coinbase_transaction.as_ref()
    }

    /// Regular transactions in block order
    pub fn transactions(&self) -> &[RawTransaction] {
        &self.transactions
    }
}

impl DynamicUsage for Block {
    fn dynamic_usage(&self) -> usize {
        self.coinbase_transaction
            .as_ref()
            .map_or(0, |coinbase| coinbase.dynamic_usage())
            + self.transactions.dynamic_usage()
    }

    fn dynamic_usage_bounds(&self) -> (usize, Option<usize>) {
        let usage = self.dynamic_usage();
        (usage, Some(usage))
    }
}

/// An output that belongs to the wallet. Becomes an input when it is spent.
#[derive(Debug, Clone, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct TransactionInput {
    /// `None` for view wallets, which have no private spend key to compute it with
    key_image: Option<KeyImage>,
    /// Amount in atomic units
    amount: u64,
    /// Height of the block holding the output
    block_height: u64,
    /// Public key of the transaction holding the output
    transaction_public_key: PublicKey,
    /// Index of the output in its transaction
    output_index: u64,
    /// Global output index, if the node served it
    global_output_index: Option<u64>,
    /// One-time output key
    key: PublicKey,
    /// 0 while unspent
    spend_height: u64,
    /// Unlock time of the transaction holding the output
    unlock_time: u64,
    /// Hash of the transaction holding the output
    parent_transaction_hash: TxHash,
}

impl TransactionInput {
    /// Creates new TransactionInput from parts
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        key_image: Option<KeyImage>,
        amount: u64,
        block_height: u64,
        transaction_public_key: PublicKey,
        output_index: u64,
        global_output_index: Option<u64>,
        key: PublicKey,
        spend_height: u64,
        unlock_time: u64,
        parent_transaction_hash: TxHash,
    ) -> Self {
        Self {
            key_image,
            amount,
            block_height,
            transaction_public_key,
            output_index,
            global_output_index,
            key,
            spend_height,
            unlock_time,
            parent_transaction_hash,
        }
    }

    /// Returns `true` if a spend of this input has been seen in a block
    pub fn is_spent(&self) -> bool {
        self.spend_height != 0
    }

    /// Records the height of the block that spent this input
    pub fn mark_spent(&mut self, spend_height: u64) {
        self.spend_height = spend_height;
    }
}

/// Wallet transaction
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct WalletTransaction {
    /// Net amount per owning public spend key. Positive amounts are received, negative amounts are
    /// spent.
    #[getset(get = "pub")]
    transfers: BTreeMap<PublicKey, i64>,
    /// Transaction hash
    #[getset(get_copy = "pub")]
    hash: TxHash,
    /// Sum of inputs minus sum of outputs. 0 for coinbase transactions.
    #[getset(get_copy = "pub")]
    fee: u64,
    /// Height of the block holding the transaction
    #[getset(get_copy = "pub")]
    block_height: u64,
    /// Timestamp of the block holding the transaction
    #[getset(get_copy = "pub")]
    timestamp: u64,
    /// Payment id from the transaction extra, empty if there is none
    #[getset(get = "pub")]
    payment_id: String,
    /// Unlock time of the transaction
    #[getset(get_copy = "pub")]
    unlock_time: u64,
    /// Whether this is the coinbase transaction of its block
    #[getset(get_copy = "pub")]
    is_coinbase: bool,
}

impl WalletTransaction {
    /// Creates new WalletTransaction from parts
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        transfers: BTreeMap<PublicKey, i64>,
        hash: TxHash,
        fee: u64,
        block_height: u64,
        timestamp: u64,
        payment_id: String,
        unlock_time: u64,
        is_coinbase: bool,
    ) -> Self {
        Self {
            transfers,
            hash,
            fee,
            block_height,
            timestamp,
            payment_id,
            unlock_time,
            is_coinbase,
        }
    }

    /// Sum of the transfers over every owning key
    pub fn total_amount(&self) -> i64 {
        self.transfers.values().sum()
    }
}

/// Everything a single block changed for the wallet.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransactionData {
    /// Wallet transactions found in the block
    pub transactions_to_add: Vec<WalletTransaction>,
    /// Outputs received by the wallet, keyed by owning public spend key
    pub inputs_to_add: Vec<(PublicKey, TransactionInput)>,
    /// Key images spent in the block, keyed by owning public spend key
    pub key_images_to_mark_spent: Vec<(PublicKey, KeyImage)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_types_display_and_parse_as_hex() {
        let hash = BlockHash::from_bytes([0xab; 32]);
        let encoded = hash.to_string();

        assert_eq!(encoded.len(), 64);
        assert_eq!(encoded.parse::<BlockHash>().unwrap(), hash);
        assert!("abcd".parse::<BlockHash>().is_err());
    }

    #[test]
    fn secret_key_debug_is_redacted() {
        let secret_key = SecretKey::from_bytes([0xab; 32]);
        let public_key = PublicKey::from_bytes([0xab; 32]);

        assert_eq!(format!("{:?}", secret_key), "SecretKey(<redacted>)");
        assert!(format!("{:?}", public_key).contains("abab"));
    }

    #[test]
    fn block_usage_grows_with_transactions() {
        let empty = Block::from_parts(1, BlockHash::default(), 0, None, Vec::new());
        let transaction = RawTransaction::from_parts(
            TxHash::default(),
            PublicKey::default(),
            0,
            vec![KeyOutput::from_parts(1, PublicKey::default(), None); 4],
            vec![KeyInput::from_parts(1, KeyImage::default()); 2],
            String::new(),
        );
        let full = Block::from_parts(
            1,
            BlockHash::default(),
            0,
            None,
            vec![transaction.clone(), transaction],
        );

        assert_eq!(empty.dynamic_usage(), 0);
        assert!(full.dynamic_usage() > 2 * std::mem::size_of::<RawTransaction>());
    }
}
