//! Mock node, crypto back-end and wallet for tests

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Notify;

use crate::client::{NodeClient, WalletSyncData, WalletSyncRequest};
use crate::error::{CryptoError, ServerError};
use crate::keys::CryptoOps;
use crate::primitives::{
    Block, BlockHash, KeyDerivation, KeyImage, KeyInput, KeyOutput, PublicKey, RawTransaction,
    SecretKey, TopBlock, TransactionData, TransactionInput, TxHash, WalletTransaction,
};
use crate::traits::{SyncTransactions, SyncWallet};

/// Rejected by every [`MockCrypto`] operation.
pub(crate) const INVALID_KEY: PublicKey = PublicKey::from_bytes([0xff; 32]);

pub(crate) const PRIVATE_VIEW_KEY: SecretKey = SecretKey::from_bytes([0x76; 32]);

const GENESIS_TIMESTAMP: u64 = 1_600_000_000;
const BLOCK_TIME: u64 = 30;

fn hash_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    bytes
}

fn xor(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    for (byte, (l, r)) in bytes.iter_mut().zip(left.iter().zip(right.iter())) {
        *byte = l ^ r;
    }
    bytes
}

/// Deterministic stand-in for the curve operations.
///
/// Output keys are the spend key masked by a hash of the derivation and output index, so
/// underiving a derived key recovers the spend key exactly.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MockCrypto;

impl MockCrypto {
    fn mask(derivation: &KeyDerivation, output_index: u64) -> [u8; 32] {
        hash_parts(&[derivation.as_bytes(), &output_index.to_le_bytes()])
    }

    fn check(public_key: &PublicKey) -> Result<(), CryptoError> {
        if *public_key == INVALID_KEY {
            return Err(CryptoError::InvalidPublicKey(*public_key));
        }

        Ok(())
    }
}

impl CryptoOps for MockCrypto {
    fn generate_key_derivation(
        &self,
        transaction_public_key: &PublicKey,
        private_view_key: &SecretKey,
    ) -> Result<KeyDerivation, CryptoError> {
        Self::check(transaction_public_key)?;

        Ok(KeyDerivation::from_bytes(hash_parts(&[
            transaction_public_key.as_bytes(),
            private_view_key.as_bytes(),
        ])))
    }

    fn underive_public_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        output_key: &PublicKey,
    ) -> Result<PublicKey, CryptoError> {
        Self::check(output_key)?;

        Ok(PublicKey::from_bytes(xor(
            output_key.as_bytes(),
            &Self::mask(derivation, output_index),
        )))
    }

    fn derive_public_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        public_key: &PublicKey,
    ) -> Result<PublicKey, CryptoError> {
        Self::check(public_key)?;

        Ok(PublicKey::from_bytes(xor(
            public_key.as_bytes(),
            &Self::mask(derivation, output_index),
        )))
    }

    fn derive_secret_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        private_key: &SecretKey,
    ) -> Result<SecretKey, CryptoError> {
        Ok(SecretKey::from_bytes(xor(
            private_key.as_bytes(),
            &Self::mask(derivation, output_index),
        )))
    }

    fn generate_key_image(
        &self,
        public_key: &PublicKey,
        private_key: &SecretKey,
    ) -> Result<KeyImage, CryptoError> {
        Self::check(public_key)?;

        Ok(KeyImage::from_bytes(hash_parts(&[
            public_key.as_bytes(),
            private_key.as_bytes(),
        ])))
    }
}

/// Output at `output_index` paying `public_spend_key`, found by scanning with [`PRIVATE_VIEW_KEY`].
pub(crate) fn owned_output(
    transaction_public_key: &PublicKey,
    output_index: u64,
    public_spend_key: &PublicKey,
    amount: u64,
) -> KeyOutput {
    let crypto = MockCrypto;
    let derivation = crypto
        .generate_key_derivation(transaction_public_key, &PRIVATE_VIEW_KEY)
        .unwrap();
    let key = crypto
        .derive_public_key(&derivation, output_index, public_spend_key)
        .unwrap();

    KeyOutput::from_parts(amount, key, Some(output_index))
}

/// Output that belongs to nobody.
pub(crate) fn foreign_output(output_index: u64, amount: u64) -> KeyOutput {
    KeyOutput::from_parts(
        amount,
        PublicKey::from_bytes(hash_parts(&[b"foreign", &output_index.to_le_bytes()])),
        Some(output_index),
    )
}

pub(crate) fn raw_transaction(
    hash: TxHash,
    transaction_public_key: PublicKey,
    key_outputs: Vec<KeyOutput>,
    key_inputs: Vec<KeyInput>,
) -> RawTransaction {
    RawTransaction::from_parts(
        hash,
        transaction_public_key,
        0,
        key_outputs,
        key_inputs,
        String::new(),
    )
}

pub(crate) fn block_hash(height: u64) -> BlockHash {
    BlockHash::from_bytes(hash_parts(&[b"block", &height.to_le_bytes()]))
}

/// Empty blocks at heights `start_height..start_height + count`, one every 30 seconds.
pub(crate) fn make_chain(start_height: u64, count: u64) -> Vec<Block> {
    (start_height..start_height + count)
        .map(|height| {
            Block::from_parts(
                height,
                block_hash(height),
                GENESIS_TIMESTAMP + height * BLOCK_TIME,
                None,
                Vec::new(),
            )
        })
        .collect()
}

/// In-memory wallet recording everything it is given.
#[derive(Debug, Default)]
pub(crate) struct MockWallet {
    pub(crate) spend_keys: Vec<(PublicKey, Option<SecretKey>)>,
    pub(crate) key_image_owners: HashMap<KeyImage, PublicKey>,
    pub(crate) transactions: Vec<WalletTransaction>,
    pub(crate) inputs: Vec<(PublicKey, TransactionInput)>,
    pub(crate) spent_key_images: Vec<(PublicKey, KeyImage)>,
}

impl MockWallet {
    pub(crate) fn with_spend_keys(spend_keys: Vec<(PublicKey, Option<SecretKey>)>) -> Self {
        Self {
            spend_keys,
            ..Default::default()
        }
    }

    pub(crate) fn add_key_image(&mut self, key_image: KeyImage, public_spend_key: PublicKey) {
        self.key_image_owners.insert(key_image, public_spend_key);
    }
}

impl SyncWallet for MockWallet {
    type Error = Infallible;

    fn get_spend_keys(&self) -> Result<Vec<(PublicKey, Option<SecretKey>)>, Self::Error> {
        Ok(self.spend_keys.clone())
    }

    fn get_key_image_owner(&self, key_image: &KeyImage) -> Result<Option<PublicKey>, Self::Error> {
        Ok(self.key_image_owners.get(key_image).copied())
    }
}

impl SyncTransactions for MockWallet {
    fn store_transaction_data(
        &mut self,
        transaction_data: TransactionData,
    ) -> Result<(), Self::Error> {
        for (public_spend_key, input) in transaction_data.inputs_to_add.iter() {
            if let Some(key_image) = input.key_image() {
                self.add_key_image(key_image, *public_spend_key);
            }
        }

        self.transactions
            .extend(transaction_data.transactions_to_add);
        self.inputs.extend(transaction_data.inputs_to_add);
        self.spent_key_images
            .extend(transaction_data.key_images_to_mark_spent);

        Ok(())
    }
}

#[derive(Debug, Default)]
struct MockNodeState {
    chain: Vec<Block>,
    block_count: u64,
    missing_transactions: Vec<TxHash>,
    wallet_sync_requests: Vec<WalletSyncRequest>,
    cancelled_transaction_requests: usize,
    failures_remaining: u32,
    response_gate: Option<Arc<Notify>>,
}

impl MockNodeState {
    fn take_failure(&mut self) -> Result<(), ServerError> {
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(ServerError::RequestFailed("mock node failure".to_string()));
        }

        Ok(())
    }

    fn wallet_sync_data(&self, request: &WalletSyncRequest) -> WalletSyncData {
        let recognised = request.block_hash_checkpoints.iter().find_map(|checkpoint| {
            self.chain
                .iter()
                .position(|block| block.hash() == *checkpoint)
        });

        let start = match recognised {
            Some(position) => position + 1,
            None if request.start_timestamp != 0 => self
                .chain
                .iter()
                .position(|block| block.timestamp() >= request.start_timestamp)
                .unwrap_or(self.chain.len()),
            None => self
                .chain
                .iter()
                .position(|block| block.height() >= request.start_height)
                .unwrap_or(self.chain.len()),
        };

        let blocks = self
            .chain
            .iter()
            .skip(start)
            .take(request.block_count as usize)
            .cloned()
            .collect::<Vec<_>>();
        let top_block = if blocks.is_empty() {
            self.chain
                .last()
                .map(|block| TopBlock::from_parts(block.height(), block.hash()))
        } else {
            None
        };

        WalletSyncData { blocks, top_block }
    }
}

/// Node serving a fixed chain. Clones share state, so a test keeps a clone to inspect requests.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockNode {
    state: Arc<Mutex<MockNodeState>>,
}

impl MockNode {
    pub(crate) fn new(chain: Vec<Block>) -> Self {
        let block_count = chain.last().map_or(0, |block| block.height() + 1);

        Self {
            state: Arc::new(Mutex::new(MockNodeState {
                chain,
                block_count,
                ..Default::default()
            })),
        }
    }

    pub(crate) fn set_block_count(&self, block_count: u64) {
        self.state.lock().unwrap().block_count = block_count;
    }

    /// Hashes reported as in neither the pool nor the chain.
    pub(crate) fn set_missing_transactions(&self, missing_transactions: Vec<TxHash>) {
        self.state.lock().unwrap().missing_transactions = missing_transactions;
    }

    /// Fails the next `count` requests of any kind.
    pub(crate) fn fail_next_requests(&self, count: u32) {
        self.state.lock().unwrap().failures_remaining = count;
    }

    /// Wallet sync responses wait until the returned gate is notified, once per response.
    pub(crate) fn hold_responses(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().response_gate = Some(gate.clone());
        gate
    }

    pub(crate) fn wallet_sync_requests(&self) -> Vec<WalletSyncRequest> {
        self.state.lock().unwrap().wallet_sync_requests.clone()
    }

    pub(crate) fn cancelled_transaction_requests(&self) -> usize {
        self.state.lock().unwrap().cancelled_transaction_requests
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn local_node_block_count(&mut self) -> Result<u64, ServerError> {
        let mut state = self.state.lock().unwrap();
        state.take_failure()?;

        Ok(state.block_count)
    }

    async fn wallet_sync_data(
        &mut self,
        request: WalletSyncRequest,
    ) -> Result<WalletSyncData, ServerError> {
        let response_gate = {
            let mut state = self.state.lock().unwrap();
            state.take_failure()?;
            state.wallet_sync_requests.push(request.clone());
            state.response_gate.clone()
        };

        if let Some(gate) = response_gate {
            gate.notified().await;
        }

        Ok(self.state.lock().unwrap().wallet_sync_data(&request))
    }

    async fn cancelled_transactions(
        &mut self,
        transaction_hashes: Vec<TxHash>,
    ) -> Result<Vec<TxHash>, ServerError> {
        let mut state = self.state.lock().unwrap();
        state.cancelled_transaction_requests += 1;
        state.take_failure()?;

        Ok(transaction_hashes
            .into_iter()
            .filter(|hash| state.missing_transactions.contains(hash))
            .collect())
    }
}
