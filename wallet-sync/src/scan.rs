//! Output scanning.
//!
//! Decides which outputs of a block belong to the wallet by underiving the spend key of every
//! output and testing it against the wallet's public spend keys.

use rayon::prelude::*;

use crate::error::CryptoError;
use crate::keys::{tx_input_key_image, CryptoOps, ScanningKeys};
use crate::primitives::{Block, PublicKey, ScannableTransaction, TransactionInput, TxHash};

/// Scans the outputs of a single transaction.
///
/// Returns every output owned by the wallet, paired with the public spend key of the owning
/// subwallet. All outputs are scanned, a transaction may pay the wallet more than once.
pub fn scan_transaction_outputs<C, T>(
    crypto: &C,
    scanning_keys: &ScanningKeys,
    transaction: &T,
    block_height: u64,
) -> Result<Vec<(PublicKey, TransactionInput)>, CryptoError>
where
    C: CryptoOps + ?Sized,
    T: ScannableTransaction + ?Sized,
{
    let transaction_public_key = transaction.transaction_public_key();
    let derivation = crypto
        .generate_key_derivation(&transaction_public_key, scanning_keys.private_view_key())?;

    let mut inputs = Vec::new();
    for (output_index, output) in transaction.key_outputs().iter().enumerate() {
        let output_index = output_index as u64;
        let derived_spend_key =
            crypto.underive_public_key(&derivation, output_index, &output.key())?;

        if !scanning_keys.contains(&derived_spend_key) {
            continue;
        }

        let key_image = scanning_keys
            .private_spend_key(&derived_spend_key)
            .map(|private_spend_key| {
                tx_input_key_image(
                    crypto,
                    &derived_spend_key,
                    private_spend_key,
                    &derivation,
                    output_index,
                )
            })
            .transpose()?;

        inputs.push((
            derived_spend_key,
            TransactionInput::from_parts(
                key_image,
                output.amount(),
                block_height,
                transaction_public_key,
                output_index,
                output.global_index(),
                output.key(),
                0,
                transaction.unlock_time(),
                transaction.hash(),
            ),
        ));
    }

    Ok(inputs)
}

/// Outputs found by scanning a block.
#[derive(Debug, Default)]
pub struct BlockScanResults {
    /// Owned outputs in block order, coinbase first, paired with the owning public spend key
    pub inputs: Vec<(PublicKey, TransactionInput)>,
    /// Transactions that could not be scanned, in block order
    pub failed_transactions: Vec<(TxHash, CryptoError)>,
}

impl BlockScanResults {
    fn add(&mut self, transaction_hash: TxHash, result: ScanResult) {
        match result {
            Ok(inputs) => self.inputs.extend(inputs),
            Err(e) => self.failed_transactions.push((transaction_hash, e)),
        }
    }
}

type ScanResult = Result<Vec<(PublicKey, TransactionInput)>, CryptoError>;

/// Scans the outputs of every transaction in `block`.
///
/// Transactions are scanned in parallel and the results are returned in block order, coinbase
/// first. A transaction that fails to scan does not stop the rest of the block from being
/// scanned. It is reported in [`BlockScanResults::failed_transactions`] as the wallet may own
/// outputs in it.
pub fn scan_block_outputs<C>(
    crypto: &C,
    scanning_keys: &ScanningKeys,
    block: &Block,
    scan_coinbase_transactions: bool,
) -> BlockScanResults
where
    C: CryptoOps + ?Sized,
{
    let mut scan_results = BlockScanResults::default();

    if scan_coinbase_transactions {
        if let Some(coinbase) = block.coinbase_transaction() {
            scan_results.add(
                coinbase.hash(),
                scan_transaction_outputs(crypto, scanning_keys, coinbase, block.height()),
            );
        }
    }

    let results = block
        .transactions()
        .par_iter()
        .map(|transaction| {
            (
                transaction.hash(),
                scan_transaction_outputs(crypto, scanning_keys, transaction, block.height()),
            )
        })
        .collect::<Vec<_>>();

    for (hash, result) in results {
        scan_results.add(hash, result);
    }

    for (hash, e) in scan_results.failed_transactions.iter() {
        tracing::warn!(
            "Failed to scan transaction {} at height {}. {}",
            hash,
            block.height(),
            e
        );
    }

    scan_results
}
