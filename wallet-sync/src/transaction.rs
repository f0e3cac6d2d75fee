//! Turns a block and the outputs the wallet owns in it into wallet transactions.

use std::collections::BTreeMap;

use crate::primitives::{
    Block, KeyImage, PublicKey, RawTransaction, ScannableTransaction, TransactionData,
    TransactionInput, TxHash, WalletTransaction,
};
use crate::traits::SyncWallet;

/// Processes every transaction in `block`.
///
/// `inputs` are the outputs owned by the wallet in this block, as returned by
/// [`crate::scan::scan_block_outputs`]. They are passed through to
/// [`TransactionData::inputs_to_add`].
pub fn process_block<W>(
    block: &Block,
    inputs: Vec<(PublicKey, TransactionInput)>,
    wallet: &W,
    scan_coinbase_transactions: bool,
) -> Result<TransactionData, W::Error>
where
    W: SyncWallet,
{
    let mut transaction_data = TransactionData::default();

    if scan_coinbase_transactions {
        if let Some(transaction) = process_coinbase_transaction(block, &inputs) {
            transaction_data.transactions_to_add.push(transaction);
        }
    }

    for raw_transaction in block.transactions() {
        let (transaction, key_images_to_mark_spent) =
            process_transaction(block, &inputs, raw_transaction, wallet)?;

        if let Some(transaction) = transaction {
            transaction_data.transactions_to_add.push(transaction);
            transaction_data
                .key_images_to_mark_spent
                .extend(key_images_to_mark_spent);
        }
    }

    transaction_data.inputs_to_add = inputs;

    Ok(transaction_data)
}

/// Builds the wallet transaction of the block's coinbase, if any of its outputs are owned.
pub fn process_coinbase_transaction(
    block: &Block,
    inputs: &[(PublicKey, TransactionInput)],
) -> Option<WalletTransaction> {
    let coinbase = block.coinbase_transaction()?;
    let transfers = received_transfers(inputs, coinbase.hash());

    if transfers.is_empty() {
        return None;
    }

    Some(WalletTransaction::from_parts(
        transfers,
        coinbase.hash(),
        0,
        block.height(),
        block.timestamp(),
        String::new(),
        coinbase.unlock_time(),
        true,
    ))
}

/// Builds the wallet transaction of `raw_transaction`.
///
/// Owned outputs add to their owner's transfer and owned key inputs subtract from it, so a
/// transaction that both spends from and pays a subwallet nets into a single amount. Returns
/// `None` and no spent key images if the transaction does not involve the wallet.
pub fn process_transaction<W>(
    block: &Block,
    inputs: &[(PublicKey, TransactionInput)],
    raw_transaction: &RawTransaction,
    wallet: &W,
) -> Result<(Option<WalletTransaction>, Vec<(PublicKey, KeyImage)>), W::Error>
where
    W: SyncWallet,
{
    let mut transfers = received_transfers(inputs, raw_transaction.hash());
    let mut spent_key_images = Vec::new();

    for input in raw_transaction.key_inputs() {
        if let Some(public_spend_key) = wallet.get_key_image_owner(&input.key_image())? {
            *transfers.entry(public_spend_key).or_insert(0) -= input.amount() as i64;
            spent_key_images.push((public_spend_key, input.key_image()));
        }
    }

    if transfers.is_empty() {
        return Ok((None, Vec::new()));
    }

    let input_total: u64 = raw_transaction
        .key_inputs()
        .iter()
        .map(|input| input.amount())
        .sum();
    let output_total: u64 = raw_transaction
        .key_outputs()
        .iter()
        .map(|output| output.amount())
        .sum();

    Ok((
        Some(WalletTransaction::from_parts(
            transfers,
            raw_transaction.hash(),
            input_total.saturating_sub(output_total),
            block.height(),
            block.timestamp(),
            raw_transaction.payment_id().to_string(),
            raw_transaction.unlock_time(),
            false,
        )),
        spent_key_images,
    ))
}

fn received_transfers(
    inputs: &[(PublicKey, TransactionInput)],
    transaction_hash: TxHash,
) -> BTreeMap<PublicKey, i64> {
    let mut transfers = BTreeMap::new();
    for (public_spend_key, input) in inputs
        .iter()
        .filter(|(_, input)| input.parent_transaction_hash() == transaction_hash)
    {
        *transfers.entry(*public_spend_key).or_insert(0) += input.amount() as i64;
    }

    transfers
}
