//! Cryptographic primitives used for output ownership detection.
//!
//! The primitives are opaque to the sync engine. Any back-end, software or hardware accelerated,
//! can be swapped in by implementing [`CryptoOps`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CryptoError;
use crate::primitives::{KeyDerivation, KeyImage, PublicKey, SecretKey};
use crate::traits::SyncWallet;

/// The five key derivation primitives the sync engine depends on.
pub trait CryptoOps: Send + Sync {
    /// Shared secret of a transaction public key and a private view key.
    fn generate_key_derivation(
        &self,
        transaction_public_key: &PublicKey,
        private_view_key: &SecretKey,
    ) -> Result<KeyDerivation, CryptoError>;

    /// Recovers the public spend key an output key was derived from.
    fn underive_public_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        output_key: &PublicKey,
    ) -> Result<PublicKey, CryptoError>;

    /// Derives the one-time output key of a public spend key.
    fn derive_public_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        public_key: &PublicKey,
    ) -> Result<PublicKey, CryptoError>;

    /// Derives the one-time secret key of a private spend key.
    fn derive_secret_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        private_key: &SecretKey,
    ) -> Result<SecretKey, CryptoError>;

    /// Key image of a one-time key pair.
    fn generate_key_image(
        &self,
        public_key: &PublicKey,
        private_key: &SecretKey,
    ) -> Result<KeyImage, CryptoError>;
}

impl<C: CryptoOps + ?Sized> CryptoOps for &C {
    fn generate_key_derivation(
        &self,
        transaction_public_key: &PublicKey,
        private_view_key: &SecretKey,
    ) -> Result<KeyDerivation, CryptoError> {
        (*self).generate_key_derivation(transaction_public_key, private_view_key)
    }

    fn underive_public_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        output_key: &PublicKey,
    ) -> Result<PublicKey, CryptoError> {
        (*self).underive_public_key(derivation, output_index, output_key)
    }

    fn derive_public_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        public_key: &PublicKey,
    ) -> Result<PublicKey, CryptoError> {
        (*self).derive_public_key(derivation, output_index, public_key)
    }

    fn derive_secret_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        private_key: &SecretKey,
    ) -> Result<SecretKey, CryptoError> {
        (*self).derive_secret_key(derivation, output_index, private_key)
    }

    fn generate_key_image(
        &self,
        public_key: &PublicKey,
        private_key: &SecretKey,
    ) -> Result<KeyImage, CryptoError> {
        (*self).generate_key_image(public_key, private_key)
    }
}

impl<C: CryptoOps + ?Sized> CryptoOps for Arc<C> {
    fn generate_key_derivation(
        &self,
        transaction_public_key: &PublicKey,
        private_view_key: &SecretKey,
    ) -> Result<KeyDerivation, CryptoError> {
        (**self).generate_key_derivation(transaction_public_key, private_view_key)
    }

    fn underive_public_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        output_key: &PublicKey,
    ) -> Result<PublicKey, CryptoError> {
        (**self).underive_public_key(derivation, output_index, output_key)
    }

    fn derive_public_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        public_key: &PublicKey,
    ) -> Result<PublicKey, CryptoError> {
        (**self).derive_public_key(derivation, output_index, public_key)
    }

    fn derive_secret_key(
        &self,
        derivation: &KeyDerivation,
        output_index: u64,
        private_key: &SecretKey,
    ) -> Result<SecretKey, CryptoError> {
        (**self).derive_secret_key(derivation, output_index, private_key)
    }

    fn generate_key_image(
        &self,
        public_key: &PublicKey,
        private_key: &SecretKey,
    ) -> Result<KeyImage, CryptoError> {
        (**self).generate_key_image(public_key, private_key)
    }
}

/// Computes the key image of the output at `output_index` owned by a spend key pair.
pub fn tx_input_key_image<C: CryptoOps + ?Sized>(
    crypto: &C,
    public_spend_key: &PublicKey,
    private_spend_key: &SecretKey,
    derivation: &KeyDerivation,
    output_index: u64,
) -> Result<KeyImage, CryptoError> {
    let ephemeral_public_key =
        crypto.derive_public_key(derivation, output_index, public_spend_key)?;
    let ephemeral_secret_key =
        crypto.derive_secret_key(derivation, output_index, private_spend_key)?;

    crypto.generate_key_image(&ephemeral_public_key, &ephemeral_secret_key)
}

/// The keys needed to scan blocks for outputs belonging to the wallet.
pub struct ScanningKeys {
    private_view_key: SecretKey,
    // public spend key -> private spend key, `None` for view wallets
    spend_keys: HashMap<PublicKey, Option<SecretKey>>,
}

impl ScanningKeys {
    /// Constructs [`ScanningKeys`] from the shared private view key and every subwallet spend key.
    pub fn from_parts(
        private_view_key: SecretKey,
        spend_keys: impl IntoIterator<Item = (PublicKey, Option<SecretKey>)>,
    ) -> Self {
        Self {
            private_view_key,
            spend_keys: spend_keys.into_iter().collect(),
        }
    }

    /// Constructs [`ScanningKeys`] from the spend keys held by `wallet`.
    pub fn from_wallet<W: SyncWallet>(
        private_view_key: SecretKey,
        wallet: &W,
    ) -> Result<Self, W::Error> {
        Ok(Self::from_parts(private_view_key, wallet.get_spend_keys()?))
    }

    /// Private view key shared by every subwallet
    pub fn private_view_key(&self) -> &SecretKey {
        &self.private_view_key
    }

    /// Returns `true` if `public_spend_key` belongs to the wallet
    pub fn contains(&self, public_spend_key: &PublicKey) -> bool {
        self.spend_keys.contains_key(public_spend_key)
    }

    /// Private spend key paired with `public_spend_key`, `None` if unknown or a view key.
    pub fn private_spend_key(&self, public_spend_key: &PublicKey) -> Option<&SecretKey> {
        self.spend_keys
            .get(public_spend_key)
            .and_then(|private_spend_key| private_spend_key.as_ref())
    }
}
