#![warn(missing_docs)]
//! Wallet sync engine for CryptoNote chains
//!
//! Entrypoint: [`crate::sync::Synchronizer`]

pub mod cancelled;
pub mod client;
pub mod config;
pub mod error;
pub mod keys;
pub(crate) mod pipeline;
pub mod primitives;
pub mod scan;
pub mod sync;
pub mod sync_status;
pub mod traits;
pub mod transaction;

#[cfg(test)]
pub(crate) mod test_utils;
