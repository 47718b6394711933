//! Transaction decoding and address derivation
//!
//! Thin layer over the `bitcoin` crate. Derivation is per output so a single
//! non-standard script never hides the outputs after it.

use bitcoin::{consensus, Address, Network, Transaction, TxOut};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Transaction decode: {0}")]
    Transaction(#[from] consensus::encode::Error),

    #[error("No address for output script {script}: {reason}")]
    NoAddress { script: String, reason: String },
}

/// Decode a consensus-serialized transaction (the `rawtx` payload).
pub fn decode_transaction(raw: &[u8]) -> Result<Transaction, DecodeError> {
    Ok(consensus::encode::deserialize(raw)?)
}

/// Derive the address an output pays to under `network` rules.
pub fn address_of(output: &TxOut, network: Network) -> Result<Address, DecodeError> {
    Address::from_script(&output.script_pubkey, network).map_err(|e| DecodeError::NoAddress {
        script: output.script_pubkey.to_hex_string(),
        reason: e.to_string(),
    })
}

/// Per-output address derivation, in output order.
pub fn paying_addresses(tx: &Transaction, network: Network) -> impl Iterator<Item = (usize, Result<Address, DecodeError>)> + '_ {
    tx.output.iter().enumerate().map(move |(vout, out)| (vout, address_of(out, network)))
}
