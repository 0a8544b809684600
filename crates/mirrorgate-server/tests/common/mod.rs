//! Shared helpers for integration tests.

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, PrimitiveSignature, TxKind, U256};
use k256::ecdsa::SigningKey;

/// Build a raw signed legacy transaction, returning its 0x-hex encoding
/// and the lowercase sender address.
pub fn signed_raw_tx_hex(seed: u8, nonce: u64) -> (String, String) {
    let key = SigningKey::from_slice(&[seed; 32]).unwrap();
    let tx = TxLegacy {
        chain_id: Some(298),
        nonce,
        gas_price: 710_000_000_000,
        gas_limit: 21_000,
        to: TxKind::Call(Address::ZERO),
        value: U256::from(1u64),
        input: Default::default(),
    };

    let sighash = tx.signature_hash();
    let (signature, recovery_id) = key.sign_prehash_recoverable(sighash.as_slice()).unwrap();
    let signature = PrimitiveSignature::from((signature, recovery_id));
    let envelope = TxEnvelope::Legacy(tx.into_signed(signature));

    let mut raw = Vec::new();
    envelope.encode_2718(&mut raw);

    let sender = Address::from_public_key(key.verifying_key());
    let hex: String = raw.iter().map(|b| format!("{b:02x}")).collect();
    (format!("0x{hex}"), format!("{sender:#x}"))
}
