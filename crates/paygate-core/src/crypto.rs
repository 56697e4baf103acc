use ethers::types::{Address, RecoveryMessage, Signature, H256, U256};
use ethers::utils::keccak256;

use crate::error::{PaymentError, PaymentResult};

/// Canonical cheque digest: `keccak256(mpe_address ‖ channel_id ‖ nonce ‖
/// amount)` with the integers as 32-byte big-endian words. Shared by daemon
/// and clients; changing it invalidates every outstanding cheque.
pub fn cheque_digest(
    mpe_contract_address: Address,
    channel_id: U256,
    channel_nonce: U256,
    amount: U256,
) -> [u8; 32] {
    let mut message = Vec::with_capacity(20 + 32 * 3);
    message.extend_from_slice(mpe_contract_address.as_bytes());
    let mut word = [0u8; 32];
    channel_id.to_big_endian(&mut word);
    message.extend_from_slice(&word);
    channel_nonce.to_big_endian(&mut word);
    message.extend_from_slice(&word);
    amount.to_big_endian(&mut word);
    message.extend_from_slice(&word);
    keccak256(&message)
}

/// Recovers the cheque signer from a 65-byte `(r, s, v)` secp256k1 signature
/// over `digest`. Both `v ∈ {27, 28}` and the raw recovery id `{0, 1}` are
/// accepted.
pub fn recover_signer(digest: [u8; 32], signature: &[u8]) -> PaymentResult<Address> {
    let signature = Signature::try_from(signature)
        .map_err(|_| PaymentError::unauthenticated("payment signature is not valid"))?;
    signature
        .recover(RecoveryMessage::Hash(H256::from(digest)))
        .map_err(|_| PaymentError::unauthenticated("payment signature is not valid"))
}
