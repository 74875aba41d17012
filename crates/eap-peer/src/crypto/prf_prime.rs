//! EAP-AKA' Key Derivation
//!
//! PRF' (the HMAC-SHA-256 counter-mode PRF of RFC 5448 Section 3.4) and
//! the CK'/IK' derivation of RFC 5448 Section 3.3 / 3GPP TS 33.402
//! Annex A.2.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// FC value for the CK'/IK' derivation (TS 33.402 Annex A.2)
const FC_CK_IK_PRIME: u8 = 0x20;

/// SQN xor AK length: the first six AUTN bytes
pub const SQN_XOR_AK_LEN: usize = 6;

/// PRF'(K, S) = T1 | T2 | ... where
/// T1 = HMAC-SHA-256(K, S | 0x01) and Tn = HMAC-SHA-256(K, Tn-1 | S | n)
pub fn prf_prime(key: &[u8], data: &[u8], output_len: usize) -> Vec<u8> {
    let mut output = Vec::with_capacity(output_len.next_multiple_of(32));
    let mut t: Vec<u8> = Vec::new();
    let mut iteration = 1u8;

    while output.len() < output_len {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(&t);
        mac.update(data);
        mac.update(&[iteration]);
        t = mac.finalize().into_bytes().to_vec();

        output.extend_from_slice(&t);
        iteration += 1;
    }

    output.truncate(output_len);
    output
}

/// Derive CK'/IK' from CK/IK, the network name, and SQN xor AK
///
/// The derivation is a keyed MAC over
/// `FC | network-name | len(network-name) | (SQN xor AK) | len(SQN xor AK)`
/// with `CK | IK` as the key; CK' is the first half of the output, IK' the
/// second.
pub fn derive_ck_ik_prime(
    ck: &[u8; 16],
    ik: &[u8; 16],
    network_name: &[u8],
    sqn_xor_ak: &[u8; SQN_XOR_AK_LEN],
) -> ([u8; 16], [u8; 16]) {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(ck);
    key[16..].copy_from_slice(ik);

    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC can take key of any size");
    mac.update(&[FC_CK_IK_PRIME]);
    mac.update(network_name);
    mac.update(&(network_name.len() as u16).to_be_bytes());
    mac.update(sqn_xor_ak);
    mac.update(&(SQN_XOR_AK_LEN as u16).to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let mut ck_prime = [0u8; 16];
    let mut ik_prime = [0u8; 16];
    ck_prime.copy_from_slice(&digest[..16]);
    ik_prime.copy_from_slice(&digest[16..]);
    (ck_prime, ik_prime)
}
