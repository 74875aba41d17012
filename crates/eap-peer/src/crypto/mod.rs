//! Key-Derivation and MAC Primitives
//!
//! Pure functions used by the method state machines. Nothing here holds
//! state; key lifecycle lives with the engines.

pub mod encr;
pub mod fips_prf;
pub mod mschapv2;
pub mod prf_prime;

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// AT_MAC for SIM/AKA: HMAC-SHA1-128 over the EAP packet (MAC field
/// zeroed) plus method-specific extra data (RFC 4187 Section 10.15)
pub fn hmac_sha1_128(key: &[u8], message: &[u8], extra: &[u8]) -> [u8; 16] {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    mac.update(extra);
    let bytes = mac.finalize().into_bytes();

    let mut output = [0u8; 16];
    output.copy_from_slice(&bytes[..16]);
    output
}

/// AT_MAC for AKA': HMAC-SHA256-128 (RFC 5448 Section 3.3)
pub fn hmac_sha256_128(key: &[u8], message: &[u8], extra: &[u8]) -> [u8; 16] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    mac.update(extra);
    let bytes = mac.finalize().into_bytes();

    let mut output = [0u8; 16];
    output.copy_from_slice(&bytes[..16]);
    output
}
