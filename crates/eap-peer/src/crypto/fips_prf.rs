//! FIPS 186-2 Pseudo-Random Function
//!
//! The SHA-1-based PRF from FIPS 186-2 (with the change notice 1
//! modification: no mod-q reduction), as required for EAP-SIM/AKA key
//! expansion by RFC 4186 Section 7 and RFC 4187 Section 7. The master key
//! seeds XKEY; each iteration emits 40 bytes.

use sha1::compress;
use sha1::digest::generic_array::{typenum::U64, GenericArray};

/// XKEY length: one SHA-1 output
pub const XKEY_LEN: usize = 20;

// SHA-1 initial state (FIPS 180 Section 5.3.1)
const SHA1_IV: [u32; 5] = [
    0x6745_2301,
    0xEFCD_AB89,
    0x98BA_DCFE,
    0x1032_5476,
    0xC3D2_E1F0,
];

/// Expand a 20-byte key into `output_len` pseudo-random bytes
pub fn fips_186_2_prf(xkey: &[u8; XKEY_LEN], output_len: usize) -> Vec<u8> {
    let mut xkey = *xkey;
    let mut output = Vec::with_capacity(output_len.next_multiple_of(2 * XKEY_LEN));

    while output.len() < output_len {
        // x_j = G(t, XKEY); XKEY = (1 + XKEY + x_j) mod 2^160
        for _ in 0..2 {
            let x = g_function(&xkey);
            add_one_mod_2_160(&mut xkey, &x);
            output.extend_from_slice(&x);
        }
    }

    output.truncate(output_len);
    output
}

/// G(t, c): the SHA-1 compression function applied to c zero-padded to one
/// 64-byte block, without length padding (FIPS 186-2 Appendix 3.3)
fn g_function(c: &[u8; XKEY_LEN]) -> [u8; XKEY_LEN] {
    let mut state = SHA1_IV;
    let mut block = GenericArray::<u8, U64>::default();
    block[..XKEY_LEN].copy_from_slice(c);
    compress(&mut state, core::slice::from_ref(&block));

    let mut out = [0u8; XKEY_LEN];
    for (chunk, word) in out.chunks_exact_mut(4).zip(state.iter()) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// xkey = (1 + xkey + x) mod 2^160, big-endian
fn add_one_mod_2_160(xkey: &mut [u8; XKEY_LEN], x: &[u8; XKEY_LEN]) {
    let mut carry = 1u16;
    for i in (0..XKEY_LEN).rev() {
        let sum = xkey[i] as u16 + x[i] as u16 + carry;
        xkey[i] = sum as u8;
        carry = sum >> 8;
    }
}
