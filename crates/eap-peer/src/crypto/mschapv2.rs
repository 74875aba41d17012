//! MSCHAPv2 Cryptographic Primitives
//!
//! The RFC 2759 Section 8 routines and the RFC 3079 Section 3.4 MPPE key
//! derivation used by the EAP-MSCHAPv2 method. The NT password hash is
//! MD4 over the UTF-16LE password, a legacy construction kept for wire
//! compatibility.

use des::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use des::Des;
use md4::Md4;
use sha1::{Digest, Sha1};

/// ChallengeHash output length (RFC 2759 Section 8.2)
pub const CHALLENGE_HASH_LEN: usize = 8;

/// NtPasswordHash output length
pub const PASSWORD_HASH_LEN: usize = 16;

/// NT-Response length
pub const NT_RESPONSE_LEN: usize = 24;

/// Authenticator response length (raw, before hex encoding)
pub const AUTHENTICATOR_RESPONSE_LEN: usize = 20;

/// Zero-padded password hash length (RFC 2759 Section 8.5)
const Z_PASSWORD_HASH_LEN: usize = 21;

/// DES key section length before parity expansion
const Z_PASSWORD_SECTION_LEN: usize = 7;

/// MasterKey length (RFC 3079 Section 3.4)
pub const MASTER_KEY_LEN: usize = 16;

/// Session (send/receive) key length
pub const SESSION_KEY_LEN: usize = 16;

/// MSK length: send key + receive key zero-padded to 64 bytes
pub const MSK_LEN: usize = 64;

// RFC 2759 Section 8.7 magic constants for authenticator-response
// generation
const CHALLENGE_MAGIC_1: &[u8; 39] = b"Magic server to client signing constant";
const CHALLENGE_MAGIC_2: &[u8; 41] = b"Pad to make it do more than one iteration";

// RFC 3079 Section 3.4 magic constants for MPPE key derivation
const MSK_MAGIC_1: &[u8; 27] = b"This is the MPPE Master Key";
const MSK_MAGIC_2: &[u8; 84] =
    b"On the client side, this is the send key; on the server side, it is the receive key.";
const MSK_MAGIC_3: &[u8; 84] =
    b"On the client side, this is the receive key; on the server side, it is the send key.";

const SHS_PAD_1: [u8; 40] = [0x00; 40];
const SHS_PAD_2: [u8; 40] = [0xF2; 40];

/// The "0-to-256 char username" of RFC 2759 Section 8: raw ASCII bytes
pub fn username_to_bytes(username: &str) -> Vec<u8> {
    username.as_bytes().to_vec()
}

/// The "0-to-256-unicode-char password" of RFC 2759 Section 8: UTF-16LE
pub fn password_to_bytes(password: &str) -> Vec<u8> {
    password
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// RFC 2759 Section 8.1: GenerateNTResponse()
pub fn generate_nt_response(
    authenticator_challenge: &[u8; 16],
    peer_challenge: &[u8; 16],
    username: &str,
    password: &str,
) -> [u8; NT_RESPONSE_LEN] {
    let challenge = challenge_hash(peer_challenge, authenticator_challenge, username);
    let password_hash = nt_password_hash(password);
    challenge_response(&challenge, &password_hash)
}

/// RFC 2759 Section 8.2: ChallengeHash()
pub fn challenge_hash(
    peer_challenge: &[u8; 16],
    authenticator_challenge: &[u8; 16],
    username: &str,
) -> [u8; CHALLENGE_HASH_LEN] {
    let mut sha1 = Sha1::new();
    sha1.update(peer_challenge);
    sha1.update(authenticator_challenge);
    sha1.update(username_to_bytes(username));
    let digest = sha1.finalize();

    let mut out = [0u8; CHALLENGE_HASH_LEN];
    out.copy_from_slice(&digest[..CHALLENGE_HASH_LEN]);
    out
}

/// RFC 2759 Section 8.3: NtPasswordHash()
pub fn nt_password_hash(password: &str) -> [u8; PASSWORD_HASH_LEN] {
    let mut md4 = Md4::new();
    md4.update(password_to_bytes(password));
    md4.finalize().into()
}

/// RFC 2759 Section 8.4: HashNtPasswordHash()
pub fn hash_nt_password_hash(password_hash: &[u8; PASSWORD_HASH_LEN]) -> [u8; PASSWORD_HASH_LEN] {
    let mut md4 = Md4::new();
    md4.update(password_hash);
    md4.finalize().into()
}

/// RFC 2759 Section 8.5: ChallengeResponse()
pub fn challenge_response(
    challenge: &[u8; CHALLENGE_HASH_LEN],
    password_hash: &[u8; PASSWORD_HASH_LEN],
) -> [u8; NT_RESPONSE_LEN] {
    let mut z_password_hash = [0u8; Z_PASSWORD_HASH_LEN];
    z_password_hash[..PASSWORD_HASH_LEN].copy_from_slice(password_hash);

    let mut response = [0u8; NT_RESPONSE_LEN];
    for i in 0..3 {
        let mut section = [0u8; Z_PASSWORD_SECTION_LEN];
        section.copy_from_slice(
            &z_password_hash[i * Z_PASSWORD_SECTION_LEN..(i + 1) * Z_PASSWORD_SECTION_LEN],
        );
        response[i * 8..(i + 1) * 8].copy_from_slice(&des_encrypt(challenge, &section));
    }
    response
}

/// RFC 2759 Section 8.6: DesEncrypt() with a 7-byte key expanded by parity
/// bits
fn des_encrypt(clear: &[u8; 8], key: &[u8; Z_PASSWORD_SECTION_LEN]) -> [u8; 8] {
    let key = add_parity_bits(key);
    let des = Des::new(GenericArray::from_slice(&key));

    let mut block = GenericArray::clone_from_slice(clear);
    des.encrypt_block(&mut block);
    block.into()
}

/// Expand a 7-byte key to the 8-byte DES key format, placing an odd-parity
/// bit in the least significant position of each byte
pub fn add_parity_bits(key: &[u8; Z_PASSWORD_SECTION_LEN]) -> [u8; 8] {
    let mut all_bits = 0u64;
    for &byte in key {
        all_bits = (all_bits << 8) | byte as u64;
    }

    let mut out = [0u8; 8];
    for slot in out.iter_mut().rev() {
        let seven = ((all_bits & 0x7F) as u8) << 1;
        *slot = seven | odd_parity_bit(seven);
        all_bits >>= 7;
    }
    out
}

fn odd_parity_bit(byte: u8) -> u8 {
    if byte.count_ones() % 2 == 0 {
        1
    } else {
        0
    }
}

/// RFC 2759 Section 8.7: GenerateAuthenticatorResponse()
pub fn generate_authenticator_response(
    password: &str,
    nt_response: &[u8; NT_RESPONSE_LEN],
    peer_challenge: &[u8; 16],
    authenticator_challenge: &[u8; 16],
    username: &str,
) -> [u8; AUTHENTICATOR_RESPONSE_LEN] {
    let password_hash = nt_password_hash(password);
    let password_hash_hash = hash_nt_password_hash(&password_hash);

    let mut sha1 = Sha1::new();
    sha1.update(password_hash_hash);
    sha1.update(nt_response);
    sha1.update(CHALLENGE_MAGIC_1);
    let digest = sha1.finalize();

    let challenge = challenge_hash(peer_challenge, authenticator_challenge, username);

    let mut sha1 = Sha1::new();
    sha1.update(digest);
    sha1.update(challenge);
    sha1.update(CHALLENGE_MAGIC_2);
    sha1.finalize().into()
}

/// RFC 2759 Section 8.8: CheckAuthenticatorResponse()
pub fn check_authenticator_response(
    password: &str,
    nt_response: &[u8; NT_RESPONSE_LEN],
    peer_challenge: &[u8; 16],
    authenticator_challenge: &[u8; 16],
    username: &str,
    received_response: &[u8; AUTHENTICATOR_RESPONSE_LEN],
) -> bool {
    let expected = generate_authenticator_response(
        password,
        nt_response,
        peer_challenge,
        authenticator_challenge,
        username,
    );
    expected == *received_response
}

/// RFC 3079 Section 3.4: GetMasterKey()
pub fn get_master_key(
    password_hash_hash: &[u8; PASSWORD_HASH_LEN],
    nt_response: &[u8; NT_RESPONSE_LEN],
) -> [u8; MASTER_KEY_LEN] {
    let mut sha1 = Sha1::new();
    sha1.update(password_hash_hash);
    sha1.update(nt_response);
    sha1.update(MSK_MAGIC_1);
    let digest = sha1.finalize();

    let mut out = [0u8; MASTER_KEY_LEN];
    out.copy_from_slice(&digest[..MASTER_KEY_LEN]);
    out
}

/// RFC 3079 Section 3.4: GetAsymmetricStartKey()
pub fn get_asymmetric_start_key(
    master_key: &[u8; MASTER_KEY_LEN],
    is_send: bool,
) -> [u8; SESSION_KEY_LEN] {
    let magic: &[u8] = if is_send { MSK_MAGIC_2 } else { MSK_MAGIC_3 };

    let mut sha1 = Sha1::new();
    sha1.update(master_key);
    sha1.update(SHS_PAD_1);
    sha1.update(magic);
    sha1.update(SHS_PAD_2);
    let digest = sha1.finalize();

    let mut out = [0u8; SESSION_KEY_LEN];
    out.copy_from_slice(&digest[..SESSION_KEY_LEN]);
    out
}

/// Derive the MSK: send key, then receive key, zero-padded to 64 bytes
pub fn generate_msk(password: &str, nt_response: &[u8; NT_RESPONSE_LEN]) -> [u8; MSK_LEN] {
    let password_hash = nt_password_hash(password);
    let password_hash_hash = hash_nt_password_hash(&password_hash);
    let master_key = get_master_key(&password_hash_hash, nt_response);

    let mut msk = [0u8; MSK_LEN];
    msk[..SESSION_KEY_LEN].copy_from_slice(&get_asymmetric_start_key(&master_key, true));
    msk[SESSION_KEY_LEN..2 * SESSION_KEY_LEN]
        .copy_from_slice(&get_asymmetric_start_key(&master_key, false));
    msk
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 2759 Section 9.2 test vector
    const USERNAME: &str = "User";
    const PASSWORD: &str = "clientPass";
    const AUTHENTICATOR_CHALLENGE: [u8; 16] = [
        0x5B, 0x5D, 0x7C, 0x7D, 0x7B, 0x3F, 0x2F, 0x3E, 0x3C, 0x2C, 0x60, 0x21, 0x32, 0x26, 0x26,
        0x28,
    ];
    const PEER_CHALLENGE: [u8; 16] = [
        0x21, 0x40, 0x23, 0x24, 0x25, 0x5E, 0x26, 0x2A, 0x28, 0x29, 0x5F, 0x2B, 0x3A, 0x33, 0x7C,
        0x7E,
    ];
    const CHALLENGE: [u8; 8] = [0xD0, 0x2E, 0x43, 0x86, 0xBC, 0xE9, 0x12, 0x26];
    const PASSWORD_HASH: [u8; 16] = [
        0x44, 0xEB, 0xBA, 0x8D, 0x53, 0x12, 0xB8, 0xD6, 0x11, 0x47, 0x44, 0x11, 0xF5, 0x69, 0x89,
        0xAE,
    ];
    const PASSWORD_HASH_HASH: [u8; 16] = [
        0x41, 0xC0, 0x0C, 0x58, 0x4B, 0xD2, 0xD9, 0x1C, 0x40, 0x17, 0xA2, 0xA1, 0x2F, 0xA5, 0x9F,
        0x3F,
    ];
    const NT_RESPONSE: [u8; 24] = [
        0x82, 0x30, 0x9E, 0xCD, 0x8D, 0x70, 0x8B, 0x5E, 0xA0, 0x8F, 0xAA, 0x39, 0x81, 0xCD, 0x83,
        0x54, 0x42, 0x33, 0x11, 0x4A, 0x3D, 0x85, 0xD6, 0xDF,
    ];

    #[test]
    fn test_rfc2759_challenge_hash() {
        let hash = challenge_hash(&PEER_CHALLENGE, &AUTHENTICATOR_CHALLENGE, USERNAME);
        assert_eq!(hash, CHALLENGE);
    }

    #[test]
    fn test_rfc2759_nt_password_hash() {
        assert_eq!(nt_password_hash(PASSWORD), PASSWORD_HASH);
    }

    #[test]
    fn test_rfc2759_hash_nt_password_hash() {
        assert_eq!(hash_nt_password_hash(&PASSWORD_HASH), PASSWORD_HASH_HASH);
    }

    #[test]
    fn test_rfc2759_nt_response() {
        let response =
            generate_nt_response(&AUTHENTICATOR_CHALLENGE, &PEER_CHALLENGE, USERNAME, PASSWORD);
        assert_eq!(response, NT_RESPONSE);
    }

    #[test]
    fn test_rfc2759_authenticator_response() {
        let response = generate_authenticator_response(
            PASSWORD,
            &NT_RESPONSE,
            &PEER_CHALLENGE,
            &AUTHENTICATOR_CHALLENGE,
            USERNAME,
        );
        let expected = hex::decode("407A5589115FD0D6209F510FE9C04566932CDA56").unwrap();
        assert_eq!(&response[..], &expected[..]);
    }

    #[test]
    fn test_check_authenticator_response_round_trip() {
        let response = generate_authenticator_response(
            PASSWORD,
            &NT_RESPONSE,
            &PEER_CHALLENGE,
            &AUTHENTICATOR_CHALLENGE,
            USERNAME,
        );

        assert!(check_authenticator_response(
            PASSWORD,
            &NT_RESPONSE,
            &PEER_CHALLENGE,
            &AUTHENTICATOR_CHALLENGE,
            USERNAME,
            &response,
        ));

        let mut tampered = response;
        tampered[0] ^= 0x01;
        assert!(!check_authenticator_response(
            PASSWORD,
            &NT_RESPONSE,
            &PEER_CHALLENGE,
            &AUTHENTICATOR_CHALLENGE,
            USERNAME,
            &tampered,
        ));
    }

    #[test]
    fn test_rfc3079_master_key() {
        // RFC 3079 Section 3.5.3
        let master_key = get_master_key(&PASSWORD_HASH_HASH, &NT_RESPONSE);
        let expected = hex::decode("FDECE3717A8C838CB388E527AE3CDD31").unwrap();
        assert_eq!(&master_key[..], &expected[..]);
    }

    #[test]
    fn test_rfc3079_send_start_key() {
        // RFC 3079 Section 3.5.3: 128-bit send session start key
        let master_key = get_master_key(&PASSWORD_HASH_HASH, &NT_RESPONSE);
        let send_key = get_asymmetric_start_key(&master_key, true);
        let expected = hex::decode("8B7CDC149B993A1BA118CB153F56DCCB").unwrap();
        assert_eq!(&send_key[..], &expected[..]);
    }

    #[test]
    fn test_generate_msk_layout() {
        let msk = generate_msk(PASSWORD, &NT_RESPONSE);
        let master_key = get_master_key(&PASSWORD_HASH_HASH, &NT_RESPONSE);

        assert_eq!(msk[..16], get_asymmetric_start_key(&master_key, true));
        assert_eq!(msk[16..32], get_asymmetric_start_key(&master_key, false));
        assert_eq!(msk[32..], [0u8; 32]);
    }

    #[test]
    fn test_add_parity_bits_preserves_key_bits() {
        let key = [0xFF; 7];
        let expanded = add_parity_bits(&key);
        // All key bits set: each byte carries 7 ones plus an even top bit,
        // so the parity bit must be 0 to keep the count odd
        assert_eq!(expanded, [0xFE; 8]);

        let zero = add_parity_bits(&[0x00; 7]);
        assert_eq!(zero, [0x01; 8]);
    }

    #[test]
    fn test_password_to_bytes_is_utf16le() {
        assert_eq!(password_to_bytes("ab"), vec![0x61, 0x00, 0x62, 0x00]);
    }
}
