//! AT_ENCR_DATA Encryption
//!
//! AES-128-CBC under K_encr with the AT_IV initialization vector, as
//! required by RFC 4187 Section 10.12. Plaintext alignment to the block
//! size is handled at the attribute layer with AT_PADDING, so the cipher
//! runs without block padding.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

/// AES block size
pub const BLOCK_SIZE: usize = 16;

/// K_encr size
pub const KEY_SIZE: usize = 16;

/// Decrypt AT_ENCR_DATA ciphertext; None when the inputs are unusable
pub fn decrypt_encr_data(key: &[u8], iv: &[u8; BLOCK_SIZE], ciphertext: &[u8]) -> Option<Vec<u8>> {
    if key.len() != KEY_SIZE || ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return None;
    }

    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut plaintext = Vec::with_capacity(ciphertext.len());
    let mut chain = *iv;

    for block_bytes in ciphertext.chunks_exact(BLOCK_SIZE) {
        let mut block = GenericArray::clone_from_slice(block_bytes);
        cipher.decrypt_block(&mut block);
        for (out_byte, chain_byte) in block.iter_mut().zip(chain.iter()) {
            *out_byte ^= chain_byte;
        }
        plaintext.extend_from_slice(&block);
        chain.copy_from_slice(block_bytes);
    }

    Some(plaintext)
}

/// Encrypt an AT_ENCR_DATA plaintext; the input must already be padded to
/// the block size
pub fn encrypt_encr_data(key: &[u8], iv: &[u8; BLOCK_SIZE], plaintext: &[u8]) -> Option<Vec<u8>> {
    if key.len() != KEY_SIZE || plaintext.is_empty() || plaintext.len() % BLOCK_SIZE != 0 {
        return None;
    }

    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut ciphertext = Vec::with_capacity(plaintext.len());
    let mut chain = *iv;

    for block_bytes in plaintext.chunks_exact(BLOCK_SIZE) {
        let mut block = GenericArray::clone_from_slice(block_bytes);
        for (in_byte, chain_byte) in block.iter_mut().zip(chain.iter()) {
            *in_byte ^= chain_byte;
        }
        cipher.encrypt_block(&mut block);
        ciphertext.extend_from_slice(&block);
        chain.copy_from_slice(&block);
    }

    Some(ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [0x2B; KEY_SIZE];
        let iv = [0x7E; BLOCK_SIZE];
        let plaintext = vec![0x15; 48];

        let ciphertext = encrypt_encr_data(&key, &iv, &plaintext).unwrap();
        assert_eq!(ciphertext.len(), 48);
        assert_ne!(ciphertext, plaintext);

        let decrypted = decrypt_encr_data(&key, &iv, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_iv_changes_ciphertext() {
        let key = [0x01; KEY_SIZE];
        let plaintext = vec![0xAA; 16];

        let a = encrypt_encr_data(&key, &[0x00; 16], &plaintext).unwrap();
        let b = encrypt_encr_data(&key, &[0x01; 16], &plaintext).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unaligned_input_rejected() {
        let key = [0x01; KEY_SIZE];
        let iv = [0x00; BLOCK_SIZE];
        assert!(decrypt_encr_data(&key, &iv, &[0u8; 15]).is_none());
        assert!(encrypt_encr_data(&key, &iv, &[0u8; 17]).is_none());
        assert!(decrypt_encr_data(&key, &iv, &[]).is_none());
    }

    #[test]
    fn test_wrong_key_size_rejected() {
        let iv = [0x00; BLOCK_SIZE];
        assert!(decrypt_encr_data(&[0u8; 8], &iv, &[0u8; 16]).is_none());
    }

    #[test]
    fn test_cbc_chaining() {
        // Identical plaintext blocks must produce distinct ciphertext blocks
        let key = [0x3C; KEY_SIZE];
        let iv = [0x99; BLOCK_SIZE];
        let plaintext = vec![0x42; 32];

        let ciphertext = encrypt_encr_data(&key, &iv, &plaintext).unwrap();
        assert_ne!(ciphertext[..16], ciphertext[16..]);
    }
}
