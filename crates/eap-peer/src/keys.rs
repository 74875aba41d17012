//! Session Key Material
//!
//! Derived key buffers are owned exclusively by the engine that derived
//! them, are derived at most once per authentication, and are zeroed both
//! on drop and on every terminal phase transition.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Master Session Key length (RFC 3748 Section 7.10: at least 64 bytes)
pub const MSK_LEN: usize = 64;

/// Extended Master Session Key length
pub const EMSK_LEN: usize = 64;

/// K_encr length (RFC 4187 Section 7)
pub const K_ENCR_LEN: usize = 16;

/// K_aut length for SIM/AKA (RFC 4187 Section 7)
pub const K_AUT_LEN: usize = 16;

/// K_aut length for AKA' (RFC 5448 Section 3.3)
pub const K_AUT_PRIME_LEN: usize = 32;

/// K_re length for AKA' (RFC 5448 Section 3.3)
pub const K_RE_LEN: usize = 32;

/// The exported session keys handed to the caller on EAP-Success
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Master Session Key
    pub msk: Vec<u8>,
    /// Extended Master Session Key
    pub emsk: Vec<u8>,
}

impl SessionKeys {
    /// Create session keys from derived buffers
    pub fn new(msk: Vec<u8>, emsk: Vec<u8>) -> Self {
        SessionKeys { msk, emsk }
    }
}

impl std::fmt::Debug for SessionKeys {
    // Key bytes stay out of logs
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("msk_len", &self.msk.len())
            .field("emsk_len", &self.emsk.len())
            .finish()
    }
}

/// The full SIM/AKA key hierarchy held by a method engine
#[derive(Default, Zeroize, ZeroizeOnDrop)]
pub(crate) struct SimAkaKeys {
    /// Master key (SHA-1 output, retained for fast re-authentication)
    pub mk: Vec<u8>,
    pub k_encr: Vec<u8>,
    pub k_aut: Vec<u8>,
    /// AKA' re-authentication key; empty for SIM/AKA
    pub k_re: Vec<u8>,
    pub msk: Vec<u8>,
    pub emsk: Vec<u8>,
}

impl SimAkaKeys {
    /// Whether key material has been derived
    pub fn is_derived(&self) -> bool {
        !self.k_aut.is_empty()
    }

    /// Zero and drop all derived material; runs on every terminal
    /// transition
    pub fn invalidate(&mut self) {
        self.zeroize();
        self.mk.clear();
        self.k_encr.clear();
        self.k_aut.clear();
        self.k_re.clear();
        self.msk.clear();
        self.emsk.clear();
    }

    /// Move MSK/EMSK out for export and invalidate the rest
    pub fn export(&mut self) -> SessionKeys {
        let keys = SessionKeys::new(self.msk.clone(), self.emsk.clone());
        self.invalidate();
        keys
    }
}

impl std::fmt::Debug for SimAkaKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimAkaKeys")
            .field("derived", &self.is_derived())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidate_clears_all_buffers() {
        let mut keys = SimAkaKeys {
            mk: vec![1; 20],
            k_encr: vec![2; K_ENCR_LEN],
            k_aut: vec![3; K_AUT_LEN],
            k_re: Vec::new(),
            msk: vec![4; MSK_LEN],
            emsk: vec![5; EMSK_LEN],
        };
        assert!(keys.is_derived());

        keys.invalidate();
        assert!(!keys.is_derived());
        assert!(keys.mk.is_empty());
        assert!(keys.msk.is_empty());
    }

    #[test]
    fn test_export_moves_msk_and_invalidates() {
        let mut keys = SimAkaKeys {
            mk: vec![1; 20],
            k_encr: vec![2; K_ENCR_LEN],
            k_aut: vec![3; K_AUT_LEN],
            k_re: Vec::new(),
            msk: vec![4; MSK_LEN],
            emsk: vec![5; EMSK_LEN],
        };

        let exported = keys.export();
        assert_eq!(exported.msk, vec![4; MSK_LEN]);
        assert_eq!(exported.emsk, vec![5; EMSK_LEN]);
        assert!(!keys.is_derived());
    }

    #[test]
    fn test_session_keys_debug_hides_bytes() {
        let keys = SessionKeys::new(vec![0xAA; MSK_LEN], vec![0xBB; EMSK_LEN]);
        let rendered = format!("{:?}", keys);
        assert!(!rendered.contains("170")); // 0xAA
        assert!(rendered.contains("msk_len"));
    }
}
