//! Re-Authentication Identity Cache
//!
//! SIM/AKA fast re-authentication keys credentials issued during a full
//! challenge round to a server-assigned re-auth identity. The cache is an
//! explicit object owned by the caller and shared with each dispatcher at
//! construction; there is no process-wide state.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Credentials cached after a successful full authentication
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ReauthInfo {
    /// The highest counter value already used with these credentials
    #[zeroize(skip)]
    pub counter: u16,
    /// Master key from the full challenge
    pub mk: Vec<u8>,
    /// Encryption key from the full challenge
    pub k_encr: Vec<u8>,
    /// Authentication key from the full challenge
    pub k_aut: Vec<u8>,
    #[zeroize(skip)]
    created_at: Instant,
    #[zeroize(skip)]
    lifetime: Duration,
}

impl ReauthInfo {
    /// Whether this entry is still within its lifetime
    pub fn is_valid(&self) -> bool {
        self.created_at.elapsed() < self.lifetime
    }
}

impl std::fmt::Debug for ReauthInfo {
    // Key bytes stay out of logs
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReauthInfo")
            .field("counter", &self.counter)
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[derive(Hash, PartialEq, Eq)]
struct CacheKey {
    reauth_identity: Vec<u8>,
    permanent_identity: Vec<u8>,
}

/// Caller-owned cache of re-authentication credentials, keyed by
/// (re-auth identity, permanent identity)
pub struct ReauthIdentityCache {
    entries: Mutex<HashMap<CacheKey, ReauthInfo>>,
    lifetime: Duration,
}

impl ReauthIdentityCache {
    /// Default entry lifetime
    pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);

    /// Create an empty cache with the default entry lifetime
    pub fn new() -> Self {
        Self::with_lifetime(Self::DEFAULT_LIFETIME)
    }

    /// Create an empty cache with a custom entry lifetime
    pub fn with_lifetime(lifetime: Duration) -> Self {
        ReauthIdentityCache {
            entries: Mutex::new(HashMap::new()),
            lifetime,
        }
    }

    /// Store credentials under a server-assigned re-auth identity,
    /// replacing any previous entry for the pair
    pub fn register(
        &self,
        reauth_identity: &[u8],
        permanent_identity: &[u8],
        counter: u16,
        mk: Vec<u8>,
        k_encr: Vec<u8>,
        k_aut: Vec<u8>,
    ) {
        let info = ReauthInfo {
            counter,
            mk,
            k_encr,
            k_aut,
            created_at: Instant::now(),
            lifetime: self.lifetime,
        };
        self.entries.lock().unwrap().insert(
            CacheKey {
                reauth_identity: reauth_identity.to_vec(),
                permanent_identity: permanent_identity.to_vec(),
            },
            info,
        );
    }

    /// Whether a still-valid entry exists for the pair
    pub fn has_valid(&self, reauth_identity: &[u8], permanent_identity: &[u8]) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(&CacheKey {
                reauth_identity: reauth_identity.to_vec(),
                permanent_identity: permanent_identity.to_vec(),
            })
            .is_some_and(ReauthInfo::is_valid)
    }

    /// Remove and return the entry for the pair if it is still valid;
    /// the entry is consumed either way
    pub fn take_valid(
        &self,
        reauth_identity: &[u8],
        permanent_identity: &[u8],
    ) -> Option<ReauthInfo> {
        self.entries
            .lock()
            .unwrap()
            .remove(&CacheKey {
                reauth_identity: reauth_identity.to_vec(),
                permanent_identity: permanent_identity.to_vec(),
            })
            .filter(ReauthInfo::is_valid)
    }

    /// Number of cached entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReauthIdentityCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_take() {
        let cache = ReauthIdentityCache::new();
        cache.register(b"reauth@x", b"perm@x", 3, vec![1; 20], vec![2; 16], vec![3; 16]);

        assert!(cache.has_valid(b"reauth@x", b"perm@x"));
        assert!(!cache.has_valid(b"reauth@x", b"other@x"));

        let info = cache.take_valid(b"reauth@x", b"perm@x").unwrap();
        assert_eq!(info.counter, 3);
        assert_eq!(info.mk, vec![1; 20]);

        // Lookup consumes the entry
        assert!(cache.take_valid(b"reauth@x", b"perm@x").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_entry_is_invalid_and_consumed() {
        let cache = ReauthIdentityCache::with_lifetime(Duration::ZERO);
        cache.register(b"r", b"p", 1, vec![1; 20], vec![2; 16], vec![3; 16]);

        assert!(!cache.has_valid(b"r", b"p"));
        assert!(cache.take_valid(b"r", b"p").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reregister_replaces_entry() {
        let cache = ReauthIdentityCache::new();
        cache.register(b"r", b"p", 1, vec![1; 20], vec![2; 16], vec![3; 16]);
        cache.register(b"r", b"p", 9, vec![4; 20], vec![5; 16], vec![6; 16]);

        let info = cache.take_valid(b"r", b"p").unwrap();
        assert_eq!(info.counter, 9);
    }
}
