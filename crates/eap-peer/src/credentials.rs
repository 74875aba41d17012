//! SIM/AKA Credential Source Abstraction
//!
//! The state machines never hold SIM secrets. Challenge computation is
//! delegated to a caller-provided credential source (in production, the
//! UICC), which is invoked synchronously and must surface failures rather
//! than retry internally.

use thiserror::Error;

/// Outcome of an AKA challenge computation (TS 31.102 Section 7.1.2.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AkaChallengeOutcome {
    /// The AUTN was accepted and the response material computed
    Accepted {
        /// RES (4-16 bytes)
        res: Vec<u8>,
        /// Cipher key (16 bytes)
        ck: Vec<u8>,
        /// Integrity key (16 bytes)
        ik: Vec<u8>,
    },
    /// The AUTN sequence number was out of range; the server must
    /// re-synchronize using AUTS (RFC 4187 Section 9.6)
    SynchronizationFailure {
        /// AUTS (14 bytes)
        auts: [u8; 14],
    },
}

/// Outcome of a single-RAND GSM challenge computation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimChallengeOutcome {
    /// SRES (4 bytes)
    pub sres: [u8; 4],
    /// Kc (8 bytes)
    pub kc: [u8; 8],
}

/// Errors from the external credential source
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The AUTN failed network authentication; the peer must answer with
    /// Authentication-Reject
    #[error("Network authentication token rejected")]
    AutnRejected,

    /// The credential source is unavailable or returned garbage
    #[error("Credential source failure: {0}")]
    Unavailable(String),
}

/// A synchronous source of SIM/AKA challenge responses
pub trait SimAkaCredentialSource: Send + Sync {
    /// Compute the AKA challenge response for RAND/AUTN
    fn authenticate_aka(
        &self,
        rand: &[u8; 16],
        autn: &[u8; 16],
    ) -> Result<AkaChallengeOutcome, CredentialError>;

    /// Compute the GSM challenge response for one RAND
    fn authenticate_sim(&self, rand: &[u8; 16]) -> Result<SimChallengeOutcome, CredentialError>;
}
