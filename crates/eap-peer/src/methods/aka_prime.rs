//! EAP-AKA' Key-Derivation Specialization
//!
//! AKA' (RFC 5448) replaces the AKA master-key derivation with the
//! CK'/IK' + PRF' construction, bound to a network name negotiated through
//! AT_KDF_INPUT. Everything else is the shared SIM/AKA engine.

use tracing::warn;

use crate::crypto::prf_prime::{derive_ck_ik_prime, prf_prime};
use crate::error::EapError;
use crate::keys::{
    SimAkaKeys, EMSK_LEN, K_AUT_PRIME_LEN, K_ENCR_LEN, K_RE_LEN, MSK_LEN,
};
use eap_proto::simaka::AKA_PRIME_KDF_1;

/// Identity string prefix for the AKA' master-key derivation
/// (RFC 5448 Section 3.3)
const MK_PREFIX: &[u8] = b"EAP-AKA'";

/// Outcome of validating the server's AT_KDF/AT_KDF_INPUT proposal
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum KdfValidation {
    /// KDF 1 negotiated against the given network name
    Accepted,
    /// The proposal cannot be used; answer with Authentication-Reject
    Rejected,
}

/// Validate the AT_KDF list: only KDF 1 is supported, and the server must
/// offer nothing else (RFC 5448 Section 3.2)
pub(crate) fn validate_kdf(kdf_list: &[u16]) -> KdfValidation {
    if kdf_list.is_empty() || kdf_list.iter().any(|kdf| *kdf != AKA_PRIME_KDF_1) {
        return KdfValidation::Rejected;
    }
    KdfValidation::Accepted
}

/// Compare peer and server network names (RFC 5448 Section 3.1)
///
/// Names are colon-delimited field lists. An empty name on either side
/// always matches; otherwise every field of the shorter name must equal
/// the corresponding field of the longer one.
pub(crate) fn has_matching_network_names(peer_network_name: &str, server_network_name: &str) -> bool {
    if peer_network_name.is_empty() || server_network_name.is_empty() {
        return true;
    }

    peer_network_name
        .split(':')
        .zip(server_network_name.split(':'))
        .all(|(peer_field, server_field)| peer_field == server_field)
}

/// Enforce the network-name policy; a mismatch is fatal unless the
/// configuration downgrades it to advisory
pub(crate) fn check_network_names(
    peer_network_name: &[u8],
    server_network_name: &[u8],
    allow_mismatched: bool,
) -> Result<(), EapError> {
    let peer = String::from_utf8_lossy(peer_network_name);
    let server = String::from_utf8_lossy(server_network_name);

    if has_matching_network_names(&peer, &server) {
        return Ok(());
    }

    if allow_mismatched {
        warn!(
            peer = %peer,
            server = %server,
            "accepting mismatched AKA' network names per configuration"
        );
        return Ok(());
    }

    Err(EapError::AuthenticationFailure(
        "peer and server network names do not match",
    ))
}

/// Derive the full AKA' key hierarchy
///
/// CK'/IK' come from a keyed MAC bound to the server network name and the
/// SQN xor AK carried in the first six AUTN bytes; the master key is then
/// PRF'(IK' | CK', "EAP-AKA'" | identity) expanded into
/// K_encr | K_aut | K_re | MSK | EMSK.
pub(crate) fn derive_keys(
    identity: &[u8],
    ck: &[u8; 16],
    ik: &[u8; 16],
    autn: &[u8; 16],
    server_network_name: &[u8],
) -> SimAkaKeys {
    let mut sqn_xor_ak = [0u8; 6];
    sqn_xor_ak.copy_from_slice(&autn[..6]);

    let (ck_prime, ik_prime) = derive_ck_ik_prime(ck, ik, server_network_name, &sqn_xor_ak);

    let mut key = [0u8; 32];
    key[..16].copy_from_slice(&ik_prime);
    key[16..].copy_from_slice(&ck_prime);

    let mut data = Vec::with_capacity(MK_PREFIX.len() + identity.len());
    data.extend_from_slice(MK_PREFIX);
    data.extend_from_slice(identity);

    let total = K_ENCR_LEN + K_AUT_PRIME_LEN + K_RE_LEN + MSK_LEN + EMSK_LEN;
    let stream = prf_prime(&key, &data, total);

    let mut offset = 0;
    let mut take = |len: usize| {
        let part = stream[offset..offset + len].to_vec();
        offset += len;
        part
    };

    SimAkaKeys {
        mk: Vec::new(),
        k_encr: take(K_ENCR_LEN),
        k_aut: take(K_AUT_PRIME_LEN),
        k_re: take(K_RE_LEN),
        msk: take(MSK_LEN),
        emsk: take(EMSK_LEN),
    }
}
