//! EAP-SIM/AKA/AKA' Attribute Support
//!
//! This module implements the type data carried by EAP-SIM (RFC 4186),
//! EAP-AKA (RFC 4187) and EAP-AKA' (RFC 5448) packets: a subtype byte,
//! two reserved bytes, and a list of attributes.
//!
//! # Attribute Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Attribute Type|    Length     |  Value ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Length is expressed in multiples of 4 bytes and includes the 2-byte
//! header. Attribute types 0-127 are non-skippable; an unrecognized one is
//! a decode error. Types 128-255 are skippable and are retained raw so a
//! message re-encodes byte-exactly (required for MAC verification, which
//! runs over the message with the AT_MAC value zeroed).

use thiserror::Error;

/// Attribute length scaling factor (RFC 4187 Section 8.1)
const LENGTH_SCALING: usize = 4;

/// Minimum encoded attribute size: type + length + 2 value/reserved bytes
const MIN_ATTR_LENGTH: usize = 4;

// Attribute types (RFC 4186 Section 10.1 / RFC 4187 Section 10.1 /
// RFC 5448 Section 10.1)
pub const EAP_AT_RAND: u8 = 1;
pub const EAP_AT_AUTN: u8 = 2;
pub const EAP_AT_RES: u8 = 3;
pub const EAP_AT_AUTS: u8 = 4;
pub const EAP_AT_PADDING: u8 = 6;
pub const EAP_AT_NONCE_MT: u8 = 7;
pub const EAP_AT_PERMANENT_ID_REQ: u8 = 10;
pub const EAP_AT_MAC: u8 = 11;
pub const EAP_AT_NOTIFICATION: u8 = 12;
pub const EAP_AT_ANY_ID_REQ: u8 = 13;
pub const EAP_AT_IDENTITY: u8 = 14;
pub const EAP_AT_VERSION_LIST: u8 = 15;
pub const EAP_AT_SELECTED_VERSION: u8 = 16;
pub const EAP_AT_FULLAUTH_ID_REQ: u8 = 17;
pub const EAP_AT_COUNTER: u8 = 19;
pub const EAP_AT_COUNTER_TOO_SMALL: u8 = 20;
pub const EAP_AT_NONCE_S: u8 = 21;
pub const EAP_AT_CLIENT_ERROR_CODE: u8 = 22;
pub const EAP_AT_KDF_INPUT: u8 = 23;
pub const EAP_AT_KDF: u8 = 24;
pub const EAP_AT_IV: u8 = 129;
pub const EAP_AT_ENCR_DATA: u8 = 130;
pub const EAP_AT_NEXT_PSEUDONYM: u8 = 132;
pub const EAP_AT_NEXT_REAUTH_ID: u8 = 133;
pub const EAP_AT_RESULT_IND: u8 = 135;
pub const EAP_AT_BIDDING: u8 = 136;

/// AT_MAC value length (RFC 4187 Section 10.15)
pub const MAC_LEN: usize = 16;

/// AT_AUTS value length (RFC 4187 Section 10.9)
pub const AUTS_LEN: usize = 14;

/// AT_RAND/AT_AUTN/AT_IV/AT_NONCE_S/AT_NONCE_MT value length
pub const RAND_LEN: usize = 16;

/// The single EAP-SIM protocol version (RFC 4186 Section 4.1)
pub const EAP_SIM_VERSION_1: u16 = 1;

/// The single supported AT_KDF identifier (RFC 5448 Section 3.2)
pub const AKA_PRIME_KDF_1: u16 = 1;

// Notification code bits (RFC 4187 Section 10.19): S = success,
// P = the notification may be delivered before the challenge round
pub const NOTIFICATION_S_BIT: u16 = 0x8000;
pub const NOTIFICATION_P_BIT: u16 = 0x4000;

/// General failure after authentication
pub const NOTIFICATION_GENERAL_FAILURE_POST_CHALLENGE: u16 = 0;
/// General failure before authentication (P bit set)
pub const NOTIFICATION_GENERAL_FAILURE_PRE_CHALLENGE: u16 = 16384;
/// Success (S bit set)
pub const NOTIFICATION_SUCCESS: u16 = 32768;

// AT_CLIENT_ERROR_CODE values (RFC 4187 Section 10.20)
pub const CLIENT_ERROR_UNABLE_TO_PROCESS: u16 = 0;
pub const CLIENT_ERROR_UNSUPPORTED_VERSION: u16 = 1;
pub const CLIENT_ERROR_INSUFFICIENT_CHALLENGES: u16 = 2;
pub const CLIENT_ERROR_STALE_RANDS: u16 = 3;

/// EAP-SIM/AKA subtype (first byte of the type data)
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SimAkaSubtype {
    /// AKA-Challenge (Subtype 1) - RFC 4187
    AkaChallenge = 1,
    /// AKA-Authentication-Reject (Subtype 2) - RFC 4187
    AkaAuthenticationReject = 2,
    /// AKA-Synchronization-Failure (Subtype 4) - RFC 4187
    AkaSynchronizationFailure = 4,
    /// AKA-Identity (Subtype 5) - RFC 4187
    AkaIdentity = 5,
    /// SIM-Start (Subtype 10) - RFC 4186
    SimStart = 10,
    /// SIM-Challenge (Subtype 11) - RFC 4186
    SimChallenge = 11,
    /// Notification (Subtype 12) - shared
    Notification = 12,
    /// Re-authentication (Subtype 13) - shared
    Reauthentication = 13,
    /// Client-Error (Subtype 14) - shared
    ClientError = 14,
}

impl SimAkaSubtype {
    /// Convert from u8 to SimAkaSubtype
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::AkaChallenge),
            2 => Some(Self::AkaAuthenticationReject),
            4 => Some(Self::AkaSynchronizationFailure),
            5 => Some(Self::AkaIdentity),
            10 => Some(Self::SimStart),
            11 => Some(Self::SimChallenge),
            12 => Some(Self::Notification),
            13 => Some(Self::Reauthentication),
            14 => Some(Self::ClientError),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A single typed EAP-SIM/AKA attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimAkaAttribute {
    /// AT_RAND carrying a single AKA RAND
    RandAka([u8; 16]),
    /// AT_RAND carrying 2 or 3 SIM RANDs
    RandSim(Vec<[u8; 16]>),
    /// AT_AUTN (network authentication token)
    Autn([u8; 16]),
    /// AT_RES; the length prefix is expressed in bits
    Res { bits: u16, res: Vec<u8> },
    /// AT_AUTS (synchronization failure parameter)
    Auts([u8; 14]),
    /// AT_PADDING with the given total encoded size (4, 8 or 12)
    Padding(usize),
    /// AT_NONCE_MT (SIM peer nonce)
    NonceMt([u8; 16]),
    /// AT_PERMANENT_ID_REQ
    PermanentIdReq,
    /// AT_MAC
    Mac([u8; 16]),
    /// AT_NOTIFICATION code
    Notification(u16),
    /// AT_ANY_ID_REQ
    AnyIdReq,
    /// AT_IDENTITY
    Identity(Vec<u8>),
    /// AT_VERSION_LIST (SIM)
    VersionList(Vec<u16>),
    /// AT_SELECTED_VERSION (SIM)
    SelectedVersion(u16),
    /// AT_FULLAUTH_ID_REQ
    FullauthIdReq,
    /// AT_COUNTER (re-authentication counter, always encrypted)
    Counter(u16),
    /// AT_COUNTER_TOO_SMALL
    CounterTooSmall,
    /// AT_NONCE_S (re-authentication server nonce, always encrypted)
    NonceS([u8; 16]),
    /// AT_CLIENT_ERROR_CODE
    ClientErrorCode(u16),
    /// AT_KDF_INPUT (AKA' network name)
    KdfInput(Vec<u8>),
    /// AT_KDF (AKA' key derivation function identifier; may repeat)
    Kdf(u16),
    /// AT_IV (initialization vector for AT_ENCR_DATA)
    Iv([u8; 16]),
    /// AT_ENCR_DATA (AES-128-CBC ciphertext, multiple of 16 bytes)
    EncrData(Vec<u8>),
    /// AT_NEXT_PSEUDONYM (encrypted)
    NextPseudonym(Vec<u8>),
    /// AT_NEXT_REAUTH_ID (encrypted)
    NextReauthId(Vec<u8>),
    /// AT_RESULT_IND
    ResultInd,
    /// AT_BIDDING (RFC 5448 Section 4)
    Bidding { server_supports_aka_prime: bool },
    /// Unrecognized skippable attribute (type 128-255), retained raw
    Skippable { attr_type: u8, value: Vec<u8> },
}

impl SimAkaAttribute {
    /// The attribute type byte
    pub fn attr_type(&self) -> u8 {
        match self {
            Self::RandAka(_) | Self::RandSim(_) => EAP_AT_RAND,
            Self::Autn(_) => EAP_AT_AUTN,
            Self::Res { .. } => EAP_AT_RES,
            Self::Auts(_) => EAP_AT_AUTS,
            Self::Padding(_) => EAP_AT_PADDING,
            Self::NonceMt(_) => EAP_AT_NONCE_MT,
            Self::PermanentIdReq => EAP_AT_PERMANENT_ID_REQ,
            Self::Mac(_) => EAP_AT_MAC,
            Self::Notification(_) => EAP_AT_NOTIFICATION,
            Self::AnyIdReq => EAP_AT_ANY_ID_REQ,
            Self::Identity(_) => EAP_AT_IDENTITY,
            Self::VersionList(_) => EAP_AT_VERSION_LIST,
            Self::SelectedVersion(_) => EAP_AT_SELECTED_VERSION,
            Self::FullauthIdReq => EAP_AT_FULLAUTH_ID_REQ,
            Self::Counter(_) => EAP_AT_COUNTER,
            Self::CounterTooSmall => EAP_AT_COUNTER_TOO_SMALL,
            Self::NonceS(_) => EAP_AT_NONCE_S,
            Self::ClientErrorCode(_) => EAP_AT_CLIENT_ERROR_CODE,
            Self::KdfInput(_) => EAP_AT_KDF_INPUT,
            Self::Kdf(_) => EAP_AT_KDF,
            Self::Iv(_) => EAP_AT_IV,
            Self::EncrData(_) => EAP_AT_ENCR_DATA,
            Self::NextPseudonym(_) => EAP_AT_NEXT_PSEUDONYM,
            Self::NextReauthId(_) => EAP_AT_NEXT_REAUTH_ID,
            Self::ResultInd => EAP_AT_RESULT_IND,
            Self::Bidding { .. } => EAP_AT_BIDDING,
            Self::Skippable { attr_type, .. } => *attr_type,
        }
    }

    /// Encode this attribute, appending to `out`
    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::RandAka(rand) => encode_reserved_value(out, EAP_AT_RAND, rand),
            Self::RandSim(rands) => {
                let len = MIN_ATTR_LENGTH + rands.len() * RAND_LEN;
                out.push(EAP_AT_RAND);
                out.push((len / LENGTH_SCALING) as u8);
                out.extend_from_slice(&[0, 0]);
                for rand in rands {
                    out.extend_from_slice(rand);
                }
            }
            Self::Autn(autn) => encode_reserved_value(out, EAP_AT_AUTN, autn),
            Self::Res { bits, res } => {
                let padded = pad_to_scaling(res.len());
                out.push(EAP_AT_RES);
                out.push(((MIN_ATTR_LENGTH + padded) / LENGTH_SCALING) as u8);
                out.extend_from_slice(&bits.to_be_bytes());
                out.extend_from_slice(res);
                out.resize(out.len() + (padded - res.len()), 0);
            }
            Self::Auts(auts) => {
                out.push(EAP_AT_AUTS);
                out.push(((2 + AUTS_LEN) / LENGTH_SCALING) as u8);
                out.extend_from_slice(auts);
            }
            Self::Padding(total) => {
                out.push(EAP_AT_PADDING);
                out.push((total / LENGTH_SCALING) as u8);
                out.resize(out.len() + (total - 2), 0);
            }
            Self::NonceMt(nonce) => encode_reserved_value(out, EAP_AT_NONCE_MT, nonce),
            Self::PermanentIdReq => encode_reserved_value(out, EAP_AT_PERMANENT_ID_REQ, &[]),
            Self::Mac(mac) => encode_reserved_value(out, EAP_AT_MAC, mac),
            Self::Notification(code) => encode_u16(out, EAP_AT_NOTIFICATION, *code),
            Self::AnyIdReq => encode_reserved_value(out, EAP_AT_ANY_ID_REQ, &[]),
            Self::Identity(identity) => encode_length_prefixed(out, EAP_AT_IDENTITY, identity),
            Self::VersionList(versions) => {
                let actual = versions.len() * 2;
                let padded = pad_to_scaling(actual);
                out.push(EAP_AT_VERSION_LIST);
                out.push(((MIN_ATTR_LENGTH + padded) / LENGTH_SCALING) as u8);
                out.extend_from_slice(&(actual as u16).to_be_bytes());
                for version in versions {
                    out.extend_from_slice(&version.to_be_bytes());
                }
                out.resize(out.len() + (padded - actual), 0);
            }
            Self::SelectedVersion(version) => encode_u16(out, EAP_AT_SELECTED_VERSION, *version),
            Self::FullauthIdReq => encode_reserved_value(out, EAP_AT_FULLAUTH_ID_REQ, &[]),
            Self::Counter(counter) => encode_u16(out, EAP_AT_COUNTER, *counter),
            Self::CounterTooSmall => encode_reserved_value(out, EAP_AT_COUNTER_TOO_SMALL, &[]),
            Self::NonceS(nonce) => encode_reserved_value(out, EAP_AT_NONCE_S, nonce),
            Self::ClientErrorCode(code) => encode_u16(out, EAP_AT_CLIENT_ERROR_CODE, *code),
            Self::KdfInput(name) => encode_length_prefixed(out, EAP_AT_KDF_INPUT, name),
            Self::Kdf(kdf) => encode_u16(out, EAP_AT_KDF, *kdf),
            Self::Iv(iv) => encode_reserved_value(out, EAP_AT_IV, iv),
            Self::EncrData(data) => encode_reserved_value(out, EAP_AT_ENCR_DATA, data),
            Self::NextPseudonym(id) => encode_length_prefixed(out, EAP_AT_NEXT_PSEUDONYM, id),
            Self::NextReauthId(id) => encode_length_prefixed(out, EAP_AT_NEXT_REAUTH_ID, id),
            Self::ResultInd => encode_reserved_value(out, EAP_AT_RESULT_IND, &[]),
            Self::Bidding {
                server_supports_aka_prime,
            } => {
                let value = if *server_supports_aka_prime { 0x8000 } else { 0 };
                encode_u16(out, EAP_AT_BIDDING, value);
            }
            Self::Skippable { attr_type, value } => {
                out.push(*attr_type);
                out.push(((2 + value.len()) / LENGTH_SCALING) as u8);
                out.extend_from_slice(value);
            }
        }
    }
}

/// Round `len` up to the next multiple of the length scaling factor
fn pad_to_scaling(len: usize) -> usize {
    len.div_ceil(LENGTH_SCALING) * LENGTH_SCALING
}

/// Encode header + 2 reserved bytes + value (value length must keep the
/// attribute 4-byte aligned)
fn encode_reserved_value(out: &mut Vec<u8>, attr_type: u8, value: &[u8]) {
    out.push(attr_type);
    out.push(((MIN_ATTR_LENGTH + value.len()) / LENGTH_SCALING) as u8);
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(value);
}

/// Encode header + big-endian u16 value
fn encode_u16(out: &mut Vec<u8>, attr_type: u8, value: u16) {
    out.push(attr_type);
    out.push(1);
    out.extend_from_slice(&value.to_be_bytes());
}

/// Encode header + 2-byte actual length + value + zero padding
fn encode_length_prefixed(out: &mut Vec<u8>, attr_type: u8, value: &[u8]) {
    let padded = pad_to_scaling(value.len());
    out.push(attr_type);
    out.push(((MIN_ATTR_LENGTH + padded) / LENGTH_SCALING) as u8);
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
    out.resize(out.len() + (padded - value.len()), 0);
}

/// Decoded EAP-SIM/AKA type data: subtype plus an ordered attribute list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimAkaTypeData {
    /// Message subtype
    pub subtype: SimAkaSubtype,
    /// Attributes in received order
    pub attributes: Vec<SimAkaAttribute>,
}

impl SimAkaTypeData {
    /// Create type data from a subtype and attribute list
    pub fn new(subtype: SimAkaSubtype, attributes: Vec<SimAkaAttribute>) -> Self {
        SimAkaTypeData {
            subtype,
            attributes,
        }
    }

    /// Parse type data from an EAP packet's type-data buffer
    pub fn decode(bytes: &[u8]) -> Result<Self, SimAkaError> {
        if bytes.len() < 3 {
            return Err(SimAkaError::TypeDataTooShort(bytes.len()));
        }

        let subtype =
            SimAkaSubtype::from_u8(bytes[0]).ok_or(SimAkaError::UnsupportedSubtype(bytes[0]))?;

        // bytes[1..3] are reserved and ignored on receipt
        let attributes = decode_attribute_list(&bytes[3..])?;

        // AT_KDF may legitimately repeat; everything else may not
        // (RFC 4187 Section 8.1)
        let mut seen = [false; 256];
        for attribute in &attributes {
            let attr_type = attribute.attr_type();
            if attr_type != EAP_AT_KDF && attr_type != EAP_AT_PADDING {
                if seen[attr_type as usize] {
                    return Err(SimAkaError::DuplicateAttribute(attr_type));
                }
                seen[attr_type as usize] = true;
            }
        }

        Ok(SimAkaTypeData {
            subtype,
            attributes,
        })
    }

    /// Encode to a type-data buffer
    pub fn encode(&self) -> Vec<u8> {
        self.encode_internal(false)
    }

    /// Encode with the AT_MAC value zeroed, for MAC computation and
    /// verification (RFC 4187 Section 10.15)
    pub fn encode_with_zeroed_mac(&self) -> Vec<u8> {
        self.encode_internal(true)
    }

    fn encode_internal(&self, zero_mac: bool) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.subtype.as_u8());
        out.extend_from_slice(&[0, 0]);
        for attribute in &self.attributes {
            match attribute {
                SimAkaAttribute::Mac(_) if zero_mac => {
                    SimAkaAttribute::Mac([0u8; MAC_LEN]).encode_into(&mut out)
                }
                other => other.encode_into(&mut out),
            }
        }
        out
    }

    /// Find an attribute by type byte
    pub fn find(&self, attr_type: u8) -> Option<&SimAkaAttribute> {
        self.attributes.iter().find(|a| a.attr_type() == attr_type)
    }

    /// Check whether an attribute of the given type is present
    pub fn contains(&self, attr_type: u8) -> bool {
        self.find(attr_type).is_some()
    }

    /// The AT_MAC value, if present
    pub fn mac(&self) -> Option<&[u8; 16]> {
        match self.find(EAP_AT_MAC) {
            Some(SimAkaAttribute::Mac(mac)) => Some(mac),
            _ => None,
        }
    }

    /// The AKA AT_RAND value, if present
    pub fn rand_aka(&self) -> Option<&[u8; 16]> {
        match self.find(EAP_AT_RAND) {
            Some(SimAkaAttribute::RandAka(rand)) => Some(rand),
            _ => None,
        }
    }

    /// The SIM AT_RAND values, if present
    pub fn rand_sim(&self) -> Option<&[[u8; 16]]> {
        match self.find(EAP_AT_RAND) {
            Some(SimAkaAttribute::RandSim(rands)) => Some(rands),
            _ => None,
        }
    }

    /// The AT_AUTN value, if present
    pub fn autn(&self) -> Option<&[u8; 16]> {
        match self.find(EAP_AT_AUTN) {
            Some(SimAkaAttribute::Autn(autn)) => Some(autn),
            _ => None,
        }
    }

    /// The AT_IV value, if present
    pub fn iv(&self) -> Option<&[u8; 16]> {
        match self.find(EAP_AT_IV) {
            Some(SimAkaAttribute::Iv(iv)) => Some(iv),
            _ => None,
        }
    }

    /// The AT_ENCR_DATA ciphertext, if present
    pub fn encr_data(&self) -> Option<&[u8]> {
        match self.find(EAP_AT_ENCR_DATA) {
            Some(SimAkaAttribute::EncrData(data)) => Some(data),
            _ => None,
        }
    }

    /// The AT_NOTIFICATION code, if present
    pub fn notification_code(&self) -> Option<u16> {
        match self.find(EAP_AT_NOTIFICATION) {
            Some(SimAkaAttribute::Notification(code)) => Some(*code),
            _ => None,
        }
    }

    /// The AT_COUNTER value, if present
    pub fn counter(&self) -> Option<u16> {
        match self.find(EAP_AT_COUNTER) {
            Some(SimAkaAttribute::Counter(counter)) => Some(*counter),
            _ => None,
        }
    }

    /// The AT_NONCE_S value, if present
    pub fn nonce_s(&self) -> Option<&[u8; 16]> {
        match self.find(EAP_AT_NONCE_S) {
            Some(SimAkaAttribute::NonceS(nonce)) => Some(nonce),
            _ => None,
        }
    }

    /// The AT_NONCE_MT value, if present
    pub fn nonce_mt(&self) -> Option<&[u8; 16]> {
        match self.find(EAP_AT_NONCE_MT) {
            Some(SimAkaAttribute::NonceMt(nonce)) => Some(nonce),
            _ => None,
        }
    }

    /// The AT_VERSION_LIST values, if present
    pub fn version_list(&self) -> Option<&[u16]> {
        match self.find(EAP_AT_VERSION_LIST) {
            Some(SimAkaAttribute::VersionList(versions)) => Some(versions),
            _ => None,
        }
    }

    /// All AT_KDF identifiers, in received order
    pub fn kdf_list(&self) -> Vec<u16> {
        self.attributes
            .iter()
            .filter_map(|a| match a {
                SimAkaAttribute::Kdf(kdf) => Some(*kdf),
                _ => None,
            })
            .collect()
    }

    /// The AT_KDF_INPUT network name, if present
    pub fn kdf_input(&self) -> Option<&[u8]> {
        match self.find(EAP_AT_KDF_INPUT) {
            Some(SimAkaAttribute::KdfInput(name)) => Some(name),
            _ => None,
        }
    }

    /// The AT_NEXT_REAUTH_ID value, if present
    pub fn next_reauth_id(&self) -> Option<&[u8]> {
        match self.find(EAP_AT_NEXT_REAUTH_ID) {
            Some(SimAkaAttribute::NextReauthId(id)) => Some(id),
            _ => None,
        }
    }

    /// The AT_BIDDING server-supports-AKA' flag, if present
    pub fn bidding_supports_aka_prime(&self) -> Option<bool> {
        match self.find(EAP_AT_BIDDING) {
            Some(SimAkaAttribute::Bidding {
                server_supports_aka_prime,
            }) => Some(*server_supports_aka_prime),
            _ => None,
        }
    }
}

/// Decode a bare attribute list (also the plaintext format inside
/// AT_ENCR_DATA, RFC 4187 Section 10.12)
pub fn decode_attribute_list(bytes: &[u8]) -> Result<Vec<SimAkaAttribute>, SimAkaError> {
    let mut attributes = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        if bytes.len() - offset < 2 {
            return Err(SimAkaError::TypeDataTooShort(bytes.len() - offset));
        }

        let attr_type = bytes[offset];
        let len_bytes = bytes[offset + 1] as usize * LENGTH_SCALING;
        if len_bytes < MIN_ATTR_LENGTH || offset + len_bytes > bytes.len() {
            return Err(SimAkaError::InvalidAttributeLength {
                attr_type,
                length: len_bytes,
            });
        }

        let value = &bytes[offset + 2..offset + len_bytes];
        attributes.push(decode_attribute(attr_type, value, len_bytes)?);
        offset += len_bytes;
    }

    Ok(attributes)
}

/// Encode a bare attribute list (the plaintext format for AT_ENCR_DATA)
pub fn encode_attribute_list(attributes: &[SimAkaAttribute]) -> Vec<u8> {
    let mut out = Vec::new();
    for attribute in attributes {
        attribute.encode_into(&mut out);
    }
    out
}

fn decode_attribute(
    attr_type: u8,
    value: &[u8],
    len_bytes: usize,
) -> Result<SimAkaAttribute, SimAkaError> {
    let invalid_length = SimAkaError::InvalidAttributeLength {
        attr_type,
        length: len_bytes,
    };

    let attribute = match attr_type {
        EAP_AT_RAND => {
            // 2 reserved bytes, then 1 (AKA) or 2-3 (SIM) 16-byte RANDs
            if value.len() < 2 + RAND_LEN {
                return Err(invalid_length);
            }
            let rands = &value[2..];
            if rands.len() % RAND_LEN != 0 {
                return Err(invalid_length);
            }
            match rands.len() / RAND_LEN {
                1 => SimAkaAttribute::RandAka(to_array16(&rands[..RAND_LEN])),
                2 | 3 => SimAkaAttribute::RandSim(
                    rands.chunks_exact(RAND_LEN).map(to_array16).collect(),
                ),
                _ => return Err(invalid_length),
            }
        }
        EAP_AT_AUTN => SimAkaAttribute::Autn(reserved_array16(value).ok_or(invalid_length)?),
        EAP_AT_RES => {
            if value.len() < 2 {
                return Err(invalid_length);
            }
            let bits = u16::from_be_bytes([value[0], value[1]]);
            let res_len = (bits as usize).div_ceil(8);
            if res_len == 0 || res_len > value.len() - 2 {
                return Err(SimAkaError::InvalidValue {
                    attr_type,
                    reason: "RES bit length out of range",
                });
            }
            SimAkaAttribute::Res {
                bits,
                res: value[2..2 + res_len].to_vec(),
            }
        }
        EAP_AT_AUTS => {
            if value.len() != AUTS_LEN {
                return Err(invalid_length);
            }
            let mut auts = [0u8; AUTS_LEN];
            auts.copy_from_slice(value);
            SimAkaAttribute::Auts(auts)
        }
        EAP_AT_PADDING => {
            if len_bytes > 12 || value.iter().any(|b| *b != 0) {
                return Err(SimAkaError::InvalidValue {
                    attr_type,
                    reason: "padding must be at most 12 zero bytes",
                });
            }
            SimAkaAttribute::Padding(len_bytes)
        }
        EAP_AT_NONCE_MT => SimAkaAttribute::NonceMt(reserved_array16(value).ok_or(invalid_length)?),
        EAP_AT_PERMANENT_ID_REQ => SimAkaAttribute::PermanentIdReq,
        EAP_AT_MAC => SimAkaAttribute::Mac(reserved_array16(value).ok_or(invalid_length)?),
        EAP_AT_NOTIFICATION => SimAkaAttribute::Notification(value_u16(value).ok_or(invalid_length)?),
        EAP_AT_ANY_ID_REQ => SimAkaAttribute::AnyIdReq,
        EAP_AT_IDENTITY => SimAkaAttribute::Identity(length_prefixed(value).ok_or(invalid_length)?),
        EAP_AT_VERSION_LIST => {
            let list = length_prefixed(value).ok_or(invalid_length)?;
            if list.is_empty() || list.len() % 2 != 0 {
                return Err(SimAkaError::InvalidValue {
                    attr_type,
                    reason: "version list length must be a nonzero multiple of 2",
                });
            }
            SimAkaAttribute::VersionList(
                list.chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect(),
            )
        }
        EAP_AT_SELECTED_VERSION => {
            SimAkaAttribute::SelectedVersion(value_u16(value).ok_or(invalid_length)?)
        }
        EAP_AT_FULLAUTH_ID_REQ => SimAkaAttribute::FullauthIdReq,
        EAP_AT_COUNTER => SimAkaAttribute::Counter(value_u16(value).ok_or(invalid_length)?),
        EAP_AT_COUNTER_TOO_SMALL => SimAkaAttribute::CounterTooSmall,
        EAP_AT_NONCE_S => SimAkaAttribute::NonceS(reserved_array16(value).ok_or(invalid_length)?),
        EAP_AT_CLIENT_ERROR_CODE => {
            SimAkaAttribute::ClientErrorCode(value_u16(value).ok_or(invalid_length)?)
        }
        EAP_AT_KDF_INPUT => SimAkaAttribute::KdfInput(length_prefixed(value).ok_or(invalid_length)?),
        EAP_AT_KDF => SimAkaAttribute::Kdf(value_u16(value).ok_or(invalid_length)?),
        EAP_AT_IV => SimAkaAttribute::Iv(reserved_array16(value).ok_or(invalid_length)?),
        EAP_AT_ENCR_DATA => {
            if value.len() < 2 || (value.len() - 2) % 16 != 0 || value.len() == 2 {
                return Err(SimAkaError::InvalidValue {
                    attr_type,
                    reason: "ciphertext must be a nonzero multiple of 16 bytes",
                });
            }
            SimAkaAttribute::EncrData(value[2..].to_vec())
        }
        EAP_AT_NEXT_PSEUDONYM => {
            SimAkaAttribute::NextPseudonym(length_prefixed(value).ok_or(invalid_length)?)
        }
        EAP_AT_NEXT_REAUTH_ID => {
            SimAkaAttribute::NextReauthId(length_prefixed(value).ok_or(invalid_length)?)
        }
        EAP_AT_RESULT_IND => SimAkaAttribute::ResultInd,
        EAP_AT_BIDDING => {
            let bits = value_u16(value).ok_or(invalid_length)?;
            SimAkaAttribute::Bidding {
                server_supports_aka_prime: bits & 0x8000 != 0,
            }
        }
        // Skippable range: keep raw for byte-exact re-encoding
        128..=255 => SimAkaAttribute::Skippable {
            attr_type,
            value: value.to_vec(),
        },
        _ => return Err(SimAkaError::UnrecognizedNonSkippableAttribute(attr_type)),
    };

    Ok(attribute)
}

fn to_array16(bytes: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(bytes);
    out
}

/// 2 reserved bytes followed by a 16-byte value
fn reserved_array16(value: &[u8]) -> Option<[u8; 16]> {
    if value.len() != 18 {
        return None;
    }
    Some(to_array16(&value[2..]))
}

/// A bare big-endian u16 value
fn value_u16(value: &[u8]) -> Option<u16> {
    if value.len() != 2 {
        return None;
    }
    Some(u16::from_be_bytes([value[0], value[1]]))
}

/// 2-byte actual length followed by the value and zero padding
fn length_prefixed(value: &[u8]) -> Option<Vec<u8>> {
    if value.len() < 2 {
        return None;
    }
    let actual = u16::from_be_bytes([value[0], value[1]]) as usize;
    if actual > value.len() - 2 {
        return None;
    }
    Some(value[2..2 + actual].to_vec())
}

/// EAP-SIM/AKA attribute decode/encode errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimAkaError {
    #[error("Type data too short: {0} bytes")]
    TypeDataTooShort(usize),

    #[error("Unsupported subtype: {0}")]
    UnsupportedSubtype(u8),

    #[error("Invalid length {length} for attribute type {attr_type}")]
    InvalidAttributeLength { attr_type: u8, length: usize },

    #[error("Invalid value for attribute type {attr_type}: {reason}")]
    InvalidValue { attr_type: u8, reason: &'static str },

    #[error("Unrecognized non-skippable attribute: {0}")]
    UnrecognizedNonSkippableAttribute(u8),

    #[error("Duplicate attribute: {0}")]
    DuplicateAttribute(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtype_conversion() {
        assert_eq!(SimAkaSubtype::from_u8(1), Some(SimAkaSubtype::AkaChallenge));
        assert_eq!(SimAkaSubtype::from_u8(10), Some(SimAkaSubtype::SimStart));
        assert_eq!(SimAkaSubtype::from_u8(12), Some(SimAkaSubtype::Notification));
        assert_eq!(SimAkaSubtype::from_u8(99), None);
    }

    #[test]
    fn test_decode_aka_challenge() {
        let mut bytes = vec![1, 0, 0]; // AKA-Challenge, reserved
        // AT_RAND
        bytes.extend_from_slice(&[EAP_AT_RAND, 5, 0, 0]);
        bytes.extend_from_slice(&[0x11; 16]);
        // AT_AUTN
        bytes.extend_from_slice(&[EAP_AT_AUTN, 5, 0, 0]);
        bytes.extend_from_slice(&[0x22; 16]);
        // AT_MAC
        bytes.extend_from_slice(&[EAP_AT_MAC, 5, 0, 0]);
        bytes.extend_from_slice(&[0x33; 16]);

        let type_data = SimAkaTypeData::decode(&bytes).unwrap();
        assert_eq!(type_data.subtype, SimAkaSubtype::AkaChallenge);
        assert_eq!(type_data.rand_aka(), Some(&[0x11; 16]));
        assert_eq!(type_data.autn(), Some(&[0x22; 16]));
        assert_eq!(type_data.mac(), Some(&[0x33; 16]));

        // Re-encode is byte-exact
        assert_eq!(type_data.encode(), bytes);
    }

    #[test]
    fn test_encode_with_zeroed_mac() {
        let type_data = SimAkaTypeData::new(
            SimAkaSubtype::AkaChallenge,
            vec![
                SimAkaAttribute::RandAka([0x11; 16]),
                SimAkaAttribute::Mac([0x33; 16]),
            ],
        );

        let zeroed = type_data.encode_with_zeroed_mac();
        let encoded = type_data.encode();
        assert_eq!(zeroed.len(), encoded.len());

        // MAC value (last 16 bytes) is zeroed; everything else matches
        assert_eq!(&zeroed[..zeroed.len() - 16], &encoded[..encoded.len() - 16]);
        assert_eq!(&zeroed[zeroed.len() - 16..], &[0u8; 16]);
    }

    #[test]
    fn test_sim_rand_multiple() {
        let attrs = vec![SimAkaAttribute::RandSim(vec![[0xA0; 16], [0xA1; 16], [0xA2; 16]])];
        let bytes = encode_attribute_list(&attrs);
        assert_eq!(bytes[1] as usize * 4, 4 + 48);

        let decoded = decode_attribute_list(&bytes).unwrap();
        assert_eq!(decoded, attrs);
    }

    #[test]
    fn test_res_bit_length_roundtrip() {
        let attrs = vec![SimAkaAttribute::Res {
            bits: 64,
            res: vec![0xAB; 8],
        }];
        let bytes = encode_attribute_list(&attrs);
        // header(2) + bits(2) + 8 bytes = 12, already aligned
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_attribute_list(&bytes).unwrap(), attrs);
    }

    #[test]
    fn test_identity_padding_roundtrip() {
        // 5-byte identity pads to 8
        let attrs = vec![SimAkaAttribute::Identity(b"12345".to_vec())];
        let bytes = encode_attribute_list(&attrs);
        assert_eq!(bytes.len(), 4 + 8);
        assert_eq!(decode_attribute_list(&bytes).unwrap(), attrs);
    }

    #[test]
    fn test_auts_roundtrip() {
        let attrs = vec![SimAkaAttribute::Auts([0x5A; 14])];
        let bytes = encode_attribute_list(&attrs);
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[1], 4);
        assert_eq!(decode_attribute_list(&bytes).unwrap(), attrs);
    }

    #[test]
    fn test_kdf_may_repeat() {
        let mut bytes = vec![1, 0, 0];
        bytes.extend_from_slice(&[EAP_AT_KDF, 1, 0, 2]);
        bytes.extend_from_slice(&[EAP_AT_KDF, 1, 0, 1]);

        let type_data = SimAkaTypeData::decode(&bytes).unwrap();
        assert_eq!(type_data.kdf_list(), vec![2, 1]);
    }

    #[test]
    fn test_duplicate_attribute_rejected() {
        let mut bytes = vec![1, 0, 0];
        bytes.extend_from_slice(&[EAP_AT_AUTN, 5, 0, 0]);
        bytes.extend_from_slice(&[0x22; 16]);
        bytes.extend_from_slice(&[EAP_AT_AUTN, 5, 0, 0]);
        bytes.extend_from_slice(&[0x22; 16]);

        assert_eq!(
            SimAkaTypeData::decode(&bytes),
            Err(SimAkaError::DuplicateAttribute(EAP_AT_AUTN))
        );
    }

    #[test]
    fn test_unrecognized_non_skippable_rejected() {
        // Type 99 < 128 is non-skippable
        let bytes = vec![1, 0, 0, 99, 1, 0, 0];
        assert_eq!(
            SimAkaTypeData::decode(&bytes),
            Err(SimAkaError::UnrecognizedNonSkippableAttribute(99))
        );
    }

    #[test]
    fn test_unrecognized_skippable_retained() {
        // Type 200 >= 128 is skippable and must survive a re-encode
        let bytes = vec![1, 0, 0, 200, 1, 0xDE, 0xAD];
        let type_data = SimAkaTypeData::decode(&bytes).unwrap();
        assert_eq!(
            type_data.attributes,
            vec![SimAkaAttribute::Skippable {
                attr_type: 200,
                value: vec![0xDE, 0xAD],
            }]
        );
        assert_eq!(type_data.encode(), bytes);
    }

    #[test]
    fn test_encr_data_must_be_block_aligned() {
        let mut bytes = vec![13, 0, 0];
        bytes.extend_from_slice(&[EAP_AT_ENCR_DATA, 3, 0, 0]);
        bytes.extend_from_slice(&[0xCC; 8]);
        assert!(SimAkaTypeData::decode(&bytes).is_err());
    }

    #[test]
    fn test_notification_bits() {
        assert_eq!(NOTIFICATION_GENERAL_FAILURE_PRE_CHALLENGE & NOTIFICATION_P_BIT, NOTIFICATION_P_BIT);
        assert_eq!(NOTIFICATION_GENERAL_FAILURE_POST_CHALLENGE & NOTIFICATION_P_BIT, 0);
        assert_eq!(NOTIFICATION_SUCCESS & NOTIFICATION_S_BIT, NOTIFICATION_S_BIT);
    }

    #[test]
    fn test_bidding_flag() {
        let bytes = vec![1, 0, 0, EAP_AT_BIDDING, 1, 0x80, 0x00];
        let type_data = SimAkaTypeData::decode(&bytes).unwrap();
        assert_eq!(type_data.bidding_supports_aka_prime(), Some(true));
    }

    #[test]
    fn test_attribute_length_exceeding_buffer_rejected() {
        // Length field claims 8 bytes, only 4 available
        let bytes = vec![1, 0, 0, EAP_AT_COUNTER, 2, 0, 1];
        assert!(SimAkaTypeData::decode(&bytes).is_err());
    }

    #[test]
    fn test_version_list_roundtrip() {
        let attrs = vec![
            SimAkaAttribute::VersionList(vec![1]),
            SimAkaAttribute::SelectedVersion(1),
        ];
        let bytes = encode_attribute_list(&attrs);
        let decoded = decode_attribute_list(&bytes).unwrap();
        assert_eq!(decoded, attrs);
    }

    #[test]
    fn test_client_error_code_roundtrip() {
        let attrs = vec![SimAkaAttribute::ClientErrorCode(CLIENT_ERROR_UNABLE_TO_PROCESS)];
        let bytes = encode_attribute_list(&attrs);
        assert_eq!(bytes, vec![EAP_AT_CLIENT_ERROR_CODE, 1, 0, 0]);
    }
}
