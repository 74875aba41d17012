//! EAP (Extensible Authentication Protocol) Packet Support
//!
//! This module implements the EAP packet format as defined in RFC 3748.
//!
//! # EAP Packet Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Code      |  Identifier   |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |  Type-Data ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use thiserror::Error;

/// EAP packet code (first byte of EAP packet)
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EapCode {
    /// Request packet (Code 1)
    Request = 1,
    /// Response packet (Code 2)
    Response = 2,
    /// Success packet (Code 3)
    Success = 3,
    /// Failure packet (Code 4)
    Failure = 4,
}

impl EapCode {
    /// Convert from u8 to EapCode
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(EapCode::Request),
            2 => Some(EapCode::Response),
            3 => Some(EapCode::Success),
            4 => Some(EapCode::Failure),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// EAP method types (RFC 3748 and IANA registry)
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EapMethodType {
    /// Identity (Type 1) - RFC 3748
    Identity = 1,
    /// Notification (Type 2) - RFC 3748
    Notification = 2,
    /// Legacy Nak (Type 3) - RFC 3748
    /// Response only, sent in response to an unacceptable authentication type
    Nak = 3,
    /// EAP-SIM (Type 18) - RFC 4186
    Sim = 18,
    /// EAP-TTLS (Type 21) - RFC 5281
    Ttls = 21,
    /// EAP-AKA (Type 23) - RFC 4187
    Aka = 23,
    /// EAP-MSCHAPv2 (Type 26) - draft-kamath-pppext-eap-mschapv2
    MsChapV2 = 26,
    /// EAP-AKA' (Type 50) - RFC 5448
    AkaPrime = 50,
}

impl EapMethodType {
    /// Convert from u8 to EapMethodType
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(EapMethodType::Identity),
            2 => Some(EapMethodType::Notification),
            3 => Some(EapMethodType::Nak),
            18 => Some(EapMethodType::Sim),
            21 => Some(EapMethodType::Ttls),
            23 => Some(EapMethodType::Aka),
            26 => Some(EapMethodType::MsChapV2),
            50 => Some(EapMethodType::AkaPrime),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check whether this type identifies an authentication method
    /// (as opposed to Identity/Notification/Nak, RFC 3748 Section 5)
    pub fn is_authentication_method(self) -> bool {
        self.as_u8() >= 4
    }
}

/// EAP packet structure
///
/// A decoded EAP message. `method_type` is `None` for Success/Failure packets.
/// For Request/Response packets carrying a type outside the supported set,
/// `method_type` is `None` and the raw type byte is kept in `raw_type` so the
/// caller can answer with a legacy Nak rather than failing outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapPacket {
    /// EAP code (Request, Response, Success, Failure)
    pub code: EapCode,
    /// Identifier for matching requests and responses (0-255)
    pub identifier: u8,
    /// EAP method type (only present for Request/Response of a known type)
    pub method_type: Option<EapMethodType>,
    /// Raw type byte as received (only present for Request/Response)
    pub raw_type: Option<u8>,
    /// Type-specific data
    pub type_data: Vec<u8>,
}

impl EapPacket {
    /// EAP header length: code + identifier + length
    pub const HEADER_LEN: usize = 4;

    /// Create a new EAP packet
    pub fn new(
        code: EapCode,
        identifier: u8,
        method_type: Option<EapMethodType>,
        type_data: Vec<u8>,
    ) -> Self {
        EapPacket {
            code,
            identifier,
            method_type,
            raw_type: method_type.map(EapMethodType::as_u8),
            type_data,
        }
    }

    /// Create an EAP Identity Response
    pub fn identity_response(identifier: u8, identity: &[u8]) -> Self {
        EapPacket::new(
            EapCode::Response,
            identifier,
            Some(EapMethodType::Identity),
            identity.to_vec(),
        )
    }

    /// Create an EAP Notification Response (empty type data, RFC 3748 Section 5.2)
    pub fn notification_response(identifier: u8) -> Self {
        EapPacket::new(
            EapCode::Response,
            identifier,
            Some(EapMethodType::Notification),
            Vec::new(),
        )
    }

    /// Create a Legacy Nak Response listing the locally supported method types
    /// (RFC 3748 Section 5.3.1)
    pub fn nak_response(identifier: u8, supported: &[EapMethodType]) -> Self {
        let type_data = supported
            .iter()
            .filter(|t| t.is_authentication_method())
            .map(|t| t.as_u8())
            .collect();

        EapPacket::new(
            EapCode::Response,
            identifier,
            Some(EapMethodType::Nak),
            type_data,
        )
    }

    /// Create a method-type Response with the given type data
    pub fn method_response(identifier: u8, method_type: EapMethodType, type_data: Vec<u8>) -> Self {
        EapPacket::new(EapCode::Response, identifier, Some(method_type), type_data)
    }

    /// Parse EAP packet from bytes
    ///
    /// # Packet Format
    /// - Code (1 byte)
    /// - Identifier (1 byte)
    /// - Length (2 bytes, network byte order)
    /// - Type (1 byte, only for Request/Response)
    /// - Type-Data (variable length)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < Self::HEADER_LEN {
            return Err(PacketError::PacketTooShort {
                expected: Self::HEADER_LEN,
                actual: bytes.len(),
            });
        }

        // Parse header
        let code = EapCode::from_u8(bytes[0]).ok_or(PacketError::InvalidCode(bytes[0]))?;
        let identifier = bytes[1];
        let length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;

        // Validate length
        if length < Self::HEADER_LEN {
            return Err(PacketError::InvalidLength(length));
        }
        if bytes.len() < length {
            return Err(PacketError::PacketTooShort {
                expected: length,
                actual: bytes.len(),
            });
        }

        // Parse type and data based on code
        let (method_type, raw_type, type_data) = match code {
            EapCode::Request | EapCode::Response => {
                if length < 5 {
                    return Err(PacketError::InvalidLength(length));
                }
                let type_byte = bytes[4];
                let method_type = EapMethodType::from_u8(type_byte);
                let type_data = bytes[5..length].to_vec();
                (method_type, Some(type_byte), type_data)
            }
            EapCode::Success | EapCode::Failure => {
                // Success and Failure packets have no Type field
                (None, None, Vec::new())
            }
        };

        Ok(EapPacket {
            code,
            identifier,
            method_type,
            raw_type,
            type_data,
        })
    }

    /// Encode EAP packet to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.length());

        // Add code and identifier
        bytes.push(self.code.as_u8());
        bytes.push(self.identifier);

        // Add length (network byte order)
        bytes.extend_from_slice(&(self.length() as u16).to_be_bytes());

        // Add type and data for Request/Response
        if let Some(type_byte) = self.type_byte() {
            bytes.push(type_byte);
            bytes.extend_from_slice(&self.type_data);
        }

        bytes
    }

    /// Get the total length of the packet
    pub fn length(&self) -> usize {
        match self.code {
            EapCode::Request | EapCode::Response => Self::HEADER_LEN + 1 + self.type_data.len(),
            EapCode::Success | EapCode::Failure => Self::HEADER_LEN,
        }
    }

    /// The raw type byte to encode, if any
    fn type_byte(&self) -> Option<u8> {
        match self.code {
            EapCode::Request | EapCode::Response => self
                .method_type
                .map(EapMethodType::as_u8)
                .or(self.raw_type),
            EapCode::Success | EapCode::Failure => None,
        }
    }
}

/// EAP packet decode/encode errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("Invalid EAP code: {0}")]
    InvalidCode(u8),

    #[error("Invalid packet length: {0}")]
    InvalidLength(usize),

    #[error("Unknown EAP method type: {0}")]
    UnknownMethodType(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eap_code_conversion() {
        assert_eq!(EapCode::from_u8(1), Some(EapCode::Request));
        assert_eq!(EapCode::from_u8(2), Some(EapCode::Response));
        assert_eq!(EapCode::from_u8(3), Some(EapCode::Success));
        assert_eq!(EapCode::from_u8(4), Some(EapCode::Failure));
        assert_eq!(EapCode::from_u8(5), None);

        assert_eq!(EapCode::Request.as_u8(), 1);
        assert_eq!(EapCode::Failure.as_u8(), 4);
    }

    #[test]
    fn test_method_type_conversion() {
        assert_eq!(EapMethodType::from_u8(1), Some(EapMethodType::Identity));
        assert_eq!(EapMethodType::from_u8(18), Some(EapMethodType::Sim));
        assert_eq!(EapMethodType::from_u8(21), Some(EapMethodType::Ttls));
        assert_eq!(EapMethodType::from_u8(23), Some(EapMethodType::Aka));
        assert_eq!(EapMethodType::from_u8(26), Some(EapMethodType::MsChapV2));
        assert_eq!(EapMethodType::from_u8(50), Some(EapMethodType::AkaPrime));
        assert_eq!(EapMethodType::from_u8(255), None);
    }

    #[test]
    fn test_is_authentication_method() {
        assert!(!EapMethodType::Identity.is_authentication_method());
        assert!(!EapMethodType::Notification.is_authentication_method());
        assert!(!EapMethodType::Nak.is_authentication_method());
        assert!(EapMethodType::Aka.is_authentication_method());
        assert!(EapMethodType::Ttls.is_authentication_method());
    }

    #[test]
    fn test_identity_response_encode_decode() {
        let packet = EapPacket::identity_response(42, b"0123456789abcdef0@nai.epc.example");
        let bytes = packet.to_bytes();

        assert_eq!(bytes[0], 2); // Response code
        assert_eq!(bytes[1], 42); // Identifier
        assert_eq!(bytes[4], 1); // Identity type

        let decoded = EapPacket::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.code, EapCode::Response);
        assert_eq!(decoded.identifier, 42);
        assert_eq!(decoded.method_type, Some(EapMethodType::Identity));
        assert_eq!(decoded.type_data, b"0123456789abcdef0@nai.epc.example");
    }

    #[test]
    fn test_success_failure_have_no_type() {
        let success = EapPacket::new(EapCode::Success, 7, None, Vec::new());
        let bytes = success.to_bytes();
        assert_eq!(bytes, vec![3, 7, 0, 4]);

        let decoded = EapPacket::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.code, EapCode::Success);
        assert_eq!(decoded.method_type, None);
        assert!(decoded.type_data.is_empty());

        let failure = EapPacket::new(EapCode::Failure, 7, None, Vec::new());
        assert_eq!(failure.to_bytes(), vec![4, 7, 0, 4]);
    }

    #[test]
    fn test_nak_response_lists_supported_methods() {
        let packet = EapPacket::nak_response(
            3,
            &[
                EapMethodType::Aka,
                EapMethodType::MsChapV2,
                // Non-method types must be filtered out
                EapMethodType::Identity,
            ],
        );

        assert_eq!(packet.method_type, Some(EapMethodType::Nak));
        assert_eq!(packet.type_data, vec![23, 26]);
    }

    #[test]
    fn test_unknown_method_type_preserved_as_raw() {
        // EAP-PEAP (25) is not supported; the raw type survives a decode
        let bytes = vec![1, 9, 0, 6, 25, 0xAB];
        let decoded = EapPacket::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.method_type, None);
        assert_eq!(decoded.raw_type, Some(25));
        assert_eq!(decoded.type_data, vec![0xAB]);
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn test_decode_too_short() {
        assert!(matches!(
            EapPacket::from_bytes(&[1, 2, 0]),
            Err(PacketError::PacketTooShort { .. })
        ));
    }

    #[test]
    fn test_decode_invalid_code() {
        assert!(matches!(
            EapPacket::from_bytes(&[9, 2, 0, 4]),
            Err(PacketError::InvalidCode(9))
        ));
    }

    #[test]
    fn test_decode_invalid_length_field() {
        // Length field says 3, below the minimum header size
        assert!(matches!(
            EapPacket::from_bytes(&[1, 2, 0, 3]),
            Err(PacketError::InvalidLength(3))
        ));

        // Length field exceeds the buffer
        assert!(matches!(
            EapPacket::from_bytes(&[1, 2, 0, 10, 1]),
            Err(PacketError::PacketTooShort { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        // RFC 3748 Section 4.1: bytes beyond the Length field are padding
        let bytes = vec![2, 1, 0, 6, 1, 0x61, 0xFF, 0xFF];
        let decoded = EapPacket::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.type_data, vec![0x61]);
    }
}
