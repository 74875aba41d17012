//! EAP-TTLS Type Data and AVP Support
//!
//! This module implements the EAP-TTLS packet format defined in RFC 5281
//! Section 9.2, the fragmentation/reassembly helpers for oversized TLS
//! messages, and the AVP framing used for tunneled data (RFC 5281
//! Section 10.1).
//!
//! # EAP-TTLS Packet Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |L M S R R  Ver |        Message Length (if L set)
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!          ...                  |             Data ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use thiserror::Error;

/// EAP-TTLS flags byte masks (RFC 5281 Section 9.2.2)
const FLAG_LENGTH_INCLUDED: u8 = 0x80;
const FLAG_MORE_FRAGMENTS: u8 = 0x40;
const FLAG_START: u8 = 0x20;
const VERSION_MASK: u8 = 0x07;

/// The only EAP-TTLS protocol version (RFC 5281 Section 9.2.1)
pub const EAP_TTLS_VERSION_0: u8 = 0;

/// EAP-TTLS type data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapTtlsTypeData {
    /// L flag: 4-byte total message length follows the flags byte
    pub length_included: bool,
    /// M flag: more fragments follow this one
    pub more_fragments: bool,
    /// S flag: start of an EAP-TTLS negotiation
    pub start: bool,
    /// Protocol version (low 3 bits of the flags byte)
    pub version: u8,
    /// Total message length, present when the L flag is set
    pub message_length: Option<u32>,
    /// Raw TLS record data
    pub data: Vec<u8>,
}

impl EapTtlsTypeData {
    /// Create type data for an outbound payload
    pub fn new(more_fragments: bool, message_length: Option<u32>, data: Vec<u8>) -> Self {
        EapTtlsTypeData {
            length_included: message_length.is_some(),
            more_fragments,
            start: false,
            version: EAP_TTLS_VERSION_0,
            message_length,
            data,
        }
    }

    /// Create an acknowledgement packet: no flags, no data
    /// (RFC 5281 Section 9.2.3)
    pub fn acknowledgement() -> Self {
        EapTtlsTypeData {
            length_included: false,
            more_fragments: false,
            start: false,
            version: EAP_TTLS_VERSION_0,
            message_length: None,
            data: Vec::new(),
        }
    }

    /// Check whether this packet is a fragment acknowledgement
    pub fn is_acknowledgement(&self) -> bool {
        !self.length_included && !self.more_fragments && !self.start && self.data.is_empty()
    }

    /// Parse EAP-TTLS type data from an EAP packet's type-data buffer
    pub fn decode(bytes: &[u8]) -> Result<Self, TtlsError> {
        if bytes.is_empty() {
            return Err(TtlsError::TypeDataTooShort(0));
        }

        let flags = bytes[0];
        let length_included = flags & FLAG_LENGTH_INCLUDED != 0;
        let more_fragments = flags & FLAG_MORE_FRAGMENTS != 0;
        let start = flags & FLAG_START != 0;
        let version = flags & VERSION_MASK;

        let mut offset = 1;
        let message_length = if length_included {
            if bytes.len() < 5 {
                return Err(TtlsError::TypeDataTooShort(bytes.len()));
            }
            offset = 5;
            Some(u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]))
        } else {
            None
        };

        Ok(EapTtlsTypeData {
            length_included,
            more_fragments,
            start,
            version,
            message_length,
            data: bytes[offset..].to_vec(),
        })
    }

    /// Encode to a type-data buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(5 + self.data.len());

        let mut flags = self.version & VERSION_MASK;
        if self.length_included {
            flags |= FLAG_LENGTH_INCLUDED;
        }
        if self.more_fragments {
            flags |= FLAG_MORE_FRAGMENTS;
        }
        if self.start {
            flags |= FLAG_START;
        }
        bytes.push(flags);

        if let Some(length) = self.message_length {
            bytes.extend_from_slice(&length.to_be_bytes());
        }

        bytes.extend_from_slice(&self.data);
        bytes
    }
}

/// Outcome of feeding one inbound packet to the reassembly buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentStatus {
    /// Packet was a fragment; acknowledge it and wait for more
    Ack,
    /// A complete message is assembled and ready to process
    Assembled,
    /// The fragment stream is inconsistent; abort
    Invalid,
}

/// Reassembles inbound fragmented EAP-TTLS messages
///
/// Accumulates fragments until one complete framed message is available,
/// then is cleared by the next message.
#[derive(Debug, Default)]
pub struct InboundFragmentationHelper {
    in_progress: bool,
    expected_length: usize,
    buffer: Vec<u8>,
}

impl InboundFragmentationHelper {
    /// Create a new helper
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one inbound packet; returns the fragmentation status
    pub fn assemble_inbound_message(&mut self, packet: &EapTtlsTypeData) -> FragmentStatus {
        if !self.in_progress {
            if packet.more_fragments {
                // First fragment of a new message must carry the total length
                let Some(expected) = packet.message_length else {
                    return FragmentStatus::Invalid;
                };
                self.in_progress = true;
                self.expected_length = expected as usize;
                self.buffer = packet.data.clone();

                if self.buffer.len() >= self.expected_length {
                    self.reset();
                    return FragmentStatus::Invalid;
                }
                return FragmentStatus::Ack;
            }

            // Unfragmented message; the L flag is optional here but must be
            // consistent when present (RFC 5281 Section 9.2.2)
            if let Some(expected) = packet.message_length {
                if expected as usize != packet.data.len() {
                    return FragmentStatus::Invalid;
                }
            }
            self.buffer = packet.data.clone();
            return FragmentStatus::Assembled;
        }

        // Continuation of an in-progress message
        if self.buffer.len() + packet.data.len() > self.expected_length {
            self.reset();
            return FragmentStatus::Invalid;
        }
        self.buffer.extend_from_slice(&packet.data);

        if packet.more_fragments {
            return FragmentStatus::Ack;
        }

        self.in_progress = false;
        if self.buffer.len() != self.expected_length {
            self.reset();
            return FragmentStatus::Invalid;
        }
        FragmentStatus::Assembled
    }

    /// The assembled message; valid after `Assembled` was returned
    pub fn assembled_inbound_fragment(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop any partial state
    pub fn reset(&mut self) {
        self.in_progress = false;
        self.expected_length = 0;
        self.buffer.clear();
    }
}

/// One outbound fragment plus whether more are queued behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentationResult {
    /// The fragment payload
    pub fragmented_data: Vec<u8>,
    /// True when further fragments remain after this one
    pub has_remaining_fragments: bool,
}

/// Slices outbound payloads into fragments of a bounded size
///
/// Each fragment after the first is released only once the helper is asked
/// again, which the engine does on receiving the peer's acknowledgement.
#[derive(Debug)]
pub struct OutboundFragmentationHelper {
    fragment_size: usize,
    data: Vec<u8>,
    offset: usize,
}

impl OutboundFragmentationHelper {
    /// Default fragment size, sized for a typical Ethernet MTU
    pub const DEFAULT_FRAGMENT_SIZE: usize = 1024;

    /// Create a helper with the given maximum fragment size
    pub fn new(fragment_size: usize) -> Self {
        OutboundFragmentationHelper {
            fragment_size: fragment_size.max(1),
            data: Vec::new(),
            offset: 0,
        }
    }

    /// Stage a new outbound payload, replacing any previous one
    pub fn setup_outbound_fragmentation(&mut self, data: Vec<u8>) {
        self.data = data;
        self.offset = 0;
    }

    /// Whether staged fragments remain to be sent
    pub fn has_remaining_fragments(&self) -> bool {
        self.offset < self.data.len()
    }

    /// Produce the next fragment, or None when nothing is staged
    pub fn get_next_outbound_fragment(&mut self) -> Option<FragmentationResult> {
        if !self.has_remaining_fragments() {
            return None;
        }

        let end = (self.offset + self.fragment_size).min(self.data.len());
        let fragment = self.data[self.offset..end].to_vec();
        self.offset = end;

        Some(FragmentationResult {
            fragmented_data: fragment,
            has_remaining_fragments: self.has_remaining_fragments(),
        })
    }
}

impl Default for OutboundFragmentationHelper {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FRAGMENT_SIZE)
    }
}

/// AVP code for EAP-Message (RFC 5281 Section 11.2.2)
pub const AVP_CODE_EAP_MESSAGE: u32 = 79;

/// AVP flag masks (RFC 5281 Section 10.1)
const AVP_FLAG_VENDOR_ID: u8 = 0x80;
const AVP_FLAG_MANDATORY: u8 = 0x40;

/// An EAP-TTLS AVP (Attribute-Value Pair)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           AVP Code                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V M r r r r r r|                 AVP Length                    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      Vendor-ID (if V set)                     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Data ...                 (padded to a 4-byte boundary)
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapTtlsAvp {
    /// AVP code
    pub avp_code: u32,
    /// M flag: the AVP must be understood by the receiver
    pub mandatory: bool,
    /// Vendor-ID, present when the V flag is set
    pub vendor_id: Option<u32>,
    /// AVP data, unpadded
    pub data: Vec<u8>,
}

impl EapTtlsAvp {
    const HEADER_LEN: usize = 8;

    /// Create a mandatory EAP-Message AVP wrapping an encoded EAP packet
    pub fn eap_message_avp(data: Vec<u8>) -> Self {
        EapTtlsAvp {
            avp_code: AVP_CODE_EAP_MESSAGE,
            mandatory: true,
            vendor_id: None,
            data,
        }
    }

    /// The encoded AVP length, excluding padding
    pub fn length(&self) -> usize {
        Self::HEADER_LEN + if self.vendor_id.is_some() { 4 } else { 0 } + self.data.len()
    }

    /// Encode this AVP, zero-padded to a 4-byte boundary
    pub fn encode(&self) -> Vec<u8> {
        let length = self.length();
        let padded = length.div_ceil(4) * 4;
        let mut bytes = Vec::with_capacity(padded);

        bytes.extend_from_slice(&self.avp_code.to_be_bytes());

        let mut flags = 0u8;
        if self.vendor_id.is_some() {
            flags |= AVP_FLAG_VENDOR_ID;
        }
        if self.mandatory {
            flags |= AVP_FLAG_MANDATORY;
        }
        // 24-bit length
        let len_bytes = (length as u32).to_be_bytes();
        bytes.push(flags);
        bytes.extend_from_slice(&len_bytes[1..4]);

        if let Some(vendor_id) = self.vendor_id {
            bytes.extend_from_slice(&vendor_id.to_be_bytes());
        }

        bytes.extend_from_slice(&self.data);
        bytes.resize(padded, 0);
        bytes
    }

    /// Decode a single AVP from the start of `bytes`
    ///
    /// Trailing padding beyond the encoded length must be zero and at most
    /// 3 bytes; anything further is a decode error (the tunnel carries one
    /// EAP-Message AVP per record in this implementation).
    pub fn decode(bytes: &[u8]) -> Result<Self, TtlsError> {
        if bytes.len() < Self::HEADER_LEN {
            return Err(TtlsError::AvpTooShort(bytes.len()));
        }

        let avp_code = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let flags = bytes[4];
        let length = u32::from_be_bytes([0, bytes[5], bytes[6], bytes[7]]) as usize;

        let has_vendor_id = flags & AVP_FLAG_VENDOR_ID != 0;
        let mandatory = flags & AVP_FLAG_MANDATORY != 0;

        let header_len = Self::HEADER_LEN + if has_vendor_id { 4 } else { 0 };
        if length < header_len || length > bytes.len() {
            return Err(TtlsError::InvalidAvpLength(length));
        }

        let padded = length.div_ceil(4) * 4;
        if bytes.len() > padded || bytes[length..].iter().any(|b| *b != 0) {
            return Err(TtlsError::InvalidAvpPadding);
        }

        let vendor_id = if has_vendor_id {
            Some(u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]))
        } else {
            None
        };

        Ok(EapTtlsAvp {
            avp_code,
            mandatory,
            vendor_id,
            data: bytes[header_len..length].to_vec(),
        })
    }
}

/// EAP-TTLS decode/encode errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TtlsError {
    #[error("Type data too short: {0} bytes")]
    TypeDataTooShort(usize),

    #[error("AVP too short: {0} bytes")]
    AvpTooShort(usize),

    #[error("Invalid AVP length: {0}")]
    InvalidAvpLength(usize),

    #[error("Invalid AVP padding")]
    InvalidAvpPadding,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_data_flags_roundtrip() {
        let type_data = EapTtlsTypeData {
            length_included: true,
            more_fragments: true,
            start: false,
            version: 0,
            message_length: Some(4000),
            data: vec![0xAA; 10],
        };

        let bytes = type_data.encode();
        assert_eq!(bytes[0], 0xC0); // L | M
        assert_eq!(u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]), 4000);

        let decoded = EapTtlsTypeData::decode(&bytes).unwrap();
        assert_eq!(decoded, type_data);
    }

    #[test]
    fn test_start_packet() {
        let bytes = vec![0x20];
        let decoded = EapTtlsTypeData::decode(&bytes).unwrap();
        assert!(decoded.start);
        assert!(!decoded.is_acknowledgement());
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn test_acknowledgement() {
        let ack = EapTtlsTypeData::acknowledgement();
        assert!(ack.is_acknowledgement());
        assert_eq!(ack.encode(), vec![0x00]);

        let decoded = EapTtlsTypeData::decode(&[0x00]).unwrap();
        assert!(decoded.is_acknowledgement());
    }

    #[test]
    fn test_decode_length_flag_without_length_bytes() {
        assert!(matches!(
            EapTtlsTypeData::decode(&[0x80, 0x00]),
            Err(TtlsError::TypeDataTooShort(2))
        ));
    }

    #[test]
    fn test_inbound_reassembly_roundtrip() {
        let original: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        let mut outbound = OutboundFragmentationHelper::new(300);
        outbound.setup_outbound_fragmentation(original.clone());

        let mut inbound = InboundFragmentationHelper::new();
        let mut first = true;
        loop {
            let result = outbound.get_next_outbound_fragment().unwrap();
            let packet = EapTtlsTypeData::new(
                result.has_remaining_fragments,
                if first { Some(original.len() as u32) } else { None },
                result.fragmented_data,
            );
            first = false;

            match inbound.assemble_inbound_message(&packet) {
                FragmentStatus::Ack => assert!(result.has_remaining_fragments),
                FragmentStatus::Assembled => {
                    assert!(!result.has_remaining_fragments);
                    break;
                }
                FragmentStatus::Invalid => panic!("unexpected invalid status"),
            }
        }

        assert_eq!(inbound.assembled_inbound_fragment(), original.as_slice());
    }

    #[test]
    fn test_inbound_first_fragment_without_length_is_invalid() {
        let mut inbound = InboundFragmentationHelper::new();
        let packet = EapTtlsTypeData {
            length_included: false,
            more_fragments: true,
            start: false,
            version: 0,
            message_length: None,
            data: vec![1, 2, 3],
        };
        assert_eq!(inbound.assemble_inbound_message(&packet), FragmentStatus::Invalid);
    }

    #[test]
    fn test_inbound_overflow_is_invalid() {
        let mut inbound = InboundFragmentationHelper::new();
        let first = EapTtlsTypeData::new(true, Some(5), vec![1, 2, 3]);
        assert_eq!(inbound.assemble_inbound_message(&first), FragmentStatus::Ack);

        let second = EapTtlsTypeData::new(false, None, vec![4, 5, 6, 7]);
        assert_eq!(inbound.assemble_inbound_message(&second), FragmentStatus::Invalid);
    }

    #[test]
    fn test_inbound_unfragmented_with_mismatched_length_is_invalid() {
        let mut inbound = InboundFragmentationHelper::new();
        let packet = EapTtlsTypeData::new(false, Some(10), vec![1, 2, 3]);
        assert_eq!(inbound.assemble_inbound_message(&packet), FragmentStatus::Invalid);
    }

    #[test]
    fn test_outbound_exhaustion() {
        let mut outbound = OutboundFragmentationHelper::new(4);
        outbound.setup_outbound_fragmentation(vec![0; 10]);

        let first = outbound.get_next_outbound_fragment().unwrap();
        assert_eq!(first.fragmented_data.len(), 4);
        assert!(first.has_remaining_fragments);

        let second = outbound.get_next_outbound_fragment().unwrap();
        assert!(second.has_remaining_fragments);

        let third = outbound.get_next_outbound_fragment().unwrap();
        assert_eq!(third.fragmented_data.len(), 2);
        assert!(!third.has_remaining_fragments);

        assert!(outbound.get_next_outbound_fragment().is_none());
    }

    #[test]
    fn test_avp_roundtrip_with_padding() {
        let avp = EapTtlsAvp::eap_message_avp(vec![0x02, 0x01, 0x00, 0x06, 0x01, 0x61]);
        let bytes = avp.encode();
        // 8-byte header + 6 bytes data pads to 16
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[bytes.len() - 2..], &[0, 0]);

        let decoded = EapTtlsAvp::decode(&bytes).unwrap();
        assert_eq!(decoded, avp);
    }

    #[test]
    fn test_avp_vendor_id_roundtrip() {
        let avp = EapTtlsAvp {
            avp_code: 99,
            mandatory: false,
            vendor_id: Some(0x0000_3039),
            data: vec![1, 2, 3],
        };
        let bytes = avp.encode();
        let decoded = EapTtlsAvp::decode(&bytes).unwrap();
        assert_eq!(decoded, avp);
    }

    #[test]
    fn test_avp_nonzero_padding_rejected() {
        let avp = EapTtlsAvp::eap_message_avp(vec![1, 2, 3]);
        let mut bytes = avp.encode();
        let last = bytes.len() - 1;
        bytes[last] = 0xFF;
        assert_eq!(EapTtlsAvp::decode(&bytes), Err(TtlsError::InvalidAvpPadding));
    }

    #[test]
    fn test_avp_length_exceeding_buffer_rejected() {
        let mut bytes = EapTtlsAvp::eap_message_avp(vec![1, 2, 3]).encode();
        bytes[7] = 0xFF;
        assert!(matches!(
            EapTtlsAvp::decode(&bytes),
            Err(TtlsError::InvalidAvpLength(_))
        ));
    }
}
