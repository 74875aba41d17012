//! EAP Wire Format Implementation
//!
//! This crate provides the wire formats consumed by the EAP peer state
//! machines:
//!
//! - Generic EAP packet encoding and decoding (RFC 3748), including the
//!   legacy Nak constructor
//! - EAP-SIM/AKA/AKA' attribute codec (RFC 4186, RFC 4187, RFC 5448)
//! - EAP-TTLS type data, fragmentation helpers, and AVP framing (RFC 5281)
//! - EAP-MSCHAPv2 type data (draft-kamath-pppext-eap-mschapv2)
//!
//! # Example
//!
//! ```rust
//! use eap_proto::{EapCode, EapMethodType, EapPacket};
//!
//! // Decode an Identity request
//! let bytes = [0x01, 0x10, 0x00, 0x05, 0x01];
//! let packet = EapPacket::from_bytes(&bytes).unwrap();
//! assert_eq!(packet.code, EapCode::Request);
//! assert_eq!(packet.method_type, Some(EapMethodType::Identity));
//!
//! // Answer it
//! let response = EapPacket::identity_response(packet.identifier, b"user@example.org");
//! let _wire = response.to_bytes();
//! ```

pub mod mschapv2;
pub mod packet;
pub mod simaka;
pub mod ttls;

pub use packet::{EapCode, EapMethodType, EapPacket, PacketError};
pub use simaka::{SimAkaAttribute, SimAkaError, SimAkaSubtype, SimAkaTypeData};
pub use ttls::{
    EapTtlsAvp, EapTtlsTypeData, FragmentStatus, FragmentationResult,
    InboundFragmentationHelper, OutboundFragmentationHelper, TtlsError,
};
