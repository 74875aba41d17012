//! EAP Peer Error Types
//!
//! One error enum covers the whole engine crate, with `#[from]` conversions
//! for the codec errors surfaced by `eap-proto`. Every error is terminal for
//! the session that produced it: the dispatcher moves to its failure phase
//! and refuses further packets.

use eap_proto::mschapv2::MsChapV2Error;
use eap_proto::{PacketError, SimAkaError, TtlsError};
use thiserror::Error;

/// Errors surfaced by the EAP peer state machines
#[derive(Debug, Error)]
pub enum EapError {
    #[error("Packet decode error: {0}")]
    Packet(#[from] PacketError),

    #[error("SIM/AKA attribute error: {0}")]
    SimAkaCodec(#[from] SimAkaError),

    #[error("EAP-TTLS codec error: {0}")]
    TtlsCodec(#[from] TtlsError),

    #[error("MSCHAPv2 codec error: {0}")]
    MsChapV2Codec(#[from] MsChapV2Error),

    /// A message arrived in a phase that cannot accept it, or violated a
    /// sequencing rule (duplicate notification, premature EAP-Success,
    /// unexpected fragment acknowledgement, ...)
    #[error("Protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// MAC mismatch, authenticator mismatch, rejected AUTN follow-up, or a
    /// second consecutive synchronization failure
    #[error("Authentication failure: {0}")]
    AuthenticationFailure(&'static str),

    /// The external SIM/AKA credential source failed
    #[error("Credential source error: {0}")]
    Credential(String),

    /// The external TLS engine failed in a way that prevents a clean close
    #[error("TLS failure: {0}")]
    Tls(&'static str),

    /// The session configuration cannot support the requested operation
    #[error("Configuration error: {0}")]
    Config(&'static str),
}
