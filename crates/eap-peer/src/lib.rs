//! EAP Peer Authentication State Machines
//!
//! This crate implements the peer side of five EAP methods — SIM, AKA,
//! AKA', MSCHAPv2 and TTLS — composed under a shared outer dispatcher.
//! The core operates purely on byte buffers: each inbound EAP message is
//! handed to [`EapSession::process`], which returns either the next
//! response to transmit or a terminal success (with exported session keys)
//! or failure.
//!
//! External collaborators stay behind traits: SIM/AKA challenge
//! computation ([`SimAkaCredentialSource`]) and the TLS handshake/record
//! engine used by TTLS ([`TlsSession`]). Re-authentication identities live
//! in a caller-owned [`ReauthIdentityCache`] shared across sessions.
//!
//! # Example
//!
//! ```rust
//! use eap_peer::{EapOutcome, EapSession, MsChapV2Config, SessionConfig, SessionServices};
//!
//! let config = SessionConfig::builder()
//!     .identity(b"user@example.org".to_vec())
//!     .mschapv2(MsChapV2Config::new("User", "clientPass"))
//!     .build();
//!
//! let mut session = EapSession::new(config, SessionServices::builder().build());
//!
//! // Feed a decoded-off-the-wire EAP Identity request
//! let identity_request = [0x01, 0x01, 0x00, 0x05, 0x01];
//! match session.process(&identity_request).unwrap() {
//!     EapOutcome::Response(bytes) => assert_eq!(bytes[0], 0x02), // EAP-Response
//!     _ => unreachable!(),
//! }
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod keys;
pub mod reauth;
pub mod session;
pub mod tls;

mod crypto;
mod methods;

pub use config::{
    AkaConfig, AkaPrimeConfig, MsChapV2Config, SessionConfig, SessionConfigBuilder, SimConfig,
    TtlsConfig,
};
pub use credentials::{
    AkaChallengeOutcome, CredentialError, SimAkaCredentialSource, SimChallengeOutcome,
};
pub use error::EapError;
pub use keys::SessionKeys;
pub use reauth::{ReauthIdentityCache, ReauthInfo};
pub use session::{EapOutcome, EapSession, SessionServices, SessionServicesBuilder};
pub use tls::{KeyingMaterialResult, TlsResult, TlsSession, TlsSessionFactory, TlsStatus};
