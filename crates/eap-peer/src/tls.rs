//! TLS Session Abstraction for EAP-TTLS
//!
//! The TLS handshake/record engine is an external collaborator. The TTLS
//! state machine drives it through this trait and interprets the tagged
//! results; it never touches TLS internals.

use crate::keys::SessionKeys;

/// Status tag on every TLS operation result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsStatus {
    /// The operation succeeded; `data` holds any bytes to transmit
    Success,
    /// The handshake just completed; `data` holds the final records
    TunnelEstablished,
    /// The connection is closed; `data` may hold a close_notify to send
    Closed,
    /// The operation failed and the session cannot continue or close
    Failure,
}

/// Result of a TLS operation: a status tag plus bytes for the wire
#[derive(Debug, Clone)]
pub struct TlsResult {
    pub status: TlsStatus,
    pub data: Vec<u8>,
}

impl TlsResult {
    /// Build a result with data
    pub fn new(status: TlsStatus, data: Vec<u8>) -> Self {
        TlsResult { status, data }
    }

    /// Build a data-less failure result
    pub fn failure() -> Self {
        TlsResult {
            status: TlsStatus::Failure,
            data: Vec::new(),
        }
    }
}

/// Result of exporting keying material from an established tunnel
#[derive(Debug)]
pub enum KeyingMaterialResult {
    /// MSK/EMSK derived from the completed TLS session
    Success(SessionKeys),
    /// The export failed
    Failure,
}

/// One TLS session serving exactly one EAP-TTLS authentication
///
/// All calls are synchronous; each returns a tagged result rather than
/// raising, so the state machine can route every outcome explicitly.
pub trait TlsSession: Send {
    /// Begin the handshake; the result data holds the ClientHello
    fn start_handshake(&mut self) -> TlsResult;

    /// Feed one reassembled handshake message; `early_application_data` is
    /// transmitted as the first encrypted payload once the tunnel is up,
    /// in which case the status is `TunnelEstablished`
    fn process_handshake_data(
        &mut self,
        handshake_data: &[u8],
        early_application_data: &[u8],
    ) -> TlsResult;

    /// Decrypt inbound application data
    fn process_incoming_data(&mut self, incoming_data: &[u8]) -> TlsResult;

    /// Encrypt outbound application data
    fn process_outgoing_data(&mut self, outgoing_data: &[u8]) -> TlsResult;

    /// Attempt a clean close_notify exchange
    fn close_connection(&mut self) -> TlsResult;

    /// Export MSK/EMSK from the completed session (RFC 5281 Section 8)
    fn generate_keying_material(&mut self) -> KeyingMaterialResult;
}

/// Produces one boxed [`TlsSession`] per handshake start
pub trait TlsSessionFactory: Send + Sync {
    /// Create a fresh TLS session
    fn new_session(&self) -> Box<dyn TlsSession>;
}
