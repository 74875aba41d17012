//! Outer EAP Session Dispatcher
//!
//! The top-level state machine of one authentication attempt. It
//! negotiates identity, selects exactly one method engine for the lifetime
//! of the attempt, and maps the engine's results onto terminal phases.
//! Phases follow `Created -> Identity -> Method -> {Success | Failure}`.
//!
//! The session is fully synchronous and non-reentrant: one inbound message
//! is processed at a time, and cancellation means dropping the session.

use std::sync::{Arc, Mutex};

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::credentials::SimAkaCredentialSource;
use crate::error::EapError;
use crate::keys::SessionKeys;
use crate::methods::mschapv2::MsChapV2Engine;
use crate::methods::simaka::{SimAkaEngine, SimAkaVariant};
use crate::methods::ttls::TtlsEngine;
use crate::methods::{MethodEngine, MethodResult};
use crate::reauth::ReauthIdentityCache;
use crate::tls::TlsSessionFactory;
use eap_proto::{EapCode, EapMethodType, EapPacket};

/// Terminal or intermediate result of processing one inbound message
#[derive(Debug)]
pub enum EapOutcome {
    /// Encoded EAP response to deliver to the server
    Response(Vec<u8>),
    /// Authentication succeeded; session keys are exported exactly once
    Success(SessionKeys),
    /// Authentication failed cleanly (EAP-Failure or method failure)
    Failure,
}

/// External collaborators shared by a session and any nested session it
/// spawns (the TTLS inner dispatcher)
#[derive(Clone)]
pub struct SessionServices {
    credential_source: Option<Arc<dyn SimAkaCredentialSource>>,
    tls_session_factory: Option<Arc<dyn TlsSessionFactory>>,
    pub(crate) reauth_cache: Arc<ReauthIdentityCache>,
    rng: Arc<Mutex<dyn RngCore + Send>>,
}

impl SessionServices {
    /// Start building a services container
    pub fn builder() -> SessionServicesBuilder {
        SessionServicesBuilder {
            credential_source: None,
            tls_session_factory: None,
            reauth_cache: None,
            rng: None,
        }
    }

    pub(crate) fn credential_source(
        &self,
    ) -> Result<&dyn SimAkaCredentialSource, EapError> {
        self.credential_source
            .as_deref()
            .ok_or(EapError::Config("no SIM/AKA credential source configured"))
    }

    pub(crate) fn tls_session_factory(&self) -> Result<&dyn TlsSessionFactory, EapError> {
        self.tls_session_factory
            .as_deref()
            .ok_or(EapError::Config("no TLS session factory configured"))
    }

    pub(crate) fn fill_random(&self, dest: &mut [u8]) {
        self.rng.lock().unwrap().fill_bytes(dest);
    }
}

/// Builder for [`SessionServices`]
pub struct SessionServicesBuilder {
    credential_source: Option<Arc<dyn SimAkaCredentialSource>>,
    tls_session_factory: Option<Arc<dyn TlsSessionFactory>>,
    reauth_cache: Option<Arc<ReauthIdentityCache>>,
    rng: Option<Arc<Mutex<dyn RngCore + Send>>>,
}

impl SessionServicesBuilder {
    /// Provide the SIM/AKA credential source
    pub fn credential_source(
        mut self,
        credential_source: impl SimAkaCredentialSource + 'static,
    ) -> Self {
        self.credential_source = Some(Arc::new(credential_source));
        self
    }

    /// Provide the TLS session factory for EAP-TTLS
    pub fn tls_session_factory(mut self, factory: impl TlsSessionFactory + 'static) -> Self {
        self.tls_session_factory = Some(Arc::new(factory));
        self
    }

    /// Share a caller-owned re-authentication identity cache
    pub fn reauth_cache(mut self, cache: Arc<ReauthIdentityCache>) -> Self {
        self.reauth_cache = Some(cache);
        self
    }

    /// Override the random source (tests use a deterministic one)
    pub fn rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Some(Arc::new(Mutex::new(rng)));
        self
    }

    /// Finish building
    pub fn build(self) -> SessionServices {
        SessionServices {
            credential_source: self.credential_source,
            tls_session_factory: self.tls_session_factory,
            reauth_cache: self
                .reauth_cache
                .unwrap_or_else(|| Arc::new(ReauthIdentityCache::new())),
            rng: self
                .rng
                .unwrap_or_else(|| Arc::new(Mutex::new(OsRng))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Created,
    Identity,
    Method,
    Success,
    Failure,
}

impl SessionPhase {
    fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Success | SessionPhase::Failure)
    }
}

/// One EAP peer authentication attempt
pub struct EapSession {
    config: SessionConfig,
    services: SessionServices,
    phase: SessionPhase,
    engine: Option<MethodEngine>,
}

impl EapSession {
    /// Create a session over a configuration and its external services
    pub fn new(config: SessionConfig, services: SessionServices) -> Self {
        EapSession {
            config,
            services,
            phase: SessionPhase::Created,
            engine: None,
        }
    }

    /// Process one inbound EAP message and produce the next outcome
    ///
    /// Any error is terminal: the session moves to its failure phase, the
    /// live engine's key material is invalidated, and further messages are
    /// rejected.
    pub fn process(&mut self, message: &[u8]) -> Result<EapOutcome, EapError> {
        let result = self.process_inner(message);
        if result.is_err() {
            if let Some(engine) = &mut self.engine {
                engine.invalidate();
            }
            self.phase = SessionPhase::Failure;
        }
        result
    }

    fn process_inner(&mut self, message: &[u8]) -> Result<EapOutcome, EapError> {
        if self.phase.is_terminal() {
            return Err(EapError::ProtocolViolation(
                "message received after the session reached a terminal phase",
            ));
        }

        let packet = EapPacket::from_bytes(message)?;
        debug!(code = ?packet.code, identifier = packet.identifier, "processing EAP message");

        match packet.code {
            EapCode::Response => Err(EapError::ProtocolViolation(
                "peer received an EAP-Response packet",
            )),
            EapCode::Success | EapCode::Failure => self.handle_success_failure(&packet),
            EapCode::Request => self.handle_request(&packet),
        }
    }

    fn handle_success_failure(&mut self, packet: &EapPacket) -> Result<EapOutcome, EapError> {
        if self.engine.is_some() {
            return self.delegate(packet);
        }

        match packet.code {
            // An EAP-Success with no authenticated method behind it is a
            // non-retryable protocol error (RFC 3748 Section 4.2)
            EapCode::Success => Err(EapError::ProtocolViolation(
                "received EAP-Success before a method was selected",
            )),
            _ => {
                self.phase = SessionPhase::Failure;
                Ok(EapOutcome::Failure)
            }
        }
    }

    fn handle_request(&mut self, packet: &EapPacket) -> Result<EapOutcome, EapError> {
        match packet.method_type {
            // Notifications are echoed without a phase change
            // (RFC 3748 Section 5.2)
            Some(EapMethodType::Notification) => Ok(EapOutcome::Response(
                EapPacket::notification_response(packet.identifier).to_bytes(),
            )),
            Some(EapMethodType::Identity) => self.handle_identity_request(packet),
            Some(EapMethodType::Nak) => Err(EapError::ProtocolViolation(
                "Nak is response-only and cannot appear in a request",
            )),
            _ => self.handle_method_request(packet),
        }
    }

    fn handle_identity_request(&mut self, packet: &EapPacket) -> Result<EapOutcome, EapError> {
        if self.phase == SessionPhase::Method {
            return Err(EapError::ProtocolViolation(
                "identity request after method selection",
            ));
        }
        self.phase = SessionPhase::Identity;

        // Prefer a still-valid cached re-authentication identity over the
        // permanent identity
        let identity = match self.config.reauth_identity() {
            Some(reauth_id)
                if self
                    .services
                    .reauth_cache
                    .has_valid(reauth_id, &self.config.identity) =>
            {
                debug!("answering identity request with cached re-authentication identity");
                reauth_id.to_vec()
            }
            _ => self.config.identity.clone(),
        };

        Ok(EapOutcome::Response(
            EapPacket::identity_response(packet.identifier, &identity).to_bytes(),
        ))
    }

    fn handle_method_request(&mut self, packet: &EapPacket) -> Result<EapOutcome, EapError> {
        // Some servers skip identity negotiation and lead with a method
        self.phase = SessionPhase::Method;

        if self.engine.is_none() {
            match self.build_engine(packet.method_type)? {
                Some(engine) => {
                    debug!(method = ?engine.method_type(), "selected EAP method");
                    self.engine = Some(engine);
                }
                None => {
                    // No configuration for the proposed method: answer
                    // with a legacy Nak listing what we do support
                    warn!(raw_type = ?packet.raw_type, "proposed method unavailable, sending Nak");
                    return Ok(EapOutcome::Response(
                        EapPacket::nak_response(
                            packet.identifier,
                            &self.config.supported_methods(),
                        )
                        .to_bytes(),
                    ));
                }
            }
        }

        self.delegate(packet)
    }

    /// Build the engine for a proposed method type, or None for a Nak
    fn build_engine(
        &self,
        method_type: Option<EapMethodType>,
    ) -> Result<Option<MethodEngine>, EapError> {
        let engine = match method_type {
            Some(EapMethodType::Sim) if self.config.sim.is_some() => Some(MethodEngine::SimAka(
                SimAkaEngine::new(SimAkaVariant::Sim, &self.config),
            )),
            Some(EapMethodType::Aka) if self.config.aka.is_some() => Some(MethodEngine::SimAka(
                SimAkaEngine::new(SimAkaVariant::Aka, &self.config),
            )),
            Some(EapMethodType::AkaPrime) if self.config.aka_prime.is_some() => {
                Some(MethodEngine::SimAka(SimAkaEngine::new(
                    SimAkaVariant::AkaPrime,
                    &self.config,
                )))
            }
            Some(EapMethodType::MsChapV2) => self
                .config
                .mschapv2
                .clone()
                .map(|config| MethodEngine::MsChapV2(MsChapV2Engine::new(config))),
            Some(EapMethodType::Ttls) => self
                .config
                .ttls
                .clone()
                .map(|config| MethodEngine::Ttls(TtlsEngine::new(config))),
            _ => None,
        };
        Ok(engine)
    }

    fn delegate(&mut self, packet: &EapPacket) -> Result<EapOutcome, EapError> {
        let engine = self.engine.as_mut().ok_or(EapError::ProtocolViolation(
            "no method engine available for delegation",
        ))?;

        match engine.process(packet, &self.services)? {
            MethodResult::Response(bytes) => Ok(EapOutcome::Response(bytes)),
            MethodResult::Success(keys) => {
                self.phase = SessionPhase::Success;
                Ok(EapOutcome::Success(keys))
            }
            MethodResult::Failure => {
                self.phase = SessionPhase::Failure;
                Ok(EapOutcome::Failure)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MsChapV2Config;

    fn mschapv2_config() -> SessionConfig {
        SessionConfig::builder()
            .identity(b"user@example.org".to_vec())
            .mschapv2(MsChapV2Config::new("User", "clientPass"))
            .build()
    }

    fn session() -> EapSession {
        EapSession::new(mschapv2_config(), SessionServices::builder().build())
    }

    #[test]
    fn test_identity_request_answered_with_permanent_identity() {
        let mut session = session();

        let request = EapPacket::new(
            EapCode::Request,
            7,
            Some(EapMethodType::Identity),
            Vec::new(),
        );
        let outcome = session.process(&request.to_bytes()).unwrap();

        let EapOutcome::Response(bytes) = outcome else {
            panic!("expected a response");
        };
        let response = EapPacket::from_bytes(&bytes).unwrap();
        assert_eq!(response.code, EapCode::Response);
        assert_eq!(response.identifier, 7);
        assert_eq!(response.method_type, Some(EapMethodType::Identity));
        assert_eq!(response.type_data, b"user@example.org");
    }

    #[test]
    fn test_notification_echoed_without_phase_change() {
        let mut session = session();

        let request = EapPacket::new(
            EapCode::Request,
            1,
            Some(EapMethodType::Notification),
            b"maintenance window".to_vec(),
        );
        let outcome = session.process(&request.to_bytes()).unwrap();

        let EapOutcome::Response(bytes) = outcome else {
            panic!("expected a response");
        };
        let response = EapPacket::from_bytes(&bytes).unwrap();
        assert_eq!(response.method_type, Some(EapMethodType::Notification));
        assert!(response.type_data.is_empty());
        assert_eq!(session.phase, SessionPhase::Created);
    }

    #[test]
    fn test_unsupported_method_gets_nak() {
        let mut session = session();

        // EAP-AKA proposed, only MSCHAPv2 configured
        let request = EapPacket::new(EapCode::Request, 2, Some(EapMethodType::Aka), vec![1, 0, 0]);
        let outcome = session.process(&request.to_bytes()).unwrap();

        let EapOutcome::Response(bytes) = outcome else {
            panic!("expected a response");
        };
        let response = EapPacket::from_bytes(&bytes).unwrap();
        assert_eq!(response.method_type, Some(EapMethodType::Nak));
        assert_eq!(response.type_data, vec![EapMethodType::MsChapV2.as_u8()]);

        // The session stays usable for a follow-up proposal
        assert_eq!(session.phase, SessionPhase::Method);
        assert!(session.engine.is_none());
    }

    #[test]
    fn test_premature_success_is_protocol_error() {
        let mut session = session();

        let success = EapPacket::new(EapCode::Success, 1, None, Vec::new());
        assert!(matches!(
            session.process(&success.to_bytes()),
            Err(EapError::ProtocolViolation(_))
        ));

        // Terminal after the error
        let request = EapPacket::new(
            EapCode::Request,
            2,
            Some(EapMethodType::Identity),
            Vec::new(),
        );
        assert!(session.process(&request.to_bytes()).is_err());
    }

    #[test]
    fn test_failure_without_engine_is_clean_failure() {
        let mut session = session();

        let failure = EapPacket::new(EapCode::Failure, 1, None, Vec::new());
        let outcome = session.process(&failure.to_bytes()).unwrap();
        assert!(matches!(outcome, EapOutcome::Failure));
        assert!(session.phase.is_terminal());
    }

    #[test]
    fn test_eap_response_rejected() {
        let mut session = session();

        let response = EapPacket::identity_response(1, b"x");
        assert!(matches!(
            session.process(&response.to_bytes()),
            Err(EapError::ProtocolViolation(_))
        ));
    }
}
