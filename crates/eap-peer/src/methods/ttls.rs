//! EAP-TTLS Method Engine
//!
//! Phase 1 drives the external TLS engine through the handshake,
//! fragmenting and reassembling oversized messages; phase 2 tunnels a
//! fully independent inner EAP conversation as encrypted EAP-Message AVPs
//! (RFC 5281). Sessions follow
//! `Created -> Handshake -> Tunnel -> {ErroredAwaitingClosure} -> Final`.
//!
//! The inner conversation runs in a freshly constructed dispatcher over
//! the tunnel's own session config; outer and inner share nothing but the
//! byte-stream handoff.

use tracing::{debug, warn};

use crate::config::TtlsConfig;
use crate::error::EapError;
use crate::methods::MethodResult;
use crate::session::{EapOutcome, EapSession, SessionServices};
use crate::tls::{KeyingMaterialResult, TlsResult, TlsSession, TlsStatus};
use eap_proto::ttls::AVP_CODE_EAP_MESSAGE;
use eap_proto::{
    EapCode, EapMethodType, EapPacket, EapTtlsAvp, EapTtlsTypeData, FragmentStatus,
    InboundFragmentationHelper, OutboundFragmentationHelper,
};

enum TtlsState {
    Created,
    Handshake,
    Tunnel { inner: Box<EapSession> },
    /// A decode, MAC, or TLS error occurred after a session existed; one
    /// clean close-notify exchange is attempted, then the captured error
    /// is reported
    ErroredAwaitingClosure { error: Option<EapError> },
    Final,
}

pub(crate) struct TtlsEngine {
    config: TtlsConfig,
    state: TtlsState,
    inbound: InboundFragmentationHelper,
    outbound: OutboundFragmentationHelper,
    tls: Option<Box<dyn TlsSession>>,
}

impl TtlsEngine {
    /// Build an engine from the method configuration
    pub fn new(config: TtlsConfig) -> Self {
        let outbound = OutboundFragmentationHelper::new(config.max_fragment_size);
        TtlsEngine {
            config,
            state: TtlsState::Created,
            inbound: InboundFragmentationHelper::new(),
            outbound,
            tls: None,
        }
    }

    /// Drop the tunnel state; called when the outer session errors out
    pub fn invalidate(&mut self) {
        self.tls = None;
        self.state = TtlsState::Final;
    }

    /// Process one inbound EAP message
    pub fn process(
        &mut self,
        packet: &EapPacket,
        services: &SessionServices,
    ) -> Result<MethodResult, EapError> {
        match packet.code {
            EapCode::Success | EapCode::Failure => self.handle_success_failure(packet),
            EapCode::Response => Err(EapError::ProtocolViolation(
                "peer received an EAP-Response packet",
            )),
            EapCode::Request => self.handle_request(packet, services),
        }
    }

    fn handle_success_failure(&mut self, packet: &EapPacket) -> Result<MethodResult, EapError> {
        if matches!(self.state, TtlsState::Tunnel { .. }) {
            return self.forward_outer_result(packet);
        }

        match &mut self.state {
            TtlsState::ErroredAwaitingClosure { error } => match packet.code {
                EapCode::Failure => {
                    self.state = TtlsState::Final;
                    Ok(MethodResult::Failure)
                }
                _ => {
                    let error = error
                        .take()
                        .unwrap_or(EapError::ProtocolViolation(
                            "EAP-Success while awaiting tunnel closure",
                        ));
                    self.state = TtlsState::Final;
                    Err(error)
                }
            },
            TtlsState::Final => Err(EapError::ProtocolViolation(
                "received a result after the method reached its final state",
            )),
            _ => match packet.code {
                // EAP-Success must terminate the protocol, so receiving it
                // mid-handshake is unrecoverable
                EapCode::Success => {
                    if let Some(tls) = self.tls.as_mut() {
                        tls.close_connection();
                    }
                    self.state = TtlsState::Final;
                    Err(EapError::ProtocolViolation(
                        "received EAP-Success during the TTLS handshake",
                    ))
                }
                _ => {
                    if let Some(tls) = self.tls.as_mut() {
                        tls.close_connection();
                    }
                    self.state = TtlsState::Final;
                    Ok(MethodResult::Failure)
                }
            },
        }
    }

    /// Forward the outer EAP-Success/Failure into the inner dispatcher.
    /// Success is only real when the inner conversation agrees, and the
    /// exported keys come from the TLS session, not the inner method.
    fn forward_outer_result(&mut self, packet: &EapPacket) -> Result<MethodResult, EapError> {
        let inner_result = {
            let TtlsState::Tunnel { inner } = &mut self.state else {
                return Err(EapError::ProtocolViolation("tunnel state lost"));
            };
            inner.process(&packet.to_bytes())
        };

        let tls = self.tls.as_mut().ok_or(EapError::Tls("TLS session lost"))?;

        match inner_result {
            Ok(EapOutcome::Success(_inner_keys)) => {
                let keying_material = tls.generate_keying_material();
                tls.close_connection();
                self.state = TtlsState::Final;

                match keying_material {
                    KeyingMaterialResult::Success(keys) => Ok(MethodResult::Success(keys)),
                    KeyingMaterialResult::Failure => {
                        Err(EapError::Tls("keying material export failed"))
                    }
                }
            }
            Ok(EapOutcome::Failure) => {
                debug!("tunneled authentication failed");
                tls.close_connection();
                self.state = TtlsState::Final;
                Ok(MethodResult::Failure)
            }
            Ok(EapOutcome::Response(_)) => {
                tls.close_connection();
                self.state = TtlsState::Final;
                Err(EapError::ProtocolViolation(
                    "inner session answered the outer result with a response",
                ))
            }
            Err(error) => {
                tls.close_connection();
                self.state = TtlsState::Final;
                Err(error)
            }
        }
    }

    fn handle_request(
        &mut self,
        packet: &EapPacket,
        services: &SessionServices,
    ) -> Result<MethodResult, EapError> {
        if packet.method_type != Some(EapMethodType::Ttls) {
            let error = EapError::ProtocolViolation(
                "request type does not match the selected method",
            );
            return match self.state {
                TtlsState::Created => Err(error),
                _ => self.transition_to_errored_closure(packet.identifier, error),
            };
        }

        match &self.state {
            TtlsState::Created => self.handle_created(packet, services),
            TtlsState::Handshake => self.handle_handshake(packet, services),
            TtlsState::Tunnel { .. } => self.handle_tunnel(packet, services),
            TtlsState::ErroredAwaitingClosure { .. } => self.handle_closure(packet),
            TtlsState::Final => Err(EapError::ProtocolViolation(
                "received a request after the method reached its final state",
            )),
        }
    }

    fn handle_created(
        &mut self,
        packet: &EapPacket,
        services: &SessionServices,
    ) -> Result<MethodResult, EapError> {
        let type_data = EapTtlsTypeData::decode(&packet.type_data)?;
        if !type_data.start {
            return Err(EapError::ProtocolViolation(
                "first EAP-TTLS request without the start bit",
            ));
        }

        self.state = TtlsState::Handshake;
        self.start_handshake(packet.identifier, services)
    }

    fn start_handshake(
        &mut self,
        identifier: u8,
        services: &SessionServices,
    ) -> Result<MethodResult, EapError> {
        let mut tls = services.tls_session_factory()?.new_session();
        let result = tls.start_handshake();
        self.tls = Some(tls);

        if result.status == TlsStatus::Failure {
            self.state = TtlsState::Final;
            return Err(EapError::Tls("failed to start the TLS handshake"));
        }

        debug!("TLS handshake started");
        Ok(self.build_fragmented_response(identifier, result.data))
    }

    fn handle_handshake(
        &mut self,
        packet: &EapPacket,
        services: &SessionServices,
    ) -> Result<MethodResult, EapError> {
        let type_data = match EapTtlsTypeData::decode(&packet.type_data) {
            Ok(type_data) => type_data,
            Err(error) => {
                warn!(%error, "failed to decode EAP-TTLS type data");
                return self.transition_to_errored_closure(packet.identifier, error.into());
            }
        };

        // A second start while a session is in progress is a protocol
        // error (RFC 5281 Section 7.1)
        if type_data.start {
            return self.transition_to_errored_closure(
                packet.identifier,
                EapError::ProtocolViolation("start request while a session is in progress"),
            );
        }

        if let Some(result) = self.next_outbound_fragment(packet.identifier, &type_data)? {
            return Ok(result);
        }

        let assembled = match self.assemble_inbound(packet.identifier, &type_data)? {
            AssembleOutcome::Ready(data) => data,
            AssembleOutcome::Reply(result) => return Ok(result),
        };

        // The first encrypted application payload is the tunneled
        // EAP-Identity response, built from the inner session's identity
        let identity_avp = EapTtlsAvp::eap_message_avp(
            EapPacket::identity_response(packet.identifier, &self.config.inner.identity)
                .to_bytes(),
        )
        .encode();

        let tls = self.tls.as_mut().ok_or(EapError::Tls("TLS session lost"))?;
        let result = tls.process_handshake_data(&assembled, &identity_avp);

        match result.status {
            TlsStatus::TunnelEstablished => {
                debug!("tunnel established, starting inner EAP conversation");
                let inner = EapSession::new((*self.config.inner).clone(), services.clone());
                self.state = TtlsState::Tunnel {
                    inner: Box::new(inner),
                };
                Ok(self.build_fragmented_response(packet.identifier, result.data))
            }
            TlsStatus::Success => {
                Ok(self.build_fragmented_response(packet.identifier, result.data))
            }
            TlsStatus::Closed => {
                // The session already closed itself; report the handshake
                // failure once the close-notify is delivered
                self.state = TtlsState::ErroredAwaitingClosure {
                    error: Some(EapError::Tls(
                        "handshake failed to complete and the connection was closed",
                    )),
                };
                Ok(self.plain_response(packet.identifier, result.data))
            }
            TlsStatus::Failure => {
                self.state = TtlsState::Final;
                Err(EapError::Tls(
                    "handshake failed and may not have been closed properly",
                ))
            }
        }
    }

    fn handle_tunnel(
        &mut self,
        packet: &EapPacket,
        _services: &SessionServices,
    ) -> Result<MethodResult, EapError> {
        let type_data = match EapTtlsTypeData::decode(&packet.type_data) {
            Ok(type_data) => type_data,
            Err(error) => {
                warn!(%error, "failed to decode EAP-TTLS type data");
                return self.transition_to_errored_closure(packet.identifier, error.into());
            }
        };

        if let Some(result) = self.next_outbound_fragment(packet.identifier, &type_data)? {
            return Ok(result);
        }

        let assembled = match self.assemble_inbound(packet.identifier, &type_data)? {
            AssembleOutcome::Ready(data) => data,
            AssembleOutcome::Reply(result) => return Ok(result),
        };

        let tls = self.tls.as_mut().ok_or(EapError::Tls("TLS session lost"))?;
        let decrypted = tls.process_incoming_data(&assembled);
        if let Some(result) = self.handle_tunnel_tls_result(packet.identifier, &decrypted)? {
            return Ok(result);
        }

        let avp = match EapTtlsAvp::decode(&decrypted.data) {
            Ok(avp) if avp.avp_code == AVP_CODE_EAP_MESSAGE => avp,
            Ok(avp) => {
                warn!(avp_code = avp.avp_code, "unexpected tunneled AVP");
                return self.transition_to_errored_closure(
                    packet.identifier,
                    EapError::ProtocolViolation("tunneled AVP is not an EAP-Message"),
                );
            }
            Err(error) => {
                warn!(%error, "failed to decode tunneled AVP");
                return self.transition_to_errored_closure(packet.identifier, error.into());
            }
        };

        let inner_result = {
            let TtlsState::Tunnel { inner } = &mut self.state else {
                return Err(EapError::ProtocolViolation("tunnel state lost"));
            };
            inner.process(&avp.data)
        };

        let inner_response = match inner_result {
            Ok(EapOutcome::Response(bytes)) => bytes,
            Ok(EapOutcome::Failure) => {
                warn!("tunneled authentication failed");
                if let Some(tls) = self.tls.as_mut() {
                    tls.close_connection();
                }
                self.state = TtlsState::Final;
                return Ok(MethodResult::Failure);
            }
            // EAP-Success belongs to the outer layer; an inner method
            // synthesizing one is invalid
            Ok(EapOutcome::Success(_)) => {
                return self.transition_to_errored_closure(
                    packet.identifier,
                    EapError::ProtocolViolation(
                        "inner session produced an EAP-Success inside the tunnel",
                    ),
                );
            }
            Err(error) => {
                return self.transition_to_errored_closure(packet.identifier, error);
            }
        };

        let outgoing_avp = EapTtlsAvp::eap_message_avp(inner_response).encode();
        let tls = self.tls.as_mut().ok_or(EapError::Tls("TLS session lost"))?;
        let encrypted = tls.process_outgoing_data(&outgoing_avp);
        if let Some(result) = self.handle_tunnel_tls_result(packet.identifier, &encrypted)? {
            return Ok(result);
        }

        Ok(self.build_fragmented_response(packet.identifier, encrypted.data))
    }

    /// Route a tunnel-phase encrypt/decrypt result; Some(..) short-circuits
    fn handle_tunnel_tls_result(
        &mut self,
        identifier: u8,
        result: &TlsResult,
    ) -> Result<Option<MethodResult>, EapError> {
        match result.status {
            TlsStatus::Success | TlsStatus::TunnelEstablished => Ok(None),
            TlsStatus::Closed => {
                self.state = TtlsState::ErroredAwaitingClosure {
                    error: Some(EapError::Tls(
                        "TLS session failed to encrypt or decrypt data and was closed",
                    )),
                };
                // Deliver the close-notify produced by the session
                Ok(Some(self.plain_response(identifier, result.data.clone())))
            }
            TlsStatus::Failure => {
                self.state = TtlsState::Final;
                Err(EapError::Tls(
                    "failed to encrypt or decrypt and the tunnel could not be closed",
                ))
            }
        }
    }

    fn handle_closure(&mut self, packet: &EapPacket) -> Result<MethodResult, EapError> {
        let stored = match &mut self.state {
            TtlsState::ErroredAwaitingClosure { error } => error.take(),
            _ => None,
        };
        let stored = stored.unwrap_or(EapError::ProtocolViolation(
            "closure state without a captured error",
        ));
        self.state = TtlsState::Final;

        // If the server sent data with its closure, hand it to the TLS
        // engine for disposal; no response is owed
        if let Ok(type_data) = EapTtlsTypeData::decode(&packet.type_data) {
            if let Some(tls) = self.tls.as_mut() {
                tls.process_incoming_data(&type_data.data);
            }
        }

        Err(stored)
    }

    /// Handle acknowledgements against the outbound fragment queue;
    /// Some(..) short-circuits with the next fragment
    fn next_outbound_fragment(
        &mut self,
        identifier: u8,
        type_data: &EapTtlsTypeData,
    ) -> Result<Option<MethodResult>, EapError> {
        if type_data.is_acknowledgement() {
            if let Some(fragment) = self.outbound.get_next_outbound_fragment() {
                debug!(
                    remaining = fragment.has_remaining_fragments,
                    "sending next outbound fragment"
                );
                let response = EapTtlsTypeData::new(
                    fragment.has_remaining_fragments,
                    None,
                    fragment.fragmented_data,
                );
                return Ok(Some(self.ttls_response(identifier, &response)));
            }
            return self
                .transition_to_errored_closure(
                    identifier,
                    EapError::ProtocolViolation(
                        "acknowledgement received with no pending fragmentation",
                    ),
                )
                .map(Some);
        }

        if self.outbound.has_remaining_fragments() {
            return self
                .transition_to_errored_closure(
                    identifier,
                    EapError::ProtocolViolation(
                        "expected a fragment acknowledgement, received data",
                    ),
                )
                .map(Some);
        }

        Ok(None)
    }

    fn assemble_inbound(
        &mut self,
        identifier: u8,
        type_data: &EapTtlsTypeData,
    ) -> Result<AssembleOutcome, EapError> {
        match self.inbound.assemble_inbound_message(type_data) {
            FragmentStatus::Assembled => Ok(AssembleOutcome::Ready(
                self.inbound.assembled_inbound_fragment().to_vec(),
            )),
            FragmentStatus::Ack => {
                debug!("inbound packet is a fragment, acknowledging");
                Ok(AssembleOutcome::Reply(
                    self.ttls_response(identifier, &EapTtlsTypeData::acknowledgement()),
                ))
            }
            FragmentStatus::Invalid => self
                .transition_to_errored_closure(
                    identifier,
                    EapError::ProtocolViolation("inbound fragment stream is inconsistent"),
                )
                .map(AssembleOutcome::Reply),
        }
    }

    /// Attempt one clean close, then either await the closure exchange or
    /// fail outright when the TLS engine cannot close
    fn transition_to_errored_closure(
        &mut self,
        identifier: u8,
        error: EapError,
    ) -> Result<MethodResult, EapError> {
        let Some(tls) = self.tls.as_mut() else {
            self.state = TtlsState::Final;
            return Err(error);
        };

        let closure = tls.close_connection();
        if closure.status != TlsStatus::Closed {
            warn!("failed to close the TLS session");
            self.state = TtlsState::Final;
            return Err(error);
        }

        self.state = TtlsState::ErroredAwaitingClosure { error: Some(error) };
        Ok(self.plain_response(identifier, closure.data))
    }

    /// Build a response, staging fragmentation when the payload exceeds
    /// the negotiated fragment size
    fn build_fragmented_response(&mut self, identifier: u8, data: Vec<u8>) -> MethodResult {
        let total_length = data.len() as u32;
        self.outbound.setup_outbound_fragmentation(data);

        let Some(fragment) = self.outbound.get_next_outbound_fragment() else {
            return self.ttls_response(identifier, &EapTtlsTypeData::acknowledgement());
        };

        let type_data = EapTtlsTypeData::new(
            fragment.has_remaining_fragments,
            fragment.has_remaining_fragments.then_some(total_length),
            fragment.fragmented_data,
        );
        self.ttls_response(identifier, &type_data)
    }

    /// Build an unfragmented response
    fn plain_response(&self, identifier: u8, data: Vec<u8>) -> MethodResult {
        self.ttls_response(identifier, &EapTtlsTypeData::new(false, None, data))
    }

    fn ttls_response(&self, identifier: u8, type_data: &EapTtlsTypeData) -> MethodResult {
        MethodResult::Response(
            EapPacket::method_response(identifier, EapMethodType::Ttls, type_data.encode())
                .to_bytes(),
        )
    }
}

enum AssembleOutcome {
    /// A complete message is ready to process
    Ready(Vec<u8>),
    /// Reply immediately (fragment ack or error-closure response)
    Reply(MethodResult),
}
