//! EAP-MSCHAPv2 Method Engine
//!
//! Peer side of the MSCHAPv2 exchange carried in EAP
//! (draft-kamath-pppext-eap-mschapv2, RFC 2759, RFC 3079). Sessions always
//! follow
//! `Created -> Challenge -> ValidateAuthenticator ->
//! {AwaitingSuccess | AwaitingFailure} -> Final`.
//!
//! Failure-Requests are acknowledged but never retried, even when the
//! server marks them retryable.

use tracing::{debug, warn};

use crate::config::MsChapV2Config;
use crate::crypto::mschapv2::{
    check_authenticator_response, generate_msk, generate_nt_response, MSK_LEN,
};
use crate::error::EapError;
use crate::keys::SessionKeys;
use crate::methods::MethodResult;
use crate::session::SessionServices;
use eap_proto::mschapv2::{
    failure_response, peek_op_code, success_response, ChallengeRequest, ChallengeResponse,
    FailureRequest, SuccessRequest, OP_FAILURE, OP_SUCCESS,
};
use eap_proto::{EapCode, EapMethodType, EapPacket};

/// EMSK length: this method defines no EMSK, so it exports all zeros
const EMSK_LEN: usize = 64;

enum MsChapV2State {
    Created,
    ValidateAuthenticator {
        authenticator_challenge: [u8; 16],
        peer_challenge: [u8; 16],
        nt_response: [u8; 24],
    },
    AwaitingSuccess {
        nt_response: [u8; 24],
    },
    AwaitingFailure,
    Final,
}

pub(crate) struct MsChapV2Engine {
    config: MsChapV2Config,
    state: MsChapV2State,
}

impl MsChapV2Engine {
    /// Build an engine from the method configuration
    pub fn new(config: MsChapV2Config) -> Self {
        MsChapV2Engine {
            config,
            state: MsChapV2State::Created,
        }
    }

    /// Process one inbound EAP message
    pub fn process(
        &mut self,
        packet: &EapPacket,
        services: &SessionServices,
    ) -> Result<MethodResult, EapError> {
        match packet.code {
            EapCode::Success => self.handle_eap_success(),
            EapCode::Failure => {
                self.state = MsChapV2State::Final;
                Ok(MethodResult::Failure)
            }
            EapCode::Response => Err(EapError::ProtocolViolation(
                "peer received an EAP-Response packet",
            )),
            EapCode::Request => self.handle_request(packet, services),
        }
    }

    fn handle_eap_success(&mut self) -> Result<MethodResult, EapError> {
        match &self.state {
            MsChapV2State::AwaitingSuccess { nt_response } => {
                let nt_response = *nt_response;
                let msk = generate_msk(&self.config.password, &nt_response);
                self.state = MsChapV2State::Final;
                Ok(MethodResult::Success(SessionKeys::new(
                    msk.to_vec(),
                    vec![0u8; EMSK_LEN],
                )))
            }
            _ => Err(EapError::ProtocolViolation(
                "received EAP-Success before the authenticator was validated",
            )),
        }
    }

    fn handle_request(
        &mut self,
        packet: &EapPacket,
        services: &SessionServices,
    ) -> Result<MethodResult, EapError> {
        if packet.method_type != Some(EapMethodType::MsChapV2) {
            return Err(EapError::ProtocolViolation(
                "request type does not match the selected method",
            ));
        }

        match self.state {
            MsChapV2State::Created => self.handle_challenge_request(packet, services),
            MsChapV2State::ValidateAuthenticator { .. } => self.handle_op_code(packet),
            MsChapV2State::AwaitingSuccess { .. } | MsChapV2State::AwaitingFailure => {
                Err(EapError::ProtocolViolation(
                    "unexpected method request while awaiting the outer result",
                ))
            }
            MsChapV2State::Final => Err(EapError::ProtocolViolation(
                "received a request after the method reached its final state",
            )),
        }
    }

    fn handle_challenge_request(
        &mut self,
        packet: &EapPacket,
        services: &SessionServices,
    ) -> Result<MethodResult, EapError> {
        let request = ChallengeRequest::decode(&packet.type_data)?;
        debug!(mschapv2_id = request.mschapv2_id, "received MSCHAPv2 challenge");

        let mut peer_challenge = [0u8; 16];
        services.fill_random(&mut peer_challenge);

        let nt_response = generate_nt_response(
            &request.challenge,
            &peer_challenge,
            &self.config.username,
            &self.config.password,
        );

        let response = ChallengeResponse::new(
            request.mschapv2_id,
            peer_challenge,
            nt_response,
            self.config.username.as_bytes().to_vec(),
        );

        self.state = MsChapV2State::ValidateAuthenticator {
            authenticator_challenge: request.challenge,
            peer_challenge,
            nt_response,
        };

        Ok(self.method_response(packet.identifier, response.encode()))
    }

    fn handle_op_code(&mut self, packet: &EapPacket) -> Result<MethodResult, EapError> {
        let MsChapV2State::ValidateAuthenticator {
            authenticator_challenge,
            peer_challenge,
            nt_response,
        } = &self.state
        else {
            return Err(EapError::ProtocolViolation("invalid state for op code"));
        };
        let (authenticator_challenge, peer_challenge, nt_response) =
            (*authenticator_challenge, *peer_challenge, *nt_response);

        match peek_op_code(&packet.type_data)? {
            OP_SUCCESS => {
                let request = SuccessRequest::decode(&packet.type_data)?;

                let authenticated = check_authenticator_response(
                    &self.config.password,
                    &nt_response,
                    &peer_challenge,
                    &authenticator_challenge,
                    &self.config.username,
                    &request.auth_bytes,
                );

                if !authenticated {
                    warn!("authenticator response does not match expected value");
                    self.state = MsChapV2State::Final;
                    return Ok(MethodResult::Failure);
                }

                self.state = MsChapV2State::AwaitingSuccess { nt_response };
                Ok(self.method_response(packet.identifier, success_response()))
            }
            OP_FAILURE => {
                let request = FailureRequest::decode(&packet.type_data)?;
                warn!(
                    error_code = request.error_code,
                    retryable = request.is_retryable,
                    "received MSCHAPv2 failure request"
                );

                // Retryable failures are intentionally not retried
                self.state = MsChapV2State::AwaitingFailure;
                Ok(self.method_response(packet.identifier, failure_response()))
            }
            op_code => {
                warn!(op_code, "unexpected MSCHAPv2 op code");
                Err(EapError::ProtocolViolation(
                    "unexpected MSCHAPv2 op code in ValidateAuthenticator",
                ))
            }
        }
    }

    fn method_response(&self, identifier: u8, type_data: Vec<u8>) -> MethodResult {
        MethodResult::Response(
            EapPacket::method_response(identifier, EapMethodType::MsChapV2, type_data).to_bytes(),
        )
    }
}
