//! Shared EAP-SIM/AKA/AKA' Method Engine
//!
//! One engine implements the three UICC-backed methods; the variant picks
//! the identity handling, the master-key derivation, and the MAC
//! algorithm. Phases follow
//! `Created -> Identity/Start (optional) -> Challenge -> Final`, with fast
//! re-authentication as an alternative to the full challenge and a
//! one-shot notification interrupt permitted at most once per session.
//!
//! References: RFC 4186 (SIM), RFC 4187 (AKA), RFC 5448 (AKA').

use std::mem;

use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::config::{AkaPrimeConfig, SessionConfig};
use crate::credentials::{AkaChallengeOutcome, CredentialError, SimChallengeOutcome};
use crate::crypto::encr::{decrypt_encr_data, encrypt_encr_data, BLOCK_SIZE};
use crate::crypto::fips_prf::fips_186_2_prf;
use crate::crypto::{hmac_sha1_128, hmac_sha256_128};
use crate::error::EapError;
use crate::keys::{SimAkaKeys, EMSK_LEN, K_AUT_LEN, K_ENCR_LEN, MSK_LEN};
use crate::methods::aka_prime;
use crate::methods::MethodResult;
use crate::reauth::ReauthInfo;
use crate::session::SessionServices;
use eap_proto::simaka::{
    decode_attribute_list, encode_attribute_list, SimAkaAttribute, SimAkaSubtype, SimAkaTypeData,
    CLIENT_ERROR_STALE_RANDS, CLIENT_ERROR_UNABLE_TO_PROCESS, CLIENT_ERROR_UNSUPPORTED_VERSION,
    EAP_AT_ANY_ID_REQ, EAP_AT_AUTN, EAP_AT_ENCR_DATA, EAP_AT_FULLAUTH_ID_REQ, EAP_AT_IV,
    EAP_AT_MAC, EAP_AT_PERMANENT_ID_REQ, EAP_SIM_VERSION_1, MAC_LEN, NOTIFICATION_P_BIT,
};
use eap_proto::{EapCode, EapMethodType, EapPacket};

/// Which of the three UICC methods this engine instance runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SimAkaVariant {
    Sim,
    Aka,
    AkaPrime,
}

/// SIM start-round material retained for the challenge derivation
#[derive(Debug)]
struct SimStartContext {
    nonce_mt: [u8; 16],
    version_list: Vec<u16>,
    selected_version: u16,
}

/// Challenge-phase state
#[derive(Debug)]
struct ChallengeData {
    /// Identity bound into the key derivation
    identity: Vec<u8>,
    had_successful_challenge: bool,
    sync_failures: u8,
    next_reauth_id: Option<Vec<u8>>,
    sim: Option<SimStartContext>,
}

/// Re-authentication-phase state
struct ReauthData {
    reauth_identity: Vec<u8>,
    info: Option<ReauthInfo>,
    had_successful_reauth: bool,
    counter: u16,
    next_reauth_id: Option<Vec<u8>>,
}

enum SimAkaState {
    Created,
    /// AKA/AKA' identity exchange
    Identity { identity: Option<Vec<u8>> },
    /// SIM version negotiation
    Start {
        context: Option<SimStartContext>,
        identity: Option<Vec<u8>>,
    },
    Challenge(ChallengeData),
    Reauth(ReauthData),
    Final,
}

pub(crate) struct SimAkaEngine {
    variant: SimAkaVariant,
    eap_identity: Vec<u8>,
    reauth_id: Option<Vec<u8>>,
    aka_prime_config: Option<AkaPrimeConfig>,
    /// AKA sessions that also support AKA' must reject bidding-down
    /// (RFC 5448 Section 4)
    supports_aka_prime: bool,
    state: SimAkaState,
    keys: SimAkaKeys,
    notification_seen: bool,
}

impl SimAkaEngine {
    /// Build an engine for the given variant from the session config
    pub fn new(variant: SimAkaVariant, config: &SessionConfig) -> Self {
        SimAkaEngine {
            variant,
            eap_identity: config.identity.clone(),
            reauth_id: config.reauth_identity().map(<[u8]>::to_vec),
            aka_prime_config: config.aka_prime.clone(),
            supports_aka_prime: config.aka_prime.is_some(),
            state: SimAkaState::Created,
            keys: SimAkaKeys::default(),
            notification_seen: false,
        }
    }

    /// Zero all derived key material and force the terminal state
    pub fn invalidate(&mut self) {
        self.keys.invalidate();
        self.state = SimAkaState::Final;
    }

    /// The method type served by this engine instance
    pub fn method_type(&self) -> EapMethodType {
        match self.variant {
            SimAkaVariant::Sim => EapMethodType::Sim,
            SimAkaVariant::Aka => EapMethodType::Aka,
            SimAkaVariant::AkaPrime => EapMethodType::AkaPrime,
        }
    }

    /// Process one inbound EAP message
    pub fn process(
        &mut self,
        packet: &EapPacket,
        services: &SessionServices,
    ) -> Result<MethodResult, EapError> {
        match packet.code {
            EapCode::Success => self.handle_eap_success(services),
            EapCode::Failure => {
                self.keys.invalidate();
                self.state = SimAkaState::Final;
                Ok(MethodResult::Failure)
            }
            EapCode::Response => Err(EapError::ProtocolViolation(
                "peer received an EAP-Response packet",
            )),
            EapCode::Request => self.handle_request(packet, services),
        }
    }

    fn handle_eap_success(&mut self, services: &SessionServices) -> Result<MethodResult, EapError> {
        let (next_reauth_id, counter) = match &self.state {
            SimAkaState::Challenge(data) if data.had_successful_challenge => {
                (data.next_reauth_id.clone(), 0)
            }
            SimAkaState::Reauth(data) if data.had_successful_reauth => {
                (data.next_reauth_id.clone(), data.counter)
            }
            _ => {
                return Err(EapError::ProtocolViolation(
                    "received EAP-Success before the server was authenticated",
                ))
            }
        };

        if let Some(next_reauth_id) = next_reauth_id {
            services.reauth_cache.register(
                &next_reauth_id,
                &self.eap_identity,
                counter,
                self.keys.mk.clone(),
                self.keys.k_encr.clone(),
                self.keys.k_aut.clone(),
            );
            debug!("registered next re-authentication identity");
        }

        self.state = SimAkaState::Final;
        Ok(MethodResult::Success(self.keys.export()))
    }

    fn handle_request(
        &mut self,
        packet: &EapPacket,
        services: &SessionServices,
    ) -> Result<MethodResult, EapError> {
        if packet.method_type != Some(self.method_type()) {
            return Err(EapError::ProtocolViolation(
                "request type does not match the selected method",
            ));
        }

        let type_data = match SimAkaTypeData::decode(&packet.type_data) {
            Ok(type_data) => type_data,
            Err(error) => {
                warn!(%error, "failed to decode SIM/AKA type data");
                return Ok(self.client_error(packet.identifier, CLIENT_ERROR_UNABLE_TO_PROCESS));
            }
        };

        if type_data.subtype == SimAkaSubtype::Notification {
            return self.handle_notification(packet, &type_data, services);
        }

        // Errors are terminal, so the placeholder left by a `?` exit below
        // never becomes visible to another message
        let state = mem::replace(&mut self.state, SimAkaState::Final);
        let (state, result) = match (state, type_data.subtype) {
            // Created: first method request picks the opening exchange
            (SimAkaState::Created, SimAkaSubtype::AkaIdentity)
                if self.variant != SimAkaVariant::Sim =>
            {
                self.handle_identity_request(packet, &type_data, services, None)?
            }
            (SimAkaState::Created, SimAkaSubtype::SimStart)
                if self.variant == SimAkaVariant::Sim =>
            {
                self.handle_start_request(packet, &type_data, services, None)?
            }
            (SimAkaState::Created, SimAkaSubtype::AkaChallenge)
                if self.variant != SimAkaVariant::Sim =>
            {
                let data = self.new_challenge_data(self.eap_identity.clone(), None);
                self.handle_challenge(packet, &type_data, services, data)?
            }
            (SimAkaState::Created, SimAkaSubtype::Reauthentication) => {
                let data = self.new_reauth_data(services);
                self.handle_reauth(packet, &type_data, services, data)?
            }

            // AKA identity round
            (SimAkaState::Identity { identity }, SimAkaSubtype::AkaIdentity) => {
                self.handle_identity_request(packet, &type_data, services, identity)?
            }
            (SimAkaState::Identity { identity }, SimAkaSubtype::AkaChallenge) => {
                let identity = identity.unwrap_or_else(|| self.eap_identity.clone());
                let data = self.new_challenge_data(identity, None);
                self.handle_challenge(packet, &type_data, services, data)?
            }
            (SimAkaState::Identity { .. }, SimAkaSubtype::Reauthentication) => {
                let data = self.new_reauth_data(services);
                self.handle_reauth(packet, &type_data, services, data)?
            }

            // SIM start round
            (SimAkaState::Start { context, identity }, SimAkaSubtype::SimStart) => {
                let _ = context;
                self.handle_start_request(packet, &type_data, services, identity)?
            }
            (SimAkaState::Start { context, identity }, SimAkaSubtype::SimChallenge) => {
                match context {
                    Some(context) => {
                        let identity = identity.unwrap_or_else(|| self.eap_identity.clone());
                        let data = self.new_challenge_data(identity, Some(context));
                        self.handle_challenge(packet, &type_data, services, data)?
                    }
                    // A challenge without a completed start round cannot
                    // derive keys (RFC 4186 Section 9.3)
                    None => (
                        SimAkaState::Final,
                        self.client_error(packet.identifier, CLIENT_ERROR_UNABLE_TO_PROCESS),
                    ),
                }
            }
            (SimAkaState::Start { .. }, SimAkaSubtype::Reauthentication) => {
                let data = self.new_reauth_data(services);
                self.handle_reauth(packet, &type_data, services, data)?
            }

            // Challenge and re-authentication rounds
            (SimAkaState::Challenge(data), subtype)
                if subtype == self.challenge_subtype() =>
            {
                self.handle_challenge(packet, &type_data, services, data)?
            }
            (SimAkaState::Reauth(data), SimAkaSubtype::Reauthentication) => {
                self.handle_reauth(packet, &type_data, services, data)?
            }
            (SimAkaState::Reauth(_), subtype) if subtype == self.challenge_subtype() => {
                // Server fell back to a full challenge; the keys restored
                // from the cache must not survive into the new derivation
                self.keys.invalidate();
                let data = self.new_challenge_data(self.eap_identity.clone(), None);
                self.handle_challenge(packet, &type_data, services, data)?
            }

            (SimAkaState::Final, _) => {
                return Err(EapError::ProtocolViolation(
                    "received a request after the method reached its final state",
                ))
            }

            (state, _) => (
                state,
                self.client_error(packet.identifier, CLIENT_ERROR_UNABLE_TO_PROCESS),
            ),
        };

        self.state = state;
        Ok(result)
    }

    fn challenge_subtype(&self) -> SimAkaSubtype {
        match self.variant {
            SimAkaVariant::Sim => SimAkaSubtype::SimChallenge,
            SimAkaVariant::Aka | SimAkaVariant::AkaPrime => SimAkaSubtype::AkaChallenge,
        }
    }

    fn new_challenge_data(
        &self,
        identity: Vec<u8>,
        sim: Option<SimStartContext>,
    ) -> ChallengeData {
        ChallengeData {
            identity,
            had_successful_challenge: false,
            sync_failures: 0,
            next_reauth_id: None,
            sim,
        }
    }

    fn new_reauth_data(&self, services: &SessionServices) -> ReauthData {
        let (reauth_identity, info) = match &self.reauth_id {
            Some(reauth_id) => (
                reauth_id.clone(),
                services.reauth_cache.take_valid(reauth_id, &self.eap_identity),
            ),
            None => (Vec::new(), None),
        };
        ReauthData {
            reauth_identity,
            info,
            had_successful_reauth: false,
            counter: 0,
            next_reauth_id: None,
        }
    }

    // ------------------------------------------------------------------
    // Identity / Start rounds
    // ------------------------------------------------------------------

    fn handle_identity_request(
        &mut self,
        packet: &EapPacket,
        type_data: &SimAkaTypeData,
        services: &SessionServices,
        previous_identity: Option<Vec<u8>>,
    ) -> Result<(SimAkaState, MethodResult), EapError> {
        if !valid_identity_attributes(type_data) {
            return Ok((
                SimAkaState::Identity {
                    identity: previous_identity,
                },
                self.client_error(packet.identifier, CLIENT_ERROR_UNABLE_TO_PROCESS),
            ));
        }

        // Answer AT_ANY_ID_REQ with a still-valid re-auth identity when
        // one is cached; fall back to the permanent identity
        let use_reauth_id = type_data.contains(EAP_AT_ANY_ID_REQ)
            && self.reauth_id.as_deref().is_some_and(|reauth_id| {
                services.reauth_cache.has_valid(reauth_id, &self.eap_identity)
            });

        let identity = if use_reauth_id {
            debug!("answering identity request with cached re-authentication identity");
            self.reauth_id.clone().unwrap_or_default()
        } else {
            self.eap_identity.clone()
        };

        let response = self.plain_response(
            packet.identifier,
            SimAkaSubtype::AkaIdentity,
            vec![SimAkaAttribute::Identity(identity.clone())],
        );

        Ok((
            SimAkaState::Identity {
                identity: Some(identity),
            },
            response,
        ))
    }

    fn handle_start_request(
        &mut self,
        packet: &EapPacket,
        type_data: &SimAkaTypeData,
        services: &SessionServices,
        previous_identity: Option<Vec<u8>>,
    ) -> Result<(SimAkaState, MethodResult), EapError> {
        let Some(version_list) = type_data.version_list().map(<[u16]>::to_vec) else {
            return Ok((
                SimAkaState::Start {
                    context: None,
                    identity: previous_identity,
                },
                self.client_error(packet.identifier, CLIENT_ERROR_UNABLE_TO_PROCESS),
            ));
        };

        if !version_list.contains(&EAP_SIM_VERSION_1) {
            return Ok((
                SimAkaState::Final,
                self.client_error(packet.identifier, CLIENT_ERROR_UNSUPPORTED_VERSION),
            ));
        }

        let mut nonce_mt = [0u8; 16];
        services.fill_random(&mut nonce_mt);

        let mut attributes = vec![
            SimAkaAttribute::NonceMt(nonce_mt),
            SimAkaAttribute::SelectedVersion(EAP_SIM_VERSION_1),
        ];

        let wants_identity = type_data.contains(EAP_AT_PERMANENT_ID_REQ)
            || type_data.contains(EAP_AT_ANY_ID_REQ)
            || type_data.contains(EAP_AT_FULLAUTH_ID_REQ);
        let identity = if wants_identity {
            attributes.push(SimAkaAttribute::Identity(self.eap_identity.clone()));
            Some(self.eap_identity.clone())
        } else {
            previous_identity
        };

        let response = self.plain_response(packet.identifier, SimAkaSubtype::SimStart, attributes);

        Ok((
            SimAkaState::Start {
                context: Some(SimStartContext {
                    nonce_mt,
                    version_list,
                    selected_version: EAP_SIM_VERSION_1,
                }),
                identity,
            },
            response,
        ))
    }

    // ------------------------------------------------------------------
    // Challenge round
    // ------------------------------------------------------------------

    fn handle_challenge(
        &mut self,
        packet: &EapPacket,
        type_data: &SimAkaTypeData,
        services: &SessionServices,
        mut data: ChallengeData,
    ) -> Result<(SimAkaState, MethodResult), EapError> {
        if !self.valid_challenge_attributes(type_data) {
            return Ok((
                SimAkaState::Challenge(data),
                self.client_error(packet.identifier, CLIENT_ERROR_UNABLE_TO_PROCESS),
            ));
        }

        if self.keys.is_derived() {
            return Err(EapError::ProtocolViolation(
                "challenge repeated after key material was derived",
            ));
        }

        // Run the variant-specific credential exchange and key derivation
        let response_attributes: Vec<SimAkaAttribute>;
        let response_mac_extra: Vec<u8>;

        match self.variant {
            SimAkaVariant::Sim => {
                // A challenge is only processable after a start round
                let (Some(context), Some(rands)) = (&data.sim, type_data.rand_sim()) else {
                    return Ok((
                        SimAkaState::Final,
                        self.client_error(packet.identifier, CLIENT_ERROR_UNABLE_TO_PROCESS),
                    ));
                };
                let rands = rands.to_vec();

                if !rands_are_distinct(&rands) {
                    return Ok((
                        SimAkaState::Final,
                        self.client_error(packet.identifier, CLIENT_ERROR_STALE_RANDS),
                    ));
                }

                let mut kc_all = Vec::with_capacity(rands.len() * 8);
                let mut sres_all = Vec::with_capacity(rands.len() * 4);
                for rand in &rands {
                    let SimChallengeOutcome { sres, kc } = services
                        .credential_source()?
                        .authenticate_sim(rand)
                        .map_err(|e| EapError::Credential(e.to_string()))?;
                    kc_all.extend_from_slice(&kc);
                    sres_all.extend_from_slice(&sres);
                }

                self.keys = derive_sim_aka_keys(&sim_mk_input(
                    &data.identity,
                    &kc_all,
                    &context.nonce_mt,
                    &context.version_list,
                    context.selected_version,
                ));

                response_attributes = Vec::new();
                response_mac_extra = sres_all;
            }
            SimAkaVariant::Aka | SimAkaVariant::AkaPrime => {
                let (Some(&rand), Some(&autn)) = (type_data.rand_aka(), type_data.autn()) else {
                    return Ok((
                        SimAkaState::Challenge(data),
                        self.client_error(packet.identifier, CLIENT_ERROR_UNABLE_TO_PROCESS),
                    ));
                };

                // AKA' KDF negotiation and network-name policy
                let server_network_name = if self.variant == SimAkaVariant::AkaPrime {
                    let config = self.aka_prime_config.clone().ok_or(EapError::Config(
                        "AKA' selected without an AKA' configuration",
                    ))?;
                    let Some(server_name) = type_data.kdf_input().map(<[u8]>::to_vec) else {
                        return Ok((
                            SimAkaState::Challenge(data),
                            self.client_error(
                                packet.identifier,
                                CLIENT_ERROR_UNABLE_TO_PROCESS,
                            ),
                        ));
                    };
                    if aka_prime::validate_kdf(&type_data.kdf_list())
                        == aka_prime::KdfValidation::Rejected
                    {
                        return Ok((
                            SimAkaState::Final,
                            self.authentication_reject(packet.identifier),
                        ));
                    }
                    aka_prime::check_network_names(
                        &config.network_name,
                        &server_name,
                        config.allow_mismatched_network_names,
                    )?;
                    Some(server_name)
                } else {
                    None
                };

                let outcome = services.credential_source()?.authenticate_aka(&rand, &autn);
                let (res, ck, ik) = match outcome {
                    Ok(AkaChallengeOutcome::Accepted { res, ck, ik }) => {
                        data.sync_failures = 0;
                        (res, ck, ik)
                    }
                    Ok(AkaChallengeOutcome::SynchronizationFailure { auts }) => {
                        if data.sync_failures >= 1 {
                            return Err(EapError::AuthenticationFailure(
                                "second consecutive synchronization failure",
                            ));
                        }
                        data.sync_failures += 1;
                        debug!("synchronization failure, sending AUTS for one retry");
                        let response = self.plain_response(
                            packet.identifier,
                            SimAkaSubtype::AkaSynchronizationFailure,
                            vec![SimAkaAttribute::Auts(auts)],
                        );
                        return Ok((SimAkaState::Challenge(data), response));
                    }
                    Err(CredentialError::AutnRejected) => {
                        debug!("credential source rejected AUTN");
                        return Ok((
                            SimAkaState::Final,
                            self.authentication_reject(packet.identifier),
                        ));
                    }
                    Err(error) => return Err(EapError::Credential(error.to_string())),
                };

                let (ck, ik): (&[u8; 16], &[u8; 16]) = (
                    ck.as_slice().try_into().map_err(|_| {
                        EapError::Credential("credential source returned a malformed CK".into())
                    })?,
                    ik.as_slice().try_into().map_err(|_| {
                        EapError::Credential("credential source returned a malformed IK".into())
                    })?,
                );

                self.keys = match self.variant {
                    SimAkaVariant::AkaPrime => aka_prime::derive_keys(
                        &data.identity,
                        ck,
                        ik,
                        &autn,
                        server_network_name.as_deref().unwrap_or_default(),
                    ),
                    _ => derive_sim_aka_keys(&aka_mk_input(&data.identity, ik, ck)),
                };

                response_attributes = vec![SimAkaAttribute::Res {
                    bits: (res.len() * 8) as u16,
                    res,
                }];
                response_mac_extra = Vec::new();
            }
        }

        // No attribute may be trusted before the MAC checks out
        self.verify_mac(packet, type_data, &self.challenge_request_mac_extra(&data))?;

        // Bidding-down protection: an AKA server advertising AKA' support
        // while we also support AKA' means a downgrade is in progress
        if self.variant == SimAkaVariant::Aka
            && self.supports_aka_prime
            && type_data.bidding_supports_aka_prime() == Some(true)
        {
            warn!("potential bidding-down attack, rejecting AKA challenge");
            return Ok((
                SimAkaState::Final,
                self.authentication_reject(packet.identifier),
            ));
        }

        // Encrypted attributes are advisory here; a failed decrypt means
        // no re-auth identity was issued
        data.next_reauth_id = self.secured_attributes(type_data).and_then(|attributes| {
            attributes.iter().find_map(|attribute| match attribute {
                SimAkaAttribute::NextReauthId(id) => Some(id.clone()),
                _ => None,
            })
        });

        data.had_successful_challenge = true;

        let response = self.response_with_mac(
            packet.identifier,
            self.challenge_subtype(),
            response_attributes,
            &response_mac_extra,
        );

        Ok((SimAkaState::Challenge(data), response))
    }

    /// Extra bytes appended to the MAC input of a challenge request:
    /// NONCE_MT for SIM (RFC 4186 Section 9.3), nothing for AKA/AKA'
    fn challenge_request_mac_extra(&self, data: &ChallengeData) -> Vec<u8> {
        match &data.sim {
            Some(context) => context.nonce_mt.to_vec(),
            None => Vec::new(),
        }
    }

    fn valid_challenge_attributes(&self, type_data: &SimAkaTypeData) -> bool {
        match self.variant {
            SimAkaVariant::Sim => {
                type_data.rand_sim().is_some() && type_data.contains(EAP_AT_MAC)
            }
            SimAkaVariant::Aka => {
                type_data.rand_aka().is_some()
                    && type_data.contains(EAP_AT_AUTN)
                    && type_data.contains(EAP_AT_MAC)
            }
            SimAkaVariant::AkaPrime => {
                type_data.rand_aka().is_some()
                    && type_data.contains(EAP_AT_AUTN)
                    && type_data.contains(EAP_AT_MAC)
            }
        }
    }

    // ------------------------------------------------------------------
    // Fast re-authentication
    // ------------------------------------------------------------------

    fn handle_reauth(
        &mut self,
        packet: &EapPacket,
        type_data: &SimAkaTypeData,
        services: &SessionServices,
        mut data: ReauthData,
    ) -> Result<(SimAkaState, MethodResult), EapError> {
        if !valid_reauth_attributes(type_data) {
            return Ok((
                SimAkaState::Reauth(data),
                self.client_error(packet.identifier, CLIENT_ERROR_UNABLE_TO_PROCESS),
            ));
        }

        let Some(info) = data.info.take() else {
            debug!("re-authentication requested but no cached credentials exist");
            return Ok((
                SimAkaState::Reauth(data),
                self.client_error(packet.identifier, CLIENT_ERROR_UNABLE_TO_PROCESS),
            ));
        };

        // Restore the full-auth key hierarchy from the cache
        self.keys.mk = info.mk.clone();
        self.keys.k_encr = info.k_encr.clone();
        self.keys.k_aut = info.k_aut.clone();

        self.verify_mac(packet, type_data, &[])?;

        // The counter and server nonce only exist inside the encrypted
        // block; losing them is fatal for a re-authentication
        let secured = self.secured_attributes(type_data).ok_or(
            EapError::AuthenticationFailure(
                "re-authentication counter could not be recovered",
            ),
        )?;

        let mut counter = None;
        let mut nonce_s = None;
        for attribute in &secured {
            match attribute {
                SimAkaAttribute::Counter(value) => counter = Some(*value),
                SimAkaAttribute::NonceS(value) => nonce_s = Some(*value),
                SimAkaAttribute::NextReauthId(id) => data.next_reauth_id = Some(id.clone()),
                _ => {}
            }
        }
        let (counter, nonce_s) = match (counter, nonce_s) {
            (Some(counter), Some(nonce_s)) => (counter, nonce_s),
            _ => {
                return Err(EapError::AuthenticationFailure(
                    "re-authentication counter could not be recovered",
                ))
            }
        };

        if counter <= info.counter {
            debug!(counter, cached = info.counter, "re-authentication counter too small");
            let response = self.encrypted_response(
                packet.identifier,
                SimAkaSubtype::Reauthentication,
                vec![
                    SimAkaAttribute::Counter(counter),
                    SimAkaAttribute::CounterTooSmall,
                ],
                &nonce_s,
                services,
            )?;
            data.info = Some(info);
            return Ok((SimAkaState::Reauth(data), response));
        }

        // XKEY' = SHA1(Identity | counter | NONCE_S | MK), expanded into
        // fresh MSK/EMSK; K_encr/K_aut carry over from the full challenge
        let mut sha1 = Sha1::new();
        sha1.update(&data.reauth_identity);
        sha1.update(counter.to_be_bytes());
        sha1.update(nonce_s);
        sha1.update(&info.mk);
        let xkey: [u8; 20] = sha1.finalize().into();

        let stream = fips_186_2_prf(&xkey, MSK_LEN + EMSK_LEN);
        self.keys.msk = stream[..MSK_LEN].to_vec();
        self.keys.emsk = stream[MSK_LEN..].to_vec();

        data.counter = counter;
        data.had_successful_reauth = true;

        let response = self.encrypted_response(
            packet.identifier,
            SimAkaSubtype::Reauthentication,
            vec![SimAkaAttribute::Counter(counter)],
            &nonce_s,
            services,
        )?;

        data.info = Some(info);
        Ok((SimAkaState::Reauth(data), response))
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    fn handle_notification(
        &mut self,
        packet: &EapPacket,
        type_data: &SimAkaTypeData,
        services: &SessionServices,
    ) -> Result<MethodResult, EapError> {
        if self.notification_seen {
            return Err(EapError::ProtocolViolation(
                "second notification within one session",
            ));
        }
        self.notification_seen = true;

        let Some(code) = type_data.notification_code() else {
            return Ok(self.client_error(packet.identifier, CLIENT_ERROR_UNABLE_TO_PROCESS));
        };

        let pre_challenge = code & NOTIFICATION_P_BIT != 0;
        let authenticated = self.server_authenticated();

        if pre_challenge {
            // P=1 notifications carry no MAC and are only meaningful
            // before the challenge round completed (RFC 4187 Section 6.1)
            if authenticated || type_data.contains(EAP_AT_MAC) {
                return Ok(self.client_error(packet.identifier, CLIENT_ERROR_UNABLE_TO_PROCESS));
            }
            debug!(code, "echoing pre-challenge notification");
            return Ok(self.plain_response(
                packet.identifier,
                SimAkaSubtype::Notification,
                Vec::new(),
            ));
        }

        // P=0: only valid after a successful challenge, and always MAC'd
        if !authenticated {
            return Ok(self.client_error(packet.identifier, CLIENT_ERROR_UNABLE_TO_PROCESS));
        }
        self.verify_mac(packet, type_data, &[])?;

        // A notification following a re-authentication must echo the
        // matching counter from its encrypted block
        if let SimAkaState::Reauth(data) = &self.state {
            let expected = data.counter;
            let counter = self.secured_attributes(type_data).and_then(|attributes| {
                attributes.iter().find_map(|attribute| match attribute {
                    SimAkaAttribute::Counter(value) => Some(*value),
                    _ => None,
                })
            });

            if counter != Some(expected) {
                debug!(?counter, expected, "notification counter mismatch");
                return Ok(self.client_error(packet.identifier, CLIENT_ERROR_UNABLE_TO_PROCESS));
            }

            return self.encrypted_response(
                packet.identifier,
                SimAkaSubtype::Notification,
                vec![SimAkaAttribute::Counter(expected)],
                &[],
                services,
            );
        }

        Ok(self.response_with_mac(
            packet.identifier,
            SimAkaSubtype::Notification,
            Vec::new(),
            &[],
        ))
    }

    fn server_authenticated(&self) -> bool {
        match &self.state {
            SimAkaState::Challenge(data) => data.had_successful_challenge,
            SimAkaState::Reauth(data) => data.had_successful_reauth,
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // MAC handling and response builders
    // ------------------------------------------------------------------

    /// Recompute the MAC over the request with its MAC field zeroed plus
    /// method-specific extra data, and compare byte-for-byte
    fn verify_mac(
        &self,
        packet: &EapPacket,
        type_data: &SimAkaTypeData,
        extra: &[u8],
    ) -> Result<(), EapError> {
        let Some(received) = type_data.mac() else {
            return Err(EapError::AuthenticationFailure("AT_MAC missing"));
        };

        let message = EapPacket::new(
            EapCode::Request,
            packet.identifier,
            Some(self.method_type()),
            type_data.encode_with_zeroed_mac(),
        )
        .to_bytes();

        let computed = self.compute_mac(&message, extra);
        if &computed != received {
            return Err(EapError::AuthenticationFailure("AT_MAC mismatch"));
        }
        Ok(())
    }

    fn compute_mac(&self, message: &[u8], extra: &[u8]) -> [u8; MAC_LEN] {
        match self.variant {
            SimAkaVariant::AkaPrime => hmac_sha256_128(&self.keys.k_aut, message, extra),
            _ => hmac_sha1_128(&self.keys.k_aut, message, extra),
        }
    }

    /// Build a response without a MAC
    fn plain_response(
        &self,
        identifier: u8,
        subtype: SimAkaSubtype,
        attributes: Vec<SimAkaAttribute>,
    ) -> MethodResult {
        let type_data = SimAkaTypeData::new(subtype, attributes);
        MethodResult::Response(
            EapPacket::method_response(identifier, self.method_type(), type_data.encode())
                .to_bytes(),
        )
    }

    /// Build a response whose AT_MAC covers the full response packet plus
    /// `extra`
    fn response_with_mac(
        &self,
        identifier: u8,
        subtype: SimAkaSubtype,
        mut attributes: Vec<SimAkaAttribute>,
        extra: &[u8],
    ) -> MethodResult {
        attributes.push(SimAkaAttribute::Mac([0u8; MAC_LEN]));
        let type_data = SimAkaTypeData::new(subtype, attributes);
        let message =
            EapPacket::method_response(identifier, self.method_type(), type_data.encode())
                .to_bytes();
        let mac = self.compute_mac(&message, extra);

        let mut attributes = type_data.attributes;
        if let Some(last) = attributes.last_mut() {
            *last = SimAkaAttribute::Mac(mac);
        }
        let type_data = SimAkaTypeData::new(subtype, attributes);
        MethodResult::Response(
            EapPacket::method_response(identifier, self.method_type(), type_data.encode())
                .to_bytes(),
        )
    }

    /// Build a MAC'd response carrying encrypted attributes under
    /// AT_IV/AT_ENCR_DATA
    fn encrypted_response(
        &self,
        identifier: u8,
        subtype: SimAkaSubtype,
        secured: Vec<SimAkaAttribute>,
        mac_extra: &[u8],
        services: &SessionServices,
    ) -> Result<MethodResult, EapError> {
        let mut iv = [0u8; BLOCK_SIZE];
        services.fill_random(&mut iv);

        let mut plaintext = encode_attribute_list(&secured);
        let remainder = plaintext.len() % BLOCK_SIZE;
        if remainder != 0 {
            // Attributes are 4-byte aligned, so the gap is 4, 8 or 12
            // bytes, exactly the AT_PADDING range
            plaintext.extend_from_slice(&encode_attribute_list(&[SimAkaAttribute::Padding(
                BLOCK_SIZE - remainder,
            )]));
        }

        let ciphertext = encrypt_encr_data(&self.keys.k_encr, &iv, &plaintext)
            .ok_or(EapError::AuthenticationFailure(
                "cannot encrypt attributes without derived keys",
            ))?;

        Ok(self.response_with_mac(
            identifier,
            subtype,
            vec![
                SimAkaAttribute::Iv(iv),
                SimAkaAttribute::EncrData(ciphertext),
            ],
            mac_extra,
        ))
    }

    /// Decrypt and parse AT_ENCR_DATA if present and well-formed
    fn secured_attributes(&self, type_data: &SimAkaTypeData) -> Option<Vec<SimAkaAttribute>> {
        let iv = type_data.iv()?;
        let ciphertext = type_data.encr_data()?;
        let plaintext = decrypt_encr_data(&self.keys.k_encr, iv, ciphertext)?;
        match decode_attribute_list(&plaintext) {
            Ok(attributes) => Some(attributes),
            Err(error) => {
                debug!(%error, "discarding undecodable encrypted attributes");
                None
            }
        }
    }

    fn client_error(&self, identifier: u8, code: u16) -> MethodResult {
        self.plain_response(
            identifier,
            SimAkaSubtype::ClientError,
            vec![SimAkaAttribute::ClientErrorCode(code)],
        )
    }

    fn authentication_reject(&self, identifier: u8) -> MethodResult {
        self.plain_response(identifier, SimAkaSubtype::AkaAuthenticationReject, Vec::new())
    }
}

/// Identity requests must carry exactly one ID-request attribute and no
/// MAC/IV/encrypted data (RFC 4187 Section 9.2)
fn valid_identity_attributes(type_data: &SimAkaTypeData) -> bool {
    let id_requests = [
        EAP_AT_PERMANENT_ID_REQ,
        EAP_AT_ANY_ID_REQ,
        EAP_AT_FULLAUTH_ID_REQ,
    ]
    .iter()
    .filter(|attr| type_data.contains(**attr))
    .count();

    id_requests == 1
        && !type_data.contains(EAP_AT_MAC)
        && !type_data.contains(EAP_AT_IV)
        && !type_data.contains(EAP_AT_ENCR_DATA)
}

/// Re-authentication requests must carry AT_IV, AT_ENCR_DATA and AT_MAC
/// (RFC 4187 Section 9.8)
fn valid_reauth_attributes(type_data: &SimAkaTypeData) -> bool {
    type_data.contains(EAP_AT_IV)
        && type_data.contains(EAP_AT_ENCR_DATA)
        && type_data.contains(EAP_AT_MAC)
}

fn rands_are_distinct(rands: &[[u8; 16]]) -> bool {
    for (i, rand) in rands.iter().enumerate() {
        if rands[i + 1..].contains(rand) {
            return false;
        }
    }
    true
}

/// MK input for AKA: Identity | IK | CK (RFC 4187 Section 7)
fn aka_mk_input(identity: &[u8], ik: &[u8; 16], ck: &[u8; 16]) -> Vec<u8> {
    let mut input = Vec::with_capacity(identity.len() + 32);
    input.extend_from_slice(identity);
    input.extend_from_slice(ik);
    input.extend_from_slice(ck);
    input
}

/// MK input for SIM: Identity | n*Kc | NONCE_MT | Version List | Selected
/// Version (RFC 4186 Section 7)
fn sim_mk_input(
    identity: &[u8],
    kc_all: &[u8],
    nonce_mt: &[u8; 16],
    version_list: &[u16],
    selected_version: u16,
) -> Vec<u8> {
    let mut input = Vec::new();
    input.extend_from_slice(identity);
    input.extend_from_slice(kc_all);
    input.extend_from_slice(nonce_mt);
    for version in version_list {
        input.extend_from_slice(&version.to_be_bytes());
    }
    input.extend_from_slice(&selected_version.to_be_bytes());
    input
}

/// MK = SHA1(input), expanded through the FIPS 186-2 PRF into
/// K_encr | K_aut | MSK | EMSK (RFC 4187 Section 7)
fn derive_sim_aka_keys(mk_input: &[u8]) -> SimAkaKeys {
    let mut sha1 = Sha1::new();
    sha1.update(mk_input);
    let mk: [u8; 20] = sha1.finalize().into();

    let stream = fips_186_2_prf(&mk, K_ENCR_LEN + K_AUT_LEN + MSK_LEN + EMSK_LEN);

    let mut offset = 0;
    let mut take = |len: usize| {
        let part = stream[offset..offset + len].to_vec();
        offset += len;
        part
    };

    SimAkaKeys {
        mk: mk.to_vec(),
        k_encr: take(K_ENCR_LEN),
        k_aut: take(K_AUT_LEN),
        k_re: Vec::new(),
        msk: take(MSK_LEN),
        emsk: take(EMSK_LEN),
    }
}
