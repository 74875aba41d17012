//! End-to-end EAP session tests driving the public API with raw packet
//! bytes, the way a transport would.

use eap_peer::{
    AkaChallengeOutcome, AkaConfig, CredentialError, EapOutcome, EapSession, MsChapV2Config,
    SessionConfig, SessionServices, SimAkaCredentialSource, SimChallengeOutcome,
};
use eap_proto::mschapv2::{ChallengeRequest, ChallengeResponse, SuccessRequest, OP_SUCCESS};
use eap_proto::simaka::{SimAkaSubtype, SimAkaTypeData};
use eap_proto::{EapCode, EapMethodType, EapPacket};

// RFC 2759 Section 9.2 vectors
const USERNAME: &str = "User";
const PASSWORD: &str = "clientPass";
const AUTHENTICATOR_CHALLENGE: [u8; 16] = [
    0x5B, 0x5D, 0x7C, 0x7D, 0x7B, 0x3F, 0x2F, 0x3E, 0x3C, 0x2C, 0x60, 0x21, 0x32, 0x26, 0x26,
    0x28,
];
const PEER_CHALLENGE: [u8; 16] = [
    0x21, 0x40, 0x23, 0x24, 0x25, 0x5E, 0x26, 0x2A, 0x28, 0x29, 0x5F, 0x2B, 0x3A, 0x33, 0x7C,
    0x7E,
];

/// Deterministic random source: hands out the provided bytes
struct FixedRng(Vec<u8>);

impl rand::RngCore for FixedRng {
    fn next_u32(&mut self) -> u32 {
        0
    }
    fn next_u64(&mut self) -> u64 {
        0
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let n = dest.len().min(self.0.len());
        dest[..n].copy_from_slice(&self.0[..n]);
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

fn response_packet(outcome: EapOutcome) -> EapPacket {
    match outcome {
        EapOutcome::Response(bytes) => EapPacket::from_bytes(&bytes).unwrap(),
        other => panic!("expected a response, got {:?}", other),
    }
}

// ---------------------------------------------------------------------
// MSCHAPv2: Created -> Identity -> Method happy path with RFC vectors
// ---------------------------------------------------------------------

fn mschapv2_session() -> EapSession {
    let config = SessionConfig::builder()
        .identity(b"user@example.org".to_vec())
        .mschapv2(MsChapV2Config::new(USERNAME, PASSWORD))
        .build();
    let services = SessionServices::builder()
        .rng(FixedRng(PEER_CHALLENGE.to_vec()))
        .build();
    EapSession::new(config, services)
}

#[test]
fn test_mschapv2_end_to_end_matches_rfc2759_vectors() {
    let mut session = mschapv2_session();

    // Identity exchange
    let identity_request =
        EapPacket::new(EapCode::Request, 1, Some(EapMethodType::Identity), Vec::new());
    let response = response_packet(session.process(&identity_request.to_bytes()).unwrap());
    assert_eq!(response.method_type, Some(EapMethodType::Identity));
    assert_eq!(response.type_data, b"user@example.org");

    // Server challenge
    let challenge = ChallengeRequest {
        mschapv2_id: 0x1A,
        challenge: AUTHENTICATOR_CHALLENGE,
        name: b"authenticator".to_vec(),
    };
    let challenge_request = EapPacket::new(
        EapCode::Request,
        2,
        Some(EapMethodType::MsChapV2),
        challenge.encode(),
    );
    let response = response_packet(session.process(&challenge_request.to_bytes()).unwrap());
    let challenge_response = ChallengeResponse::decode(&response.type_data).unwrap();

    // NT-Response reproduces the published vector byte-for-byte
    let expected_nt_response =
        hex::decode("82309ECD8D708B5EA08FAA3981CD83544233114A3D85D6DF").unwrap();
    assert_eq!(challenge_response.nt_response.len(), 24);
    assert_eq!(&challenge_response.nt_response[..], &expected_nt_response[..]);
    assert_eq!(challenge_response.peer_challenge, PEER_CHALLENGE);
    assert_eq!(challenge_response.mschapv2_id, 0x1A);

    // Server success request with the published authenticator response
    let success_request = SuccessRequest {
        mschapv2_id: 0x1A,
        auth_bytes: hex::decode("407A5589115FD0D6209F510FE9C04566932CDA56")
            .unwrap()
            .try_into()
            .unwrap(),
        message: "Welcome".to_string(),
    };
    let packet = EapPacket::new(
        EapCode::Request,
        3,
        Some(EapMethodType::MsChapV2),
        success_request.encode(),
    );
    let response = response_packet(session.process(&packet.to_bytes()).unwrap());
    assert_eq!(response.type_data, vec![OP_SUCCESS]);

    // Outer EAP-Success releases the MSK: send key + receive key padded
    // to 64 bytes, and an all-zero EMSK
    let eap_success = EapPacket::new(EapCode::Success, 4, None, Vec::new());
    let outcome = session.process(&eap_success.to_bytes()).unwrap();
    let EapOutcome::Success(keys) = outcome else {
        panic!("expected success");
    };
    assert_eq!(keys.msk.len(), 64);
    assert_eq!(keys.emsk, vec![0u8; 64]);
    let expected_send_key = hex::decode("8B7CDC149B993A1BA118CB153F56DCCB").unwrap();
    assert_eq!(&keys.msk[..16], &expected_send_key[..]);
    assert_eq!(&keys.msk[32..], &[0u8; 32][..]);
}

#[test]
fn test_mschapv2_bad_authenticator_fails() {
    let mut session = mschapv2_session();

    let challenge = ChallengeRequest {
        mschapv2_id: 0x1A,
        challenge: AUTHENTICATOR_CHALLENGE,
        name: Vec::new(),
    };
    let packet = EapPacket::new(
        EapCode::Request,
        1,
        Some(EapMethodType::MsChapV2),
        challenge.encode(),
    );
    session.process(&packet.to_bytes()).unwrap();

    let success_request = SuccessRequest {
        mschapv2_id: 0x1A,
        auth_bytes: [0u8; 20],
        message: String::new(),
    };
    let packet = EapPacket::new(
        EapCode::Request,
        2,
        Some(EapMethodType::MsChapV2),
        success_request.encode(),
    );
    let outcome = session.process(&packet.to_bytes()).unwrap();
    assert!(matches!(outcome, EapOutcome::Failure));

    // Terminal: nothing further is accepted
    let packet = EapPacket::new(EapCode::Success, 3, None, Vec::new());
    assert!(session.process(&packet.to_bytes()).is_err());
}

// ---------------------------------------------------------------------
// Method negotiation
// ---------------------------------------------------------------------

#[test]
fn test_unconfigured_method_answered_with_nak_then_renegotiated() {
    let mut session = mschapv2_session();

    // Server proposes EAP-AKA; only MSCHAPv2 is configured
    let aka_request = EapPacket::new(
        EapCode::Request,
        1,
        Some(EapMethodType::Aka),
        vec![1, 0, 0],
    );
    let response = response_packet(session.process(&aka_request.to_bytes()).unwrap());
    assert_eq!(response.method_type, Some(EapMethodType::Nak));
    assert_eq!(response.type_data, vec![EapMethodType::MsChapV2.as_u8()]);

    // Server retries with MSCHAPv2 and the conversation proceeds
    let challenge = ChallengeRequest {
        mschapv2_id: 0x01,
        challenge: AUTHENTICATOR_CHALLENGE,
        name: Vec::new(),
    };
    let packet = EapPacket::new(
        EapCode::Request,
        2,
        Some(EapMethodType::MsChapV2),
        challenge.encode(),
    );
    let response = response_packet(session.process(&packet.to_bytes()).unwrap());
    assert_eq!(response.method_type, Some(EapMethodType::MsChapV2));
}

// ---------------------------------------------------------------------
// EAP-AKA flows that do not require MAC-valid server messages
// ---------------------------------------------------------------------

struct ScriptedAkaSource {
    outcomes: std::sync::Mutex<Vec<Result<AkaChallengeOutcome, CredentialError>>>,
}

impl ScriptedAkaSource {
    fn new(outcomes: Vec<Result<AkaChallengeOutcome, CredentialError>>) -> Self {
        ScriptedAkaSource {
            outcomes: std::sync::Mutex::new(outcomes),
        }
    }
}

impl SimAkaCredentialSource for ScriptedAkaSource {
    fn authenticate_aka(
        &self,
        _rand: &[u8; 16],
        _autn: &[u8; 16],
    ) -> Result<AkaChallengeOutcome, CredentialError> {
        self.outcomes.lock().unwrap().remove(0)
    }

    fn authenticate_sim(&self, _rand: &[u8; 16]) -> Result<SimChallengeOutcome, CredentialError> {
        Err(CredentialError::Unavailable("not a SIM test".into()))
    }
}

fn aka_session(source: ScriptedAkaSource) -> EapSession {
    let config = SessionConfig::builder()
        .identity(b"0123456789012345@nai.epc.example".to_vec())
        .aka(AkaConfig::default())
        .build();
    let services = SessionServices::builder().credential_source(source).build();
    EapSession::new(config, services)
}

fn aka_challenge_bytes(identifier: u8) -> Vec<u8> {
    // AKA-Challenge with AT_RAND, AT_AUTN and a placeholder AT_MAC; the
    // scripted flows below return before MAC verification
    let mut type_data = vec![1, 0, 0];
    type_data.extend_from_slice(&[1, 5, 0, 0]); // AT_RAND
    type_data.extend_from_slice(&[0x11; 16]);
    type_data.extend_from_slice(&[2, 5, 0, 0]); // AT_AUTN
    type_data.extend_from_slice(&[0x22; 16]);
    type_data.extend_from_slice(&[11, 5, 0, 0]); // AT_MAC
    type_data.extend_from_slice(&[0x33; 16]);

    EapPacket::new(EapCode::Request, identifier, Some(EapMethodType::Aka), type_data).to_bytes()
}

#[test]
fn test_aka_synchronization_failure_then_fatal() {
    let source = ScriptedAkaSource::new(vec![
        Ok(AkaChallengeOutcome::SynchronizationFailure { auts: [0x5A; 14] }),
        Ok(AkaChallengeOutcome::SynchronizationFailure { auts: [0x5B; 14] }),
    ]);
    let mut session = aka_session(source);

    let response = response_packet(session.process(&aka_challenge_bytes(1)).unwrap());
    let type_data = SimAkaTypeData::decode(&response.type_data).unwrap();
    assert_eq!(type_data.subtype, SimAkaSubtype::AkaSynchronizationFailure);

    // One retry is allowed; the second consecutive failure is fatal
    assert!(session.process(&aka_challenge_bytes(2)).is_err());
}

#[test]
fn test_aka_autn_rejection_sends_authentication_reject() {
    let source = ScriptedAkaSource::new(vec![Err(CredentialError::AutnRejected)]);
    let mut session = aka_session(source);

    let response = response_packet(session.process(&aka_challenge_bytes(1)).unwrap());
    let type_data = SimAkaTypeData::decode(&response.type_data).unwrap();
    assert_eq!(type_data.subtype, SimAkaSubtype::AkaAuthenticationReject);
}

// ---------------------------------------------------------------------
// Outer dispatcher rules
// ---------------------------------------------------------------------

#[test]
fn test_notification_echoed_at_any_phase() {
    let mut session = mschapv2_session();

    let notification = EapPacket::new(
        EapCode::Request,
        9,
        Some(EapMethodType::Notification),
        b"system notice".to_vec(),
    );
    let response = response_packet(session.process(&notification.to_bytes()).unwrap());
    assert_eq!(response.method_type, Some(EapMethodType::Notification));
    assert!(response.type_data.is_empty());

    // The phase did not move: an identity request still works
    let identity_request =
        EapPacket::new(EapCode::Request, 10, Some(EapMethodType::Identity), Vec::new());
    let response = response_packet(session.process(&identity_request.to_bytes()).unwrap());
    assert_eq!(response.method_type, Some(EapMethodType::Identity));
}

#[test]
fn test_premature_success_is_nonretryable_error() {
    let mut session = mschapv2_session();

    let success = EapPacket::new(EapCode::Success, 1, None, Vec::new());
    assert!(session.process(&success.to_bytes()).is_err());

    // The session is terminal afterwards
    let identity_request =
        EapPacket::new(EapCode::Request, 2, Some(EapMethodType::Identity), Vec::new());
    assert!(session.process(&identity_request.to_bytes()).is_err());
}

#[test]
fn test_malformed_packet_is_terminal_decode_error() {
    let mut session = mschapv2_session();

    // Truncated header
    assert!(session.process(&[0x01, 0x02]).is_err());
}
