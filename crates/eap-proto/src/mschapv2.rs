//! EAP-MSCHAPv2 Type Data Support
//!
//! This module implements the EAP-MSCHAPv2 packet formats defined in
//! draft-kamath-pppext-eap-mschapv2-02, carrying the MSCHAPv2 exchange of
//! RFC 2759 inside EAP.
//!
//! # Request/Response Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    OpCode     |  MS-CHAPv2-ID |           MS-Length           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Value-Size   |  Value ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Success and Failure *responses* are a single OpCode byte.

use thiserror::Error;

/// MSCHAPv2 op codes
pub const OP_CHALLENGE: u8 = 1;
pub const OP_RESPONSE: u8 = 2;
pub const OP_SUCCESS: u8 = 3;
pub const OP_FAILURE: u8 = 4;

/// Server challenge length (RFC 2759 Section 4)
pub const CHALLENGE_LEN: usize = 16;

/// Peer challenge length
pub const PEER_CHALLENGE_LEN: usize = 16;

/// NT-Response length
pub const NT_RESPONSE_LEN: usize = 24;

/// Authenticator response length: "S=" + 40 hex chars
const AUTH_STRING_HEX_LEN: usize = 40;

/// Challenge response Value-Size: peer challenge + 8 reserved +
/// NT-Response + flags
const RESPONSE_VALUE_SIZE: usize = PEER_CHALLENGE_LEN + 8 + NT_RESPONSE_LEN + 1;

/// Read the op code of a type-data buffer without fully decoding it
pub fn peek_op_code(bytes: &[u8]) -> Result<u8, MsChapV2Error> {
    bytes.first().copied().ok_or(MsChapV2Error::TypeDataTooShort(0))
}

/// MSCHAPv2 Challenge Request (server -> peer)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRequest {
    /// MS-CHAPv2-ID, echoed in the response
    pub mschapv2_id: u8,
    /// 16-byte authenticator challenge
    pub challenge: [u8; CHALLENGE_LEN],
    /// Server name (trailing bytes)
    pub name: Vec<u8>,
}

impl ChallengeRequest {
    /// Parse a Challenge Request from a type-data buffer
    pub fn decode(bytes: &[u8]) -> Result<Self, MsChapV2Error> {
        let (op_code, mschapv2_id, value) = decode_request_header(bytes)?;
        if op_code != OP_CHALLENGE {
            return Err(MsChapV2Error::UnexpectedOpCode(op_code));
        }
        if value.is_empty() || value[0] as usize != CHALLENGE_LEN {
            return Err(MsChapV2Error::InvalidValueSize(
                value.first().copied().unwrap_or(0),
            ));
        }
        if value.len() < 1 + CHALLENGE_LEN {
            return Err(MsChapV2Error::TypeDataTooShort(bytes.len()));
        }

        let mut challenge = [0u8; CHALLENGE_LEN];
        challenge.copy_from_slice(&value[1..1 + CHALLENGE_LEN]);

        Ok(ChallengeRequest {
            mschapv2_id,
            challenge,
            name: value[1 + CHALLENGE_LEN..].to_vec(),
        })
    }

    /// Encode to a type-data buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut value = Vec::with_capacity(1 + CHALLENGE_LEN + self.name.len());
        value.push(CHALLENGE_LEN as u8);
        value.extend_from_slice(&self.challenge);
        value.extend_from_slice(&self.name);
        encode_request(OP_CHALLENGE, self.mschapv2_id, &value)
    }
}

/// MSCHAPv2 Challenge Response (peer -> server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    /// MS-CHAPv2-ID from the matching request
    pub mschapv2_id: u8,
    /// 16-byte peer challenge
    pub peer_challenge: [u8; PEER_CHALLENGE_LEN],
    /// 24-byte NT-Response
    pub nt_response: [u8; NT_RESPONSE_LEN],
    /// Flags, reserved and must be zero
    pub flags: u8,
    /// Peer name
    pub name: Vec<u8>,
}

impl ChallengeResponse {
    /// Create a Challenge Response with zero flags
    pub fn new(
        mschapv2_id: u8,
        peer_challenge: [u8; PEER_CHALLENGE_LEN],
        nt_response: [u8; NT_RESPONSE_LEN],
        name: Vec<u8>,
    ) -> Self {
        ChallengeResponse {
            mschapv2_id,
            peer_challenge,
            nt_response,
            flags: 0,
            name,
        }
    }

    /// Parse a Challenge Response from a type-data buffer
    pub fn decode(bytes: &[u8]) -> Result<Self, MsChapV2Error> {
        let (op_code, mschapv2_id, value) = decode_request_header(bytes)?;
        if op_code != OP_RESPONSE {
            return Err(MsChapV2Error::UnexpectedOpCode(op_code));
        }
        if value.is_empty() || value[0] as usize != RESPONSE_VALUE_SIZE {
            return Err(MsChapV2Error::InvalidValueSize(
                value.first().copied().unwrap_or(0),
            ));
        }
        if value.len() < 1 + RESPONSE_VALUE_SIZE {
            return Err(MsChapV2Error::TypeDataTooShort(bytes.len()));
        }

        let mut peer_challenge = [0u8; PEER_CHALLENGE_LEN];
        peer_challenge.copy_from_slice(&value[1..17]);
        let mut nt_response = [0u8; NT_RESPONSE_LEN];
        nt_response.copy_from_slice(&value[25..49]);

        Ok(ChallengeResponse {
            mschapv2_id,
            peer_challenge,
            nt_response,
            flags: value[49],
            name: value[50..].to_vec(),
        })
    }

    /// Encode to a type-data buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut value = Vec::with_capacity(1 + RESPONSE_VALUE_SIZE + self.name.len());
        value.push(RESPONSE_VALUE_SIZE as u8);
        value.extend_from_slice(&self.peer_challenge);
        value.extend_from_slice(&[0u8; 8]); // reserved
        value.extend_from_slice(&self.nt_response);
        value.push(self.flags);
        value.extend_from_slice(&self.name);
        encode_request(OP_RESPONSE, self.mschapv2_id, &value)
    }
}

/// MSCHAPv2 Success Request (server -> peer)
///
/// Message form: `S=<40 uppercase hex chars>` optionally followed by
/// ` M=<message>` (RFC 2759 Section 5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessRequest {
    /// MS-CHAPv2-ID
    pub mschapv2_id: u8,
    /// Decoded 20-byte authenticator response
    pub auth_bytes: [u8; 20],
    /// Optional human-readable message
    pub message: String,
}

impl SuccessRequest {
    /// Parse a Success Request from a type-data buffer
    pub fn decode(bytes: &[u8]) -> Result<Self, MsChapV2Error> {
        let (op_code, mschapv2_id, value) = decode_request_header(bytes)?;
        if op_code != OP_SUCCESS {
            return Err(MsChapV2Error::UnexpectedOpCode(op_code));
        }

        let text = core::str::from_utf8(value).map_err(|_| MsChapV2Error::MalformedMessage)?;
        let rest = text.strip_prefix("S=").ok_or(MsChapV2Error::MalformedMessage)?;
        if rest.len() < AUTH_STRING_HEX_LEN {
            return Err(MsChapV2Error::MalformedMessage);
        }
        let (auth_hex, message) = rest.split_at(AUTH_STRING_HEX_LEN);

        let decoded = hex::decode(auth_hex).map_err(|_| MsChapV2Error::MalformedMessage)?;
        let mut auth_bytes = [0u8; 20];
        auth_bytes.copy_from_slice(&decoded);

        let message = match message.strip_prefix(" M=") {
            Some(m) => m.to_string(),
            None if message.is_empty() => String::new(),
            None => return Err(MsChapV2Error::MalformedMessage),
        };

        Ok(SuccessRequest {
            mschapv2_id,
            auth_bytes,
            message,
        })
    }

    /// Encode to a type-data buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut text = format!("S={}", hex::encode_upper(self.auth_bytes));
        if !self.message.is_empty() {
            text.push_str(" M=");
            text.push_str(&self.message);
        }
        encode_request(OP_SUCCESS, self.mschapv2_id, text.as_bytes())
    }
}

/// MSCHAPv2 Success Response (peer -> server): a single OpCode byte
pub fn success_response() -> Vec<u8> {
    vec![OP_SUCCESS]
}

/// MSCHAPv2 Failure Request (server -> peer)
///
/// Message form:
/// `E=eeeeeeeeee R=r C=<32 hex chars> V=vvvvvvvvvv M=<message>`
/// (RFC 2759 Section 6)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRequest {
    /// MS-CHAPv2-ID
    pub mschapv2_id: u8,
    /// Error code (E=)
    pub error_code: u32,
    /// Retry allowed flag (R=)
    pub is_retryable: bool,
    /// New challenge for a retry (C=)
    pub challenge: [u8; CHALLENGE_LEN],
    /// Password change protocol version (V=)
    pub password_change_protocol: u32,
    /// Human-readable message (M=)
    pub message: String,
}

/// Failure error codes (RFC 2759 Section 6)
pub const ERROR_RESTRICTED_LOGON_HOURS: u32 = 646;
pub const ERROR_ACCT_DISABLED: u32 = 647;
pub const ERROR_PASSWD_EXPIRED: u32 = 648;
pub const ERROR_NO_DIALIN_PERMISSION: u32 = 649;
pub const ERROR_AUTHENTICATION_FAILURE: u32 = 691;
pub const ERROR_CHANGING_PASSWORD: u32 = 709;

impl FailureRequest {
    /// Parse a Failure Request from a type-data buffer
    pub fn decode(bytes: &[u8]) -> Result<Self, MsChapV2Error> {
        let (op_code, mschapv2_id, value) = decode_request_header(bytes)?;
        if op_code != OP_FAILURE {
            return Err(MsChapV2Error::UnexpectedOpCode(op_code));
        }

        let text = core::str::from_utf8(value).map_err(|_| MsChapV2Error::MalformedMessage)?;

        let error_code: u32 = take_field(text, "E=")?
            .parse()
            .map_err(|_| MsChapV2Error::MalformedMessage)?;
        let is_retryable = match take_field(text, "R=")? {
            "0" => false,
            "1" => true,
            _ => return Err(MsChapV2Error::MalformedMessage),
        };
        let challenge_hex = take_field(text, "C=")?;
        if challenge_hex.len() != CHALLENGE_LEN * 2 {
            return Err(MsChapV2Error::MalformedMessage);
        }
        let decoded = hex::decode(challenge_hex).map_err(|_| MsChapV2Error::MalformedMessage)?;
        let mut challenge = [0u8; CHALLENGE_LEN];
        challenge.copy_from_slice(&decoded);

        let password_change_protocol: u32 = take_field(text, "V=")?
            .parse()
            .map_err(|_| MsChapV2Error::MalformedMessage)?;

        // M= runs to the end of the buffer and may contain spaces
        let message = match text.split_once("M=") {
            Some((_, m)) => m.to_string(),
            None => String::new(),
        };

        Ok(FailureRequest {
            mschapv2_id,
            error_code,
            is_retryable,
            challenge,
            password_change_protocol,
            message,
        })
    }

    /// Encode to a type-data buffer
    pub fn encode(&self) -> Vec<u8> {
        let text = format!(
            "E={} R={} C={} V={} M={}",
            self.error_code,
            if self.is_retryable { 1 } else { 0 },
            hex::encode_upper(self.challenge),
            self.password_change_protocol,
            self.message,
        );
        encode_request(OP_FAILURE, self.mschapv2_id, text.as_bytes())
    }
}

/// MSCHAPv2 Failure Response (peer -> server): a single OpCode byte
pub fn failure_response() -> Vec<u8> {
    vec![OP_FAILURE]
}

/// Extract a space-delimited `K=value` field from a failure message
fn take_field<'a>(text: &'a str, key: &str) -> Result<&'a str, MsChapV2Error> {
    let start = text.find(key).ok_or(MsChapV2Error::MalformedMessage)?;
    let rest = &text[start + key.len()..];
    Ok(rest.split(' ').next().unwrap_or(rest))
}

/// Parse OpCode + MS-CHAPv2-ID + MS-Length, returning the value bytes
fn decode_request_header(bytes: &[u8]) -> Result<(u8, u8, &[u8]), MsChapV2Error> {
    if bytes.len() < 4 {
        return Err(MsChapV2Error::TypeDataTooShort(bytes.len()));
    }

    let op_code = bytes[0];
    let mschapv2_id = bytes[1];
    let ms_length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;

    // MS-Length covers everything from the OpCode onward
    if ms_length < 4 || ms_length > bytes.len() {
        return Err(MsChapV2Error::InvalidMsLength(ms_length));
    }

    Ok((op_code, mschapv2_id, &bytes[4..ms_length]))
}

fn encode_request(op_code: u8, mschapv2_id: u8, value: &[u8]) -> Vec<u8> {
    let ms_length = 4 + value.len();
    let mut bytes = Vec::with_capacity(ms_length);
    bytes.push(op_code);
    bytes.push(mschapv2_id);
    bytes.extend_from_slice(&(ms_length as u16).to_be_bytes());
    bytes.extend_from_slice(value);
    bytes
}

/// EAP-MSCHAPv2 decode/encode errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MsChapV2Error {
    #[error("Type data too short: {0} bytes")]
    TypeDataTooShort(usize),

    #[error("Unexpected op code: {0}")]
    UnexpectedOpCode(u8),

    #[error("Invalid MS-Length: {0}")]
    InvalidMsLength(usize),

    #[error("Invalid Value-Size: {0}")]
    InvalidValueSize(u8),

    #[error("Malformed success/failure message")]
    MalformedMessage,
}
