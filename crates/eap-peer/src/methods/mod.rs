//! EAP Method Engines
//!
//! One engine serves exactly one authentication attempt and is selected by
//! the outer dispatcher on the first method-type request. Methods are a
//! closed set, so dispatch is an exhaustive match over a tagged union
//! rather than trait objects; each method's internal states stay private
//! to its own module.

pub(crate) mod aka_prime;
pub(crate) mod mschapv2;
pub(crate) mod simaka;
pub(crate) mod ttls;

use crate::error::EapError;
use crate::keys::SessionKeys;
use crate::session::SessionServices;
use eap_proto::{EapMethodType, EapPacket};

/// Outcome of one processing step inside a method engine
#[derive(Debug)]
pub(crate) enum MethodResult {
    /// Encoded EAP response to transmit
    Response(Vec<u8>),
    /// Terminal success with exported session keys
    Success(SessionKeys),
    /// Terminal failure
    Failure,
}

/// The single live method engine of an authentication attempt
pub(crate) enum MethodEngine {
    SimAka(simaka::SimAkaEngine),
    MsChapV2(mschapv2::MsChapV2Engine),
    Ttls(ttls::TtlsEngine),
}

impl MethodEngine {
    /// The EAP method type this engine serves
    pub fn method_type(&self) -> EapMethodType {
        match self {
            MethodEngine::SimAka(engine) => engine.method_type(),
            MethodEngine::MsChapV2(_) => EapMethodType::MsChapV2,
            MethodEngine::Ttls(_) => EapMethodType::Ttls,
        }
    }

    /// Process one inbound message
    pub fn process(
        &mut self,
        packet: &EapPacket,
        services: &SessionServices,
    ) -> Result<MethodResult, EapError> {
        match self {
            MethodEngine::SimAka(engine) => engine.process(packet, services),
            MethodEngine::MsChapV2(engine) => engine.process(packet, services),
            MethodEngine::Ttls(engine) => engine.process(packet, services),
        }
    }

    /// Invalidate key material and force the engine terminal; runs when
    /// the session errors out
    pub fn invalidate(&mut self) {
        match self {
            MethodEngine::SimAka(engine) => engine.invalidate(),
            MethodEngine::MsChapV2(_) => {}
            MethodEngine::Ttls(engine) => engine.invalidate(),
        }
    }
}
