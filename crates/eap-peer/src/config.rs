//! Per-Attempt Session Configuration
//!
//! A `SessionConfig` carries the identity bytes and the per-method
//! credentials/trust material for exactly one authentication attempt. It is
//! owned by the caller and read-only to the state machines.

use crate::error::EapError;
use eap_proto::EapMethodType;

/// Configuration for one authentication attempt
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// The EAP identity sent in Identity responses
    pub identity: Vec<u8>,
    /// EAP-SIM configuration, if the method is enabled
    pub sim: Option<SimConfig>,
    /// EAP-AKA configuration, if the method is enabled
    pub aka: Option<AkaConfig>,
    /// EAP-AKA' configuration, if the method is enabled
    pub aka_prime: Option<AkaPrimeConfig>,
    /// EAP-MSCHAPv2 configuration, if the method is enabled
    pub mschapv2: Option<MsChapV2Config>,
    /// EAP-TTLS configuration, if the method is enabled
    pub ttls: Option<TtlsConfig>,
}

impl SessionConfig {
    /// Start building a session configuration
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: SessionConfig::default(),
        }
    }

    /// The method types this configuration supports, in preference order
    pub fn supported_methods(&self) -> Vec<EapMethodType> {
        let mut methods = Vec::new();
        if self.aka_prime.is_some() {
            methods.push(EapMethodType::AkaPrime);
        }
        if self.aka.is_some() {
            methods.push(EapMethodType::Aka);
        }
        if self.sim.is_some() {
            methods.push(EapMethodType::Sim);
        }
        if self.ttls.is_some() {
            methods.push(EapMethodType::Ttls);
        }
        if self.mschapv2.is_some() {
            methods.push(EapMethodType::MsChapV2);
        }
        methods
    }

    /// The configured re-authentication identity, if any method carries one
    pub fn reauth_identity(&self) -> Option<&[u8]> {
        if let Some(aka_prime) = &self.aka_prime {
            if let Some(id) = &aka_prime.aka.reauth_id {
                return Some(id);
            }
        }
        self.aka.as_ref().and_then(|aka| aka.reauth_id.as_deref())
    }
}

/// Builder for [`SessionConfig`]
#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Set the EAP identity
    pub fn identity(mut self, identity: impl Into<Vec<u8>>) -> Self {
        self.config.identity = identity.into();
        self
    }

    /// Enable EAP-SIM
    pub fn sim(mut self, sim: SimConfig) -> Self {
        self.config.sim = Some(sim);
        self
    }

    /// Enable EAP-AKA
    pub fn aka(mut self, aka: AkaConfig) -> Self {
        self.config.aka = Some(aka);
        self
    }

    /// Enable EAP-AKA'
    pub fn aka_prime(mut self, aka_prime: AkaPrimeConfig) -> Self {
        self.config.aka_prime = Some(aka_prime);
        self
    }

    /// Enable EAP-MSCHAPv2
    pub fn mschapv2(mut self, mschapv2: MsChapV2Config) -> Self {
        self.config.mschapv2 = Some(mschapv2);
        self
    }

    /// Enable EAP-TTLS
    pub fn ttls(mut self, ttls: TtlsConfig) -> Self {
        self.config.ttls = Some(ttls);
        self
    }

    /// Finish building
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

/// EAP-SIM method configuration (RFC 4186)
#[derive(Debug, Clone, Default)]
pub struct SimConfig {
    /// Cached re-authentication identity, if one was issued earlier
    pub reauth_id: Option<Vec<u8>>,
}

/// EAP-AKA method configuration (RFC 4187)
#[derive(Debug, Clone, Default)]
pub struct AkaConfig {
    /// Cached re-authentication identity, if one was issued earlier
    pub reauth_id: Option<Vec<u8>>,
}

/// EAP-AKA' method configuration (RFC 5448)
#[derive(Debug, Clone)]
pub struct AkaPrimeConfig {
    /// Base AKA configuration
    pub aka: AkaConfig,
    /// The peer's view of the network name, e.g. `WLAN`
    pub network_name: Vec<u8>,
    /// Downgrade a peer/server network-name mismatch from fatal to a
    /// logged warning
    pub allow_mismatched_network_names: bool,
}

impl AkaPrimeConfig {
    /// Create an AKA' configuration for the given network name
    pub fn new(network_name: impl Into<Vec<u8>>, allow_mismatched_network_names: bool) -> Self {
        AkaPrimeConfig {
            aka: AkaConfig::default(),
            network_name: network_name.into(),
            allow_mismatched_network_names,
        }
    }
}

/// EAP-MSCHAPv2 method configuration
#[derive(Clone)]
pub struct MsChapV2Config {
    /// The 0-to-256-char username (RFC 2759 Section 8)
    pub username: String,
    /// The 0-to-256-unicode-char password
    pub password: String,
}

impl MsChapV2Config {
    /// Create an MSCHAPv2 configuration
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        MsChapV2Config {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for MsChapV2Config {
    // The password stays out of logs
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsChapV2Config")
            .field("username", &self.username)
            .finish()
    }
}

/// EAP-TTLS method configuration (RFC 5281)
#[derive(Debug, Clone)]
pub struct TtlsConfig {
    /// Session configuration for the tunneled inner EAP conversation; its
    /// identity may differ from the outer identity
    pub inner: Box<SessionConfig>,
    /// Maximum outbound fragment size in bytes
    pub max_fragment_size: usize,
}

impl TtlsConfig {
    /// Default outbound fragment size
    pub const DEFAULT_MAX_FRAGMENT_SIZE: usize = 1024;

    /// Create a TTLS configuration wrapping an inner session config
    ///
    /// EAP-TTLS may only run once per authentication: an inner
    /// configuration that itself enables TTLS is rejected.
    pub fn new(inner: SessionConfig) -> Result<Self, EapError> {
        if inner.ttls.is_some() {
            return Err(EapError::Config(
                "EAP-TTLS must not be configured inside its own tunnel",
            ));
        }

        Ok(TtlsConfig {
            inner: Box::new(inner),
            max_fragment_size: Self::DEFAULT_MAX_FRAGMENT_SIZE,
        })
    }

    /// Override the maximum outbound fragment size
    pub fn with_max_fragment_size(mut self, max_fragment_size: usize) -> Self {
        self.max_fragment_size = max_fragment_size;
        self
    }
}
