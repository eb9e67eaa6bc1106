//! Session configuration.
//!
//! [`DeviceConfig`] is the constructor parameter set for a session: target,
//! credentials, timeout, transcript destination and locking policy. The
//! remaining items are the SSH algorithm preference lists used by each
//! [`SecurityLevel`](crate::session::SecurityLevel).

use std::path::PathBuf;
use std::time::Duration;

use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, compression, kex, mac};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::XrError;
use crate::session::SecurityLevel;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// Default timeout applied to every wait, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Where the session transcript is written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogTarget {
    /// No transcript.
    #[default]
    None,
    /// Mirror the transcript to standard output.
    Stdout,
    /// Mirror the transcript to standard error.
    Stderr,
    /// Append the transcript to a file.
    File(PathBuf),
}

/// Connection and behaviour settings for one device session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceConfig {
    /// IP address or FQDN of the router.
    pub hostname: String,
    pub username: String,
    /// Login password. Never serialized.
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Timeout for every prompt wait and RPC exchange, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Transcript destination.
    #[serde(default)]
    pub log: LogTarget,
    /// Acquire the configuration lock as part of `open`.
    #[serde(default = "default_true")]
    pub lock_on_connect: bool,
    /// Answer `yes` to a host-authenticity confirmation prompt.
    #[serde(default = "default_true")]
    pub accept_host_key: bool,
    /// SSH algorithm policy.
    #[serde(default)]
    pub security: SecurityLevel,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl DeviceConfig {
    /// Creates a configuration with default port, timeout and locking policy.
    pub fn new(
        hostname: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            username: username.into(),
            password: password.into(),
            port: DEFAULT_PORT,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            log: LogTarget::None,
            lock_on_connect: true,
            accept_host_key: true,
            security: SecurityLevel::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_log(mut self, log: LogTarget) -> Self {
        self.log = log;
        self
    }

    pub fn with_lock_on_connect(mut self, lock: bool) -> Self {
        self.lock_on_connect = lock;
        self
    }

    pub fn with_accept_host_key(mut self, accept: bool) -> Self {
        self.accept_host_key = accept;
        self
    }

    pub fn with_security(mut self, security: SecurityLevel) -> Self {
        self.security = security;
        self
    }

    /// Default wait budget as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// `user@host:port`, used in logs and recordings.
    pub fn device_addr(&self) -> String {
        format!("{}@{}:{}", self.username, self.hostname, self.port)
    }

    /// Parses a configuration from JSON. Missing optional fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, XrError> {
        let config: DeviceConfig = serde_json::from_str(json)
            .map_err(|e| XrError::InternalServerError(format!("decode device config: {e}")))?;
        if config.hostname.trim().is_empty() {
            return Err(XrError::InternalServerError(
                "device config hostname is empty".to_string(),
            ));
        }
        Ok(config)
    }
}

/// Exports the JSON schema of [`DeviceConfig`].
pub fn config_schema_json() -> Result<String, XrError> {
    let schema = schemars::schema_for!(DeviceConfig);
    serde_json::to_string_pretty(&schema)
        .map_err(|e| XrError::InternalServerError(format!("encode config schema: {e}")))
}

/// Key exchange algorithms allowed at [`SecurityLevel::Secure`].
pub const SECURE_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
];

/// Key exchange algorithms allowed at [`SecurityLevel::Balanced`].
pub const BALANCED_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_GEX_SHA256,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
    kex::DH_G14_SHA1,
];

/// Every key exchange algorithm, including the ones old XR images still need.
pub const LEGACY_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::DH_GEX_SHA1,
    kex::DH_GEX_SHA256,
    kex::DH_G1_SHA1,
    kex::DH_G14_SHA1,
    kex::DH_G14_SHA256,
    kex::DH_G15_SHA512,
    kex::DH_G16_SHA512,
    kex::DH_G17_SHA512,
    kex::DH_G18_SHA512,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::NONE,
];

pub static SECURE_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
];

pub static BALANCED_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_128_CBC,
];

/// All ciphers, legacy CBC and unencrypted ones included.
pub static LEGACY_CIPHERS: &[cipher::Name] = &[
    cipher::CLEAR,
    cipher::NONE,
    cipher::AES_128_CTR,
    cipher::AES_192_CTR,
    cipher::AES_256_CTR,
    cipher::AES_256_GCM,
    cipher::AES_128_CBC,
    cipher::AES_192_CBC,
    cipher::AES_256_CBC,
    cipher::CHACHA20_POLY1305,
];

pub const SECURE_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
];

pub const BALANCED_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA1,
];

pub const LEGACY_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::NONE,
    mac::HMAC_SHA1,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
];

pub const DEFAULT_COMPRESSION_ALGORITHMS: &[compression::Name] = &[
    compression::NONE,
    compression::ZLIB,
    compression::ZLIB_LEGACY,
];

pub const SECURE_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
];

pub const BALANCED_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
];

pub const LEGACY_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Dsa,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Ed25519,
    Algorithm::Rsa { hash: None },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::SkEcdsaSha2NistP256,
    Algorithm::SkEd25519,
];
