use super::*;

/// SSH algorithm policy for the connection to the router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Strict modern algorithms (default).
    #[default]
    Secure,
    /// Modern algorithms plus CBC ciphers and SHA-1 MACs.
    Balanced,
    /// Everything russh knows, for old XR images.
    LegacyCompatible,
}

/// Algorithm and host key checking choices used when dialing a router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSecurityOptions {
    pub level: SecurityLevel,
    /// Server host key verification method.
    pub server_check: ServerCheckMethod,
}

impl Default for ConnectionSecurityOptions {
    fn default() -> Self {
        Self::secure_default()
    }
}

impl ConnectionSecurityOptions {
    pub fn secure_default() -> Self {
        Self {
            level: SecurityLevel::Secure,
            server_check: ServerCheckMethod::DefaultKnownHostsFile,
        }
    }

    pub fn balanced() -> Self {
        Self {
            level: SecurityLevel::Balanced,
            server_check: ServerCheckMethod::DefaultKnownHostsFile,
        }
    }

    pub fn legacy_compatible() -> Self {
        Self {
            level: SecurityLevel::LegacyCompatible,
            server_check: ServerCheckMethod::NoCheck,
        }
    }

    /// Options derived from a device configuration.
    ///
    /// Starts from the profile for `config.security`. `accept_host_key`
    /// then decides host key checking: accepting disables known-hosts
    /// verification, which is how an interactive client answering `yes` to
    /// the authenticity prompt behaves.
    pub fn for_device(config: &DeviceConfig) -> Self {
        let mut options = match config.security {
            SecurityLevel::Secure => Self::secure_default(),
            SecurityLevel::Balanced => Self::balanced(),
            SecurityLevel::LegacyCompatible => Self::legacy_compatible(),
        };
        options.server_check = if config.accept_host_key {
            ServerCheckMethod::NoCheck
        } else {
            ServerCheckMethod::DefaultKnownHostsFile
        };
        options
    }

    pub(super) fn preferred(&self) -> Preferred {
        let (kex, key, cipher, mac) = match self.level {
            SecurityLevel::Secure => (
                config::SECURE_KEX_ORDER,
                config::SECURE_KEY_TYPES,
                config::SECURE_CIPHERS,
                config::SECURE_MAC_ALGORITHMS,
            ),
            SecurityLevel::Balanced => (
                config::BALANCED_KEX_ORDER,
                config::BALANCED_KEY_TYPES,
                config::BALANCED_CIPHERS,
                config::BALANCED_MAC_ALGORITHMS,
            ),
            SecurityLevel::LegacyCompatible => (
                config::LEGACY_KEX_ORDER,
                config::LEGACY_KEY_TYPES,
                config::LEGACY_CIPHERS,
                config::LEGACY_MAC_ALGORITHMS,
            ),
        };
        Preferred {
            kex: Cow::Borrowed(kex),
            key: Cow::Borrowed(key),
            cipher: Cow::Borrowed(cipher),
            mac: Cow::Borrowed(mac),
            compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
        }
    }
}
