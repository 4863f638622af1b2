use std::time::Duration;

/// Predefined configuration presets for common use cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPreset {
    /// Production-ready configuration.
    ///
    /// - Nonce TTL: 5 minutes (enough for a wallet round trip)
    /// - Verification timeout: 10 seconds
    Production,

    /// Development-friendly configuration.
    ///
    /// - Nonce TTL: 15 minutes (time to step through a wallet prompt)
    /// - Verification timeout: 30 seconds (slow public test RPCs)
    Development,

    /// High-security configuration.
    ///
    /// - Nonce TTL: 2 minutes
    /// - Verification timeout: 5 seconds
    HighSecurity,

    /// Load configuration from environment variables.
    ///
    /// See [`AuthConfig`] for the variables that are read.
    FromEnv,
}

/// Configuration for the sign-in flow.
///
/// # Environment Variables
///
/// - `SIWE_AUTH_NONCE_TTL`: Nonce lifetime in seconds (default: 300)
/// - `SIWE_AUTH_VERIFY_TIMEOUT`: On-chain verification timeout in seconds (default: 10)
/// - `SIWE_AUTH_DOMAIN`: Expected message domain; any domain is accepted when unset
/// - `SIWE_AUTH_CHAIN_IDS`: Comma-separated chain ids accepted in messages; any
///   configured chain is accepted when unset
/// - `SIWE_AUTH_STATEMENT`: Statement shown to the user when the server builds messages
///
/// # Example
///
/// ```rust
/// use siwe_nonce_auth::nonce::AuthConfig;
/// use std::time::Duration;
///
/// let config = AuthConfig {
///     nonce_ttl: Duration::from_secs(600),
///     domain: Some("app.example.com".to_string()),
///     allowed_chain_ids: vec![8453],
///     ..AuthConfig::default()
/// };
/// assert!(config.validate().is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Lifetime of an issued nonce
    pub nonce_ttl: Duration,
    /// Upper bound for the on-chain part of a verification, retry included
    pub verification_timeout: Duration,
    /// Domain the signed message must name
    pub domain: Option<String>,
    /// Chain ids a message may name; empty means "whatever has a chain client"
    pub allowed_chain_ids: Vec<u64>,
    /// Human-readable statement for server-built messages
    pub statement: Option<String>,
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(name)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(default),
    )
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parses a comma-separated chain id list, skipping entries that are not numbers.
pub(crate) fn parse_chain_ids(raw: &str) -> Vec<u64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            nonce_ttl: env_secs("SIWE_AUTH_NONCE_TTL", 300),
            verification_timeout: env_secs("SIWE_AUTH_VERIFY_TIMEOUT", 10),
            domain: env_non_empty("SIWE_AUTH_DOMAIN"),
            allowed_chain_ids: env_non_empty("SIWE_AUTH_CHAIN_IDS")
                .map(|raw| parse_chain_ids(&raw))
                .unwrap_or_default(),
            statement: env_non_empty("SIWE_AUTH_STATEMENT"),
        }
    }
}

impl AuthConfig {
    /// Validates the configuration and returns any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.nonce_ttl.as_secs() < 60 {
            warnings.push(
                "Very short nonce TTL (< 1 minute) may expire before the wallet signs".to_string(),
            );
        }
        if self.nonce_ttl.as_secs() > 3600 {
            warnings.push("Long nonce TTL (> 1 hour) widens the replay window".to_string());
        }

        if self.verification_timeout.as_secs() < 2 {
            warnings.push(
                "Very short verification timeout (< 2 seconds) may fail healthy RPC calls"
                    .to_string(),
            );
        }
        if self.verification_timeout >= self.nonce_ttl {
            warnings.push(
                "Verification timeout should be well below the nonce TTL".to_string(),
            );
        }

        if self.domain.is_none() {
            warnings.push(
                "No domain configured; messages for any domain will be accepted".to_string(),
            );
        }

        warnings
    }

    /// Returns a summary of the current configuration.
    pub fn summary(&self) -> String {
        let chains = if self.allowed_chain_ids.is_empty() {
            "any".to_string()
        } else {
            self.allowed_chain_ids
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            "AuthConfig {{ Nonce TTL: {}s, Verify Timeout: {}s, Domain: {}, Chains: {} }}",
            self.nonce_ttl.as_secs(),
            self.verification_timeout.as_secs(),
            self.domain.as_deref().unwrap_or("any"),
            chains,
        )
    }

    /// Returns `true` if `chain_id` may appear in a signed message.
    pub fn allows_chain(&self, chain_id: u64) -> bool {
        self.allowed_chain_ids.is_empty() || self.allowed_chain_ids.contains(&chain_id)
    }
}

impl From<ConfigPreset> for AuthConfig {
    fn from(preset: ConfigPreset) -> Self {
        let with = |ttl: u64, timeout: u64| Self {
            nonce_ttl: Duration::from_secs(ttl),
            verification_timeout: Duration::from_secs(timeout),
            domain: None,
            allowed_chain_ids: Vec::new(),
            statement: None,
        };
        match preset {
            ConfigPreset::Production => with(300, 10),
            ConfigPreset::Development => with(900, 30),
            ConfigPreset::HighSecurity => with(120, 5),
            ConfigPreset::FromEnv => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 5] = [
        "SIWE_AUTH_NONCE_TTL",
        "SIWE_AUTH_VERIFY_TIMEOUT",
        "SIWE_AUTH_DOMAIN",
        "SIWE_AUTH_CHAIN_IDS",
        "SIWE_AUTH_STATEMENT",
    ];

    fn clear_env_vars() {
        for var in VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_production_preset() {
        let config = AuthConfig::from(ConfigPreset::Production);
        assert_eq!(config.nonce_ttl.as_secs(), 300);
        assert_eq!(config.verification_timeout.as_secs(), 10);
        assert!(config.domain.is_none());
    }

    #[test]
    fn test_development_preset() {
        let config = AuthConfig::from(ConfigPreset::Development);
        assert_eq!(config.nonce_ttl.as_secs(), 900);
        assert_eq!(config.verification_timeout.as_secs(), 30);
    }

    #[test]
    fn test_high_security_preset() {
        let config = AuthConfig::from(ConfigPreset::HighSecurity);
        assert_eq!(config.nonce_ttl.as_secs(), 120);
        assert_eq!(config.verification_timeout.as_secs(), 5);
    }

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        clear_env_vars();

        let config = AuthConfig::default();
        assert_eq!(config.nonce_ttl.as_secs(), 300);
        assert_eq!(config.verification_timeout.as_secs(), 10);
        assert!(config.allowed_chain_ids.is_empty());
        assert!(config.statement.is_none());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env_vars();

        unsafe {
            std::env::set_var("SIWE_AUTH_NONCE_TTL", "120");
            std::env::set_var("SIWE_AUTH_VERIFY_TIMEOUT", "4");
            std::env::set_var("SIWE_AUTH_DOMAIN", " app.example.com ");
            std::env::set_var("SIWE_AUTH_CHAIN_IDS", "8453, 1,bogus");
        }

        let config = AuthConfig::from(ConfigPreset::FromEnv);
        assert_eq!(config.nonce_ttl.as_secs(), 120);
        assert_eq!(config.verification_timeout.as_secs(), 4);
        assert_eq!(config.domain.as_deref(), Some("app.example.com"));
        assert_eq!(config.allowed_chain_ids, vec![8453, 1]);

        clear_env_vars();
    }

    #[test]
    fn test_allows_chain() {
        let mut config = AuthConfig::from(ConfigPreset::Production);
        assert!(config.allows_chain(1));

        config.allowed_chain_ids = vec![8453];
        assert!(config.allows_chain(8453));
        assert!(!config.allows_chain(1));
    }

    #[test]
    fn test_validation_valid_config() {
        let config = AuthConfig {
            domain: Some("app.example.com".to_string()),
            ..AuthConfig::from(ConfigPreset::Production)
        };
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_validation_warnings() {
        let config = AuthConfig {
            nonce_ttl: Duration::from_secs(30),
            verification_timeout: Duration::from_secs(45),
            ..AuthConfig::from(ConfigPreset::Production)
        };
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("Very short nonce TTL")));
        assert!(warnings.iter().any(|w| w.contains("well below the nonce TTL")));
        assert!(warnings.iter().any(|w| w.contains("No domain configured")));

        let config = AuthConfig {
            nonce_ttl: Duration::from_secs(7200),
            domain: Some("app.example.com".to_string()),
            ..AuthConfig::from(ConfigPreset::Production)
        };
        assert!(
            config
                .validate()
                .iter()
                .any(|w| w.contains("Long nonce TTL"))
        );
    }

    #[test]
    fn test_summary() {
        let config = AuthConfig {
            allowed_chain_ids: vec![8453, 84532],
            ..AuthConfig::from(ConfigPreset::Production)
        };
        assert_eq!(
            config.summary(),
            "AuthConfig { Nonce TTL: 300s, Verify Timeout: 10s, Domain: any, Chains: 8453,84532 }"
        );
    }
}
