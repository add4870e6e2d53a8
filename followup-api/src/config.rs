//! API Configuration Module
//!
//! Request verification, tenant cache and request-handling settings. Every
//! value comes from a `FOLLOWUP_*` environment variable with a development
//! default; the signing secret is the only required value, and only while
//! signature verification is on.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use followup_core::ConfigError;
use followup_storage::TenantCacheConfig;
use secrecy::SecretString;

/// Largest webhook body the tenant middleware buffers by default.
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Largest accepted clock skew between the signer and this server.
pub const DEFAULT_SIGNATURE_TOLERANCE_SECS: i64 = 300;

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// Runtime configuration for the followup API.
#[derive(Clone)]
pub struct AppConfig {
    // ========================================================================
    // Request verification
    // ========================================================================
    /// Shared secret for request signatures.
    pub signing_secret: Option<SecretString>,

    /// When false, signatures are not checked. Local development only.
    pub verify_signatures: bool,

    /// Accepted timestamp skew in seconds, inclusive.
    pub signature_tolerance_secs: i64,

    // ========================================================================
    // Tenant cache
    // ========================================================================
    pub cache_enabled: bool,

    /// LMDB directory. `None` selects the in-memory backend.
    pub cache_path: Option<PathBuf>,

    pub cache_map_size_mb: usize,

    pub cache_ttl: Duration,

    /// Bound on one cache round trip.
    pub cache_timeout: Duration,

    /// Active tenants written to the cache at startup.
    pub cache_preload: usize,

    // ========================================================================
    // Request handling
    // ========================================================================
    /// Create a tenant for an unknown workspace on first contact.
    pub auto_provision: bool,

    pub body_limit_bytes: usize,

    /// Paths (or prefixes ending in `/`) that skip tenant resolution, in
    /// addition to the built-in list.
    pub extra_whitelist: Vec<String>,

    /// Slash commands a tenant may run per hour.
    pub slash_command_limit: i64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("signing_secret", &self.signing_secret.as_ref().map(|_| "[REDACTED]"))
            .field("verify_signatures", &self.verify_signatures)
            .field("signature_tolerance_secs", &self.signature_tolerance_secs)
            .field("cache_enabled", &self.cache_enabled)
            .field("cache_path", &self.cache_path)
            .field("cache_map_size_mb", &self.cache_map_size_mb)
            .field("cache_ttl", &self.cache_ttl)
            .field("cache_timeout", &self.cache_timeout)
            .field("cache_preload", &self.cache_preload)
            .field("auto_provision", &self.auto_provision)
            .field("body_limit_bytes", &self.body_limit_bytes)
            .field("extra_whitelist", &self.extra_whitelist)
            .field("slash_command_limit", &self.slash_command_limit)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            verify_signatures: true,
            signature_tolerance_secs: DEFAULT_SIGNATURE_TOLERANCE_SECS,
            cache_enabled: true,
            cache_path: None,
            cache_map_size_mb: 64,
            cache_ttl: Duration::from_secs(300),
            cache_timeout: Duration::from_millis(2000),
            cache_preload: 0,
            auto_provision: false,
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            extra_whitelist: Vec::new(),
            slash_command_limit: 60,
        }
    }
}

impl AppConfig {
    /// Create AppConfig from environment variables.
    ///
    /// Environment variables:
    /// - `FOLLOWUP_SIGNING_SECRET`: request signing secret (fallback: `SLACK_SIGNING_SECRET`)
    /// - `FOLLOWUP_VERIFY_SIGNATURES`: "true" or "false" (default: true)
    /// - `FOLLOWUP_SIGNATURE_TOLERANCE_SECS`: accepted clock skew (default: 300)
    /// - `FOLLOWUP_CACHE_ENABLED`: "true" or "false" (default: true)
    /// - `FOLLOWUP_CACHE_PATH`: LMDB directory (default: unset, in-memory cache)
    /// - `FOLLOWUP_CACHE_MAP_SIZE_MB`: LMDB map size (default: 64)
    /// - `FOLLOWUP_CACHE_TTL_SECS`: cached tenant lifetime (default: 300)
    /// - `FOLLOWUP_CACHE_TIMEOUT_MS`: cache round-trip bound (default: 2000)
    /// - `FOLLOWUP_CACHE_PRELOAD`: tenants cached at startup (default: 0)
    /// - `FOLLOWUP_AUTO_PROVISION`: "true" or "false" (default: false)
    /// - `FOLLOWUP_BODY_LIMIT_BYTES`: buffered body limit (default: 1048576)
    /// - `FOLLOWUP_WHITELIST_PATHS`: comma-separated extra unauthenticated paths
    /// - `FOLLOWUP_SLASH_COMMAND_LIMIT`: slash commands per tenant per hour (default: 60)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let signing_secret = lookup("FOLLOWUP_SIGNING_SECRET")
            .or_else(|| lookup("SLACK_SIGNING_SECRET"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(|s| SecretString::new(s.into()));

        let verify_signatures = parse_bool(&lookup, "FOLLOWUP_VERIFY_SIGNATURES", true)?;
        if verify_signatures && signing_secret.is_none() {
            return Err(ConfigError::MissingRequired {
                field: "FOLLOWUP_SIGNING_SECRET".to_string(),
            });
        }

        let signature_tolerance_secs: i64 = parse_or(
            &lookup,
            "FOLLOWUP_SIGNATURE_TOLERANCE_SECS",
            defaults.signature_tolerance_secs,
        )?;
        if signature_tolerance_secs < 0 {
            return Err(ConfigError::InvalidValue {
                field: "FOLLOWUP_SIGNATURE_TOLERANCE_SECS".to_string(),
                value: signature_tolerance_secs.to_string(),
                reason: "must not be negative".to_string(),
            });
        }

        let cache_path = lookup("FOLLOWUP_CACHE_PATH")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let extra_whitelist = lookup("FOLLOWUP_WHITELIST_PATHS")
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| p.starts_with('/'))
                    .collect()
            })
            .unwrap_or_default();

        let slash_command_limit: i64 = parse_or(
            &lookup,
            "FOLLOWUP_SLASH_COMMAND_LIMIT",
            defaults.slash_command_limit,
        )?;
        if slash_command_limit <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "FOLLOWUP_SLASH_COMMAND_LIMIT".to_string(),
                value: slash_command_limit.to_string(),
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            signing_secret,
            verify_signatures,
            signature_tolerance_secs,
            cache_enabled: parse_bool(&lookup, "FOLLOWUP_CACHE_ENABLED", defaults.cache_enabled)?,
            cache_path,
            cache_map_size_mb: parse_or(
                &lookup,
                "FOLLOWUP_CACHE_MAP_SIZE_MB",
                defaults.cache_map_size_mb,
            )?,
            cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                "FOLLOWUP_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )?),
            cache_timeout: Duration::from_millis(parse_or(
                &lookup,
                "FOLLOWUP_CACHE_TIMEOUT_MS",
                2000u64,
            )?),
            cache_preload: parse_or(&lookup, "FOLLOWUP_CACHE_PRELOAD", defaults.cache_preload)?,
            auto_provision: parse_bool(&lookup, "FOLLOWUP_AUTO_PROVISION", defaults.auto_provision)?,
            body_limit_bytes: parse_or(
                &lookup,
                "FOLLOWUP_BODY_LIMIT_BYTES",
                defaults.body_limit_bytes,
            )?,
            extra_whitelist,
            slash_command_limit,
        })
    }

    /// Settings handed to [`followup_storage::TenantCache`].
    pub fn tenant_cache_config(&self) -> TenantCacheConfig {
        TenantCacheConfig::default()
            .with_enabled(self.cache_enabled)
            .with_ttl(self.cache_ttl)
            .with_op_timeout(self.cache_timeout)
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: key.to_string(),
                value: raw.clone(),
                reason: "not a valid number".to_string(),
            })
        }
        _ => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(s) if s.is_empty() => Ok(default),
        Some(s) => match s.as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                field: key.to_string(),
                value: s,
                reason: "expected true or false".to_string(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_secret_required_while_verifying() {
        let err = AppConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingRequired {
                field: "FOLLOWUP_SIGNING_SECRET".to_string()
            }
        );

        let config =
            AppConfig::from_lookup(lookup(&[("FOLLOWUP_VERIFY_SIGNATURES", "false")])).unwrap();
        assert!(!config.verify_signatures);
        assert!(config.signing_secret.is_none());
    }

    #[test]
    fn test_slack_secret_is_fallback() {
        let config = AppConfig::from_lookup(lookup(&[("SLACK_SIGNING_SECRET", "s3cret")])).unwrap();
        assert_eq!(
            config.signing_secret.as_ref().map(|s| s.expose_secret().to_string()),
            Some("s3cret".to_string())
        );

        let config = AppConfig::from_lookup(lookup(&[
            ("SLACK_SIGNING_SECRET", "slack"),
            ("FOLLOWUP_SIGNING_SECRET", "primary"),
        ]))
        .unwrap();
        assert_eq!(
            config.signing_secret.as_ref().map(|s| s.expose_secret().to_string()),
            Some("primary".to_string())
        );
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[("FOLLOWUP_SIGNING_SECRET", "x")])).unwrap();
        assert_eq!(config.signature_tolerance_secs, 300);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.cache_timeout, Duration::from_secs(2));
        assert!(config.cache_enabled);
        assert!(config.cache_path.is_none());
        assert!(!config.auto_provision);
        assert_eq!(config.body_limit_bytes, DEFAULT_BODY_LIMIT_BYTES);
        assert_eq!(config.slash_command_limit, 60);
    }

    #[test]
    fn test_overrides_and_whitelist() {
        let config = AppConfig::from_lookup(lookup(&[
            ("FOLLOWUP_SIGNING_SECRET", "x"),
            ("FOLLOWUP_CACHE_ENABLED", "off"),
            ("FOLLOWUP_CACHE_PATH", "/var/cache/followup"),
            ("FOLLOWUP_CACHE_TIMEOUT_MS", "250"),
            ("FOLLOWUP_AUTO_PROVISION", "TRUE"),
            ("FOLLOWUP_WHITELIST_PATHS", "/install, /oauth/, nope"),
        ]))
        .unwrap();
        assert!(!config.cache_enabled);
        assert_eq!(config.cache_path, Some(PathBuf::from("/var/cache/followup")));
        assert_eq!(config.cache_timeout, Duration::from_millis(250));
        assert!(config.auto_provision);
        assert_eq!(config.extra_whitelist, vec!["/install", "/oauth/"]);

        let cache = config.tenant_cache_config();
        assert!(!cache.enabled);
        assert_eq!(cache.op_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = AppConfig::from_lookup(lookup(&[
            ("FOLLOWUP_SIGNING_SECRET", "x"),
            ("FOLLOWUP_CACHE_TTL_SECS", "five minutes"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "FOLLOWUP_CACHE_TTL_SECS"));

        let err = AppConfig::from_lookup(lookup(&[
            ("FOLLOWUP_SIGNING_SECRET", "x"),
            ("FOLLOWUP_SLASH_COMMAND_LIMIT", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = AppConfig::from_lookup(lookup(&[("FOLLOWUP_SIGNING_SECRET", "hunter2")])).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
