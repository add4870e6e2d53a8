//! CRM provider selection and account matching

use crate::{AccountMapping, ConfigError, ConnectionStatus, CrmConnection, EntityId};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// PROVIDERS
// ============================================================================

/// CRM products with a working integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrmProviderKind {
    Crono,
}

/// Provider names the schema reserves but no integration exists for.
const RESERVED_PROVIDERS: &[&str] = &["hubspot", "salesforce", "pipedrive"];

impl CrmProviderKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            CrmProviderKind::Crono => "crono",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, ConfigError> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "crono" => Ok(CrmProviderKind::Crono),
            other if RESERVED_PROVIDERS.contains(&other) => Err(ConfigError::ProviderNotSupported {
                provider: other.to_string(),
            }),
            _ => Err(ConfigError::InvalidValue {
                field: "crm_provider".to_string(),
                value: s.to_string(),
                reason: "unknown CRM provider".to_string(),
            }),
        }
    }
}

impl fmt::Display for CrmProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Crono connection details resolved from a tenant's connection row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronoSettings {
    pub connection_id: EntityId,
    pub credentials_secret_id: String,
}

/// A configured CRM integration, one arm per implemented provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrmProvider {
    Crono(CronoSettings),
}

impl CrmProvider {
    /// Build the provider for a connection. Refuses connections that are not
    /// active or carry no credentials.
    pub fn from_connection(connection: &CrmConnection) -> Result<Self, ConfigError> {
        if connection.status != ConnectionStatus::Active {
            return Err(ConfigError::ProviderUnavailable {
                provider: connection.provider.to_string(),
                reason: format!("connection status is {}", connection.status),
            });
        }
        let secret = connection.credentials_secret_id.clone().ok_or_else(|| {
            ConfigError::MissingRequired {
                field: "credentials_secret_id".to_string(),
            }
        })?;
        match connection.provider {
            CrmProviderKind::Crono => Ok(CrmProvider::Crono(CronoSettings {
                connection_id: connection.id,
                credentials_secret_id: secret,
            })),
        }
    }

    pub fn kind(&self) -> CrmProviderKind {
        match self {
            CrmProvider::Crono(_) => CrmProviderKind::Crono,
        }
    }
}

// ============================================================================
// ACCOUNT MATCHING
// ============================================================================

/// An account as returned by a CRM search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmAccount {
    pub id: String,
    pub name: String,
    pub website: Option<String>,
}

/// Which rule produced a match, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchRule {
    Mapped,
    ExactDomain,
    Subdomain,
    NameMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountMatch {
    pub account_id: String,
    pub account_name: Option<String>,
    pub rule: MatchRule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched(AccountMatch),
    /// Several candidates satisfied the same rule.
    Ambiguous { rule: MatchRule, account_ids: Vec<String> },
    NoMatch,
}

/// Lowercase, strip scheme, `www.`, path and port.
pub fn normalize_domain(input: &str) -> String {
    let lowered = input.trim().to_ascii_lowercase();
    let without_scheme = lowered
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(&lowered);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

fn normalize_name(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Resolve the CRM account for an email domain.
///
/// Rules run in [`MatchRule`] order and the first rule with exactly one hit
/// wins. A rule with several hits stops the search as ambiguous.
pub fn match_account(
    email_domain: &str,
    mappings: &[AccountMapping],
    candidates: &[CrmAccount],
) -> MatchOutcome {
    let domain = normalize_domain(email_domain);
    if domain.is_empty() {
        return MatchOutcome::NoMatch;
    }

    let mapped: Vec<&AccountMapping> = mappings
        .iter()
        .filter(|m| m.deleted_at.is_none() && normalize_domain(&m.email_domain) == domain)
        .collect();
    if let [mapping] = mapped.as_slice() {
        return MatchOutcome::Matched(AccountMatch {
            account_id: mapping.crm_account_id.clone(),
            account_name: mapping.crm_account_name.clone(),
            rule: MatchRule::Mapped,
        });
    }
    if mapped.len() > 1 {
        return MatchOutcome::Ambiguous {
            rule: MatchRule::Mapped,
            account_ids: mapped.iter().map(|m| m.crm_account_id.clone()).collect(),
        };
    }

    let suffix = format!(".{domain}");
    let label = normalize_name(domain.split('.').next().unwrap_or_default());
    let rules: [(MatchRule, Box<dyn Fn(&CrmAccount) -> bool + '_>); 3] = [
        (
            MatchRule::ExactDomain,
            Box::new(|a: &CrmAccount| {
                a.website.as_deref().map(normalize_domain).as_deref() == Some(domain.as_str())
            }),
        ),
        (
            MatchRule::Subdomain,
            Box::new(|a: &CrmAccount| {
                a.website
                    .as_deref()
                    .map(normalize_domain)
                    .is_some_and(|w| w.ends_with(&suffix))
            }),
        ),
        (
            MatchRule::NameMatch,
            Box::new(|a: &CrmAccount| !label.is_empty() && normalize_name(&a.name) == label),
        ),
    ];

    for (rule, predicate) in rules.iter() {
        let hits: Vec<&CrmAccount> = candidates.iter().filter(|a| predicate(a)).collect();
        match hits.as_slice() {
            [] => continue,
            [account] => {
                return MatchOutcome::Matched(AccountMatch {
                    account_id: account.id.clone(),
                    account_name: Some(account.name.clone()),
                    rule: *rule,
                })
            }
            many => {
                return MatchOutcome::Ambiguous {
                    rule: *rule,
                    account_ids: many.iter().map(|a| a.id.clone()).collect(),
                }
            }
        }
    }
    MatchOutcome::NoMatch
}
