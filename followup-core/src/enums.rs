//! Enum types stored as lowercase text columns

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error when parsing an enum from its database string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub type_name: &'static str,
    pub value: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.type_name, self.value)
    }
}

impl std::error::Error for EnumParseError {}

/// Declares a text-backed enum with `as_db_str`, `from_db_str`, `Display`
/// and `FromStr`. Parsing is case-insensitive.
macro_rules! db_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// All variants in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Convert to database string representation.
            pub fn as_db_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            /// Parse from database string representation.
            pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(EnumParseError {
                        type_name: stringify!($name),
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_db_str())
            }
        }

        impl FromStr for $name {
            type Err = EnumParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_db_str(s)
            }
        }
    };
}

// ============================================================================
// TENANT
// ============================================================================

db_enum! {
    /// Billing plan of a tenant.
    PlanTier {
        Free => "free",
        Starter => "starter",
        Pro => "pro",
        Enterprise => "enterprise",
    }
}

db_enum! {
    /// Subscription state of a tenant.
    SubscriptionStatus {
        Active => "active",
        Trial => "trial",
        Suspended => "suspended",
        Cancelled => "cancelled",
    }
}

impl SubscriptionStatus {
    /// Statuses that allow requests through, before trial expiry is checked.
    pub fn permits_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trial)
    }
}

// ============================================================================
// USERS & INTEGRATIONS
// ============================================================================

db_enum! {
    UserRole {
        Admin => "admin",
        Member => "member",
    }
}

db_enum! {
    /// Health of a CRM connection.
    ConnectionStatus {
        Active => "active",
        Error => "error",
        Disconnected => "disconnected",
        Refreshing => "refreshing",
    }
}

db_enum! {
    /// Lifecycle of a follow-up request for one meeting.
    ProcessingStatus {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
    }
}

db_enum! {
    /// How an email-domain to CRM-account mapping was established.
    MappingSource {
        Manual => "manual",
        AutoDiscovered => "auto_discovered",
        Imported => "imported",
    }
}

db_enum! {
    /// Window of an API rate-limit counter.
    LimitPeriod {
        Minute => "minute",
        Hourly => "hourly",
        Daily => "daily",
        Monthly => "monthly",
    }
}

// ============================================================================
// AUDIT
// ============================================================================

db_enum! {
    AuditCategory {
        Authentication => "authentication",
        DataAccess => "data_access",
        Configuration => "configuration",
        Integration => "integration",
        Security => "security",
    }
}

db_enum! {
    AuditStatus {
        Success => "success",
        Failure => "failure",
        Partial => "partial",
    }
}

// ============================================================================
// ENTITY KIND
// ============================================================================

db_enum! {
    /// Entity type discriminator for errors, logs and audit records.
    EntityKind {
        Tenant => "tenant",
        User => "user",
        CrmConnection => "crm_connection",
        MeetingSession => "meeting_session",
        AccountMapping => "account_mapping",
        ApiRateLimit => "api_rate_limit",
        AuditRecord => "audit_record",
    }
}
