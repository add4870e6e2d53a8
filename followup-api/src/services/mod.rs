//! Service Layer
//!
//! Tenant-scoped business operations behind the Slack handlers. Every
//! function here runs against the store through the scoped layer, so it
//! needs a tenant context to be established.

pub mod crm_service;
pub mod meeting_service;
pub mod rate_limit;
pub mod user_service;

pub use crm_service::{default_provider, resolve_account};
pub use meeting_service::{load_session, mark_failed, open_session, recent_sessions, transition};
pub use rate_limit::{check_and_increment, RateDecision, SLASH_COMMAND_RESOURCE};
pub use user_service::{find_user, record_interaction, Interaction};
