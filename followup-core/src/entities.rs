//! Tenant and tenant-scoped entities

use crate::{
    impl_tenant_scoped, new_entity_id, AuditCategory, AuditStatus, ConnectionStatus,
    CrmProviderKind, DeletionPolicy, EntityId, EntityKind, LimitPeriod, MappingSource, NewScoped,
    PlanTier, ProcessingStatus, Resource, SubscriptionStatus, TenantId, TenantScoped, Timestamp,
    UserRole,
};
use chrono::{Duration, Months};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of the trial granted to newly provisioned tenants.
pub const TRIAL_PERIOD_DAYS: i64 = 14;

// ============================================================================
// TENANT
// ============================================================================

/// One installed Slack workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    /// Slack team id. Unique among non-deleted tenants and never changed.
    pub external_id: String,
    pub name: String,
    pub domain: Option<String>,
    pub plan_tier: PlanTier,
    pub subscription_status: SubscriptionStatus,
    pub trial_ends_at: Option<Timestamp>,
    pub default_crm_provider: Option<CrmProviderKind>,
    pub timezone: String,
    pub locale: String,
    pub installed_at: Timestamp,
    pub installed_by_user_id: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

/// Why a known tenant is currently refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionReason {
    /// Subscription status outside `active`/`trial`.
    Status(SubscriptionStatus),
    TrialExpired,
}

impl SuspensionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuspensionReason::Status(status) => status.as_db_str(),
            SuspensionReason::TrialExpired => "trial_expired",
        }
    }
}

impl fmt::Display for SuspensionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data captured when a workspace installs the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    pub external_id: String,
    pub name: String,
    pub domain: Option<String>,
    pub installed_by_user_id: Option<String>,
}

impl Tenant {
    /// A fresh tenant on the free plan with a trial window starting at `now`.
    pub fn provisioned(installation: Installation, now: Timestamp) -> Self {
        Self {
            id: TenantId::now_v7(),
            external_id: installation.external_id,
            name: installation.name,
            domain: installation.domain,
            plan_tier: PlanTier::Free,
            subscription_status: SubscriptionStatus::Trial,
            trial_ends_at: Some(now + Duration::days(TRIAL_PERIOD_DAYS)),
            default_crm_provider: None,
            timezone: "UTC".to_string(),
            locale: "en".to_string(),
            installed_at: now,
            installed_by_user_id: installation.installed_by_user_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Subscription gate applied on every resolution.
    ///
    /// A trial ending exactly at `now` is still valid.
    pub fn check_access(&self, now: Timestamp) -> Result<(), SuspensionReason> {
        if !self.subscription_status.permits_access() {
            return Err(SuspensionReason::Status(self.subscription_status));
        }
        if self.subscription_status == SubscriptionStatus::Trial {
            if let Some(ends_at) = self.trial_ends_at {
                if ends_at < now {
                    return Err(SuspensionReason::TrialExpired);
                }
            }
        }
        Ok(())
    }
}

impl Resource for Tenant {
    const KIND: EntityKind = EntityKind::Tenant;

    fn resource_id(&self) -> EntityId {
        self.id.as_uuid()
    }

    fn owner(&self) -> Option<TenantId> {
        Some(self.id)
    }
}

// ============================================================================
// USER
// ============================================================================

/// Per-user notification toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub email_drafts: bool,
    pub calendar_events: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            email_drafts: true,
            calendar_events: true,
        }
    }
}

/// A Slack user inside one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: EntityId,
    pub tenant_id: TenantId,
    pub external_user_id: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub real_name: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    pub preferred_language: String,
    pub notification_settings: NotificationSettings,
    pub first_seen_at: Timestamp,
    pub last_active_at: Timestamp,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl_tenant_scoped!(User, EntityKind::User);

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub tenant_id: Option<TenantId>,
    pub external_user_id: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub real_name: Option<String>,
    pub role: UserRole,
}

impl NewUser {
    pub fn new(external_user_id: impl Into<String>) -> Self {
        Self {
            tenant_id: None,
            external_user_id: external_user_id.into(),
            username: None,
            email: None,
            real_name: None,
            role: UserRole::Member,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_role(mut self, role: UserRole) -> Self {
        self.role = role;
        self
    }
}

impl NewScoped for NewUser {
    type Entity = User;

    fn requested_tenant(&self) -> Option<TenantId> {
        self.tenant_id
    }

    fn build(self, tenant_id: TenantId, now: Timestamp) -> User {
        User {
            id: new_entity_id(),
            tenant_id,
            external_user_id: self.external_user_id,
            username: self.username,
            email: self.email,
            real_name: self.real_name,
            role: self.role,
            is_active: true,
            preferred_language: "en".to_string(),
            notification_settings: NotificationSettings::default(),
            first_seen_at: now,
            last_active_at: now,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

// ============================================================================
// CRM CONNECTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmConnection {
    pub id: EntityId,
    pub tenant_id: TenantId,
    pub provider: CrmProviderKind,
    pub connection_name: String,
    /// Reference into the secret manager, never the credential itself.
    pub credentials_secret_id: Option<String>,
    pub status: ConnectionStatus,
    pub is_default: bool,
    pub last_sync_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub connected_by_user_id: Option<EntityId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl_tenant_scoped!(CrmConnection, EntityKind::CrmConnection);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCrmConnection {
    pub tenant_id: Option<TenantId>,
    pub provider: CrmProviderKind,
    pub connection_name: String,
    pub credentials_secret_id: Option<String>,
    pub is_default: bool,
    pub connected_by_user_id: Option<EntityId>,
}

impl NewScoped for NewCrmConnection {
    type Entity = CrmConnection;

    fn requested_tenant(&self) -> Option<TenantId> {
        self.tenant_id
    }

    fn build(self, tenant_id: TenantId, now: Timestamp) -> CrmConnection {
        CrmConnection {
            id: new_entity_id(),
            tenant_id,
            provider: self.provider,
            connection_name: self.connection_name,
            credentials_secret_id: self.credentials_secret_id,
            status: ConnectionStatus::Active,
            is_default: self.is_default,
            last_sync_at: None,
            last_error: None,
            connected_by_user_id: self.connected_by_user_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

// ============================================================================
// MEETING SESSION
// ============================================================================

/// One follow-up request for one recorded meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingSession {
    pub id: EntityId,
    pub tenant_id: TenantId,
    pub user_id: EntityId,
    pub recording_id: String,
    pub meeting_title: Option<String>,
    pub meeting_date: Option<Timestamp>,
    pub processing_status: ProcessingStatus,
    pub crm_account_id: Option<String>,
    pub email_draft_id: Option<String>,
    pub calendar_event_id: Option<String>,
    pub crm_note_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl_tenant_scoped!(MeetingSession, EntityKind::MeetingSession);

impl MeetingSession {
    pub fn is_finished(&self) -> bool {
        matches!(
            self.processing_status,
            ProcessingStatus::Completed | ProcessingStatus::Failed
        )
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.processing_status = ProcessingStatus::Failed;
        self.error_message = Some(message.into());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMeetingSession {
    pub tenant_id: Option<TenantId>,
    pub user_id: EntityId,
    pub recording_id: String,
    pub meeting_title: Option<String>,
    pub meeting_date: Option<Timestamp>,
}

impl NewMeetingSession {
    pub fn new(user_id: EntityId, recording_id: impl Into<String>) -> Self {
        Self {
            tenant_id: None,
            user_id,
            recording_id: recording_id.into(),
            meeting_title: None,
            meeting_date: None,
        }
    }
}

impl NewScoped for NewMeetingSession {
    type Entity = MeetingSession;

    fn requested_tenant(&self) -> Option<TenantId> {
        self.tenant_id
    }

    fn build(self, tenant_id: TenantId, now: Timestamp) -> MeetingSession {
        MeetingSession {
            id: new_entity_id(),
            tenant_id,
            user_id: self.user_id,
            recording_id: self.recording_id,
            meeting_title: self.meeting_title,
            meeting_date: self.meeting_date,
            processing_status: ProcessingStatus::Pending,
            crm_account_id: None,
            email_draft_id: None,
            calendar_event_id: None,
            crm_note_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

// ============================================================================
// ACCOUNT MAPPING
// ============================================================================

/// A tenant's pinned answer to "which CRM account owns this email domain".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMapping {
    pub id: EntityId,
    pub tenant_id: TenantId,
    pub email_domain: String,
    pub crm_account_id: String,
    pub crm_account_name: Option<String>,
    pub mapping_source: MappingSource,
    pub verified: bool,
    pub times_used: i64,
    pub last_used_at: Option<Timestamp>,
    pub created_by_user_id: Option<EntityId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl_tenant_scoped!(AccountMapping, EntityKind::AccountMapping);

impl AccountMapping {
    pub fn record_use(&mut self, now: Timestamp) {
        self.times_used += 1;
        self.last_used_at = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccountMapping {
    pub tenant_id: Option<TenantId>,
    pub email_domain: String,
    pub crm_account_id: String,
    pub crm_account_name: Option<String>,
    pub mapping_source: MappingSource,
    pub created_by_user_id: Option<EntityId>,
}

impl NewScoped for NewAccountMapping {
    type Entity = AccountMapping;

    fn requested_tenant(&self) -> Option<TenantId> {
        self.tenant_id
    }

    fn build(self, tenant_id: TenantId, now: Timestamp) -> AccountMapping {
        AccountMapping {
            id: new_entity_id(),
            tenant_id,
            email_domain: crate::crm::normalize_domain(&self.email_domain),
            crm_account_id: self.crm_account_id,
            crm_account_name: self.crm_account_name,
            verified: self.mapping_source == MappingSource::Manual,
            mapping_source: self.mapping_source,
            times_used: 0,
            last_used_at: None,
            created_by_user_id: self.created_by_user_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

// ============================================================================
// API RATE LIMIT
// ============================================================================

impl LimitPeriod {
    /// End of a window that opens at `start`.
    pub fn period_end(&self, start: Timestamp) -> Timestamp {
        match self {
            LimitPeriod::Minute => start + Duration::minutes(1),
            LimitPeriod::Hourly => start + Duration::hours(1),
            LimitPeriod::Daily => start + Duration::days(1),
            LimitPeriod::Monthly => start
                .checked_add_months(Months::new(1))
                .unwrap_or(start + Duration::days(30)),
        }
    }
}

/// Usage counter for one resource in one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRateLimit {
    pub id: EntityId,
    pub tenant_id: TenantId,
    pub resource_type: String,
    pub limit_period: LimitPeriod,
    pub limit_value: i64,
    pub current_count: i64,
    pub period_start: Timestamp,
    pub period_end: Timestamp,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl_tenant_scoped!(ApiRateLimit, EntityKind::ApiRateLimit);

impl ApiRateLimit {
    pub fn is_exceeded(&self) -> bool {
        self.current_count >= self.limit_value
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.period_end
    }

    pub fn remaining(&self) -> i64 {
        (self.limit_value - self.current_count).max(0)
    }

    /// Count `amount` uses. Returns `false` and leaves the counter untouched
    /// when the limit is already reached.
    pub fn increment(&mut self, amount: i64) -> bool {
        if self.is_exceeded() {
            return false;
        }
        self.current_count += amount;
        true
    }

    /// Open a new window starting at `now`.
    pub fn reset(&mut self, now: Timestamp) {
        self.current_count = 0;
        self.period_start = now;
        self.period_end = self.limit_period.period_end(now);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewApiRateLimit {
    pub tenant_id: Option<TenantId>,
    pub resource_type: String,
    pub limit_period: LimitPeriod,
    pub limit_value: i64,
}

impl NewScoped for NewApiRateLimit {
    type Entity = ApiRateLimit;

    fn requested_tenant(&self) -> Option<TenantId> {
        self.tenant_id
    }

    fn build(self, tenant_id: TenantId, now: Timestamp) -> ApiRateLimit {
        ApiRateLimit {
            id: new_entity_id(),
            tenant_id,
            resource_type: self.resource_type,
            limit_period: self.limit_period,
            limit_value: self.limit_value,
            current_count: 0,
            period_start: now,
            period_end: self.limit_period.period_end(now),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

// ============================================================================
// AUDIT RECORD
// ============================================================================

/// Append-only audit trail entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: EntityId,
    pub tenant_id: TenantId,
    pub user_id: Option<EntityId>,
    pub event_type: String,
    pub event_category: AuditCategory,
    pub resource_type: Option<EntityKind>,
    pub resource_id: Option<EntityId>,
    pub action_description: Option<String>,
    pub metadata: serde_json::Value,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
}

impl Resource for AuditRecord {
    const KIND: EntityKind = EntityKind::AuditRecord;

    fn resource_id(&self) -> EntityId {
        self.id
    }

    fn owner(&self) -> Option<TenantId> {
        Some(self.tenant_id)
    }
}

impl TenantScoped for AuditRecord {
    const DELETION: DeletionPolicy = DeletionPolicy::Immutable;

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    fn created_at(&self) -> Timestamp {
        self.created_at
    }

    fn deleted_at(&self) -> Option<Timestamp> {
        None
    }

    // Audit rows have no deletion column; the scoped layer refuses before
    // reaching here.
    fn set_deleted_at(&mut self, _at: Option<Timestamp>) {}

    fn touch(&mut self, _at: Timestamp) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditRecord {
    pub tenant_id: Option<TenantId>,
    pub user_id: Option<EntityId>,
    pub event_type: String,
    pub event_category: AuditCategory,
    pub resource_type: Option<EntityKind>,
    pub resource_id: Option<EntityId>,
    pub action_description: Option<String>,
    pub metadata: serde_json::Value,
    pub status: AuditStatus,
    pub error_message: Option<String>,
}

impl NewAuditRecord {
    pub fn new(event_type: impl Into<String>, category: AuditCategory) -> Self {
        Self {
            tenant_id: None,
            user_id: None,
            event_type: event_type.into(),
            event_category: category,
            resource_type: None,
            resource_id: None,
            action_description: None,
            metadata: serde_json::Value::Object(Default::default()),
            status: AuditStatus::Success,
            error_message: None,
        }
    }

    pub fn for_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn resource(mut self, kind: EntityKind, id: EntityId) -> Self {
        self.resource_type = Some(kind);
        self.resource_id = Some(id);
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.action_description = Some(text.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn by_user(mut self, user_id: EntityId) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

impl NewScoped for NewAuditRecord {
    type Entity = AuditRecord;

    fn requested_tenant(&self) -> Option<TenantId> {
        self.tenant_id
    }

    fn build(self, tenant_id: TenantId, now: Timestamp) -> AuditRecord {
        AuditRecord {
            id: new_entity_id(),
            tenant_id,
            user_id: self.user_id,
            event_type: self.event_type,
            event_category: self.event_category,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            action_description: self.action_description,
            metadata: self.metadata,
            status: self.status,
            error_message: self.error_message,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn installation() -> Installation {
        Installation {
            external_id: "T0001".to_string(),
            name: "Acme".to_string(),
            domain: Some("acme".to_string()),
            installed_by_user_id: Some("U0001".to_string()),
        }
    }

    #[test]
    fn test_provisioned_tenant_gets_trial_defaults() {
        let now = Utc::now();
        let tenant = Tenant::provisioned(installation(), now);
        assert_eq!(tenant.plan_tier, PlanTier::Free);
        assert_eq!(tenant.subscription_status, SubscriptionStatus::Trial);
        assert_eq!(tenant.trial_ends_at, Some(now + Duration::days(14)));
        assert_eq!(tenant.timezone, "UTC");
        assert_eq!(tenant.locale, "en");
        assert!(tenant.check_access(now).is_ok());
    }

    #[test]
    fn test_trial_expiry_boundary() {
        let now = Utc::now();
        let mut tenant = Tenant::provisioned(installation(), now);

        tenant.trial_ends_at = Some(now - Duration::seconds(1));
        assert_eq!(tenant.check_access(now), Err(SuspensionReason::TrialExpired));

        tenant.trial_ends_at = Some(now + Duration::seconds(1));
        assert_eq!(tenant.check_access(now), Ok(()));

        tenant.trial_ends_at = Some(now);
        assert_eq!(tenant.check_access(now), Ok(()));
    }

    #[test]
    fn test_non_permitting_status_reports_status_value() {
        let now = Utc::now();
        let mut tenant = Tenant::provisioned(installation(), now);
        tenant.subscription_status = SubscriptionStatus::Cancelled;
        let reason = tenant.check_access(now).unwrap_err();
        assert_eq!(reason.as_str(), "cancelled");
    }

    #[test]
    fn test_active_tenant_ignores_stale_trial_date() {
        let now = Utc::now();
        let mut tenant = Tenant::provisioned(installation(), now);
        tenant.subscription_status = SubscriptionStatus::Active;
        tenant.trial_ends_at = Some(now - Duration::days(30));
        assert!(tenant.check_access(now).is_ok());
    }

    #[test]
    fn test_draft_build_sets_tenant_and_timestamps() {
        let now = Utc::now();
        let tenant_id = TenantId::now_v7();
        let user = NewUser::new("U123").with_username("sam").build(tenant_id, now);
        assert_eq!(user.tenant_id, tenant_id);
        assert_eq!(user.owner(), Some(tenant_id));
        assert_eq!(user.first_seen_at, now);
        assert!(!user.is_deleted());
    }

    #[test]
    fn test_rate_limit_counter_window() {
        let now = Utc::now();
        let mut limit = NewApiRateLimit {
            tenant_id: None,
            resource_type: "slash_command".to_string(),
            limit_period: LimitPeriod::Minute,
            limit_value: 2,
        }
        .build(TenantId::now_v7(), now);

        assert!(limit.increment(1));
        assert!(limit.increment(1));
        assert!(!limit.increment(1));
        assert_eq!(limit.remaining(), 0);

        let later = now + Duration::minutes(1);
        assert!(limit.is_expired(later));
        limit.reset(later);
        assert_eq!(limit.current_count, 0);
        assert_eq!(limit.period_end, later + Duration::minutes(1));
    }

    #[test]
    fn test_audit_record_is_immutable_kind() {
        assert_eq!(AuditRecord::DELETION, DeletionPolicy::Immutable);
        assert_eq!(User::DELETION, DeletionPolicy::Soft);
    }

    #[test]
    fn test_manual_mapping_is_verified_and_domain_normalized() {
        let mapping = NewAccountMapping {
            tenant_id: None,
            email_domain: "WWW.Acme.com".to_string(),
            crm_account_id: "acc-1".to_string(),
            crm_account_name: None,
            mapping_source: MappingSource::Manual,
            created_by_user_id: None,
        }
        .build(TenantId::now_v7(), Utc::now());
        assert_eq!(mapping.email_domain, "acme.com");
        assert!(mapping.verified);
    }
}
