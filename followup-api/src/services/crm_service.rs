//! CRM Service
//!
//! Default provider lookup and email-domain to account resolution for the
//! current tenant.

use chrono::Utc;
use followup_core::{
    match_account, normalize_domain, AccountMapping, CrmAccount, CrmConnection, CrmProvider,
    MatchOutcome, MatchRule,
};
use followup_storage::{scoped_query, update_scoped, EntityStore};

use crate::error::ApiResult;

/// The tenant's default CRM provider, if one is connected.
pub async fn default_provider<S>(store: &S) -> ApiResult<Option<CrmProvider>>
where
    S: EntityStore<CrmConnection> + ?Sized,
{
    let connection = scoped_query::<CrmConnection, S>(store)?
        .filter(|c| c.is_default)
        .first()
        .await?;

    match connection {
        Some(connection) => Ok(Some(CrmProvider::from_connection(&connection)?)),
        None => Ok(None),
    }
}

/// Resolve the CRM account for an attendee email domain.
///
/// `candidates` are the accounts a CRM search returned for the domain. A
/// match through a stored mapping counts as a use of that mapping.
pub async fn resolve_account<S>(
    store: &S,
    email_domain: &str,
    candidates: &[CrmAccount],
) -> ApiResult<MatchOutcome>
where
    S: EntityStore<AccountMapping> + ?Sized,
{
    let domain = normalize_domain(email_domain);
    let wanted = domain.clone();
    let mappings = scoped_query::<AccountMapping, S>(store)?
        .filter(move |m| normalize_domain(&m.email_domain) == wanted)
        .all()
        .await?;

    let outcome = match_account(&domain, &mappings, candidates);
    match &outcome {
        MatchOutcome::Matched(found) if found.rule == MatchRule::Mapped => {
            if let Some(mapping) = mappings
                .into_iter()
                .find(|m| m.crm_account_id == found.account_id)
            {
                let now = Utc::now();
                update_scoped(store, mapping, move |m| m.record_use(now)).await?;
            }
        }
        MatchOutcome::Ambiguous { rule, account_ids } => {
            tracing::info!(domain = %domain, rule = ?rule, candidates = account_ids.len(), "ambiguous account match");
        }
        _ => {}
    }
    Ok(outcome)
}
