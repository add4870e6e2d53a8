//! Rate Limit Service
//!
//! Per-tenant usage counters stored as `ApiRateLimit` rows, one per
//! resource and period.

use chrono::Utc;
use followup_core::{ApiRateLimit, LimitPeriod, NewApiRateLimit};
use followup_storage::{create_scoped, lookup_scoped, update_scoped, EntityStore, LookupStore};

use crate::error::ApiResult;

/// Slash command invocations.
pub const SLASH_COMMAND_RESOURCE: &str = "slash_command";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: i64 },
    Refused { retry_after_secs: i64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Count one use of `resource` for the current tenant.
///
/// The counter row is created on first use and its window restarts once the
/// period has elapsed. A refused use is not counted.
pub async fn check_and_increment<S>(
    store: &S,
    resource: &str,
    period: LimitPeriod,
    limit: i64,
) -> ApiResult<RateDecision>
where
    S: EntityStore<ApiRateLimit> + LookupStore + ?Sized,
{
    let counter = match find_counter(store, resource, period).await? {
        Some(counter) => counter,
        None => {
            create_scoped(
                store,
                NewApiRateLimit {
                    tenant_id: None,
                    resource_type: resource.to_string(),
                    limit_period: period,
                    limit_value: limit,
                },
            )
            .await?
        }
    };

    let now = Utc::now();
    let mut next = counter.clone();
    next.limit_value = limit;
    if next.is_expired(now) {
        next.reset(now);
    }

    if !next.increment(1) {
        let retry_after_secs = (next.period_end - now).num_seconds().max(1);
        tracing::info!(
            resource,
            period = %period,
            limit,
            retry_after_secs,
            "rate limit reached"
        );
        return Ok(RateDecision::Refused { retry_after_secs });
    }

    let remaining = next.remaining();
    update_scoped(store, counter, move |row| *row = next).await?;
    Ok(RateDecision::Allowed { remaining })
}

async fn find_counter<S>(
    store: &S,
    resource: &str,
    period: LimitPeriod,
) -> ApiResult<Option<ApiRateLimit>>
where
    S: LookupStore + ?Sized,
{
    Ok(lookup_scoped(|tenant_id| store.rate_limit_counter(tenant_id, resource, period)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use followup_core::{Installation, Tenant};
    use followup_storage::{context::with_tenant, MockStorage};
    use std::sync::Arc;

    fn tenant(external_id: &str) -> Arc<Tenant> {
        Arc::new(Tenant::provisioned(
            Installation {
                external_id: external_id.to_string(),
                name: external_id.to_string(),
                domain: None,
                installed_by_user_id: None,
            },
            Utc::now(),
        ))
    }

    #[tokio::test]
    async fn test_counts_until_limit() {
        let storage = MockStorage::new();
        with_tenant(tenant("T1"), async {
            for expected in [2, 1, 0] {
                let decision =
                    check_and_increment(&storage, SLASH_COMMAND_RESOURCE, LimitPeriod::Hourly, 3)
                        .await
                        .expect("decision");
                assert_eq!(decision, RateDecision::Allowed { remaining: expected });
            }
            let refused = check_and_increment(&storage, SLASH_COMMAND_RESOURCE, LimitPeriod::Hourly, 3)
                .await
                .expect("decision");
            assert!(matches!(refused, RateDecision::Refused { retry_after_secs } if retry_after_secs > 0));
        })
        .await
        .expect("context");
    }

    #[tokio::test]
    async fn test_counters_are_per_tenant() {
        let storage = MockStorage::new();
        for external_id in ["T1", "T2"] {
            let decision = with_tenant(
                tenant(external_id),
                check_and_increment(&storage, SLASH_COMMAND_RESOURCE, LimitPeriod::Hourly, 1),
            )
            .await
            .expect("context")
            .expect("decision");
            assert!(decision.is_allowed(), "{external_id} has its own counter");
        }
    }

    #[tokio::test]
    async fn test_expired_window_resets() {
        let storage = MockStorage::new();
        with_tenant(tenant("T1"), async {
            check_and_increment(&storage, "api", LimitPeriod::Minute, 1)
                .await
                .expect("first");

            let mut row = find_counter(&storage, "api", LimitPeriod::Minute)
                .await
                .expect("query")
                .expect("row");
            row.period_start = Utc::now() - chrono::Duration::minutes(5);
            row.period_end = Utc::now() - chrono::Duration::minutes(4);
            EntityStore::<ApiRateLimit>::update(&storage, &row)
                .await
                .expect("age the window");

            let decision = check_and_increment(&storage, "api", LimitPeriod::Minute, 1)
                .await
                .expect("after expiry");
            assert_eq!(decision, RateDecision::Allowed { remaining: 0 });
        })
        .await
        .expect("context");
    }
}
