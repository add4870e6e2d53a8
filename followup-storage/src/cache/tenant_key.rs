//! Cache keys for tenant projections.
//!
//! Keys are only built through [`TenantCacheKey::external_id`], so every key
//! the tenant cache touches shares the `tenant:external_id:` namespace.

/// Namespace of every tenant projection key.
pub const TENANT_KEY_PREFIX: &str = "tenant:external_id:";

/// Key of one tenant projection, `tenant:external_id:{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantCacheKey {
    inner: String,
}

impl TenantCacheKey {
    pub fn external_id(external_id: &str) -> Self {
        Self {
            inner: format!("{TENANT_KEY_PREFIX}{external_id}"),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// The external id this key was built from.
    pub fn external_id_part(&self) -> &str {
        &self.inner[TENANT_KEY_PREFIX.len()..]
    }
}

impl AsRef<str> for TenantCacheKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
