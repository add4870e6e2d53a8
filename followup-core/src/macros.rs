//! Utility macros for reducing boilerplate

/// Implements [`Resource`](crate::Resource) and
/// [`TenantScoped`](crate::TenantScoped) for an entity with `id`,
/// `tenant_id`, `created_at`, `updated_at` and `deleted_at` fields.
///
/// # Example
/// ```ignore
/// impl_tenant_scoped!(User, EntityKind::User);
/// ```
#[macro_export]
macro_rules! impl_tenant_scoped {
    ($type:ty, $kind:expr) => {
        impl $crate::Resource for $type {
            const KIND: $crate::EntityKind = $kind;

            fn resource_id(&self) -> $crate::EntityId {
                self.id
            }

            fn owner(&self) -> Option<$crate::TenantId> {
                Some(self.tenant_id)
            }
        }

        impl $crate::TenantScoped for $type {
            fn tenant_id(&self) -> $crate::TenantId {
                self.tenant_id
            }

            fn created_at(&self) -> $crate::Timestamp {
                self.created_at
            }

            fn deleted_at(&self) -> Option<$crate::Timestamp> {
                self.deleted_at
            }

            fn set_deleted_at(&mut self, at: Option<$crate::Timestamp>) {
                self.deleted_at = at;
            }

            fn touch(&mut self, at: $crate::Timestamp) {
                self.updated_at = at;
            }
        }
    };
}
