//! Utility macros for reducing boilerplate

/// Macro to implement `FromRef<AppState<D>>` for state extractors.
///
/// The state is generic over the store, so the impl is generic over every
/// `D: Database`.
///
/// # Example
/// ```ignore
/// impl_from_ref!(Arc<TenantCache>, cache);
/// // Expands to:
/// impl<D: followup_storage::Database> axum::extract::FromRef<AppState<D>> for Arc<TenantCache> {
///     fn from_ref(state: &AppState<D>) -> Self {
///         state.cache.clone()
///     }
/// }
/// ```
#[macro_export]
macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl<D: followup_storage::Database> axum::extract::FromRef<$crate::state::AppState<D>>
            for $type
        {
            fn from_ref(state: &$crate::state::AppState<D>) -> Self {
                state.$field.clone()
            }
        }
    };
}
