//! Cache key naming
//!
//! Keys are `prefix:scope:id:kind`. Each component is escaped so that ids or
//! kinds containing `:` cannot collide with a different `(id, kind)` pair.

use crate::domain::ports::CacheKind;

/// Escape `%` and `:` in one key component
pub(crate) fn escape(component: &str) -> String {
    if !component.contains([':', '%']) {
        return component.to_string();
    }
    component.replace('%', "%25").replace(':', "%3A")
}

/// Key for a per-user cache kind
pub fn user_key(prefix: &str, user_id: &str, kind: CacheKind) -> String {
    format!(
        "{}:user:{}:{}",
        escape(prefix),
        escape(user_id),
        kind.as_str()
    )
}

/// Key for a non-user resource, e.g. a generated workout
pub fn resource_key(prefix: &str, resource_id: &str, kind: &str) -> String {
    format!(
        "{}:resource:{}:{}",
        escape(prefix),
        escape(resource_id),
        escape(kind)
    )
}

// =============================================================================
// Tests
// =============================================================================
