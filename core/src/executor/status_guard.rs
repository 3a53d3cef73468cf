//! Status guard
//!
//! Constrains business statuses to the tenant's optional status schema and
//! decides whether the synthetic `timeout` / `failed` statuses can be written
//! or must degrade to an execution-state-only transition.

use crate::types::StatusSchema;

pub const TIMEOUT_STATUS: &str = "timeout";
pub const FAILED_STATUS: &str = "failed";
pub const COMPLETED_STATUS: &str = "completed";

#[derive(Debug, Clone)]
pub struct StatusGuard<'a> {
    schema: &'a StatusSchema,
}

impl<'a> StatusGuard<'a> {
    pub fn new(schema: &'a StatusSchema) -> Self {
        Self { schema }
    }

    /// Whether an authored status may be written
    ///
    /// Always true for schema-less definitions.
    pub fn is_legal(&self, status: &str) -> bool {
        self.schema.is_empty() || self.schema.contains(status)
    }

    /// Resolve a synthetic status (`timeout`, `failed`)
    ///
    /// Returns the candidate only when the tenant's schema declares it. An empty
    /// schema yields `None` as well: tenants without a vocabulary never get a
    /// synthetic business status forced onto them, and callers record the
    /// outcome as an execution-state transition only.
    pub fn resolve_system_status(&self, candidate: &str) -> Option<String> {
        if self.schema.contains(candidate) {
            Some(candidate.to_string())
        } else {
            None
        }
    }

    /// Status reported when a run finishes without any `update_status`
    pub fn default_final_status(&self) -> String {
        self.schema
            .lowest()
            .map(|entry| entry.id.clone())
            .unwrap_or_else(|| COMPLETED_STATUS.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StatusEntry;

    fn schema(ids: &[(&str, i32)]) -> StatusSchema {
        StatusSchema::new(
            ids.iter()
                .map(|(id, order)| StatusEntry {
                    id: id.to_string(),
                    label: id.to_string(),
                    order: *order,
                })
                .collect(),
        )
    }

    #[test]
    fn test_empty_schema_accepts_any_status() {
        let empty = StatusSchema::default();
        let guard = StatusGuard::new(&empty);
        assert!(guard.is_legal("anything"));
        assert!(guard.is_legal("rejected"));
    }

    #[test]
    fn test_schema_membership() {
        let s = schema(&[("draft", 0), ("approved", 1)]);
        let guard = StatusGuard::new(&s);
        assert!(guard.is_legal("approved"));
        assert!(!guard.is_legal("rejected"));
    }

    #[test]
    fn test_system_status_requires_schema_entry() {
        let s = schema(&[("draft", 0), ("timeout", 5)]);
        let guard = StatusGuard::new(&s);
        assert_eq!(guard.resolve_system_status(TIMEOUT_STATUS), Some("timeout".to_string()));
        assert_eq!(guard.resolve_system_status(FAILED_STATUS), None);
    }

    #[test]
    fn test_system_status_degrades_without_schema() {
        let empty = StatusSchema::default();
        let guard = StatusGuard::new(&empty);
        assert_eq!(guard.resolve_system_status(TIMEOUT_STATUS), None);
        assert_eq!(guard.resolve_system_status(FAILED_STATUS), None);
    }

    #[test]
    fn test_default_final_status() {
        let s = schema(&[("review", 3), ("new", 1), ("closed", 9)]);
        assert_eq!(StatusGuard::new(&s).default_final_status(), "new");

        let empty = StatusSchema::default();
        assert_eq!(StatusGuard::new(&empty).default_final_status(), "completed");
    }
}
