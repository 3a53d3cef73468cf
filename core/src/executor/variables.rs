//! Variable store and `{{stepId.field}}` template resolution
//!
//! Values are always strings. Unknown placeholders resolve to the empty
//! string, and resolved output is never re-scanned.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::types::RunInput;

/// Producer id used for the seeded contact fields
pub const CONTACT_SCOPE: &str = "contact";

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{([A-Za-z0-9_-]+)\.([A-Za-z0-9_-]+)\}\}")
            .expect("placeholder pattern is a valid regex")
    })
}

/// Flat `"<stepId>.<field>"` → value mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableStore {
    values: BTreeMap<String, String>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the built-in `contact.*` variables from the run input
    pub fn seeded(input: &RunInput) -> Self {
        let mut store = Self::new();
        store.set(CONTACT_SCOPE, "id", &input.contact_id);
        store.set(CONTACT_SCOPE, "email", &input.contact_email);
        store.set(CONTACT_SCOPE, "firstName", &input.contact_first_name);
        store.set(CONTACT_SCOPE, "lastName", &input.contact_last_name);
        store.set(CONTACT_SCOPE, "phone", &input.contact_phone);
        store
    }

    pub fn set(&mut self, step_id: &str, field: &str, value: impl Into<String>) {
        self.values
            .insert(format!("{}.{}", step_id, field), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn lookup(&self, step_id: &str, field: &str) -> Option<&str> {
        self.get(&format!("{}.{}", step_id, field))
    }

    /// Replace every `{{id.field}}` with its stored value, or "" when absent
    pub fn resolve(&self, template: &str) -> String {
        placeholder()
            .replace_all(template, |caps: &regex::Captures<'_>| {
                self.lookup(&caps[1], &caps[2]).unwrap_or("").to_string()
            })
            .into_owned()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> VariableStore {
        let mut vars = VariableStore::new();
        vars.set("contact", "firstName", "Ada");
        vars.set("step1", "outcome", "approved");
        vars
    }

    #[test]
    fn test_resolve_known_placeholders() {
        let vars = store();
        assert_eq!(
            vars.resolve("Review {{contact.firstName}}: {{step1.outcome}}"),
            "Review Ada: approved"
        );
    }

    #[test]
    fn test_unresolved_placeholder_becomes_empty_string() {
        let vars = store();
        assert_eq!(vars.resolve("Hello {{contact.nickname}}!"), "Hello !");
        assert_eq!(vars.resolve("{{missing.value}}"), "");
    }

    #[test]
    fn test_non_matching_patterns_left_verbatim() {
        let vars = store();
        assert_eq!(
            vars.resolve("{{noDot}} {single.brace} {{ contact.firstName }}"),
            "{{noDot}} {single.brace} {{ contact.firstName }}"
        );
    }

    #[test]
    fn test_resolution_is_not_recursive() {
        let mut vars = VariableStore::new();
        vars.set("a", "x", "{{b.y}}");
        vars.set("b", "y", "deep");
        assert_eq!(vars.resolve("{{a.x}}"), "{{b.y}}");
    }

    #[test]
    fn test_second_pass_is_noop_without_placeholders() {
        let vars = VariableStore::new();
        let once = vars.resolve("Dear {{contact.firstName}}, ref {{x.y}}.");
        assert_eq!(once, "Dear , ref .");
        assert_eq!(vars.resolve(&once), once);
    }

    #[test]
    fn test_seeded_contact_fields() {
        let input = RunInput {
            contact_id: "c-1".into(),
            contact_email: "ada@example.com".into(),
            contact_first_name: "Ada".into(),
            contact_last_name: "Lovelace".into(),
            ..Default::default()
        };
        let vars = VariableStore::seeded(&input);
        assert_eq!(vars.get("contact.id"), Some("c-1"));
        assert_eq!(vars.get("contact.lastName"), Some("Lovelace"));
        assert_eq!(vars.get("contact.phone"), Some(""));
        assert_eq!(vars.len(), 5);
    }
}
