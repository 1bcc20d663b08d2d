//! Structural comparison of entity bodies.
//!
//! Paths are dotted: object fields append `.name`, array elements append
//! `.index` (`tags.0`, `address.city`). Changes at the root of non-object
//! bodies are reported under [`ROOT_PATH`].

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Path reported for a change of the whole body.
pub const ROOT_PATH: &str = "$";

/// Before and after values of a changed field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    /// Value in the older body.
    pub from: Value,
    /// Value in the newer body.
    pub to: Value,
}

/// Differences between two entity bodies.
///
/// Maps are keyed by dotted path so reports are ordered and stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffResult {
    /// Version the comparison starts from.
    pub from_version: Option<u32>,
    /// Version the comparison ends at; `None` for the live entity.
    pub to_version: Option<u32>,
    /// Fields present only in the newer body.
    pub added: BTreeMap<String, Value>,
    /// Fields present only in the older body.
    pub removed: BTreeMap<String, Value>,
    /// Fields whose value changed but kept its JSON type.
    pub modified: BTreeMap<String, FieldChange>,
    /// Fields whose JSON type changed.
    pub type_changed: BTreeMap<String, FieldChange>,
    /// Sum of all change counts.
    pub total_changes: usize,
}

impl DiffResult {
    /// Returns true if the bodies are equal (modulo ignored fields).
    pub fn is_empty(&self) -> bool {
        self.total_changes == 0
    }

    /// Every changed path, sorted.
    pub fn changed_paths(&self) -> BTreeSet<&str> {
        self.added
            .keys()
            .chain(self.removed.keys())
            .chain(self.modified.keys())
            .chain(self.type_changed.keys())
            .map(String::as_str)
            .collect()
    }
}

/// Comparison options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Field names skipped at any depth.
    pub ignore_fields: BTreeSet<String>,
    /// Containers deeper than this are compared as opaque values.
    pub max_depth: Option<usize>,
}

impl DiffOptions {
    /// Creates default options: nothing ignored, unlimited depth.
    pub fn new() -> Self {
        Self::default()
    }

    /// Skips a field name at every depth.
    #[must_use]
    pub fn ignore_field(mut self, name: impl Into<String>) -> Self {
        self.ignore_fields.insert(name.into());
        self
    }

    /// Limits recursion depth. With `max_depth(0)` top-level fields are
    /// compared as whole values.
    #[must_use]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }
}

/// Recursive body comparison.
#[derive(Debug, Clone, Default)]
pub struct VersionDiff {
    options: DiffOptions,
}

impl VersionDiff {
    /// Creates a differ with `options`.
    pub fn new(options: DiffOptions) -> Self {
        Self { options }
    }

    /// The active options.
    pub fn options(&self) -> &DiffOptions {
        &self.options
    }

    /// Compares `from` against `to`, tagging the result with version numbers.
    pub fn compare(
        &self,
        from: &Value,
        to: &Value,
        from_version: Option<u32>,
        to_version: Option<u32>,
    ) -> DiffResult {
        let mut result = DiffResult {
            from_version,
            to_version,
            ..DiffResult::default()
        };
        self.walk(from, to, None, 0, &mut result);
        result.total_changes = result.added.len()
            + result.removed.len()
            + result.modified.len()
            + result.type_changed.len();
        result
    }

    fn walk(&self, from: &Value, to: &Value, path: Option<&str>, depth: usize, out: &mut DiffResult) {
        let descend = !matches!(self.options.max_depth, Some(max) if depth > max);
        match (from, to) {
            (Value::Object(a), Value::Object(b)) if descend => {
                for (key, old) in a {
                    if self.options.ignore_fields.contains(key) {
                        continue;
                    }
                    let child = join(path, key);
                    match b.get(key) {
                        Some(new) => self.walk(old, new, Some(&child), depth + 1, out),
                        None => {
                            out.removed.insert(child, old.clone());
                        }
                    }
                }
                for (key, new) in b {
                    if !a.contains_key(key) && !self.options.ignore_fields.contains(key) {
                        out.added.insert(join(path, key), new.clone());
                    }
                }
            }
            (Value::Array(a), Value::Array(b)) if descend => {
                for (i, old) in a.iter().enumerate() {
                    let child = join(path, &i.to_string());
                    match b.get(i) {
                        Some(new) => self.walk(old, new, Some(&child), depth + 1, out),
                        None => {
                            out.removed.insert(child, old.clone());
                        }
                    }
                }
                for (i, new) in b.iter().enumerate().skip(a.len()) {
                    out.added.insert(join(path, &i.to_string()), new.clone());
                }
            }
            _ if from == to => {}
            _ => {
                let change = FieldChange {
                    from: from.clone(),
                    to: to.clone(),
                };
                let key = path.unwrap_or(ROOT_PATH).to_string();
                if type_name(from) == type_name(to) {
                    out.modified.insert(key, change);
                } else {
                    out.type_changed.insert(key, change);
                }
            }
        }
    }
}

fn join(parent: Option<&str>, key: &str) -> String {
    match parent {
        Some(parent) => format!("{parent}.{key}"),
        None => key.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn diff(a: &Value, b: &Value) -> DiffResult {
        VersionDiff::default().compare(a, b, Some(1), Some(2))
    }

    #[test]
    fn equal_bodies_have_no_changes() {
        let body = json!({"a": 1, "b": {"c": [1, 2]}});
        let result = diff(&body, &body);
        assert!(result.is_empty());
        assert_eq!(result.from_version, Some(1));
        assert_eq!(result.to_version, Some(2));
    }

    #[test]
    fn top_level_changes() {
        let a = json!({"name": "alice", "age": 30, "city": "paris"});
        let b = json!({"name": "alice", "age": 31, "email": "a@x"});
        let result = diff(&a, &b);

        assert_eq!(result.added["email"], json!("a@x"));
        assert_eq!(result.removed["city"], json!("paris"));
        assert_eq!(result.modified["age"].from, json!(30));
        assert_eq!(result.modified["age"].to, json!(31));
        assert_eq!(result.total_changes, 3);
    }

    #[test]
    fn nested_objects_and_arrays_use_dotted_paths() {
        let a = json!({"address": {"city": "paris", "zip": "75001"}, "tags": ["a", "b", "c"]});
        let b = json!({"address": {"city": "lyon", "zip": "75001"}, "tags": ["a", "x"]});
        let result = diff(&a, &b);

        assert!(result.modified.contains_key("address.city"));
        assert!(result.modified.contains_key("tags.1"));
        assert_eq!(result.removed["tags.2"], json!("c"));
        assert_eq!(result.total_changes, 3);
    }

    #[test]
    fn type_changes_are_separate() {
        let result = diff(&json!({"v": 1, "w": null}), &json!({"v": "1", "w": {}}));
        assert_eq!(result.type_changed.len(), 2);
        assert!(result.modified.is_empty());
        assert_eq!(result.type_changed["v"].to, json!("1"));
    }

    #[test]
    fn ignored_fields_are_skipped_at_any_depth() {
        let differ = VersionDiff::new(DiffOptions::new().ignore_field("_updatedAt"));
        let a = json!({"_updatedAt": 1, "inner": {"_updatedAt": 1, "x": 1}});
        let b = json!({"_updatedAt": 2, "inner": {"_updatedAt": 2, "x": 1}, "extra": null});
        let result = differ.compare(&a, &b, None, None);

        assert_eq!(result.changed_paths().into_iter().collect::<Vec<_>>(), vec!["extra"]);
    }

    #[test]
    fn max_depth_compares_deep_subtrees_opaquely() {
        let differ = VersionDiff::new(DiffOptions::new().max_depth(0));
        let a = json!({"deep": {"x": 1, "y": 2}});
        let b = json!({"deep": {"x": 1, "y": 3}});
        let result = differ.compare(&a, &b, None, None);

        assert_eq!(result.modified.len(), 1);
        assert_eq!(result.modified["deep"].to, json!({"x": 1, "y": 3}));
    }

    #[test]
    fn swapped_comparison_is_symmetric() {
        let a = json!({"a": 1, "b": [1, 2], "c": {"d": true}});
        let b = json!({"a": 2, "b": [1], "e": "new"});
        let forward = diff(&a, &b);
        let backward = diff(&b, &a);

        assert_eq!(forward.added, backward.removed);
        assert_eq!(forward.removed, backward.added);
        assert_eq!(
            forward.modified.keys().collect::<Vec<_>>(),
            backward.modified.keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn non_object_roots() {
        let result = diff(&json!(1), &json!(2));
        assert!(result.modified.contains_key(ROOT_PATH));
    }
}
