//! Whitelist filtering of requests, responses and request bodies.

use serde_json::{Map, Value};
use std::sync::Arc;

/// Anything the logger can pull named fields out of.
///
/// `None` means the field is absent and is skipped by [`filter_object`];
/// `Some(Value::Null)` is a present field whose value happens to be null.
pub trait FieldSource {
    fn field(&self, name: &str) -> Option<Value>;

    /// Names of every field currently present, in a stable order.
    fn field_names(&self) -> Vec<String> {
        Vec::new()
    }
}

impl FieldSource for Map<String, Value> {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    fn field_names(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }
}

impl FieldSource for Value {
    fn field(&self, name: &str) -> Option<Value> {
        match self {
            Value::Object(map) => map.field(name),
            _ => None,
        }
    }

    fn field_names(&self) -> Vec<String> {
        match self {
            Value::Object(map) => map.field_names(),
            _ => Vec::new(),
        }
    }
}

/// Extraction function `(source, field) -> value`, applied per whitelisted field.
pub type FieldFilter = Arc<dyn Fn(&dyn FieldSource, &str) -> Option<Value> + Send + Sync>;

/// Reads the field straight off the source.
pub fn default_field_filter() -> FieldFilter {
    Arc::new(|source: &dyn FieldSource, name: &str| source.field(name))
}

/// Copies every allowed field that resolves to a value.
///
/// Returns `None` rather than an empty map when nothing matched, so callers
/// omit the key instead of logging `{}`. Duplicate names collapse.
pub fn filter_object<F>(
    source: &dyn FieldSource,
    allowed: &[String],
    filter: &F,
) -> Option<Map<String, Value>>
where
    F: Fn(&dyn FieldSource, &str) -> Option<Value> + ?Sized,
{
    let mut filtered = Map::new();
    for name in allowed {
        if filtered.contains_key(name) {
            continue;
        }
        if let Some(value) = filter(source, name) {
            filtered.insert(name.clone(), value);
        }
    }

    if filtered.is_empty() {
        None
    } else {
        Some(filtered)
    }
}

/// Decides which request-body fields reach the log. First matching rule wins:
///
/// 1. no parsed body: `None`;
/// 2. blacklist set, whitelist empty: filter on body keys ∪ blacklist;
/// 3. request whitelist names `body`, both body lists empty: the whole body;
/// 4. otherwise: filter on the body whitelist.
///
/// Rule 2 unions the blacklist into the field set instead of subtracting it,
/// so blacklisted keys are still logged unless the filter function drops them.
pub fn filter_body<F>(
    body: Option<&Value>,
    request_whitelist: &[String],
    filter: &F,
    body_whitelist: &[String],
    body_blacklist: &[String],
) -> Option<Map<String, Value>>
where
    F: Fn(&dyn FieldSource, &str) -> Option<Value> + ?Sized,
{
    let body = body?;

    if !body_blacklist.is_empty() && body_whitelist.is_empty() {
        let fields = union(&body.field_names(), body_blacklist);
        return filter_object(body, &fields, filter);
    }

    if request_whitelist.iter().any(|f| f == "body")
        && body_whitelist.is_empty()
        && body_blacklist.is_empty()
    {
        return filter_object(body, &body.field_names(), filter);
    }

    filter_object(body, body_whitelist, filter)
}

/// Concatenates two field lists, keeping first occurrences only.
pub fn union(base: &[String], extra: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(base.len() + extra.len());
    for name in base.iter().chain(extra) {
        if !merged.contains(name) {
            merged.push(name.clone());
        }
    }
    merged
}
