use serde_json::{Map, Value};

/// Final enrichment steps shared by both loggers, in precedence order:
/// dynamic meta overwrites computed keys, the result is optionally nested
/// under `meta_field`, and base meta is merged last at the top level.
pub fn enrich(
    mut meta: Map<String, Value>,
    dynamic: Option<Map<String, Value>>,
    meta_field: Option<&str>,
    base_meta: &Map<String, Value>,
) -> Map<String, Value> {
    if let Some(dynamic) = dynamic {
        meta.extend(dynamic);
    }

    if let Some(field) = meta_field {
        let mut wrapped = Map::new();
        wrapped.insert(field.to_string(), Value::Object(meta));
        meta = wrapped;
    }

    meta.extend(base_meta.iter().map(|(k, v)| (k.clone(), v.clone())));
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn dynamic_overrides_computed() {
        let meta = enrich(
            map(json!({"req": {"url": "/"}, "responseTime": 3})),
            Some(map(json!({"responseTime": "fast", "user": 7}))),
            None,
            &Map::new(),
        );
        assert_eq!(
            Value::Object(meta),
            json!({"req": {"url": "/"}, "responseTime": "fast", "user": 7})
        );
    }

    #[test]
    fn wrap_then_base() {
        let meta = enrich(
            map(json!({"responseTime": 3})),
            Some(map(json!({"dyn": true}))),
            Some("foo"),
            &map(json!({"service": "api", "foo": "base wins"})),
        );
        assert_eq!(
            Value::Object(meta),
            json!({"foo": "base wins", "service": "api"})
        );
    }

    #[test]
    fn wrapped_meta_keeps_base_as_sibling() {
        let meta = enrich(
            map(json!({"responseTime": 3})),
            None,
            Some("http"),
            &map(json!({"service": "api"})),
        );
        assert_eq!(
            Value::Object(meta),
            json!({"http": {"responseTime": 3}, "service": "api"})
        );
    }
}
