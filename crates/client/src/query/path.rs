//! Reference parameters: ids picked out of another query's response.

use graphcache_core::record::DataId;
use serde_json::Value;

use super::QueryId;

/// A path into the response of query `query`, e.g. `$.*.actor.id`.
///
/// `*` matches every entry of an object or array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefParam {
    pub query: QueryId,
    pub path: Vec<String>,
}

impl RefParam {
    pub fn new(query: QueryId, path: &str) -> Self {
        let path = path
            .split('.')
            .filter(|segment| !segment.is_empty() && *segment != "$")
            .map(str::to_string)
            .collect();
        Self { query, path }
    }

    /// Every id the path reaches in `response`. Numbers are read as strings.
    pub fn resolve(&self, response: &Value) -> Vec<DataId> {
        let mut current = vec![response];
        for segment in &self.path {
            current = current
                .into_iter()
                .flat_map(|value| -> Vec<&Value> {
                    match (segment.as_str(), value) {
                        ("*", Value::Object(map)) => map.values().collect(),
                        ("*", Value::Array(items)) => items.iter().collect(),
                        (key, Value::Object(map)) => map.get(key).into_iter().collect(),
                        (key, Value::Array(items)) => {
                            key.parse::<usize>().ok().and_then(|i| items.get(i)).into_iter().collect()
                        }
                        _ => Vec::new(),
                    }
                })
                .collect();
        }

        let mut ids: Vec<DataId> = Vec::new();
        for value in current {
            let id = match value {
                Value::String(s) => DataId::new(s.as_str()),
                Value::Number(n) => DataId::new(n.to_string()),
                _ => continue,
            };
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_resolve_with_wildcard() {
        let param = RefParam::new(QueryId::next(), "$.*.actor.id");
        let response = json!({"viewer": {"actor": {"id": "660361306"}}});
        assert_eq!(param.resolve(&response), vec![DataId::from("660361306")]);
    }

    #[test]
    fn test_resolve_fans_out_over_arrays() {
        let param = RefParam::new(QueryId::next(), "$.*.friends.*.id");
        let response = json!({"me": {"friends": [{"id": 1}, {"id": "2"}, {"name": "no id"}, {"id": 1}]}});
        assert_eq!(param.resolve(&response), vec![DataId::from("1"), DataId::from("2")]);
    }

    #[test]
    fn test_resolve_missing_path() {
        let param = RefParam::new(QueryId::next(), "$.viewer.actor.id");
        assert!(param.resolve(&json!({"viewer": null})).is_empty());
    }
}
