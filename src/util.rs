use std::collections::BTreeMap;

/// Kubernetes API objects leave unset strings out; "" maps to None.
pub fn non_empty(value: &str) -> Option<String> {
    match value {
        "" => None,
        _ => Some(value.to_string()),
    }
}

pub fn string_map<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
