//! Helpers shared by dispatchers.

use serde_json::Value;

/// Maximum length of a response body kept in an error detail.
pub const MAX_BODY_LENGTH: usize = 2000;

/// Truncate a string to at most `max_len` bytes on a char boundary.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let cut = (0..=max_len)
        .rev()
        .find(|i| s.is_char_boundary(*i))
        .unwrap_or(0);
    format!("{}... [truncated]", &s[..cut])
}

/// Replaces values of credential-looking keys (`authorization`, `token`,
/// `secret`, `password`, `api_key`) with `"***"`, recursively.
pub fn redact_sensitive_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| {
                    let key_lower = key.to_lowercase();
                    let sensitive = ["authorization", "token", "secret", "password", "api_key", "apikey"]
                        .iter()
                        .any(|needle| key_lower.contains(needle));
                    let val = if sensitive && !val.is_object() {
                        Value::String("***".to_string())
                    } else {
                        redact_sensitive_json(val)
                    };
                    (key.clone(), val)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_json).collect()),
        other => other.clone(),
    }
}
