//! `{{key}}` placeholder substitution (§4.I).
//!
//! Generalizes the teacher's ad hoc `.replace("{placeholder}", value)`
//! chains in `render_notification_message` into a single pass over an
//! arbitrary key/value map. Matching is exact-token (`{{key}}`, no inner
//! whitespace tolerance); a key absent from the map is left in the output
//! literally rather than substituted with an empty string, so a caller can
//! tell a missing variable from an intentionally blank one.

use serde_json::Value;
use std::collections::HashMap;

pub fn render(body: &str, variables: &HashMap<String, Value>) -> String {
    let mut out = String::with_capacity(body.len());
    let bytes = body.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(end) = body[i + 2..].find("}}") {
                let key = &body[i + 2..i + 2 + end];
                if let Some(value) = variables.get(key) {
                    out.push_str(&value_to_string(value));
                } else {
                    out.push_str(&body[i..i + 2 + end + 2]);
                }
                i = i + 2 + end + 2;
                continue;
            }
        }
        let ch = body[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }

    out
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn substitutes_known_keys() {
        let body = "Hello {{name}}, your order {{order_id}} shipped.";
        let vars = vars(&[
            ("name", json!("Ada")),
            ("order_id", json!("A-123")),
        ]);
        assert_eq!(render(body, &vars), "Hello Ada, your order A-123 shipped.");
    }

    #[test]
    fn leaves_unknown_keys_literal() {
        let body = "Hi {{name}}, code {{otp}}";
        let vars = vars(&[("name", json!("Bo"))]);
        assert_eq!(render(body, &vars), "Hi Bo, code {{otp}}");
    }

    #[test]
    fn no_whitespace_tolerance_inside_braces() {
        let body = "{{ name }}";
        let vars = vars(&[("name", json!("Cy"))]);
        // " name " (with spaces) is not the same key as "name"; left literal.
        assert_eq!(render(body, &vars), "{{ name }}");
    }

    #[test]
    fn non_string_values_use_display_form() {
        let body = "count={{count}}";
        let vars = vars(&[("count", json!(42))]);
        assert_eq!(render(body, &vars), "count=42");
    }

    #[test]
    fn null_value_renders_empty() {
        let body = "value=[{{maybe}}]";
        let vars = vars(&[("maybe", Value::Null)]);
        assert_eq!(render(body, &vars), "value=[]");
    }
}
