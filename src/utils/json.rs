use serde_json::Value;

/// A JSON PATCH field: absent, explicitly null, or a string.
pub enum NullableValue {
    Omitted,
    Null,
    String(String),
}

pub fn classify_nullable(optional_value: Option<&Value>) -> Result<NullableValue, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::String(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

/// A required, non-empty string field of a PATCH body, if present.
pub fn non_empty_string(body: &Value, field: &str) -> Result<Option<String>, String> {
    match classify_nullable(body.get(field))? {
        NullableValue::Omitted => Ok(None),
        NullableValue::Null => Err(format!("{field} cannot be null")),
        NullableValue::String(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(format!("{field} must not be empty"))
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
    }
}
