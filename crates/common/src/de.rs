// Lenient deserializers for server-shaped JSON: 0/1 flags, scalar-or-list values.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Accepts `true`/`false`, `0`/`1` (any non-zero number is set), `"1"`/`"0"`, and null.
pub(crate) fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(flag_from_value(&value))
}

pub(crate) fn flag_from_value(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => {
            let text = text.trim();
            !text.is_empty() && text != "0" && !text.eq_ignore_ascii_case("false")
        }
        _ => false,
    }
}

/// Scalars become their string form; null and empty strings become `None`.
pub(crate) fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(scalar_to_string).filter(|text| !text.is_empty()))
}

pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(if *flag { "1".into() } else { "0".into() }),
        _ => None,
    }
}

/// A single scalar or an array of scalars, normalized to a list.
pub(crate) fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items.iter().filter_map(scalar_to_string).collect(),
        other => scalar_to_string(&other).into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn flag_accepts_server_encodings() {
        assert!(flag_from_value(&json!(1)));
        assert!(flag_from_value(&json!(true)));
        assert!(flag_from_value(&json!("1")));
        assert!(!flag_from_value(&json!(0)));
        assert!(!flag_from_value(&json!("0")));
        assert!(!flag_from_value(&json!("")));
        assert!(!flag_from_value(&Value::Null));
    }

    #[test]
    fn scalar_to_string_formats_numbers_and_bools() {
        assert_eq!(scalar_to_string(&json!(0)), Some("0".into()));
        assert_eq!(scalar_to_string(&json!(2.5)), Some("2.5".into()));
        assert_eq!(scalar_to_string(&json!(true)), Some("1".into()));
        assert_eq!(scalar_to_string(&json!([1])), None);
    }
}
