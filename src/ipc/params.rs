use super::error::HandlerErr;
use serde_json::Value;

/// A patch field: missing keys leave the column alone, `null` clears it.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Keep,
    Clear,
    Set(T),
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    let s = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(s)
}

pub fn optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

/// Accepts integers, and numeric strings so query-string callers work too.
pub fn optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => as_i64(v)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    optional_i64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) => match s.trim() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" | "" => Ok(Some(false)),
            _ => Err(HandlerErr::bad_params(format!("{} must be boolean", key))),
        },
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

/// `Ok(None)` for an explicit null; a missing key is an error.
pub fn nullable_f64(v: Option<&Value>, key: &str) -> Result<Option<f64>, HandlerErr> {
    match v {
        None => Err(HandlerErr::bad_params(format!("missing {}", key))),
        Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .replace(',', ".")
            .parse::<f64>()
            .map(Some)
            .map_err(|_| HandlerErr::bad_params(format!("{} must be a number", key))),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

pub fn required_array<'a>(params: &'a Value, key: &str) -> Result<&'a Vec<Value>, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an array", key)))
}

pub fn patch_object<'a>(
    params: &'a Value,
) -> Result<&'a serde_json::Map<String, Value>, HandlerErr> {
    params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))
}

pub fn patch_str(
    patch: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<Patch<String>, HandlerErr> {
    match patch.get(key) {
        None => Ok(Patch::Keep),
        Some(Value::Null) => Ok(Patch::Clear),
        Some(Value::String(s)) => {
            let t = s.trim();
            Ok(if t.is_empty() {
                Patch::Clear
            } else {
                Patch::Set(t.to_string())
            })
        }
        Some(_) => Err(HandlerErr::bad_params(format!(
            "patch.{} must be string or null",
            key
        ))),
    }
}

pub fn patch_i64(
    patch: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<Patch<i64>, HandlerErr> {
    match patch.get(key) {
        None => Ok(Patch::Keep),
        Some(Value::Null) => Ok(Patch::Clear),
        Some(v) => as_i64(v).map(Patch::Set).ok_or_else(|| {
            HandlerErr::bad_params(format!("patch.{} must be integer or null", key))
        }),
    }
}

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn validate_date(s: &str, key: &str) -> Result<String, HandlerErr> {
    chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn max_chars(s: &str, key: &str, max: usize) -> Result<(), HandlerErr> {
    if s.chars().count() > max {
        return Err(HandlerErr::bad_params(format!(
            "{} length must be <= {}",
            key, max
        )));
    }
    Ok(())
}

/// Requires a row with the given id, mapping absence to `not_found`.
pub fn ensure_exists(
    conn: &rusqlite::Connection,
    table: &str,
    id: &str,
    what: &str,
) -> Result<(), HandlerErr> {
    use rusqlite::OptionalExtension;
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found: Option<i64> = conn.query_row(&sql, [id], |r| r.get(0)).optional()?;
    if found.is_none() {
        return Err(HandlerErr::not_found(format!("{} not found", what))
            .with_details(serde_json::json!({ "id": id })));
    }
    Ok(())
}
