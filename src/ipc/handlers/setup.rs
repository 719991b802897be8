use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::params::validate_date;
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
pub enum SetupSection {
    Sekolah,
    Rapot,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "sekolah" => Some(Self::Sekolah),
            "rapot" => Some(Self::Rapot),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Sekolah => "setup.sekolah",
            Self::Rapot => "setup.rapot",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Sekolah => json!({
            "namaSekolah": "",
            "alamat": "",
            "kota": "",
            "kepalaSekolah": "",
            "nipKepalaSekolah": ""
        }),
        SetupSection::Rapot => json!({
            "tanggalRapot": null,
            "tempatTtd": "",
            "tampilkanPeringkat": true
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Sekolah => match k.as_str() {
                "namaSekolah" | "kepalaSekolah" | "kota" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
                }
                "alamat" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 300)?));
                }
                "nipKepalaSekolah" => {
                    let s = parse_string_max(v, k, 32)?;
                    if !s.chars().all(|c| c.is_ascii_digit() || c == ' ') {
                        return Err("nipKepalaSekolah must contain digits only".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown sekolah field: {}", k)),
            },
            SetupSection::Rapot => match k.as_str() {
                "tanggalRapot" => {
                    if v.is_null() {
                        obj.insert(k.clone(), Value::Null);
                    } else {
                        let s = parse_string_max(v, k, 10)?;
                        let d = validate_date(&s, k).map_err(|e| e.message)?;
                        obj.insert(k.clone(), Value::String(d));
                    }
                }
                "tempatTtd" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 80)?));
                }
                "tampilkanPeringkat" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown rapot field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults rather than failing reads.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

fn handle_setup_get(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let sekolah = load_section(conn, SetupSection::Sekolah)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rapot = load_section(conn, SetupSection::Rapot)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "sekolah": sekolah, "rapot": rapot }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing section"));
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return Err(HandlerErr::bad_params("unknown section")
            .with_details(json!({ "section": section_raw })));
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut current = load_section(conn, section)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    merge_section_patch(section, &mut current, patch_obj).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, section.key(), &current)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({ "section": section_raw, "value": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Value, HandlerErr>> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
