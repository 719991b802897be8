use crate::grading::{self, Kategori, NilaiKind};
use crate::ipc::error::{write_err, HandlerErr};
use crate::ipc::params::{
    ensure_exists, optional_str, patch_object, patch_str, required_array, required_str, Patch,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Mapel {
    pub id: String,
    pub nama_mapel: String,
    pub kategori: Kategori,
    pub kode: Option<String>,
}

impl Mapel {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "namaMapel": self.nama_mapel,
            "kategori": self.kategori.as_str(),
            "kode": self.kode,
        })
    }
}

fn parse_kategori(raw: &str) -> Result<Kategori, HandlerErr> {
    Kategori::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params("kategori must be ujian or hafalan")
            .with_details(json!({ "kategori": raw }))
    })
}

fn mapel_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Mapel> {
    let raw: String = r.get(2)?;
    let kategori = Kategori::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown mapel kategori {raw:?}").into(),
        )
    })?;
    Ok(Mapel {
        id: r.get(0)?,
        nama_mapel: r.get(1)?,
        kategori,
        kode: r.get(3)?,
    })
}

pub fn load_mapel(conn: &Connection, mapel_id: &str) -> Result<Mapel, HandlerErr> {
    conn.query_row(
        "SELECT id, nama_mapel, kategori, kode FROM mapel WHERE id = ?",
        [mapel_id],
        mapel_from_row,
    )
    .optional()?
    .ok_or_else(|| {
        HandlerErr::not_found("mapel not found").with_details(json!({ "mapelId": mapel_id }))
    })
}

/// Mapel of one kategori for a tingkatan, in kurikulum order. Falls back to
/// every mapel of the kategori by name when the tingkatan has no kurikulum.
pub fn mapel_for_tingkatan(
    conn: &Connection,
    tingkatan_id: Option<&str>,
    kategori: Kategori,
) -> Result<Vec<(Mapel, Option<String>)>, HandlerErr> {
    if let Some(tingkatan_id) = tingkatan_id {
        let has_kurikulum: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM kurikulum WHERE tingkatan_id = ? LIMIT 1",
                [tingkatan_id],
                |r| r.get(0),
            )
            .optional()?;
        if has_kurikulum.is_some() {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.nama_mapel, m.kategori, m.kode, k.target_hafalan
                 FROM kurikulum k
                 JOIN mapel m ON m.id = k.mapel_id
                 WHERE k.tingkatan_id = ? AND m.kategori = ?
                 ORDER BY k.urutan",
            )?;
            let rows = stmt
                .query_map((tingkatan_id, kategori.as_str()), |r| {
                    Ok((mapel_from_row(r)?, r.get::<_, Option<String>>(4)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(rows);
        }
    }
    let mut stmt = conn.prepare(
        "SELECT id, nama_mapel, kategori, kode FROM mapel
         WHERE kategori = ?
         ORDER BY nama_mapel COLLATE NOCASE",
    )?;
    let rows = stmt
        .query_map([kategori.as_str()], |r| Ok((mapel_from_row(r)?, None)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn target_hafalan(
    conn: &Connection,
    tingkatan_id: &str,
    mapel_id: &str,
) -> Result<Option<String>, HandlerErr> {
    let v: Option<Option<String>> = conn
        .query_row(
            "SELECT target_hafalan FROM kurikulum WHERE tingkatan_id = ? AND mapel_id = ?",
            (tingkatan_id, mapel_id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(v.flatten())
}

fn handle_mapel_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let kategori = optional_str(&req.params, "kategori")?
        .map(|s| parse_kategori(&s))
        .transpose()?;
    let mut stmt = conn.prepare(
        "SELECT id, nama_mapel, kategori, kode FROM mapel
         WHERE (?1 IS NULL OR kategori = ?1)
         ORDER BY kategori, nama_mapel COLLATE NOCASE",
    )?;
    let mapel = stmt
        .query_map([kategori.map(Kategori::as_str)], mapel_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "mapel": mapel.iter().map(Mapel::to_json).collect::<Vec<_>>() }))
}

fn handle_mapel_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let nama_mapel = required_str(&req.params, "namaMapel")?;
    let kategori = parse_kategori(&required_str(&req.params, "kategori")?)?;
    let kode = optional_str(&req.params, "kode")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO mapel(id, nama_mapel, kategori, kode) VALUES(?, ?, ?, ?)",
        (&id, &nama_mapel, kategori.as_str(), &kode),
    )
    .map_err(|e| write_err("db_insert_failed", e))?;
    Ok(json!({ "mapelId": id }))
}

fn handle_mapel_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "mapelId")?;
    let current = load_mapel(conn, &id)?;
    let patch = patch_object(&req.params)?;

    let nama_mapel = match patch_str(patch, "namaMapel")? {
        Patch::Keep => current.nama_mapel,
        Patch::Clear => return Err(HandlerErr::bad_params("namaMapel must not be empty")),
        Patch::Set(v) => v,
    };
    let kode = match patch_str(patch, "kode")? {
        Patch::Keep => current.kode,
        Patch::Clear => None,
        Patch::Set(v) => Some(v),
    };
    let kategori = match patch_str(patch, "kategori")? {
        Patch::Keep => current.kategori,
        Patch::Clear => return Err(HandlerErr::bad_params("kategori must not be empty")),
        Patch::Set(v) => parse_kategori(&v)?,
    };
    if kategori != current.kategori {
        // Existing scores live in the table of the old kategori.
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE mapel_id = ?", current.kategori.table()),
            [&id],
            |r| r.get(0),
        )?;
        if n > 0 {
            return Err(HandlerErr::conflict("mapel already has nilai; kategori is fixed")
                .with_details(json!({ "nilaiCount": n })));
        }
    }
    conn.execute(
        "UPDATE mapel SET nama_mapel = ?, kategori = ?, kode = ? WHERE id = ?",
        (&nama_mapel, kategori.as_str(), &kode, &id),
    )
    .map_err(|e| write_err("db_update_failed", e))?;
    Ok(load_mapel(conn, &id)?.to_json())
}

fn handle_mapel_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "mapelId")?;
    ensure_exists(conn, "mapel", &id, "mapel")?;
    let tx = conn.unchecked_transaction()?;
    for table in ["nilai_ujian", "nilai_hafalan", "kurikulum"] {
        tx.execute(&format!("DELETE FROM {} WHERE mapel_id = ?", table), [&id])
            .map_err(|e| {
                HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": table }))
            })?;
    }
    tx.execute("DELETE FROM mapel WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit()?;
    Ok(json!({ "deleted": true }))
}

fn handle_kurikulum_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let tingkatan_id = required_str(&req.params, "tingkatanId")?;
    ensure_exists(conn, "tingkatan", &tingkatan_id, "tingkatan")?;
    let mut stmt = conn.prepare(
        "SELECT m.id, m.nama_mapel, m.kategori, m.kode, k.target_hafalan, k.urutan
         FROM kurikulum k
         JOIN mapel m ON m.id = k.mapel_id
         WHERE k.tingkatan_id = ?
         ORDER BY k.urutan",
    )?;
    let items = stmt
        .query_map([&tingkatan_id], |r| {
            let m = mapel_from_row(r)?;
            let target: Option<String> = r.get(4)?;
            let urutan: i64 = r.get(5)?;
            let mut v = m.to_json();
            v["mapelId"] = json!(m.id);
            v["targetHafalan"] = json!(target);
            v["urutan"] = json!(urutan);
            Ok(v)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "tingkatanId": tingkatan_id, "items": items }))
}

fn handle_kurikulum_set(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let tingkatan_id = required_str(&req.params, "tingkatanId")?;
    ensure_exists(conn, "tingkatan", &tingkatan_id, "tingkatan")?;
    let items = required_array(&req.params, "items")?;

    let mut parsed: Vec<(String, Option<String>)> = Vec::with_capacity(items.len());
    let mut seen = HashSet::new();
    for (i, item) in items.iter().enumerate() {
        let at = |e: HandlerErr| e.with_details(json!({ "index": i }));
        let mapel_id = required_str(item, "mapelId").map_err(at)?;
        ensure_exists(conn, "mapel", &mapel_id, "mapel").map_err(at)?;
        if !seen.insert(mapel_id.clone()) {
            return Err(at(HandlerErr::bad_params("duplicate mapelId in items")));
        }
        let target = optional_str(item, "targetHafalan").map_err(at)?;
        parsed.push((mapel_id, target));
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM kurikulum WHERE tingkatan_id = ?", [&tingkatan_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    for (urutan, (mapel_id, target)) in parsed.iter().enumerate() {
        tx.execute(
            "INSERT INTO kurikulum(tingkatan_id, mapel_id, urutan, target_hafalan)
             VALUES(?, ?, ?, ?)",
            (&tingkatan_id, mapel_id, urutan as i64 + 1, target),
        )
        .map_err(|e| write_err("db_insert_failed", e))?;
    }
    tx.commit()?;
    Ok(json!({ "tingkatanId": tingkatan_id, "count": parsed.len() }))
}

fn handle_predikat_table(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    state.conn()?;
    let table = |kind: NilaiKind| json!(grading::thresholds(kind));
    Ok(json!({
        "ujian": table(NilaiKind::Ujian),
        "hafalan": table(NilaiKind::Hafalan),
        "sikap": table(NilaiKind::Sikap),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Value, HandlerErr>> {
    match req.method.as_str() {
        "mapel.list" => Some(handle_mapel_list(state, req)),
        "mapel.create" => Some(handle_mapel_create(state, req)),
        "mapel.update" => Some(handle_mapel_update(state, req)),
        "mapel.delete" => Some(handle_mapel_delete(state, req)),
        "kurikulum.get" => Some(handle_kurikulum_get(state, req)),
        "kurikulum.set" => Some(handle_kurikulum_set(state, req)),
        "predikat.table" => Some(handle_predikat_table(state, req)),
        _ => None,
    }
}
