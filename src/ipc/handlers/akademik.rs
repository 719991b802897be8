use crate::db;
use crate::ipc::error::{write_err, HandlerErr};
use crate::ipc::params::{ensure_exists, optional_str, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

/// Accepts `YYYY/YYYY` where the second year follows the first.
fn validate_tahun_nama(nama: &str) -> Result<String, HandlerErr> {
    let bad = || {
        HandlerErr::bad_params("nama must look like YYYY/YYYY with consecutive years")
            .with_details(json!({ "nama": nama }))
    };
    let (a, b) = nama.trim().split_once('/').ok_or_else(bad)?;
    let (a, b) = (a.trim(), b.trim());
    if a.len() != 4 || b.len() != 4 {
        return Err(bad());
    }
    let y1 = a.parse::<i32>().map_err(|_| bad())?;
    let y2 = b.parse::<i32>().map_err(|_| bad())?;
    if y2 != y1 + 1 {
        return Err(bad());
    }
    Ok(format!("{}/{}", y1, y2))
}

fn semester_default_nama(semester: i64) -> &'static str {
    if semester == 1 {
        "Semester Ganjil"
    } else {
        "Semester Genap"
    }
}

fn handle_tahun_list(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let mut stmt = conn.prepare(
        "SELECT t.id, t.nama, t.is_active,
           (SELECT COUNT(*) FROM periode_ajaran p WHERE p.tahun_ajaran_id = t.id)
         FROM tahun_ajaran t
         ORDER BY t.nama DESC",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "nama": r.get::<_, String>(1)?,
                "isActive": r.get::<_, i64>(2)? != 0,
                "periodeCount": r.get::<_, i64>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "tahunAjaran": rows }))
}

fn handle_tahun_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let nama = validate_tahun_nama(&required_str(&req.params, "nama")?)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO tahun_ajaran(id, nama, is_active, created_at) VALUES(?, ?, 0, ?)",
        (&id, &nama, db::now_rfc3339()),
    )
    .map_err(|e| write_err("db_insert_failed", e))?;
    Ok(json!({ "tahunAjaranId": id, "nama": nama }))
}

fn handle_tahun_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "tahunAjaranId")?;
    let nama = validate_tahun_nama(&required_str(&req.params, "nama")?)?;
    ensure_exists(conn, "tahun_ajaran", &id, "tahun ajaran")?;
    conn.execute(
        "UPDATE tahun_ajaran SET nama = ? WHERE id = ?",
        (&nama, &id),
    )
    .map_err(|e| write_err("db_update_failed", e))?;
    Ok(json!({ "tahunAjaranId": id, "nama": nama }))
}

fn handle_tahun_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "tahunAjaranId")?;
    ensure_exists(conn, "tahun_ajaran", &id, "tahun ajaran")?;
    let periode_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM periode_ajaran WHERE tahun_ajaran_id = ?",
        [&id],
        |r| r.get(0),
    )?;
    if periode_count > 0 {
        return Err(
            HandlerErr::conflict("tahun ajaran still has periode; delete them first")
                .with_details(json!({ "periodeCount": periode_count })),
        );
    }
    let tx = conn.unchecked_transaction()?;
    let detached = tx
        .execute(
            "UPDATE riwayat_kelas SET tahun_ajaran_id = NULL WHERE tahun_ajaran_id = ?",
            [&id],
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.execute("DELETE FROM tahun_ajaran WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit()?;
    Ok(json!({ "deleted": true, "riwayatDetached": detached }))
}

fn set_active_tahun(conn: &Connection, id: &str) -> Result<(), HandlerErr> {
    conn.execute(
        "UPDATE tahun_ajaran SET is_active = CASE WHEN id = ? THEN 1 ELSE 0 END",
        [id],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(())
}

fn handle_tahun_set_active(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "tahunAjaranId")?;
    ensure_exists(conn, "tahun_ajaran", &id, "tahun ajaran")?;
    let tx = conn.unchecked_transaction()?;
    set_active_tahun(&tx, &id)?;
    // An active periode must belong to the active tahun.
    tx.execute(
        "UPDATE periode_ajaran SET is_active = 0 WHERE tahun_ajaran_id <> ?",
        [&id],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit()?;
    Ok(json!({ "tahunAjaranId": id, "isActive": true }))
}

fn periode_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "tahunAjaranId": r.get::<_, String>(1)?,
        "semester": r.get::<_, i64>(2)?,
        "nama": r.get::<_, String>(3)?,
        "isActive": r.get::<_, i64>(4)? != 0,
        "tahunAjaran": r.get::<_, String>(5)?,
    }))
}

const PERIODE_SELECT: &str = "SELECT p.id, p.tahun_ajaran_id, p.semester, p.nama, p.is_active, t.nama
     FROM periode_ajaran p
     JOIN tahun_ajaran t ON t.id = p.tahun_ajaran_id";

fn handle_periode_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let tahun_id = optional_str(&req.params, "tahunAjaranId")?;
    let sql = format!(
        "{} WHERE (?1 IS NULL OR p.tahun_ajaran_id = ?1) ORDER BY t.nama DESC, p.semester",
        PERIODE_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([&tahun_id], periode_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "periode": rows }))
}

fn handle_periode_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let tahun_id = required_str(&req.params, "tahunAjaranId")?;
    let semester = required_i64(&req.params, "semester")?;
    if semester != 1 && semester != 2 {
        return Err(HandlerErr::bad_params("semester must be 1 or 2")
            .with_details(json!({ "semester": semester })));
    }
    ensure_exists(conn, "tahun_ajaran", &tahun_id, "tahun ajaran")?;
    let nama = optional_str(&req.params, "nama")?
        .unwrap_or_else(|| semester_default_nama(semester).to_string());
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO periode_ajaran(id, tahun_ajaran_id, semester, nama, is_active)
         VALUES(?, ?, ?, ?, 0)",
        (&id, &tahun_id, semester, &nama),
    )
    .map_err(|e| write_err("db_insert_failed", e))?;
    Ok(json!({ "periodeId": id, "semester": semester, "nama": nama }))
}

fn handle_periode_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "periodeId")?;
    let nama = required_str(&req.params, "nama")?;
    ensure_exists(conn, "periode_ajaran", &id, "periode")?;
    conn.execute("UPDATE periode_ajaran SET nama = ? WHERE id = ?", (&nama, &id))
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({ "periodeId": id, "nama": nama }))
}

fn handle_periode_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "periodeId")?;
    ensure_exists(conn, "periode_ajaran", &id, "periode")?;

    let tx = conn.unchecked_transaction()?;
    // Dependency order; no ON DELETE CASCADE in the schema.
    for table in [
        "nilai_ujian",
        "nilai_hafalan",
        "kehadiran",
        "penilaian_sikap",
        "catatan_wali_kelas",
    ] {
        tx.execute(&format!("DELETE FROM {} WHERE periode_id = ?", table), [&id])
            .map_err(|e| {
                HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": table }))
            })?;
    }
    tx.execute("DELETE FROM periode_ajaran WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit()?;
    Ok(json!({ "deleted": true }))
}

fn handle_periode_set_active(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "periodeId")?;
    let tahun_id: String = conn
        .query_row(
            "SELECT tahun_ajaran_id FROM periode_ajaran WHERE id = ?",
            [&id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("periode not found"))?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE periode_ajaran SET is_active = CASE WHEN id = ? THEN 1 ELSE 0 END",
        [&id],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    set_active_tahun(&tx, &tahun_id)?;
    tx.commit()?;
    Ok(json!({ "periodeId": id, "tahunAjaranId": tahun_id, "isActive": true }))
}

pub fn active_periode(conn: &Connection) -> Result<Option<Value>, HandlerErr> {
    let sql = format!("{} WHERE p.is_active = 1 LIMIT 1", PERIODE_SELECT);
    Ok(conn.query_row(&sql, [], periode_json).optional()?)
}

pub fn load_periode(conn: &Connection, periode_id: &str) -> Result<Value, HandlerErr> {
    let sql = format!("{} WHERE p.id = ?", PERIODE_SELECT);
    conn.query_row(&sql, [periode_id], periode_json)
        .optional()?
        .ok_or_else(|| {
            HandlerErr::not_found("periode not found")
                .with_details(json!({ "periodeId": periode_id }))
        })
}

pub fn active_tahun_id(conn: &Connection) -> Result<Option<String>, HandlerErr> {
    Ok(conn
        .query_row(
            "SELECT id FROM tahun_ajaran WHERE is_active = 1 LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()?)
}

fn handle_periode_active(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    Ok(json!({ "periode": active_periode(conn)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Value, HandlerErr>> {
    match req.method.as_str() {
        "tahunAjaran.list" => Some(handle_tahun_list(state, req)),
        "tahunAjaran.create" => Some(handle_tahun_create(state, req)),
        "tahunAjaran.update" => Some(handle_tahun_update(state, req)),
        "tahunAjaran.delete" => Some(handle_tahun_delete(state, req)),
        "tahunAjaran.setActive" => Some(handle_tahun_set_active(state, req)),
        "periode.list" => Some(handle_periode_list(state, req)),
        "periode.create" => Some(handle_periode_create(state, req)),
        "periode.update" => Some(handle_periode_update(state, req)),
        "periode.delete" => Some(handle_periode_delete(state, req)),
        "periode.setActive" => Some(handle_periode_set_active(state, req)),
        "periode.active" => Some(handle_periode_active(state, req)),
        _ => None,
    }
}
