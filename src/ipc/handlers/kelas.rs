use crate::ipc::error::{write_err, HandlerErr};
use crate::ipc::params::{
    ensure_exists, optional_str, patch_object, patch_str, required_i64, required_str, Patch,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

// --- tingkatan ---

fn handle_tingkatan_list(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let mut stmt = conn.prepare(
        "SELECT t.id, t.nama, t.urutan,
           (SELECT COUNT(*) FROM kelas k WHERE k.tingkatan_id = t.id)
         FROM tingkatan t
         ORDER BY t.urutan",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "nama": r.get::<_, String>(1)?,
                "urutan": r.get::<_, i64>(2)?,
                "kelasCount": r.get::<_, i64>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "tingkatan": rows }))
}

fn parse_urutan(params: &Value) -> Result<i64, HandlerErr> {
    let urutan = required_i64(params, "urutan")?;
    if urutan < 1 {
        return Err(HandlerErr::bad_params("urutan must be >= 1"));
    }
    Ok(urutan)
}

fn handle_tingkatan_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let nama = required_str(&req.params, "nama")?;
    let urutan = parse_urutan(&req.params)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO tingkatan(id, nama, urutan) VALUES(?, ?, ?)",
        (&id, &nama, urutan),
    )
    .map_err(|e| write_err("db_insert_failed", e))?;
    Ok(json!({ "tingkatanId": id, "nama": nama, "urutan": urutan }))
}

fn handle_tingkatan_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "tingkatanId")?;
    let nama = required_str(&req.params, "nama")?;
    let urutan = parse_urutan(&req.params)?;
    ensure_exists(conn, "tingkatan", &id, "tingkatan")?;
    conn.execute(
        "UPDATE tingkatan SET nama = ?, urutan = ? WHERE id = ?",
        (&nama, urutan, &id),
    )
    .map_err(|e| write_err("db_update_failed", e))?;
    Ok(json!({ "tingkatanId": id, "nama": nama, "urutan": urutan }))
}

fn handle_tingkatan_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "tingkatanId")?;
    ensure_exists(conn, "tingkatan", &id, "tingkatan")?;
    let kelas_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM kelas WHERE tingkatan_id = ?",
        [&id],
        |r| r.get(0),
    )?;
    if kelas_count > 0 {
        return Err(HandlerErr::conflict("tingkatan is still used by kelas")
            .with_details(json!({ "kelasCount": kelas_count })));
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM kurikulum WHERE tingkatan_id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM tingkatan WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit()?;
    Ok(json!({ "deleted": true }))
}

// --- guru ---

fn handle_guru_list(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let mut stmt = conn.prepare(
        "SELECT g.id, g.nama, g.nip,
           (SELECT GROUP_CONCAT(k.nama_kelas, ', ') FROM kelas k WHERE k.wali_kelas_id = g.id)
         FROM guru g
         ORDER BY g.nama",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "nama": r.get::<_, String>(1)?,
                "nip": r.get::<_, Option<String>>(2)?,
                "waliKelas": r.get::<_, Option<String>>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "guru": rows }))
}

fn handle_guru_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let nama = required_str(&req.params, "nama")?;
    let nip = optional_str(&req.params, "nip")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO guru(id, nama, nip) VALUES(?, ?, ?)",
        (&id, &nama, &nip),
    )
    .map_err(|e| write_err("db_insert_failed", e))?;
    Ok(json!({ "guruId": id, "nama": nama, "nip": nip }))
}

fn handle_guru_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "guruId")?;
    ensure_exists(conn, "guru", &id, "guru")?;
    let patch = patch_object(&req.params)?;
    match patch_str(patch, "nama")? {
        Patch::Keep => {}
        Patch::Clear => return Err(HandlerErr::bad_params("nama must not be empty")),
        Patch::Set(v) => {
            conn.execute("UPDATE guru SET nama = ? WHERE id = ?", (&v, &id))
                .map_err(|e| HandlerErr::db("db_update_failed", e))?;
        }
    }
    match patch_str(patch, "nip")? {
        Patch::Keep => {}
        Patch::Clear => {
            conn.execute("UPDATE guru SET nip = NULL WHERE id = ?", [&id])
                .map_err(|e| HandlerErr::db("db_update_failed", e))?;
        }
        Patch::Set(v) => {
            conn.execute("UPDATE guru SET nip = ? WHERE id = ?", (&v, &id))
                .map_err(|e| write_err("db_update_failed", e))?;
        }
    }
    Ok(json!({ "guruId": id }))
}

fn handle_guru_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "guruId")?;
    ensure_exists(conn, "guru", &id, "guru")?;
    let tx = conn.unchecked_transaction()?;
    let cleared = tx
        .execute(
            "UPDATE kelas SET wali_kelas_id = NULL WHERE wali_kelas_id = ?",
            [&id],
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.execute("DELETE FROM guru WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit()?;
    Ok(json!({ "deleted": true, "waliKelasCleared": cleared }))
}

// --- kelas ---

#[derive(Debug, Clone)]
pub struct KelasInfo {
    pub id: String,
    pub nama_kelas: String,
    pub tingkatan_id: String,
    pub tingkatan_nama: String,
    pub urutan: i64,
    pub wali_kelas_id: Option<String>,
    pub wali_kelas_nama: Option<String>,
    pub wali_kelas_nip: Option<String>,
}

impl KelasInfo {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "namaKelas": self.nama_kelas,
            "tingkatanId": self.tingkatan_id,
            "tingkatan": self.tingkatan_nama,
            "urutan": self.urutan,
            "waliKelasId": self.wali_kelas_id,
            "waliKelas": self.wali_kelas_nama,
            "waliKelasNip": self.wali_kelas_nip,
        })
    }
}

const KELAS_SELECT: &str = "SELECT k.id, k.nama_kelas, k.tingkatan_id, t.nama, t.urutan,
       k.wali_kelas_id, g.nama, g.nip
     FROM kelas k
     JOIN tingkatan t ON t.id = k.tingkatan_id
     LEFT JOIN guru g ON g.id = k.wali_kelas_id";

fn kelas_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<KelasInfo> {
    Ok(KelasInfo {
        id: r.get(0)?,
        nama_kelas: r.get(1)?,
        tingkatan_id: r.get(2)?,
        tingkatan_nama: r.get(3)?,
        urutan: r.get(4)?,
        wali_kelas_id: r.get(5)?,
        wali_kelas_nama: r.get(6)?,
        wali_kelas_nip: r.get(7)?,
    })
}

pub fn load_kelas(conn: &Connection, kelas_id: &str) -> Result<KelasInfo, HandlerErr> {
    let sql = format!("{} WHERE k.id = ?", KELAS_SELECT);
    conn.query_row(&sql, [kelas_id], kelas_from_row)
        .optional()?
        .ok_or_else(|| {
            HandlerErr::not_found("kelas not found").with_details(json!({ "kelasId": kelas_id }))
        })
}

pub fn kelas_by_name(conn: &Connection, nama_kelas: &str) -> Result<Option<String>, HandlerErr> {
    Ok(conn
        .query_row(
            "SELECT id FROM kelas WHERE lower(nama_kelas) = lower(?)",
            [nama_kelas.trim()],
            |r| r.get(0),
        )
        .optional()?)
}

/// Classes of the lowest tingkatan ranked above `urutan`.
pub fn next_level_kelas(conn: &Connection, urutan: i64) -> Result<Vec<KelasInfo>, HandlerErr> {
    let sql = format!(
        "{} WHERE t.urutan = (SELECT MIN(urutan) FROM tingkatan WHERE urutan > ?)
         ORDER BY k.nama_kelas",
        KELAS_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([urutan], kelas_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn handle_kelas_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let tingkatan_id = optional_str(&req.params, "tingkatanId")?;
    let sql = format!(
        "{} WHERE (?1 IS NULL OR k.tingkatan_id = ?1) ORDER BY t.urutan, k.nama_kelas",
        KELAS_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let kelas = stmt
        .query_map([&tingkatan_id], kelas_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut count_stmt = conn.prepare(
        "SELECT COUNT(*) FROM siswa WHERE kelas_id = ? AND status = 'aktif'",
    )?;
    let mut out = Vec::with_capacity(kelas.len());
    for k in &kelas {
        let count: i64 = count_stmt.query_row([&k.id], |r| r.get(0))?;
        let mut v = k.to_json();
        v["siswaCount"] = json!(count);
        out.push(v);
    }
    Ok(json!({ "kelas": out }))
}

fn handle_kelas_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let nama_kelas = required_str(&req.params, "namaKelas")?;
    let tingkatan_id = required_str(&req.params, "tingkatanId")?;
    let wali_kelas_id = optional_str(&req.params, "waliKelasId")?;
    ensure_exists(conn, "tingkatan", &tingkatan_id, "tingkatan")?;
    if let Some(g) = &wali_kelas_id {
        ensure_exists(conn, "guru", g, "guru")?;
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO kelas(id, nama_kelas, tingkatan_id, wali_kelas_id) VALUES(?, ?, ?, ?)",
        (&id, &nama_kelas, &tingkatan_id, &wali_kelas_id),
    )
    .map_err(|e| write_err("db_insert_failed", e))?;
    Ok(json!({ "kelasId": id, "namaKelas": nama_kelas }))
}

fn handle_kelas_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "kelasId")?;
    ensure_exists(conn, "kelas", &id, "kelas")?;
    let patch = patch_object(&req.params)?;

    let tx = conn.unchecked_transaction()?;
    match patch_str(patch, "namaKelas")? {
        Patch::Keep => {}
        Patch::Clear => return Err(HandlerErr::bad_params("namaKelas must not be empty")),
        Patch::Set(v) => {
            tx.execute("UPDATE kelas SET nama_kelas = ? WHERE id = ?", (&v, &id))
                .map_err(|e| write_err("db_update_failed", e))?;
        }
    }
    match patch_str(patch, "tingkatanId")? {
        Patch::Keep => {}
        Patch::Clear => return Err(HandlerErr::bad_params("tingkatanId must not be empty")),
        Patch::Set(v) => {
            ensure_exists(&tx, "tingkatan", &v, "tingkatan")?;
            tx.execute("UPDATE kelas SET tingkatan_id = ? WHERE id = ?", (&v, &id))
                .map_err(|e| HandlerErr::db("db_update_failed", e))?;
        }
    }
    match patch_str(patch, "waliKelasId")? {
        Patch::Keep => {}
        Patch::Clear => {
            tx.execute("UPDATE kelas SET wali_kelas_id = NULL WHERE id = ?", [&id])
                .map_err(|e| HandlerErr::db("db_update_failed", e))?;
        }
        Patch::Set(v) => {
            ensure_exists(&tx, "guru", &v, "guru")?;
            tx.execute("UPDATE kelas SET wali_kelas_id = ? WHERE id = ?", (&v, &id))
                .map_err(|e| HandlerErr::db("db_update_failed", e))?;
        }
    }
    tx.commit()?;
    Ok(load_kelas(conn, &id)?.to_json())
}

fn handle_kelas_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "kelasId")?;
    ensure_exists(conn, "kelas", &id, "kelas")?;
    let active: i64 = conn.query_row(
        "SELECT COUNT(*) FROM siswa WHERE kelas_id = ? AND status = 'aktif'",
        [&id],
        |r| r.get(0),
    )?;
    if active > 0 {
        return Err(HandlerErr::conflict("kelas still has active siswa")
            .with_details(json!({ "siswaCount": active })));
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute("UPDATE siswa SET kelas_id = NULL WHERE kelas_id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.execute(
        "UPDATE riwayat_kelas SET kelas_asal_id = NULL WHERE kelas_asal_id = ?",
        [&id],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.execute(
        "UPDATE riwayat_kelas SET kelas_tujuan_id = NULL WHERE kelas_tujuan_id = ?",
        [&id],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.execute("DELETE FROM kelas WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit()?;
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Value, HandlerErr>> {
    match req.method.as_str() {
        "tingkatan.list" => Some(handle_tingkatan_list(state, req)),
        "tingkatan.create" => Some(handle_tingkatan_create(state, req)),
        "tingkatan.update" => Some(handle_tingkatan_update(state, req)),
        "tingkatan.delete" => Some(handle_tingkatan_delete(state, req)),
        "guru.list" => Some(handle_guru_list(state, req)),
        "guru.create" => Some(handle_guru_create(state, req)),
        "guru.update" => Some(handle_guru_update(state, req)),
        "guru.delete" => Some(handle_guru_delete(state, req)),
        "kelas.list" => Some(handle_kelas_list(state, req)),
        "kelas.create" => Some(handle_kelas_create(state, req)),
        "kelas.update" => Some(handle_kelas_update(state, req)),
        "kelas.delete" => Some(handle_kelas_delete(state, req)),
        _ => None,
    }
}
