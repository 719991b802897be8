use crate::ipc::error::{write_err, HandlerErr};
use crate::ipc::handlers::kelas::load_kelas;
use crate::ipc::handlers::nilai::MAX_BULK_ENTRIES;
use crate::ipc::handlers::siswa::active_siswa_in_kelas;
use crate::ipc::params::{ensure_exists, required_array, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

const MAX_DAYS: i64 = 366;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Absensi {
    pub sakit: i64,
    pub izin: i64,
    pub alpha: i64,
}

impl Absensi {
    pub fn total(&self) -> i64 {
        self.sakit + self.izin + self.alpha
    }

    pub fn add(&mut self, other: &Absensi) {
        self.sakit += other.sakit;
        self.izin += other.izin;
        self.alpha += other.alpha;
    }

    pub fn to_json(&self) -> Value {
        json!({
            "sakit": self.sakit,
            "izin": self.izin,
            "alpha": self.alpha,
            "total": self.total(),
        })
    }
}

pub fn list_indikator(conn: &Connection) -> Result<Vec<(String, String)>, HandlerErr> {
    let mut stmt =
        conn.prepare("SELECT id, nama FROM indikator_kehadiran ORDER BY nama COLLATE NOCASE")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Stored counts for one periode keyed by `(siswa_id, indikator_id)`.
pub fn counts_for_periode(
    conn: &Connection,
    periode_id: &str,
) -> Result<HashMap<(String, String), Absensi>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT siswa_id, indikator_id, sakit, izin, alpha FROM kehadiran WHERE periode_id = ?",
    )?;
    let mut rows = stmt.query([periode_id])?;
    let mut out = HashMap::new();
    while let Some(r) = rows.next()? {
        out.insert(
            (r.get(0)?, r.get(1)?),
            Absensi {
                sakit: r.get(2)?,
                izin: r.get(3)?,
                alpha: r.get(4)?,
            },
        );
    }
    Ok(out)
}

/// Per-siswa totals across every indicator.
pub fn totals_by_siswa(
    conn: &Connection,
    periode_id: &str,
) -> Result<HashMap<String, Absensi>, HandlerErr> {
    let mut out: HashMap<String, Absensi> = HashMap::new();
    for ((siswa_id, _), a) in counts_for_periode(conn, periode_id)? {
        out.entry(siswa_id).or_default().add(&a);
    }
    Ok(out)
}

fn handle_indikator_list(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let indikator: Vec<Value> = list_indikator(conn)?
        .into_iter()
        .map(|(id, nama)| json!({ "id": id, "nama": nama }))
        .collect();
    Ok(json!({ "indikator": indikator }))
}

fn handle_indikator_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let nama = required_str(&req.params, "nama")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO indikator_kehadiran(id, nama) VALUES(?, ?)",
        (&id, &nama),
    )
    .map_err(|e| write_err("db_insert_failed", e))?;
    Ok(json!({ "indikatorId": id }))
}

fn handle_indikator_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "indikatorId")?;
    let nama = required_str(&req.params, "nama")?;
    ensure_exists(conn, "indikator_kehadiran", &id, "indikator kehadiran")?;
    conn.execute(
        "UPDATE indikator_kehadiran SET nama = ? WHERE id = ?",
        (&nama, &id),
    )
    .map_err(|e| write_err("db_update_failed", e))?;
    Ok(json!({ "id": id, "nama": nama }))
}

fn handle_indikator_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "indikatorId")?;
    ensure_exists(conn, "indikator_kehadiran", &id, "indikator kehadiran")?;
    let tx = conn.unchecked_transaction()?;
    let removed = tx
        .execute("DELETE FROM kehadiran WHERE indikator_id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM indikator_kehadiran WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit()?;
    Ok(json!({ "deleted": true, "recordsRemoved": removed }))
}

fn handle_kehadiran_grid(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let kelas = load_kelas(conn, &required_str(&req.params, "kelasId")?)?;
    let periode_id = required_str(&req.params, "periodeId")?;
    ensure_exists(conn, "periode_ajaran", &periode_id, "periode")?;

    let indikator = list_indikator(conn)?;
    let counts = counts_for_periode(conn, &periode_id)?;
    let rows: Vec<Value> = active_siswa_in_kelas(conn, &kelas.id)?
        .into_iter()
        .map(|s| {
            let cells: Vec<Value> = indikator
                .iter()
                .map(|(ind_id, _)| {
                    let a = counts
                        .get(&(s.id.clone(), ind_id.clone()))
                        .copied()
                        .unwrap_or_default();
                    json!({
                        "indikatorId": ind_id,
                        "sakit": a.sakit,
                        "izin": a.izin,
                        "alpha": a.alpha,
                    })
                })
                .collect();
            json!({ "siswaId": s.id, "nis": s.nis, "nama": s.nama, "kehadiran": cells })
        })
        .collect();
    Ok(json!({
        "kelas": kelas.to_json(),
        "periodeId": periode_id,
        "indikator": indikator
            .iter()
            .map(|(id, nama)| json!({ "id": id, "nama": nama }))
            .collect::<Vec<_>>(),
        "rows": rows,
    }))
}

fn count_field(entry: &Value, key: &str) -> Result<i64, HandlerErr> {
    let v = required_i64(entry, key)?;
    if !(0..=MAX_DAYS).contains(&v) {
        return Err(HandlerErr::bad_params(format!(
            "{} must be between 0 and {}",
            key, MAX_DAYS
        )));
    }
    Ok(v)
}

fn handle_kehadiran_bulk_upsert(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let periode_id = required_str(&req.params, "periodeId")?;
    ensure_exists(conn, "periode_ajaran", &periode_id, "periode")?;
    let entries = required_array(&req.params, "entries")?;
    if entries.len() > MAX_BULK_ENTRIES {
        return Err(HandlerErr::bad_params(format!(
            "entries must contain at most {} items",
            MAX_BULK_ENTRIES
        )));
    }

    let mut parsed = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let at = |e: HandlerErr| e.with_details(json!({ "index": i }));
        let siswa_id = required_str(entry, "siswaId").map_err(at)?;
        ensure_exists(conn, "siswa", &siswa_id, "siswa").map_err(at)?;
        let indikator_id = required_str(entry, "indikatorId").map_err(at)?;
        ensure_exists(conn, "indikator_kehadiran", &indikator_id, "indikator kehadiran")
            .map_err(at)?;
        let a = Absensi {
            sakit: count_field(entry, "sakit").map_err(at)?,
            izin: count_field(entry, "izin").map_err(at)?,
            alpha: count_field(entry, "alpha").map_err(at)?,
        };
        parsed.push((siswa_id, indikator_id, a));
    }

    let tx = conn.unchecked_transaction()?;
    for (siswa_id, indikator_id, a) in &parsed {
        tx.execute(
            "INSERT INTO kehadiran(id, siswa_id, indikator_id, periode_id, sakit, izin, alpha)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(siswa_id, indikator_id, periode_id) DO UPDATE SET
               sakit = excluded.sakit,
               izin = excluded.izin,
               alpha = excluded.alpha",
            (
                Uuid::new_v4().to_string(),
                siswa_id,
                indikator_id,
                &periode_id,
                a.sakit,
                a.izin,
                a.alpha,
            ),
        )
        .map_err(|e| write_err("db_update_failed", e))?;
    }
    tx.commit()?;
    Ok(json!({ "upserted": parsed.len() }))
}

fn handle_kehadiran_recap(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let kelas = load_kelas(conn, &required_str(&req.params, "kelasId")?)?;
    let periode_id = required_str(&req.params, "periodeId")?;
    ensure_exists(conn, "periode_ajaran", &periode_id, "periode")?;

    let totals = totals_by_siswa(conn, &periode_id)?;
    let mut kelas_total = Absensi::default();
    let rows: Vec<Value> = active_siswa_in_kelas(conn, &kelas.id)?
        .into_iter()
        .map(|s| {
            let a = totals.get(&s.id).copied().unwrap_or_default();
            kelas_total.add(&a);
            let mut row = a.to_json();
            row["siswaId"] = json!(s.id);
            row["nis"] = json!(s.nis);
            row["nama"] = json!(s.nama);
            row
        })
        .collect();
    Ok(json!({
        "kelas": kelas.to_json(),
        "periodeId": periode_id,
        "rows": rows,
        "totals": kelas_total.to_json(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Value, HandlerErr>> {
    match req.method.as_str() {
        "indikatorKehadiran.list" => Some(handle_indikator_list(state, req)),
        "indikatorKehadiran.create" => Some(handle_indikator_create(state, req)),
        "indikatorKehadiran.update" => Some(handle_indikator_update(state, req)),
        "indikatorKehadiran.delete" => Some(handle_indikator_delete(state, req)),
        "kehadiran.grid" => Some(handle_kehadiran_grid(state, req)),
        "kehadiran.bulkUpsert" => Some(handle_kehadiran_bulk_upsert(state, req)),
        "kehadiran.recap" => Some(handle_kehadiran_recap(state, req)),
        _ => None,
    }
}
