use crate::db;
use crate::grading::{self, NilaiKind};
use crate::ipc::error::{write_err, HandlerErr};
use crate::ipc::handlers::kelas::load_kelas;
use crate::ipc::handlers::nilai::MAX_BULK_ENTRIES;
use crate::ipc::handlers::siswa::active_siswa_in_kelas;
use crate::ipc::params::{
    ensure_exists, max_chars, nullable_f64, optional_str, required_array, required_str,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

const MAX_CATATAN_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JenisSikap {
    Spiritual,
    Sosial,
}

impl JenisSikap {
    pub const ALL: [JenisSikap; 2] = [JenisSikap::Spiritual, JenisSikap::Sosial];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spiritual" => Some(Self::Spiritual),
            "sosial" => Some(Self::Sosial),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spiritual => "spiritual",
            Self::Sosial => "sosial",
        }
    }
}

fn parse_jenis(raw: &str) -> Result<JenisSikap, HandlerErr> {
    JenisSikap::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params("jenis must be spiritual or sosial")
            .with_details(json!({ "jenis": raw }))
    })
}

#[derive(Debug, Clone)]
pub struct IndikatorSikap {
    pub id: String,
    pub jenis: String,
    pub indikator: String,
}

impl IndikatorSikap {
    fn to_json(&self) -> Value {
        json!({ "id": self.id, "jenis": self.jenis, "indikator": self.indikator })
    }
}

pub fn list_indikator_sikap(
    conn: &Connection,
    jenis: Option<JenisSikap>,
) -> Result<Vec<IndikatorSikap>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, jenis, indikator FROM indikator_sikap
         WHERE (?1 IS NULL OR jenis = ?1)
         ORDER BY jenis, indikator COLLATE NOCASE",
    )?;
    let rows = stmt
        .query_map([jenis.map(JenisSikap::as_str)], |r| {
            Ok(IndikatorSikap {
                id: r.get(0)?,
                jenis: r.get(1)?,
                indikator: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Stored sikap scores of one periode keyed by `(siswa_id, indikator_id)`.
pub fn sikap_for_periode(
    conn: &Connection,
    periode_id: &str,
) -> Result<HashMap<(String, String), (f64, String)>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT siswa_id, indikator_id, nilai, predikat FROM penilaian_sikap WHERE periode_id = ?",
    )?;
    let mut rows = stmt.query([periode_id])?;
    let mut out = HashMap::new();
    while let Some(r) = rows.next()? {
        out.insert((r.get(0)?, r.get(1)?), (r.get(2)?, r.get(3)?));
    }
    Ok(out)
}

pub fn load_catatan(
    conn: &Connection,
    siswa_id: &str,
    periode_id: &str,
) -> Result<Option<String>, HandlerErr> {
    Ok(conn
        .query_row(
            "SELECT catatan FROM catatan_wali_kelas WHERE siswa_id = ? AND periode_id = ?",
            (siswa_id, periode_id),
            |r| r.get(0),
        )
        .optional()?)
}

fn handle_indikator_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let jenis = optional_str(&req.params, "jenis")?
        .map(|s| parse_jenis(&s))
        .transpose()?;
    let rows = list_indikator_sikap(conn, jenis)?;
    Ok(json!({ "indikator": rows.iter().map(IndikatorSikap::to_json).collect::<Vec<_>>() }))
}

fn handle_indikator_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let jenis = parse_jenis(&required_str(&req.params, "jenis")?)?;
    let indikator = required_str(&req.params, "indikator")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO indikator_sikap(id, jenis, indikator) VALUES(?, ?, ?)",
        (&id, jenis.as_str(), &indikator),
    )
    .map_err(|e| write_err("db_insert_failed", e))?;
    Ok(json!({ "indikatorId": id }))
}

fn handle_indikator_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "indikatorId")?;
    ensure_exists(conn, "indikator_sikap", &id, "indikator sikap")?;
    if let Some(jenis) = optional_str(&req.params, "jenis")? {
        let jenis = parse_jenis(&jenis)?;
        conn.execute(
            "UPDATE indikator_sikap SET jenis = ? WHERE id = ?",
            (jenis.as_str(), &id),
        )
        .map_err(|e| write_err("db_update_failed", e))?;
    }
    if let Some(indikator) = optional_str(&req.params, "indikator")? {
        conn.execute(
            "UPDATE indikator_sikap SET indikator = ? WHERE id = ?",
            (&indikator, &id),
        )
        .map_err(|e| write_err("db_update_failed", e))?;
    }
    let row = conn.query_row(
        "SELECT id, jenis, indikator FROM indikator_sikap WHERE id = ?",
        [&id],
        |r| {
            Ok(IndikatorSikap {
                id: r.get(0)?,
                jenis: r.get(1)?,
                indikator: r.get(2)?,
            })
        },
    )?;
    Ok(row.to_json())
}

fn handle_indikator_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "indikatorId")?;
    ensure_exists(conn, "indikator_sikap", &id, "indikator sikap")?;
    let tx = conn.unchecked_transaction()?;
    let removed = tx
        .execute("DELETE FROM penilaian_sikap WHERE indikator_id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM indikator_sikap WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit()?;
    Ok(json!({ "deleted": true, "recordsRemoved": removed }))
}

fn handle_sikap_grid(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let kelas = load_kelas(conn, &required_str(&req.params, "kelasId")?)?;
    let periode_id = required_str(&req.params, "periodeId")?;
    ensure_exists(conn, "periode_ajaran", &periode_id, "periode")?;
    let jenis = optional_str(&req.params, "jenis")?
        .map(|s| parse_jenis(&s))
        .transpose()?;

    let indikator = list_indikator_sikap(conn, jenis)?;
    let stored = sikap_for_periode(conn, &periode_id)?;
    let rows: Vec<Value> = active_siswa_in_kelas(conn, &kelas.id)?
        .into_iter()
        .map(|s| {
            let cells: Vec<Value> = indikator
                .iter()
                .map(|ind| {
                    let v = stored.get(&(s.id.clone(), ind.id.clone()));
                    json!({
                        "indikatorId": ind.id,
                        "nilai": v.map(|x| x.0),
                        "predikat": v.map(|x| x.1.clone()),
                    })
                })
                .collect();
            json!({ "siswaId": s.id, "nis": s.nis, "nama": s.nama, "sikap": cells })
        })
        .collect();
    Ok(json!({
        "kelas": kelas.to_json(),
        "periodeId": periode_id,
        "indikator": indikator.iter().map(IndikatorSikap::to_json).collect::<Vec<_>>(),
        "rows": rows,
    }))
}

fn handle_sikap_bulk_upsert(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
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
        ensure_exists(conn, "indikator_sikap", &indikator_id, "indikator sikap").map_err(at)?;
        let nilai = nullable_f64(entry.get("nilai"), "nilai")
            .and_then(|v| {
                v.map(|x| {
                    grading::validate_nilai(x).map_err(|e| HandlerErr::bad_params(e.to_string()))
                })
                .transpose()
            })
            .map_err(at)?;
        parsed.push((siswa_id, indikator_id, nilai));
    }

    let tx = conn.unchecked_transaction()?;
    let (mut upserted, mut deleted) = (0usize, 0usize);
    for (siswa_id, indikator_id, nilai) in &parsed {
        match nilai {
            Some(v) => {
                tx.execute(
                    "INSERT INTO penilaian_sikap(id, siswa_id, indikator_id, periode_id, nilai, predikat)
                     VALUES(?, ?, ?, ?, ?, ?)
                     ON CONFLICT(siswa_id, indikator_id, periode_id) DO UPDATE SET
                       nilai = excluded.nilai,
                       predikat = excluded.predikat",
                    (
                        Uuid::new_v4().to_string(),
                        siswa_id,
                        indikator_id,
                        &periode_id,
                        *v,
                        grading::predikat(NilaiKind::Sikap, *v),
                    ),
                )
                .map_err(|e| write_err("db_update_failed", e))?;
                upserted += 1;
            }
            None => {
                tx.execute(
                    "DELETE FROM penilaian_sikap
                     WHERE siswa_id = ? AND indikator_id = ? AND periode_id = ?",
                    (siswa_id, indikator_id, &periode_id),
                )
                .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
                deleted += 1;
            }
        }
    }
    tx.commit()?;
    Ok(json!({ "upserted": upserted, "deleted": deleted }))
}

fn handle_catatan_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let siswa_id = required_str(&req.params, "siswaId")?;
    let periode_id = required_str(&req.params, "periodeId")?;
    ensure_exists(conn, "siswa", &siswa_id, "siswa")?;
    ensure_exists(conn, "periode_ajaran", &periode_id, "periode")?;
    Ok(json!({
        "siswaId": siswa_id,
        "periodeId": periode_id,
        "catatan": load_catatan(conn, &siswa_id, &periode_id)?,
    }))
}

fn handle_catatan_set(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let siswa_id = required_str(&req.params, "siswaId")?;
    let periode_id = required_str(&req.params, "periodeId")?;
    ensure_exists(conn, "siswa", &siswa_id, "siswa")?;
    ensure_exists(conn, "periode_ajaran", &periode_id, "periode")?;
    let catatan = match req.params.get("catatan") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) => String::new(),
        _ => return Err(HandlerErr::bad_params("catatan must be a string")),
    };
    max_chars(&catatan, "catatan", MAX_CATATAN_CHARS)?;

    if catatan.is_empty() {
        conn.execute(
            "DELETE FROM catatan_wali_kelas WHERE siswa_id = ? AND periode_id = ?",
            (&siswa_id, &periode_id),
        )
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
        return Ok(json!({ "siswaId": siswa_id, "periodeId": periode_id, "catatan": null }));
    }
    conn.execute(
        "INSERT INTO catatan_wali_kelas(siswa_id, periode_id, catatan, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(siswa_id, periode_id) DO UPDATE SET
           catatan = excluded.catatan,
           updated_at = excluded.updated_at",
        (&siswa_id, &periode_id, &catatan, db::now_rfc3339()),
    )
    .map_err(|e| write_err("db_update_failed", e))?;
    Ok(json!({ "siswaId": siswa_id, "periodeId": periode_id, "catatan": catatan }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Value, HandlerErr>> {
    match req.method.as_str() {
        "indikatorSikap.list" => Some(handle_indikator_list(state, req)),
        "indikatorSikap.create" => Some(handle_indikator_create(state, req)),
        "indikatorSikap.update" => Some(handle_indikator_update(state, req)),
        "indikatorSikap.delete" => Some(handle_indikator_delete(state, req)),
        "sikap.grid" => Some(handle_sikap_grid(state, req)),
        "sikap.bulkUpsert" => Some(handle_sikap_bulk_upsert(state, req)),
        "catatan.get" => Some(handle_catatan_get(state, req)),
        "catatan.set" => Some(handle_catatan_set(state, req)),
        _ => None,
    }
}
