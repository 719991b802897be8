use crate::db;
use crate::grading::{self, Kategori};
use crate::ipc::error::{write_err, HandlerErr};
use crate::ipc::handlers::kelas::load_kelas;
use crate::ipc::handlers::mapel::{load_mapel, target_hafalan, Mapel};
use crate::ipc::handlers::siswa::active_siswa_in_kelas;
use crate::ipc::params::{
    ensure_exists, max_chars, nullable_f64, optional_str, required_array, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::spreadsheet;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

pub const MAX_BULK_ENTRIES: usize = 2000;
const MAX_KETERANGAN_CHARS: usize = 200;

struct NilaiEntry {
    siswa_id: String,
    nilai: Option<f64>,
    keterangan: Option<String>,
}

fn require_kategori(mapel: &Mapel, expected: Kategori) -> Result<(), HandlerErr> {
    if mapel.kategori != expected {
        return Err(HandlerErr::bad_params(format!(
            "mapel kategori is {}, expected {}",
            mapel.kategori.as_str(),
            expected.as_str()
        ))
        .with_details(json!({ "mapelId": mapel.id })));
    }
    Ok(())
}

fn checked_nilai(raw: Option<f64>) -> Result<Option<f64>, HandlerErr> {
    raw.map(|v| grading::validate_nilai(v).map_err(|e| HandlerErr::bad_params(e.to_string())))
        .transpose()
}

/// Writes one score, recomputing its predikat. `None` removes the row.
pub fn upsert_nilai(
    conn: &Connection,
    kategori: Kategori,
    siswa_id: &str,
    mapel_id: &str,
    periode_id: &str,
    nilai: Option<f64>,
    keterangan: Option<&str>,
) -> Result<(), HandlerErr> {
    let table = kategori.table();
    let Some(nilai) = nilai else {
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE siswa_id = ? AND mapel_id = ? AND periode_id = ?",
                table
            ),
            (siswa_id, mapel_id, periode_id),
        )
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
        return Ok(());
    };
    let predikat = grading::predikat(kategori.nilai_kind(), nilai);
    let now = db::now_rfc3339();
    let id = Uuid::new_v4().to_string();
    let written = match kategori {
        Kategori::Ujian => conn.execute(
            "INSERT INTO nilai_ujian(id, siswa_id, mapel_id, periode_id, nilai_angka, predikat, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(siswa_id, mapel_id, periode_id) DO UPDATE SET
               nilai_angka = excluded.nilai_angka,
               predikat = excluded.predikat,
               updated_at = excluded.updated_at",
            (&id, siswa_id, mapel_id, periode_id, nilai, predikat, &now),
        ),
        Kategori::Hafalan => conn.execute(
            "INSERT INTO nilai_hafalan(id, siswa_id, mapel_id, periode_id, nilai_angka, predikat, keterangan, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(siswa_id, mapel_id, periode_id) DO UPDATE SET
               nilai_angka = excluded.nilai_angka,
               predikat = excluded.predikat,
               keterangan = excluded.keterangan,
               updated_at = excluded.updated_at",
            (&id, siswa_id, mapel_id, periode_id, nilai, predikat, keterangan, &now),
        ),
    };
    written.map_err(|e| write_err("db_update_failed", e))?;
    Ok(())
}

fn handle_grid(
    state: &mut AppState,
    req: &Request,
    kategori: Kategori,
) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let kelas = load_kelas(conn, &required_str(&req.params, "kelasId")?)?;
    let periode_id = required_str(&req.params, "periodeId")?;
    ensure_exists(conn, "periode_ajaran", &periode_id, "periode")?;
    let mapel = load_mapel(conn, &required_str(&req.params, "mapelId")?)?;
    require_kategori(&mapel, kategori)?;

    let siswa = active_siswa_in_kelas(conn, &kelas.id)?;
    let mut stored: HashMap<String, (f64, String, Option<String>)> = HashMap::new();
    {
        let sql = match kategori {
            Kategori::Ujian => {
                "SELECT siswa_id, nilai_angka, predikat, NULL FROM nilai_ujian
                 WHERE periode_id = ? AND mapel_id = ?"
            }
            Kategori::Hafalan => {
                "SELECT siswa_id, nilai_angka, predikat, keterangan FROM nilai_hafalan
                 WHERE periode_id = ? AND mapel_id = ?"
            }
        };
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query((&periode_id, &mapel.id))?;
        while let Some(r) = rows.next()? {
            stored.insert(r.get(0)?, (r.get(1)?, r.get(2)?, r.get(3)?));
        }
    }

    let mut scores = Vec::new();
    let rows: Vec<Value> = siswa
        .iter()
        .map(|s| {
            let entry = stored.get(&s.id);
            if let Some((v, _, _)) = entry {
                scores.push(*v);
            }
            let mut row = json!({
                "siswaId": s.id,
                "nis": s.nis,
                "nama": s.nama,
                "nilaiAngka": entry.map(|e| e.0),
                "predikat": entry.map(|e| e.1.clone()),
            });
            if kategori == Kategori::Hafalan {
                row["keterangan"] = json!(entry.and_then(|e| e.2.clone()));
            }
            row
        })
        .collect();

    let min = scores.iter().copied().reduce(f64::min);
    let max = scores.iter().copied().reduce(f64::max);
    let mut out = json!({
        "kelas": kelas.to_json(),
        "mapel": mapel.to_json(),
        "periodeId": periode_id,
        "rows": rows,
        "stats": {
            "terisi": scores.len(),
            "rataRata": grading::average(scores.iter().copied()),
            "min": min,
            "max": max,
        }
    });
    if kategori == Kategori::Hafalan {
        out["targetHafalan"] = json!(target_hafalan(conn, &kelas.tingkatan_id, &mapel.id)?);
    }
    Ok(out)
}

fn handle_bulk_upsert(
    state: &mut AppState,
    req: &Request,
    kategori: Kategori,
) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let periode_id = required_str(&req.params, "periodeId")?;
    ensure_exists(conn, "periode_ajaran", &periode_id, "periode")?;
    let mapel = load_mapel(conn, &required_str(&req.params, "mapelId")?)?;
    require_kategori(&mapel, kategori)?;
    let entries = required_array(&req.params, "entries")?;
    if entries.len() > MAX_BULK_ENTRIES {
        return Err(HandlerErr::bad_params(format!(
            "entries must contain at most {} items",
            MAX_BULK_ENTRIES
        ))
        .with_details(json!({ "count": entries.len() })));
    }

    let mut parsed = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let at = |e: HandlerErr| e.with_details(json!({ "index": i }));
        let siswa_id = required_str(entry, "siswaId").map_err(at)?;
        ensure_exists(conn, "siswa", &siswa_id, "siswa").map_err(at)?;
        let nilai = nullable_f64(entry.get("nilaiAngka"), "nilaiAngka")
            .and_then(checked_nilai)
            .map_err(at)?;
        let keterangan = match kategori {
            Kategori::Hafalan => optional_str(entry, "keterangan").map_err(at)?,
            Kategori::Ujian => None,
        };
        if let Some(k) = &keterangan {
            max_chars(k, "keterangan", MAX_KETERANGAN_CHARS).map_err(at)?;
        }
        parsed.push(NilaiEntry {
            siswa_id,
            nilai,
            keterangan,
        });
    }

    let tx = conn.unchecked_transaction()?;
    let (mut upserted, mut deleted) = (0usize, 0usize);
    for (i, e) in parsed.iter().enumerate() {
        upsert_nilai(
            &tx,
            kategori,
            &e.siswa_id,
            &mapel.id,
            &periode_id,
            e.nilai,
            e.keterangan.as_deref(),
        )
        .map_err(|err| err.with_details(json!({ "index": i })))?;
        if e.nilai.is_some() {
            upserted += 1;
        } else {
            deleted += 1;
        }
    }
    tx.commit()?;
    Ok(json!({ "upserted": upserted, "deleted": deleted }))
}

fn handle_nilai_import(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let path = PathBuf::from(required_str(&req.params, "path")?);
    let periode_id = required_str(&req.params, "periodeId")?;
    ensure_exists(conn, "periode_ajaran", &periode_id, "periode")?;
    let mapel = load_mapel(conn, &required_str(&req.params, "mapelId")?)?;

    let sheet = spreadsheet::read_sheet(&path)
        .map_err(|e| HandlerErr::new("import_read_failed", format!("{e:#}")))?;
    let nis_col = sheet.column(&["nis", "no induk", "nomor induk"]);
    let nilai_col = sheet.column(&["nilai", "nilai angka", "skor"]);
    let ket_col = sheet.column(&["keterangan", "ket"]);
    if nis_col.is_none() || nilai_col.is_none() {
        return Err(HandlerErr::bad_params("sheet must have NIS and Nilai columns")
            .with_details(json!({ "headers": sheet.headers })));
    }

    let tx = conn.unchecked_transaction()?;
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let (mut upserted, mut skipped) = (0usize, 0usize);
    for row in &sheet.rows {
        let mut reject = |message: String| {
            skipped += 1;
            errors.push(json!({ "row": row.line, "message": message }));
        };
        let Some(nis) = row.get(nis_col) else {
            reject("NIS kosong".into());
            continue;
        };
        let siswa_id: Option<String> = tx
            .query_row("SELECT id FROM siswa WHERE nis = ?", [nis], |r| r.get(0))
            .optional()?;
        let Some(siswa_id) = siswa_id else {
            reject(format!("NIS tidak ditemukan: {}", nis));
            continue;
        };
        if !seen.insert(siswa_id.clone()) {
            reject(format!("NIS ganda dalam file: {}", nis));
            continue;
        }
        let Some(raw) = row.get(nilai_col) else {
            reject("Nilai kosong".into());
            continue;
        };
        let nilai = match raw
            .replace(',', ".")
            .parse::<f64>()
            .map_err(|_| format!("nilai bukan angka: {}", raw))
            .and_then(|v| grading::validate_nilai(v).map_err(|e| e.to_string()))
        {
            Ok(v) => v,
            Err(message) => {
                reject(message);
                continue;
            }
        };
        let keterangan = match mapel.kategori {
            Kategori::Hafalan => row.get(ket_col),
            Kategori::Ujian => None,
        };
        upsert_nilai(
            &tx,
            mapel.kategori,
            &siswa_id,
            &mapel.id,
            &periode_id,
            Some(nilai),
            keterangan,
        )?;
        upserted += 1;
    }
    tx.commit()?;
    info!(
        upserted,
        skipped,
        kategori = mapel.kategori.as_str(),
        "nilai import applied"
    );
    Ok(json!({ "upserted": upserted, "skipped": skipped, "errors": errors }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Value, HandlerErr>> {
    match req.method.as_str() {
        "nilaiUjian.grid" => Some(handle_grid(state, req, Kategori::Ujian)),
        "nilaiUjian.bulkUpsert" => Some(handle_bulk_upsert(state, req, Kategori::Ujian)),
        "nilaiHafalan.grid" => Some(handle_grid(state, req, Kategori::Hafalan)),
        "nilaiHafalan.bulkUpsert" => Some(handle_bulk_upsert(state, req, Kategori::Hafalan)),
        "nilai.import" => Some(handle_nilai_import(state, req)),
        _ => None,
    }
}
