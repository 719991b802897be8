use crate::db;
use crate::ipc::error::{write_err, HandlerErr};
use crate::ipc::params::{
    ensure_exists, optional_bool, optional_str, patch_i64, patch_object, patch_str, required_str,
    validate_date, Patch,
};
use crate::ipc::types::{AppState, Request};
use crate::spreadsheet::{self, Sheet, SheetRow};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

const STATUSES: &[&str] = &["aktif", "lulus", "keluar"];

#[derive(Debug, Clone)]
pub struct Siswa {
    pub id: String,
    pub nis: String,
    pub nisn: Option<String>,
    pub nama: String,
    pub jenis_kelamin: String,
    pub tempat_lahir: Option<String>,
    pub tanggal_lahir: Option<String>,
    pub nama_ayah: Option<String>,
    pub nama_ibu: Option<String>,
    pub alamat: Option<String>,
    pub kelas_id: Option<String>,
    pub nama_kelas: Option<String>,
    pub status: String,
    pub tahun_masuk: Option<i64>,
}

impl Siswa {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "nis": self.nis,
            "nisn": self.nisn,
            "nama": self.nama,
            "jenisKelamin": self.jenis_kelamin,
            "tempatLahir": self.tempat_lahir,
            "tanggalLahir": self.tanggal_lahir,
            "namaAyah": self.nama_ayah,
            "namaIbu": self.nama_ibu,
            "alamat": self.alamat,
            "kelasId": self.kelas_id,
            "namaKelas": self.nama_kelas,
            "status": self.status,
            "tahunMasuk": self.tahun_masuk,
        })
    }
}

const SISWA_SELECT: &str = "SELECT s.id, s.nis, s.nisn, s.nama, s.jenis_kelamin, s.tempat_lahir,
       s.tanggal_lahir, s.nama_ayah, s.nama_ibu, s.alamat, s.kelas_id, k.nama_kelas,
       s.status, s.tahun_masuk
     FROM siswa s
     LEFT JOIN kelas k ON k.id = s.kelas_id";

fn siswa_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Siswa> {
    Ok(Siswa {
        id: r.get(0)?,
        nis: r.get(1)?,
        nisn: r.get(2)?,
        nama: r.get(3)?,
        jenis_kelamin: r.get(4)?,
        tempat_lahir: r.get(5)?,
        tanggal_lahir: r.get(6)?,
        nama_ayah: r.get(7)?,
        nama_ibu: r.get(8)?,
        alamat: r.get(9)?,
        kelas_id: r.get(10)?,
        nama_kelas: r.get(11)?,
        status: r.get(12)?,
        tahun_masuk: r.get(13)?,
    })
}

pub fn load_siswa(conn: &Connection, siswa_id: &str) -> Result<Siswa, HandlerErr> {
    let sql = format!("{} WHERE s.id = ?", SISWA_SELECT);
    conn.query_row(&sql, [siswa_id], siswa_from_row)
        .optional()?
        .ok_or_else(|| {
            HandlerErr::not_found("siswa not found").with_details(json!({ "siswaId": siswa_id }))
        })
}

/// Active members of a class, ordered by name.
pub fn active_siswa_in_kelas(conn: &Connection, kelas_id: &str) -> Result<Vec<Siswa>, HandlerErr> {
    let sql = format!(
        "{} WHERE s.kelas_id = ? AND s.status = 'aktif' ORDER BY s.nama COLLATE NOCASE, s.nis",
        SISWA_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([kelas_id], siswa_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn parse_jenis_kelamin(s: &str) -> Option<&'static str> {
    match s.trim().to_ascii_lowercase().as_str() {
        "l" | "lk" | "laki-laki" | "laki laki" | "putra" => Some("L"),
        "p" | "pr" | "perempuan" | "putri" => Some("P"),
        _ => None,
    }
}

fn parse_status(s: &str) -> Result<String, HandlerErr> {
    let t = s.trim().to_ascii_lowercase();
    if STATUSES.contains(&t.as_str()) {
        Ok(t)
    } else {
        Err(HandlerErr::bad_params("status must be one of: aktif, lulus, keluar")
            .with_details(json!({ "status": s })))
    }
}

fn parse_tahun_masuk(v: i64) -> Result<i64, HandlerErr> {
    if !(1900..=2200).contains(&v) {
        return Err(HandlerErr::bad_params("tahunMasuk must be a plausible year")
            .with_details(json!({ "tahunMasuk": v })));
    }
    Ok(v)
}

fn handle_siswa_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let kelas_id = optional_str(&req.params, "kelasId")?;
    let status = optional_str(&req.params, "status")?
        .map(|s| parse_status(&s))
        .transpose()?;
    let q = optional_str(&req.params, "q")?.map(|s| format!("%{}%", s.to_lowercase()));

    let sql = format!(
        "{} WHERE (?1 IS NULL OR s.kelas_id = ?1)
           AND (?2 IS NULL OR s.status = ?2)
           AND (?3 IS NULL OR lower(s.nama) LIKE ?3 OR lower(s.nis) LIKE ?3)
         ORDER BY s.nama COLLATE NOCASE, s.nis",
        SISWA_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((&kelas_id, &status, &q), siswa_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let siswa: Vec<Value> = rows.iter().map(Siswa::to_json).collect();
    Ok(json!({ "siswa": siswa, "count": siswa.len() }))
}

fn handle_siswa_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "siswaId")?;
    Ok(load_siswa(conn, &id)?.to_json())
}

fn handle_siswa_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p = &req.params;
    let nis = required_str(p, "nis")?;
    let nama = required_str(p, "nama")?;
    let jk_raw = required_str(p, "jenisKelamin")?;
    let jenis_kelamin = parse_jenis_kelamin(&jk_raw)
        .ok_or_else(|| HandlerErr::bad_params("jenisKelamin must be L or P"))?;
    let tanggal_lahir = optional_str(p, "tanggalLahir")?
        .map(|s| validate_date(&s, "tanggalLahir"))
        .transpose()?;
    let kelas_id = optional_str(p, "kelasId")?;
    if let Some(k) = &kelas_id {
        ensure_exists(conn, "kelas", k, "kelas")?;
    }
    let status = match optional_str(p, "status")? {
        Some(s) => parse_status(&s)?,
        None => "aktif".to_string(),
    };
    let tahun_masuk = crate::ipc::params::optional_i64(p, "tahunMasuk")?
        .map(parse_tahun_masuk)
        .transpose()?;

    let id = Uuid::new_v4().to_string();
    let now = db::now_rfc3339();
    conn.execute(
        "INSERT INTO siswa(id, nis, nisn, nama, jenis_kelamin, tempat_lahir, tanggal_lahir,
           nama_ayah, nama_ibu, alamat, kelas_id, status, tahun_masuk, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params_from_iter([
            SqlValue::Text(id.clone()),
            SqlValue::Text(nis.clone()),
            opt_text(optional_str(p, "nisn")?),
            SqlValue::Text(nama.clone()),
            SqlValue::Text(jenis_kelamin.to_string()),
            opt_text(optional_str(p, "tempatLahir")?),
            opt_text(tanggal_lahir),
            opt_text(optional_str(p, "namaAyah")?),
            opt_text(optional_str(p, "namaIbu")?),
            opt_text(optional_str(p, "alamat")?),
            opt_text(kelas_id),
            SqlValue::Text(status),
            tahun_masuk.map(SqlValue::Integer).unwrap_or(SqlValue::Null),
            SqlValue::Text(now.clone()),
            SqlValue::Text(now),
        ]),
    )
    .map_err(|e| write_err("db_insert_failed", e))?;
    Ok(json!({ "siswaId": id, "nis": nis, "nama": nama }))
}

fn opt_text(v: Option<String>) -> SqlValue {
    v.map(SqlValue::Text).unwrap_or(SqlValue::Null)
}

fn handle_siswa_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "siswaId")?;
    ensure_exists(conn, "siswa", &id, "siswa")?;
    let patch = patch_object(&req.params)?;

    let mut sets: Vec<&'static str> = Vec::new();
    let mut bind: Vec<SqlValue> = Vec::new();

    for (key, column, required) in [
        ("nis", "nis = ?", true),
        ("nama", "nama = ?", true),
        ("nisn", "nisn = ?", false),
        ("tempatLahir", "tempat_lahir = ?", false),
        ("namaAyah", "nama_ayah = ?", false),
        ("namaIbu", "nama_ibu = ?", false),
        ("alamat", "alamat = ?", false),
    ] {
        match patch_str(patch, key)? {
            Patch::Keep => {}
            Patch::Clear if required => {
                return Err(HandlerErr::bad_params(format!("{} must not be empty", key)))
            }
            Patch::Clear => {
                sets.push(column);
                bind.push(SqlValue::Null);
            }
            Patch::Set(v) => {
                sets.push(column);
                bind.push(SqlValue::Text(v));
            }
        }
    }
    match patch_str(patch, "jenisKelamin")? {
        Patch::Keep => {}
        Patch::Clear => return Err(HandlerErr::bad_params("jenisKelamin must be L or P")),
        Patch::Set(v) => {
            let jk = parse_jenis_kelamin(&v)
                .ok_or_else(|| HandlerErr::bad_params("jenisKelamin must be L or P"))?;
            sets.push("jenis_kelamin = ?");
            bind.push(SqlValue::Text(jk.to_string()));
        }
    }
    match patch_str(patch, "tanggalLahir")? {
        Patch::Keep => {}
        Patch::Clear => {
            sets.push("tanggal_lahir = ?");
            bind.push(SqlValue::Null);
        }
        Patch::Set(v) => {
            sets.push("tanggal_lahir = ?");
            bind.push(SqlValue::Text(validate_date(&v, "tanggalLahir")?));
        }
    }
    match patch_str(patch, "kelasId")? {
        Patch::Keep => {}
        Patch::Clear => {
            sets.push("kelas_id = ?");
            bind.push(SqlValue::Null);
        }
        Patch::Set(v) => {
            ensure_exists(conn, "kelas", &v, "kelas")?;
            sets.push("kelas_id = ?");
            bind.push(SqlValue::Text(v));
        }
    }
    match patch_str(patch, "status")? {
        Patch::Keep => {}
        Patch::Clear => return Err(HandlerErr::bad_params("status must not be empty")),
        Patch::Set(v) => {
            sets.push("status = ?");
            bind.push(SqlValue::Text(parse_status(&v)?));
        }
    }
    match patch_i64(patch, "tahunMasuk")? {
        Patch::Keep => {}
        Patch::Clear => {
            sets.push("tahun_masuk = ?");
            bind.push(SqlValue::Null);
        }
        Patch::Set(v) => {
            sets.push("tahun_masuk = ?");
            bind.push(SqlValue::Integer(parse_tahun_masuk(v)?));
        }
    }

    if !sets.is_empty() {
        sets.push("updated_at = ?");
        bind.push(SqlValue::Text(db::now_rfc3339()));
        bind.push(SqlValue::Text(id.clone()));
        let sql = format!("UPDATE siswa SET {} WHERE id = ?", sets.join(", "));
        conn.execute(&sql, params_from_iter(bind))
            .map_err(|e| write_err("db_update_failed", e))?;
    }
    Ok(load_siswa(conn, &id)?.to_json())
}

fn handle_siswa_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let id = required_str(&req.params, "siswaId")?;
    ensure_exists(conn, "siswa", &id, "siswa")?;

    let tx = conn.unchecked_transaction()?;
    for table in [
        "nilai_ujian",
        "nilai_hafalan",
        "kehadiran",
        "penilaian_sikap",
        "catatan_wali_kelas",
        "riwayat_kelas",
    ] {
        tx.execute(&format!("DELETE FROM {} WHERE siswa_id = ?", table), [&id])
            .map_err(|e| {
                HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": table }))
            })?;
    }
    tx.execute("DELETE FROM siswa WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit()?;
    Ok(json!({ "deleted": true }))
}

// --- spreadsheet import/export ---

struct ImportColumns {
    nis: Option<usize>,
    nisn: Option<usize>,
    nama: Option<usize>,
    jenis_kelamin: Option<usize>,
    tempat_lahir: Option<usize>,
    tanggal_lahir: Option<usize>,
    nama_ayah: Option<usize>,
    nama_ibu: Option<usize>,
    alamat: Option<usize>,
    kelas: Option<usize>,
    tahun_masuk: Option<usize>,
}

impl ImportColumns {
    fn resolve(sheet: &Sheet) -> Self {
        Self {
            nis: sheet.column(&["nis", "no induk", "nomor induk"]),
            nisn: sheet.column(&["nisn"]),
            nama: sheet.column(&["nama", "nama lengkap", "nama siswa", "nama santri"]),
            jenis_kelamin: sheet.column(&["l/p", "jk", "jenis kelamin"]),
            tempat_lahir: sheet.column(&["tempat lahir"]),
            tanggal_lahir: sheet.column(&["tanggal lahir", "tgl lahir"]),
            nama_ayah: sheet.column(&["nama ayah", "ayah"]),
            nama_ibu: sheet.column(&["nama ibu", "ibu"]),
            alamat: sheet.column(&["alamat"]),
            kelas: sheet.column(&["kelas", "nama kelas"]),
            tahun_masuk: sheet.column(&["tahun masuk"]),
        }
    }
}

/// One validated spreadsheet row; `None` fields were blank and are left untouched on update.
struct ImportRow {
    nis: String,
    nama: String,
    jenis_kelamin: Option<&'static str>,
    text_fields: Vec<(&'static str, Option<String>)>,
    tanggal_lahir: Option<String>,
    kelas_id: Option<String>,
    tahun_masuk: Option<i64>,
}

fn parse_import_row(
    conn: &Connection,
    cols: &ImportColumns,
    row: &SheetRow,
    default_kelas: Option<&str>,
) -> Result<ImportRow, String> {
    let nis = row.get(cols.nis).ok_or("NIS kosong")?.to_string();
    let nama = row.get(cols.nama).ok_or("Nama kosong")?.to_string();
    let jenis_kelamin = match row.get(cols.jenis_kelamin) {
        Some(v) => Some(
            parse_jenis_kelamin(v).ok_or_else(|| format!("jenis kelamin tidak dikenal: {}", v))?,
        ),
        None => None,
    };
    let tanggal_lahir = match row.get(cols.tanggal_lahir) {
        Some(v) => Some(validate_date(v, "tanggal lahir").map_err(|e| e.message)?),
        None => None,
    };
    let kelas_id = match row.get(cols.kelas) {
        Some(nama_kelas) => Some(
            crate::ipc::handlers::kelas::kelas_by_name(conn, nama_kelas)
                .map_err(|e| e.message)?
                .ok_or_else(|| format!("kelas tidak ditemukan: {}", nama_kelas))?,
        ),
        None => default_kelas.map(|s| s.to_string()),
    };
    let tahun_masuk = match row.get(cols.tahun_masuk) {
        Some(v) => Some(
            v.parse::<i64>()
                .ok()
                .and_then(|y| parse_tahun_masuk(y).ok())
                .ok_or_else(|| format!("tahun masuk tidak valid: {}", v))?,
        ),
        None => None,
    };
    let text_fields = vec![
        ("nisn", row.get(cols.nisn).map(str::to_string)),
        ("tempat_lahir", row.get(cols.tempat_lahir).map(str::to_string)),
        ("nama_ayah", row.get(cols.nama_ayah).map(str::to_string)),
        ("nama_ibu", row.get(cols.nama_ibu).map(str::to_string)),
        ("alamat", row.get(cols.alamat).map(str::to_string)),
    ];
    Ok(ImportRow {
        nis,
        nama,
        jenis_kelamin,
        text_fields,
        tanggal_lahir,
        kelas_id,
        tahun_masuk,
    })
}

fn apply_import_row(conn: &Connection, row: &ImportRow) -> Result<bool, HandlerErr> {
    let existing: Option<String> = conn
        .query_row("SELECT id FROM siswa WHERE nis = ?", [&row.nis], |r| r.get(0))
        .optional()?;
    let now = db::now_rfc3339();
    match existing {
        Some(id) => {
            let mut sets = vec!["nama = ?".to_string(), "updated_at = ?".to_string()];
            let mut bind = vec![SqlValue::Text(row.nama.clone()), SqlValue::Text(now)];
            if let Some(jk) = row.jenis_kelamin {
                sets.push("jenis_kelamin = ?".into());
                bind.push(SqlValue::Text(jk.to_string()));
            }
            for (column, value) in &row.text_fields {
                if let Some(v) = value {
                    sets.push(format!("{} = ?", column));
                    bind.push(SqlValue::Text(v.clone()));
                }
            }
            if let Some(v) = &row.tanggal_lahir {
                sets.push("tanggal_lahir = ?".into());
                bind.push(SqlValue::Text(v.clone()));
            }
            if let Some(v) = &row.kelas_id {
                sets.push("kelas_id = ?".into());
                bind.push(SqlValue::Text(v.clone()));
            }
            if let Some(v) = row.tahun_masuk {
                sets.push("tahun_masuk = ?".into());
                bind.push(SqlValue::Integer(v));
            }
            bind.push(SqlValue::Text(id));
            let sql = format!("UPDATE siswa SET {} WHERE id = ?", sets.join(", "));
            conn.execute(&sql, params_from_iter(bind))
                .map_err(|e| write_err("db_update_failed", e))?;
            Ok(false)
        }
        None => {
            let field = |name: &str| -> SqlValue {
                row.text_fields
                    .iter()
                    .find(|(c, _)| *c == name)
                    .and_then(|(_, v)| v.clone())
                    .map(SqlValue::Text)
                    .unwrap_or(SqlValue::Null)
            };
            conn.execute(
                "INSERT INTO siswa(id, nis, nisn, nama, jenis_kelamin, tempat_lahir, tanggal_lahir,
                   nama_ayah, nama_ibu, alamat, kelas_id, status, tahun_masuk, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'aktif', ?, ?, ?)",
                params_from_iter([
                    SqlValue::Text(Uuid::new_v4().to_string()),
                    SqlValue::Text(row.nis.clone()),
                    field("nisn"),
                    SqlValue::Text(row.nama.clone()),
                    SqlValue::Text(row.jenis_kelamin.unwrap_or("L").to_string()),
                    field("tempat_lahir"),
                    opt_text(row.tanggal_lahir.clone()),
                    field("nama_ayah"),
                    field("nama_ibu"),
                    field("alamat"),
                    opt_text(row.kelas_id.clone()),
                    row.tahun_masuk.map(SqlValue::Integer).unwrap_or(SqlValue::Null),
                    SqlValue::Text(now.clone()),
                    SqlValue::Text(now),
                ]),
            )
            .map_err(|e| write_err("db_insert_failed", e))?;
            Ok(true)
        }
    }
}

fn handle_siswa_import(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let path = PathBuf::from(required_str(&req.params, "path")?);
    let default_kelas = optional_str(&req.params, "kelasId")?;
    if let Some(k) = &default_kelas {
        ensure_exists(conn, "kelas", k, "kelas")?;
    }
    let dry_run = optional_bool(&req.params, "dryRun")?.unwrap_or(false);

    let sheet = spreadsheet::read_sheet(&path)
        .map_err(|e| HandlerErr::new("import_read_failed", format!("{e:#}")))?;
    let cols = ImportColumns::resolve(&sheet);
    let mut missing = Vec::new();
    if cols.nis.is_none() {
        missing.push("NIS");
    }
    if cols.nama.is_none() {
        missing.push("Nama");
    }
    if !missing.is_empty() {
        return Err(HandlerErr::bad_params("required columns not found")
            .with_details(json!({ "missingColumns": missing, "headers": sheet.headers })));
    }

    let tx = conn.unchecked_transaction()?;
    let mut seen: HashSet<String> = HashSet::new();
    let mut errors: Vec<Value> = Vec::new();
    let (mut inserted, mut updated, mut skipped) = (0usize, 0usize, 0usize);

    for row in &sheet.rows {
        let parsed = match parse_import_row(&tx, &cols, row, default_kelas.as_deref()) {
            Ok(p) => p,
            Err(message) => {
                skipped += 1;
                errors.push(json!({ "row": row.line, "message": message }));
                continue;
            }
        };
        if !seen.insert(parsed.nis.clone()) {
            skipped += 1;
            errors.push(json!({
                "row": row.line,
                "message": format!("NIS ganda dalam file: {}", parsed.nis)
            }));
            continue;
        }
        if dry_run {
            let exists: Option<i64> = tx
                .query_row("SELECT 1 FROM siswa WHERE nis = ?", [&parsed.nis], |r| {
                    r.get(0)
                })
                .optional()?;
            if exists.is_some() {
                updated += 1;
            } else {
                inserted += 1;
            }
            continue;
        }
        if apply_import_row(&tx, &parsed)? {
            inserted += 1;
        } else {
            updated += 1;
        }
    }

    if dry_run {
        tx.rollback()?;
    } else {
        tx.commit()?;
        info!(inserted, updated, skipped, path = %path.to_string_lossy(), "siswa import applied");
    }
    Ok(json!({
        "dryRun": dry_run,
        "inserted": inserted,
        "updated": updated,
        "skipped": skipped,
        "errors": errors,
    }))
}

fn handle_siswa_export_csv(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let out_path = PathBuf::from(required_str(&req.params, "outPath")?);
    let kelas_id = optional_str(&req.params, "kelasId")?;
    let status = optional_str(&req.params, "status")?
        .map(|s| parse_status(&s))
        .transpose()?;
    let sql = format!(
        "{} WHERE (?1 IS NULL OR s.kelas_id = ?1) AND (?2 IS NULL OR s.status = ?2)
         ORDER BY k.nama_kelas, s.nama COLLATE NOCASE",
        SISWA_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((&kelas_id, &status), siswa_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let csv_rows: Vec<Vec<String>> = rows
        .iter()
        .map(|s| {
            vec![
                s.nis.clone(),
                s.nisn.clone().unwrap_or_default(),
                s.nama.clone(),
                s.jenis_kelamin.clone(),
                s.tempat_lahir.clone().unwrap_or_default(),
                s.tanggal_lahir.clone().unwrap_or_default(),
                s.nama_ayah.clone().unwrap_or_default(),
                s.nama_ibu.clone().unwrap_or_default(),
                s.alamat.clone().unwrap_or_default(),
                s.nama_kelas.clone().unwrap_or_default(),
                s.status.clone(),
                s.tahun_masuk.map(|y| y.to_string()).unwrap_or_default(),
            ]
        })
        .collect();
    spreadsheet::write_csv(
        &out_path,
        &[
            "NIS",
            "NISN",
            "Nama",
            "L/P",
            "Tempat Lahir",
            "Tanggal Lahir",
            "Nama Ayah",
            "Nama Ibu",
            "Alamat",
            "Kelas",
            "Status",
            "Tahun Masuk",
        ],
        &csv_rows,
    )
    .map_err(|e| HandlerErr::new("export_failed", format!("{e:#}")))?;
    Ok(json!({ "path": out_path.to_string_lossy(), "rowCount": csv_rows.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Value, HandlerErr>> {
    match req.method.as_str() {
        "siswa.list" => Some(handle_siswa_list(state, req)),
        "siswa.get" => Some(handle_siswa_get(state, req)),
        "siswa.create" => Some(handle_siswa_create(state, req)),
        "siswa.update" => Some(handle_siswa_update(state, req)),
        "siswa.delete" => Some(handle_siswa_delete(state, req)),
        "siswa.import" => Some(handle_siswa_import(state, req)),
        "siswa.exportCsv" => Some(handle_siswa_export_csv(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jenis_kelamin_accepts_common_spellings() {
        assert_eq!(parse_jenis_kelamin("L"), Some("L"));
        assert_eq!(parse_jenis_kelamin("perempuan"), Some("P"));
        assert_eq!(parse_jenis_kelamin(" Laki-Laki "), Some("L"));
        assert_eq!(parse_jenis_kelamin("x"), None);
    }
}
