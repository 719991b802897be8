use crate::grading::{self, Kategori, NilaiKind};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::akademik::{active_periode, load_periode};
use crate::ipc::handlers::kehadiran::{counts_for_periode, list_indikator, totals_by_siswa, Absensi};
use crate::ipc::handlers::kelas::{load_kelas, KelasInfo};
use crate::ipc::handlers::mapel::{mapel_for_tingkatan, Mapel};
use crate::ipc::handlers::setup::{load_section, SetupSection};
use crate::ipc::handlers::sikap::{list_indikator_sikap, load_catatan, sikap_for_periode, JenisSikap};
use crate::ipc::handlers::siswa::{active_siswa_in_kelas, load_siswa, Siswa};
use crate::ipc::params::required_str;
use crate::ipc::types::{AppState, Request};
use crate::rapot::{column_averages, format_score, group_grade, summarize_rows, RowSummary};
use crate::spreadsheet;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;

type ScoreMap = HashMap<(String, String), (f64, String, Option<String>)>;

/// Every stored ujian and hafalan score of a periode, keyed by `(siswa_id, mapel_id)`.
fn scores_for_periode(conn: &Connection, periode_id: &str) -> Result<ScoreMap, HandlerErr> {
    let mut out = HashMap::new();
    for sql in [
        "SELECT siswa_id, mapel_id, nilai_angka, predikat, NULL FROM nilai_ujian WHERE periode_id = ?",
        "SELECT siswa_id, mapel_id, nilai_angka, predikat, keterangan FROM nilai_hafalan WHERE periode_id = ?",
    ] {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([periode_id])?;
        while let Some(r) = rows.next()? {
            out.insert((r.get(0)?, r.get(1)?), (r.get(2)?, r.get(3)?, r.get(4)?));
        }
    }
    Ok(out)
}

struct Leger {
    kelas: KelasInfo,
    columns: Vec<Mapel>,
    siswa: Vec<Siswa>,
    nilai: Vec<Vec<Option<f64>>>,
    summary: Vec<RowSummary>,
    absensi: Vec<Absensi>,
}

impl Leger {
    /// Row indices sorted by rank, then nama. Unranked rows go last.
    fn order(&self) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.siswa.len()).collect();
        idx.sort_by(|&a, &b| {
            let ra = self.summary[a].rank.unwrap_or(usize::MAX);
            let rb = self.summary[b].rank.unwrap_or(usize::MAX);
            ra.cmp(&rb).then_with(|| {
                self.siswa[a]
                    .nama
                    .to_lowercase()
                    .cmp(&self.siswa[b].nama.to_lowercase())
            })
        });
        idx
    }
}

fn build_leger(conn: &Connection, kelas_id: &str, periode_id: &str) -> Result<Leger, HandlerErr> {
    let kelas = load_kelas(conn, kelas_id)?;
    let mut columns: Vec<Mapel> = Vec::new();
    for kategori in [Kategori::Ujian, Kategori::Hafalan] {
        columns.extend(
            mapel_for_tingkatan(conn, Some(&kelas.tingkatan_id), kategori)?
                .into_iter()
                .map(|(m, _)| m),
        );
    }
    let siswa = active_siswa_in_kelas(conn, &kelas.id)?;
    let scores = scores_for_periode(conn, periode_id)?;
    let nilai: Vec<Vec<Option<f64>>> = siswa
        .iter()
        .map(|s| {
            columns
                .iter()
                .map(|m| scores.get(&(s.id.clone(), m.id.clone())).map(|e| e.0))
                .collect()
        })
        .collect();
    let summary = summarize_rows(&nilai);
    let totals = totals_by_siswa(conn, periode_id)?;
    let absensi = siswa
        .iter()
        .map(|s| totals.get(&s.id).copied().unwrap_or_default())
        .collect();
    Ok(Leger {
        kelas,
        columns,
        siswa,
        nilai,
        summary,
        absensi,
    })
}

fn handle_rapot_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let siswa = load_siswa(conn, &required_str(&req.params, "siswaId")?)?;
    let periode_id = required_str(&req.params, "periodeId")?;
    let periode = load_periode(conn, &periode_id)?;
    let sekolah = load_section(conn, SetupSection::Sekolah)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rapot_settings = load_section(conn, SetupSection::Rapot)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let kelas = match &siswa.kelas_id {
        Some(id) => Some(load_kelas(conn, id)?),
        None => None,
    };
    let tingkatan_id = kelas.as_ref().map(|k| k.tingkatan_id.as_str());
    let scores = scores_for_periode(conn, &periode_id)?;

    let mut ujian_values = Vec::new();
    let nilai_ujian: Vec<Value> = mapel_for_tingkatan(conn, tingkatan_id, Kategori::Ujian)?
        .into_iter()
        .map(|(m, _)| {
            let s = scores.get(&(siswa.id.clone(), m.id.clone()));
            if let Some(e) = s {
                ujian_values.push(e.0);
            }
            json!({
                "mapelId": m.id,
                "namaMapel": m.nama_mapel,
                "kode": m.kode,
                "nilaiAngka": s.map(|e| e.0),
                "predikat": s.map(|e| e.1.clone()),
                "deskripsi": s.map(|e| grading::deskripsi(NilaiKind::Ujian, e.0)),
            })
        })
        .collect();

    let nilai_hafalan: Vec<Value> = mapel_for_tingkatan(conn, tingkatan_id, Kategori::Hafalan)?
        .into_iter()
        .map(|(m, target)| {
            let s = scores.get(&(siswa.id.clone(), m.id.clone()));
            json!({
                "mapelId": m.id,
                "namaMapel": m.nama_mapel,
                "targetHafalan": target,
                "nilaiAngka": s.map(|e| e.0),
                "predikat": s.map(|e| e.1.clone()),
                "deskripsi": s.map(|e| grading::deskripsi(NilaiKind::Hafalan, e.0)),
                "keterangan": s.and_then(|e| e.2.clone()),
            })
        })
        .collect();

    let counts = counts_for_periode(conn, &periode_id)?;
    let mut total_kehadiran = Absensi::default();
    let kehadiran: Vec<Value> = list_indikator(conn)?
        .into_iter()
        .map(|(id, nama)| {
            let a = counts
                .get(&(siswa.id.clone(), id.clone()))
                .copied()
                .unwrap_or_default();
            total_kehadiran.add(&a);
            let mut row = a.to_json();
            row["indikatorId"] = json!(id);
            row["nama"] = json!(nama);
            row
        })
        .collect();

    let stored_sikap = sikap_for_periode(conn, &periode_id)?;
    let mut sikap = serde_json::Map::new();
    for jenis in JenisSikap::ALL {
        let mut values = Vec::new();
        let indikator: Vec<Value> = list_indikator_sikap(conn, Some(jenis))?
            .into_iter()
            .map(|ind| {
                let v = stored_sikap.get(&(siswa.id.clone(), ind.id.clone()));
                if let Some(e) = v {
                    values.push(e.0);
                }
                json!({
                    "indikatorId": ind.id,
                    "indikator": ind.indikator,
                    "nilai": v.map(|e| e.0),
                    "predikat": v.map(|e| e.1.clone()),
                    "deskripsi": v.map(|e| grading::deskripsi(NilaiKind::Sikap, e.0)),
                })
            })
            .collect();
        let grade = group_grade(NilaiKind::Sikap, values);
        sikap.insert(
            jenis.as_str().to_string(),
            json!({
                "indikator": indikator,
                "rataRata": grade.rata_rata,
                "predikat": grade.predikat,
                "deskripsi": grade.deskripsi,
            }),
        );
    }

    let tampilkan_peringkat = rapot_settings
        .get("tampilkanPeringkat")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let peringkat = match (&kelas, tampilkan_peringkat, siswa.status.as_str()) {
        (Some(k), true, "aktif") => {
            let leger = build_leger(conn, &k.id, &periode_id)?;
            let of = leger.summary.iter().filter(|r| r.rank.is_some()).count();
            let rank = leger
                .siswa
                .iter()
                .position(|s| s.id == siswa.id)
                .and_then(|i| leger.summary[i].rank);
            json!({ "rank": rank, "of": of })
        }
        _ => Value::Null,
    };

    Ok(json!({
        "sekolah": sekolah,
        "periode": periode,
        "siswa": siswa.to_json(),
        "kelas": kelas.as_ref().map(KelasInfo::to_json),
        "nilaiUjian": nilai_ujian,
        "rataRataUjian": grading::average(ujian_values),
        "nilaiHafalan": nilai_hafalan,
        "kehadiran": kehadiran,
        "totalKehadiran": total_kehadiran.to_json(),
        "sikap": sikap,
        "catatan": load_catatan(conn, &siswa.id, &periode_id)?,
        "peringkat": peringkat,
        "rapot": rapot_settings,
    }))
}

fn handle_rapot_leger(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let kelas_id = required_str(&req.params, "kelasId")?;
    let periode_id = required_str(&req.params, "periodeId")?;
    let periode = load_periode(conn, &periode_id)?;
    let leger = build_leger(conn, &kelas_id, &periode_id)?;

    let columns: Vec<Value> = leger
        .columns
        .iter()
        .map(|m| json!({ "mapelId": m.id, "namaMapel": m.nama_mapel, "kategori": m.kategori.as_str() }))
        .collect();
    let rows: Vec<Value> = leger
        .order()
        .into_iter()
        .map(|i| {
            let s = &leger.siswa[i];
            let a = &leger.absensi[i];
            json!({
                "siswaId": s.id,
                "nis": s.nis,
                "nama": s.nama,
                "nilai": leger.nilai[i],
                "jumlah": leger.summary[i].jumlah,
                "rataRata": leger.summary[i].rata_rata,
                "rank": leger.summary[i].rank,
                "sakit": a.sakit,
                "izin": a.izin,
                "alpha": a.alpha,
            })
        })
        .collect();
    Ok(json!({
        "kelas": leger.kelas.to_json(),
        "periode": periode,
        "columns": columns,
        "rows": rows,
        "rataRataKolom": column_averages(&leger.nilai, leger.columns.len()),
    }))
}

fn handle_rapot_export_leger_csv(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let kelas_id = required_str(&req.params, "kelasId")?;
    let periode_id = required_str(&req.params, "periodeId")?;
    let out_path = PathBuf::from(required_str(&req.params, "outPath")?);
    load_periode(conn, &periode_id)?;
    let leger = build_leger(conn, &kelas_id, &periode_id)?;

    let mut header: Vec<&str> = vec!["No", "NIS", "Nama"];
    header.extend(leger.columns.iter().map(|m| m.nama_mapel.as_str()));
    header.extend(["Jumlah", "Rata-rata", "Peringkat", "Sakit", "Izin", "Alpha"]);

    let rows: Vec<Vec<String>> = leger
        .order()
        .into_iter()
        .enumerate()
        .map(|(n, i)| {
            let s = &leger.siswa[i];
            let a = &leger.absensi[i];
            let mut row = vec![(n + 1).to_string(), s.nis.clone(), s.nama.clone()];
            row.extend(leger.nilai[i].iter().map(|v| format_score(*v)));
            row.push(format_score(leger.summary[i].jumlah));
            row.push(format_score(leger.summary[i].rata_rata));
            row.push(leger.summary[i].rank.map(|r| r.to_string()).unwrap_or_default());
            row.push(a.sakit.to_string());
            row.push(a.izin.to_string());
            row.push(a.alpha.to_string());
            row
        })
        .collect();
    spreadsheet::write_csv(&out_path, &header, &rows)
        .map_err(|e| HandlerErr::new("export_failed", format!("{e:#}")))?;
    Ok(json!({ "path": out_path.to_string_lossy(), "rowCount": rows.len() }))
}

fn handle_dashboard_summary(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let count = |sql: &str| -> Result<i64, HandlerErr> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    Ok(json!({
        "siswaAktif": count("SELECT COUNT(*) FROM siswa WHERE status = 'aktif'")?,
        "siswaLakiLaki": count("SELECT COUNT(*) FROM siswa WHERE status = 'aktif' AND jenis_kelamin = 'L'")?,
        "siswaPerempuan": count("SELECT COUNT(*) FROM siswa WHERE status = 'aktif' AND jenis_kelamin = 'P'")?,
        "siswaLulus": count("SELECT COUNT(*) FROM siswa WHERE status = 'lulus'")?,
        "siswaKeluar": count("SELECT COUNT(*) FROM siswa WHERE status = 'keluar'")?,
        "kelas": count("SELECT COUNT(*) FROM kelas")?,
        "guru": count("SELECT COUNT(*) FROM guru")?,
        "mapel": count("SELECT COUNT(*) FROM mapel")?,
        "periodeAktif": active_periode(conn)?,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Value, HandlerErr>> {
    match req.method.as_str() {
        "rapot.get" => Some(handle_rapot_get(state, req)),
        "rapot.leger" => Some(handle_rapot_leger(state, req)),
        "rapot.exportLegerCsv" => Some(handle_rapot_export_leger_csv(state, req)),
        "dashboard.summary" => Some(handle_dashboard_summary(state, req)),
        _ => None,
    }
}
