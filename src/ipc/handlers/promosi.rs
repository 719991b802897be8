use crate::db;
use crate::ipc::error::{write_err, HandlerErr};
use crate::ipc::handlers::akademik::active_tahun_id;
use crate::ipc::handlers::kelas::{load_kelas, next_level_kelas, KelasInfo};
use crate::ipc::handlers::siswa::{active_siswa_in_kelas, load_siswa};
use crate::ipc::params::{ensure_exists, optional_str, required_array, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Aksi {
    Naik,
    Tinggal,
    Lulus,
    Keluar,
}

impl Aksi {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "naik" => Some(Self::Naik),
            "tinggal" => Some(Self::Tinggal),
            "lulus" => Some(Self::Lulus),
            "keluar" => Some(Self::Keluar),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Naik => "naik",
            Self::Tinggal => "tinggal",
            Self::Lulus => "lulus",
            Self::Keluar => "keluar",
        }
    }
}

fn handle_promosi_preview(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let kelas = load_kelas(conn, &required_str(&req.params, "kelasId")?)?;
    let max_urutan: Option<i64> =
        conn.query_row("SELECT MAX(urutan) FROM tingkatan", [], |r| r.get(0))?;
    let tingkat_akhir = max_urutan.map_or(true, |m| kelas.urutan >= m);
    let kandidat = if tingkat_akhir {
        Vec::new()
    } else {
        next_level_kelas(conn, kelas.urutan)?
    };
    let saran = if tingkat_akhir { Aksi::Lulus } else { Aksi::Naik };
    // A single candidate class is preselected.
    let saran_tujuan = match (saran, kandidat.as_slice()) {
        (Aksi::Naik, [only]) => Some(only.id.clone()),
        _ => None,
    };

    let siswa: Vec<Value> = active_siswa_in_kelas(conn, &kelas.id)?
        .into_iter()
        .map(|s| {
            json!({
                "siswaId": s.id,
                "nis": s.nis,
                "nama": s.nama,
                "aksi": saran.as_str(),
                "kelasTujuanId": saran_tujuan,
            })
        })
        .collect();
    Ok(json!({
        "kelas": kelas.to_json(),
        "tingkatAkhir": tingkat_akhir,
        "kandidatKelas": kandidat.iter().map(KelasInfo::to_json).collect::<Vec<_>>(),
        "siswa": siswa,
    }))
}

fn handle_promosi_apply(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let asal = load_kelas(conn, &required_str(&req.params, "kelasAsalId")?)?;
    let tahun_ajaran_id = match optional_str(&req.params, "tahunAjaranId")? {
        Some(id) => {
            ensure_exists(conn, "tahun_ajaran", &id, "tahun ajaran")?;
            Some(id)
        }
        None => active_tahun_id(conn)?,
    };
    let items = required_array(&req.params, "items")?;
    if items.is_empty() {
        return Err(HandlerErr::bad_params("items must not be empty"));
    }

    let tx = conn.unchecked_transaction()?;
    let now = db::now_rfc3339();
    let mut seen = HashSet::new();
    let mut counts: BTreeMap<Aksi, usize> = BTreeMap::new();

    for (i, item) in items.iter().enumerate() {
        let at = |e: HandlerErr| e.with_details(json!({ "index": i }));
        let siswa_id = required_str(item, "siswaId").map_err(at)?;
        let aksi_raw = required_str(item, "aksi").map_err(at)?;
        let aksi = Aksi::parse(&aksi_raw).ok_or_else(|| {
            at(HandlerErr::bad_params(
                "aksi must be one of: naik, tinggal, lulus, keluar",
            ))
        })?;
        if !seen.insert(siswa_id.clone()) {
            return Err(at(HandlerErr::bad_params("siswa appears twice in items")));
        }
        let siswa = load_siswa(&tx, &siswa_id).map_err(at)?;
        if siswa.status != "aktif" || siswa.kelas_id.as_deref() != Some(asal.id.as_str()) {
            return Err(at(HandlerErr::bad_params(
                "siswa is not an active member of kelas asal",
            )));
        }

        let tujuan_raw = optional_str(item, "kelasTujuanId").map_err(at)?;
        let kelas_tujuan: Option<String> = match aksi {
            Aksi::Naik => {
                let Some(id) = tujuan_raw else {
                    return Err(at(HandlerErr::bad_params("naik requires kelasTujuanId")));
                };
                let tujuan = load_kelas(&tx, &id).map_err(at)?;
                if tujuan.urutan <= asal.urutan {
                    return Err(HandlerErr::bad_params(
                        "kelas tujuan must be on a higher tingkatan",
                    )
                    .with_details(json!({
                        "index": i,
                        "urutanAsal": asal.urutan,
                        "urutanTujuan": tujuan.urutan
                    })));
                }
                Some(tujuan.id)
            }
            Aksi::Tinggal => match tujuan_raw {
                None => Some(asal.id.clone()),
                Some(id) => {
                    let tujuan = load_kelas(&tx, &id).map_err(at)?;
                    if tujuan.tingkatan_id != asal.tingkatan_id {
                        return Err(at(HandlerErr::bad_params(
                            "tinggal may only move within the same tingkatan",
                        )));
                    }
                    Some(tujuan.id)
                }
            },
            Aksi::Lulus | Aksi::Keluar => None,
        };

        match aksi {
            Aksi::Naik | Aksi::Tinggal => {
                tx.execute(
                    "UPDATE siswa SET kelas_id = ?, updated_at = ? WHERE id = ?",
                    (&kelas_tujuan, &now, &siswa_id),
                )
                .map_err(|e| at(HandlerErr::db("db_update_failed", e)))?;
            }
            Aksi::Lulus | Aksi::Keluar => {
                tx.execute(
                    "UPDATE siswa SET status = ?, updated_at = ? WHERE id = ?",
                    (aksi.as_str(), &now, &siswa_id),
                )
                .map_err(|e| at(HandlerErr::db("db_update_failed", e)))?;
            }
        }
        tx.execute(
            "INSERT INTO riwayat_kelas(id, siswa_id, kelas_asal_id, kelas_tujuan_id, tahun_ajaran_id, aksi, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &siswa_id,
                &asal.id,
                &kelas_tujuan,
                &tahun_ajaran_id,
                aksi.as_str(),
                &now,
            ),
        )
        .map_err(|e| at(write_err("db_insert_failed", e)))?;
        *counts.entry(aksi).or_default() += 1;
    }
    tx.commit()?;

    let count = |a: Aksi| counts.get(&a).copied().unwrap_or(0);
    info!(
        kelas = %asal.nama_kelas,
        naik = count(Aksi::Naik),
        tinggal = count(Aksi::Tinggal),
        lulus = count(Aksi::Lulus),
        keluar = count(Aksi::Keluar),
        "promosi applied"
    );
    Ok(json!({
        "kelasAsalId": asal.id,
        "tahunAjaranId": tahun_ajaran_id,
        "naik": count(Aksi::Naik),
        "tinggal": count(Aksi::Tinggal),
        "lulus": count(Aksi::Lulus),
        "keluar": count(Aksi::Keluar),
        "total": items.len(),
    }))
}

fn handle_promosi_riwayat(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let siswa_id = required_str(&req.params, "siswaId")?;
    ensure_exists(conn, "siswa", &siswa_id, "siswa")?;
    let mut stmt = conn.prepare(
        "SELECT r.id, r.aksi, r.kelas_asal_id, ka.nama_kelas, r.kelas_tujuan_id, kt.nama_kelas,
                r.tahun_ajaran_id, ta.nama, r.created_at
         FROM riwayat_kelas r
         LEFT JOIN kelas ka ON ka.id = r.kelas_asal_id
         LEFT JOIN kelas kt ON kt.id = r.kelas_tujuan_id
         LEFT JOIN tahun_ajaran ta ON ta.id = r.tahun_ajaran_id
         WHERE r.siswa_id = ?
         ORDER BY r.created_at, r.rowid",
    )?;
    let riwayat = stmt
        .query_map([&siswa_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "aksi": r.get::<_, String>(1)?,
                "kelasAsalId": r.get::<_, Option<String>>(2)?,
                "kelasAsal": r.get::<_, Option<String>>(3)?,
                "kelasTujuanId": r.get::<_, Option<String>>(4)?,
                "kelasTujuan": r.get::<_, Option<String>>(5)?,
                "tahunAjaranId": r.get::<_, Option<String>>(6)?,
                "tahunAjaran": r.get::<_, Option<String>>(7)?,
                "createdAt": r.get::<_, String>(8)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "siswaId": siswa_id, "riwayat": riwayat }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Value, HandlerErr>> {
    match req.method.as_str() {
        "promosi.preview" => Some(handle_promosi_preview(state, req)),
        "promosi.apply" => Some(handle_promosi_apply(state, req)),
        "promosi.riwayat" => Some(handle_promosi_riwayat(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::Aksi;

    #[test]
    fn aksi_parses_case_insensitively() {
        assert_eq!(Aksi::parse("Naik"), Some(Aksi::Naik));
        assert_eq!(Aksi::parse(" lulus "), Some(Aksi::Lulus));
        assert_eq!(Aksi::parse("pindah"), None);
    }
}
