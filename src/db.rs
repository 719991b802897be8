use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "erapot.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tahun_ajaran(
            id TEXT PRIMARY KEY,
            nama TEXT NOT NULL UNIQUE,
            is_active INTEGER NOT NULL DEFAULT 0,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS periode_ajaran(
            id TEXT PRIMARY KEY,
            tahun_ajaran_id TEXT NOT NULL,
            semester INTEGER NOT NULL,
            nama TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(tahun_ajaran_id) REFERENCES tahun_ajaran(id),
            UNIQUE(tahun_ajaran_id, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_periode_tahun ON periode_ajaran(tahun_ajaran_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tingkatan(
            id TEXT PRIMARY KEY,
            nama TEXT NOT NULL,
            urutan INTEGER NOT NULL UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS guru(
            id TEXT PRIMARY KEY,
            nama TEXT NOT NULL,
            nip TEXT UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS kelas(
            id TEXT PRIMARY KEY,
            nama_kelas TEXT NOT NULL UNIQUE,
            tingkatan_id TEXT NOT NULL,
            wali_kelas_id TEXT,
            FOREIGN KEY(tingkatan_id) REFERENCES tingkatan(id),
            FOREIGN KEY(wali_kelas_id) REFERENCES guru(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_kelas_tingkatan ON kelas(tingkatan_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS siswa(
            id TEXT PRIMARY KEY,
            nis TEXT NOT NULL UNIQUE,
            nama TEXT NOT NULL,
            jenis_kelamin TEXT NOT NULL,
            tempat_lahir TEXT,
            tanggal_lahir TEXT,
            nama_ayah TEXT,
            nama_ibu TEXT,
            alamat TEXT,
            kelas_id TEXT,
            status TEXT NOT NULL DEFAULT 'aktif',
            tahun_masuk INTEGER,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(kelas_id) REFERENCES kelas(id)
        )",
        [],
    )?;
    // Workspaces created before NISN tracking lack the column.
    ensure_siswa_nisn(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_siswa_kelas ON siswa(kelas_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_siswa_status ON siswa(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS mapel(
            id TEXT PRIMARY KEY,
            nama_mapel TEXT NOT NULL,
            kategori TEXT NOT NULL,
            kode TEXT,
            UNIQUE(kategori, nama_mapel)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS kurikulum(
            tingkatan_id TEXT NOT NULL,
            mapel_id TEXT NOT NULL,
            urutan INTEGER NOT NULL,
            target_hafalan TEXT,
            PRIMARY KEY(tingkatan_id, mapel_id),
            FOREIGN KEY(tingkatan_id) REFERENCES tingkatan(id),
            FOREIGN KEY(mapel_id) REFERENCES mapel(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS nilai_ujian(
            id TEXT PRIMARY KEY,
            siswa_id TEXT NOT NULL,
            mapel_id TEXT NOT NULL,
            periode_id TEXT NOT NULL,
            nilai_angka REAL NOT NULL,
            predikat TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(siswa_id) REFERENCES siswa(id),
            FOREIGN KEY(mapel_id) REFERENCES mapel(id),
            FOREIGN KEY(periode_id) REFERENCES periode_ajaran(id),
            UNIQUE(siswa_id, mapel_id, periode_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_nilai_ujian_periode ON nilai_ujian(periode_id, mapel_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS nilai_hafalan(
            id TEXT PRIMARY KEY,
            siswa_id TEXT NOT NULL,
            mapel_id TEXT NOT NULL,
            periode_id TEXT NOT NULL,
            nilai_angka REAL NOT NULL,
            predikat TEXT NOT NULL,
            keterangan TEXT,
            updated_at TEXT,
            FOREIGN KEY(siswa_id) REFERENCES siswa(id),
            FOREIGN KEY(mapel_id) REFERENCES mapel(id),
            FOREIGN KEY(periode_id) REFERENCES periode_ajaran(id),
            UNIQUE(siswa_id, mapel_id, periode_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_nilai_hafalan_periode ON nilai_hafalan(periode_id, mapel_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS indikator_kehadiran(
            id TEXT PRIMARY KEY,
            nama TEXT NOT NULL UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS kehadiran(
            id TEXT PRIMARY KEY,
            siswa_id TEXT NOT NULL,
            indikator_id TEXT NOT NULL,
            periode_id TEXT NOT NULL,
            sakit INTEGER NOT NULL DEFAULT 0,
            izin INTEGER NOT NULL DEFAULT 0,
            alpha INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(siswa_id) REFERENCES siswa(id),
            FOREIGN KEY(indikator_id) REFERENCES indikator_kehadiran(id),
            FOREIGN KEY(periode_id) REFERENCES periode_ajaran(id),
            UNIQUE(siswa_id, indikator_id, periode_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_kehadiran_periode ON kehadiran(periode_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS indikator_sikap(
            id TEXT PRIMARY KEY,
            jenis TEXT NOT NULL,
            indikator TEXT NOT NULL,
            UNIQUE(jenis, indikator)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS penilaian_sikap(
            id TEXT PRIMARY KEY,
            siswa_id TEXT NOT NULL,
            indikator_id TEXT NOT NULL,
            periode_id TEXT NOT NULL,
            nilai REAL NOT NULL,
            predikat TEXT NOT NULL,
            FOREIGN KEY(siswa_id) REFERENCES siswa(id),
            FOREIGN KEY(indikator_id) REFERENCES indikator_sikap(id),
            FOREIGN KEY(periode_id) REFERENCES periode_ajaran(id),
            UNIQUE(siswa_id, indikator_id, periode_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_penilaian_sikap_periode ON penilaian_sikap(periode_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS catatan_wali_kelas(
            siswa_id TEXT NOT NULL,
            periode_id TEXT NOT NULL,
            catatan TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(siswa_id, periode_id),
            FOREIGN KEY(siswa_id) REFERENCES siswa(id),
            FOREIGN KEY(periode_id) REFERENCES periode_ajaran(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS riwayat_kelas(
            id TEXT PRIMARY KEY,
            siswa_id TEXT NOT NULL,
            kelas_asal_id TEXT,
            kelas_tujuan_id TEXT,
            tahun_ajaran_id TEXT,
            aksi TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(siswa_id) REFERENCES siswa(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_riwayat_kelas_siswa ON riwayat_kelas(siswa_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_siswa_nisn(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "siswa", "nisn")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE siswa ADD COLUMN nisn TEXT", [])?;
    Ok(())
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
