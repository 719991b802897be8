mod test_support;

use serde_json::json;
use std::io::Write;
use std::path::Path;
use test_support::{add_siswa, i64_at, open_workspace, seed_school, str_at, write_file, Sidecar};

fn siswa_count(sc: &mut Sidecar) -> i64 {
    i64_at(&sc.ok("siswa.list", json!({})), "/count")
}

fn write_bundle(path: &Path, manifest: serde_json::Value, db_bytes: &[u8]) {
    let file = std::fs::File::create(path).expect("create bundle");
    let mut zip = zip::ZipWriter::new(file);
    let opts = zip::write::FileOptions::default();
    zip.start_file("manifest.json", opts).expect("manifest entry");
    zip.write_all(manifest.to_string().as_bytes())
        .expect("write manifest");
    zip.start_file("db/erapot.sqlite3", opts).expect("db entry");
    zip.write_all(db_bytes).expect("write db");
    zip.finish().expect("finish bundle");
}

#[test]
fn export_then_import_restores_the_snapshot() {
    let (dir, mut sc) = open_workspace();
    let school = seed_school(&mut sc);
    add_siswa(&mut sc, "1001", "Ahmad", "L", &school.kelas1_id);

    let bundle = dir.path().join("backups").join("erapot.zip");
    let exported = sc.ok(
        "backup.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"], "erapot-workspace-v1");
    assert_eq!(str_at(&exported, "/sha256").len(), 64);
    assert!(i64_at(&exported, "/dbBytes") > 0);

    add_siswa(&mut sc, "1002", "Budi", "L", &school.kelas1_id);
    assert_eq!(siswa_count(&mut sc), 2);

    let imported = sc.ok(
        "backup.import",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(imported["bundleFormatDetected"], "erapot-workspace-v1");
    assert_eq!(imported["sha256"], exported["sha256"]);
    assert_eq!(siswa_count(&mut sc), 1);
    // The reopened connection is writable.
    add_siswa(&mut sc, "1003", "Citra", "P", &school.kelas1_id);
    assert_eq!(siswa_count(&mut sc), 2);
}

#[test]
fn checksum_mismatch_leaves_data_untouched() {
    let (dir, mut sc) = open_workspace();
    let school = seed_school(&mut sc);
    add_siswa(&mut sc, "1001", "Ahmad", "L", &school.kelas1_id);
    let db_bytes = std::fs::read(dir.path().join("erapot.sqlite3")).expect("read db");

    let tampered = dir.path().join("tampered.zip");
    write_bundle(
        &tampered,
        json!({ "format": "erapot-workspace-v1", "sha256": "0".repeat(64) }),
        &db_bytes,
    );
    let err = sc.fail(
        "backup.import",
        json!({ "inPath": tampered.to_string_lossy() }),
    );
    assert_eq!(err["code"], "backup_corrupt");
    assert_eq!(siswa_count(&mut sc), 1);
    assert!(!dir.path().join("erapot.sqlite3.importing").exists());

    let foreign = dir.path().join("foreign.zip");
    write_bundle(
        &foreign,
        json!({ "format": "someone-else-v9", "sha256": "" }),
        &db_bytes,
    );
    assert_eq!(
        sc.fail_code("backup.import", json!({ "inPath": foreign.to_string_lossy() })),
        "bad_params"
    );

    let junk = dir.path().join("notes.txt");
    write_file(&junk, "bukan cadangan");
    assert_eq!(
        sc.fail_code("backup.import", json!({ "inPath": junk.to_string_lossy() })),
        "bad_params"
    );
    assert_eq!(
        sc.fail_code(
            "backup.import",
            json!({ "inPath": dir.path().join("missing.zip").to_string_lossy() })
        ),
        "not_found"
    );
    assert_eq!(siswa_count(&mut sc), 1);
}

#[test]
fn bare_sqlite_file_imports_as_legacy_format() {
    let (dir, mut sc) = open_workspace();
    let school = seed_school(&mut sc);
    add_siswa(&mut sc, "1001", "Ahmad", "L", &school.kelas1_id);
    let snapshot = dir.path().join("snapshot.sqlite3");
    std::fs::copy(dir.path().join("erapot.sqlite3"), &snapshot).expect("copy db");

    add_siswa(&mut sc, "1002", "Budi", "L", &school.kelas1_id);
    let imported = sc.ok(
        "backup.import",
        json!({ "inPath": snapshot.to_string_lossy() }),
    );
    assert_eq!(imported["bundleFormatDetected"], "sqlite3");
    assert_eq!(siswa_count(&mut sc), 1);
}

#[test]
fn backup_requires_a_workspace() {
    let mut sc = Sidecar::spawn();
    assert_eq!(
        sc.fail_code("backup.export", json!({ "outPath": "/tmp/never.zip" })),
        "no_workspace"
    );
}

#[test]
fn sqlite_header_over_garbage_keeps_the_live_database() {
    let (dir, mut sc) = open_workspace();
    let school = seed_school(&mut sc);
    add_siswa(&mut sc, "1001", "Ahmad", "L", &school.kelas1_id);

    let fake = dir.path().join("rusak.sqlite3");
    let mut bytes = b"SQLite format 3\0".to_vec();
    bytes.extend(std::iter::repeat(0xAB).take(4096));
    std::fs::write(&fake, bytes).expect("write fake db");

    let err = sc.fail("backup.import", json!({ "inPath": fake.to_string_lossy() }));
    assert_eq!(err["code"], "backup_corrupt");
    assert!(!dir.path().join("erapot.sqlite3.importing").exists());
    assert_eq!(siswa_count(&mut sc), 1);
    add_siswa(&mut sc, "1002", "Budi", "L", &school.kelas1_id);
    assert_eq!(siswa_count(&mut sc), 2);
}
