mod test_support;

use serde_json::json;
use test_support::{open_workspace, seed_school, str_at, Sidecar};

#[test]
fn health_works_before_workspace_and_others_require_one() {
    let mut sc = Sidecar::spawn();
    let health = sc.ok("health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    for method in ["siswa.list", "kelas.list", "dashboard.summary", "predikat.table"] {
        assert_eq!(sc.fail_code(method, json!({})), "no_workspace", "{}", method);
    }
}

#[test]
fn stdio_starts_despite_an_unusable_http_bind() {
    let mut sc = Sidecar::spawn_with_env(&[("ERAPOT_BIND", "not-an-address")]);
    let health = sc.ok("health", json!({}));
    assert!(health["version"].is_string());
}

#[test]
fn unknown_methods_and_bad_lines_get_error_envelopes() {
    let (_dir, mut sc) = open_workspace();
    assert_eq!(sc.fail_code("siswa.teleport", json!({})), "not_implemented");

    let bad = sc.send_raw("{not json");
    assert_eq!(bad.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        bad.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_json")
    );

    // Blank lines produce no response; the next request still lines up.
    let resp = sc.send_raw("\n{\"id\":\"after-blank\",\"method\":\"health\"}");
    assert_eq!(resp.get("id").and_then(|v| v.as_str()), Some("after-blank"));
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(true));
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let (dir, mut sc) = open_workspace();
    let school = seed_school(&mut sc);

    let siswa = sc.ok(
        "siswa.create",
        json!({ "nis": "1001", "nama": "Ahmad", "jenisKelamin": "L", "kelasId": school.kelas1_id }),
    );
    let siswa_id = str_at(&siswa, "/siswaId").to_string();
    let mapel = sc.ok(
        "mapel.create",
        json!({ "namaMapel": "Fiqih", "kategori": "ujian" }),
    );
    let mapel_id = str_at(&mapel, "/mapelId").to_string();

    sc.ok("setup.get", json!({}));
    sc.ok("tahunAjaran.list", json!({}));
    sc.ok("periode.active", json!({}));
    sc.ok("tingkatan.list", json!({}));
    sc.ok("guru.list", json!({}));
    sc.ok("kelas.list", json!({}));
    sc.ok("siswa.list", json!({}));
    sc.ok("mapel.list", json!({}));
    sc.ok("kurikulum.get", json!({ "tingkatanId": school.tingkatan1_id }));
    sc.ok("predikat.table", json!({}));
    sc.ok(
        "nilaiUjian.grid",
        json!({ "kelasId": school.kelas1_id, "periodeId": school.periode_id, "mapelId": mapel_id }),
    );
    sc.ok("indikatorKehadiran.list", json!({}));
    sc.ok(
        "kehadiran.recap",
        json!({ "kelasId": school.kelas1_id, "periodeId": school.periode_id }),
    );
    sc.ok("indikatorSikap.list", json!({}));
    sc.ok(
        "catatan.get",
        json!({ "siswaId": siswa_id, "periodeId": school.periode_id }),
    );
    sc.ok("promosi.preview", json!({ "kelasId": school.kelas1_id }));
    sc.ok("promosi.riwayat", json!({ "siswaId": siswa_id }));
    sc.ok(
        "rapot.get",
        json!({ "siswaId": siswa_id, "periodeId": school.periode_id }),
    );
    sc.ok(
        "rapot.leger",
        json!({ "kelasId": school.kelas1_id, "periodeId": school.periode_id }),
    );
    sc.ok("dashboard.summary", json!({}));
    let out = dir.path().join("smoke.zip");
    sc.ok("backup.export", json!({ "outPath": out.to_string_lossy() }));
    assert!(out.is_file());
}
