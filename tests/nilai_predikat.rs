mod test_support;

use serde_json::{json, Value};
use test_support::{add_mapel, add_siswa, f64_at, i64_at, open_workspace, seed_school, write_file};

fn grid_row<'a>(grid: &'a Value, siswa_id: &str) -> &'a Value {
    grid["rows"]
        .as_array()
        .and_then(|rows| rows.iter().find(|r| r["siswaId"] == siswa_id))
        .unwrap_or_else(|| panic!("no row for {} in {}", siswa_id, grid))
}

#[test]
fn ujian_predikat_follows_inclusive_lower_bounds() {
    let (_dir, mut sc) = open_workspace();
    let school = seed_school(&mut sc);
    let mapel = add_mapel(&mut sc, "Fiqih", "ujian");

    let cases = [
        (100.0, "A"),
        (90.0, "A"),
        (89.99, "B"),
        (80.0, "B"),
        (79.5, "C"),
        (70.0, "C"),
        (60.0, "D"),
        (59.99, "E"),
        (0.0, "E"),
    ];
    let mut entries = Vec::new();
    let mut ids = Vec::new();
    for (i, (nilai, _)) in cases.iter().enumerate() {
        let id = add_siswa(
            &mut sc,
            &format!("10{:02}", i),
            &format!("Santri {:02}", i),
            "L",
            &school.kelas1_id,
        );
        entries.push(json!({ "siswaId": id, "nilaiAngka": nilai }));
        ids.push(id);
    }
    let res = sc.ok(
        "nilaiUjian.bulkUpsert",
        json!({ "periodeId": school.periode_id, "mapelId": mapel, "entries": entries }),
    );
    assert_eq!(i64_at(&res, "/upserted"), cases.len() as i64);

    let grid = sc.ok(
        "nilaiUjian.grid",
        json!({ "kelasId": school.kelas1_id, "periodeId": school.periode_id, "mapelId": mapel }),
    );
    for (id, (nilai, predikat)) in ids.iter().zip(cases.iter()) {
        let row = grid_row(&grid, id);
        assert_eq!(row["predikat"], *predikat, "nilai {}", nilai);
        assert_eq!(row["nilaiAngka"].as_f64(), Some(*nilai));
        assert!(row.get("keterangan").is_none());
    }
    assert_eq!(i64_at(&grid, "/stats/terisi"), cases.len() as i64);
    assert_eq!(f64_at(&grid, "/stats/min"), 0.0);
    assert_eq!(f64_at(&grid, "/stats/max"), 100.0);
}

#[test]
fn hafalan_uses_its_own_scale_and_keeps_keterangan() {
    let (_dir, mut sc) = open_workspace();
    let school = seed_school(&mut sc);
    let mapel = add_mapel(&mut sc, "Juz Amma", "hafalan");
    sc.ok(
        "kurikulum.set",
        json!({
            "tingkatanId": school.tingkatan1_id,
            "items": [{ "mapelId": mapel, "targetHafalan": "An-Naba s/d An-Nas" }]
        }),
    );
    let a = add_siswa(&mut sc, "1001", "Ahmad", "L", &school.kelas1_id);
    let b = add_siswa(&mut sc, "1002", "Budi", "L", &school.kelas1_id);
    let c = add_siswa(&mut sc, "1003", "Citra", "P", &school.kelas1_id);

    sc.ok(
        "nilaiHafalan.bulkUpsert",
        json!({
            "periodeId": school.periode_id,
            "mapelId": mapel,
            "entries": [
                { "siswaId": a, "nilaiAngka": 92, "keterangan": "Lancar" },
                { "siswaId": b, "nilaiAngka": 65 },
            ]
        }),
    );
    let grid = sc.ok(
        "nilaiHafalan.grid",
        json!({ "kelasId": school.kelas1_id, "periodeId": school.periode_id, "mapelId": mapel }),
    );
    assert_eq!(grid["targetHafalan"], "An-Naba s/d An-Nas");
    assert_eq!(grid_row(&grid, &a)["predikat"], "A");
    assert_eq!(grid_row(&grid, &a)["keterangan"], "Lancar");
    // Hafalan has no E; everything below 70 is D.
    assert_eq!(grid_row(&grid, &b)["predikat"], "D");
    assert!(grid_row(&grid, &c)["nilaiAngka"].is_null());
    assert!(grid_row(&grid, &c)["predikat"].is_null());
    assert_eq!(i64_at(&grid, "/stats/terisi"), 2);
    assert_eq!(f64_at(&grid, "/stats/rataRata"), 78.5);

    // Null removes the score.
    let res = sc.ok(
        "nilaiHafalan.bulkUpsert",
        json!({
            "periodeId": school.periode_id,
            "mapelId": mapel,
            "entries": [{ "siswaId": b, "nilaiAngka": null }]
        }),
    );
    assert_eq!(i64_at(&res, "/deleted"), 1);
    let grid = sc.ok(
        "nilaiHafalan.grid",
        json!({ "kelasId": school.kelas1_id, "periodeId": school.periode_id, "mapelId": mapel }),
    );
    assert!(grid_row(&grid, &b)["nilaiAngka"].is_null());
    assert_eq!(i64_at(&grid, "/stats/terisi"), 1);
}

#[test]
fn invalid_entries_abort_the_whole_batch() {
    let (_dir, mut sc) = open_workspace();
    let school = seed_school(&mut sc);
    let ujian = add_mapel(&mut sc, "Tauhid", "ujian");
    let hafalan = add_mapel(&mut sc, "Hadits Arbain", "hafalan");
    let a = add_siswa(&mut sc, "1001", "Ahmad", "L", &school.kelas1_id);
    let b = add_siswa(&mut sc, "1002", "Budi", "L", &school.kelas1_id);

    let err = sc.fail(
        "nilaiUjian.bulkUpsert",
        json!({
            "periodeId": school.periode_id,
            "mapelId": ujian,
            "entries": [
                { "siswaId": a, "nilaiAngka": 88 },
                { "siswaId": b, "nilaiAngka": 100.5 },
            ]
        }),
    );
    assert_eq!(err["code"], "bad_params");
    assert_eq!(err["details"]["index"], 1);

    let err = sc.fail(
        "nilaiUjian.bulkUpsert",
        json!({
            "periodeId": school.periode_id,
            "mapelId": ujian,
            "entries": [{ "siswaId": "ghost", "nilaiAngka": 70 }]
        }),
    );
    assert_eq!(err["code"], "not_found");
    assert_eq!(err["details"]["index"], 0);

    let grid = sc.ok(
        "nilaiUjian.grid",
        json!({ "kelasId": school.kelas1_id, "periodeId": school.periode_id, "mapelId": ujian }),
    );
    assert_eq!(i64_at(&grid, "/stats/terisi"), 0);

    // A hafalan mapel cannot be written through the ujian methods.
    assert_eq!(
        sc.fail_code(
            "nilaiUjian.bulkUpsert",
            json!({ "periodeId": school.periode_id, "mapelId": hafalan, "entries": [] })
        ),
        "bad_params"
    );
    assert_eq!(
        sc.fail_code(
            "nilaiHafalan.grid",
            json!({ "kelasId": school.kelas1_id, "periodeId": school.periode_id, "mapelId": ujian })
        ),
        "bad_params"
    );

    let too_many: Vec<Value> = (0..2001)
        .map(|_| json!({ "siswaId": a, "nilaiAngka": 80 }))
        .collect();
    let err = sc.fail(
        "nilaiUjian.bulkUpsert",
        json!({ "periodeId": school.periode_id, "mapelId": ujian, "entries": too_many }),
    );
    assert_eq!(err["code"], "bad_params");
    assert_eq!(err["details"]["count"], 2001);
}

#[test]
fn mapel_kategori_is_fixed_once_scored() {
    let (_dir, mut sc) = open_workspace();
    let school = seed_school(&mut sc);
    let mapel = add_mapel(&mut sc, "Akhlaq", "ujian");
    let a = add_siswa(&mut sc, "1001", "Ahmad", "L", &school.kelas1_id);
    sc.ok(
        "mapel.update",
        json!({ "mapelId": mapel, "patch": { "kode": "AKH" } }),
    );
    sc.ok(
        "nilaiUjian.bulkUpsert",
        json!({
            "periodeId": school.periode_id,
            "mapelId": mapel,
            "entries": [{ "siswaId": a, "nilaiAngka": 75 }]
        }),
    );
    assert_eq!(
        sc.fail_code(
            "mapel.update",
            json!({ "mapelId": mapel, "patch": { "kategori": "hafalan" } })
        ),
        "conflict"
    );
    assert_eq!(
        sc.fail_code(
            "mapel.create",
            json!({ "namaMapel": "Akhlaq", "kategori": "ujian" })
        ),
        "conflict"
    );
    assert_eq!(
        sc.fail_code(
            "mapel.create",
            json!({ "namaMapel": "Khat", "kategori": "praktik" })
        ),
        "bad_params"
    );
}

#[test]
fn kurikulum_set_replaces_items_in_order() {
    let (_dir, mut sc) = open_workspace();
    let school = seed_school(&mut sc);
    let a = add_mapel(&mut sc, "Nahwu", "ujian");
    let b = add_mapel(&mut sc, "Shorof", "ujian");

    let res = sc.ok(
        "kurikulum.set",
        json!({ "tingkatanId": school.tingkatan1_id, "items": [{ "mapelId": b }, { "mapelId": a }] }),
    );
    assert_eq!(res["count"], 2);
    let got = sc.ok("kurikulum.get", json!({ "tingkatanId": school.tingkatan1_id }));
    assert_eq!(got["items"][0]["mapelId"], b);
    assert_eq!(got["items"][0]["urutan"], 1);
    assert_eq!(got["items"][1]["mapelId"], a);

    let err = sc.fail(
        "kurikulum.set",
        json!({ "tingkatanId": school.tingkatan1_id, "items": [{ "mapelId": a }, { "mapelId": a }] }),
    );
    assert_eq!(err["code"], "bad_params");
    assert_eq!(err["details"]["index"], 1);
    let got = sc.ok("kurikulum.get", json!({ "tingkatanId": school.tingkatan1_id }));
    assert_eq!(got["items"].as_array().map(Vec::len), Some(2));
}

#[test]
fn nilai_import_matches_rows_by_nis() {
    let (dir, mut sc) = open_workspace();
    let school = seed_school(&mut sc);
    let mapel = add_mapel(&mut sc, "Tajwid", "hafalan");
    let a = add_siswa(&mut sc, "1001", "Ahmad", "L", &school.kelas1_id);
    let b = add_siswa(&mut sc, "1002", "Budi", "L", &school.kelas1_id);

    let csv = dir.path().join("nilai.csv");
    write_file(
        &csv,
        "NIS,Nama,Nilai,Keterangan\n\
         1001,Ahmad,\"85,5\",Tartil\n\
         1002,Budi,101,\n\
         9999,Hantu,80,\n\
         1001,Ahmad,90,\n",
    );
    let res = sc.ok(
        "nilai.import",
        json!({ "path": csv.to_string_lossy(), "periodeId": school.periode_id, "mapelId": mapel }),
    );
    assert_eq!(i64_at(&res, "/upserted"), 1);
    assert_eq!(i64_at(&res, "/skipped"), 3);
    let errors = res["errors"].as_array().expect("errors");
    assert_eq!(errors[1]["message"], "NIS tidak ditemukan: 9999");
    assert_eq!(errors[2]["message"], "NIS ganda dalam file: 1001");

    let grid = sc.ok(
        "nilaiHafalan.grid",
        json!({ "kelasId": school.kelas1_id, "periodeId": school.periode_id, "mapelId": mapel }),
    );
    assert_eq!(grid_row(&grid, &a)["nilaiAngka"].as_f64(), Some(85.5));
    assert_eq!(grid_row(&grid, &a)["predikat"], "B");
    assert_eq!(grid_row(&grid, &a)["keterangan"], "Tartil");
    assert!(grid_row(&grid, &b)["nilaiAngka"].is_null());
}

#[test]
fn predikat_table_lists_all_scales() {
    let (_dir, mut sc) = open_workspace();
    let table = sc.ok("predikat.table", json!({}));
    let ujian = table["ujian"].as_array().expect("ujian");
    assert_eq!(ujian.len(), 5);
    assert_eq!(ujian[0]["predikat"], "A");
    assert_eq!(ujian[0]["min"].as_f64(), Some(90.0));
    assert_eq!(table["hafalan"][0]["deskripsi"], "Mumtaz");
    assert_eq!(table["sikap"].as_array().map(Vec::len), Some(4));
}

#[test]
fn unknown_stored_kategori_surfaces_as_query_error() {
    let (dir, mut sc) = open_workspace();
    let fiqih = add_mapel(&mut sc, "Fiqih", "ujian");
    {
        let conn = rusqlite::Connection::open(dir.path().join("erapot.sqlite3"))
            .expect("open workspace db");
        conn.execute("UPDATE mapel SET kategori = 'praktik' WHERE id = ?", [&fiqih])
            .expect("corrupt kategori");
    }
    let err = sc.fail("mapel.list", json!({}));
    assert_eq!(err["code"], "db_query_failed");
    assert!(err["message"].as_str().unwrap_or_default().contains("praktik"));
}
