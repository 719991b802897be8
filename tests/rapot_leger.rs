mod test_support;

use serde_json::{json, Value};
use test_support::{add_mapel, add_siswa, f64_at, i64_at, open_workspace, seed_school, str_at, School, Sidecar};

struct Kelas1 {
    school: School,
    ahmad: String,
    budi: String,
    citra: String,
    dewi: String,
    fiqih: String,
    nahwu: String,
    juz_amma: String,
}

fn upsert(sc: &mut Sidecar, method: &str, periode_id: &str, mapel_id: &str, entries: Value) {
    sc.ok(
        method,
        json!({ "periodeId": periode_id, "mapelId": mapel_id, "entries": entries }),
    );
}

/// Four santri in 1A; Ahmad and Budi tie on average, Dewi has no scores.
fn seed_scores(sc: &mut Sidecar) -> Kelas1 {
    let school = seed_school(sc);
    let ahmad = add_siswa(sc, "1001", "Ahmad", "L", &school.kelas1_id);
    let budi = add_siswa(sc, "1002", "Budi", "L", &school.kelas1_id);
    let citra = add_siswa(sc, "1003", "Citra", "P", &school.kelas1_id);
    let dewi = add_siswa(sc, "1004", "Dewi", "P", &school.kelas1_id);
    let fiqih = add_mapel(sc, "Fiqih", "ujian");
    let nahwu = add_mapel(sc, "Nahwu", "ujian");
    let juz_amma = add_mapel(sc, "Juz Amma", "hafalan");
    let p = school.periode_id.clone();

    upsert(
        sc,
        "nilaiUjian.bulkUpsert",
        &p,
        &fiqih,
        json!([
            { "siswaId": ahmad, "nilaiAngka": 80 },
            { "siswaId": budi, "nilaiAngka": 90 },
            { "siswaId": citra, "nilaiAngka": 70 },
        ]),
    );
    upsert(
        sc,
        "nilaiUjian.bulkUpsert",
        &p,
        &nahwu,
        json!([
            { "siswaId": ahmad, "nilaiAngka": 90 },
            { "siswaId": budi, "nilaiAngka": 80 },
            { "siswaId": citra, "nilaiAngka": 75 },
        ]),
    );
    upsert(
        sc,
        "nilaiHafalan.bulkUpsert",
        &p,
        &juz_amma,
        json!([
            { "siswaId": ahmad, "nilaiAngka": 85, "keterangan": "Lancar" },
            { "siswaId": budi, "nilaiAngka": 85 },
        ]),
    );
    Kelas1 {
        school,
        ahmad,
        budi,
        citra,
        dewi,
        fiqih,
        nahwu,
        juz_amma,
    }
}

#[test]
fn leger_ranks_by_average_with_ties_and_unscored_last() {
    let (_dir, mut sc) = open_workspace();
    let k = seed_scores(&mut sc);
    let leger = sc.ok(
        "rapot.leger",
        json!({ "kelasId": k.school.kelas1_id, "periodeId": k.school.periode_id }),
    );

    let columns: Vec<&str> = leger["columns"]
        .as_array()
        .expect("columns")
        .iter()
        .filter_map(|c| c["mapelId"].as_str())
        .collect();
    assert_eq!(columns, vec![k.fiqih.as_str(), k.nahwu.as_str(), k.juz_amma.as_str()]);

    let rows = leger["rows"].as_array().expect("rows");
    let order: Vec<&str> = rows.iter().filter_map(|r| r["siswaId"].as_str()).collect();
    assert_eq!(
        order,
        vec![k.ahmad.as_str(), k.budi.as_str(), k.citra.as_str(), k.dewi.as_str()]
    );
    assert_eq!(rows[0]["rank"], 1);
    assert_eq!(rows[1]["rank"], 1);
    assert_eq!(rows[2]["rank"], 3);
    assert!(rows[3]["rank"].is_null());
    assert_eq!(f64_at(&rows[0], "/jumlah"), 255.0);
    assert_eq!(f64_at(&rows[0], "/rataRata"), 85.0);
    assert_eq!(f64_at(&rows[2], "/rataRata"), 72.5);
    assert_eq!(rows[2]["nilai"], json!([70.0, 75.0, null]));
    assert!(rows[3]["jumlah"].is_null());

    assert_eq!(f64_at(&leger, "/rataRataKolom/0"), 80.0);
    assert_eq!(f64_at(&leger, "/rataRataKolom/1"), 81.67);
    assert_eq!(f64_at(&leger, "/rataRataKolom/2"), 85.0);
}

#[test]
fn kurikulum_restricts_leger_columns() {
    let (_dir, mut sc) = open_workspace();
    let k = seed_scores(&mut sc);
    sc.ok(
        "kurikulum.set",
        json!({ "tingkatanId": k.school.tingkatan1_id, "items": [{ "mapelId": k.nahwu }] }),
    );
    let leger = sc.ok(
        "rapot.leger",
        json!({ "kelasId": k.school.kelas1_id, "periodeId": k.school.periode_id }),
    );
    assert_eq!(leger["columns"].as_array().map(Vec::len), Some(1));
    // Ahmad 90 now outranks Budi 80.
    assert_eq!(leger["rows"][0]["siswaId"], k.ahmad);
    assert_eq!(leger["rows"][1]["rank"], 2);
}

#[test]
fn leger_csv_export_follows_ranking() {
    let (dir, mut sc) = open_workspace();
    let k = seed_scores(&mut sc);
    let ind = sc.ok("indikatorKehadiran.create", json!({ "nama": "Sekolah" }));
    sc.ok(
        "kehadiran.bulkUpsert",
        json!({
            "periodeId": k.school.periode_id,
            "entries": [{
                "siswaId": k.citra,
                "indikatorId": str_at(&ind, "/indikatorId"),
                "sakit": 2, "izin": 0, "alpha": 1
            }]
        }),
    );

    let out = dir.path().join("leger-1A.csv");
    let res = sc.ok(
        "rapot.exportLegerCsv",
        json!({
            "kelasId": k.school.kelas1_id,
            "periodeId": k.school.periode_id,
            "outPath": out.to_string_lossy()
        }),
    );
    assert_eq!(i64_at(&res, "/rowCount"), 4);
    let text = std::fs::read_to_string(&out).expect("read leger csv");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            "No,NIS,Nama,Fiqih,Nahwu,Juz Amma,Jumlah,Rata-rata,Peringkat,Sakit,Izin,Alpha",
            "1,1001,Ahmad,80,90,85,255,85,1,0,0,0",
            "2,1002,Budi,90,80,85,255,85,1,0,0,0",
            "3,1003,Citra,70,75,,145,72.5,3,2,0,1",
            "4,1004,Dewi,,,,,,,0,0,0",
        ]
    );
}

#[test]
fn rapot_collects_every_section_for_one_santri() {
    let (_dir, mut sc) = open_workspace();
    let k = seed_scores(&mut sc);
    sc.ok(
        "setup.update",
        json!({ "section": "sekolah", "patch": { "namaSekolah": "PP Darul Ulum" } }),
    );
    let ibadah = sc.ok(
        "indikatorSikap.create",
        json!({ "jenis": "spiritual", "indikator": "Ibadah" }),
    );
    let doa = sc.ok(
        "indikatorSikap.create",
        json!({ "jenis": "spiritual", "indikator": "Doa" }),
    );
    sc.ok(
        "sikap.bulkUpsert",
        json!({
            "periodeId": k.school.periode_id,
            "entries": [
                { "siswaId": k.citra, "indikatorId": str_at(&ibadah, "/indikatorId"), "nilai": 88 },
                { "siswaId": k.citra, "indikatorId": str_at(&doa, "/indikatorId"), "nilai": 92 },
            ]
        }),
    );
    sc.ok(
        "catatan.set",
        json!({ "siswaId": k.citra, "periodeId": k.school.periode_id, "catatan": "Pertahankan." }),
    );

    let rapot = sc.ok(
        "rapot.get",
        json!({ "siswaId": k.citra, "periodeId": k.school.periode_id }),
    );
    assert_eq!(rapot["sekolah"]["namaSekolah"], "PP Darul Ulum");
    assert_eq!(rapot["periode"]["nama"], "Semester Ganjil");
    assert_eq!(rapot["kelas"]["namaKelas"], "1A");
    assert_eq!(rapot["kelas"]["waliKelas"], "Ust. Hasan");
    assert_eq!(rapot["nilaiUjian"][0]["namaMapel"], "Fiqih");
    assert_eq!(rapot["nilaiUjian"][0]["predikat"], "C");
    assert_eq!(rapot["nilaiUjian"][0]["deskripsi"], "Baik");
    assert_eq!(f64_at(&rapot, "/rataRataUjian"), 72.5);
    assert!(rapot["nilaiHafalan"][0]["nilaiAngka"].is_null());
    assert_eq!(f64_at(&rapot, "/sikap/spiritual/rataRata"), 90.0);
    assert_eq!(rapot["sikap"]["spiritual"]["predikat"], "A");
    assert!(rapot["sikap"]["sosial"]["rataRata"].is_null());
    assert_eq!(rapot["catatan"], "Pertahankan.");
    assert_eq!(rapot["peringkat"], json!({ "rank": 3, "of": 3 }));

    let ahmad = sc.ok(
        "rapot.get",
        json!({ "siswaId": k.ahmad, "periodeId": k.school.periode_id }),
    );
    assert_eq!(ahmad["nilaiHafalan"][0]["keterangan"], "Lancar");
    assert_eq!(ahmad["nilaiHafalan"][0]["deskripsi"], "Jayyid Jiddan");
    assert_eq!(ahmad["totalKehadiran"]["total"], 0);
    assert_eq!(ahmad["peringkat"]["rank"], 1);

    let dewi = sc.ok(
        "rapot.get",
        json!({ "siswaId": k.dewi, "periodeId": k.school.periode_id }),
    );
    assert!(dewi["peringkat"]["rank"].is_null());
    assert!(dewi["rataRataUjian"].is_null());

    sc.ok(
        "setup.update",
        json!({ "section": "rapot", "patch": { "tampilkanPeringkat": false } }),
    );
    let hidden = sc.ok(
        "rapot.get",
        json!({ "siswaId": k.budi, "periodeId": k.school.periode_id }),
    );
    assert!(hidden["peringkat"].is_null());

    assert_eq!(
        sc.fail_code(
            "rapot.get",
            json!({ "siswaId": k.budi, "periodeId": "missing" })
        ),
        "not_found"
    );
}

#[test]
fn dashboard_counts_reflect_status() {
    let (_dir, mut sc) = open_workspace();
    let k = seed_scores(&mut sc);
    sc.ok(
        "siswa.update",
        json!({ "siswaId": k.dewi, "patch": { "status": "lulus" } }),
    );
    let dash = sc.ok("dashboard.summary", json!({}));
    assert_eq!(dash["siswaAktif"], 3);
    assert_eq!(dash["siswaLakiLaki"], 2);
    assert_eq!(dash["siswaPerempuan"], 1);
    assert_eq!(dash["siswaLulus"], 1);
    assert_eq!(dash["siswaKeluar"], 0);
    assert_eq!(dash["kelas"], 2);
    assert_eq!(dash["guru"], 1);
    assert_eq!(dash["mapel"], 3);
    assert_eq!(dash["periodeAktif"]["id"], k.school.periode_id);
}
