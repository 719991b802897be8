#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

/// A running `erapotd` speaking the stdio protocol.
pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        Self::spawn_with_env(&[])
    }

    pub fn spawn_with_env(vars: &[(&str, &str)]) -> Self {
        let exe = env!("CARGO_BIN_EXE_erapotd");
        let mut child = Command::new(exe)
            .env_remove("ERAPOT_WORKSPACE")
            .env_remove("ERAPOT_BIND")
            .env("RUST_LOG", "warn")
            .envs(vars.iter().copied())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn erapotd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 1,
        }
    }

    pub fn send_raw(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    /// Sends one request and returns the whole envelope.
    pub fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id.to_string();
        self.next_id += 1;
        let payload = json!({ "id": id, "method": method, "params": params });
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    /// Sends one request and returns `result`, panicking on an error envelope.
    pub fn ok(&mut self, method: &str, params: Value) -> Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(Value::Null)
    }

    /// Sends one request that must fail and returns its error object.
    pub fn fail(&mut self, method: &str, params: Value) -> Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value.get("error").cloned().expect("error object")
    }

    pub fn fail_code(&mut self, method: &str, params: Value) -> String {
        self.fail(method, params)
            .get("code")
            .and_then(|v| v.as_str())
            .expect("error code")
            .to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn str_at<'a>(v: &'a Value, pointer: &str) -> &'a str {
    v.pointer(pointer)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing string at {} in {}", pointer, v))
}

pub fn f64_at(v: &Value, pointer: &str) -> f64 {
    v.pointer(pointer)
        .and_then(|x| x.as_f64())
        .unwrap_or_else(|| panic!("missing number at {} in {}", pointer, v))
}

pub fn i64_at(v: &Value, pointer: &str) -> i64 {
    v.pointer(pointer)
        .and_then(|x| x.as_i64())
        .unwrap_or_else(|| panic!("missing integer at {} in {}", pointer, v))
}

pub fn open_workspace() -> (TempDir, Sidecar) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut sc = Sidecar::spawn();
    sc.ok(
        "workspace.select",
        json!({ "path": dir.path().to_string_lossy() }),
    );
    (dir, sc)
}

/// A small school: one active tahun ajaran and periode, two tingkatan with
/// one kelas each, and a wali kelas for the first.
pub struct School {
    pub tahun_id: String,
    pub periode_id: String,
    pub tingkatan1_id: String,
    pub tingkatan2_id: String,
    pub kelas1_id: String,
    pub kelas2_id: String,
    pub guru_id: String,
}

pub fn seed_school(sc: &mut Sidecar) -> School {
    let tahun = sc.ok("tahunAjaran.create", json!({ "nama": "2025/2026" }));
    let tahun_id = str_at(&tahun, "/tahunAjaranId").to_string();
    let periode = sc.ok(
        "periode.create",
        json!({ "tahunAjaranId": tahun_id, "semester": 1 }),
    );
    let periode_id = str_at(&periode, "/periodeId").to_string();
    sc.ok("periode.setActive", json!({ "periodeId": periode_id }));

    let t1 = sc.ok("tingkatan.create", json!({ "nama": "Ula 1", "urutan": 1 }));
    let t2 = sc.ok("tingkatan.create", json!({ "nama": "Ula 2", "urutan": 2 }));
    let tingkatan1_id = str_at(&t1, "/tingkatanId").to_string();
    let tingkatan2_id = str_at(&t2, "/tingkatanId").to_string();

    let guru = sc.ok(
        "guru.create",
        json!({ "nama": "Ust. Hasan", "nip": "198001012005011001" }),
    );
    let guru_id = str_at(&guru, "/guruId").to_string();

    let k1 = sc.ok(
        "kelas.create",
        json!({ "namaKelas": "1A", "tingkatanId": tingkatan1_id, "waliKelasId": guru_id }),
    );
    let k2 = sc.ok(
        "kelas.create",
        json!({ "namaKelas": "2A", "tingkatanId": tingkatan2_id }),
    );
    School {
        tahun_id,
        periode_id,
        tingkatan1_id,
        tingkatan2_id,
        kelas1_id: str_at(&k1, "/kelasId").to_string(),
        kelas2_id: str_at(&k2, "/kelasId").to_string(),
        guru_id,
    }
}

pub fn add_siswa(sc: &mut Sidecar, nis: &str, nama: &str, jk: &str, kelas_id: &str) -> String {
    let r = sc.ok(
        "siswa.create",
        json!({ "nis": nis, "nama": nama, "jenisKelamin": jk, "kelasId": kelas_id }),
    );
    str_at(&r, "/siswaId").to_string()
}

pub fn add_mapel(sc: &mut Sidecar, nama: &str, kategori: &str) -> String {
    let r = sc.ok(
        "mapel.create",
        json!({ "namaMapel": nama, "kategori": kategori }),
    );
    str_at(&r, "/mapelId").to_string()
}

pub fn write_file(path: &Path, contents: &str) {
    std::fs::write(path, contents).expect("write fixture file");
}
