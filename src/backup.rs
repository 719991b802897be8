use crate::db::DB_FILE;
use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/erapot.sqlite3";
pub const BUNDLE_FORMAT: &str = "erapot-workspace-v1";
const LEGACY_FORMAT: &str = "sqlite3";
const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// Failures that say something about the input file rather than the disk.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("database checksum mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("unsupported bundle format: {0}")]
    UnsupportedFormat(String),
    #[error("file is neither a backup bundle nor a SQLite database")]
    UnknownFile,
    #[error("database failed integrity check: {0}")]
    Unreadable(String),
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: &'static str,
    pub sha256: String,
    pub db_bytes: u64,
}

/// A verified database extracted next to the live one, waiting to replace it.
#[derive(Debug)]
pub struct StagedImport {
    staged: PathBuf,
    pub format_detected: &'static str,
    pub sha256: String,
}

impl StagedImport {
    /// Moves the staged database over the workspace database. Callers must
    /// close their connection first.
    pub fn commit(self, workspace_path: &Path) -> anyhow::Result<()> {
        let dst = workspace_path.join(DB_FILE);
        std::fs::rename(&self.staged, &dst).with_context(|| {
            format!("failed to move staged database to {}", dst.to_string_lossy())
        })?;
        Ok(())
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }
    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("failed to read database {}", db_path.to_string_lossy()))?;
    let sha256 = sha256_hex(&db_bytes);

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": crate::db::now_rfc3339(),
        "dbEntry": DB_ENTRY,
        "sha256": sha256,
        "dbBytes": db_bytes.len(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    zip.write_all(&db_bytes)
        .context("failed to write database entry")?;
    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT,
        sha256,
        db_bytes: db_bytes.len() as u64,
    })
}

/// Reads and verifies `in_path`, leaving the result staged inside the
/// workspace. Nothing in the live database is touched.
pub fn stage_workspace_import(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<StagedImport> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;

    let (bytes, format_detected, expected) = match file_signature(in_path)? {
        Signature::Zip => {
            let (bytes, expected) = read_bundle(in_path)?;
            (bytes, BUNDLE_FORMAT, Some(expected))
        }
        Signature::Sqlite => {
            let bytes = std::fs::read(in_path).with_context(|| {
                format!("failed to read {}", in_path.to_string_lossy())
            })?;
            (bytes, LEGACY_FORMAT, None)
        }
        Signature::Other => return Err(BundleError::UnknownFile.into()),
    };

    let actual = sha256_hex(&bytes);
    if let Some(expected) = expected {
        if !expected.eq_ignore_ascii_case(&actual) {
            return Err(BundleError::ChecksumMismatch { expected, actual }.into());
        }
    }
    if !bytes.starts_with(SQLITE_MAGIC) {
        return Err(BundleError::UnknownFile.into());
    }

    let staged = workspace_path.join(format!("{}.importing", DB_FILE));
    if staged.exists() {
        let _ = std::fs::remove_file(&staged);
    }
    let mut out = File::create(&staged).with_context(|| {
        format!(
            "failed to create staged database {}",
            staged.to_string_lossy()
        )
    })?;
    out.write_all(&bytes)
        .context("failed to write staged database")?;
    out.flush().context("failed to flush staged database")?;
    drop(out);

    if let Err(reason) = quick_check(&staged) {
        let _ = std::fs::remove_file(&staged);
        return Err(BundleError::Unreadable(reason).into());
    }

    Ok(StagedImport {
        staged,
        format_detected,
        sha256: actual,
    })
}

/// Opens the staged copy on its own connection and asks SQLite to vouch for it.
fn quick_check(path: &Path) -> Result<(), String> {
    let conn = rusqlite::Connection::open(path).map_err(|e| e.to_string())?;
    let verdict: String = conn
        .query_row("PRAGMA quick_check", [], |r| r.get(0))
        .map_err(|e| e.to_string())?;
    if verdict != "ok" {
        return Err(verdict);
    }
    Ok(())
}

fn read_bundle(in_path: &Path) -> anyhow::Result<(Vec<u8>, String)> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT {
        return Err(BundleError::UnsupportedFormat(format.to_string()).into());
    }
    let expected = manifest
        .get("sha256")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest.json missing sha256"))?
        .to_string();

    let mut bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .context("bundle missing db/erapot.sqlite3")?
        .read_to_end(&mut bytes)
        .context("failed to extract database entry")?;
    Ok((bytes, expected))
}

enum Signature {
    Zip,
    Sqlite,
    Other,
}

fn file_signature(path: &Path) -> anyhow::Result<Signature> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 16];
    let mut read = 0;
    while read < sig.len() {
        let n = f
            .read(&mut sig[read..])
            .context("failed to read file signature")?;
        if n == 0 {
            break;
        }
        read += n;
    }
    if read >= 4 && sig[..4] == ZIP_MAGIC {
        return Ok(Signature::Zip);
    }
    if read == sig.len() && &sig == SQLITE_MAGIC {
        return Ok(Signature::Sqlite);
    }
    Ok(Signature::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn unknown_files_are_rejected_before_staging() {
        let dir = tempfile::tempdir().expect("tempdir");
        let junk = dir.path().join("junk.bin");
        std::fs::write(&junk, b"definitely not a backup").expect("write junk");
        let ws = dir.path().join("ws");
        let e = stage_workspace_import(&junk, &ws).expect_err("junk must fail");
        assert!(matches!(
            e.downcast_ref::<BundleError>(),
            Some(BundleError::UnknownFile)
        ));
        assert!(!ws.join(format!("{}.importing", DB_FILE)).exists());
    }

    #[test]
    fn garbage_behind_sqlite_header_is_not_staged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fake = dir.path().join("fake.sqlite3");
        let mut bytes = SQLITE_MAGIC.to_vec();
        bytes.extend(std::iter::repeat(0xAB).take(4096));
        std::fs::write(&fake, bytes).expect("write fake");
        let ws = dir.path().join("ws");
        let e = stage_workspace_import(&fake, &ws).expect_err("garbage must fail");
        assert!(matches!(
            e.downcast_ref::<BundleError>(),
            Some(BundleError::Unreadable(_))
        ));
        assert!(!ws.join(format!("{}.importing", DB_FILE)).exists());
    }
}
