use crate::backup::{self, BundleError};
use crate::ipc::error::HandlerErr;
use crate::ipc::params::required_str;
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

fn workspace_path(state: &AppState) -> Result<PathBuf, HandlerErr> {
    state.conn()?;
    state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn bundle_err(e: anyhow::Error, path: &str) -> HandlerErr {
    let code = match e.downcast_ref::<BundleError>() {
        Some(BundleError::ChecksumMismatch { .. }) | Some(BundleError::Unreadable(_)) => {
            "backup_corrupt"
        }
        Some(BundleError::UnsupportedFormat(_)) | Some(BundleError::UnknownFile) => "bad_params",
        None => "io_failed",
    };
    HandlerErr::new(code, format!("{e:#}")).with_details(json!({ "path": path }))
}

fn handle_backup_export(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let workspace = workspace_path(state)?;
    let out_path = required_str(&req.params, "outPath")?;
    let summary = backup::export_workspace_bundle(&workspace, &PathBuf::from(&out_path))
        .map_err(|e| bundle_err(e, &out_path))?;
    info!(path = %out_path, bytes = summary.db_bytes, "backup exported");
    Ok(json!({
        "path": out_path,
        "bundleFormat": summary.bundle_format,
        "sha256": summary.sha256,
        "dbBytes": summary.db_bytes,
    }))
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let workspace = workspace_path(state)?;
    let in_path = required_str(&req.params, "inPath")?;
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::not_found("backup file not found")
            .with_details(json!({ "path": in_path })));
    }

    let staged =
        backup::stage_workspace_import(&src, &workspace).map_err(|e| bundle_err(e, &in_path))?;
    let format_detected = staged.format_detected;
    let sha256 = staged.sha256.clone();

    // The open handle must be dropped before the file is replaced.
    state.db = None;
    if let Err(e) = staged.commit(&workspace) {
        let reopen = state.open_workspace(workspace.clone());
        let mut err = bundle_err(e, &in_path);
        if let Err(re) = reopen {
            err.message = format!("{}; reopening the workspace also failed: {re:#}", err.message);
        }
        return Err(err);
    }
    state
        .open_workspace(workspace.clone())
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;
    info!(path = %in_path, format = format_detected, "backup imported");
    Ok(json!({
        "workspacePath": workspace.to_string_lossy(),
        "bundleFormatDetected": format_detected,
        "sha256": sha256,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Result<Value, HandlerErr>> {
    match req.method.as_str() {
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
