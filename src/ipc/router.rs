use super::error::{err, ok, HandlerErr};
use super::handlers;
use super::types::{AppState, Request};
use tracing::{debug, info_span, warn};

type Family = fn(&mut AppState, &Request) -> Option<Result<serde_json::Value, HandlerErr>>;

const FAMILIES: &[Family] = &[
    handlers::core::try_handle,
    handlers::setup::try_handle,
    handlers::akademik::try_handle,
    handlers::kelas::try_handle,
    handlers::siswa::try_handle,
    handlers::mapel::try_handle,
    handlers::nilai::try_handle,
    handlers::kehadiran::try_handle,
    handlers::sikap::try_handle,
    handlers::promosi::try_handle,
    handlers::rapot::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let span = info_span!("request", id = %req.id, method = %req.method);
    let _enter = span.enter();

    for family in FAMILIES {
        if let Some(result) = family(state, &req) {
            return match result {
                Ok(v) => {
                    debug!("ok");
                    ok(&req.id, v)
                }
                Err(e) => {
                    warn!(code = e.code, message = %e.message, "request failed");
                    e.response(&req.id)
                }
            };
        }
    }

    warn!("unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
