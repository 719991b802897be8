mod error;
mod handlers;
mod params;
mod router;
mod types;

pub use error::{err, ok, HandlerErr};
pub use router::handle_request;
pub use types::{AppState, Request};
