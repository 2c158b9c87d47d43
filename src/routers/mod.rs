//! HTTP surface (`spec.md` §2 "HTTP API").

pub mod http;

pub use http::{build_router, AppState};
