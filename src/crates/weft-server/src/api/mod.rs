//! HTTP surface: routes, handlers, and response envelopes

pub mod handlers;
pub mod response;
pub mod routes;

pub use routes::{create_router, AppState};
