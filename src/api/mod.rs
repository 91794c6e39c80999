//! HTTP API surface.

mod rest;

pub use rest::{create_router, AppState};
