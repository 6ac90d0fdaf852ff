//! HTTP and push-stream surface for local consumers

pub mod http;
pub mod rest;
pub mod stream;

pub use http::{create_router, AppState};
