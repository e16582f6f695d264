//! HTTP engine: server, forwarding, header rules, rewrites, error pages.
//!
//! # Data Flow
//! listener -> `server::entry_handler` -> route dispatch
//!   -> `headers` (request rewrite) -> `forward` (upstream call)
//!   -> `rewrite` (response transform) | `errors` (fixed pages)

pub mod errors;
pub mod forward;
pub mod headers;
pub mod rewrite;
pub mod server;

pub use server::{AppState, HttpServer};
