//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup):
//!     RouteRule[]
//!     → table.rs (compile anchored patterns, exclude broken rules)
//!     → Freeze as immutable RouteTable
//!
//! Incoming request/session path
//!     → table.rs (first-match lookup, declaration order)
//!     → Return: matched Route, or defaults (deny policy, simple connector)
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Deterministic: same path always matches the same route
//! - HTTP and WebSocket dispatch consult the same table

pub mod table;

pub use table::{Route, RouteTable, DEFAULT_CONNECTOR, DEFAULT_POLICY};
