//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, plus optional JSON routes file)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A broken route rule is excluded at table build, not a startup failure

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::{
    ConditionalReturn, HeaderCondition, HeaderRule, IdentityHeaderConfig, ListenerConfig,
    ObservabilityConfig, PagesConfig, ProxyConfig, RouteKind, RouteRule, SoftErrorMode,
    SubpathReturn, WebsocketRoute, WsHandlerKind,
};
