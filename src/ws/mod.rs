//! WebSocket proxying with deferred authorization.
//!
//! # Data Flow
//! upgrade -> `relay::handle_session` (PENDING_AUTH) -> policy decision
//!   -> backend leg + bidirectional relay (ALLOWED) | close 1008 (DENIED)

pub mod relay;
pub mod session;

pub use relay::{handle_session, handle_upgrade};
pub use session::{SessionState, CLOSE_INTERNAL_ERROR, CLOSE_POLICY_VIOLATION};
