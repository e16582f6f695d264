//! WebSocket session lifecycle.
//!
//! # Responsibilities
//! - Track the deferred-auth state of one proxied session
//! - Guard transitions so a session never regresses to pending
//!
//! # Design Decisions
//! - The upgrade is always accepted; authorization resolves inside the
//!   session and a denial surfaces as close code 1008
//! - Terminal states are sticky: once denied or closed, a session never
//!   forwards another frame

/// Close code sent when policy denies the session.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Close code sent when the proxy cannot set up the backend leg.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Deferred-auth state of a proxied WebSocket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Upgrade accepted, policy decision not yet resolved. No frame is
    /// forwarded in this state.
    PendingAuth,
    /// Policy allowed the session; frames relay in both directions.
    Allowed,
    /// Policy denied the session; only the close frame may be sent.
    Denied,
    /// Either leg closed; the session is finished.
    Closed,
}

impl SessionState {
    /// Whether moving to `next` is a legal lifecycle step.
    pub fn can_advance(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (PendingAuth, Allowed) | (PendingAuth, Denied) | (PendingAuth, Closed)
                | (Allowed, Closed)
                | (Denied, Closed)
        )
    }

    /// Advance to `next`, ignoring illegal transitions.
    pub fn advance(&mut self, next: SessionState) {
        if self.can_advance(next) {
            *self = next;
        } else if *self != next {
            tracing::warn!(from = ?self, to = ?next, "Ignoring illegal session transition");
        }
    }

    pub fn forwards_frames(self) -> bool {
        self == SessionState::Allowed
    }
}
