//! Connection state machine.
//!
//! # States
//! - Created: known from discovery, not yet observed
//! - Online: served traffic successfully
//! - Offline: consecutive failures crossed the unhealthy threshold
//! - Banned: pessimized after a connection-invalidating failure
//! - Destroyed: dropped from the pool by discovery
//!
//! # State Transitions
//! ```text
//! Created/Offline/Banned → Online: consecutive successes >= healthy_threshold
//! Created/Online → Offline: consecutive failures >= unhealthy_threshold
//! any live state → Banned: lease discarded
//! Banned → Offline: endpoint reported again by discovery
//! any → Destroyed: endpoint no longer reported by discovery
//! ```

use serde::Serialize;
use std::fmt;

/// Observable state of a backend connection.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnState {
    Unknown = 0,
    Created = 1,
    Online = 2,
    Offline = 3,
    Banned = 4,
    Destroyed = 5,
}

impl From<u8> for ConnState {
    fn from(val: u8) -> Self {
        match val {
            1 => ConnState::Created,
            2 => ConnState::Online,
            3 => ConnState::Offline,
            4 => ConnState::Banned,
            5 => ConnState::Destroyed,
            _ => ConnState::Unknown,
        }
    }
}

impl ConnState {
    /// Whether a connection in this state may serve a request.
    ///
    /// Offline is accepted: failing fast on a known-bad node beats having no
    /// node at all. Banned is a last resort the caller has to opt into.
    /// Anything not listed here fails closed.
    pub fn is_usable(self, accept_banned: bool) -> bool {
        match self {
            ConnState::Online | ConnState::Created | ConnState::Offline => true,
            ConnState::Banned => accept_banned,
            ConnState::Destroyed | ConnState::Unknown => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnState::Unknown => "unknown",
            ConnState::Created => "created",
            ConnState::Online => "online",
            ConnState::Offline => "offline",
            ConnState::Banned => "banned",
            ConnState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
