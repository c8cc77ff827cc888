//! Compact identifiers shared by the control protocol, the location codec and
//! the connection state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Host-assigned participant id, unique within one session.
///
/// Travels as the first byte of every location record, so it is a single
/// `u8`. Displayed in lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u8);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Correlates a client request with the host's response.
///
/// Allocated monotonically for the lifetime of a
/// [`ConnectionManager`](crate::ConnectionManager) and never reused, so a
/// response from a superseded connection cannot match a newer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u32);

/// Connection generation. Bumped on every `connect()` and every teardown;
/// events tagged with an older epoch are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Epoch(pub u64);

impl Epoch {
    /// The following generation.
    pub fn next(self) -> Self {
        Epoch(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
