//! Sequential port allocation by bind probing.

use std::net::{Ipv4Addr, TcpListener};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("no free port in {first}..={last} ({attempts} candidates tried)")]
    Exhausted { first: u16, last: u16, attempts: u16 },
}

/// Finds the first bindable port at or after `preferred`, probing at most
/// `max_attempts` consecutive candidates and never walking past 65535.
///
/// Availability is established by actually binding a wildcard listener and
/// dropping it, the same bind the service performs right afterwards. A port
/// grabbed by another process between probe and serve surfaces as a bind
/// error there, not as a stale answer here.
pub fn allocate(preferred: u16, max_attempts: u16) -> Result<u16, PortError> {
    let mut last = preferred;
    let mut attempts = 0;
    for offset in 0..max_attempts {
        let Some(candidate) = preferred.checked_add(offset) else {
            break;
        };
        last = candidate;
        attempts += 1;
        if probe(candidate) {
            if candidate != preferred {
                debug!(preferred, candidate, "preferred port occupied, shifted");
            }
            return Ok(candidate);
        }
    }
    Err(PortError::Exhausted {
        first: preferred,
        last,
        attempts,
    })
}

fn probe(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}
