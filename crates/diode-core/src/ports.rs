use anyhow::{anyhow, Result};
use rand::seq::IteratorRandom;
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, TcpListener};

use crate::HarnessError;

pub const MAX_ALLOCATION_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortAvailability {
    /// A port nothing is listening on right now.
    Available,
    /// A port already taken, so the agent runs into a bind conflict.
    Unavailable,
}

/// Picks the port an agent under test should bind.
///
/// The available path lets the OS choose and drops the listener before
/// returning, so another process may still grab the port before the agent
/// binds it.
pub fn allocate_port(availability: PortAvailability, excluded: &BTreeSet<u16>) -> Result<u16> {
    match availability {
        PortAvailability::Unavailable => excluded
            .iter()
            .copied()
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| {
                anyhow!(HarnessError::InvalidArgument(
                    "no port is unavailable: exclusion set is empty".to_string()
                ))
            }),
        PortAvailability::Available => {
            for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
                let port = ephemeral_port()?;
                if !excluded.contains(&port) {
                    tracing::debug!(port, attempt, "allocated free port");
                    return Ok(port);
                }
                tracing::debug!(port, attempt, "os returned an excluded port, retrying");
            }
            Err(anyhow!(HarnessError::AllocationExhausted {
                attempts: MAX_ALLOCATION_ATTEMPTS,
            }))
        }
    }
}

fn ephemeral_port() -> Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_bindable(port: u16) -> bool {
        TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
    }

    #[test]
    fn available_port_is_bindable_and_not_excluded() {
        let held = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).expect("bind");
        let held_port = held.local_addr().expect("addr").port();
        let excluded = BTreeSet::from([held_port]);
        for _ in 0..5 {
            let port = allocate_port(PortAvailability::Available, &excluded).expect("port");
            assert!(!excluded.contains(&port));
            assert!(is_bindable(port), "port {} should be free", port);
        }
    }

    #[test]
    fn unavailable_port_comes_from_exclusion_set() {
        let excluded = BTreeSet::from([55000]);
        let port = allocate_port(PortAvailability::Unavailable, &excluded).expect("port");
        assert_eq!(port, 55000);

        let excluded = BTreeSet::from([41000, 41001, 41002]);
        for _ in 0..10 {
            let port = allocate_port(PortAvailability::Unavailable, &excluded).expect("port");
            assert!(excluded.contains(&port));
        }
    }

    #[test]
    fn unavailable_port_requires_exclusions() {
        let err = allocate_port(PortAvailability::Unavailable, &BTreeSet::new()).unwrap_err();
        assert!(matches!(
            HarnessError::find(&err),
            Some(HarnessError::InvalidArgument(_))
        ));
    }
}
