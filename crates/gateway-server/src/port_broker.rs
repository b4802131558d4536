//! Deterministic UDP port assignment for RTP ingress (§4.1).

use std::collections::HashMap;
use std::net::UdpSocket as StdUdpSocket;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PortBrokerError {
    #[error("no UDP ports available in the configured range")]
    NoPortsAvailable,
}

/// Hands out ports from a fixed range, one per active stream. The
/// deterministic hash-based candidate is only a starting point for probing;
/// the `owned` map is the actual source of truth (§4.1 invariant).
pub struct PortBroker {
    min: u16,
    max: u16,
    owned: Mutex<HashMap<Uuid, u16>>,
}

impl PortBroker {
    pub fn new(min: u16, max: u16) -> Self {
        assert!(max > min, "port range must be non-empty");
        Self {
            min,
            max,
            owned: Mutex::new(HashMap::new()),
        }
    }

    fn range_size(&self) -> u32 {
        (self.max - self.min) as u32 + 1
    }

    fn candidate(&self, stream_id: Uuid) -> u16 {
        let hash = stream_id.as_u128() as u64;
        self.min + (hash % self.range_size() as u64) as u16
    }

    fn is_free(&self, port: u16, owned: &HashMap<Uuid, u16>) -> bool {
        if owned.values().any(|p| *p == port) {
            return false;
        }
        // Non-blocking bind probe: if something else on the host holds the
        // port, binding fails and we treat it as unavailable.
        StdUdpSocket::bind(("0.0.0.0", port)).is_ok()
    }

    /// Reserves a port for `stream_id`, walking forward from the
    /// deterministic candidate with a capped number of probes.
    pub fn reserve(&self, stream_id: Uuid) -> Result<u16, PortBrokerError> {
        let mut owned = self.owned.lock().unwrap();

        if let Some(port) = owned.get(&stream_id) {
            return Ok(*port);
        }

        let range = self.range_size();
        let start = self.candidate(stream_id);
        let max_probes = range.min(256);

        for i in 0..max_probes {
            let port = self.min + (((start - self.min) as u32 + i) % range) as u16;
            if self.is_free(port, &owned) {
                owned.insert(stream_id, port);
                return Ok(port);
            }
        }

        Err(PortBrokerError::NoPortsAvailable)
    }

    /// Releases the port held by `stream_id`. Idempotent: releasing a
    /// stream with no reservation is a no-op.
    pub fn release(&self, stream_id: Uuid) {
        self.owned.lock().unwrap().remove(&stream_id);
    }

    pub fn port_for(&self, stream_id: Uuid) -> Option<u16> {
        self.owned.lock().unwrap().get(&stream_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_release_frees_port_for_reuse() {
        let broker = PortBroker::new(30100, 30110);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let port_a = broker.reserve(a).unwrap();
        broker.release(a);

        // idempotent release
        broker.release(a);

        let port_b = broker.reserve(b).unwrap();
        // Not guaranteed equal, but both must be within range and distinct owners.
        assert!(port_a >= 30100 && port_a <= 30110);
        assert!(port_b >= 30100 && port_b <= 30110);
    }

    #[test]
    fn reserve_is_stable_for_same_stream() {
        let broker = PortBroker::new(30200, 30210);
        let s = Uuid::new_v4();
        let p1 = broker.reserve(s).unwrap();
        let p2 = broker.reserve(s).unwrap();
        assert_eq!(p1, p2);
    }
}
