//! Periodically polls SFU transport stats and transcoder liveness, feeding
//! readiness/liveness events into stream actors (§4 Health Monitor, §9
//! design note: "avoid sleeping inside the state machine's critical
//! section" — the tick lives here, not in the actor).

use crate::sfu::SfuControlClient;
use crate::stream_fsm::{Mailbox, StreamRegistry};
use dashmap::DashMap;
use gateway_protocol::StreamState;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const TICK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy)]
struct LastSeen {
    packets_received: u64,
    bytes_received: u64,
}

/// Stats are cumulative counters from the SFU, so "no media" can only be
/// judged across a window: this tick's totals compared against the last
/// tick's, not an absolute `> 0` check (§4.3 LIVE -> ERROR guard).
pub struct HealthMonitor {
    sfu: Arc<SfuControlClient>,
    registry: Arc<StreamRegistry>,
    last_seen: DashMap<Uuid, LastSeen>,
}

impl HealthMonitor {
    pub fn new(sfu: Arc<SfuControlClient>, registry: Arc<StreamRegistry>) -> Self {
        Self {
            sfu,
            registry,
            last_seen: DashMap::new(),
        }
    }

    pub fn spawn(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        });
    }

    async fn tick(&self) {
        let mut live_ids = std::collections::HashSet::new();

        for handle in self.registry.all() {
            let snapshot = handle.snapshot();
            if snapshot.state != StreamState::Live {
                continue;
            }

            let Some(producer_id) = &snapshot.sfu_producer_id else {
                continue;
            };
            live_ids.insert(handle.stream_id);

            let stats = match self.sfu.get_producer_stats(producer_id).await {
                Ok(stats) => stats,
                // Don't flag unhealthy on a transient stats-fetch error; a
                // persistent SFU outage is caught separately via the
                // control channel's disconnect broadcast.
                Err(_) => continue,
            };

            let previous = self.last_seen.insert(
                handle.stream_id,
                LastSeen {
                    packets_received: stats.packets_received,
                    bytes_received: stats.bytes_received,
                },
            );

            // No prior sample yet: give the stream one tick of grace before
            // judging it flat.
            let Some(previous) = previous else { continue };

            let media_flowing = stats.packets_received > previous.packets_received
                || stats.bytes_received > previous.bytes_received;

            if !media_flowing {
                handle.send(Mailbox::HealthTick { media_flowing: false }).await;
            }
        }

        self.last_seen.retain(|id, _| live_ids.contains(id));
    }
}
