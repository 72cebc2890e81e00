//! Health sweep
//!
//! Periodically walks the registry, closes and removes routers that report
//! themselves dead, and tells the signaling layer which sessions went away
//! through a bounded cleanup queue. The queue never blocks the sweep: when
//! it is full the event is dropped.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use relay_protocol::{PeerId, SessionId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::plugins::JitterStats;
use crate::registry::RouterRegistry;
use crate::router::SubscriberHandle;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3);

/// Evicted sessions waiting for the signaling layer
pub const CLEANUP_QUEUE_CAPACITY: usize = 100;

/// Subscriber lists at least this long are summarized as a count
const MAX_LISTED_SUBSCRIBERS: usize = 6;

pub type CleanupSender = mpsc::Sender<SessionId>;
pub type CleanupReceiver = mpsc::Receiver<SessionId>;

pub fn cleanup_channel() -> (CleanupSender, CleanupReceiver) {
    mpsc::channel(CLEANUP_QUEUE_CAPACITY)
}

/// Outcome of one sweep tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub inspected: usize,
    pub evicted: Vec<SessionId>,
    /// Evictions whose cleanup event could not be queued
    pub dropped_events: usize,
}

pub struct HealthSweep {
    registry: Arc<RouterRegistry>,
    cleanup: CleanupSender,
    interval: Duration,
}

impl HealthSweep {
    pub fn new(registry: Arc<RouterRegistry>, cleanup: CleanupSender) -> Self {
        Self {
            registry,
            cleanup,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the sweep until the registry closes
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if self.registry.is_closed() {
                    tracing::debug!("Registry closed, stopping health sweep");
                    return;
                }
                self.tick().await;
            }
        })
    }

    /// One pass over the registry, atomic with respect to registry mutations
    pub async fn tick(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let mut routers = self.registry.lock_exclusive().await;
        if routers.is_empty() {
            return report;
        }

        let mut info = String::from("\n----------------rtc-----------------\n");
        let ids: Vec<SessionId> = routers.keys().cloned().collect();

        for id in ids {
            let Some(router) = routers.get(&id).cloned() else {
                continue;
            };
            report.inspected += 1;

            if !router.alive().await {
                router.close().await;
                routers.remove(&id);
                tracing::info!("Health sweep evicted router for session {}", id);

                match self.cleanup.try_send(id.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        report.dropped_events += 1;
                        tracing::warn!("Cleanup queue full, dropping eviction event for {}", id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        report.dropped_events += 1;
                        tracing::debug!("No cleanup consumer, eviction event for {} lost", id);
                    }
                }

                let _ = writeln!(info, "evicted: {}\n", id);
                report.evicted.push(id);
                continue;
            }

            let publisher = router.publisher().await.unwrap_or_else(|| PeerId::from(&id));
            info.push_str(&describe_router(
                &publisher,
                &router.subs().await,
                &router.stream_stats().await,
            ));
        }
        drop(routers);

        tracing::info!("{}", info);
        report
    }
}

/// Human-readable summary of one router for the sweep log
pub fn describe_router(
    publisher: &PeerId,
    subs: &HashMap<PeerId, SubscriberHandle>,
    streams: &[(u32, JitterStats)],
) -> String {
    let mut out = format!("pub: {}\n", publisher);

    if subs.len() < MAX_LISTED_SUBSCRIBERS {
        let mut ids: Vec<&PeerId> = subs.keys().collect();
        ids.sort();
        for id in ids {
            let _ = writeln!(out, "sub: {}\n", id);
        }
    } else {
        let _ = writeln!(out, "subs: {}\n", subs.len());
    }

    for (ssrc, stats) in streams {
        let _ = writeln!(
            out,
            "ssrc: {} received: {} lost: {} recovered: {} pending: {}\n",
            ssrc, stats.received, stats.lost, stats.recovered, stats.pending
        );
    }

    out
}
