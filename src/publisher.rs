//! Hotspot publisher.
//!
//! Holds the latest hotspot list and fans change notifications out to map
//! consumers. Each publish replaces the whole list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};

use crate::models::Hotspot;

const EVENT_CAPACITY: usize = 64;

/// Sent to subscribers after every completed recomputation.
#[derive(Clone, Debug)]
pub struct HotspotUpdate {
    /// Increments by one per publish, starting at 1.
    pub generation: u64,
    pub hotspots: Arc<Vec<Hotspot>>,
    pub published_at: DateTime<Utc>,
}

pub struct HotspotPublisher {
    current: watch::Sender<Arc<Vec<Hotspot>>>,
    events: broadcast::Sender<Arc<HotspotUpdate>>,
    generation: AtomicU64,
}

impl Default for HotspotPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl HotspotPublisher {
    pub fn new() -> Self {
        let (current, _) = watch::channel(Arc::new(Vec::new()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            current,
            events,
            generation: AtomicU64::new(0),
        }
    }

    /// Latest hotspot list, descending by intensity.
    pub fn current_hotspots(&self) -> Arc<Vec<Hotspot>> {
        self.current.borrow().clone()
    }

    /// Number of completed publishes.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Receive every update. Slow receivers may observe `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<HotspotUpdate>> {
        self.events.subscribe()
    }

    /// Observe only the latest list.
    pub fn watch(&self) -> watch::Receiver<Arc<Vec<Hotspot>>> {
        self.current.subscribe()
    }

    /// Replace the current list and notify subscribers.
    pub fn publish(&self, hotspots: Vec<Hotspot>) -> u64 {
        let hotspots = Arc::new(hotspots);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.current.send_replace(Arc::clone(&hotspots));

        let update = Arc::new(HotspotUpdate {
            generation,
            hotspots: Arc::clone(&hotspots),
            published_at: Utc::now(),
        });
        let receivers = self.events.send(update).unwrap_or(0);

        tracing::debug!(
            generation,
            hotspot_count = hotspots.len(),
            receivers,
            "Hotspots published"
        );
        generation
    }
}
