//! Responsibility tracking
//!
//! Decides which locations this node is responsible for and tells the
//! executor when that changes.

use crate::network::PeerAddress;
use crate::replication::peers::PeerDirectory;
use crate::replication::types::ResponsibilityEvent;
use crate::storage::Id160;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 1024;

pub trait ResponsibilityTracker: Send + Sync {
    /// Values under `location` were written locally
    fn notify_data_changed(&self, location: &Id160);

    fn responsible_locations(&self) -> Vec<Id160>;

    fn subscribe(&self) -> broadcast::Receiver<ResponsibilityEvent>;
}

/// Tracker that takes the closest known peer as the owner of a location
pub struct LocalResponsibilityTracker {
    peers: Arc<dyn PeerDirectory>,
    responsible: RwLock<BTreeSet<Id160>>,
    events: broadcast::Sender<ResponsibilityEvent>,
}

impl LocalResponsibilityTracker {
    pub fn new(peers: Arc<dyn PeerDirectory>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            peers,
            responsible: RwLock::new(BTreeSet::new()),
            events,
        }
    }

    pub fn is_responsible(&self, location: &Id160) -> bool {
        self.responsible.read().contains(location)
    }

    /// Re-check ownership after the peer set changed
    ///
    /// Lost locations are reported as delayed so the pushes they trigger
    /// are spread out. Returns the number of changes.
    pub fn reevaluate(&self, locations: &[Id160]) -> usize {
        locations
            .iter()
            .filter(|location| self.evaluate(location, true))
            .count()
    }

    fn evaluate(&self, location: &Id160, delayed: bool) -> bool {
        let Some(owner) = self.owner_of(location) else {
            return false;
        };

        let event = if owner.id == self.peers.local().id {
            if !self.responsible.write().insert(*location) {
                return false;
            }
            ResponsibilityEvent::Gained {
                location: *location,
            }
        } else {
            if !self.responsible.write().remove(location) {
                return false;
            }
            ResponsibilityEvent::Lost {
                location: *location,
                new_owner: owner,
                delayed,
            }
        };

        tracing::debug!("Responsibility change: {:?}", event);
        crate::metrics::set_responsible_locations(self.responsible.read().len());
        // No subscribers is fine
        let _ = self.events.send(event);
        true
    }

    fn owner_of(&self, location: &Id160) -> Option<PeerAddress> {
        self.peers.closest_replicas(location, 1).into_iter().next()
    }
}

impl ResponsibilityTracker for LocalResponsibilityTracker {
    fn notify_data_changed(&self, location: &Id160) {
        self.evaluate(location, false);
    }

    fn responsible_locations(&self) -> Vec<Id160> {
        self.responsible.read().iter().copied().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<ResponsibilityEvent> {
        self.events.subscribe()
    }
}
