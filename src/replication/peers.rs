//! Peer directory collaborator
//!
//! Closeness is XOR distance between a peer id and a location, as in
//! Kademlia-style DHTs. The closest peer is the one responsible.

use crate::network::PeerAddress;
use crate::storage::Id160;
use parking_lot::RwLock;
use std::collections::BTreeMap;

pub trait PeerDirectory: Send + Sync {
    /// This node
    fn local(&self) -> PeerAddress;

    /// Up to `count` peers closest to `location`, closest first
    ///
    /// The local peer is a candidate like any other.
    fn closest_replicas(&self, location: &Id160, count: usize) -> Vec<PeerAddress>;

    /// Number of known peers including this node
    fn cluster_size(&self) -> usize;
}

/// Directory over a fixed, manually maintained peer set
pub struct StaticPeerDirectory {
    local: PeerAddress,
    peers: RwLock<BTreeMap<Id160, PeerAddress>>,
}

impl StaticPeerDirectory {
    pub fn new(local: PeerAddress) -> Self {
        Self {
            local,
            peers: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_peers(local: PeerAddress, peers: impl IntoIterator<Item = PeerAddress>) -> Self {
        let directory = Self::new(local);
        for peer in peers {
            directory.add_peer(peer);
        }
        directory
    }

    /// Returns false if the peer was already known or is this node
    pub fn add_peer(&self, peer: PeerAddress) -> bool {
        if peer.id == self.local.id {
            return false;
        }
        self.peers.write().insert(peer.id, peer).is_none()
    }

    pub fn remove_peer(&self, id: &Id160) -> Option<PeerAddress> {
        self.peers.write().remove(id)
    }

    /// Remote peers, in id order
    pub fn peers(&self) -> Vec<PeerAddress> {
        self.peers.read().values().cloned().collect()
    }
}

impl PeerDirectory for StaticPeerDirectory {
    fn local(&self) -> PeerAddress {
        self.local.clone()
    }

    fn closest_replicas(&self, location: &Id160, count: usize) -> Vec<PeerAddress> {
        let mut candidates: Vec<PeerAddress> = self.peers.read().values().cloned().collect();
        candidates.push(self.local.clone());

        candidates.sort_by_key(|peer| peer.id.distance(location));
        candidates.truncate(count);
        candidates
    }

    fn cluster_size(&self) -> usize {
        self.peers.read().len() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u64) -> PeerAddress {
        PeerAddress::new(Id160::from_u64(n), format!("127.0.0.1:{}", 9000 + n).parse().unwrap())
    }

    #[test]
    fn test_closest_by_xor_distance() {
        let directory = StaticPeerDirectory::with_peers(peer(0b0001), [peer(0b0100), peer(0b0111)]);

        let closest = directory.closest_replicas(&Id160::from_u64(0b0110), 3);
        let ids: Vec<Id160> = closest.iter().map(|p| p.id).collect();
        assert_eq!(
            ids,
            vec![
                Id160::from_u64(0b0111),
                Id160::from_u64(0b0100),
                Id160::from_u64(0b0001)
            ]
        );

        assert_eq!(directory.closest_replicas(&Id160::from_u64(0b0001), 1)[0], peer(0b0001));
        assert_eq!(directory.closest_replicas(&Id160::from_u64(0), 10).len(), 3);
    }

    #[test]
    fn test_membership() {
        let directory = StaticPeerDirectory::new(peer(1));
        assert_eq!(directory.cluster_size(), 1);

        assert!(directory.add_peer(peer(2)));
        assert!(!directory.add_peer(peer(2)));
        assert!(!directory.add_peer(peer(1)));
        assert_eq!(directory.cluster_size(), 2);

        assert_eq!(directory.remove_peer(&Id160::from_u64(2)), Some(peer(2)));
        assert_eq!(directory.cluster_size(), 1);
        assert!(directory.peers().is_empty());
    }
}
