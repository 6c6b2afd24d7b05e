//! Request/response transport collaborator

use crate::network::error::{NetworkError, NetworkResult};
use crate::network::types::{NetworkStats, PeerAddress};
use crate::protocol::{codec, Request, RequestKind, Response, SyncHandler};
use crate::storage::Id160;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;

/// Reliable request/response channel to a peer
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Send `request` to `peer` and wait for its response
    ///
    /// Fails with `NetworkError::Timeout` when the exchange takes longer than
    /// the transport's request timeout.
    async fn request(&self, peer: &PeerAddress, request: Request) -> NetworkResult<Response>;
}

/// A request as it went out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRequest {
    pub peer: Id160,
    pub kind: RequestKind,
    /// Encoded frame size
    pub bytes: usize,
}

/// In-process transport connecting handlers of one process
///
/// Requests and responses go through the real frame codec.
pub struct LocalTransport {
    handlers: DashMap<Id160, Arc<SyncHandler>>,
    unreachable: DashSet<Id160>,
    request_timeout: Duration,
    sent: Mutex<Vec<SentRequest>>,
    stats: RwLock<NetworkStats>,
}

impl LocalTransport {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            handlers: DashMap::new(),
            unreachable: DashSet::new(),
            request_timeout,
            sent: Mutex::new(Vec::new()),
            stats: RwLock::new(NetworkStats::default()),
        }
    }

    pub fn register(&self, peer: Id160, handler: Arc<SyncHandler>) {
        self.handlers.insert(peer, handler);
    }

    /// Make requests to `peer` fail as if it were down
    pub fn set_unreachable(&self, peer: Id160, unreachable: bool) {
        if unreachable {
            self.unreachable.insert(peer);
        } else {
            self.unreachable.remove(&peer);
        }
    }

    /// Requests sent so far, in order
    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats.read().clone()
    }

    fn record_failure(&self) {
        self.stats.write().failures += 1;
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl SyncTransport for LocalTransport {
    async fn request(&self, peer: &PeerAddress, request: Request) -> NetworkResult<Response> {
        let frame = codec::encode_frame(&request)?;
        self.sent.lock().push(SentRequest {
            peer: peer.id,
            kind: request.kind(),
            bytes: frame.len(),
        });

        if self.unreachable.contains(&peer.id) {
            self.record_failure();
            return Err(NetworkError::PeerUnreachable(peer.to_string()));
        }

        // Clone out of the map so no shard lock is held across the await
        let handler = match self.handlers.get(&peer.id) {
            Some(handler) => handler.clone(),
            None => {
                self.record_failure();
                return Err(NetworkError::ConnectionFailed(format!("unknown peer {}", peer)));
            }
        };

        let decoded: Request = codec::decode_frame(&frame)?;
        let response = match tokio::time::timeout(self.request_timeout, handler.handle(decoded)).await {
            Ok(response) => response,
            Err(_) => {
                self.record_failure();
                return Err(NetworkError::Timeout(self.request_timeout));
            }
        };

        let response_frame = codec::encode_frame(&response)?;
        {
            let mut stats = self.stats.write();
            stats.requests_sent += 1;
            stats.total_bytes_sent += frame.len() as u64;
            stats.total_bytes_received += response_frame.len() as u64;
        }

        Ok(codec::decode_frame(&response_frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ComputePool;
    use crate::protocol::{InfoRequest, InfoStatus};
    use crate::replication::{LocalResponsibilityTracker, StaticPeerDirectory};
    use crate::storage::{MemoryStorage, StorageKey};

    fn peer(n: u64) -> PeerAddress {
        PeerAddress::new(Id160::from_u64(n), format!("127.0.0.1:{}", 9000 + n).parse().unwrap())
    }

    fn handler_for(local: PeerAddress) -> Arc<SyncHandler> {
        let tracker = Arc::new(LocalResponsibilityTracker::new(Arc::new(
            StaticPeerDirectory::new(local),
        )));
        Arc::new(SyncHandler::new(
            Arc::new(MemoryStorage::new()),
            tracker,
            ComputePool::new(1),
            6,
        ))
    }

    fn info() -> Request {
        let key = StorageKey::new(Id160::from_u64(1), Id160::ZERO, Id160::ZERO);
        Request::Info(InfoRequest::new(key, b"value"))
    }

    #[tokio::test]
    async fn test_routes_to_registered_handler() {
        let transport = LocalTransport::default();
        transport.register(peer(2).id, handler_for(peer(2)));

        match transport.request(&peer(2), info()).await.unwrap() {
            Response::Info(info) => assert_eq!(info.status, InfoStatus::NotFound),
            other => panic!("unexpected response {:?}", other),
        }

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, RequestKind::Info);
        assert_eq!(sent[0].peer, peer(2).id);
        assert_eq!(transport.stats().requests_sent, 1);
    }

    #[tokio::test]
    async fn test_unknown_and_unreachable_peers() {
        let transport = LocalTransport::default();
        transport.register(peer(2).id, handler_for(peer(2)));

        assert!(matches!(
            transport.request(&peer(3), info()).await,
            Err(NetworkError::ConnectionFailed(_))
        ));

        transport.set_unreachable(peer(2).id, true);
        assert!(matches!(
            transport.request(&peer(2), info()).await,
            Err(NetworkError::PeerUnreachable(_))
        ));

        transport.set_unreachable(peer(2).id, false);
        assert!(transport.request(&peer(2), info()).await.is_ok());
        assert_eq!(transport.stats().failures, 2);
    }
}
