//! Registry of authenticated WebSocket connections.
//!
//! Connections are indexed by owner and by `(scope_key, role)` group so
//! both broadcast paths resolve their targets without scanning every
//! socket. All maps live behind a single lock and every mutation keeps the
//! three structures consistent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use super::connection::{close_code, Connection, ConnectionId, ConnectionInfo, Outbound};
use super::metrics::WsMetrics;

/// Group index key: `(scope_key, role)`.
type GroupKey = (String, String);

/// Why a connection was forcibly removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// The connection did not answer a ping before the next sweep.
    HeartbeatTimeout,
    /// A frame could not be queued for the connection.
    SendFailed,
    /// The client sent a frame the server cannot parse.
    MalformedFrame,
}

impl EvictReason {
    /// Returns the WebSocket close code sent to the client.
    #[must_use]
    pub const fn close_code(self) -> u16 {
        match self {
            Self::HeartbeatTimeout => close_code::GOING_AWAY,
            Self::SendFailed => close_code::TRY_AGAIN_LATER,
            Self::MalformedFrame => close_code::INVALID_PAYLOAD,
        }
    }

    /// Returns the close reason text.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HeartbeatTimeout => "heartbeat timeout",
            Self::SendFailed => "send failed",
            Self::MalformedFrame => "malformed frame",
        }
    }
}

impl std::fmt::Display for EvictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, Connection>,
    by_owner: HashMap<String, HashSet<ConnectionId>>,
    by_group: HashMap<GroupKey, HashSet<ConnectionId>>,
}

impl RegistryInner {
    fn insert(&mut self, connection: Connection) {
        let id = connection.id();
        let identity = connection.identity();

        self.by_owner
            .entry(identity.user_id.clone())
            .or_default()
            .insert(id);
        self.by_group
            .entry((identity.scope_key.clone(), identity.role.clone()))
            .or_default()
            .insert(id);
        self.connections.insert(id, connection);
    }

    fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        let identity = connection.identity();

        if let Some(ids) = self.by_owner.get_mut(&identity.user_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_owner.remove(&identity.user_id);
            }
        }

        let group = (identity.scope_key.clone(), identity.role.clone());
        if let Some(ids) = self.by_group.get_mut(&group) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_group.remove(&group);
            }
        }

        Some(connection)
    }

    fn senders(
        &self,
        ids: Option<&HashSet<ConnectionId>>,
    ) -> Vec<(ConnectionId, mpsc::Sender<Outbound>)> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.connections.get(id).map(|c| (*id, c.sender())))
            .collect()
    }
}

/// Tracks every open, authenticated connection.
#[derive(Debug)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
    metrics: Arc<WsMetrics>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(Arc::new(WsMetrics::new()))
    }
}

impl ConnectionRegistry {
    /// Creates an empty registry reporting into the given metrics.
    #[must_use]
    pub fn new(metrics: Arc<WsMetrics>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            metrics,
        }
    }

    /// Returns the metrics handle.
    #[must_use]
    pub fn metrics(&self) -> Arc<WsMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Inserts a connection into the primary map and both indexes.
    pub async fn register(&self, connection: Connection) -> ConnectionId {
        let id = connection.id();
        let user_id = connection.user_id().to_string();

        self.inner.write().await.insert(connection);

        info!(connection_id = id, user_id = %user_id, "connection registered");
        id
    }

    /// Removes a connection from every index.
    ///
    /// Returns the removed connection, or `None` if it was already gone.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Connection> {
        let removed = self.inner.write().await.remove(id);
        if let Some(connection) = &removed {
            debug!(
                connection_id = id,
                user_id = %connection.user_id(),
                "connection unregistered"
            );
        }
        removed
    }

    /// Unregisters a connection and tells its writer to close the socket.
    ///
    /// Returns false if the connection was not registered.
    pub async fn evict(&self, id: ConnectionId, reason: EvictReason) -> bool {
        let Some(connection) = self.unregister(id).await else {
            return false;
        };

        info!(
            connection_id = id,
            user_id = %connection.user_id(),
            reason = %reason,
            "evicting connection"
        );
        connection.close(reason.close_code(), reason.as_str());
        self.metrics.record_eviction();
        true
    }

    /// Clears the awaiting-pong flag and refreshes activity.
    pub async fn record_pong(&self, id: ConnectionId) {
        if let Some(connection) = self.inner.write().await.connections.get_mut(&id) {
            connection.record_pong();
        }
    }

    /// Refreshes activity without touching the pong flag.
    pub async fn touch(&self, id: ConnectionId) {
        if let Some(connection) = self.inner.write().await.connections.get_mut(&id) {
            connection.touch();
        }
    }

    /// Queues a frame for one connection.
    ///
    /// Returns false if the connection is unknown or the frame could not be
    /// queued.
    pub async fn send_to(&self, id: ConnectionId, frame: Outbound) -> bool {
        self.inner
            .read()
            .await
            .connections
            .get(&id)
            .is_some_and(|c| c.try_send(frame))
    }

    /// Returns the outbound handles of a user's connections.
    pub async fn senders_for_user(
        &self,
        user_id: &str,
    ) -> Vec<(ConnectionId, mpsc::Sender<Outbound>)> {
        let inner = self.inner.read().await;
        inner.senders(inner.by_owner.get(user_id))
    }

    /// Returns the outbound handles of a group's connections.
    pub async fn senders_for_group(
        &self,
        scope_key: &str,
        role: &str,
    ) -> Vec<(ConnectionId, mpsc::Sender<Outbound>)> {
        let inner = self.inner.read().await;
        let key = (scope_key.to_string(), role.to_string());
        inner.senders(inner.by_group.get(&key))
    }

    /// Returns the ids of a user's open connections.
    pub async fn connection_ids_for_user(&self, user_id: &str) -> HashSet<ConnectionId> {
        self.inner
            .read()
            .await
            .by_owner
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the ids of the connections in a group.
    pub async fn group_members(&self, scope_key: &str, role: &str) -> HashSet<ConnectionId> {
        let key = (scope_key.to_string(), role.to_string());
        self.inner
            .read()
            .await
            .by_group
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns true if the connection is registered.
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.inner.read().await.connections.contains_key(&id)
    }

    /// Returns a view of one connection.
    pub async fn info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.inner
            .read()
            .await
            .connections
            .get(&id)
            .map(Connection::info)
    }

    /// Returns the number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Returns the number of users with at least one open connection.
    pub async fn user_count(&self) -> usize {
        self.inner.read().await.by_owner.len()
    }

    /// Runs one heartbeat round.
    ///
    /// Every connection still awaiting a pong from the previous round, and
    /// every connection whose ping cannot be queued, is returned as stale.
    /// All other connections are flagged and pinged. Returns the stale ids
    /// and the number of pings queued.
    pub async fn heartbeat_round(&self) -> (Vec<ConnectionId>, usize) {
        let mut inner = self.inner.write().await;
        let mut stale = Vec::new();
        let mut pinged = 0;

        for (id, connection) in &mut inner.connections {
            if !connection.is_alive() || !connection.try_send(Outbound::Ping) {
                stale.push(*id);
                continue;
            }
            connection.mark_awaiting_pong();
            pinged += 1;
        }

        (stale, pinged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;

    fn connection(
        user: &str,
        role: &str,
        scope: &str,
    ) -> (Connection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        (Connection::new(Identity::new(user, role, scope), tx), rx)
    }

    #[tokio::test]
    async fn test_register_indexes_by_owner_and_group() {
        let registry = ConnectionRegistry::default();
        let (a1, _rx1) = connection("alice", "guard", "v1");
        let (a2, _rx2) = connection("alice", "guard", "v1");
        let (b, _rx3) = connection("bob", "admin", "v1");

        let a1 = registry.register(a1).await;
        let a2 = registry.register(a2).await;
        let b = registry.register(b).await;

        assert_eq!(registry.connection_count().await, 3);
        assert_eq!(registry.user_count().await, 2);
        assert_eq!(
            registry.connection_ids_for_user("alice").await,
            HashSet::from([a1, a2])
        );
        assert_eq!(
            registry.group_members("v1", "guard").await,
            HashSet::from([a1, a2])
        );
        assert_eq!(registry.group_members("v1", "admin").await, HashSet::from([b]));
    }

    #[tokio::test]
    async fn test_unregister_removes_from_every_index() {
        let registry = ConnectionRegistry::default();
        let (a1, _rx1) = connection("alice", "guard", "v1");
        let (a2, _rx2) = connection("alice", "guard", "v1");

        let a1 = registry.register(a1).await;
        let a2 = registry.register(a2).await;

        assert!(registry.unregister(a1).await.is_some());

        assert!(!registry.contains(a1).await);
        assert_eq!(
            registry.connection_ids_for_user("alice").await,
            HashSet::from([a2])
        );
        assert!(!registry.group_members("v1", "guard").await.contains(&a1));

        assert!(registry.unregister(a2).await.is_some());
        assert_eq!(registry.user_count().await, 0);
        assert!(registry.group_members("v1", "guard").await.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::default();
        let (conn, _rx) = connection("alice", "guard", "v1");
        let id = registry.register(conn).await;

        assert!(registry.unregister(id).await.is_some());
        assert!(registry.unregister(id).await.is_none());
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_evict_sends_close_and_drops_sender() {
        let registry = ConnectionRegistry::default();
        let (conn, mut rx) = connection("alice", "guard", "v1");
        let id = registry.register(conn).await;

        assert!(registry.evict(id, EvictReason::MalformedFrame).await);
        assert!(!registry.evict(id, EvictReason::MalformedFrame).await);

        assert_eq!(
            rx.recv().await,
            Some(Outbound::Close {
                code: close_code::INVALID_PAYLOAD,
                reason: "malformed frame",
            })
        );
        assert_eq!(rx.recv().await, None);
        assert_eq!(registry.metrics().evictions(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_round_flags_then_reports_stale() {
        let registry = ConnectionRegistry::default();
        let (conn, mut rx) = connection("alice", "guard", "v1");
        let id = registry.register(conn).await;

        let (stale, pinged) = registry.heartbeat_round().await;
        assert!(stale.is_empty());
        assert_eq!(pinged, 1);
        assert_eq!(rx.recv().await, Some(Outbound::Ping));

        let (stale, pinged) = registry.heartbeat_round().await;
        assert_eq!(stale, vec![id]);
        assert_eq!(pinged, 0);
    }

    #[tokio::test]
    async fn test_record_pong_keeps_connection_alive() {
        let registry = ConnectionRegistry::default();
        let (conn, _rx) = connection("alice", "guard", "v1");
        let id = registry.register(conn).await;

        registry.heartbeat_round().await;
        assert_eq!(registry.info(id).await.map(|i| i.is_alive), Some(false));

        registry.record_pong(id).await;
        assert_eq!(registry.info(id).await.map(|i| i.is_alive), Some(true));

        let (stale, _) = registry.heartbeat_round().await;
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection() {
        let registry = ConnectionRegistry::default();
        assert!(!registry.send_to(42_000_000, Outbound::Ping).await);
    }

    #[test]
    fn test_evict_reason_close_codes() {
        assert_eq!(EvictReason::HeartbeatTimeout.close_code(), 1001);
        assert_eq!(EvictReason::MalformedFrame.close_code(), 1007);
        assert_eq!(EvictReason::SendFailed.to_string(), "send failed");
    }
}
