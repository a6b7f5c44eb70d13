// ConnectionManager (spec §4.7): registry of live connections keyed by
// (ProvidedServiceInstanceId, IpcUnicastAddress), with deferred destruction
// run on the reactor thread so a connection is never dropped while the
// reactor might still be touching it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::Connection::Address::IpcUnicastAddress;
use crate::Connection::Protocol::{ConnectionProtocol, ConnectionState, Reactor};
use crate::Connection::Router::RouterConnector;
use crate::Discovery::Ids::ProvidedServiceInstanceId;

pub type ConnectionKey = (ProvidedServiceInstanceId, IpcUnicastAddress);

/// Registry of connections for one service instance binding. Holds
/// `Arc<ConnectionProtocol>` so router connectors and listeners can hold
/// weak references without outliving the manager's own bookkeeping (spec
/// §9, cyclic-ownership note).
#[derive(Default)]
pub struct ConnectionManager {
    live: Mutex<HashMap<ConnectionKey, Arc<ConnectionProtocol>>>,
    terminated: Mutex<Vec<Arc<ConnectionProtocol>>>,
    router_mappers: Mutex<HashMap<ConnectionKey, Arc<RouterConnector>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Connect` (spec §4.7): if no connection exists for `key`, register
    /// `connection` as the one to use and return its (freshly-minted)
    /// state. If one already exists, this is a no-op that just reports the
    /// existing connection's current state — callers use the returned
    /// state to decide whether they need to wait for a handshake already in
    /// flight rather than starting a second one.
    pub fn connect(&self, key: ConnectionKey, connection: Arc<ConnectionProtocol>) -> ConnectionState {
        let mut live = self.live.lock();
        if let Some(existing) = live.get(&key) {
            return existing.state();
        }
        info!(peer = %key.1, "connection registered");
        let state = connection.state();
        live.insert(key, connection);
        state
    }

    pub fn insert(&self, key: ConnectionKey, connection: Arc<ConnectionProtocol>) {
        info!(peer = %key.1, "connection registered");
        self.live.lock().insert(key, connection);
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<Arc<ConnectionProtocol>> {
        self.live.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }

    /// Register the router binding for a connection, keyed the same way as
    /// the connection itself (spec §4.7, "Router binding").
    pub fn bind_router_mapper(&self, key: ConnectionKey, connector: Arc<RouterConnector>) {
        self.router_mappers.lock().insert(key, connector);
    }

    pub fn router_mapper(&self, key: &ConnectionKey) -> Option<Arc<RouterConnector>> {
        self.router_mappers.lock().get(key).cloned()
    }

    /// `ReleaseRouterMapper` (spec §4.7): drop this manager's strong
    /// reference to the router binding for `key`. The binding itself lives
    /// on if a proxy back-end still holds a strong reference to it (spec
    /// §9, cyclic-ownership note); this only releases the manager's share.
    pub fn release_router_mapper(&self, key: &ConnectionKey) {
        self.router_mappers.lock().remove(key);
    }

    /// `Disconnect` (spec §4.7): move a connection from the live set to the
    /// reactor-deferred destruction list, running its `Terminated`
    /// transition through the reactor. The connection itself is only
    /// dropped once [`Self::drain_terminated`] releases the last `Arc` to
    /// it, which a caller does after the reactor tick that performed the
    /// transition has been observed to complete.
    pub fn disconnect<R: Reactor + ?Sized>(&self, key: &ConnectionKey, reactor: &R) {
        let removed = self.live.lock().remove(key);
        if let Some(connection) = removed {
            self.on_disconnect(connection, reactor);
        }
    }

    /// `OnDisconnect` (spec §4.7): called once a connection has (or is
    /// about to be) transitioned to `Terminated`; schedules it for deferred
    /// destruction on a later reactor tick rather than dropping it inline.
    pub fn on_disconnect<R: Reactor + ?Sized>(&self, connection: Arc<ConnectionProtocol>, reactor: &R) {
        connection.terminate(reactor);
        info!(peer = %connection.peer_address(), "connection terminated, deferred for destruction");
        self.terminated.lock().push(connection);
    }

    /// Poll every live connection's establishment timeout (spec §4.6). Run
    /// this from the reactor's own tick alongside [`Self::drain_terminated`];
    /// any connection whose handshake stalled past its timeout is moved
    /// straight to the terminated list.
    pub fn sweep_establishment_timeouts<R: Reactor + ?Sized>(&self, reactor: &R) {
        let timed_out: Vec<ConnectionKey> = self
            .live
            .lock()
            .iter()
            .filter(|(_, conn)| conn.check_establishment_timeout())
            .map(|(key, _)| key.clone())
            .collect();
        for key in timed_out {
            self.disconnect(&key, reactor);
        }
    }

    /// Drop every connection queued by [`Self::disconnect`] /
    /// [`Self::on_disconnect`]. Called from the reactor's own GC tick so
    /// destruction never races a reactor callback still holding a reference
    /// (spec §4.7, "Deferred destruction").
    pub fn drain_terminated(&self) {
        let drained = std::mem::take(&mut *self.terminated.lock());
        if !drained.is_empty() {
            info!(count = drained.len(), "draining terminated connections");
        }
    }
}
