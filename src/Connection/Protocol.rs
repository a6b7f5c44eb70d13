// ConnectionProtocol (spec §4.6): the per-connection state machine and the
// handshake that carries memory exchange handles and queue configs between
// peers before either side touches shared memory.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, instrument, warn};

use crate::error::{ConnectionError, TransportError};
use crate::Connection::Address::{IntegrityLevel, IpcUnicastAddress};
use crate::Core::Layout::QueueMemoryConfig;
use crate::Core::Managers::{ClientMemoryManager, ServerMemoryManager};
use crate::Core::Queue::{SpscConsumerEnd, SpscProducerEnd};
use crate::Core::SharedMemory::{MemoryExchangeHandle, MemoryProvider, OwnedMemory};

/// How long a reactor-synchronized state transition may take before this
/// process concludes the reactor is unreachable and aborts (spec §4.6, §7).
const REACTOR_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time budget for a connection to reach `Active` after entering
/// `Connecting`, before the reactor gives up and moves it to `Disconnecting`
/// (spec §4.6, "Establishment timeout").
const DEFAULT_ESTABLISHMENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    HandshakeAwait,
    Active,
    Disconnecting,
    Terminated,
}

/// Posts a closure onto the single reactor thread that owns all connection
/// state transitions. A production embedder wires this to its real event
/// loop; `InlineReactor` below is a synchronous test double.
pub trait Reactor: Send + Sync {
    fn post<'a>(&self, task: Box<dyn FnOnce() + Send + 'a>);
}

/// Runs posted tasks synchronously on the calling thread. Adequate for
/// single-threaded unit tests; does not exercise the cross-thread
/// marshaling a production reactor performs.
#[derive(Debug, Default)]
pub struct InlineReactor;

impl Reactor for InlineReactor {
    fn post<'a>(&self, task: Box<dyn FnOnce() + Send + 'a>) {
        task();
    }
}

/// Hands `work` to the reactor and blocks the calling thread until it runs,
/// or aborts the process after [`REACTOR_SYNC_TIMEOUT`]. Returning instead
/// of aborting would let the reactor later run `work` against a stack frame
/// this thread has since destroyed (spec §4.6, §7 fatal-error list).
fn sync_on_reactor<R: Reactor + ?Sized>(reactor: &R, work: impl FnOnce() + Send) {
    let pair = (Mutex::new(false), Condvar::new());

    reactor.post(Box::new(|| {
        work();
        let (done, cvar) = &pair;
        *done.lock() = true;
        cvar.notify_one();
    }));

    let (done, cvar) = &pair;
    let mut guard = done.lock();
    while !*guard {
        let timed_out = cvar.wait_for(&mut guard, REACTOR_SYNC_TIMEOUT).timed_out();
        if timed_out && !*guard {
            std::process::abort();
        }
    }
}

/// What a connecting client sends the server: its reported integrity, and
/// the handle/config of its own "free" queue for the server to map and
/// validate before touching it.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    pub client_integrity: IntegrityLevel,
    pub client_queue_config: QueueMemoryConfig,
    pub client_queue_handle: MemoryExchangeHandle,
}

/// What the server sends back once it accepts a connection: the handles
/// needed to map its slot/queue memory, the index this client was assigned
/// within the server's queue memory, and that instance's config.
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub server_integrity: IntegrityLevel,
    pub slot_memory_handle: MemoryExchangeHandle,
    pub queue_memory_handle: MemoryExchangeHandle,
    pub client_index: u32,
    pub server_queue_config: QueueMemoryConfig,
}

/// The reliable byte transport the handshake rides on. Modeled as a trait
/// since establishing and multiplexing that transport is a host-process
/// concern this crate does not own (spec §1, out-of-scope: cross-host
/// networking); only the handshake's use of it is in scope.
pub trait Transport: Send + Sync {
    fn send_request(&self, request: &HandshakeRequest) -> Result<(), TransportError>;
    fn recv_request(&self) -> Result<HandshakeRequest, TransportError>;
    fn send_response(&self, response: &HandshakeResponse) -> Result<(), TransportError>;
    fn recv_response(&self) -> Result<HandshakeResponse, TransportError>;
}

/// The SPSC endpoints and (for the server side) the mapped peer memory they
/// read from, produced by a completed handshake and owned by the connection
/// for as long as it stays `Active` (spec §3, "pre-allocated per-client
/// writable/readable queue endpoints").
pub struct ConnectionEndpoints {
    pub producer: SpscProducerEnd,
    pub consumer: SpscConsumerEnd,
    /// The peer's queue memory mapped during the handshake. `None` on the
    /// client side, which maps its remote queue memory into its
    /// `ClientMemoryManager` instead and keeps it alive there.
    pub mapped_peer_queue_memory: Option<OwnedMemory>,
}

/// Drives one connection's state machine from `Idle` through `Active` and
/// back down to `Terminated`. Every transition that must be observed
/// consistently with the reactor's own view of the connection runs through
/// [`sync_on_reactor`].
pub struct ConnectionProtocol {
    state: Mutex<ConnectionState>,
    local_address: IpcUnicastAddress,
    peer_address: IpcUnicastAddress,
    local_integrity: IntegrityLevel,
    required_integrity: IntegrityLevel,
    establishment_timeout: Duration,
    connecting_since: Mutex<Option<Instant>>,
    endpoints: Mutex<Option<ConnectionEndpoints>>,
}

impl ConnectionProtocol {
    /// `local_integrity` is the level this side reports to its peer during
    /// the handshake; `required_integrity` is the level this side demands
    /// of whatever the peer reports back (spec §4.6, "Integrity
    /// negotiation" — the two are independent per peer).
    pub fn new(
        local_address: IpcUnicastAddress,
        peer_address: IpcUnicastAddress,
        local_integrity: IntegrityLevel,
        required_integrity: IntegrityLevel,
    ) -> Self {
        Self::with_establishment_timeout(
            local_address,
            peer_address,
            local_integrity,
            required_integrity,
            DEFAULT_ESTABLISHMENT_TIMEOUT,
        )
    }

    /// As [`Self::new`], but with a caller-chosen establishment timeout
    /// instead of the spec's 10-second default. Exists so tests can exercise
    /// the timeout path without an actual 10-second wait.
    pub fn with_establishment_timeout(
        local_address: IpcUnicastAddress,
        peer_address: IpcUnicastAddress,
        local_integrity: IntegrityLevel,
        required_integrity: IntegrityLevel,
        establishment_timeout: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(ConnectionState::Idle),
            local_address,
            peer_address,
            local_integrity,
            required_integrity,
            establishment_timeout,
            connecting_since: Mutex::new(None),
            endpoints: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn local_address(&self) -> IpcUnicastAddress {
        self.local_address
    }

    pub fn peer_address(&self) -> IpcUnicastAddress {
        self.peer_address
    }

    /// The queue endpoints this connection built during its handshake, if
    /// it has completed one. Locked for the lifetime of the returned guard.
    pub fn endpoints(&self) -> MutexGuard<'_, Option<ConnectionEndpoints>> {
        self.endpoints.lock()
    }

    #[instrument(skip(self), fields(local = %self.local_address, peer = %self.peer_address))]
    pub fn begin_connecting(&self) {
        debug!("connection attempt starting");
        *self.state.lock() = ConnectionState::Connecting;
        *self.connecting_since.lock() = Some(Instant::now());
    }

    /// Polled from the reactor tick while a connection is establishing. If
    /// more than the establishment timeout has elapsed since
    /// [`Self::begin_connecting`] without reaching `Active`, transitions to
    /// `Disconnecting` and returns `true` (spec §4.6, "Establishment
    /// timeout"). A no-op once the connection has left `Connecting` /
    /// `HandshakeAwait`, or reached `Active`.
    #[instrument(skip(self), fields(local = %self.local_address, peer = %self.peer_address))]
    pub fn check_establishment_timeout(&self) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, ConnectionState::Connecting | ConnectionState::HandshakeAwait) {
            return false;
        }
        let Some(since) = *self.connecting_since.lock() else {
            return false;
        };
        if since.elapsed() < self.establishment_timeout {
            return false;
        }
        warn!("establishment timeout elapsed, disconnecting");
        *state = ConnectionState::Disconnecting;
        true
    }

    #[instrument(skip(self), fields(local = %self.local_address, peer = %self.peer_address))]
    pub fn begin_handshake(&self) {
        debug!("awaiting handshake completion");
        *self.state.lock() = ConnectionState::HandshakeAwait;
    }

    /// Stores the endpoints a completed handshake produced and, via the
    /// reactor, transitions to `Active`. Private: reachable only once a
    /// handshake driver has actually built real endpoints, so `Active`
    /// never means anything less than spec §4.6's "every endpoint is
    /// initialized".
    fn activate<R: Reactor + ?Sized>(&self, reactor: &R, endpoints: ConnectionEndpoints) {
        sync_on_reactor(reactor, || {
            *self.endpoints.lock() = Some(endpoints);
            *self.state.lock() = ConnectionState::Active;
        });
    }

    /// Runs the server side of the §4.6 handshake over `transport`: receive
    /// the client's request, check its reported integrity against what this
    /// connection requires, map and validate the client's "free" queue
    /// memory, build this client's SPSC ends out of `server`, and send back
    /// the response carrying the handles and queue config the client needs
    /// in turn. Only transitions to `Active` once all of that has
    /// succeeded; any failure moves the connection to `Disconnecting`
    /// instead.
    #[instrument(skip(self, reactor, transport, server, provider), fields(local = %self.local_address, peer = %self.peer_address))]
    pub fn run_server_handshake<R: Reactor + ?Sized>(
        &self,
        reactor: &R,
        transport: &dyn Transport,
        server: &ServerMemoryManager,
        provider: &dyn MemoryProvider,
        client_index: u32,
    ) -> Result<(), ConnectionError> {
        self.begin_connecting();
        self.begin_handshake();

        match self.negotiate_server_side(transport, server, provider, client_index) {
            Ok(endpoints) => {
                self.activate(reactor, endpoints);
                debug!("server handshake complete, connection active");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "server handshake failed, disconnecting");
                self.begin_disconnecting(reactor);
                Err(err)
            }
        }
    }

    fn negotiate_server_side(
        &self,
        transport: &dyn Transport,
        server: &ServerMemoryManager,
        provider: &dyn MemoryProvider,
        client_index: u32,
    ) -> Result<ConnectionEndpoints, ConnectionError> {
        let request = transport.recv_request()?;
        if !request.client_integrity.meets(self.required_integrity) {
            return Err(ConnectionError::IntegrityMismatch {
                required: self.required_integrity,
                reported: request.client_integrity,
            });
        }

        let mut mapped_client_queue_memory = provider.map(&request.client_queue_handle)?;
        let (producer, consumer) = server.initialize_queue_ends(
            client_index,
            &request.client_queue_config,
            unsafe { mapped_client_queue_memory.as_mut_slice() },
        )?;

        let response = HandshakeResponse {
            server_integrity: self.local_integrity,
            slot_memory_handle: server.slot_memory_handle(),
            queue_memory_handle: server.queue_memory_handle(),
            client_index,
            server_queue_config: server.queue_config(client_index),
        };
        transport.send_response(&response)?;

        Ok(ConnectionEndpoints {
            producer,
            consumer,
            mapped_peer_queue_memory: Some(mapped_client_queue_memory),
        })
    }

    /// Runs the client side of the §4.6 handshake over `transport`: send
    /// this client's request, receive the server's response, check its
    /// reported integrity, attach the server's slot/queue memory, and build
    /// this client's SPSC ends out of `client`. Only transitions to
    /// `Active` once all of that has succeeded; any failure moves the
    /// connection to `Disconnecting` instead.
    #[instrument(skip(self, reactor, transport, client, provider), fields(local = %self.local_address, peer = %self.peer_address))]
    pub fn run_client_handshake<R: Reactor + ?Sized>(
        &self,
        reactor: &R,
        transport: &dyn Transport,
        client: &mut ClientMemoryManager,
        provider: &dyn MemoryProvider,
    ) -> Result<(), ConnectionError> {
        self.begin_connecting();
        self.begin_handshake();

        match self.negotiate_client_side(transport, client, provider) {
            Ok(endpoints) => {
                self.activate(reactor, endpoints);
                debug!("client handshake complete, connection active");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "client handshake failed, disconnecting");
                self.begin_disconnecting(reactor);
                Err(err)
            }
        }
    }

    fn negotiate_client_side(
        &self,
        transport: &dyn Transport,
        client: &mut ClientMemoryManager,
        provider: &dyn MemoryProvider,
    ) -> Result<ConnectionEndpoints, ConnectionError> {
        let request = HandshakeRequest {
            client_integrity: self.local_integrity,
            client_queue_config: client.own_queue_config(),
            client_queue_handle: client.own_queue_handle(),
        };
        transport.send_request(&request)?;

        let response = transport.recv_response()?;
        if !response.server_integrity.meets(self.required_integrity) {
            return Err(ConnectionError::IntegrityMismatch {
                required: self.required_integrity,
                reported: response.server_integrity,
            });
        }

        client.attach_server_memory(provider, &response.slot_memory_handle, &response.queue_memory_handle)?;
        let (producer, consumer) = client.initialize_queue_ends(&response.server_queue_config)?;

        Ok(ConnectionEndpoints {
            producer,
            consumer,
            mapped_peer_queue_memory: None,
        })
    }

    #[instrument(skip(self, reactor), fields(local = %self.local_address, peer = %self.peer_address))]
    pub fn begin_disconnecting<R: Reactor + ?Sized>(&self, reactor: &R) {
        sync_on_reactor(reactor, || {
            *self.state.lock() = ConnectionState::Disconnecting;
        });
    }

    #[instrument(skip(self, reactor), fields(local = %self.local_address, peer = %self.peer_address))]
    pub fn terminate<R: Reactor + ?Sized>(&self, reactor: &R) {
        sync_on_reactor(reactor, || {
            *self.state.lock() = ConnectionState::Terminated;
            *self.endpoints.lock() = None;
        });
        debug!("connection terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Core::Layout::MemoryLayout;
    use crate::Core::SharedMemory::{HeapMemoryProvider, PosixShmProvider};
    use std::sync::mpsc;

    fn addr(port: u32) -> IpcUnicastAddress {
        IpcUnicastAddress::new("127.0.0.1".parse().unwrap(), port)
    }

    /// Stand-alone SPSC endpoints over leaked heap memory, for tests that
    /// only need `ConnectionProtocol` to reach `Active` and don't care what
    /// the endpoints actually carry.
    fn dummy_endpoints() -> ConnectionEndpoints {
        let layout = MemoryLayout::new(4, 32, 8, 1).unwrap();
        let provider = HeapMemoryProvider::new();
        let mut producer_mem = provider.allocate(layout.queue_memory_size() as usize, 8).unwrap();
        let producer = layout.new_producer_end(0, unsafe { producer_mem.as_mut_slice() });
        let config = layout.queue_config(0);
        let mut consumer_mem = provider.allocate(layout.queue_memory_size() as usize, 8).unwrap();
        let consumer = MemoryLayout::new_consumer_end(&config, unsafe { consumer_mem.as_mut_slice() });
        // Leaked intentionally: producer/consumer hold raw pointers into
        // this memory for as long as the test keeps them around.
        std::mem::forget(producer_mem);
        std::mem::forget(consumer_mem);
        ConnectionEndpoints {
            producer,
            consumer,
            mapped_peer_queue_memory: None,
        }
    }

    #[test]
    fn happy_path_reaches_active_via_full_handshake() {
        let provider = PosixShmProvider::new();
        let server_layout = MemoryLayout::new(4, 16, 8, 1).unwrap();
        let server_memory = ServerMemoryManager::new(server_layout, &provider).unwrap();
        let client_layout = MemoryLayout::new(4, 16, 8, 1).unwrap();
        let mut client_memory = ClientMemoryManager::new(client_layout, &provider).unwrap();

        let (client_transport, server_transport) = channel_pair();
        let server_protocol = ConnectionProtocol::new(addr(2), addr(1), IntegrityLevel::Qm, IntegrityLevel::Qm);
        let client_protocol = ConnectionProtocol::new(addr(1), addr(2), IntegrityLevel::Qm, IntegrityLevel::Qm);
        let reactor = InlineReactor;

        std::thread::scope(|scope| {
            let server_handle = scope.spawn(|| {
                server_protocol.run_server_handshake(&reactor, &server_transport, &server_memory, &provider, 0)
            });
            let client_handle = scope.spawn(|| {
                client_protocol.run_client_handshake(&reactor, &client_transport, &mut client_memory, &provider)
            });
            server_handle.join().unwrap().unwrap();
            client_handle.join().unwrap().unwrap();
        });

        assert_eq!(server_protocol.state(), ConnectionState::Active);
        assert_eq!(client_protocol.state(), ConnectionState::Active);
        assert!(server_protocol.endpoints().is_some());
        assert!(client_protocol.endpoints().is_some());
    }

    #[test]
    fn insufficient_integrity_is_rejected_before_active() {
        let provider = PosixShmProvider::new();
        let server_layout = MemoryLayout::new(4, 16, 8, 1).unwrap();
        let server_memory = ServerMemoryManager::new(server_layout, &provider).unwrap();
        let client_layout = MemoryLayout::new(4, 16, 8, 1).unwrap();
        let client_memory = ClientMemoryManager::new(client_layout, &provider).unwrap();

        let (client_transport, server_transport) = channel_pair();
        let request = HandshakeRequest {
            client_integrity: IntegrityLevel::Qm,
            client_queue_config: client_memory.own_queue_config(),
            client_queue_handle: client_memory.own_queue_handle(),
        };
        client_transport.send_request(&request).unwrap();

        // Server requires AsilC; the request above only reports Qm.
        let server_protocol = ConnectionProtocol::new(addr(2), addr(1), IntegrityLevel::Qm, IntegrityLevel::AsilC);
        let reactor = InlineReactor;

        let err = server_protocol
            .run_server_handshake(&reactor, &server_transport, &server_memory, &provider, 0)
            .unwrap_err();
        assert!(matches!(err, ConnectionError::IntegrityMismatch { .. }));
        assert_eq!(server_protocol.state(), ConnectionState::Disconnecting);
    }

    #[test]
    fn disconnect_then_terminate() {
        let protocol = ConnectionProtocol::new(addr(1), addr(2), IntegrityLevel::Qm, IntegrityLevel::Qm);
        let reactor = InlineReactor;
        protocol.begin_connecting();
        protocol.begin_handshake();
        protocol.begin_disconnecting(&reactor);
        assert_eq!(protocol.state(), ConnectionState::Disconnecting);
        protocol.terminate(&reactor);
        assert_eq!(protocol.state(), ConnectionState::Terminated);
    }

    #[test]
    fn establishment_timeout_disconnects_a_stalled_handshake() {
        let protocol = ConnectionProtocol::with_establishment_timeout(
            addr(1),
            addr(2),
            IntegrityLevel::Qm,
            IntegrityLevel::Qm,
            Duration::from_millis(10),
        );
        protocol.begin_connecting();
        protocol.begin_handshake();
        std::thread::sleep(Duration::from_millis(20));
        assert!(protocol.check_establishment_timeout());
        assert_eq!(protocol.state(), ConnectionState::Disconnecting);
    }

    #[test]
    fn establishment_timeout_is_a_no_op_once_active() {
        let protocol = ConnectionProtocol::with_establishment_timeout(
            addr(1),
            addr(2),
            IntegrityLevel::Qm,
            IntegrityLevel::Qm,
            Duration::from_millis(10),
        );
        let reactor = InlineReactor;
        protocol.begin_connecting();
        protocol.begin_handshake();
        protocol.activate(&reactor, dummy_endpoints());
        std::thread::sleep(Duration::from_millis(20));
        assert!(!protocol.check_establishment_timeout());
        assert_eq!(protocol.state(), ConnectionState::Active);
    }

    /// An in-memory duplex [`Transport`] test double: one instance carries
    /// the client's half (send requests, receive responses), its paired
    /// instance the server's half (receive requests, send responses). The
    /// two unused methods on each half are never called in these tests.
    struct ChannelTransport {
        request_tx: Option<mpsc::Sender<HandshakeRequest>>,
        request_rx: Option<Mutex<mpsc::Receiver<HandshakeRequest>>>,
        response_tx: Option<mpsc::Sender<HandshakeResponse>>,
        response_rx: Option<Mutex<mpsc::Receiver<HandshakeResponse>>>,
    }

    impl Transport for ChannelTransport {
        fn send_request(&self, request: &HandshakeRequest) -> Result<(), TransportError> {
            self.request_tx
                .as_ref()
                .expect("send_request called on a transport with no request sender")
                .send(request.clone())
                .map_err(|_| TransportError::Closed)
        }

        fn recv_request(&self) -> Result<HandshakeRequest, TransportError> {
            self.request_rx
                .as_ref()
                .expect("recv_request called on a transport with no request receiver")
                .lock()
                .recv()
                .map_err(|_| TransportError::Closed)
        }

        fn send_response(&self, response: &HandshakeResponse) -> Result<(), TransportError> {
            self.response_tx
                .as_ref()
                .expect("send_response called on a transport with no response sender")
                .send(response.clone())
                .map_err(|_| TransportError::Closed)
        }

        fn recv_response(&self) -> Result<HandshakeResponse, TransportError> {
            self.response_rx
                .as_ref()
                .expect("recv_response called on a transport with no response receiver")
                .lock()
                .recv()
                .map_err(|_| TransportError::Closed)
        }
    }

    fn channel_pair() -> (ChannelTransport, ChannelTransport) {
        let (req_tx, req_rx) = mpsc::channel();
        let (resp_tx, resp_rx) = mpsc::channel();
        let client = ChannelTransport {
            request_tx: Some(req_tx),
            request_rx: None,
            response_tx: None,
            response_rx: Some(Mutex::new(resp_rx)),
        };
        let server = ChannelTransport {
            request_tx: None,
            request_rx: Some(Mutex::new(req_rx)),
            response_tx: Some(resp_tx),
            response_rx: None,
        };
        (client, server)
    }
}
