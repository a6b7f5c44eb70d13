//! Zero-copy shared-memory IPC substrate: multi-reader single-writer
//! slot-based fan-out channels, the lock-free SPSC index queues that
//! coordinate slot visibility between a producing server and its clients,
//! and the connection handshake that brings a peer pair to a safe steady
//! state.
//!
//! Module layout mirrors the component breakdown this crate is built from:
//! `Core` is the data-plane substrate (memory, layout, slots, queues,
//! managers); `Connection` is the control-plane lifecycle (addressing,
//! handshake protocol, registry, routing); `Discovery` binds required
//! service instances to the provided endpoints the connection layer dials.

#[allow(non_snake_case)]
pub mod Core {
    pub mod Layout;
    pub mod Managers;
    pub mod Queue;
    pub mod SharedMemory;
    pub mod Slot;

    pub use Layout::{MemoryLayout, QueueMemoryConfig};
    pub use Managers::{
        ClientChannelBuilder, ClientMemoryManager, ServerChannelBuilder, ServerMemoryManager,
    };
    pub use Queue::{SpscConsumerEnd, SpscProducerEnd};
    pub use SharedMemory::{
        AccessMode, ContiguousShmProvider, HeapMemoryProvider, MemoryExchangeHandle,
        MemoryProvider, MemoryTechnology, OwnedMemory, PosixShmProvider,
    };
    pub use Slot::{ReadableSlotDescriptor, WritableSlotDescriptor};
}

#[allow(non_snake_case)]
pub mod Connection {
    pub mod Address;
    pub mod Manager;
    pub mod Protocol;
    pub mod Router;

    pub use Address::{IntegrityLevel, IpcUnicastAddress};
    pub use Manager::{ConnectionKey, ConnectionManager};
    pub use Protocol::{
        ConnectionProtocol, ConnectionState, HandshakeRequest, HandshakeResponse, InlineReactor,
        Reactor, Transport,
    };
    pub use Router::RouterConnector;
}

#[allow(non_snake_case)]
pub mod Discovery {
    pub mod Binding;
    pub mod Ids;

    pub use Binding::{ProvidedServiceInstanceListener, ServiceDiscoveryBinding};
    pub use Ids::{
        InstanceIdSelector, MinorVersionSelector, ProvidedServiceInstanceId,
        RequiredServiceInstanceId,
    };
}

pub mod error;

pub use error::{
    ConnectionError, InvalidConfiguration, IpcError, MemoryError, QueueError, TransportError,
};
