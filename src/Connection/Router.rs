// RouterConnector (spec §9, cyclic-ownership note): the piece that actually
// moves slot indices across one connection's pair of SPSC queues. Holds a
// `Weak` back-reference to the connection's state machine so the
// connection ↔ connector ↔ discovery-binding cycle doesn't leak (the
// `Arc`/`Weak` alternative spec.md's design note calls out, rather than an
// arena of `ConnectionId`s).

use std::sync::{Arc, Weak};

use crate::error::QueueError;
use crate::Connection::Protocol::ConnectionProtocol;
use crate::Core::Queue::{SpscConsumerEnd, SpscProducerEnd};

/// One connection's send/receive pair. For a server this is (available
/// producer, free consumer); for a client, (free producer, available
/// consumer) — the connector itself is symmetric and doesn't care which.
pub struct RouterConnector {
    connection: Weak<ConnectionProtocol>,
    producer: SpscProducerEnd,
    consumer: SpscConsumerEnd,
}

impl RouterConnector {
    pub fn new(
        connection: &Arc<ConnectionProtocol>,
        producer: SpscProducerEnd,
        consumer: SpscConsumerEnd,
    ) -> Self {
        Self {
            connection: Arc::downgrade(connection),
            producer,
            consumer,
        }
    }

    /// `None` once the connection's last strong reference has been dropped
    /// (spec §4.7, deferred destruction): callers should treat that as "this
    /// connector is dead" rather than continue routing through it.
    pub fn connection(&self) -> Option<Arc<ConnectionProtocol>> {
        self.connection.upgrade()
    }

    pub fn send(&self, slot_index: u32) -> Result<bool, QueueError> {
        self.producer.push(slot_index)
    }

    pub fn try_recv(&self) -> Result<Option<u32>, QueueError> {
        self.consumer.pop()
    }

    pub fn peek(&self) -> Result<Option<u32>, QueueError> {
        self.consumer.peek()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Connection::Address::{IntegrityLevel, IpcUnicastAddress};
    use crate::Core::Layout::MemoryLayout;
    use crate::Core::SharedMemory::{HeapMemoryProvider, MemoryProvider};

    #[test]
    fn connector_drops_connection_reference_once_manager_drops_it() {
        let layout = MemoryLayout::new(4, 32, 8, 1).unwrap();
        let provider = HeapMemoryProvider::new();
        let mut mem = provider
            .allocate(layout.queue_memory_size() as usize, 8)
            .unwrap();
        let producer = layout.new_producer_end(0, unsafe { mem.as_mut_slice() });
        let config = layout.queue_config(0);
        let mut mem2 = provider
            .allocate(layout.queue_memory_size() as usize, 8)
            .unwrap();
        let consumer = MemoryLayout::new_consumer_end(&config, unsafe { mem2.as_mut_slice() });

        let connection = Arc::new(ConnectionProtocol::new(
            IpcUnicastAddress::new("127.0.0.1".parse().unwrap(), 1),
            IpcUnicastAddress::new("127.0.0.1".parse().unwrap(), 2),
            IntegrityLevel::Qm,
            IntegrityLevel::Qm,
        ));
        let connector = RouterConnector::new(&connection, producer, consumer);
        assert!(connector.connection().is_some());

        drop(connection);
        assert!(connector.connection().is_none());
    }
}
