// Server/ClientMemoryManager (spec §4.5): own the slot and queue memory
// regions for one channel, and construct the SPSC endpoints each
// connection needs out of them. `ServerMemoryManager` allocates both
// regions up front, sized for `MaxNumberReceivers`; `ClientMemoryManager`
// allocates only its own single-instance "free" queue and maps the
// server's regions once a connection's handshake hands it their exchange
// handles.

pub mod Builder;

pub use Builder::{ClientChannelBuilder, ServerChannelBuilder};

use crate::error::{InvalidConfiguration, MemoryError};
use crate::Core::Layout::{MemoryLayout, QueueMemoryConfig};
use crate::Core::Queue::{SpscConsumerEnd, SpscProducerEnd};
use crate::Core::SharedMemory::{AccessMode, MemoryExchangeHandle, MemoryProvider, OwnedMemory};
use crate::Core::Slot::WritableSlotDescriptor;

/// Owns the slot memory and the per-client "available" queue memory for one
/// server-side channel endpoint.
pub struct ServerMemoryManager {
    layout: MemoryLayout,
    slot_memory: OwnedMemory,
    queue_memory: OwnedMemory,
}

impl ServerMemoryManager {
    pub fn new(layout: MemoryLayout, provider: &dyn MemoryProvider) -> Result<Self, MemoryError> {
        let slot_memory = provider.allocate(layout.slot_memory_size(), layout.slot_content_alignment())?;
        let queue_memory = provider.allocate(layout.queue_memory_size() as usize, 8)?;
        Ok(Self {
            layout,
            slot_memory,
            queue_memory,
        })
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Handle to hand a connecting client: slot payloads are server-written
    /// only, so this is exported read-only.
    pub fn slot_memory_handle(&self) -> MemoryExchangeHandle {
        self.slot_memory.export(AccessMode::ReadOnly)
    }

    /// Handle to hand a connecting client: the consumer side of each
    /// "available" queue instance writes `tail` into this same region, so
    /// unlike slot memory this must be exported read-write (see DESIGN.md).
    pub fn queue_memory_handle(&self) -> MemoryExchangeHandle {
        self.queue_memory.export(AccessMode::ReadWrite)
    }

    /// `QueueMemoryConfig` for the `client_index`-th "available" queue
    /// instance, sent to that client during its handshake.
    pub fn queue_config(&self, client_index: u32) -> QueueMemoryConfig {
        self.layout.queue_config(client_index)
    }

    pub fn writable_slot(&self, index: u32) -> WritableSlotDescriptor<'_> {
        let view = unsafe { self.slot_memory.as_mut_slice() };
        self.layout.get_writable_slot_descriptor(index, view)
    }

    /// Build the two SPSC ends this server needs for one client connection:
    /// the writing end of that client's "available" queue (local), and the
    /// reading end of that client's "free" queue (remote, described by
    /// `client_queue_config` and mapped into `client_queue_view`).
    ///
    /// Zeroes this client's slice of the server's own queue memory before
    /// constructing either end, so that reusing `client_index` for a
    /// reconnecting peer starts from a clean slate rather than whatever
    /// indices the previous occupant left behind (spec §4.5, §8 E5).
    pub fn initialize_queue_ends(
        &self,
        client_index: u32,
        client_queue_config: &QueueMemoryConfig,
        client_queue_view: &mut [u8],
    ) -> Result<(SpscProducerEnd, SpscConsumerEnd), InvalidConfiguration> {
        self.layout
            .validate_readable_queue_memory_config(client_queue_config, client_queue_view.len() as u64)?;
        let queue_view = unsafe { self.queue_memory.as_mut_slice() };
        self.layout.reset_queue_slice(client_index, queue_view);
        let writing_end = self.layout.new_producer_end(client_index, queue_view);
        let reading_end = MemoryLayout::new_consumer_end(client_queue_config, client_queue_view);
        Ok((writing_end, reading_end))
    }
}

/// Owns the single-instance "free" queue memory for one client, and maps
/// the server's slot/queue regions once a handshake supplies their handles.
pub struct ClientMemoryManager {
    layout: MemoryLayout,
    local_queue_memory: OwnedMemory,
    remote_slot_memory: Option<OwnedMemory>,
    remote_queue_memory: Option<OwnedMemory>,
}

impl ClientMemoryManager {
    /// `layout` must have been constructed with `MaxNumberReceivers == 1`:
    /// a client only ever plans space for its own single "free" queue
    /// instance (spec §4.5, "the client does not plan space for multiple
    /// receivers").
    pub fn new(layout: MemoryLayout, provider: &dyn MemoryProvider) -> Result<Self, MemoryError> {
        debug_assert_eq!(layout.max_number_receivers(), 1);
        let local_queue_memory = provider.allocate(layout.queue_memory_size() as usize, 8)?;
        Ok(Self {
            layout,
            local_queue_memory,
            remote_slot_memory: None,
            remote_queue_memory: None,
        })
    }

    pub fn own_queue_config(&self) -> QueueMemoryConfig {
        self.layout.queue_config(0)
    }

    /// Handle for this client's "free" queue, sent to the server during the
    /// handshake. Read-write for the same reason server queue memory is
    /// (the server writes `head` back into it).
    pub fn own_queue_handle(&self) -> MemoryExchangeHandle {
        self.local_queue_memory.export(AccessMode::ReadWrite)
    }

    /// Map the server's slot and queue memory regions, described by the
    /// handles received during the handshake.
    pub fn attach_server_memory(
        &mut self,
        provider: &dyn MemoryProvider,
        slot_handle: &MemoryExchangeHandle,
        queue_handle: &MemoryExchangeHandle,
    ) -> Result<(), MemoryError> {
        self.remote_slot_memory = Some(provider.map(slot_handle)?);
        self.remote_queue_memory = Some(provider.map(queue_handle)?);
        Ok(())
    }

    pub fn readable_slot(&self, index: u32) -> crate::Core::Slot::ReadableSlotDescriptor<'_> {
        let view = self
            .remote_slot_memory
            .as_ref()
            .expect("attach_server_memory must be called before reading slots")
            .as_slice();
        self.layout.get_readable_slot_descriptor(index, view)
    }

    /// Build the two SPSC ends this client needs: the writing end of its
    /// own "free" queue (local), and the reading end of its assigned
    /// "available" queue instance (remote, described by
    /// `server_queue_config`).
    pub fn initialize_queue_ends(
        &mut self,
        server_queue_config: &QueueMemoryConfig,
    ) -> Result<(SpscProducerEnd, SpscConsumerEnd), InvalidConfiguration> {
        let remote_view = unsafe {
            self.remote_queue_memory
                .as_ref()
                .expect("attach_server_memory must be called before initializing queue ends")
                .as_mut_slice()
        };
        self.layout
            .validate_readable_queue_memory_config(server_queue_config, remote_view.len() as u64)?;
        let writing_end = self
            .layout
            .new_producer_end(0, unsafe { self.local_queue_memory.as_mut_slice() });
        let reading_end = MemoryLayout::new_consumer_end(server_queue_config, remote_view);
        Ok((writing_end, reading_end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Core::SharedMemory::HeapMemoryProvider;

    #[test]
    fn reconnect_with_reused_client_index_sees_empty_queue() {
        let layout = MemoryLayout::new(4, 32, 8, 2).unwrap();
        let provider = HeapMemoryProvider::new();
        let server = ServerMemoryManager::new(layout, &provider).unwrap();

        let client_layout = MemoryLayout::new(4, 32, 8, 1).unwrap();
        let mut client_queue_mem = provider
            .allocate(client_layout.queue_memory_size() as usize, 8)
            .unwrap();
        let client_config = client_layout.queue_config(0);

        // First occupant of client_index 1 pushes a few indices that are
        // never drained before it disconnects.
        {
            let (producer, _consumer) = server
                .initialize_queue_ends(1, &client_config, unsafe {
                    client_queue_mem.as_mut_slice()
                })
                .unwrap();
            assert!(producer.push(0).unwrap());
            assert!(producer.push(1).unwrap());
        }

        // A new client reconnects at the same index; its queue must start
        // empty rather than inheriting the stale head/buffer contents.
        let (producer, consumer) = server
            .initialize_queue_ends(1, &client_config, unsafe {
                client_queue_mem.as_mut_slice()
            })
            .unwrap();
        assert_eq!(consumer.peek().unwrap(), None);
        assert!(producer.push(7).unwrap());
    }

    #[test]
    fn client_attaches_and_initializes_against_server_memory() {
        // `HeapMemoryProvider::map` always fails (a heap allocation has no
        // OS-level identity a peer could import), so exercising the
        // export/map round-trip this test needs the real POSIX backend.
        use crate::Core::SharedMemory::PosixShmProvider;

        let server_layout = MemoryLayout::new(4, 16, 8, 1).unwrap();
        let provider = PosixShmProvider::new();
        let server = ServerMemoryManager::new(server_layout, &provider).unwrap();

        let client_layout = MemoryLayout::new(4, 16, 8, 1).unwrap();
        let mut client = ClientMemoryManager::new(client_layout, &provider).unwrap();

        client
            .attach_server_memory(
                &provider,
                &server.slot_memory_handle(),
                &server.queue_memory_handle(),
            )
            .unwrap();

        let server_queue_config = server.queue_config(0);
        let (client_free_producer, client_available_consumer) = client
            .initialize_queue_ends(&server_queue_config)
            .unwrap();
        assert_eq!(client_available_consumer.peek().unwrap(), None);
        assert!(client_free_producer.push(2).unwrap());
    }
}
