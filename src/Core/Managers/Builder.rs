use std::sync::Arc;

use crate::error::{InvalidConfiguration, MemoryError};
use crate::Core::Layout::MemoryLayout;
use crate::Core::SharedMemory::{ContiguousShmProvider, MemoryProvider, MemoryTechnology, PosixShmProvider};
use crate::Core::Managers::{ClientMemoryManager, ServerMemoryManager};

fn provider_for(technology: MemoryTechnology) -> Arc<dyn MemoryProvider> {
    match technology {
        MemoryTechnology::Posix => Arc::new(PosixShmProvider::new()),
        MemoryTechnology::Contiguous => Arc::new(ContiguousShmProvider::new()),
    }
}

/// Assembles a `MemoryLayout` and a `MemoryProvider` into a
/// `ServerMemoryManager` without repeating the four layout parameters and
/// the technology choice at every call site.
pub struct ServerChannelBuilder {
    num_slots: u32,
    slot_content_size: usize,
    slot_content_alignment: usize,
    max_number_receivers: u32,
    technology: MemoryTechnology,
}

impl Default for ServerChannelBuilder {
    fn default() -> Self {
        Self {
            num_slots: 16,
            slot_content_size: 256,
            slot_content_alignment: 8,
            max_number_receivers: 4,
            technology: MemoryTechnology::Posix,
        }
    }
}

impl ServerChannelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_num_slots(mut self, num_slots: u32) -> Self {
        self.num_slots = num_slots;
        self
    }

    pub fn with_slot_content_size(mut self, size: usize) -> Self {
        self.slot_content_size = size;
        self
    }

    pub fn with_slot_content_alignment(mut self, alignment: usize) -> Self {
        self.slot_content_alignment = alignment;
        self
    }

    pub fn with_max_number_receivers(mut self, max_number_receivers: u32) -> Self {
        self.max_number_receivers = max_number_receivers;
        self
    }

    pub fn with_technology(mut self, technology: MemoryTechnology) -> Self {
        self.technology = technology;
        self
    }

    pub fn build(self) -> Result<ServerMemoryManager, BuildError> {
        let layout = MemoryLayout::new(
            self.num_slots,
            self.slot_content_size,
            self.slot_content_alignment,
            self.max_number_receivers,
        )?;
        let provider = provider_for(self.technology);
        Ok(ServerMemoryManager::new(layout, provider.as_ref())?)
    }
}

/// Assembles the client-side counterpart. `MaxNumberReceivers` is fixed at
/// 1 here: a client only ever plans space for its own "free" queue (spec
/// §4.5).
pub struct ClientChannelBuilder {
    num_slots: u32,
    slot_content_size: usize,
    slot_content_alignment: usize,
    technology: MemoryTechnology,
}

impl Default for ClientChannelBuilder {
    fn default() -> Self {
        Self {
            num_slots: 16,
            slot_content_size: 256,
            slot_content_alignment: 8,
            technology: MemoryTechnology::Posix,
        }
    }
}

impl ClientChannelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_num_slots(mut self, num_slots: u32) -> Self {
        self.num_slots = num_slots;
        self
    }

    pub fn with_slot_content_size(mut self, size: usize) -> Self {
        self.slot_content_size = size;
        self
    }

    pub fn with_slot_content_alignment(mut self, alignment: usize) -> Self {
        self.slot_content_alignment = alignment;
        self
    }

    pub fn with_technology(mut self, technology: MemoryTechnology) -> Self {
        self.technology = technology;
        self
    }

    pub fn build(self) -> Result<ClientMemoryManager, BuildError> {
        let layout = MemoryLayout::new(
            self.num_slots,
            self.slot_content_size,
            self.slot_content_alignment,
            1,
        )?;
        let provider = provider_for(self.technology);
        Ok(ClientMemoryManager::new(layout, provider.as_ref())?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    InvalidConfiguration(#[from] InvalidConfiguration),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}
