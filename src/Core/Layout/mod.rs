// MemoryLayout (spec §4.2): turns (NumSlots, SlotContentSize,
// SlotContentAlignment, MaxNumberReceivers) into concrete byte offsets for
// both the slot memory region and the queue memory region, and constructs
// the descriptor/endpoint types that read and write through those offsets.

mod queue;
mod slot;

pub use queue::{QueueMemoryConfig, MAX_QUEUE_BUFFER_BYTES};

use std::sync::atomic::AtomicBool;

use crate::error::InvalidConfiguration;
use crate::Core::Queue::{SpscConsumerEnd, SpscProducerEnd};
use crate::Core::Slot::{ReadableSlotDescriptor, WritableSlotDescriptor};

#[derive(Debug, Clone, Copy)]
pub struct MemoryLayout {
    num_slots: u32,
    slot_content_size: usize,
    slot_content_alignment: usize,
    max_number_receivers: u32,
    slot_stride: usize,
    slot_memory_size: usize,
    queue_instance_stride: u64,
    queue_memory_size: u64,
}

impl MemoryLayout {
    pub fn new(
        num_slots: u32,
        slot_content_size: usize,
        slot_content_alignment: usize,
        max_number_receivers: u32,
    ) -> Result<Self, InvalidConfiguration> {
        if num_slots == 0 {
            return Err(InvalidConfiguration::ZeroSlots);
        }
        if slot_content_size == 0 {
            return Err(InvalidConfiguration::ZeroSlotContentSize);
        }
        if !slot_content_alignment.is_power_of_two() {
            return Err(InvalidConfiguration::AlignmentNotPowerOfTwo(slot_content_alignment));
        }
        if max_number_receivers == 0 {
            return Err(InvalidConfiguration::ZeroMaxReceivers);
        }

        let queue_buffer_size = num_slots as u64 * queue::INDEX_ENTRY_SIZE;
        if queue_buffer_size > MAX_QUEUE_BUFFER_BYTES {
            return Err(InvalidConfiguration::QueueBufferTooLarge(queue_buffer_size));
        }

        Ok(Self {
            num_slots,
            slot_content_size,
            slot_content_alignment,
            max_number_receivers,
            slot_stride: slot::stride(slot_content_size, slot_content_alignment),
            slot_memory_size: slot::memory_size(num_slots, slot_content_size, slot_content_alignment),
            queue_instance_stride: queue::instance_stride(num_slots),
            queue_memory_size: queue::memory_size(num_slots, max_number_receivers),
        })
    }

    pub fn num_slots(&self) -> u32 {
        self.num_slots
    }

    pub fn max_number_receivers(&self) -> u32 {
        self.max_number_receivers
    }

    /// The alignment every payload buffer must satisfy. Slot memory must be
    /// allocated with at least this alignment (spec §3 invariant, §8
    /// property 2) — a base allocation aligned only to 8 does not
    /// guarantee it for `SlotContentAlignment > 8`, since the payload
    /// offset within a slot is only a multiple of `SlotContentAlignment`
    /// relative to the slot's own start, not to an arbitrarily-aligned
    /// base address.
    pub fn slot_content_alignment(&self) -> usize {
        self.slot_content_alignment
    }

    pub fn slot_memory_size(&self) -> usize {
        self.slot_memory_size
    }

    pub fn queue_memory_size(&self) -> u64 {
        self.queue_memory_size
    }

    pub fn minimum_size_of_one_queue(&self) -> u64 {
        queue::minimum_instance_size(self.num_slots)
    }

    /// `QueueMemoryConfig` for this layout's `index`-th queue instance,
    /// computed against this process's own plan — sent to the peer during
    /// the handshake (spec §4.6).
    pub fn queue_config(&self, index: u32) -> QueueMemoryConfig {
        debug_assert!(index < self.max_number_receivers);
        queue::config_at(self.num_slots, index)
    }

    /// `IsReadableQueueMemoryConfigValid` (spec §4.2): the checked boundary
    /// for a remote-supplied `QueueMemoryConfig`.
    pub fn is_readable_queue_memory_config_valid(
        &self,
        config: &QueueMemoryConfig,
        remote_region_size: u64,
    ) -> bool {
        queue::validate(config, remote_region_size).is_ok()
    }

    /// Same check as [`Self::is_readable_queue_memory_config_valid`] but
    /// surfacing the specific violation, for call sites that want to log or
    /// propagate it rather than just branch on a bool.
    pub fn validate_readable_queue_memory_config(
        &self,
        config: &QueueMemoryConfig,
        remote_region_size: u64,
    ) -> Result<(), InvalidConfiguration> {
        queue::validate(config, remote_region_size)
    }

    fn flag_ptr(base: *mut u8, slot_stride: usize, index: u32) -> *const AtomicBool {
        unsafe { base.add(slot_stride * index as usize) as *const AtomicBool }
    }

    /// # Panics (debug only)
    /// If `index` is out of range or `view` is too small for this layout's
    /// slot memory. These are unit-internal preconditions (spec §9,
    /// "Unchecked internal APIs") left unchecked in release builds.
    pub fn get_writable_slot_descriptor<'a>(
        &self,
        index: u32,
        view: &'a mut [u8],
    ) -> WritableSlotDescriptor<'a> {
        debug_assert!(index < self.num_slots);
        debug_assert!(view.len() >= self.slot_memory_size);
        let base = view.as_mut_ptr();
        let flag = Self::flag_ptr(base, self.slot_stride, index);
        let payload_start = self.slot_stride * index as usize + slot::payload_offset(self.slot_content_alignment);
        let payload = &mut view[payload_start..payload_start + self.slot_content_size];
        unsafe { WritableSlotDescriptor::new(flag, payload) }
    }

    pub fn get_readable_slot_descriptor<'a>(
        &self,
        index: u32,
        view: &'a [u8],
    ) -> ReadableSlotDescriptor<'a> {
        debug_assert!(index < self.num_slots);
        debug_assert!(view.len() >= self.slot_memory_size);
        let base = view.as_ptr() as *mut u8;
        let flag = Self::flag_ptr(base, self.slot_stride, index);
        let payload_start = self.slot_stride * index as usize + slot::payload_offset(self.slot_content_alignment);
        let payload = &view[payload_start..payload_start + self.slot_content_size];
        unsafe { ReadableSlotDescriptor::new(flag, payload) }
    }

    /// Zero one queue instance's whole byte span (head, tail, and buffer) in
    /// `view` before either end is constructed over it. Used when a
    /// `client_index` is reused for a reconnecting peer so stale indices
    /// left by the previous occupant can't resurface (spec §4.5, §8 E5).
    pub fn reset_queue_slice(&self, index: u32, view: &mut [u8]) {
        debug_assert!(index < self.max_number_receivers);
        let start = self.queue_instance_stride as usize * index as usize;
        let end = start + self.queue_instance_stride as usize;
        view[start..end].fill(0);
    }

    /// Build the producer end for this layout's `index`-th queue instance,
    /// entirely within this process's own `view` (spec §4.5, "writing end").
    pub fn new_producer_end(&self, index: u32, view: &mut [u8]) -> SpscProducerEnd {
        debug_assert!(index < self.max_number_receivers);
        debug_assert!(view.len() as u64 >= self.queue_memory_size);
        let config = self.queue_config(index);
        unsafe { SpscProducerEnd::new(view.as_mut_ptr(), &config) }
    }

    /// Build the consumer end for a peer's queue instance, described by a
    /// remote-supplied, already-validated `config`, mapped into `view`
    /// (spec §4.5, "reading end").
    pub fn new_consumer_end(config: &QueueMemoryConfig, view: &mut [u8]) -> SpscConsumerEnd {
        debug_assert!(view.len() as u64 >= config.buffer_offset + config.buffer_size);
        unsafe { SpscConsumerEnd::new(view.as_mut_ptr(), config) }
    }
}

/// Standalone single-instance queue config, for tests that exercise
/// `SpscProducerEnd`/`SpscConsumerEnd` without a full `MemoryLayout`.
#[cfg(test)]
pub(crate) fn queue_config_for_capacity(capacity: u32) -> QueueMemoryConfig {
    queue::config_at(capacity, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_slots() {
        assert!(matches!(
            MemoryLayout::new(0, 64, 8, 4),
            Err(InvalidConfiguration::ZeroSlots)
        ));
    }

    #[test]
    fn rejects_non_power_of_two_alignment() {
        assert!(matches!(
            MemoryLayout::new(4, 64, 3, 4),
            Err(InvalidConfiguration::AlignmentNotPowerOfTwo(3))
        ));
    }

    #[test]
    fn slot_memory_size_is_stride_times_count() {
        let layout = MemoryLayout::new(8, 100, 16, 2).unwrap();
        assert_eq!(layout.slot_memory_size(), layout.slot_stride * 8);
    }

    #[test]
    fn queue_instances_do_not_overlap() {
        let layout = MemoryLayout::new(16, 64, 8, 3).unwrap();
        let region_size = layout.queue_memory_size();
        for i in 0..3 {
            let config = layout.queue_config(i);
            assert!(layout.is_readable_queue_memory_config_valid(&config, region_size));
        }
        let a = layout.queue_config(0);
        let b = layout.queue_config(1);
        assert!(a.buffer_offset + a.buffer_size <= b.head_offset);
    }

    #[test]
    fn detects_out_of_bounds_remote_config() {
        let layout = MemoryLayout::new(16, 64, 8, 1).unwrap();
        let mut config = layout.queue_config(0);
        config.buffer_size += 1;
        assert!(!layout.is_readable_queue_memory_config_valid(&config, layout.queue_memory_size()));
    }
}

// Property-based tests for spec.md §8's universal invariants 1 and 2
// ("Layout determinism", "Alignment"). Placed alongside the unit tests
// above (not in tests/) since they need `slot_stride`, a private field.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn valid_params() -> impl Strategy<Value = (u32, usize, usize, u32)> {
        (
            1u32..64,
            1usize..256,
            prop_oneof![Just(1usize), Just(2), Just(4), Just(8), Just(16), Just(32)],
            1u32..8,
        )
    }

    proptest! {
        /// Invariant 1: two independently constructed layouts from the same
        /// parameters produce identical sizes and per-instance queue configs.
        #[test]
        fn layout_determinism((n, size, align, max) in valid_params()) {
            let a = MemoryLayout::new(n, size, align, max).unwrap();
            let b = MemoryLayout::new(n, size, align, max).unwrap();
            prop_assert_eq!(a.slot_memory_size(), b.slot_memory_size());
            prop_assert_eq!(a.queue_memory_size(), b.queue_memory_size());
            prop_assert_eq!(a.minimum_size_of_one_queue(), b.minimum_size_of_one_queue());
            for i in 0..max {
                prop_assert_eq!(a.queue_config(i), b.queue_config(i));
            }
        }

        /// Invariant 2: every payload buffer the layout hands out satisfies
        /// the requested content alignment, and slots never alias. Backed
        /// by a real `std::alloc` allocation at exactly the alignment
        /// `ServerMemoryManager`/`ClientMemoryManager` request from a
        /// `MemoryProvider` (spec §3 invariant, §8 property 2), not a
        /// `Vec<u8>` whose base alignment is otherwise unspecified.
        #[test]
        fn payload_is_aligned_and_slots_do_not_alias((n, size, align, max) in valid_params()) {
            let layout = MemoryLayout::new(n, size, align, max).unwrap();
            let alloc_layout = std::alloc::Layout::from_size_align(
                layout.slot_memory_size().max(1),
                layout.slot_content_alignment(),
            )
            .unwrap();
            let base_ptr = unsafe { std::alloc::alloc_zeroed(alloc_layout) };
            prop_assert!(!base_ptr.is_null());
            let view = unsafe { std::slice::from_raw_parts_mut(base_ptr, layout.slot_memory_size()) };

            let mut seen_ranges: Vec<(usize, usize)> = Vec::new();
            for i in 0..n {
                let desc = layout.get_writable_slot_descriptor(i, view);
                let ptr = desc.data_ref().as_ptr() as usize;
                prop_assert_eq!(ptr % align, 0);
                let range = (ptr, ptr + size);
                for &(s, e) in &seen_ranges {
                    let overlap = range.0 < e && s < range.1;
                    prop_assert!(!overlap);
                }
                seen_ranges.push(range);
            }

            unsafe { std::alloc::dealloc(base_ptr, alloc_layout) };
        }
    }
}
