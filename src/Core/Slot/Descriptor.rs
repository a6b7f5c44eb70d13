// Slot descriptors (spec §4.3): the reader/writer-side views of a single
// slot's visibility flag plus payload. Debug points are reserved hooks for a
// future debug build and are no-ops here, matching the source's framing.

use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(test)]
mod platform_assumptions {
    use super::*;

    #[test]
    fn visibility_flag_is_lock_free() {
        assert!(AtomicBool::new(false).is_lock_free());
    }
}

/// The producer-side view of one slot: exclusive write access to the
/// payload, and the only party allowed to flip the visibility flag.
pub struct WritableSlotDescriptor<'a> {
    flag: &'a AtomicBool,
    payload: &'a mut [u8],
}

impl<'a> WritableSlotDescriptor<'a> {
    /// # Safety
    /// `flag` must point to a valid, properly-aligned `AtomicBool` and
    /// `payload` must not alias any other live reference into the same
    /// slot's bytes for the lifetime `'a`.
    pub(crate) unsafe fn new(flag: *const AtomicBool, payload: &'a mut [u8]) -> Self {
        Self {
            flag: &*flag,
            payload,
        }
    }

    pub fn data(&mut self) -> &mut [u8] {
        self.payload
    }

    pub fn data_ref(&self) -> &[u8] {
        self.payload
    }

    pub fn is_visible(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Publish the payload just written. Release-ordered so every prior
    /// write to `data()` happens-before a reader observing `true`.
    pub fn publish(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Retract visibility before overwriting the slot for a new send.
    pub fn retract(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// `ResetSlotMemory` (spec §4.3): resets per-slot state to defaults.
    /// Currently that is just clearing the visibility flag; the payload is
    /// left untouched, and the method is reserved for future per-slot debug
    /// metadata this layout leaves room for (spec §3, "Slot").
    pub fn reset_slot_memory(&self) {
        self.retract();
    }

    /// Reserved hook for a future debug build; no-op. Invoked immediately
    /// before the server publishes this slot to any connected client.
    #[inline]
    pub fn debug_point_send_slot(&self) {}

    /// Reserved hook for a future debug build; no-op. Invoked immediately
    /// before the server hands this slot to the user for writing.
    #[inline]
    pub fn debug_point_get_slot(&self) {}
}

/// The consumer-side view of one slot: read-only access to the payload, and
/// read-only observation of the visibility flag.
pub struct ReadableSlotDescriptor<'a> {
    flag: &'a AtomicBool,
    payload: &'a [u8],
}

impl<'a> ReadableSlotDescriptor<'a> {
    /// # Safety
    /// `flag` must point to a valid, properly-aligned `AtomicBool` and
    /// `payload` must remain valid for the lifetime `'a`.
    pub(crate) unsafe fn new(flag: *const AtomicBool, payload: &'a [u8]) -> Self {
        Self {
            flag: &*flag,
            payload,
        }
    }

    pub fn data(&self) -> &[u8] {
        self.payload
    }

    pub fn is_visible(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
