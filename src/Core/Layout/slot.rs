// Slot memory planning (spec §4.2, §6): one slot is a visibility flag
// followed by padding up to the content alignment, the payload itself, and
// trailing padding back up to the 8-byte alignment the next slot's flag
// needs.

const VISIBILITY_FLAG_SIZE: usize = 8;
const VISIBILITY_FLAG_ALIGN: usize = 8;

fn round_up(value: usize, to: usize) -> usize {
    debug_assert!(to.is_power_of_two());
    (value + to - 1) & !(to - 1)
}

/// Byte offset of the payload within one slot, given the content alignment.
pub(crate) fn payload_offset(content_alignment: usize) -> usize {
    round_up(VISIBILITY_FLAG_SIZE, content_alignment.max(1))
}

/// Byte span of one slot including leading/trailing padding — the stride at
/// which successive slots are laid out back-to-back.
pub(crate) fn stride(content_size: usize, content_alignment: usize) -> usize {
    let payload_end = payload_offset(content_alignment) + content_size;
    round_up(payload_end, VISIBILITY_FLAG_ALIGN)
}

pub(crate) fn memory_size(num_slots: u32, content_size: usize, content_alignment: usize) -> usize {
    stride(content_size, content_alignment) * num_slots as usize
}

pub(crate) const FLAG_SIZE: usize = VISIBILITY_FLAG_SIZE;
