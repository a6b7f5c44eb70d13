//! Error types surfaced by the core IPC substrate.
//!
//! Each family maps 1:1 onto a recoverable-error row in the design's error
//! table: allocation/mapping failures, malformed remote layout descriptors,
//! SPSC queue corruption, and connection-lifecycle faults. Fatal conditions
//! (reactor sync timeout, precondition violations) are not represented here;
//! they abort the process at the call site instead of returning an `Err`.

use crate::Connection::Address::IntegrityLevel;

/// Failure allocating or mapping a shared-memory region.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("insufficient OS resources to allocate {requested} bytes")]
    OutOfResources { requested: usize },

    #[error("insufficient privileges to allocate shared memory")]
    PermissionDenied,

    #[error("requested size {requested} is not supported by this memory technology")]
    UnsupportedSize { requested: usize },

    #[error("remote exchange handle is stale or otherwise invalid")]
    InvalidHandle,

    #[error("remote region size {remote} does not match the expected {expected}")]
    SizeMismatch { expected: usize, remote: usize },

    #[error("OS error: {0}")]
    Os(#[from] std::io::Error),
}

/// A remote-supplied [`crate::layout::QueueMemoryConfig`] failed validation,
/// or a `MemoryLayout` was constructed with invalid parameters.
#[derive(Debug, thiserror::Error)]
pub enum InvalidConfiguration {
    #[error("queue sub-area {name} (offset {offset}, size {size}) extends past the mapped region of {region_size} bytes")]
    OutOfBounds {
        name: &'static str,
        offset: u64,
        size: u64,
        region_size: u64,
    },

    #[error("queue sub-area {name} offset {offset} + size {size} overflows u64")]
    OffsetOverflow {
        name: &'static str,
        offset: u64,
        size: u64,
    },

    #[error("queue sub-areas {first} and {second} overlap")]
    OverlappingAreas {
        first: &'static str,
        second: &'static str,
    },

    #[error("queue sub-area {name} at offset {offset} does not satisfy its required alignment of {alignment}")]
    Misaligned {
        name: &'static str,
        offset: u64,
        alignment: u64,
    },

    #[error("NumSlots must be nonzero")]
    ZeroSlots,

    #[error("SlotContentSize must be nonzero")]
    ZeroSlotContentSize,

    #[error("SlotContentAlignment {0} is not a power of two")]
    AlignmentNotPowerOfTwo(usize),

    #[error("MaxNumberReceivers must be nonzero")]
    ZeroMaxReceivers,

    #[error("queue buffer of {0} bytes exceeds the UINT32_MAX/2 size limit")]
    QueueBufferTooLarge(u64),
}

/// The SPSC index queue observed a state inconsistent with a cooperating
/// peer (e.g. head/tail drift beyond `2 * capacity`).
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("observed head/tail drift of {drift} exceeds twice the queue capacity ({capacity})")]
    IndexDrift { drift: u64, capacity: u32 },
}

/// The reliable byte transport underlying a connection failed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport connect failed: {0}")]
    ConnectFailed(String),

    #[error("transport closed unexpectedly")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a connection to reach `Active`, covering every way the
/// handshake in `spec.md` §4.6 can go wrong.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("peer integrity level {reported:?} does not meet the required {required:?}")]
    IntegrityMismatch {
        required: IntegrityLevel,
        reported: IntegrityLevel,
    },

    #[error("handshake did not reach Active within the establishment timeout")]
    HandshakeTimeout,

    #[error(transparent)]
    InvalidConfiguration(#[from] InvalidConfiguration),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Crate-wide umbrella error for call sites that don't need to match on a
/// specific family.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    InvalidConfiguration(#[from] InvalidConfiguration),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
