//! Memory transaction handles (DEN0077A §5.10.2).
//!
//! Bit 63 records which world's allocator issued the handle: set for the
//! hypervisor (this world), clear for the SPMC. The remaining bits are the
//! allocator's index; recovering it is the allocator owner's business.

pub const FFA_MEMORY_HANDLE_ALLOCATOR_MASK: u64 = 1 << 63;
pub const FFA_MEMORY_HANDLE_ALLOCATOR_HYPERVISOR: u64 = 1 << 63;
pub const FFA_MEMORY_HANDLE_ALLOCATOR_SPMC: u64 = 0;

/// Which world allocated a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleAllocator {
    Hypervisor,
    Spmc,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryHandle(pub u64);

impl MemoryHandle {
    pub const INVALID: Self = Self(u64::MAX);

    /// Encode `index` as a handle allocated by this world.
    ///
    /// `index` must leave bit 63 clear.
    pub fn make(index: u64) -> Self {
        debug_assert_eq!(
            index & FFA_MEMORY_HANDLE_ALLOCATOR_MASK,
            0,
            "handle index collides with the allocator bit"
        );
        Self((index & !FFA_MEMORY_HANDLE_ALLOCATOR_MASK) | FFA_MEMORY_HANDLE_ALLOCATOR_HYPERVISOR)
    }

    pub const fn allocated_by_current_world(self) -> bool {
        self.0 & FFA_MEMORY_HANDLE_ALLOCATOR_MASK == FFA_MEMORY_HANDLE_ALLOCATOR_HYPERVISOR
    }

    pub const fn allocator(self) -> HandleAllocator {
        if self.allocated_by_current_world() {
            HandleAllocator::Hypervisor
        } else {
            HandleAllocator::Spmc
        }
    }
}

/// Handles travel in two registers, low word first.
impl From<[u32; 2]> for MemoryHandle {
    fn from(value: [u32; 2]) -> Self {
        Self(u64::from(value[1]) << 32 | u64::from(value[0]))
    }
}

impl From<MemoryHandle> for [u32; 2] {
    fn from(value: MemoryHandle) -> Self {
        [value.0 as u32, (value.0 >> 32) as u32]
    }
}
