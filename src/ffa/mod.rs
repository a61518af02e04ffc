//! FF-A v1.0 memory sharing (DEN0077A)
//!
//! Wire encoding of the memory transaction descriptors exchanged in
//! partitions' TX/RX buffers, and the handle that names an in-flight
//! transaction.

pub mod descriptors;
pub mod handle;

pub use descriptors::DescriptorError;
pub use handle::MemoryHandle;

// ── Version ──────────────────────────────────────────────────────────
pub const FFA_VERSION_MAJOR: u16 = 1;
pub const FFA_VERSION_MINOR: u16 = 0;
pub const FFA_VERSION_MAJOR_OFFSET: u32 = 16;
pub const FFA_VERSION_1_0: u32 = make_version(FFA_VERSION_MAJOR, FFA_VERSION_MINOR);

pub const fn make_version(major: u16, minor: u16) -> u32 {
    ((major as u32) << FFA_VERSION_MAJOR_OFFSET) | minor as u32
}

// ── Error codes ──────────────────────────────────────────────────────
pub const FFA_INVALID_PARAMETERS: i32 = -2;
pub const FFA_NO_MEMORY: i32 = -3;
