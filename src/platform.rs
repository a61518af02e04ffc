//! Build-time Partition Limits
//!
//! All static capacities and reserved IDs live here so they can be
//! changed in one place when building for a different configuration.

// ── Pages ────────────────────────────────────────────────────────────
pub const PAGE_BITS: u32 = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_BITS;

// ── VM IDs ───────────────────────────────────────────────────────────
/// First ID in the VM ID space. IDs below `VM_ID_OFFSET` are reserved.
pub const VM_ID_BASE: u16 = 0;
/// ID of the first partition slot.
pub const VM_ID_OFFSET: u16 = 1;
/// The primary partition always occupies the first slot.
pub const PRIMARY_VM_ID: u16 = VM_ID_OFFSET;
/// Endpoint ID of the TEE in the other world.
pub const OTHER_WORLD_ID: u16 = 0;

// ── Capacities ───────────────────────────────────────────────────────
pub const MAX_VMS: usize = 16;
pub const MAX_SMCS: usize = 32;
pub const SP_MAX_MEMORY_REGIONS: usize = 8;
pub const SP_MAX_DEVICE_REGIONS: usize = 8;
pub const SP_MAX_INTERRUPTS_PER_DEVICE: usize = 4;
pub const SP_MAX_STREAMS_PER_DEVICE: usize = 4;
/// Capacity of a manifest string, NUL terminator included.
pub const STRING_MAX_SIZE: usize = 32;

/// Highest partition ID the manifest can describe.
pub const VM_ID_MAX: u16 = VM_ID_OFFSET + MAX_VMS as u16 - 1;

const _: () = assert!(VM_ID_MAX as u32 <= 99_999, "VM node names hold at most five digits");
const _: () = assert!(
    OTHER_WORLD_ID > VM_ID_MAX || OTHER_WORLD_ID < VM_ID_OFFSET,
    "TEE endpoint ID clashes with the partition range"
);

/// Rounds `value` up to the next page boundary.
pub const fn page_align_up(value: u64) -> u64 {
    (value + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

pub const fn is_page_aligned(value: u64) -> bool {
    value & (PAGE_SIZE - 1) == 0
}
