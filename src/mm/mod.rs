//! Memory management interface
//!
//! The page-table implementation lives outside this crate. Parsing only
//! needs to borrow physical memory through the hypervisor's own stage-1
//! tables, so this module defines the contract ([`Stage1`]) and a scoped
//! read-only mapping ([`ScopedMapping`]) that is torn down on drop.

use bitflags::bitflags;

bitflags! {
    /// Mapping mode bits, shared by stage-1 mappings and manifest region
    /// attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MemoryMode: u32 {
        const R = 1 << 0;
        const W = 1 << 1;
        const X = 1 << 2;
        /// Device memory.
        const D = 1 << 3;

        const PERM = Self::R.bits() | Self::W.bits() | Self::X.bits();
    }
}

impl MemoryMode {
    /// Keep only the access permission bits of a raw attribute value.
    pub const fn permissions_of(raw: u32) -> Self {
        Self::from_bits_truncate(raw & Self::PERM.bits())
    }
}

/// The hypervisor's own (stage-1) address space.
///
/// Implementations must serialize mutation with any other mapping activity;
/// holding `&mut` for the duration of a parse is how callers prove it.
pub trait Stage1 {
    /// Identity-map the physical range `[begin, end)` with `mode`.
    fn identity_map(&mut self, begin: u64, end: u64, mode: MemoryMode) -> Result<(), &'static str>;

    /// Remove the mapping for `[begin, end)`.
    fn unmap(&mut self, begin: u64, end: u64) -> Result<(), &'static str>;

    /// View of `[begin, end)` through an existing mapping.
    fn mapped(&self, begin: u64, end: u64) -> Option<&[u8]>;
}

impl<T: Stage1 + ?Sized> Stage1 for &mut T {
    fn identity_map(&mut self, begin: u64, end: u64, mode: MemoryMode) -> Result<(), &'static str> {
        (**self).identity_map(begin, end, mode)
    }

    fn unmap(&mut self, begin: u64, end: u64) -> Result<(), &'static str> {
        (**self).unmap(begin, end)
    }

    fn mapped(&self, begin: u64, end: u64) -> Option<&[u8]> {
        (**self).mapped(begin, end)
    }
}

/// A read-only identity mapping that is unmapped when dropped.
pub struct ScopedMapping<'m, S: Stage1 + ?Sized> {
    stage1: &'m mut S,
    begin: u64,
    end: u64,
}

impl<'m, S: Stage1 + ?Sized> ScopedMapping<'m, S> {
    pub fn map_read(stage1: &'m mut S, begin: u64, end: u64) -> Result<Self, &'static str> {
        stage1.identity_map(begin, end, MemoryMode::R)?;
        Ok(Self { stage1, begin, end })
    }

    /// Grow the mapping so it covers `[begin, end)`.
    pub fn extend_to(&mut self, end: u64) -> Result<(), &'static str> {
        if end <= self.end {
            return Ok(());
        }
        self.stage1.identity_map(self.begin, end, MemoryMode::R)?;
        self.end = end;
        Ok(())
    }

    pub fn begin(&self) -> u64 {
        self.begin
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// The whole mapped span.
    pub fn bytes(&self) -> Option<&[u8]> {
        self.stage1.mapped(self.begin, self.end)
    }
}

impl<S: Stage1 + ?Sized> Drop for ScopedMapping<'_, S> {
    fn drop(&mut self) {
        if let Err(err) = self.stage1.unmap(self.begin, self.end) {
            log::error!("unmap {:#x}..{:#x} failed: {}", self.begin, self.end, err);
        }
    }
}
