//! Secure partition package header.
//!
//! An SP package starts with a fixed header that locates the partition
//! manifest (a DTB) and the image. The manifest must immediately follow
//! the header.
//!
//! ```text
//! +0   magic       u32  "SPKG"
//! +4   version     u32
//! +8   pm_offset   u32  == header size
//! +12  pm_size     u32
//! +16  img_offset  u32
//! +20  img_size    u32
//! ```
//!
//! All fields are little-endian.

use crate::manifest::ManifestError;
use crate::mm::{ScopedMapping, Stage1};
use crate::platform::{is_page_aligned, page_align_up, PAGE_SIZE};

pub const SP_PKG_HEADER_MAGIC: u32 = 0x474b_5053;
pub const SP_PKG_HEADER_VERSION: u32 = 1;
pub const SP_PKG_HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpPkgHeader {
    pub magic: u32,
    pub version: u32,
    pub pm_offset: u32,
    pub pm_size: u32,
    pub img_offset: u32,
    pub img_size: u32,
}

fn le_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let word = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(word.try_into().ok()?))
}

impl SpPkgHeader {
    /// A header describing a manifest of `pm_size` bytes right after it.
    pub const fn new(pm_size: u32, img_offset: u32, img_size: u32) -> Self {
        Self {
            magic: SP_PKG_HEADER_MAGIC,
            version: SP_PKG_HEADER_VERSION,
            pm_offset: SP_PKG_HEADER_SIZE as u32,
            pm_size,
            img_offset,
            img_size,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            magic: le_u32(bytes, 0)?,
            version: le_u32(bytes, 4)?,
            pm_offset: le_u32(bytes, 8)?,
            pm_size: le_u32(bytes, 12)?,
            img_offset: le_u32(bytes, 16)?,
            img_size: le_u32(bytes, 20)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; SP_PKG_HEADER_SIZE] {
        let mut out = [0u8; SP_PKG_HEADER_SIZE];
        let fields = [
            self.magic,
            self.version,
            self.pm_offset,
            self.pm_size,
            self.img_offset,
            self.img_size,
        ];
        for (chunk, field) in out.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        out
    }

    /// Check magic, version and manifest placement, in that order.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.magic != SP_PKG_HEADER_MAGIC {
            log::error!("Invalid SP package magic {:#x}", self.magic);
            return Err(ManifestError::NotCompatible);
        }
        if self.version != SP_PKG_HEADER_VERSION {
            log::error!("Invalid SP package version {}", self.version);
            return Err(ManifestError::NotCompatible);
        }
        if self.pm_offset as usize != SP_PKG_HEADER_SIZE {
            log::error!("Invalid SP package manifest offset {:#x}", self.pm_offset);
            return Err(ManifestError::NotCompatible);
        }
        Ok(())
    }

    /// Page-aligned size of header plus manifest.
    pub fn span(&self) -> u64 {
        page_align_up(u64::from(self.pm_size) + SP_PKG_HEADER_SIZE as u64)
    }
}

/// Map the package at `load_address`, validate its header and run `parse`
/// over the embedded manifest bytes.
///
/// `mem_budget` is the partition's memory size; the header and manifest
/// must fit strictly inside it. The primary has no budget. The mapping is
/// removed before returning, whatever the outcome.
pub fn with_package_manifest<S, R, F>(
    stage1: &mut S,
    load_address: u64,
    mem_budget: Option<u64>,
    parse: F,
) -> Result<R, ManifestError>
where
    S: Stage1 + ?Sized,
    F: FnOnce(&[u8]) -> Result<R, ManifestError>,
{
    if !is_page_aligned(load_address) {
        log::error!("SP package load address {:#x} is not page aligned", load_address);
        return Err(ManifestError::NotCompatible);
    }
    let page_end = load_address
        .checked_add(PAGE_SIZE)
        .ok_or(ManifestError::NotCompatible)?;

    // Map only the first page until the header says how much follows.
    let mut mapping = ScopedMapping::map_read(stage1, load_address, page_end).map_err(|err| {
        log::error!("Cannot map SP package at {:#x}: {}", load_address, err);
        ManifestError::MapFailed
    })?;
    log::debug!("SP package load address {:#x}", load_address);

    let header = mapping
        .bytes()
        .and_then(SpPkgHeader::from_bytes)
        .ok_or(ManifestError::MapFailed)?;
    header.validate()?;

    let span = header.span();
    if mem_budget.is_some_and(|mem_size| span >= mem_size) {
        log::error!("Invalid SP package header or DT size");
        return Err(ManifestError::NotCompatible);
    }

    if span > PAGE_SIZE {
        let end = load_address
            .checked_add(span)
            .ok_or(ManifestError::NotCompatible)?;
        mapping.extend_to(end).map_err(|err| {
            log::error!("Cannot map SP package manifest: {}", err);
            ManifestError::MapFailed
        })?;
    }

    let start = header.pm_offset as usize;
    let manifest = mapping
        .bytes()
        .and_then(|bytes| bytes.get(start..start + header.pm_size as usize))
        .ok_or(ManifestError::MapFailed)?;

    parse(manifest)
}
