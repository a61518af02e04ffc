//! FF-A v1.0 Memory Region Descriptor encoding (DEN0077A §5.12).
//!
//! Builders write the descriptor a partition places in its TX buffer for
//! MEM_SHARE / MEM_LEND / MEM_DONATE / MEM_RETRIEVE_REQ, and the one the
//! hypervisor returns in MEM_RETRIEVE_RESP. [`MemoryRegionDescriptor`]
//! reads them back with bounds checks. All fields are little-endian.
//!
//! ```text
//! 0x00  memory region header            32 bytes
//! 0x20  memory access descriptor[n]     16 bytes each
//! ....  composite memory region         16 bytes
//! ....  constituent[m]                  16 bytes each
//! ```
//!
//! Every block is a multiple of 16 bytes, so a composite region placed
//! after the access descriptors is always 64-bit aligned.

use crate::ffa::handle::MemoryHandle;
use crate::ffa::{FFA_INVALID_PARAMETERS, FFA_NO_MEMORY};

pub const MEMORY_REGION_HEADER_SIZE: usize = 32;
pub const MEMORY_ACCESS_SIZE: usize = 16;
pub const COMPOSITE_HEADER_SIZE: usize = 16;
pub const CONSTITUENT_SIZE: usize = 16;

const _: () = assert!(MEMORY_REGION_HEADER_SIZE % 16 == 0);
const _: () = assert!(MEMORY_ACCESS_SIZE % 16 == 0);
const _: () = assert!(COMPOSITE_HEADER_SIZE % 16 == 0);
const _: () = assert!(CONSTITUENT_SIZE % 16 == 0);

// Header field offsets.
const SENDER: usize = 0;
const ATTRIBUTES: usize = 2;
const FLAGS: usize = 4;
const HANDLE: usize = 8;
const TAG: usize = 16;
const RECEIVER_COUNT: usize = 28;

// Memory access descriptor field offsets.
const ACCESS_RECEIVER: usize = 0;
const ACCESS_PERMISSIONS: usize = 2;
const ACCESS_FLAGS: usize = 3;
const ACCESS_COMPOSITE_OFFSET: usize = 4;

/// Clear memory before mapping it into the receiver.
pub const FFA_MEMORY_REGION_FLAG_CLEAR: u32 = 1 << 0;
/// Clear memory after the receiver relinquishes it.
pub const FFA_MEMORY_REGION_FLAG_CLEAR_RELINQUISH: u32 = 1 << 1;
const TRANSACTION_TYPE_SHIFT: u32 = 3;
const TRANSACTION_TYPE_MASK: u32 = 0b11 << TRANSACTION_TYPE_SHIFT;

/// Transaction type carried in the flags of a retrieve request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Unspecified = 0,
    Share = 1,
    Lend = 2,
    Donate = 3,
}

impl TransactionType {
    pub const fn to_flags(self) -> u32 {
        (self as u32) << TRANSACTION_TYPE_SHIFT
    }

    pub const fn from_flags(flags: u32) -> Self {
        match (flags & TRANSACTION_TYPE_MASK) >> TRANSACTION_TYPE_SHIFT {
            1 => Self::Share,
            2 => Self::Lend,
            3 => Self::Donate,
            _ => Self::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataAccess {
    NotSpecified = 0,
    ReadOnly = 1,
    ReadWrite = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionAccess {
    NotSpecified = 0,
    NotExecutable = 1,
    Executable = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    NotSpecified = 0,
    Device = 1,
    Normal = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cacheability {
    NonCacheable = 1,
    WriteBack = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shareability {
    NonShareable = 0,
    Outer = 2,
    Inner = 3,
}

/// Receiver permissions (Table 5.15): data access in bits [1:0],
/// instruction access in bits [3:2].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAccessPermissions(pub u8);

impl MemoryAccessPermissions {
    const DATA_SHIFT: u8 = 0;
    const INSTRUCTION_SHIFT: u8 = 2;

    pub const fn new(data: DataAccess, instruction: InstructionAccess) -> Self {
        Self(((data as u8) << Self::DATA_SHIFT) | ((instruction as u8) << Self::INSTRUCTION_SHIFT))
    }

    pub const fn data_access(self) -> Option<DataAccess> {
        match (self.0 >> Self::DATA_SHIFT) & 0b11 {
            0 => Some(DataAccess::NotSpecified),
            1 => Some(DataAccess::ReadOnly),
            2 => Some(DataAccess::ReadWrite),
            _ => None,
        }
    }

    pub const fn instruction_access(self) -> Option<InstructionAccess> {
        match (self.0 >> Self::INSTRUCTION_SHIFT) & 0b11 {
            0 => Some(InstructionAccess::NotSpecified),
            1 => Some(InstructionAccess::NotExecutable),
            2 => Some(InstructionAccess::Executable),
            _ => None,
        }
    }
}

/// Memory region attributes (Table 5.18): type in bits [5:4],
/// cacheability in [3:2], shareability in [1:0].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAttributes(pub u8);

impl MemoryAttributes {
    const TYPE_SHIFT: u8 = 4;
    const CACHEABILITY_SHIFT: u8 = 2;
    const SHAREABILITY_SHIFT: u8 = 0;

    pub const fn new(
        memory_type: MemoryType,
        cacheability: Cacheability,
        shareability: Shareability,
    ) -> Self {
        Self(
            ((memory_type as u8) << Self::TYPE_SHIFT)
                | ((cacheability as u8) << Self::CACHEABILITY_SHIFT)
                | ((shareability as u8) << Self::SHAREABILITY_SHIFT),
        )
    }

    pub const fn memory_type(self) -> Option<MemoryType> {
        match (self.0 >> Self::TYPE_SHIFT) & 0b11 {
            0 => Some(MemoryType::NotSpecified),
            1 => Some(MemoryType::Device),
            2 => Some(MemoryType::Normal),
            _ => None,
        }
    }

    pub const fn cacheability(self) -> Option<Cacheability> {
        match (self.0 >> Self::CACHEABILITY_SHIFT) & 0b11 {
            1 => Some(Cacheability::NonCacheable),
            3 => Some(Cacheability::WriteBack),
            _ => None,
        }
    }

    pub const fn shareability(self) -> Option<Shareability> {
        match (self.0 >> Self::SHAREABILITY_SHIFT) & 0b11 {
            0 => Some(Shareability::NonShareable),
            2 => Some(Shareability::Outer),
            3 => Some(Shareability::Inner),
            _ => None,
        }
    }
}

/// One contiguous run of pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constituent {
    /// Base IPA, page aligned.
    pub address: u64,
    pub page_count: u32,
}

/// Per-receiver entry (Table 5.16).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAccess {
    pub receiver: u16,
    pub permissions: MemoryAccessPermissions,
    pub flags: u8,
    /// Offset of the composite region from the start of the descriptor;
    /// 0 lets the hypervisor choose.
    pub composite_offset: u32,
}

/// Sender-side description of a single-receiver transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub sender: u16,
    pub receiver: u16,
    pub attributes: MemoryAttributes,
    pub permissions: MemoryAccessPermissions,
    pub flags: u32,
    pub tag: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("descriptor needs {needed} bytes, buffer holds {available}")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("descriptor truncated")]
    Truncated,
    #[error("composite region offset {0:#x} is not 16-byte aligned")]
    MisalignedOffset(u32),
    #[error("receiver index {0} out of range")]
    ReceiverOutOfRange(usize),
    #[error("total page count overflows")]
    PageCountOverflow,
}

impl DescriptorError {
    /// FF-A error code reported to the caller.
    pub const fn ffa_error(self) -> i32 {
        match self {
            Self::BufferTooSmall { .. } => FFA_NO_MEMORY,
            _ => FFA_INVALID_PARAMETERS,
        }
    }
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(word)
}

fn get_u64(buf: &[u8], offset: usize) -> u64 {
    let mut dword = [0u8; 8];
    dword.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(dword)
}

/// Zero the first `needed` bytes of `buf`, or fail if it is shorter.
fn claim(buf: &mut [u8], needed: usize) -> Result<&mut [u8], DescriptorError> {
    let available = buf.len();
    let out = buf
        .get_mut(..needed)
        .ok_or(DescriptorError::BufferTooSmall { needed, available })?;
    out.fill(0);
    Ok(out)
}

fn write_header(
    buf: &mut [u8],
    sender: u16,
    attributes: MemoryAttributes,
    flags: u32,
    handle: MemoryHandle,
    tag: u64,
    receiver_count: u32,
) {
    put_u16(buf, SENDER, sender);
    buf[ATTRIBUTES] = attributes.0;
    put_u32(buf, FLAGS, flags);
    put_u64(buf, HANDLE, handle.0);
    put_u64(buf, TAG, tag);
    put_u32(buf, RECEIVER_COUNT, receiver_count);
}

fn write_access(buf: &mut [u8], index: usize, access: &MemoryAccess) {
    let base = MEMORY_REGION_HEADER_SIZE + index * MEMORY_ACCESS_SIZE;
    put_u16(buf, base + ACCESS_RECEIVER, access.receiver);
    buf[base + ACCESS_PERMISSIONS] = access.permissions.0;
    buf[base + ACCESS_FLAGS] = access.flags;
    put_u32(buf, base + ACCESS_COMPOSITE_OFFSET, access.composite_offset);
}

/// Copy `constituents` behind the composite header at `offset`, filling
/// in the header's counts. The page count is the sum of the constituents.
fn write_composite(
    buf: &mut [u8],
    offset: usize,
    constituents: &[Constituent],
) -> Result<(), DescriptorError> {
    let mut page_count: u32 = 0;
    let mut cursor = offset + COMPOSITE_HEADER_SIZE;

    for constituent in constituents {
        put_u64(buf, cursor, constituent.address);
        put_u32(buf, cursor + 8, constituent.page_count);
        page_count = page_count
            .checked_add(constituent.page_count)
            .ok_or(DescriptorError::PageCountOverflow)?;
        cursor += CONSTITUENT_SIZE;
    }

    let constituent_count =
        u32::try_from(constituents.len()).map_err(|_| DescriptorError::PageCountOverflow)?;
    put_u32(buf, offset, page_count);
    put_u32(buf, offset + 4, constituent_count);
    Ok(())
}

/// Shared by the share/lend/donate and retrieve-response builders: one
/// receiver, composite region right after its access descriptor.
fn memory_region_init_internal(
    buf: &mut [u8],
    tx: &Transaction,
    handle: MemoryHandle,
    constituents: &[Constituent],
) -> Result<usize, DescriptorError> {
    let composite_offset = MEMORY_REGION_HEADER_SIZE + MEMORY_ACCESS_SIZE;
    let needed = constituents
        .len()
        .checked_mul(CONSTITUENT_SIZE)
        .and_then(|len| len.checked_add(composite_offset + COMPOSITE_HEADER_SIZE))
        .ok_or(DescriptorError::BufferTooSmall {
            needed: usize::MAX,
            available: buf.len(),
        })?;
    let composite_offset_field =
        u32::try_from(composite_offset).map_err(|_| DescriptorError::Truncated)?;

    let out = claim(buf, needed)?;
    write_header(out, tx.sender, tx.attributes, tx.flags, handle, tx.tag, 1);
    write_access(
        out,
        0,
        &MemoryAccess {
            receiver: tx.receiver,
            permissions: tx.permissions,
            flags: 0,
            composite_offset: composite_offset_field,
        },
    );
    write_composite(out, composite_offset, constituents)?;

    Ok(needed)
}

/// Build the descriptor for MEM_SHARE / MEM_LEND / MEM_DONATE.
///
/// The handle is left 0 for the hypervisor to assign. Returns the number
/// of bytes written.
pub fn memory_region_init(
    buf: &mut [u8],
    tx: &Transaction,
    constituents: &[Constituent],
) -> Result<usize, DescriptorError> {
    memory_region_init_internal(buf, tx, MemoryHandle(0), constituents)
}

/// Build a MEM_RETRIEVE_REQ for `handle` on behalf of `tx.receiver`.
///
/// The composite offset is 0: the hypervisor decides where the pages go.
pub fn memory_retrieve_request_init(
    buf: &mut [u8],
    handle: MemoryHandle,
    tx: &Transaction,
) -> Result<usize, DescriptorError> {
    let needed = MEMORY_REGION_HEADER_SIZE + MEMORY_ACCESS_SIZE;
    let out = claim(buf, needed)?;

    write_header(out, tx.sender, tx.attributes, tx.flags, handle, tx.tag, 1);
    write_access(
        out,
        0,
        &MemoryAccess {
            receiver: tx.receiver,
            permissions: tx.permissions,
            flags: 0,
            composite_offset: 0,
        },
    );

    Ok(needed)
}

/// Build the minimal retrieve request a lender sends to query its own
/// transaction: sender and handle only, no receivers.
pub fn memory_lender_retrieve_request_init(
    buf: &mut [u8],
    handle: MemoryHandle,
    sender: u16,
) -> Result<usize, DescriptorError> {
    let out = claim(buf, MEMORY_REGION_HEADER_SIZE)?;
    write_header(out, sender, MemoryAttributes(0), 0, handle, 0, 0);
    Ok(MEMORY_REGION_HEADER_SIZE)
}

/// Build the MEM_RETRIEVE_RESP descriptor for a receiver.
///
/// Attributes and permissions are taken as given (already merged across
/// receivers by the caller); the original `handle` is kept.
pub fn retrieved_memory_region_init(
    buf: &mut [u8],
    handle: MemoryHandle,
    tx: &Transaction,
    constituents: &[Constituent],
) -> Result<usize, DescriptorError> {
    memory_region_init_internal(buf, tx, handle, constituents)
}

/// Bounds-checked view of a descriptor in a TX/RX buffer.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegionDescriptor<'a> {
    bytes: &'a [u8],
}

impl<'a> MemoryRegionDescriptor<'a> {
    /// Check the header and access descriptor array fit in `bytes`.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, DescriptorError> {
        if bytes.len() < MEMORY_REGION_HEADER_SIZE {
            return Err(DescriptorError::Truncated);
        }
        let receivers = usize::try_from(get_u32(bytes, RECEIVER_COUNT))
            .map_err(|_| DescriptorError::Truncated)?;
        let end = receivers
            .checked_mul(MEMORY_ACCESS_SIZE)
            .and_then(|len| len.checked_add(MEMORY_REGION_HEADER_SIZE))
            .ok_or(DescriptorError::Truncated)?;
        if end > bytes.len() {
            return Err(DescriptorError::Truncated);
        }
        Ok(Self { bytes })
    }

    pub fn sender(&self) -> u16 {
        get_u16(self.bytes, SENDER)
    }

    pub fn attributes(&self) -> MemoryAttributes {
        MemoryAttributes(self.bytes[ATTRIBUTES])
    }

    pub fn flags(&self) -> u32 {
        get_u32(self.bytes, FLAGS)
    }

    pub fn transaction_type(&self) -> TransactionType {
        TransactionType::from_flags(self.flags())
    }

    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle(get_u64(self.bytes, HANDLE))
    }

    pub fn tag(&self) -> u64 {
        get_u64(self.bytes, TAG)
    }

    pub fn receiver_count(&self) -> usize {
        get_u32(self.bytes, RECEIVER_COUNT) as usize
    }

    pub fn receiver(&self, index: usize) -> Result<MemoryAccess, DescriptorError> {
        if index >= self.receiver_count() {
            return Err(DescriptorError::ReceiverOutOfRange(index));
        }
        let base = MEMORY_REGION_HEADER_SIZE + index * MEMORY_ACCESS_SIZE;
        Ok(MemoryAccess {
            receiver: get_u16(self.bytes, base + ACCESS_RECEIVER),
            permissions: MemoryAccessPermissions(self.bytes[base + ACCESS_PERMISSIONS]),
            flags: self.bytes[base + ACCESS_FLAGS],
            composite_offset: get_u32(self.bytes, base + ACCESS_COMPOSITE_OFFSET),
        })
    }

    /// Composite region referenced by receiver `index`, or `None` when the
    /// offset is 0 (hypervisor-chosen layout).
    pub fn composite(
        &self,
        index: usize,
    ) -> Result<Option<CompositeMemoryRegion<'a>>, DescriptorError> {
        let offset = self.receiver(index)?.composite_offset;
        if offset == 0 {
            return Ok(None);
        }
        if offset as usize % 16 != 0 {
            return Err(DescriptorError::MisalignedOffset(offset));
        }

        let start = offset as usize;
        let header = self
            .bytes
            .get(start..start + COMPOSITE_HEADER_SIZE)
            .ok_or(DescriptorError::Truncated)?;
        let page_count = get_u32(header, 0);
        let constituent_count = get_u32(header, 4) as usize;

        let body_start = start + COMPOSITE_HEADER_SIZE;
        let body_end = constituent_count
            .checked_mul(CONSTITUENT_SIZE)
            .and_then(|len| len.checked_add(body_start))
            .ok_or(DescriptorError::Truncated)?;
        let constituents = self
            .bytes
            .get(body_start..body_end)
            .ok_or(DescriptorError::Truncated)?;

        Ok(Some(CompositeMemoryRegion {
            page_count,
            constituents,
        }))
    }
}

/// The page runs of a transaction.
#[derive(Debug, Clone, Copy)]
pub struct CompositeMemoryRegion<'a> {
    pub page_count: u32,
    constituents: &'a [u8],
}

impl<'a> CompositeMemoryRegion<'a> {
    pub fn constituent_count(&self) -> usize {
        self.constituents.len() / CONSTITUENT_SIZE
    }

    pub fn constituents(&self) -> impl Iterator<Item = Constituent> + 'a {
        self.constituents
            .chunks_exact(CONSTITUENT_SIZE)
            .map(|chunk| Constituent {
                address: get_u64(chunk, 0),
                page_count: get_u32(chunk, 8),
            })
    }
}
