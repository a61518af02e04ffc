//! Manifest DTB (Device Tree Blob) access
//!
//! Thin navigation layer over the `fdt` crate: find nodes by path or by
//! child name, read raw property bytes, walk children and test
//! "compatible" markers. Everything the manifest parser learns about the
//! blob goes through here.
//!
//! The `fdt` crate parses in place, so no heap allocation is needed.
//! It trusts the structure block once the header passes, so every blob
//! is walked once here before it is handed over. The blob is borrowed
//! immutably for the whole parse.

use core::ops::Range;

use fdt::node::FdtNode;
use fdt::Fdt;

use crate::manifest::ManifestError;

/// FDT header magic, big-endian on the wire.
pub const FDT_MAGIC: u32 = 0xD00D_FEED;

const FDT_HEADER_SIZE: usize = 40;

const FDT_BEGIN_NODE: u32 = 0x1;
const FDT_END_NODE: u32 = 0x2;
const FDT_PROP: u32 = 0x3;
const FDT_NOP: u32 = 0x4;
const FDT_END: u32 = 0x9;

/// Deepest node nesting accepted. The `fdt` walker recurses once per level.
const MAX_DEPTH: usize = 64;

// Header field offsets
const OFF_MAGIC: usize = 0;
const OFF_TOTALSIZE: usize = 4;
const OFF_DT_STRUCT: usize = 8;
const OFF_DT_STRINGS: usize = 12;
const OFF_SIZE_DT_STRINGS: usize = 32;
const OFF_SIZE_DT_STRUCT: usize = 36;

fn be32(bytes: &[u8], offset: usize) -> Option<u32> {
    let word = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes(word.try_into().ok()?))
}

fn align4(offset: usize) -> Option<usize> {
    Some(offset.checked_add(3)? & !3)
}

/// NUL-terminated UTF-8 string starting at `offset`.
fn c_str(bytes: &[u8], offset: usize) -> Option<&str> {
    let tail = bytes.get(offset..)?;
    let len = tail.iter().position(|&b| b == 0)?;
    core::str::from_utf8(&tail[..len]).ok()
}

/// Check the header and locate the structure and strings blocks.
fn check_header(blob: &[u8]) -> Result<(Range<usize>, Range<usize>), ManifestError> {
    let field = |offset| be32(blob, offset).ok_or(ManifestError::FileSize);

    if blob.len() < FDT_HEADER_SIZE {
        log::error!("FDT: {} bytes is smaller than the header", blob.len());
        return Err(ManifestError::FileSize);
    }
    if field(OFF_MAGIC)? != FDT_MAGIC {
        return Err(ManifestError::MalformedDtb);
    }
    let total_size = field(OFF_TOTALSIZE)? as usize;
    if total_size != blob.len() {
        log::error!("FDT: header size {:#x}, blob size {:#x}", total_size, blob.len());
        return Err(ManifestError::FileSize);
    }

    let block = |offset: u32, size: u32| {
        let start = offset as usize;
        let end = start.checked_add(size as usize)?;
        (end <= total_size).then_some(start..end)
    };
    let structs = block(field(OFF_DT_STRUCT)?, field(OFF_SIZE_DT_STRUCT)?);
    let strings = block(field(OFF_DT_STRINGS)?, field(OFF_SIZE_DT_STRINGS)?);
    match (structs, strings) {
        (Some(structs), Some(strings)) => Ok((structs, strings)),
        _ => {
            log::error!("FDT: block outside the blob");
            Err(ManifestError::MalformedDtb)
        }
    }
}

/// Walk the structure block token by token.
///
/// A node is `BEGIN_NODE name PROP* node* END_NODE`; properties never
/// follow a child. `NOP` is only accepted directly before `END_NODE` or
/// `END`, the places the `fdt` reader skips it. Every name must be a
/// NUL-terminated UTF-8 string inside its block.
fn check_structure(structs: &[u8], strings: &[u8]) -> Option<()> {
    let mut offset = 0;
    let mut depth = 0;
    let mut root_closed = false;
    let mut props_allowed = false;
    let mut after_nop = false;

    loop {
        let token = be32(structs, offset)?;
        offset += 4;

        if after_nop && !matches!(token, FDT_NOP | FDT_END_NODE | FDT_END) {
            return None;
        }
        after_nop = false;

        match token {
            FDT_BEGIN_NODE => {
                if root_closed || depth == MAX_DEPTH {
                    return None;
                }
                let name = c_str(structs, offset)?;
                offset = align4(offset.checked_add(name.len() + 1)?)?;
                depth += 1;
                props_allowed = true;
            }
            FDT_PROP => {
                if !props_allowed {
                    return None;
                }
                let len = be32(structs, offset)? as usize;
                let name_offset = be32(structs, offset + 4)? as usize;
                c_str(strings, name_offset)?;
                let end = (offset + 8).checked_add(len)?;
                if end > structs.len() {
                    return None;
                }
                offset = align4(end)?;
            }
            FDT_NOP => after_nop = true,
            FDT_END_NODE => {
                depth = depth.checked_sub(1)?;
                props_allowed = false;
                root_closed = depth == 0;
            }
            FDT_END => return root_closed.then_some(()),
            _ => return None,
        }
    }
}

/// A structurally validated device tree blob.
pub struct DeviceTree<'a> {
    fdt: Fdt<'a>,
}

impl<'a> DeviceTree<'a> {
    /// Validate the blob and wrap it.
    ///
    /// A header total size that differs from the buffer length is a
    /// file-size error. Any other structural problem, in the header or in
    /// the structure and strings blocks, is reported as a malformed blob.
    pub fn from_bytes(blob: &'a [u8]) -> Result<Self, ManifestError> {
        let (structs, strings) = check_header(blob)?;
        check_structure(&blob[structs], &blob[strings]).ok_or_else(|| {
            log::error!("FDT: corrupt structure block");
            ManifestError::MalformedDtb
        })?;

        let fdt = Fdt::new(blob).map_err(|_| ManifestError::MalformedDtb)?;
        log::debug!("FDT: {} bytes", fdt.total_size());
        Ok(Self { fdt })
    }

    /// Total size recorded in the FDT header.
    pub fn total_size(&self) -> usize {
        self.fdt.total_size()
    }

    /// Look up a node by absolute path, e.g. `/hypervisor`.
    ///
    /// Each path component must match a child's full name, unit address
    /// included.
    pub fn find_node(&self, path: &str) -> Option<Node<'_, 'a>> {
        path.split('/')
            .filter(|component| !component.is_empty())
            .try_fold(self.root()?, |node, component| node.find_child(component))
    }

    /// The root node.
    pub fn root(&self) -> Option<Node<'_, 'a>> {
        self.fdt.find_node("/").map(|inner| Node { inner })
    }
}

/// A node within a [`DeviceTree`].
#[derive(Clone, Copy)]
pub struct Node<'b, 'a> {
    inner: FdtNode<'b, 'a>,
}

impl<'b, 'a> Node<'b, 'a> {
    /// Node name including any unit address.
    pub fn name(&self) -> &'a str {
        self.inner.name
    }

    /// Find a direct child whose name matches exactly.
    pub fn find_child(&self, name: &str) -> Option<Node<'b, 'a>> {
        self.children().find(|child| child.name() == name)
    }

    /// Iterate direct children in file order.
    pub fn children(&self) -> impl Iterator<Item = Node<'b, 'a>> {
        self.inner.children().map(|inner| Node { inner })
    }

    /// Raw property bytes, or `None` if the property is absent.
    pub fn property(&self, name: &str) -> Option<&'a [u8]> {
        self.inner.property(name).map(|prop| prop.value)
    }

    /// True if any entry of the node's "compatible" list equals `marker`.
    pub fn is_compatible(&self, marker: &str) -> bool {
        self.inner
            .compatible()
            .is_some_and(|compatible| compatible.all().any(|entry| entry == marker))
    }
}
