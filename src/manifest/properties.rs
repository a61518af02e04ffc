//! Typed property decoders.
//!
//! Each reader turns a named property of a [`Node`] into a validated value
//! or a specific [`ManifestError`]. A missing property is always reported as
//! [`ManifestError::PropertyNotFound`]; the `read_optional_*` wrappers turn
//! exactly that outcome into a caller-supplied default and pass every other
//! error through.

use core::fmt;

use crate::dtb::Node;
use crate::manifest::ManifestError;
use crate::platform::STRING_MAX_SIZE;

const ADDRESS_CELLS: &str = "#address-cells";
const SIZE_CELLS: &str = "#size-cells";

/// Fixed-capacity, NUL-free copy of a manifest string property.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ManifestString {
    data: [u8; STRING_MAX_SIZE],
    len: usize,
}

impl ManifestString {
    pub const fn empty() -> Self {
        Self {
            data: [0; STRING_MAX_SIZE],
            len: 0,
        }
    }

    /// Build from raw property bytes.
    ///
    /// The value must contain exactly one NUL byte, as its last byte, and
    /// the whole value (terminator included) must fit `STRING_MAX_SIZE`.
    pub fn from_property(bytes: &[u8]) -> Result<Self, ManifestError> {
        let nul = bytes.iter().position(|&b| b == 0);
        if bytes.is_empty() || nul != Some(bytes.len() - 1) {
            return Err(ManifestError::MalformedString);
        }
        if bytes.len() > STRING_MAX_SIZE {
            return Err(ManifestError::StringTooLong);
        }

        let text = &bytes[..bytes.len() - 1];
        if core::str::from_utf8(text).is_err() {
            return Err(ManifestError::MalformedString);
        }

        let mut out = Self::empty();
        out.data[..text.len()].copy_from_slice(text);
        out.len = text.len();
        Ok(out)
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.data[..self.len]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for ManifestString {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ManifestString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for ManifestString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<&str> for ManifestString {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// Cursor over a list of big-endian `u32` cells.
#[derive(Clone, Debug)]
pub struct U32ListIter<'a> {
    data: &'a [u8],
}

impl<'a> U32ListIter<'a> {
    pub const fn empty() -> Self {
        Self { data: &[] }
    }

    pub fn has_next(&self) -> bool {
        !self.data.is_empty()
    }
}

impl Iterator for U32ListIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let (word, rest) = self.data.split_first_chunk::<4>()?;
        self.data = rest;
        Some(u32::from_be_bytes(*word))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.data.len() / 4;
        (n, Some(n))
    }
}

/// Map "property not found" to `default`, keep every other outcome.
fn or_default<T>(result: Result<T, ManifestError>, default: T) -> Result<T, ManifestError> {
    match result {
        Err(ManifestError::PropertyNotFound) => Ok(default),
        other => other,
    }
}

/// Decode a 4- or 8-byte big-endian number.
fn parse_number(bytes: &[u8]) -> Result<u64, ManifestError> {
    if let Ok(word) = <[u8; 4]>::try_from(bytes) {
        return Ok(u32::from_be_bytes(word).into());
    }
    if let Ok(dword) = <[u8; 8]>::try_from(bytes) {
        return Ok(u64::from_be_bytes(dword));
    }
    Err(ManifestError::MalformedInteger)
}

/// True if present with an empty value, false if absent.
pub fn read_bool(node: &Node<'_, '_>, name: &str) -> Result<bool, ManifestError> {
    match node.property(name) {
        None => Ok(false),
        Some([]) => Ok(true),
        Some(_) => Err(ManifestError::MalformedBoolean),
    }
}

pub fn read_string(node: &Node<'_, '_>, name: &str) -> Result<ManifestString, ManifestError> {
    let bytes = node.property(name).ok_or(ManifestError::PropertyNotFound)?;
    ManifestString::from_property(bytes)
}

/// Like [`read_string`], but an absent property yields the empty string.
pub fn read_optional_string(
    node: &Node<'_, '_>,
    name: &str,
) -> Result<ManifestString, ManifestError> {
    or_default(read_string(node, name), ManifestString::empty())
}

pub fn read_u64(node: &Node<'_, '_>, name: &str) -> Result<u64, ManifestError> {
    let bytes = node.property(name).ok_or(ManifestError::PropertyNotFound)?;
    parse_number(bytes)
}

/// Read an integer and narrow it to `T`, failing with
/// [`ManifestError::IntegerOverflow`] if it does not fit.
pub fn read_uint<T: TryFrom<u64>>(node: &Node<'_, '_>, name: &str) -> Result<T, ManifestError> {
    let value = read_u64(node, name)?;
    T::try_from(value).map_err(|_| ManifestError::IntegerOverflow)
}

pub fn read_optional_uint<T: TryFrom<u64>>(
    node: &Node<'_, '_>,
    name: &str,
    default: T,
) -> Result<T, ManifestError> {
    or_default(read_uint(node, name), default)
}

pub fn read_u32(node: &Node<'_, '_>, name: &str) -> Result<u32, ManifestError> {
    read_uint(node, name)
}

pub fn read_u16(node: &Node<'_, '_>, name: &str) -> Result<u16, ManifestError> {
    read_uint(node, name)
}

pub fn read_u8(node: &Node<'_, '_>, name: &str) -> Result<u8, ManifestError> {
    read_uint(node, name)
}

/// An absent list reads as empty; a present one must be a whole number of
/// 32-bit cells.
pub fn read_optional_u32_list<'a>(
    node: &Node<'_, 'a>,
    name: &str,
) -> Result<U32ListIter<'a>, ManifestError> {
    match node.property(name) {
        None => Ok(U32ListIter::empty()),
        Some(data) if data.len() % 4 != 0 => Err(ManifestError::MalformedIntegerList),
        Some(data) => Ok(U32ListIter { data }),
    }
}

fn cells_to_bytes(cells: u32) -> Result<usize, ManifestError> {
    match cells {
        1 => Ok(4),
        2 => Ok(8),
        _ => Err(ManifestError::MalformedInteger),
    }
}

/// Width in bytes of addresses in `node`'s children (`#address-cells`,
/// one cell when omitted).
pub fn address_size(node: &Node<'_, '_>) -> Result<usize, ManifestError> {
    cells_to_bytes(read_optional_uint(node, ADDRESS_CELLS, 1u32)?)
}

/// Width in bytes of sizes in `node`'s children (`#size-cells`, one cell
/// when omitted).
pub fn size_size(node: &Node<'_, '_>) -> Result<usize, ManifestError> {
    cells_to_bytes(read_optional_uint(node, SIZE_CELLS, 1u32)?)
}
