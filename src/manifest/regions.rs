//! Memory and device region tables of an FF-A partition manifest.

use crate::dtb::Node;
use crate::manifest::properties::{
    read_bool, read_optional_string, read_optional_u32_list, read_optional_uint, read_u32,
    read_u64, ManifestString,
};
use crate::manifest::{ManifestError, MANIFEST_INVALID_ADDRESS, MANIFEST_INVALID_ID};
use crate::mm::MemoryMode;
use crate::platform::{
    SP_MAX_DEVICE_REGIONS, SP_MAX_INTERRUPTS_PER_DEVICE, SP_MAX_MEMORY_REGIONS,
    SP_MAX_STREAMS_PER_DEVICE,
};

pub const MEMORY_REGIONS_COMPATIBLE: &str = "arm,ffa-manifest-memory-regions";
pub const DEVICE_REGIONS_COMPATIBLE: &str = "arm,ffa-manifest-device-regions";

/// Role of a memory region in the partition's FF-A mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    Rx,
    Tx,
}

/// Phandles of the RX/TX buffer regions, from the `rx_tx-info` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxTxPhandles {
    pub rx: u32,
    pub tx: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub name: ManifestString,
    /// `MANIFEST_INVALID_ADDRESS` when the hypervisor picks the address.
    pub base_address: u64,
    pub page_count: u32,
    pub attributes: MemoryMode,
    pub role: Option<BufferRole>,
}

impl MemoryRegion {
    pub const fn empty() -> Self {
        Self {
            name: ManifestString::empty(),
            base_address: MANIFEST_INVALID_ADDRESS,
            page_count: 0,
            attributes: MemoryMode::empty(),
            role: None,
        }
    }

    pub fn has_fixed_address(&self) -> bool {
        self.base_address != MANIFEST_INVALID_ADDRESS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interrupt {
    pub id: u32,
    pub attributes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRegion {
    pub name: ManifestString,
    pub base_address: u64,
    pub page_count: u32,
    pub attributes: MemoryMode,
    interrupts: [Interrupt; SP_MAX_INTERRUPTS_PER_DEVICE],
    interrupt_count: usize,
    /// `MANIFEST_INVALID_ID` when the device sits behind no SMMU.
    pub smmu_id: u32,
    stream_ids: [u32; SP_MAX_STREAMS_PER_DEVICE],
    stream_count: usize,
    pub exclusive_access: bool,
}

impl DeviceRegion {
    pub const fn empty() -> Self {
        Self {
            name: ManifestString::empty(),
            base_address: 0,
            page_count: 0,
            attributes: MemoryMode::D,
            interrupts: [Interrupt { id: 0, attributes: 0 }; SP_MAX_INTERRUPTS_PER_DEVICE],
            interrupt_count: 0,
            smmu_id: MANIFEST_INVALID_ID,
            stream_ids: [0; SP_MAX_STREAMS_PER_DEVICE],
            stream_count: 0,
            exclusive_access: false,
        }
    }

    pub fn interrupts(&self) -> &[Interrupt] {
        &self.interrupts[..self.interrupt_count]
    }

    pub fn stream_ids(&self) -> &[u32] {
        &self.stream_ids[..self.stream_count]
    }
}

/// Parsed `memory-regions` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegionTable {
    regions: [MemoryRegion; SP_MAX_MEMORY_REGIONS],
    count: usize,
}

impl MemoryRegionTable {
    pub const fn empty() -> Self {
        Self {
            regions: [MemoryRegion::empty(); SP_MAX_MEMORY_REGIONS],
            count: 0,
        }
    }

    pub fn as_slice(&self) -> &[MemoryRegion] {
        &self.regions[..self.count]
    }

    pub fn buffer(&self, role: BufferRole) -> Option<&MemoryRegion> {
        self.as_slice().iter().find(|region| region.role == Some(role))
    }
}

/// Parsed `device-regions` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRegionTable {
    regions: [DeviceRegion; SP_MAX_DEVICE_REGIONS],
    count: usize,
}

impl DeviceRegionTable {
    pub const fn empty() -> Self {
        Self {
            regions: [DeviceRegion::empty(); SP_MAX_DEVICE_REGIONS],
            count: 0,
        }
    }

    pub fn as_slice(&self) -> &[DeviceRegion] {
        &self.regions[..self.count]
    }
}

/// Parse the children of a `memory-regions` node.
///
/// At most `SP_MAX_MEMORY_REGIONS` children are read; further entries are
/// ignored. When `rxtx` is given, each region's `phandle` is matched
/// against it and, if both buffers resolve, their sizes must agree. When
/// several regions carry the same phandle, the last one is the buffer.
pub fn parse_memory_regions(
    node: &Node<'_, '_>,
    rxtx: Option<RxTxPhandles>,
) -> Result<MemoryRegionTable, ManifestError> {
    log::debug!("  Partition memory regions");

    if !node.is_compatible(MEMORY_REGIONS_COMPATIBLE) {
        return Err(ManifestError::NotCompatible);
    }

    let mut table = MemoryRegionTable::empty();
    let mut rx_index = None;
    let mut tx_index = None;

    for (i, child) in node.children().take(SP_MAX_MEMORY_REGIONS).enumerate() {
        log::debug!("    Memory Region[{}]", i);
        let region = &mut table.regions[i];

        region.name = read_optional_string(&child, "description")?;
        log::debug!("      Name: {}", region.name);

        region.base_address =
            read_optional_uint(&child, "base-address", MANIFEST_INVALID_ADDRESS)?;
        log::debug!("      Base address: {:#x}", region.base_address);

        region.page_count = read_u32(&child, "pages-count")?;
        log::debug!("      Pages count: {}", region.page_count);

        region.attributes = MemoryMode::permissions_of(read_u32(&child, "attributes")?);
        log::debug!("      Attributes: {:?}", region.attributes);

        if let Some(phandles) = rxtx {
            let phandle = read_optional_uint(&child, "phandle", MANIFEST_INVALID_ID)?;
            let assigned = if phandle == phandles.rx {
                log::debug!("      Assigned as RX buffer");
                Some((BufferRole::Rx, &mut rx_index))
            } else if phandle == phandles.tx {
                log::debug!("      Assigned as TX buffer");
                Some((BufferRole::Tx, &mut tx_index))
            } else {
                None
            };
            if let Some((role, index)) = assigned {
                if let Some(previous) = index.replace(i) {
                    table.regions[previous].role = None;
                }
                table.regions[i].role = Some(role);
            }
        }

        table.count = i + 1;
    }

    if table.count == 0 {
        return Err(ManifestError::MemoryRegionNodeEmpty);
    }

    if let (Some(rx), Some(tx)) = (rx_index, tx_index) {
        if table.regions[rx].page_count != table.regions[tx].page_count {
            return Err(ManifestError::RxTxSizeMismatch);
        }
    }

    Ok(table)
}

/// Parse the children of a `device-regions` node.
///
/// At most `SP_MAX_DEVICE_REGIONS` children are read. Interrupts come in
/// `(id, attributes)` pairs; a dangling id makes the list malformed.
pub fn parse_device_regions(node: &Node<'_, '_>) -> Result<DeviceRegionTable, ManifestError> {
    log::debug!("  Partition device regions");

    if !node.is_compatible(DEVICE_REGIONS_COMPATIBLE) {
        return Err(ManifestError::NotCompatible);
    }

    let mut table = DeviceRegionTable::empty();

    for (i, child) in node.children().take(SP_MAX_DEVICE_REGIONS).enumerate() {
        log::debug!("    Device Region[{}]", i);
        let region = &mut table.regions[i];

        region.name = read_optional_string(&child, "description")?;
        log::debug!("      Name: {}", region.name);

        region.base_address = read_u64(&child, "base-address")?;
        log::debug!("      Base address: {:#x}", region.base_address);

        region.page_count = read_u32(&child, "pages-count")?;
        log::debug!("      Pages count: {}", region.page_count);

        region.attributes =
            MemoryMode::permissions_of(read_u32(&child, "attributes")?) | MemoryMode::D;
        log::debug!("      Attributes: {:?}", region.attributes);

        let mut list = read_optional_u32_list(&child, "interrupts")?;
        while list.has_next() && region.interrupt_count < SP_MAX_INTERRUPTS_PER_DEVICE {
            let id = list.next().ok_or(ManifestError::MalformedInteger)?;
            let attributes = list.next().ok_or(ManifestError::MalformedIntegerList)?;
            log::debug!("      Interrupt: id = {}, attributes = {:#x}", id, attributes);
            region.interrupts[region.interrupt_count] = Interrupt { id, attributes };
            region.interrupt_count += 1;
        }

        region.smmu_id = read_optional_uint(&child, "smmu-id", MANIFEST_INVALID_ID)?;
        log::debug!("      SMMU id: {:#x}", region.smmu_id);

        let streams = read_optional_u32_list(&child, "stream-ids")?;
        for stream in streams.take(SP_MAX_STREAMS_PER_DEVICE) {
            log::debug!("      Stream id: {}", stream);
            region.stream_ids[region.stream_count] = stream;
            region.stream_count += 1;
        }

        region.exclusive_access = read_bool(&child, "exclusive-access")?;
        log::debug!("      Exclusive access: {}", region.exclusive_access);

        table.count = i + 1;
    }

    if table.count == 0 {
        return Err(ManifestError::DeviceRegionNodeEmpty);
    }

    Ok(table)
}
