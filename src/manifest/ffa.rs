//! FF-A partition manifest (DEN0077A, "arm,ffa-manifest-1.0").
//!
//! Parsing is split in two phases. [`parse_ffa_manifest`] only checks that
//! every property is present and well formed; [`sanity_check`] then
//! rejects well-formed values this hypervisor does not support.

use crate::dtb::DeviceTree;
use crate::ffa::{FFA_VERSION_MAJOR, FFA_VERSION_MINOR};
use crate::manifest::properties::{
    read_optional_u32_list, read_optional_uint, read_u16, read_u32, read_u64, read_u8,
};
use crate::manifest::regions::{
    parse_device_regions, parse_memory_regions, BufferRole, DeviceRegionTable, MemoryRegion,
    MemoryRegionTable, RxTxPhandles,
};
use crate::manifest::ManifestError;

pub const FFA_MANIFEST_COMPATIBLE: &str = "arm,ffa-manifest-1.0";
pub const RXTX_COMPATIBLE: &str = "arm,ffa-manifest-rx_tx-buffer";

/// Boot order used when the manifest does not give one.
pub const DEFAULT_BOOT_ORDER: u16 = 0xFFFF;

/// Partition run-time exception level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTimeEl {
    El1,
    SEl0,
    SEl1,
    Other(u8),
}

impl From<u8> for RunTimeEl {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::El1,
            1 => Self::SEl0,
            2 => Self::SEl1,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    AArch64,
    AArch32,
    Other(u8),
}

impl From<u8> for ExecutionState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::AArch64,
            1 => Self::AArch32,
            other => Self::Other(other),
        }
    }
}

/// Stage-1 translation granule the partition was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XlatGranule {
    Page4K,
    Page16K,
    Page64K,
    Other(u8),
}

impl From<u8> for XlatGranule {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Page4K,
            1 => Self::Page16K,
            2 => Self::Page64K,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagingMethod {
    Direct,
    Indirect,
    Other(u8),
}

impl From<u8> for MessagingMethod {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Direct,
            1 => Self::Indirect,
            other => Self::Other(other),
        }
    }
}

/// FF-A version as encoded in the manifest: major in bits [31:16], minor
/// in bits [15:0].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FfaVersion {
    pub major: u16,
    pub minor: u16,
}

impl From<u32> for FfaVersion {
    fn from(value: u32) -> Self {
        Self {
            major: (value >> 16) as u16,
            minor: value as u16,
        }
    }
}

/// Properties of an FF-A partition, read from its package manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FfaPartitionInfo {
    pub ffa_version: FfaVersion,
    pub uuid: [u32; 4],
    pub execution_ctx_count: u16,
    pub run_time_el: RunTimeEl,
    pub execution_state: ExecutionState,
    pub load_addr: u64,
    pub ep_offset: u64,
    pub boot_order: u16,
    pub xlat_granule: XlatGranule,
    pub messaging_method: MessagingMethod,
    pub rxtx: Option<RxTxPhandles>,
    pub mem_regions: MemoryRegionTable,
    pub dev_regions: DeviceRegionTable,
}

impl FfaPartitionInfo {
    pub fn rx_buffer(&self) -> Option<&MemoryRegion> {
        self.mem_regions.buffer(BufferRole::Rx)
    }

    pub fn tx_buffer(&self) -> Option<&MemoryRegion> {
        self.mem_regions.buffer(BufferRole::Tx)
    }

    /// Address the partition's first instruction is fetched from.
    pub fn entry_point(&self) -> u64 {
        self.load_addr.wrapping_add(self.ep_offset)
    }
}

/// Read an FF-A partition manifest. Values are not policy-checked here.
pub fn parse_ffa_manifest(tree: &DeviceTree<'_>) -> Result<FfaPartitionInfo, ManifestError> {
    let root = tree.root().ok_or(ManifestError::NoRootNode)?;

    if !root.is_compatible(FFA_MANIFEST_COMPATIBLE) {
        return Err(ManifestError::NotCompatible);
    }

    let ffa_version = FfaVersion::from(read_u32(&root, "ffa-version")?);
    log::debug!(
        "  SP expected FF-A version {}.{}",
        ffa_version.major,
        ffa_version.minor
    );

    let mut uuid = [0u32; 4];
    for (word, value) in uuid.iter_mut().zip(read_optional_u32_list(&root, "uuid")?) {
        *word = value;
    }
    log::debug!(
        "  SP UUID {:#x}-{:x}-{:x}-{:x}",
        uuid[0],
        uuid[1],
        uuid[2],
        uuid[3]
    );

    let execution_ctx_count = read_u16(&root, "execution-ctx-count")?;
    log::debug!("  SP number of execution contexts {}", execution_ctx_count);

    let run_time_el = RunTimeEl::from(read_u8(&root, "exception-level")?);
    log::debug!("  SP run-time EL {:?}", run_time_el);

    let execution_state = ExecutionState::from(read_u8(&root, "execution-state")?);
    log::debug!("  SP execution state {:?}", execution_state);

    let load_addr = read_u64(&root, "load-address")?;
    log::debug!("  SP load address {:#x}", load_addr);

    let ep_offset = read_u64(&root, "entrypoint-offset")?;
    log::debug!("  SP entry point offset {:#x}", ep_offset);

    let boot_order = read_optional_uint(&root, "boot-order", DEFAULT_BOOT_ORDER)?;
    log::debug!("  SP boot order {}", boot_order);

    let xlat_granule = XlatGranule::from(read_u8(&root, "xlat-granule")?);
    log::debug!("  SP translation granule {:?}", xlat_granule);

    let rxtx = match root.find_child("rx_tx-info") {
        Some(node) => {
            if !node.is_compatible(RXTX_COMPATIBLE) {
                return Err(ManifestError::NotCompatible);
            }
            // Only the phandles are read here; the regions they point at
            // are resolved while the memory regions are parsed.
            Some(RxTxPhandles {
                rx: read_u32(&node, "rx-buffer")?,
                tx: read_u32(&node, "tx-buffer")?,
            })
        }
        None => None,
    };

    let messaging_method = MessagingMethod::from(read_u8(&root, "messaging-method")?);
    log::debug!("  SP messaging method {:?}", messaging_method);

    let mem_regions = match root.find_child("memory-regions") {
        Some(node) => parse_memory_regions(&node, rxtx)?,
        None => MemoryRegionTable::empty(),
    };
    log::debug!("  Total {} memory regions found", mem_regions.as_slice().len());

    let dev_regions = match root.find_child("device-regions") {
        Some(node) => parse_device_regions(&node)?,
        None => DeviceRegionTable::empty(),
    };
    log::debug!("  Total {} device regions found", dev_regions.as_slice().len());

    Ok(FfaPartitionInfo {
        ffa_version,
        uuid,
        execution_ctx_count,
        run_time_el,
        execution_state,
        load_addr,
        ep_offset,
        boot_order,
        xlat_granule,
        messaging_method,
        rxtx,
        mem_regions,
        dev_regions,
    })
}

/// Reject well-formed values this hypervisor does not support.
///
/// Every violation is logged; the outcome is a single `NotCompatible`.
pub fn sanity_check(sp: &FfaPartitionInfo) -> Result<(), ManifestError> {
    const UNSUPPORTED: &str = "specified in manifest is unsupported";
    let mut result = Ok(());

    let version = sp.ffa_version;
    if version.major != FFA_VERSION_MAJOR || version.minor > FFA_VERSION_MINOR {
        log::error!(
            "FF-A partition manifest version {}: {}.{}",
            UNSUPPORTED,
            version.major,
            version.minor
        );
        result = Err(ManifestError::NotCompatible);
    }

    if sp.xlat_granule != XlatGranule::Page4K {
        log::error!("Translation granule {}: {:?}", UNSUPPORTED, sp.xlat_granule);
        result = Err(ManifestError::NotCompatible);
    }

    if sp.execution_state != ExecutionState::AArch64 {
        log::error!("Execution state {}: {:?}", UNSUPPORTED, sp.execution_state);
        result = Err(ManifestError::NotCompatible);
    }

    if !matches!(sp.run_time_el, RunTimeEl::El1 | RunTimeEl::SEl1) {
        log::error!("Exception level {}: {:?}", UNSUPPORTED, sp.run_time_el);
        result = Err(ManifestError::NotCompatible);
    }

    if !matches!(
        sp.messaging_method,
        MessagingMethod::Direct | MessagingMethod::Indirect
    ) {
        log::error!("Messaging method {}: {:?}", UNSUPPORTED, sp.messaging_method);
        result = Err(ManifestError::NotCompatible);
    }

    result
}
