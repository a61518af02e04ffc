//! Hypervisor manifest parser.
//!
//! The manifest is a DTB whose `/hypervisor` node holds one `vmN` child per
//! partition, numbered from the first partition ID without gaps. Partitions
//! flagged `is_ffa_partition` are described by an FF-A manifest embedded in
//! their SP package instead of by plain VM properties.
//!
//! ```text
//! hypervisor {
//!     compatible = "hafnium,hafnium";
//!     vm1 { debug_name = "primary"; kernel_filename = "vmlinuz"; };
//!     vm2 { debug_name = "sec"; mem_size = <0x100000>; vcpu_count = <1>; };
//! };
//! ```
//!
//! Parsing is fail-fast: the first error aborts and nothing is returned.

pub mod error;
pub mod ffa;
pub mod properties;
pub mod regions;

pub use error::ManifestError;
pub use ffa::FfaPartitionInfo;
pub use properties::ManifestString;

use crate::dtb::{DeviceTree, Node};
use crate::mm::Stage1;
use crate::platform::{MAX_SMCS, MAX_VMS, PRIMARY_VM_ID, VM_ID_BASE, VM_ID_OFFSET};
use crate::sp_pkg;
use properties::{
    read_bool, read_optional_string, read_optional_u32_list, read_optional_uint, read_string,
    read_u16, read_u64,
};

/// Sentinel for "no address given".
pub const MANIFEST_INVALID_ADDRESS: u64 = u64::MAX;
/// Sentinel for "no phandle / SMMU id given".
pub const MANIFEST_INVALID_ID: u32 = MANIFEST_INVALID_ADDRESS as u32;

pub const HYPERVISOR_NODE: &str = "/hypervisor";
pub const HYPERVISOR_COMPATIBLE: &str = "hafnium,hafnium";

/// "vm" plus at most five digits.
const VM_NODE_NAME_MAX: usize = 7;

/// Node name of the partition with ID `vm_id`, e.g. `vm1`.
#[derive(Clone, Copy)]
pub struct VmNodeName {
    buf: [u8; VM_NODE_NAME_MAX],
    len: usize,
}

impl VmNodeName {
    pub fn new(vm_id: u16) -> Self {
        let mut digits = [0u8; 5];
        let mut count = 0;
        let mut value = vm_id;
        loop {
            digits[count] = b'0' + (value % 10) as u8;
            count += 1;
            value /= 10;
            if value == 0 {
                break;
            }
        }

        let mut buf = [0u8; VM_NODE_NAME_MAX];
        buf[..2].copy_from_slice(b"vm");
        for (dst, src) in buf[2..2 + count].iter_mut().zip(digits[..count].iter().rev()) {
            *dst = *src;
        }
        Self { buf, len: 2 + count }
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

/// SMCs a partition may forward to the secure monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmcWhitelist {
    smcs: [u32; MAX_SMCS],
    smc_count: usize,
    pub permissive: bool,
}

impl SmcWhitelist {
    pub const fn empty() -> Self {
        Self {
            smcs: [0; MAX_SMCS],
            smc_count: 0,
            permissive: false,
        }
    }

    pub fn smcs(&self) -> &[u32] {
        &self.smcs[..self.smc_count]
    }

    pub fn allows(&self, function_id: u32) -> bool {
        self.permissive || self.smcs().contains(&function_id)
    }
}

/// Properties that depend on whether the partition is the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmKind {
    Primary {
        ramdisk_filename: ManifestString,
        /// `MANIFEST_INVALID_ADDRESS` if the loader picks it.
        boot_address: u64,
    },
    Secondary {
        mem_size: u64,
        vcpu_count: u16,
        fdt_filename: ManifestString,
    },
}

/// One partition entry of the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestVm {
    pub debug_name: ManifestString,
    pub kernel_filename: ManifestString,
    pub smc_whitelist: SmcWhitelist,
    pub is_ffa_partition: bool,
    pub kind: VmKind,
    /// Present exactly when `is_ffa_partition` is set.
    pub sp: Option<FfaPartitionInfo>,
}

impl ManifestVm {
    pub const EMPTY: Self = Self {
        debug_name: ManifestString::empty(),
        kernel_filename: ManifestString::empty(),
        smc_whitelist: SmcWhitelist::empty(),
        is_ffa_partition: false,
        kind: VmKind::Secondary {
            mem_size: 0,
            vcpu_count: 0,
            fdt_filename: ManifestString::empty(),
        },
        sp: None,
    };

    pub fn is_primary(&self) -> bool {
        matches!(self.kind, VmKind::Primary { .. })
    }

    /// Memory budget of a secondary; the primary has none.
    pub fn mem_size(&self) -> Option<u64> {
        match self.kind {
            VmKind::Secondary { mem_size, .. } => Some(mem_size),
            VmKind::Primary { .. } => None,
        }
    }

    pub fn vcpu_count(&self) -> Option<u16> {
        match self.kind {
            VmKind::Secondary { vcpu_count, .. } => Some(vcpu_count),
            VmKind::Primary { .. } => None,
        }
    }
}

/// A fully validated hypervisor manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub ffa_tee_enabled: bool,
    vm_count: usize,
    vms: [ManifestVm; MAX_VMS],
}

/// Partition ID of the VM in table slot `slot`.
pub const fn vm_id_for_slot(slot: usize) -> u16 {
    VM_ID_OFFSET + slot as u16
}

impl Manifest {
    /// A manifest with no partitions, suitable for static storage.
    pub const EMPTY: Self = Self {
        ffa_tee_enabled: false,
        vm_count: 0,
        vms: [ManifestVm::EMPTY; MAX_VMS],
    };

    /// Parse and validate a manifest blob.
    ///
    /// `stage1` is only touched for FF-A partitions, whose packages are
    /// mapped read-only while their embedded manifest is parsed.
    pub fn parse<S: Stage1 + ?Sized>(stage1: &mut S, blob: &[u8]) -> Result<Self, ManifestError> {
        let mut manifest = Self::EMPTY;
        manifest.parse_into(stage1, blob)?;
        Ok(manifest)
    }

    /// Like [`Manifest::parse`], but fills `self` in place so the table can
    /// live in static storage instead of on the boot stack.
    ///
    /// Previous contents are discarded. On error `self` is left empty.
    pub fn parse_into<S: Stage1 + ?Sized>(
        &mut self,
        stage1: &mut S,
        blob: &[u8],
    ) -> Result<(), ManifestError> {
        self.clear();
        let result = self.fill(stage1, blob);
        if result.is_err() {
            self.clear();
        }
        result
    }

    fn clear(&mut self) {
        self.ffa_tee_enabled = false;
        self.vm_count = 0;
        self.vms.fill(ManifestVm::EMPTY);
    }

    fn fill<S>(&mut self, stage1: &mut S, blob: &[u8]) -> Result<(), ManifestError>
    where
        S: Stage1 + ?Sized,
    {
        let tree = DeviceTree::from_bytes(blob)?;
        tree.root().ok_or(ManifestError::NoRootNode)?;

        let hyp = tree
            .find_node(HYPERVISOR_NODE)
            .ok_or(ManifestError::NoHypervisorFdtNode)?;
        if !hyp.is_compatible(HYPERVISOR_COMPATIBLE) {
            return Err(ManifestError::NotCompatible);
        }

        self.ffa_tee_enabled = read_bool(&hyp, "ffa_tee")?;

        for id in VM_ID_BASE..VM_ID_OFFSET {
            let name = VmNodeName::new(id - VM_ID_BASE);
            if hyp.find_child(name.as_str()).is_some() {
                log::error!("Manifest declares reserved VM node {}", name.as_str());
                return Err(ManifestError::ReservedVmId);
            }
        }

        let mut found_primary = false;
        // One slot past capacity is looked up so an extra node is reported
        // rather than ignored.
        for slot in 0..=MAX_VMS {
            let vm_id = vm_id_for_slot(slot);
            let name = VmNodeName::new(vm_id - VM_ID_BASE);
            let Some(node) = hyp.find_child(name.as_str()) else {
                break;
            };

            if slot == MAX_VMS {
                return Err(ManifestError::TooManyVms);
            }

            if vm_id == PRIMARY_VM_ID {
                found_primary = true;
            }

            log::debug!("Parsing manifest node {}", name.as_str());
            self.vms[slot] = parse_vm(stage1, &node, vm_id)?;
            self.vm_count = slot + 1;
        }

        if !found_primary {
            return Err(ManifestError::NoPrimaryVm);
        }

        Ok(())
    }

    pub fn vm_count(&self) -> usize {
        self.vm_count
    }

    /// Parsed partitions with their IDs, in ID order.
    pub fn vms(&self) -> impl Iterator<Item = (u16, &ManifestVm)> {
        self.vms[..self.vm_count]
            .iter()
            .enumerate()
            .map(|(slot, vm)| (vm_id_for_slot(slot), vm))
    }

    pub fn vm(&self, vm_id: u16) -> Option<&ManifestVm> {
        let slot = usize::from(vm_id.checked_sub(VM_ID_OFFSET)?);
        self.vms[..self.vm_count].get(slot)
    }

    pub fn primary(&self) -> Option<&ManifestVm> {
        self.vm(PRIMARY_VM_ID)
    }
}

fn parse_vm<S: Stage1 + ?Sized>(
    stage1: &mut S,
    node: &Node<'_, '_>,
    vm_id: u16,
) -> Result<ManifestVm, ManifestError> {
    let mut vm = parse_vm_common(node, vm_id)?;

    if vm.is_ffa_partition {
        vm.sp = Some(parse_ffa_partition_package(stage1, node, &vm)?);
    } else {
        parse_plain_vm(node, &mut vm)?;
    }

    Ok(vm)
}

/// Fields shared by every partition.
fn parse_vm_common(node: &Node<'_, '_>, vm_id: u16) -> Result<ManifestVm, ManifestError> {
    let mut vm = ManifestVm::EMPTY;

    vm.is_ffa_partition = read_bool(node, "is_ffa_partition")?;
    vm.debug_name = read_string(node, "debug_name")?;

    let mut smcs = read_optional_u32_list(node, "smc_whitelist")?;
    for smc in smcs.by_ref().take(MAX_SMCS) {
        vm.smc_whitelist.smcs[vm.smc_whitelist.smc_count] = smc;
        vm.smc_whitelist.smc_count += 1;
    }
    if smcs.has_next() {
        log::warn!("{} SMC whitelist too long.", vm.debug_name);
    }

    vm.smc_whitelist.permissive = read_bool(node, "smc_whitelist_permissive")?;

    vm.kind = if vm_id == PRIMARY_VM_ID {
        VmKind::Primary {
            ramdisk_filename: ManifestString::empty(),
            boot_address: MANIFEST_INVALID_ADDRESS,
        }
    } else {
        VmKind::Secondary {
            mem_size: read_u64(node, "mem_size")?,
            vcpu_count: read_u16(node, "vcpu_count")?,
            fdt_filename: read_optional_string(node, "fdt_filename")?,
        }
    };

    Ok(vm)
}

/// Fields of a partition booted from a plain kernel image.
fn parse_plain_vm(node: &Node<'_, '_>, vm: &mut ManifestVm) -> Result<(), ManifestError> {
    vm.kernel_filename = read_optional_string(node, "kernel_filename")?;

    if let VmKind::Primary {
        ramdisk_filename,
        boot_address,
    } = &mut vm.kind
    {
        *ramdisk_filename = read_optional_string(node, "ramdisk_filename")?;
        *boot_address = read_optional_uint(node, "boot_address", MANIFEST_INVALID_ADDRESS)?;
    }

    Ok(())
}

/// Locate the partition's SP package, validate its header and parse the
/// FF-A manifest inside it.
fn parse_ffa_partition_package<S: Stage1 + ?Sized>(
    stage1: &mut S,
    node: &Node<'_, '_>,
    vm: &ManifestVm,
) -> Result<FfaPartitionInfo, ManifestError> {
    if !vm.is_ffa_partition {
        return Err(ManifestError::NotCompatible);
    }

    let load_address = read_u64(node, "load_address")?;

    sp_pkg::with_package_manifest(stage1, load_address, vm.mem_size(), |blob| {
        let tree = DeviceTree::from_bytes(blob).inspect_err(|_| {
            log::error!("FDT failed validation.");
        })?;
        let sp = ffa::parse_ffa_manifest(&tree)?;
        ffa::sanity_check(&sp)?;
        Ok(sp)
    })
}
