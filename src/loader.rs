//! Partition admission.
//!
//! Turns a validated [`Manifest`] into VM records in the surrounding
//! runtime. Secondaries are only allocated; the primary also gets its
//! boot vCPU started, and schedules everything else itself.

use crate::manifest::{Manifest, ManifestVm, VmKind, MANIFEST_INVALID_ADDRESS};

/// The runtime's VM table and vCPU bring-up, as seen by the loader.
pub trait PartitionHost {
    /// Handle to an allocated VM record.
    type Vm: Copy;

    fn allocate_vm(&mut self, vm_id: u16, vcpu_count: u16) -> Result<Self::Vm, &'static str>;

    fn start_vcpu(
        &mut self,
        vm: Self::Vm,
        vcpu_index: u16,
        entry: u64,
        arg: u64,
        is_primary: bool,
    ) -> Result<(), &'static str>;
}

/// Boot-time facts the manifest does not carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootParams {
    /// Physical CPUs; the primary gets one vCPU per CPU.
    pub cpu_count: u16,
    /// Where the primary kernel was placed, used when the manifest leaves
    /// `boot_address` unset.
    pub primary_load_address: u64,
    /// Passed to the primary's boot vCPU, normally its FDT address.
    pub primary_arg: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmitError {
    #[error("cannot allocate VM {vm_id}: {reason}")]
    AllocateFailed { vm_id: u16, reason: &'static str },
    #[error("cannot start VM {vm_id}: {reason}")]
    StartFailed { vm_id: u16, reason: &'static str },
    #[error("VM {0} has no vCPUs")]
    NoVcpus(u16),
}

/// Where a partition's first instruction is.
pub fn entry_point(vm: &ManifestVm, params: &BootParams) -> u64 {
    if let Some(sp) = &vm.sp {
        return sp.entry_point();
    }
    match vm.kind {
        VmKind::Primary { boot_address, .. } if boot_address != MANIFEST_INVALID_ADDRESS => {
            boot_address
        }
        VmKind::Primary { .. } => params.primary_load_address,
        // Secondaries are entered at the start of their memory.
        VmKind::Secondary { .. } => 0,
    }
}

/// Allocate every partition of `manifest` in ID order and start the
/// primary. Returns the number of partitions admitted.
pub fn admit<H: PartitionHost>(
    manifest: &Manifest,
    params: &BootParams,
    host: &mut H,
) -> Result<usize, AdmitError> {
    let mut admitted = 0;

    for (vm_id, vm) in manifest.vms() {
        let vcpu_count = vm.vcpu_count().unwrap_or(params.cpu_count);
        if vcpu_count == 0 {
            return Err(AdmitError::NoVcpus(vm_id));
        }

        log::info!(
            "Loading VM {} '{}' with {} vCPUs",
            vm_id,
            vm.debug_name,
            vcpu_count
        );
        let handle = host
            .allocate_vm(vm_id, vcpu_count)
            .map_err(|reason| AdmitError::AllocateFailed { vm_id, reason })?;

        if vm.is_primary() {
            let entry = entry_point(vm, params);
            log::debug!("Starting primary at {:#x}", entry);
            host.start_vcpu(handle, 0, entry, params.primary_arg, true)
                .map_err(|reason| AdmitError::StartFailed { vm_id, reason })?;
        }

        admitted += 1;
    }

    Ok(admitted)
}
