/// Reasons a manifest can be rejected.
///
/// Every outcome is distinct so callers can tell a malformed value apart
/// from a well-formed value that policy disallows, and a missing optional
/// property apart from a broken one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    #[error("Total size in header does not match file size")]
    FileSize,
    #[error("Malformed device tree blob")]
    MalformedDtb,
    #[error("Could not find root node in manifest")]
    NoRootNode,
    #[error("Could not find \"hypervisor\" node in manifest")]
    NoHypervisorFdtNode,
    #[error("Manifest entry not compatible with this hypervisor")]
    NotCompatible,
    #[error("Manifest defines a VM with a reserved ID")]
    ReservedVmId,
    #[error("Manifest does not contain a primary VM entry")]
    NoPrimaryVm,
    #[error("Manifest specifies more VMs than there is static space for")]
    TooManyVms,
    #[error("Property not found")]
    PropertyNotFound,
    #[error("Malformed string property")]
    MalformedString,
    #[error("String too long")]
    StringTooLong,
    #[error("Malformed integer property")]
    MalformedInteger,
    #[error("Integer overflow")]
    IntegerOverflow,
    #[error("Malformed integer list property")]
    MalformedIntegerList,
    #[error("Malformed boolean property")]
    MalformedBoolean,
    #[error("Memory-region node should have at least one entry")]
    MemoryRegionNodeEmpty,
    #[error("Device-region node should have at least one entry")]
    DeviceRegionNodeEmpty,
    #[error("RX and TX buffers should be of same size")]
    RxTxSizeMismatch,
    #[error("Could not map partition package for reading")]
    MapFailed,
}
