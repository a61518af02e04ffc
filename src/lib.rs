#![cfg_attr(not(test), no_std)]

//! Partition manifest parsing and FF-A memory sharing encoding for a
//! small AArch64 hypervisor.
//!
//! The manifest is parsed once at boot from a DTB; secure partitions are
//! further described by an FF-A manifest inside their SP package. The
//! [`ffa`] module encodes the memory transaction descriptors partitions
//! exchange at run time.

pub mod dtb;
pub mod ffa;
pub mod loader;
pub mod manifest;
pub mod mm;
pub mod platform;
pub mod sp_pkg;

pub use manifest::{Manifest, ManifestError};
