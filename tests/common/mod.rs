//! Shared test fixtures: an FDT blob builder, manifest builders, an
//! in-memory stage-1 fake and an SP package builder.

#![allow(dead_code)]

use partition_manager::mm::{MemoryMode, Stage1};
use partition_manager::platform::PAGE_SIZE;
use partition_manager::sp_pkg::{SpPkgHeader, SP_PKG_HEADER_SIZE};

const FDT_MAGIC: u32 = 0xd00d_feed;
const FDT_HEADER_SIZE: usize = 40;
const FDT_RESERVE_ENTRY_SIZE: usize = 16;
const FDT_VERSION: u32 = 17;
const FDT_LAST_COMPATIBLE_VERSION: u32 = 16;

const FDT_BEGIN_NODE: u32 = 0x1;
const FDT_END_NODE: u32 = 0x2;
const FDT_PROP: u32 = 0x3;
const FDT_END: u32 = 0x9;

/// Builds a flattened device tree, version 17, with an empty memory
/// reservation map. Nodes must be opened and closed in order and each
/// node's properties must come before its children.
#[derive(Default)]
pub struct FdtBuilder {
    structs: Vec<u8>,
    strings: Vec<u8>,
    depth: usize,
}

impl FdtBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn token(&mut self, token: u32) {
        self.structs.extend_from_slice(&token.to_be_bytes());
    }

    fn pad(&mut self) {
        while self.structs.len() % 4 != 0 {
            self.structs.push(0);
        }
    }

    fn string_offset(&mut self, name: &str) -> u32 {
        let mut offset = 0;
        for entry in self.strings.split(|&b| b == 0) {
            if entry == name.as_bytes() {
                return offset as u32;
            }
            offset += entry.len() + 1;
        }
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        offset
    }

    pub fn begin_node(&mut self, name: &str) -> &mut Self {
        self.token(FDT_BEGIN_NODE);
        self.structs.extend_from_slice(name.as_bytes());
        self.structs.push(0);
        self.pad();
        self.depth += 1;
        self
    }

    pub fn end_node(&mut self) -> &mut Self {
        assert!(self.depth > 0, "unbalanced end_node");
        self.token(FDT_END_NODE);
        self.depth -= 1;
        self
    }

    /// `begin_node`, run `body`, `end_node`.
    pub fn node(&mut self, name: &str, body: impl FnOnce(&mut Self)) -> &mut Self {
        self.begin_node(name);
        body(self);
        self.end_node()
    }

    pub fn prop(&mut self, name: &str, value: &[u8]) -> &mut Self {
        let nameoff = self.string_offset(name);
        self.token(FDT_PROP);
        self.structs
            .extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.structs.extend_from_slice(&nameoff.to_be_bytes());
        self.structs.extend_from_slice(value);
        self.pad();
        self
    }

    pub fn prop_empty(&mut self, name: &str) -> &mut Self {
        self.prop(name, &[])
    }

    pub fn prop_u32(&mut self, name: &str, value: u32) -> &mut Self {
        self.prop(name, &value.to_be_bytes())
    }

    pub fn prop_u64(&mut self, name: &str, value: u64) -> &mut Self {
        self.prop(name, &value.to_be_bytes())
    }

    pub fn prop_u32_list(&mut self, name: &str, values: &[u32]) -> &mut Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.prop(name, &bytes)
    }

    /// NUL-terminated string.
    pub fn prop_str(&mut self, name: &str, value: &str) -> &mut Self {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.prop(name, &bytes)
    }

    pub fn finish(mut self) -> Vec<u8> {
        assert_eq!(self.depth, 0, "unclosed nodes");
        self.token(FDT_END);

        let off_mem_rsvmap = FDT_HEADER_SIZE;
        let off_dt_struct = off_mem_rsvmap + FDT_RESERVE_ENTRY_SIZE;
        let off_dt_strings = off_dt_struct + self.structs.len();
        let total_size = off_dt_strings + self.strings.len();

        let header = [
            FDT_MAGIC,
            total_size as u32,
            off_dt_struct as u32,
            off_dt_strings as u32,
            off_mem_rsvmap as u32,
            FDT_VERSION,
            FDT_LAST_COMPATIBLE_VERSION,
            0,
            self.strings.len() as u32,
            self.structs.len() as u32,
        ];

        let mut blob = Vec::with_capacity(total_size);
        for field in header {
            blob.extend_from_slice(&field.to_be_bytes());
        }
        blob.extend_from_slice(&[0u8; FDT_RESERVE_ENTRY_SIZE]);
        blob.extend_from_slice(&self.structs);
        blob.extend_from_slice(&self.strings);
        blob
    }
}

/// A tree with a root node built by `body`.
pub fn fdt(body: impl FnOnce(&mut FdtBuilder)) -> Vec<u8> {
    let mut builder = FdtBuilder::new();
    builder.node("", body);
    builder.finish()
}

/// A hypervisor manifest: root, then `/hypervisor` with the standard
/// compatible, then whatever `vms` adds under it.
pub fn manifest(vms: impl FnOnce(&mut FdtBuilder)) -> Vec<u8> {
    fdt(|root| {
        root.node("hypervisor", |hyp| {
            hyp.prop_str("compatible", "hafnium,hafnium");
            vms(hyp);
        });
    })
}

pub fn primary_vm(hyp: &mut FdtBuilder) {
    hyp.node("vm1", |vm| {
        vm.prop_str("debug_name", "primary");
        vm.prop_str("kernel_filename", "vmlinuz");
    });
}

pub fn secondary_vm(hyp: &mut FdtBuilder, id: u16, mem_size: u64, vcpu_count: u32) {
    hyp.node(&format!("vm{id}"), |vm| {
        vm.prop_str("debug_name", &format!("secondary{id}"));
        vm.prop_u64("mem_size", mem_size);
        vm.prop_u32("vcpu_count", vcpu_count);
    });
}

/// Root-level fields of an FF-A partition manifest. The default is a
/// partition every sanity rule accepts.
#[derive(Clone, Copy)]
pub struct SpFields {
    pub ffa_version: u32,
    pub exception_level: u32,
    pub execution_state: u32,
    pub xlat_granule: u32,
    pub messaging_method: u32,
    pub load_address: u64,
    pub entrypoint_offset: u64,
}

impl Default for SpFields {
    fn default() -> Self {
        Self {
            ffa_version: 0x0001_0000,
            exception_level: 2,
            execution_state: 0,
            xlat_granule: 0,
            messaging_method: 0,
            load_address: 0x6280_0000,
            entrypoint_offset: 0x1000,
        }
    }
}

/// An "arm,ffa-manifest-1.0" tree; `extra` adds children to the root.
pub fn ffa_manifest(fields: &SpFields, extra: impl FnOnce(&mut FdtBuilder)) -> Vec<u8> {
    fdt(|root| {
        root.prop_str("compatible", "arm,ffa-manifest-1.0");
        root.prop_u32("ffa-version", fields.ffa_version);
        root.prop_u32_list("uuid", &[0xb4b5_671e, 0x4a90_4fe1, 0xb81f_fb13, 0xdae1_dacb]);
        root.prop_u32("execution-ctx-count", 1);
        root.prop_u32("exception-level", fields.exception_level);
        root.prop_u32("execution-state", fields.execution_state);
        root.prop_u64("load-address", fields.load_address);
        root.prop_u64("entrypoint-offset", fields.entrypoint_offset);
        root.prop_u32("xlat-granule", fields.xlat_granule);
        root.prop_u32("messaging-method", fields.messaging_method);
        extra(root);
    })
}

/// Header followed by `manifest`, padded to a page multiple.
pub fn sp_package(manifest: &[u8]) -> Vec<u8> {
    let header = SpPkgHeader::new(manifest.len() as u32, 0, 0);
    sp_package_with_header(&header, manifest)
}

pub fn sp_package_with_header(header: &SpPkgHeader, manifest: &[u8]) -> Vec<u8> {
    let mut image = header.to_bytes().to_vec();
    assert_eq!(image.len(), SP_PKG_HEADER_SIZE);
    image.extend_from_slice(manifest);
    let padded = image.len().div_ceil(PAGE_SIZE as usize) * PAGE_SIZE as usize;
    image.resize(padded, 0);
    image
}

/// Physical memory starting at `base`, with identity mappings tracked so
/// tests can check nothing stays mapped.
pub struct FakeStage1 {
    base: u64,
    memory: Vec<u8>,
    mappings: Vec<(u64, u64)>,
    pub map_calls: usize,
    /// Fail every map call from this one on (0-based).
    pub fail_map_from: Option<usize>,
}

pub const RAM_BASE: u64 = 0x8000_0000;
pub const RAM_SIZE: usize = 64 * PAGE_SIZE as usize;

impl FakeStage1 {
    pub fn new() -> Self {
        Self {
            base: RAM_BASE,
            memory: vec![0; RAM_SIZE],
            mappings: Vec::new(),
            map_calls: 0,
            fail_map_from: None,
        }
    }

    /// Copy `bytes` into physical memory at `address`.
    pub fn load(&mut self, address: u64, bytes: &[u8]) {
        let start = (address - self.base) as usize;
        self.memory[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn live_mappings(&self) -> usize {
        self.mappings.len()
    }
}

impl Stage1 for FakeStage1 {
    fn identity_map(&mut self, begin: u64, end: u64, mode: MemoryMode) -> Result<(), &'static str> {
        let call = self.map_calls;
        self.map_calls += 1;
        if self.fail_map_from.is_some_and(|from| call >= from) {
            return Err("out of page table memory");
        }
        assert_eq!(mode, MemoryMode::R, "manifest memory is mapped read-only");
        if begin < self.base || end > self.base + self.memory.len() as u64 {
            return Err("range outside RAM");
        }
        // Re-mapping from the same base grows the existing mapping.
        self.mappings.retain(|&(b, _)| b != begin);
        self.mappings.push((begin, end));
        Ok(())
    }

    fn unmap(&mut self, begin: u64, end: u64) -> Result<(), &'static str> {
        let before = self.mappings.len();
        self.mappings.retain(|&(b, e)| !(b == begin && e == end));
        if self.mappings.len() == before {
            return Err("range not mapped");
        }
        Ok(())
    }

    fn mapped(&self, begin: u64, end: u64) -> Option<&[u8]> {
        self.mappings
            .iter()
            .find(|&&(b, e)| b <= begin && end <= e)?;
        let start = (begin - self.base) as usize;
        let stop = (end - self.base) as usize;
        self.memory.get(start..stop)
    }
}

/// A manifest with the primary and one FF-A secondary whose package sits
/// at `load_address`.
pub fn ffa_partition_manifest(load_address: u64, mem_size: u64) -> Vec<u8> {
    manifest(|hyp| {
        primary_vm(hyp);
        hyp.node("vm2", |vm| {
            vm.prop_empty("is_ffa_partition");
            vm.prop_str("debug_name", "sp1");
            vm.prop_u64("load_address", load_address);
            vm.prop_u64("mem_size", mem_size);
            vm.prop_u32("vcpu_count", 1);
        });
    })
}
