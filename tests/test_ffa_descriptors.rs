//! FF-A memory region descriptor tests
//!
//! Byte-level layout of each builder, bounds checks of the read-back
//! view, and round-trip / page-count properties.

use partition_manager::ffa::descriptors::{
    memory_lender_retrieve_request_init, memory_region_init, memory_retrieve_request_init,
    retrieved_memory_region_init, Cacheability, Constituent, DataAccess, InstructionAccess,
    MemoryAccessPermissions, MemoryAttributes, MemoryRegionDescriptor, MemoryType, Shareability,
    Transaction, TransactionType, CONSTITUENT_SIZE, FFA_MEMORY_REGION_FLAG_CLEAR,
};
use partition_manager::ffa::{DescriptorError, MemoryHandle, FFA_INVALID_PARAMETERS, FFA_NO_MEMORY};
use proptest::prelude::*;

fn share_tx() -> Transaction {
    Transaction {
        sender: 0x8001,
        receiver: 0x0002,
        attributes: MemoryAttributes::new(
            MemoryType::Normal,
            Cacheability::WriteBack,
            Shareability::Inner,
        ),
        permissions: MemoryAccessPermissions::new(
            DataAccess::ReadWrite,
            InstructionAccess::NotExecutable,
        ),
        flags: FFA_MEMORY_REGION_FLAG_CLEAR,
        tag: 0x1122_3344_5566_7788,
    }
}

fn le32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn le64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

#[test]
fn test_region_init_layout() {
    let constituents = [
        Constituent { address: 0x6000_0000, page_count: 2 },
        Constituent { address: 0x6010_0000, page_count: 3 },
    ];
    // Stale bytes must not leak into reserved fields.
    let mut buf = [0xffu8; 256];
    let len = memory_region_init(&mut buf, &share_tx(), &constituents).unwrap();
    assert_eq!(len, 64 + 2 * CONSTITUENT_SIZE);

    // Header
    assert_eq!(&buf[0..2], &0x8001u16.to_le_bytes());
    assert_eq!(buf[2], 0b10_11_11);
    assert_eq!(buf[3], 0);
    assert_eq!(le32(&buf, 4), FFA_MEMORY_REGION_FLAG_CLEAR);
    assert_eq!(le64(&buf, 8), 0, "handle is assigned by the hypervisor");
    assert_eq!(le64(&buf, 16), 0x1122_3344_5566_7788);
    assert_eq!(le32(&buf, 24), 0);
    assert_eq!(le32(&buf, 28), 1);

    // Memory access descriptor
    assert_eq!(&buf[32..34], &2u16.to_le_bytes());
    assert_eq!(buf[34], 0b01_10);
    assert_eq!(buf[35], 0);
    assert_eq!(le32(&buf, 36), 48);
    assert_eq!(le64(&buf, 40), 0);

    // Composite region
    assert_eq!(le32(&buf, 48), 5);
    assert_eq!(le32(&buf, 52), 2);
    assert_eq!(le64(&buf, 56), 0);

    // Constituents
    assert_eq!(le64(&buf, 64), 0x6000_0000);
    assert_eq!(le32(&buf, 72), 2);
    assert_eq!(le32(&buf, 76), 0);
    assert_eq!(le64(&buf, 80), 0x6010_0000);
    assert_eq!(le32(&buf, 88), 3);

    // Untouched past the end.
    assert_eq!(buf[len], 0xff);
}

#[test]
fn test_retrieve_request() {
    let handle = MemoryHandle::make(7);
    let tx = Transaction {
        flags: TransactionType::Share.to_flags(),
        ..share_tx()
    };
    let mut buf = [0u8; 64];
    let len = memory_retrieve_request_init(&mut buf, handle, &tx).unwrap();
    assert_eq!(len, 48);

    let desc = MemoryRegionDescriptor::parse(&buf[..len]).unwrap();
    assert_eq!(desc.handle(), handle);
    assert_eq!(desc.transaction_type(), TransactionType::Share);
    assert_eq!(desc.receiver_count(), 1);

    let access = desc.receiver(0).unwrap();
    assert_eq!(access.receiver, tx.receiver);
    assert_eq!(access.composite_offset, 0);
    // Offset 0 leaves the layout to the hypervisor.
    assert!(desc.composite(0).unwrap().is_none());
}

#[test]
fn test_lender_retrieve_request() {
    let handle = MemoryHandle::make(3);
    let mut buf = [0xaau8; 40];
    let len = memory_lender_retrieve_request_init(&mut buf, handle, 0x8001).unwrap();
    assert_eq!(len, 32);
    assert!(buf[..len].iter().enumerate().all(|(i, &b)| {
        matches!(i, 0..=1 | 8..=15) || b == 0
    }));

    let desc = MemoryRegionDescriptor::parse(&buf[..len]).unwrap();
    assert_eq!(desc.sender(), 0x8001);
    assert_eq!(desc.handle(), handle);
    assert_eq!(desc.receiver_count(), 0);
    assert_eq!(desc.receiver(0), Err(DescriptorError::ReceiverOutOfRange(0)));
}

#[test]
fn test_retrieved_region_keeps_handle() {
    let handle = MemoryHandle::make(0x42);
    let tx = share_tx();
    let constituents = [Constituent { address: 0x7000_0000, page_count: 8 }];

    let mut sent = [0u8; 128];
    let sent_len = memory_region_init(&mut sent, &tx, &constituents).unwrap();

    let mut retrieved = [0u8; 128];
    let len = retrieved_memory_region_init(&mut retrieved, handle, &tx, &constituents).unwrap();
    assert_eq!(len, sent_len);

    let desc = MemoryRegionDescriptor::parse(&retrieved[..len]).unwrap();
    assert_eq!(desc.handle(), handle);
    assert_eq!(desc.attributes(), tx.attributes);
    assert_eq!(desc.receiver(0).unwrap().permissions, tx.permissions);

    // Same bytes apart from the handle.
    assert_eq!(&retrieved[..8], &sent[..8]);
    assert_eq!(&retrieved[16..len], &sent[16..len]);
}

#[test]
fn test_buffer_too_small() {
    let constituents = [Constituent { address: 0x6000_0000, page_count: 1 }];
    let mut buf = [0u8; 79];
    let err = memory_region_init(&mut buf, &share_tx(), &constituents).unwrap_err();
    assert_eq!(err, DescriptorError::BufferTooSmall { needed: 80, available: 79 });
    assert_eq!(err.ffa_error(), FFA_NO_MEMORY);

    let mut buf = [0u8; 47];
    assert!(memory_retrieve_request_init(&mut buf, MemoryHandle::make(1), &share_tx()).is_err());
    let mut buf = [0u8; 31];
    assert!(memory_lender_retrieve_request_init(&mut buf, MemoryHandle::make(1), 1).is_err());
}

#[test]
fn test_page_count_overflow() {
    let constituents = [
        Constituent { address: 0x6000_0000, page_count: u32::MAX },
        Constituent { address: 0x7000_0000, page_count: 1 },
    ];
    let mut buf = [0u8; 128];
    let err = memory_region_init(&mut buf, &share_tx(), &constituents).unwrap_err();
    assert_eq!(err, DescriptorError::PageCountOverflow);
    assert_eq!(err.ffa_error(), FFA_INVALID_PARAMETERS);
}

#[test]
fn test_parse_rejects_bad_descriptors() {
    let constituents = [Constituent { address: 0x6000_0000, page_count: 1 }];
    let mut buf = [0u8; 128];
    let len = memory_region_init(&mut buf, &share_tx(), &constituents).unwrap();

    // Test 1: shorter than a header
    assert_eq!(
        MemoryRegionDescriptor::parse(&buf[..31]).unwrap_err(),
        DescriptorError::Truncated
    );

    // Test 2: access descriptor cut off
    assert_eq!(
        MemoryRegionDescriptor::parse(&buf[..40]).unwrap_err(),
        DescriptorError::Truncated
    );

    // Test 3: composite offset not 16-byte aligned
    let mut misaligned = buf;
    misaligned[36..40].copy_from_slice(&40u32.to_le_bytes());
    let desc = MemoryRegionDescriptor::parse(&misaligned[..len]).unwrap();
    assert_eq!(desc.composite(0).unwrap_err(), DescriptorError::MisalignedOffset(40));

    // Test 4: composite offset past the end
    let mut far = buf;
    far[36..40].copy_from_slice(&0x1000u32.to_le_bytes());
    let desc = MemoryRegionDescriptor::parse(&far[..len]).unwrap();
    assert_eq!(desc.composite(0).unwrap_err(), DescriptorError::Truncated);

    // Test 5: constituent count larger than the buffer
    let desc = MemoryRegionDescriptor::parse(&buf[..len - 1]).unwrap();
    assert_eq!(desc.composite(0).unwrap_err(), DescriptorError::Truncated);
}

fn attributes_strategy() -> impl Strategy<Value = MemoryAttributes> {
    (
        prop_oneof![
            Just(MemoryType::NotSpecified),
            Just(MemoryType::Device),
            Just(MemoryType::Normal)
        ],
        prop_oneof![Just(Cacheability::NonCacheable), Just(Cacheability::WriteBack)],
        prop_oneof![
            Just(Shareability::NonShareable),
            Just(Shareability::Outer),
            Just(Shareability::Inner)
        ],
    )
        .prop_map(|(memory_type, cacheability, shareability)| {
            MemoryAttributes::new(memory_type, cacheability, shareability)
        })
}

fn permissions_strategy() -> impl Strategy<Value = MemoryAccessPermissions> {
    (
        prop_oneof![
            Just(DataAccess::NotSpecified),
            Just(DataAccess::ReadOnly),
            Just(DataAccess::ReadWrite)
        ],
        prop_oneof![
            Just(InstructionAccess::NotSpecified),
            Just(InstructionAccess::NotExecutable),
            Just(InstructionAccess::Executable)
        ],
    )
        .prop_map(|(data, instruction)| MemoryAccessPermissions::new(data, instruction))
}

fn constituent_strategy(max_pages: u32) -> impl Strategy<Value = Constituent> {
    (any::<u64>(), 0..=max_pages).prop_map(|(page, page_count)| Constituent {
        address: page << 12,
        page_count,
    })
}

proptest! {
    #[test]
    fn region_init_round_trips(
        sender in any::<u16>(),
        receiver in any::<u16>(),
        attributes in attributes_strategy(),
        permissions in permissions_strategy(),
        flags in any::<u32>(),
        tag in any::<u64>(),
        handle in any::<u64>(),
        constituents in prop::collection::vec(constituent_strategy(1 << 24), 0..16),
    ) {
        let tx = Transaction { sender, receiver, attributes, permissions, flags, tag };
        let handle = MemoryHandle(handle);
        let mut buf = vec![0u8; 64 + CONSTITUENT_SIZE * constituents.len()];
        let len = retrieved_memory_region_init(&mut buf, handle, &tx, &constituents).unwrap();
        prop_assert_eq!(len, buf.len());

        let desc = MemoryRegionDescriptor::parse(&buf).unwrap();
        prop_assert_eq!(desc.sender(), sender);
        prop_assert_eq!(desc.attributes(), attributes);
        prop_assert_eq!(desc.flags(), flags);
        prop_assert_eq!(desc.handle(), handle);
        prop_assert_eq!(desc.tag(), tag);
        prop_assert_eq!(desc.receiver_count(), 1);

        let access = desc.receiver(0).unwrap();
        prop_assert_eq!(access.receiver, receiver);
        prop_assert_eq!(access.permissions, permissions);
        prop_assert_eq!(access.composite_offset % 16, 0);

        let composite = desc.composite(0).unwrap().unwrap();
        let parsed: Vec<Constituent> = composite.constituents().collect();
        prop_assert_eq!(parsed, constituents);
    }

    #[test]
    fn composite_page_count_is_sum(
        constituents in prop::collection::vec(constituent_strategy(u32::MAX), 0..8),
    ) {
        let mut buf = vec![0u8; 64 + CONSTITUENT_SIZE * constituents.len()];
        let sum: u64 = constituents.iter().map(|c| u64::from(c.page_count)).sum();

        match memory_region_init(&mut buf, &share_tx(), &constituents) {
            Ok(_) => {
                let desc = MemoryRegionDescriptor::parse(&buf).unwrap();
                let composite = desc.composite(0).unwrap().unwrap();
                prop_assert_eq!(u64::from(composite.page_count), sum);
                prop_assert_eq!(composite.constituent_count(), constituents.len());
            }
            Err(err) => {
                prop_assert_eq!(err, DescriptorError::PageCountOverflow);
                prop_assert!(sum > u64::from(u32::MAX));
            }
        }
    }
}
