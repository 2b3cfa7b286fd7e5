use std::io::{Cursor, Seek, SeekFrom};

use proptest::prelude::*;
use tempfile::NamedTempFile;

use asafw::{
    build_default_tree, check_root_sentinel, copy_extent, decode_one, decode_sequence,
    default_certificate_records, encode_sequence, expand_boot_payload, parse_block, parse_root,
    parse_root_with, wrap_boot, write_block, write_root, Block, BlockHeader, BlockId, Error,
    FieldRecord, FieldValue, Metadata, ParseOptions, Payload, DEFAULT_SIGNING_KEY, SENTINEL,
    UUID_BOOT, UUID_BOOT_ELF, UUID_FIRMWARE_CONTAINER, UUID_KERNEL_PARAMS, UUID_MAIN_CONTAINER,
    UUID_ROOTFS,
};

fn sample_tree() -> Block {
    build_default_tree(
        "5AB844ED",
        &DEFAULT_SIGNING_KEY,
        vec![0xAB; 256],
        "root=/dev/ram quiet",
        Cursor::new(vec![1u8; 1000]),
        Cursor::new(vec![2u8; 2000]),
    )
    .unwrap()
}

fn sample_image() -> Vec<u8> {
    let mut image = Vec::new();
    write_root(&mut image, sample_tree()).unwrap();
    image
}

#[test]
fn default_tree_round_trip() {
    let image = sample_image();
    let root = parse_root(&mut Cursor::new(&image)).unwrap();

    assert_eq!(root.header().uuid(), UUID_MAIN_CONTAINER);
    assert!(root.is_container());
    assert_eq!(root.children().len(), 1);

    let firmware = &root.children()[0];
    assert_eq!(firmware.header().uuid(), UUID_FIRMWARE_CONTAINER);
    let roles: Vec<_> = firmware
        .children()
        .iter()
        .map(|c| c.header().uuid())
        .collect();
    assert_eq!(roles, vec![UUID_KERNEL_PARAMS, UUID_ROOTFS, UUID_BOOT]);

    // 1000-byte rootfs rounds up to the next 16-byte boundary.
    let rootfs = &firmware.children()[1];
    assert_eq!(rootfs.header().data_length(), 1008);
    match rootfs.payload() {
        Payload::Opaque(bytes) => {
            assert_eq!(bytes.len(), 1008);
            assert!(bytes[..1000].iter().all(|&b| b == 1));
            assert!(bytes[1000..].iter().all(|&b| b == 0));
        }
        other => panic!("expected buffered rootfs payload, got {other:?}"),
    }

    // Root metadata decodes as the nine-slot certificate sequence.
    match root.metadata() {
        Some(Metadata::Structured(records)) => {
            assert_eq!(records.len(), 9);
            assert_eq!(records[8].tag, 12);
        }
        other => panic!("expected structured root metadata, got {other:?}"),
    }
}

#[test]
fn written_stream_satisfies_length_and_alignment_laws() {
    let image = sample_image();
    assert_eq!(image.len() % 16, 0);
    assert_eq!(&image[..16], &SENTINEL[..]);

    let root = parse_root(&mut Cursor::new(&image)).unwrap();
    for (_, block) in root.iter() {
        let header = block.header();
        assert_eq!(header.metadata_length() % 16, 0);
        assert_eq!(header.data_length() % 16, 0);

        if header.has_children() {
            let span_sum: u64 = block
                .children()
                .iter()
                .map(|c| 32 + c.header().metadata_length() + c.header().data_length())
                .sum();
            assert_eq!(header.data_length(), span_sum);
        }
    }
}

#[test]
fn truncated_metadata_region_is_reported() {
    // Declared metadata of 0xFF units (4080 bytes) with only 100 available.
    let mut header = BlockHeader::new(UUID_FIRMWARE_CONTAINER);
    header.set_metadata_length(4080).unwrap();

    let mut stream = Vec::new();
    header.encode(&mut stream).unwrap();
    stream.extend_from_slice(&[0u8; 100]);

    let err = parse_block(&mut Cursor::new(stream), &ParseOptions::default()).unwrap_err();
    assert!(matches!(err, Error::TruncatedInput));
}

#[test]
fn misordered_group_is_rejected() {
    // Tag 3's group must hold 4,5,6; hand it 4,5,7 instead.
    let records = vec![
        FieldRecord::opaque(1, [0x01, 0x01]),
        FieldRecord::opaque(2, [0x00, 0x00, 0x01, 0x8c]),
        FieldRecord::group(3, vec![
            FieldRecord::opaque(4, *b"issuer"),
            FieldRecord::opaque(5, *b"serial"),
            FieldRecord::opaque(7, *b"oops"),
        ]),
    ];
    let bytes = encode_sequence(&records).unwrap();

    let err = decode_sequence(&mut bytes.as_slice()).unwrap_err();
    assert!(matches!(err, Error::UnexpectedFieldOrder { expected: 6, found: 7 }));
}

#[test]
fn misordered_top_level_is_rejected() {
    let records = vec![
        FieldRecord::opaque(1, [0x01]),
        FieldRecord::opaque(4, [0x02]),
    ];
    let bytes = encode_sequence(&records).unwrap();

    let err = decode_sequence(&mut bytes.as_slice()).unwrap_err();
    assert!(matches!(err, Error::UnexpectedFieldOrder { expected: 2, found: 4 }));
}

#[test]
fn certificate_sequence_group_law() {
    let records = default_certificate_records("60A6A3E5", &DEFAULT_SIGNING_KEY);
    let bytes = encode_sequence(&records).unwrap();

    let decoded = decode_sequence(&mut bytes.as_slice()).unwrap();
    assert_eq!(decoded, records);

    match &decoded[2].value {
        FieldValue::Group(inner) => {
            let tags: Vec<_> = inner.iter().map(|r| r.tag).collect();
            assert_eq!(tags, vec![4, 5, 6]);
        }
        other => panic!("expected tag-3 group, got {other:?}"),
    }

    // Re-encoding reproduces the original bytes exactly.
    assert_eq!(encode_sequence(&decoded).unwrap(), bytes);
}

#[test]
fn default_certificate_metadata_fills_its_region() {
    let records = default_certificate_records("60A6A3E5", &DEFAULT_SIGNING_KEY);
    let metadata = Metadata::Structured(records);
    // 407 encoded bytes + the 0xEB trailer, padded out to 416.
    assert_eq!(metadata.encoded_len().unwrap(), 408);

    let mut root = Block::new(BlockId::MainContainer);
    root.set_metadata(metadata).unwrap();
    assert_eq!(root.header().metadata_length(), 416);
}

#[test]
fn boot_envelope_expands_into_nested_tree() {
    let original: Vec<u8> = (0..500u32).map(|i| i as u8).collect();
    let mut envelope = Vec::new();
    wrap_boot(&mut envelope, Cursor::new(original.clone())).unwrap();

    let tree = build_default_tree(
        "5AB844ED",
        &DEFAULT_SIGNING_KEY,
        vec![0u8; 256],
        "quiet",
        Cursor::new(vec![1u8; 64]),
        Cursor::new(envelope),
    )
    .unwrap();
    let mut image = Vec::new();
    write_root(&mut image, tree).unwrap();

    let options = ParseOptions { expand_boot: true, ..ParseOptions::default() };
    let root = parse_root_with(&mut Cursor::new(&image), &options).unwrap();

    let boot = &root.children()[0].children()[2];
    assert_eq!(boot.header().uuid(), UUID_BOOT);
    assert!(boot.header().has_children());
    assert_eq!(boot.children().len(), 1);

    let inner = &boot.children()[0];
    assert_eq!(inner.header().uuid(), UUID_BOOT_ELF);
    assert_eq!(inner.header().data_length(), 512);
    match inner.payload() {
        Payload::Opaque(bytes) => {
            assert_eq!(&bytes[..500], &original[..]);
            assert!(bytes[500..].iter().all(|&b| b == 0));
        }
        other => panic!("expected buffered inner payload, got {other:?}"),
    }
}

#[test]
fn undecodable_boot_payload_stays_an_opaque_leaf() {
    // 300 bytes that are in no way a gzip stream.
    let tree = build_default_tree(
        "5AB844ED",
        &DEFAULT_SIGNING_KEY,
        vec![0u8; 256],
        "quiet",
        Cursor::new(vec![1u8; 64]),
        Cursor::new(vec![0x55u8; 300]),
    )
    .unwrap();
    let mut image = Vec::new();
    write_root(&mut image, tree).unwrap();

    let options = ParseOptions { expand_boot: true, ..ParseOptions::default() };
    let root = parse_root_with(&mut Cursor::new(&image), &options).unwrap();

    let boot = &root.children()[0].children()[2];
    assert!(!boot.header().has_children());
    assert!(matches!(boot.payload(), Payload::Opaque(bytes) if bytes.len() == 304));
}

#[test]
fn expansion_failure_is_a_distinct_outcome() {
    let err = expand_boot_payload(&[0x55u8; 300]).unwrap_err();
    assert!(matches!(err, Error::GenericFallback));
}

#[test]
fn headerless_stream_parses_from_offset_zero() {
    let mut bare = Vec::new();
    write_block(&mut bare, sample_tree()).unwrap();

    let mut cursor = Cursor::new(&bare);
    assert!(!check_root_sentinel(&mut cursor).unwrap());
    assert_eq!(cursor.position(), 0);

    let root = parse_root(&mut Cursor::new(&bare)).unwrap();
    assert_eq!(root.header().uuid(), UUID_MAIN_CONTAINER);

    // Same tree as the sentinel-prefixed layout yields.
    let prefixed = parse_root(&mut Cursor::new(sample_image())).unwrap();
    assert_eq!(root.header(), prefixed.header());
    assert_eq!(root.children().len(), prefixed.children().len());
}

#[test]
fn deferred_payloads_become_extents() {
    let mut file = NamedTempFile::new().unwrap();
    write_root(file.as_file_mut(), sample_tree()).unwrap();
    file.as_file_mut().seek(SeekFrom::Start(0)).unwrap();

    let options = ParseOptions { defer_payloads: true, ..ParseOptions::default() };
    let root = parse_root_with(file.as_file_mut(), &options).unwrap();

    let rootfs = &root.children()[0].children()[1];
    let extent = match rootfs.payload() {
        Payload::Extent(extent) => *extent,
        other => panic!("expected deferred extent, got {other:?}"),
    };
    // sentinel 16 + root header/meta 448 + fw header/meta 288
    // + kernel-params 64 + rootfs header 32
    assert_eq!(extent.offset, 848);
    assert_eq!(extent.length, 1008);

    let mut out = Vec::new();
    let copied = copy_extent(file.as_file_mut(), &extent, &mut out).unwrap();
    assert_eq!(copied, 1008);
    assert!(out[..1000].iter().all(|&b| b == 1));
}

#[test]
fn nesting_past_the_cap_is_malformed() {
    let mut block = Block::new(BlockId::FirmwareContainer);
    for _ in 0..20 {
        let mut parent = Block::new(BlockId::FirmwareContainer);
        parent.set_children(vec![block]).unwrap();
        block = parent;
    }

    let mut bytes = Vec::new();
    write_block(&mut bytes, block).unwrap();

    let err = parse_block(&mut Cursor::new(bytes), &ParseOptions::default()).unwrap_err();
    assert!(matches!(err, Error::MalformedTree(_)));
}

#[test]
fn child_overrun_is_a_size_mismatch() {
    // Parent declares 48 bytes of children; two empty leaves span 64.
    let mut parent = BlockHeader::new(UUID_FIRMWARE_CONTAINER);
    parent.set_has_children(true);
    parent.set_data_length(48).unwrap();

    let mut stream = Vec::new();
    parent.encode(&mut stream).unwrap();
    BlockHeader::new(UUID_ROOTFS).encode(&mut stream).unwrap();
    BlockHeader::new(UUID_ROOTFS).encode(&mut stream).unwrap();

    let err = parse_block(&mut Cursor::new(stream), &ParseOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::ChildSizeMismatch { declared: 48, consumed: 64 }
    ));
}

#[test]
fn missing_children_are_a_truncation() {
    let mut parent = BlockHeader::new(UUID_FIRMWARE_CONTAINER);
    parent.set_has_children(true);
    parent.set_data_length(64).unwrap();

    let mut stream = Vec::new();
    parent.encode(&mut stream).unwrap();
    BlockHeader::new(UUID_ROOTFS).encode(&mut stream).unwrap();

    let err = parse_block(&mut Cursor::new(stream), &ParseOptions::default()).unwrap_err();
    assert!(matches!(err, Error::TruncatedInput));
}

#[test]
fn header_codec_round_trips() {
    let mut header = BlockHeader::new(UUID_ROOTFS);
    header.set_metadata_length(32).unwrap();
    header.set_data_length(1008).unwrap();

    let mut bytes = Vec::new();
    header.encode(&mut bytes).unwrap();
    assert_eq!(bytes.len(), 32);

    let decoded = BlockHeader::decode(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(decoded, header);
    assert_eq!(decoded.metadata_length(), 32);
    assert_eq!(decoded.data_length(), 1008);
    assert!(!decoded.has_children());
}

#[test]
fn length_setters_enforce_scaling_preconditions() {
    let mut header = BlockHeader::new(UUID_ROOTFS);

    assert!(matches!(
        header.set_metadata_length(15),
        Err(Error::AlignmentViolation(15))
    ));
    assert!(matches!(
        header.set_metadata_length(4096),
        Err(Error::OutOfRange(4096))
    ));
    header.set_metadata_length(4080).unwrap();
    assert_eq!(header.metadata_length(), 4080);

    assert!(matches!(
        header.set_data_length(7),
        Err(Error::AlignmentViolation(7))
    ));
    // 0x1000_0000 × 16 overflows the 32-bit raw field.
    assert!(matches!(
        header.set_data_length(0x1000_0000),
        Err(Error::OutOfRange(_))
    ));
    header.set_data_length(0x0FFF_FFF0).unwrap();
    assert_eq!(header.data_length(), 0x0FFF_FFF0);
}

#[test]
fn unknown_uuids_pass_through_as_opaque_blocks() {
    let foreign = uuid::Uuid::from_bytes([0xAA; 16]);
    let mut block = Block::with_uuid(foreign);
    block.set_payload(vec![9u8; 16]).unwrap();

    let mut bytes = Vec::new();
    write_block(&mut bytes, block).unwrap();

    let parsed = parse_block(&mut Cursor::new(bytes), &ParseOptions::default()).unwrap();
    assert_eq!(parsed.header().uuid(), foreign);
    assert!(parsed.header().block_id().is_none());
    assert!(matches!(parsed.payload(), Payload::Opaque(bytes) if bytes.len() == 16));
}

proptest! {
    #[test]
    fn scaled_data_length_inverts(n in 0u64..=0x0FFF_FFFFu64) {
        let n = n & !15;
        let mut header = BlockHeader::new(UUID_ROOTFS);
        header.set_data_length(n).unwrap();
        prop_assert_eq!(header.data_length(), n);
    }

    #[test]
    fn opaque_record_round_trips(
        tag in 1u8..=12,
        value in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let record = FieldRecord::opaque(tag, value);
        let bytes = encode_sequence(std::slice::from_ref(&record)).unwrap();
        let decoded = decode_one(&mut bytes.as_slice()).unwrap();
        prop_assert_eq!(decoded, record);
    }
}
