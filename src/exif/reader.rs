use img_parts::Bytes;
use std::collections::VecDeque;
use std::ops::Range;

use super::{
    ByteOrder, DataType, Directory, DirectoryKind, ENTRY_LEN, LOCATORS, TagEntry, TiffBlock,
    dir_len,
};
use crate::container::ParseError;

const TIFF_MAGIC: u16 = 42;
/// Upper bound on directories per block; real files carry four or five.
const MAX_DIRECTORIES: usize = 32;

/// How a pending directory was reached.
enum Link {
    Root,
    Pointer { dir: usize, entry: usize },
    Next { dir: usize },
}

struct Pending {
    offset: usize,
    kind: DirectoryKind,
    link: Link,
}

/// Parse the TIFF block stored at `segment[base..base + len]`.
///
/// `origin` is the absolute file offset of `segment`; every error carries an
/// absolute offset derived from it.
///
/// Pointer tags (ExifIFD, GPS, Interop) are followed once each and the
/// IFD0 → IFD1 → ... chain is followed through its next links. A directory
/// that overlaps one already visited is reported as
/// [`ParseError::CyclicDirectory`] instead of being walked again.
pub fn parse_tiff(
    segment: &Bytes,
    base: usize,
    len: usize,
    origin: usize,
) -> Result<TiffBlock, ParseError> {
    let at = |rel: usize| origin + base + rel;
    let end = base
        .checked_add(len)
        .filter(|e| *e <= segment.len())
        .ok_or_else(|| ParseError::malformed(at(0), "TIFF block extends past its segment"))?;
    let tiff = &segment[base..end];

    if tiff.len() < 8 {
        return Err(ParseError::malformed(at(0), "TIFF header too short"));
    }
    let order = match &tiff[0..2] {
        b"II" => ByteOrder::Little,
        b"MM" => ByteOrder::Big,
        _ => return Err(ParseError::malformed(at(0), "invalid TIFF byte order mark")),
    };
    if order.read_u16(tiff, 2) != Some(TIFF_MAGIC) {
        return Err(ParseError::malformed(at(2), "invalid TIFF magic number"));
    }
    let ifd0 = order.read_u32(tiff, 4).unwrap_or(0) as usize;
    if ifd0 == 0 {
        return Err(ParseError::malformed(at(4), "TIFF header has no IFD0"));
    }

    let u16_at = |pos: usize| {
        order
            .read_u16(tiff, pos)
            .ok_or_else(|| ParseError::malformed(at(pos), "unexpected end of TIFF block"))
    };
    let u32_at = |pos: usize| {
        order
            .read_u32(tiff, pos)
            .ok_or_else(|| ParseError::malformed(at(pos), "unexpected end of TIFF block"))
    };

    let mut directories: Vec<Directory> = Vec::new();
    let mut visited: Vec<Range<usize>> = Vec::new();
    let mut queue = VecDeque::from([Pending {
        offset: ifd0,
        kind: DirectoryKind::Primary(0),
        link: Link::Root,
    }]);

    while let Some(pending) = queue.pop_front() {
        let off = pending.offset;
        if visited.iter().any(|r| r.contains(&off)) {
            return Err(ParseError::CyclicDirectory { offset: at(off) });
        }
        if directories.len() == MAX_DIRECTORIES {
            return Err(ParseError::malformed(at(off), "too many tag directories"));
        }

        let count = order
            .read_u16(tiff, off)
            .ok_or_else(|| ParseError::malformed(at(off), "directory offset out of bounds"))?
            as usize;
        let dir_end = off + dir_len(count);
        if dir_end > tiff.len() {
            return Err(ParseError::malformed(
                at(off),
                format!("directory with {count} entries extends past end of block"),
            ));
        }
        if visited.iter().any(|r| off < r.end && r.start < dir_end) {
            return Err(ParseError::CyclicDirectory { offset: at(off) });
        }
        visited.push(off..dir_end);

        let index = directories.len();
        let mut entries: Vec<TagEntry> = Vec::with_capacity(count);

        for i in 0..count {
            let pos = off + 2 + i * ENTRY_LEN;
            let tag_id = u16_at(pos)?;
            let code = u16_at(pos + 2)?;
            let value_count = u32_at(pos + 4)?;

            let data_type = DataType::from_code(code).ok_or_else(|| {
                ParseError::malformed(
                    at(pos),
                    format!("unknown data type {code} for tag 0x{tag_id:04X}"),
                )
            })?;
            if entries.iter().any(|e| e.tag_id == tag_id) {
                return Err(ParseError::DuplicateTag {
                    tag_id,
                    offset: at(pos),
                });
            }

            let size = (value_count as usize)
                .checked_mul(data_type.size())
                .filter(|s| *s <= tiff.len())
                .ok_or_else(|| {
                    ParseError::malformed(
                        at(pos),
                        format!("value of tag 0x{tag_id:04X} is larger than the block"),
                    )
                })?;
            let (value_pos, out_of_line) = if size <= 4 {
                (pos + 8, false)
            } else {
                (u32_at(pos + 8)? as usize, true)
            };
            if value_pos + size > tiff.len() {
                return Err(ParseError::malformed(
                    at(pos),
                    format!("value of tag 0x{tag_id:04X} lies outside the block"),
                ));
            }

            entries.push(TagEntry {
                tag_id,
                data_type,
                count: value_count,
                value: segment.slice(base + value_pos..base + value_pos + size),
                entry_offset: base + pos,
                byte_offset_within_segment: base + value_pos,
                out_of_line,
                child: None,
                data_ranges: Vec::new(),
            });
        }

        let next = u32_at(off + 2 + count * ENTRY_LEN)?;

        for (i, entry) in entries.iter().enumerate() {
            let Some(kind) = DirectoryKind::for_pointer(entry.tag_id) else {
                continue;
            };
            if entry.count != 1 || !matches!(entry.data_type, DataType::Long | DataType::Ifd) {
                return Err(ParseError::malformed(
                    at(entry.entry_offset - base),
                    format!("pointer tag 0x{:04X} must hold a single offset", entry.tag_id),
                ));
            }
            let target = order.read_u32(&entry.value, 0).unwrap_or(0) as usize;
            if target != 0 {
                queue.push_back(Pending {
                    offset: target,
                    kind,
                    link: Link::Pointer { dir: index, entry: i },
                });
            }
        }
        if let DirectoryKind::Primary(n) = pending.kind {
            if next != 0 {
                queue.push_back(Pending {
                    offset: next as usize,
                    kind: DirectoryKind::Primary(n + 1),
                    link: Link::Next { dir: index },
                });
            }
        }

        locate_data(&mut entries, order, tiff.len(), |rel| at(rel - base))?;

        match pending.link {
            Link::Root => {}
            Link::Pointer { dir, entry } => directories[dir].entries[entry].child = Some(index),
            Link::Next { dir } => directories[dir].next_dir = Some(index),
        }
        log::trace!(
            "{} at +{off}: {count} entries, next {next:#x}",
            pending.kind
        );
        directories.push(Directory {
            kind: pending.kind,
            offset: off,
            entries,
            next,
            next_dir: None,
        });
    }

    Ok(TiffBlock {
        base,
        len,
        byte_order: order,
        directories,
    })
}

/// Resolve the byte ranges located by offset/length tag pairs.
///
/// `at` maps a segment-relative offset to an absolute one.
fn locate_data(
    entries: &mut [TagEntry],
    order: ByteOrder,
    block_len: usize,
    at: impl Fn(usize) -> usize,
) -> Result<(), ParseError> {
    for &(offset_tag, length_tag) in LOCATORS {
        let Some(oi) = entries.iter().position(|e| e.tag_id == offset_tag) else {
            continue;
        };
        let Some(li) = entries.iter().position(|e| e.tag_id == length_tag) else {
            return Err(ParseError::malformed(
                at(entries[oi].entry_offset),
                format!("tag 0x{offset_tag:04X} has no length tag 0x{length_tag:04X}"),
            ));
        };

        let not_integer = |tag: u16| format!("locator tag 0x{tag:04X} is not SHORT or LONG");
        let offsets = read_uints(&entries[oi], order)
            .ok_or_else(|| ParseError::malformed(at(entries[oi].entry_offset), not_integer(offset_tag)))?;
        let lengths = read_uints(&entries[li], order)
            .ok_or_else(|| ParseError::malformed(at(entries[li].entry_offset), not_integer(length_tag)))?;
        if offsets.len() != lengths.len() {
            return Err(ParseError::malformed(
                at(entries[oi].entry_offset),
                format!("tags 0x{offset_tag:04X} and 0x{length_tag:04X} disagree on count"),
            ));
        }

        let mut ranges = Vec::with_capacity(offsets.len());
        for (start, length) in offsets.into_iter().zip(lengths) {
            if start + length > block_len {
                return Err(ParseError::malformed(
                    at(entries[oi].entry_offset),
                    format!("data located by tag 0x{offset_tag:04X} lies outside the block"),
                ));
            }
            ranges.push(start..start + length);
        }
        entries[oi].data_ranges = ranges;
    }
    Ok(())
}

fn read_uints(entry: &TagEntry, order: ByteOrder) -> Option<Vec<usize>> {
    match entry.data_type {
        DataType::Short => entry
            .value
            .chunks_exact(2)
            .map(|c| order.read_u16(c, 0).map(usize::from))
            .collect(),
        DataType::Long => entry
            .value
            .chunks_exact(4)
            .map(|c| order.read_u32(c, 0).map(|v| v as usize))
            .collect(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, TiffLayout, ascii, long, short, strips, tiles};

    fn parse(tiff: Vec<u8>) -> Result<TiffBlock, ParseError> {
        let len = tiff.len();
        parse_tiff(&Bytes::from(tiff), 0, len, 0)
    }

    #[test]
    fn parses_sample_block_in_both_byte_orders() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let block = parse(fixtures::build_tiff(order, &fixtures::sample_layout())).unwrap();
            assert_eq!(block.byte_order, order);

            let kinds: Vec<_> = block.directories.iter().map(|d| d.kind).collect();
            assert_eq!(
                kinds,
                vec![
                    DirectoryKind::Primary(0),
                    DirectoryKind::Exif,
                    DirectoryKind::Gps,
                    DirectoryKind::Primary(1),
                ]
            );
            assert_eq!(block.tag_count(), 17);

            let ifd0 = &block.directories[0];
            let make = &ifd0.entries[ifd0.position(0x010F).unwrap()];
            assert_eq!(&make.value[..], b"Canon\0");
            assert!(make.out_of_line);
            assert_eq!(make.data_type, DataType::Ascii);

            let exif_ptr = &ifd0.entries[ifd0.position(0x8769).unwrap()];
            assert_eq!(exif_ptr.child, Some(1));
            assert_eq!(ifd0.next_dir, Some(3));
        }
    }

    #[test]
    fn inline_values_live_in_the_entry_record() {
        let block = parse(fixtures::build_tiff(ByteOrder::Little, &fixtures::sample_layout())).unwrap();
        let ifd0 = &block.directories[0];
        let orientation = &ifd0.entries[ifd0.position(0x0112).unwrap()];
        assert!(!orientation.out_of_line);
        assert_eq!(orientation.byte_offset_within_segment, orientation.entry_offset + 8);
        assert_eq!(&orientation.value[..], &[6, 0]);
    }

    #[test]
    fn thumbnail_is_located() {
        let tiff = fixtures::build_tiff(ByteOrder::Big, &fixtures::sample_layout());
        let block = parse(tiff.clone()).unwrap();
        let ifd1 = &block.directories[3];
        let locator = &ifd1.entries[ifd1.position(0x0201).unwrap()];
        assert_eq!(locator.data_ranges.len(), 1);
        let range = locator.data_ranges[0].clone();
        assert_eq!(&tiff[range], fixtures::THUMB);
    }

    #[test]
    fn self_referencing_next_link_is_cyclic() {
        let mut tiff = fixtures::build_tiff(
            ByteOrder::Little,
            &TiffLayout {
                ifd0: vec![short(0x0112, 1)],
                ..Default::default()
            },
        );
        // IFD0 at 8 holds one entry; its next link sits at 8 + 2 + 12.
        tiff[22..26].copy_from_slice(&8u32.to_le_bytes());
        assert_eq!(parse(tiff).unwrap_err(), ParseError::CyclicDirectory { offset: 8 });
    }

    #[test]
    fn pointer_back_into_parent_is_cyclic() {
        let mut tiff = fixtures::build_tiff(
            ByteOrder::Big,
            &TiffLayout {
                ifd0: vec![short(0x0112, 1)],
                exif: Some(vec![short(0x8827, 100)]),
                ..Default::default()
            },
        );
        // Second IFD0 entry is the ExifIFD pointer; aim it inside IFD0.
        let slot = 8 + 2 + 12 + 8;
        tiff[slot..slot + 4].copy_from_slice(&12u32.to_be_bytes());
        assert!(matches!(parse(tiff), Err(ParseError::CyclicDirectory { offset: 12 })));
    }

    #[test]
    fn duplicate_tags_are_reported() {
        let tiff = fixtures::build_tiff(
            ByteOrder::Little,
            &TiffLayout {
                ifd0: vec![ascii(0x010F, "Canon"), ascii(0x010F, "Nikon")],
                ..Default::default()
            },
        );
        assert_eq!(
            parse(tiff).unwrap_err(),
            ParseError::DuplicateTag {
                tag_id: 0x010F,
                offset: 8 + 2 + 12,
            }
        );
    }

    #[test]
    fn unknown_data_type_is_malformed() {
        let mut tiff = fixtures::build_tiff(
            ByteOrder::Little,
            &TiffLayout {
                ifd0: vec![short(0x0112, 1)],
                ..Default::default()
            },
        );
        tiff[12..14].copy_from_slice(&99u16.to_le_bytes());
        assert!(matches!(parse(tiff), Err(ParseError::MalformedSegment { .. })));
    }

    #[test]
    fn value_outside_block_is_malformed() {
        let mut tiff = fixtures::build_tiff(
            ByteOrder::Little,
            &TiffLayout {
                ifd0: vec![ascii(0x010F, "Canon")],
                ..Default::default()
            },
        );
        tiff[18..22].copy_from_slice(&0xFFFFu32.to_le_bytes());
        assert!(matches!(parse(tiff), Err(ParseError::MalformedSegment { .. })));
    }

    #[test]
    fn bad_header_is_malformed() {
        assert!(matches!(
            parse(b"XX\x2a\x00\x08\x00\x00\x00".to_vec()),
            Err(ParseError::MalformedSegment { .. })
        ));
        assert!(matches!(
            parse(b"II\x2b\x00\x08\x00\x00\x00".to_vec()),
            Err(ParseError::MalformedSegment { .. })
        ));
        assert!(matches!(parse(b"II\x2a".to_vec()), Err(ParseError::MalformedSegment { .. })));
    }

    #[test]
    fn locator_without_length_is_malformed() {
        let tiff = fixtures::build_tiff(
            ByteOrder::Little,
            &TiffLayout {
                ifd0: vec![long(0x0201, 8)],
                ..Default::default()
            },
        );
        assert!(matches!(parse(tiff), Err(ParseError::MalformedSegment { .. })));
    }

    #[test]
    fn error_offsets_are_absolute() {
        let mut tiff = fixtures::build_tiff(
            ByteOrder::Little,
            &TiffLayout {
                ifd0: vec![short(0x0112, 1)],
                ..Default::default()
            },
        );
        tiff[22..26].copy_from_slice(&8u32.to_le_bytes());
        let mut segment = vec![0u8; 10];
        segment.extend_from_slice(&tiff);
        let len = tiff.len();
        let err = parse_tiff(&Bytes::from(segment), 10, len, 100).unwrap_err();
        assert_eq!(err, ParseError::CyclicDirectory { offset: 118 });
    }

    /// A chain of `count` primary directories with one entry each.
    fn primary_chain(order: ByteOrder, count: usize) -> Vec<u8> {
        let mut out = order.mark().to_vec();
        out.extend_from_slice(&order.encode_u16(TIFF_MAGIC));
        out.extend_from_slice(&order.encode_u32(8));
        for i in 0..count {
            let next = if i + 1 < count { 8 + dir_len(1) * (i + 1) } else { 0 };
            out.extend_from_slice(&order.encode_u16(1));
            out.extend_from_slice(&order.encode_u16(0x0112));
            out.extend_from_slice(&order.encode_u16(3));
            out.extend_from_slice(&order.encode_u32(1));
            out.extend_from_slice(&order.encode_u16(1));
            out.extend_from_slice(&[0, 0]);
            out.extend_from_slice(&order.encode_u32(next as u32));
        }
        out
    }

    #[test]
    fn directory_count_is_capped() {
        let block = parse(primary_chain(ByteOrder::Big, MAX_DIRECTORIES)).unwrap();
        assert_eq!(block.directories.len(), MAX_DIRECTORIES);
        assert_eq!(
            block.directories[MAX_DIRECTORIES - 1].kind,
            DirectoryKind::Primary(MAX_DIRECTORIES - 1)
        );

        let err = parse(primary_chain(ByteOrder::Little, MAX_DIRECTORIES + 1)).unwrap_err();
        assert_eq!(
            err,
            ParseError::malformed(8 + dir_len(1) * MAX_DIRECTORIES, "too many tag directories")
        );
    }

    #[test]
    fn strip_and_tile_locators_record_their_ranges() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let tiff = fixtures::build_tiff(
                order,
                &TiffLayout {
                    ifd0: vec![short(0x0112, 1)],
                    located: vec![strips(b"strip-data"), tiles(b"tile!")],
                    ..Default::default()
                },
            );
            let block = parse(tiff.clone()).unwrap();
            let ifd0 = &block.directories[0];
            for (tag, data) in [(0x0111, &b"strip-data"[..]), (0x0144, &b"tile!"[..])] {
                let entry = &ifd0.entries[ifd0.position(tag).unwrap()];
                assert_eq!(entry.data_ranges.len(), 1);
                assert_eq!(&tiff[entry.data_ranges[0].clone()], data);
            }
            let strip_offsets = &ifd0.entries[ifd0.position(0x0111).unwrap()];
            assert_eq!(strip_offsets.data_type, DataType::Short);
        }
    }
}
