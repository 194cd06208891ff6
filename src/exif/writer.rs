use std::ops::Range;

use super::{ByteOrder, DataType, Directory, DirectoryKind, ENTRY_LEN, Retention, TagEntry, TiffBlock, dir_len};

const HEADER_LEN: usize = 8;

/// Entry position relative to the TIFF header.
fn record_at(block: &TiffBlock, entry: &TagEntry) -> usize {
    entry.entry_offset - block.base
}

fn value_range(block: &TiffBlock, entry: &TagEntry) -> Range<usize> {
    let start = entry.byte_offset_within_segment - block.base;
    start..start + entry.value.len()
}

fn kept_entries<'a>(
    dir: &'a Directory,
    keep: &'a [bool],
) -> impl Iterator<Item = &'a TagEntry> + 'a {
    dir.entries.iter().zip(keep).filter(|(_, k)| **k).map(|(e, _)| e)
}

/// Chain successor of a directory, when it survives.
fn retained_next(dir: &Directory, keep: &Retention) -> Option<usize> {
    match (dir.kind, dir.next_dir) {
        (DirectoryKind::Primary(_), Some(next)) if keep.directories[next] => Some(next),
        _ => None,
    }
}

fn mark(live: &mut [bool], range: Range<usize>) {
    live[range].fill(true);
}

/// Rewrite a TIFF block without moving anything.
///
/// Every retained directory stays at its offset. Its kept entry records are
/// compacted towards the start of the directory in their original order and
/// followed by the next link, so out-of-line values keep their offsets byte
/// for byte. Vacated record slots, dropped directories,
/// removed out-of-line values and removed located data are zeroed unless
/// something kept still covers them. The block keeps its length.
pub(crate) fn rewrite_in_place(block: &TiffBlock, tiff: &[u8], keep: &Retention) -> Vec<u8> {
    let order = block.byte_order;
    let mut out = tiff.to_vec();
    let mut live = vec![false; tiff.len()];
    let mut dead: Vec<Range<usize>> = Vec::new();

    mark(&mut live, 0..HEADER_LEN);

    for (d, dir) in block.directories.iter().enumerate() {
        dead.push(dir.offset..dir.offset + dir.byte_len());
        if keep.directories[d] {
            mark(&mut live, dir.offset..dir.offset + dir_len(keep.kept_in(d)));
        }
        for (entry, kept) in dir.entries.iter().zip(&keep.entries[d]) {
            let mut ranges = entry.data_ranges.clone();
            if entry.out_of_line {
                ranges.push(value_range(block, entry));
            }
            if *kept && keep.directories[d] {
                for range in ranges {
                    mark(&mut live, range);
                }
            } else {
                dead.extend(ranges);
            }
        }
    }

    for (d, dir) in block.directories.iter().enumerate() {
        if !keep.directories[d] {
            continue;
        }
        let mut pos = dir.offset;
        out[pos..pos + 2].copy_from_slice(&order.encode_u16(keep.kept_in(d) as u16));
        pos += 2;
        for entry in kept_entries(dir, &keep.entries[d]) {
            let rec = record_at(block, entry);
            out[pos..pos + ENTRY_LEN].copy_from_slice(&tiff[rec..rec + ENTRY_LEN]);
            pos += ENTRY_LEN;
        }
        // Sub-directory next links are left as found.
        let next = match dir.kind {
            DirectoryKind::Primary(_) if retained_next(dir, keep).is_none() => 0,
            _ => dir.next,
        };
        out[pos..pos + 4].copy_from_slice(&order.encode_u32(next));
    }

    let mut wiped = 0;
    for range in dead {
        for i in range {
            if !live[i] && out[i] != 0 {
                out[i] = 0;
                wiped += 1;
            }
        }
    }
    log::debug!("In-place rewrite zeroed {wiped} of {} bytes", tiff.len());
    out
}

/// Bytes a retained directory occupies in the repacked layout, split into
/// the directory itself, its out-of-line values and its located data.
fn footprint(block: &TiffBlock, dir: &Directory, keep: &[bool]) -> (usize, usize, usize) {
    let kept: Vec<&TagEntry> = kept_entries(dir, keep).collect();
    let values = kept
        .iter()
        .filter(|e| e.out_of_line)
        .map(|e| padded(value_range(block, e).len()))
        .sum();
    let data = kept
        .iter()
        .flat_map(|e| e.data_ranges.iter())
        .map(|r| padded(r.len()))
        .sum();
    (dir_len(kept.len()), values, data)
}

fn padded(len: usize) -> usize {
    len + (len & 1)
}

fn push_padded(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(bytes);
    if bytes.len() % 2 == 1 {
        out.push(0);
    }
}

/// Re-encode an offset tag's value with new locations, keeping its type.
fn encode_offsets(order: ByteOrder, data_type: DataType, offsets: &[usize]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(offsets.len() * data_type.size());
    for &offset in offsets {
        match data_type {
            DataType::Short => out.extend_from_slice(&order.encode_u16(u16::try_from(offset).ok()?)),
            DataType::Long => out.extend_from_slice(&order.encode_u32(u32::try_from(offset).ok()?)),
            _ => return None,
        }
    }
    Some(out)
}

/// Rebuild a TIFF block from scratch, dropping every gap.
///
/// Layout: header, then each retained directory in arena order followed by
/// its kept out-of-line values and then its located data, every piece padded
/// to an even length. Pointers, value offsets and locator offsets are
/// rewritten to the new positions; sub-directory next links become zero.
///
/// Returns `None` when a relocated offset does not fit its field (a SHORT
/// locator past 64 KiB); the caller falls back to [`rewrite_in_place`].
pub(crate) fn repack(block: &TiffBlock, tiff: &[u8], keep: &Retention) -> Option<Vec<u8>> {
    let order = block.byte_order;

    let mut relocated: Vec<Option<u32>> = vec![None; block.directories.len()];
    let mut cursor = HEADER_LEN;
    for (d, dir) in block.directories.iter().enumerate() {
        if keep.directories[d] {
            relocated[d] = Some(u32::try_from(cursor).ok()?);
            let (dir_bytes, values, data) = footprint(block, dir, &keep.entries[d]);
            cursor += dir_bytes + values + data;
        }
    }
    u32::try_from(cursor).ok()?;

    let mut out = Vec::with_capacity(cursor);
    out.extend_from_slice(order.mark());
    out.extend_from_slice(&order.encode_u16(42));
    out.extend_from_slice(&order.encode_u32(HEADER_LEN as u32));

    for (d, dir) in block.directories.iter().enumerate() {
        let Some(start) = relocated[d] else {
            continue;
        };
        let start = start as usize;
        debug_assert_eq!(out.len(), start);

        let kept: Vec<&TagEntry> = kept_entries(dir, &keep.entries[d]).collect();
        let (dir_bytes, values_len, _) = footprint(block, dir, &keep.entries[d]);
        let mut value_cursor = start + dir_bytes;
        let mut data_cursor = value_cursor + values_len;

        let mut records = Vec::with_capacity(kept.len() * ENTRY_LEN);
        let mut values = Vec::with_capacity(values_len);
        let mut data = Vec::new();

        for entry in &kept {
            let rec = record_at(block, entry);
            let mut record: [u8; ENTRY_LEN] = tiff[rec..rec + ENTRY_LEN].try_into().ok()?;
            let mut value = tiff[value_range(block, entry)].to_vec();

            if !entry.data_ranges.is_empty() {
                let mut offsets = Vec::with_capacity(entry.data_ranges.len());
                for range in &entry.data_ranges {
                    offsets.push(data_cursor);
                    data_cursor += padded(range.len());
                    push_padded(&mut data, &tiff[range.clone()]);
                }
                value = encode_offsets(order, entry.data_type, &offsets)?;
            }

            if let Some(child) = entry.child {
                record[8..12].copy_from_slice(&order.encode_u32(relocated[child]?));
            } else if entry.out_of_line {
                record[8..12].copy_from_slice(&order.encode_u32(u32::try_from(value_cursor).ok()?));
                value_cursor += padded(value.len());
                push_padded(&mut values, &value);
            } else {
                record[8..8 + value.len()].copy_from_slice(&value);
            }
            records.extend_from_slice(&record);
        }

        let next = match retained_next(dir, keep) {
            Some(i) => relocated[i]?,
            None => 0,
        };
        out.extend_from_slice(&order.encode_u16(kept.len() as u16));
        out.extend_from_slice(&records);
        out.extend_from_slice(&order.encode_u32(next));
        out.extend_from_slice(&values);
        out.extend_from_slice(&data);
    }

    log::debug!("Repacked TIFF block from {} to {} bytes", tiff.len(), out.len());
    Some(out)
}
