use std::collections::BTreeMap;
use thiserror::Error;

use super::png::{CHUNK_OVERHEAD, MAX_CHUNK_LEN};
use super::{Container, ContainerKind, Segment};

/// What to emit in place of an original segment.
#[derive(Debug, Clone)]
pub enum Replacement {
    Segment(Segment),
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("segment at offset {offset} needs a length of {size}, its length field holds at most {max}")]
    Overflow { offset: usize, size: usize, max: usize },
    #[error("no segment starts at offset {offset}")]
    UnknownSegment { offset: usize },
    #[error("replacement for segment at offset {offset} is too short to carry its framing")]
    Unframed { offset: usize },
}

impl WriteError {
    pub fn offset(&self) -> usize {
        match self {
            Self::Overflow { offset, .. }
            | Self::UnknownSegment { offset }
            | Self::Unframed { offset } => *offset,
        }
    }
}

/// Reassemble a container.
///
/// Segments are emitted in their original order. A segment with an entry in
/// `replacements` (keyed by its original offset) is swapped for the
/// replacement, whose framing is recomputed: the JPEG segment length, or the
/// PNG chunk length and CRC. Everything else is copied verbatim.
pub fn write(
    container: &Container,
    replacements: &BTreeMap<usize, Replacement>,
) -> Result<Vec<u8>, WriteError> {
    for &offset in replacements.keys() {
        if !container.segments.iter().any(|s| s.offset == offset) {
            return Err(WriteError::UnknownSegment { offset });
        }
    }

    let mut out = Vec::with_capacity(container.len());
    for segment in &container.segments {
        match replacements.get(&segment.offset) {
            None => out.extend_from_slice(&segment.bytes),
            Some(Replacement::Drop) => {
                log::debug!("Dropping {} bytes at offset {}", segment.len(), segment.offset);
            }
            Some(Replacement::Segment(new)) => {
                let framed = match container.kind {
                    ContainerKind::Jpeg => reframe_jpeg(segment.offset, new)?,
                    ContainerKind::Png => reframe_png(segment.offset, new)?,
                };
                out.extend_from_slice(&framed);
            }
        }
    }
    Ok(out)
}

/// Rewrite the 16-bit length that follows the marker (and any fill bytes).
fn reframe_jpeg(offset: usize, segment: &Segment) -> Result<Vec<u8>, WriteError> {
    let mut bytes = segment.bytes.to_vec();
    let fill = bytes.iter().take_while(|b| **b == 0xFF).count();
    let length_at = fill + 1;
    if fill == 0 || length_at + 2 > bytes.len() {
        return Err(WriteError::Unframed { offset });
    }
    let size = bytes.len() - length_at;
    if size > u16::MAX as usize {
        return Err(WriteError::Overflow {
            offset,
            size,
            max: u16::MAX as usize,
        });
    }
    bytes[length_at..length_at + 2].copy_from_slice(&(size as u16).to_be_bytes());
    Ok(bytes)
}

/// Rewrite the chunk length and CRC around the (possibly resized) data.
fn reframe_png(offset: usize, segment: &Segment) -> Result<Vec<u8>, WriteError> {
    let mut bytes = segment.bytes.to_vec();
    if bytes.len() < CHUNK_OVERHEAD {
        return Err(WriteError::Unframed { offset });
    }
    let size = bytes.len() - CHUNK_OVERHEAD;
    if size > MAX_CHUNK_LEN {
        return Err(WriteError::Overflow {
            offset,
            size,
            max: MAX_CHUNK_LEN,
        });
    }
    bytes[0..4].copy_from_slice(&(size as u32).to_be_bytes());
    let crc_at = bytes.len() - 4;
    let crc = crc32fast::hash(&bytes[4..crc_at]);
    bytes[crc_at..].copy_from_slice(&crc.to_be_bytes());
    Ok(bytes)
}
