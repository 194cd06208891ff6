use img_parts::Bytes;

use super::{OtherKind, ParseError, Segment, SegmentKind};
use crate::exif::parse_tiff;

pub const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Largest chunk data length PNG allows (2^31 - 1).
pub const MAX_CHUNK_LEN: usize = 0x7FFF_FFFF;

/// Length, type and CRC fields around each chunk's data.
pub const CHUNK_OVERHEAD: usize = 12;

const XMP_KEYWORD: &[u8] = b"XML:com.adobe.xmp\0";

/// Chunks that affect how the image is decoded or displayed.
const RENDERING_CHUNKS: &[&[u8; 4]] = &[
    b"IHDR", b"PLTE", b"IDAT", b"IEND", b"tRNS", b"gAMA", b"cHRM", b"sRGB", b"iCCP", b"sBIT",
    b"bKGD", b"hIST", b"pHYs", b"sPLT", b"cICP", b"mDCv", b"cLLi", b"acTL", b"fcTL", b"fdAT",
];

/// Walk a PNG byte stream: the signature, then one segment per chunk.
pub(super) fn walk(data: &Bytes) -> Result<Vec<Segment>, ParseError> {
    if !data.starts_with(&SIGNATURE) {
        return Err(ParseError::NotAContainer);
    }

    let len = data.len();
    let mut segments = vec![Segment::new(
        SegmentKind::ImageData,
        0,
        data.slice(0..SIGNATURE.len()),
    )];
    let mut pos = SIGNATURE.len();

    loop {
        if pos + 8 > len {
            return Err(ParseError::Truncated {
                offset: pos,
                needed: 8,
                available: len - pos,
            });
        }
        let length = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
            as usize;
        let chunk_type: [u8; 4] = [data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]];

        if length > MAX_CHUNK_LEN {
            return Err(ParseError::malformed(
                pos,
                format!("chunk length {length} exceeds the PNG limit"),
            ));
        }
        if !chunk_type.iter().all(u8::is_ascii_alphabetic) {
            return Err(ParseError::malformed(pos + 4, "invalid chunk type"));
        }
        let end = pos + CHUNK_OVERHEAD + length;
        if end > len {
            return Err(ParseError::Truncated {
                offset: pos,
                needed: CHUNK_OVERHEAD + length,
                available: len - pos,
            });
        }

        let chunk_data = &data[pos + 8..pos + 8 + length];
        let kind = classify(&chunk_type, chunk_data);
        let mut segment = Segment::new(kind, pos, data.slice(pos..end));
        if kind == SegmentKind::Metadata {
            segment.tiff = Some(parse_tiff(&segment.bytes, 8, length, pos)?);
        }
        log::trace!(
            "PNG chunk {} at {pos}: {length} bytes, {kind:?}",
            String::from_utf8_lossy(&chunk_type)
        );
        segments.push(segment);
        pos = end;

        if &chunk_type == b"IEND" {
            break;
        }
    }

    if pos < len {
        log::debug!("{} bytes follow the PNG IEND chunk", len - pos);
        segments.push(Segment::new(
            SegmentKind::Other(OtherKind::Trailer),
            pos,
            data.slice(pos..len),
        ));
    }

    Ok(segments)
}

fn classify(chunk_type: &[u8; 4], chunk_data: &[u8]) -> SegmentKind {
    match chunk_type {
        b"eXIf" => SegmentKind::Metadata,
        b"iTXt" if chunk_data.starts_with(XMP_KEYWORD) => SegmentKind::Other(OtherKind::Xmp),
        b"tEXt" | b"zTXt" | b"iTXt" => SegmentKind::Other(OtherKind::Text),
        b"tIME" => SegmentKind::Other(OtherKind::Timestamp),
        ty if RENDERING_CHUNKS.contains(&ty) => SegmentKind::ImageData,
        // Unknown critical chunks: a decoder must understand them, so they are image data.
        ty if ty[0].is_ascii_uppercase() => SegmentKind::ImageData,
        ty => SegmentKind::Other(OtherKind::Ancillary(*ty)),
    }
}
