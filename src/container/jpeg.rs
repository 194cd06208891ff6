use img_parts::Bytes;

use super::{OtherKind, ParseError, Segment, SegmentKind};
use crate::exif::parse_tiff;

pub const SIGNATURE: [u8; 2] = [0xFF, SOI];

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const TEM: u8 = 0x01;
const RST0: u8 = 0xD0;
const RST7: u8 = 0xD7;
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const APP2: u8 = 0xE2;
const APP13: u8 = 0xED;
const APP14: u8 = 0xEE;
const APP15: u8 = 0xEF;
const COM: u8 = 0xFE;

pub const EXIF_HEADER: &[u8] = b"Exif\0\0";
const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
const XMP_EXTENSION_HEADER: &[u8] = b"http://ns.adobe.com/xmp/extension/\0";
const JFIF_HEADER: &[u8] = b"JFIF\0";
const JFXX_HEADER: &[u8] = b"JFXX\0";
const ICC_HEADER: &[u8] = b"ICC_PROFILE\0";
const PHOTOSHOP_HEADER: &[u8] = b"Photoshop 3.0\0";
const ADOBE_HEADER: &[u8] = b"Adobe";

/// Walk a JPEG byte stream into segments.
///
/// Fill bytes (`0xFF` runs) before a marker stay with the segment they
/// precede. The entropy-coded data after an SOS header, including any RSTn
/// markers inside it, belongs to the SOS segment.
pub(super) fn walk(data: &Bytes) -> Result<Vec<Segment>, ParseError> {
    if !data.starts_with(&SIGNATURE) {
        return Err(ParseError::NotAContainer);
    }

    let len = data.len();
    let mut segments = vec![Segment::new(SegmentKind::ImageData, 0, data.slice(0..2))];
    let mut pos = 2;

    loop {
        if pos >= len {
            return Err(ParseError::Truncated {
                offset: pos,
                needed: 2,
                available: 0,
            });
        }
        let start = pos;
        if data[pos] != 0xFF {
            return Err(ParseError::malformed(
                pos,
                format!("expected a marker, found byte 0x{:02X}", data[pos]),
            ));
        }
        while pos < len && data[pos] == 0xFF {
            pos += 1;
        }
        if pos >= len {
            return Err(ParseError::Truncated {
                offset: start,
                needed: pos - start + 1,
                available: len - start,
            });
        }
        let marker = data[pos];
        pos += 1;

        match marker {
            0x00 => return Err(ParseError::malformed(start, "invalid marker 0xFF00")),
            SOI => return Err(ParseError::malformed(start, "unexpected second SOI marker")),
            EOI => {
                segments.push(Segment::new(SegmentKind::ImageData, start, data.slice(start..pos)));
                break;
            }
            TEM | RST0..=RST7 => {
                segments.push(Segment::new(SegmentKind::ImageData, start, data.slice(start..pos)));
                continue;
            }
            _ => {}
        }

        if pos + 2 > len {
            return Err(ParseError::Truncated {
                offset: pos,
                needed: 2,
                available: len - pos,
            });
        }
        let length = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
        if length < 2 {
            return Err(ParseError::malformed(
                start,
                format!("zero-length segment for marker 0x{marker:02X}"),
            ));
        }
        if pos + length > len {
            return Err(ParseError::Truncated {
                offset: start,
                needed: length,
                available: len - pos,
            });
        }
        let payload = &data[pos + 2..pos + length];
        let header_len = pos + 2 - start;
        let mut end = pos + length;
        if marker == SOS {
            end = scan_entropy(data, end)?;
        }

        let kind = classify(marker, payload);
        let mut segment = Segment::new(kind, start, data.slice(start..end));
        if kind == SegmentKind::Metadata {
            let base = header_len + EXIF_HEADER.len();
            let tiff_len = segment.len() - base;
            segment.tiff = Some(parse_tiff(&segment.bytes, base, tiff_len, start)?);
        }
        log::trace!("JPEG marker 0x{marker:02X} at {start}: {} bytes, {kind:?}", end - start);
        segments.push(segment);
        pos = end;
    }

    if pos < len {
        log::debug!("{} bytes follow the JPEG end-of-image marker", len - pos);
        segments.push(Segment::new(
            SegmentKind::Other(OtherKind::Trailer),
            pos,
            data.slice(pos..len),
        ));
    }

    Ok(segments)
}

/// Find the end of entropy-coded data starting at `from`: the first `0xFF`
/// that is neither byte stuffing (`FF 00`) nor a restart marker.
fn scan_entropy(data: &[u8], from: usize) -> Result<usize, ParseError> {
    let mut i = from;
    while i + 1 < data.len() {
        if data[i] == 0xFF {
            match data[i + 1] {
                0x00 | RST0..=RST7 => i += 2,
                _ => return Ok(i),
            }
        } else {
            i += 1;
        }
    }
    Err(ParseError::Truncated {
        offset: from,
        needed: data.len() - from + 2,
        available: data.len() - from,
    })
}

fn classify(marker: u8, payload: &[u8]) -> SegmentKind {
    match marker {
        APP1 if payload.starts_with(EXIF_HEADER) => SegmentKind::Metadata,
        APP1 if payload.starts_with(XMP_HEADER) || payload.starts_with(XMP_EXTENSION_HEADER) => {
            SegmentKind::Other(OtherKind::Xmp)
        }
        APP0 if payload.starts_with(JFIF_HEADER) || payload.starts_with(JFXX_HEADER) => {
            SegmentKind::Other(OtherKind::Jfif)
        }
        APP2 if payload.starts_with(ICC_HEADER) => SegmentKind::Other(OtherKind::IccProfile),
        APP13 if payload.starts_with(PHOTOSHOP_HEADER) => SegmentKind::Other(OtherKind::Iptc),
        APP14 if payload.starts_with(ADOBE_HEADER) => SegmentKind::Other(OtherKind::Adobe),
        APP0..=APP15 => SegmentKind::Other(OtherKind::Application(marker - APP0)),
        COM => SegmentKind::Other(OtherKind::Comment),
        _ => SegmentKind::ImageData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerKind, parse};
    use crate::exif::ByteOrder;
    use crate::fixtures;

    fn kinds(input: &[u8]) -> Vec<SegmentKind> {
        parse(input).unwrap().segments.iter().map(|s| s.kind).collect()
    }

    #[test]
    fn walks_synthetic_jpeg() {
        let tiff = fixtures::build_tiff(ByteOrder::Big, &fixtures::sample_layout());
        let input = fixtures::synthetic_jpeg(&[
            fixtures::jfif_segment(),
            fixtures::exif_segment(&tiff),
            fixtures::segment(0xE1, b"http://ns.adobe.com/xap/1.0/\0<x:xmpmeta/>"),
            fixtures::segment(0xFE, b"shot on holiday"),
        ]);
        let container = parse(&input).unwrap();
        assert_eq!(container.kind, ContainerKind::Jpeg);
        assert_eq!(
            kinds(&input),
            vec![
                SegmentKind::ImageData, // SOI
                SegmentKind::Other(OtherKind::Jfif),
                SegmentKind::Metadata,
                SegmentKind::Other(OtherKind::Xmp),
                SegmentKind::Other(OtherKind::Comment),
                SegmentKind::ImageData, // DQT
                SegmentKind::ImageData, // SOF0
                SegmentKind::ImageData, // SOS + scan
                SegmentKind::ImageData, // EOI
            ]
        );

        let exif = container.metadata_segments().next().unwrap();
        let block = exif.tiff.as_ref().unwrap();
        assert_eq!(block.base, 10);
        assert_eq!(block.tag_count(), 17);
    }

    #[test]
    fn scan_data_stays_with_sos() {
        let input = fixtures::synthetic_jpeg(&[]);
        let container = parse(&input).unwrap();
        let sos = &container.segments[container.segments.len() - 2];
        assert_eq!(sos.bytes[1], SOS);
        assert!(sos.bytes.ends_with(fixtures::ENTROPY));
        assert_eq!(&container.segments.last().unwrap().bytes[..], &[0xFF, EOI]);
    }

    #[test]
    fn fill_bytes_belong_to_the_following_segment() {
        let mut input = fixtures::synthetic_jpeg(&[]);
        input.splice(2..2, [0xFF, 0xFF]);
        let container = parse(&input).unwrap();
        let dqt = &container.segments[1];
        assert_eq!(dqt.offset, 2);
        assert_eq!(&dqt.bytes[..4], &[0xFF, 0xFF, 0xFF, 0xDB]);
    }

    #[test]
    fn unknown_app_segments_and_trailer_are_flagged_kinds() {
        let mut input = fixtures::synthetic_jpeg(&[fixtures::segment(0xEB, b"vendor blob")]);
        input.extend_from_slice(b"motion photo");
        let kinds = kinds(&input);
        assert_eq!(kinds[1], SegmentKind::Other(OtherKind::Application(11)));
        assert_eq!(*kinds.last().unwrap(), SegmentKind::Other(OtherKind::Trailer));
    }

    #[test]
    fn truncated_mid_segment() {
        let tiff = fixtures::build_tiff(ByteOrder::Little, &fixtures::sample_layout());
        let input = fixtures::synthetic_jpeg(&[fixtures::exif_segment(&tiff)]);
        let cut = &input[..40];
        assert!(matches!(
            parse(cut),
            Err(ParseError::Truncated { offset: 2, .. })
        ));
    }

    #[test]
    fn truncated_without_eoi() {
        let input = fixtures::synthetic_jpeg(&[]);
        let cut = &input[..input.len() - 2];
        assert!(matches!(parse(cut), Err(ParseError::Truncated { .. })));

        // SOI alone: a marker is still expected.
        assert!(matches!(parse(&SIGNATURE), Err(ParseError::Truncated { offset: 2, .. })));
    }

    #[test]
    fn zero_length_segment_is_malformed() {
        let mut input = SIGNATURE.to_vec();
        input.extend_from_slice(&[0xFF, 0xE1, 0x00, 0x00]);
        input.extend_from_slice(&[0xFF, EOI]);
        assert_eq!(
            parse(&input).unwrap_err(),
            ParseError::malformed(2, "zero-length segment for marker 0xE1")
        );
    }

    #[test]
    fn garbage_between_segments_is_malformed() {
        let mut input = SIGNATURE.to_vec();
        input.extend_from_slice(&[0x12, 0x34]);
        assert!(matches!(
            parse(&input),
            Err(ParseError::MalformedSegment { offset: 2, .. })
        ));
    }

    #[test]
    fn real_encoder_output_parses() {
        let input = fixtures::real_jpeg();
        let container = parse(&input).unwrap();
        assert!(container.metadata_segments().next().is_none());
        assert!(
            container
                .segments
                .iter()
                .any(|s| s.bytes.get(1) == Some(&SOS))
        );
    }

    #[test]
    fn corrupt_exif_fails_the_parse() {
        let mut tiff = fixtures::build_tiff(ByteOrder::Little, &fixtures::sample_layout());
        tiff[4..8].copy_from_slice(&8u32.to_le_bytes());
        // Point IFD0's next link back at IFD0 itself.
        let ifd0_count = u16::from_le_bytes([tiff[8], tiff[9]]) as usize;
        let next = 8 + 2 + ifd0_count * 12;
        tiff[next..next + 4].copy_from_slice(&8u32.to_le_bytes());
        let input = fixtures::synthetic_jpeg(&[fixtures::exif_segment(&tiff)]);
        // APP1 starts at 2; the TIFF block starts 10 bytes in.
        assert_eq!(
            parse(&input).unwrap_err(),
            ParseError::CyclicDirectory { offset: 2 + 10 + 8 }
        );
    }
}
