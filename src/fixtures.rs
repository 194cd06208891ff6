//! Test-only builders for TIFF blocks and JPEG/PNG streams.

use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

use crate::exif::{ByteOrder, ENTRY_LEN, TAG_EXIF_IFD, TAG_GPS_IFD, TAG_INTEROP_IFD, dir_len};

pub const THUMB: &[u8] = &[0xFF, 0xD8, 0xAB, 0xCD, 0xEF, 0xFF, 0xD9];

/// Scan data with a stuffed `FF00` and an RST0 marker inside it.
pub const ENTROPY: &[u8] = &[0x12, 0xFF, 0x00, 0x34, 0xFF, 0xD0, 0x56, 0x78];

#[derive(Debug, Clone)]
pub enum Value {
    Ascii(String),
    Short(Vec<u16>),
    Long(Vec<u32>),
    Rational(Vec<(u32, u32)>),
    Undefined(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Field {
    pub tag: u16,
    pub value: Value,
}

pub fn ascii(tag: u16, s: &str) -> Field {
    Field { tag, value: Value::Ascii(s.to_string()) }
}

pub fn short(tag: u16, v: u16) -> Field {
    Field { tag, value: Value::Short(vec![v]) }
}

pub fn long(tag: u16, v: u32) -> Field {
    Field { tag, value: Value::Long(vec![v]) }
}

pub fn rational(tag: u16, num: u32, den: u32) -> Field {
    Field { tag, value: Value::Rational(vec![(num, den)]) }
}

pub fn rationals(tag: u16, values: &[(u32, u32)]) -> Field {
    Field { tag, value: Value::Rational(values.to_vec()) }
}

pub fn undefined(tag: u16, bytes: &[u8]) -> Field {
    Field { tag, value: Value::Undefined(bytes.to_vec()) }
}

impl Value {
    fn encode(&self, order: ByteOrder) -> (u16, u32, Vec<u8>) {
        match self {
            Value::Ascii(s) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                (2, bytes.len() as u32, bytes)
            }
            Value::Short(v) => (3, v.len() as u32, v.iter().flat_map(|x| order.encode_u16(*x)).collect()),
            Value::Long(v) => (4, v.len() as u32, v.iter().flat_map(|x| order.encode_u32(*x)).collect()),
            Value::Rational(v) => (
                5,
                v.len() as u32,
                v.iter()
                    .flat_map(|(n, d)| order.encode_u32(*n).into_iter().chain(order.encode_u32(*d)))
                    .collect(),
            ),
            Value::Undefined(b) => (7, b.len() as u32, b.clone()),
        }
    }
}

/// Raw data reached from IFD0 through an offset/length tag pair, such as
/// strips or tiles. Stored straight after the header, ahead of IFD0.
#[derive(Debug, Clone)]
pub struct Located {
    pub offset_tag: u16,
    pub length_tag: u16,
    /// SHORT offset and length instead of LONG.
    pub short: bool,
    pub data: Vec<u8>,
}

pub fn strips(data: &[u8]) -> Located {
    Located { offset_tag: 0x0111, length_tag: 0x0117, short: true, data: data.to_vec() }
}

pub fn tiles(data: &[u8]) -> Located {
    Located { offset_tag: 0x0144, length_tag: 0x0145, short: false, data: data.to_vec() }
}

/// Directories to lay out. Pointer tags (ExifIFD, GPS, Interop), the
/// thumbnail locator pair and the `located` pairs are appended automatically.
#[derive(Debug, Clone, Default)]
pub struct TiffLayout {
    pub ifd0: Vec<Field>,
    pub located: Vec<Located>,
    pub exif: Option<Vec<Field>>,
    pub gps: Option<Vec<Field>>,
    pub interop: Option<Vec<Field>>,
    pub ifd1: Option<Vec<Field>>,
    pub thumbnail: Option<Vec<u8>>,
}

/// A camera-like block: IFD0, ExifIFD, GPS and an IFD1 with a thumbnail.
pub fn sample_layout() -> TiffLayout {
    TiffLayout {
        ifd0: vec![
            ascii(0x010F, "Canon"),
            ascii(0x0110, "Canon EOS R5"),
            short(0x0112, 6),
            ascii(0x0132, "2024:05:04 10:11:12"),
            ascii(0x0131, "Firmware 1.8"),
        ],
        exif: Some(vec![
            rational(0x829A, 1, 250),
            short(0x8827, 400),
            ascii(0x9003, "2024:05:04 10:11:12"),
        ]),
        gps: Some(vec![
            ascii(0x0001, "N"),
            rationals(0x0002, &[(48, 1), (51, 1), (2964, 100)]),
            ascii(0x0003, "E"),
            rationals(0x0004, &[(2, 1), (17, 1), (4032, 100)]),
        ]),
        interop: None,
        located: Vec::new(),
        ifd1: Some(vec![short(0x0103, 6)]),
        thumbnail: Some(THUMB.to_vec()),
    }
}

fn padded(len: usize) -> usize {
    len + (len & 1)
}

fn blob_len(fields: &[Field], order: ByteOrder) -> usize {
    fields
        .iter()
        .map(|f| f.value.encode(order).2.len())
        .filter(|n| *n > 4)
        .map(padded)
        .sum()
}

fn set_long(fields: &mut [Field], tag: u16, v: u32) {
    if let Some(f) = fields.iter_mut().find(|f| f.tag == tag) {
        f.value = Value::Long(vec![v]);
    }
}

fn locator_field(tag: u16, short_type: bool, v: usize) -> Field {
    if short_type {
        short(tag, v as u16)
    } else {
        long(tag, v as u32)
    }
}

/// Serialize a TIFF block: header, then IFD0, ExifIFD, GPS, IFD1 and
/// Interop, each followed by its out-of-line values, then the thumbnail.
pub fn build_tiff(order: ByteOrder, layout: &TiffLayout) -> Vec<u8> {
    let mut ifd0 = layout.ifd0.clone();
    let mut located_at = Vec::with_capacity(layout.located.len());
    let mut cursor = 8;
    for located in &layout.located {
        located_at.push(cursor);
        cursor += padded(located.data.len());
        ifd0.push(locator_field(located.offset_tag, located.short, located_at[located_at.len() - 1]));
        ifd0.push(locator_field(located.length_tag, located.short, located.data.len()));
    }
    let mut exif = layout.exif.clone();
    if layout.exif.is_some() {
        ifd0.push(long(TAG_EXIF_IFD, 0));
    }
    if layout.gps.is_some() {
        ifd0.push(long(TAG_GPS_IFD, 0));
    }
    if layout.interop.is_some() {
        exif.get_or_insert_with(Vec::new).push(long(TAG_INTEROP_IFD, 0));
        if layout.exif.is_none() {
            ifd0.push(long(TAG_EXIF_IFD, 0));
        }
    }
    let mut ifd1 = layout.ifd1.clone();
    if let Some(thumb) = &layout.thumbnail {
        let fields = ifd1.get_or_insert_with(Vec::new);
        fields.push(long(0x0201, 0));
        fields.push(long(0x0202, thumb.len() as u32));
    }

    let mut dirs: Vec<(&str, Vec<Field>)> = vec![("ifd0", ifd0)];
    for (name, fields) in [("exif", exif), ("gps", layout.gps.clone()), ("ifd1", ifd1), ("interop", layout.interop.clone())] {
        if let Some(fields) = fields {
            dirs.push((name, fields));
        }
    }

    // First pass: directory offsets.
    let mut offsets = Vec::with_capacity(dirs.len());
    for (_, fields) in &dirs {
        offsets.push(cursor);
        cursor += dir_len(fields.len()) + blob_len(fields, order);
    }
    let thumb_at = cursor as u32;
    let offset_of = |name: &str| {
        dirs.iter()
            .position(|(n, _)| *n == name)
            .map(|i| offsets[i] as u32)
    };
    let exif_at = offset_of("exif");
    let gps_at = offset_of("gps");
    let ifd1_at = offset_of("ifd1");
    let interop_at = offset_of("interop");

    for (name, fields) in &mut dirs {
        match *name {
            "ifd0" => {
                set_long(fields, TAG_EXIF_IFD, exif_at.unwrap_or(0));
                set_long(fields, TAG_GPS_IFD, gps_at.unwrap_or(0));
            }
            "exif" => set_long(fields, TAG_INTEROP_IFD, interop_at.unwrap_or(0)),
            "ifd1" => set_long(fields, 0x0201, thumb_at),
            _ => {}
        }
    }

    // Second pass: serialize.
    let mut out = Vec::new();
    out.extend_from_slice(order.mark());
    out.extend_from_slice(&order.encode_u16(42));
    out.extend_from_slice(&order.encode_u32(offsets[0] as u32));
    for located in &layout.located {
        out.extend_from_slice(&located.data);
        out.resize(padded(out.len()), 0);
    }

    for (i, (name, fields)) in dirs.iter().enumerate() {
        let start = offsets[i];
        assert_eq!(out.len(), start);
        let mut blob_at = start + dir_len(fields.len());
        let mut blobs = Vec::new();

        out.extend_from_slice(&order.encode_u16(fields.len() as u16));
        for field in fields {
            let (code, count, bytes) = field.value.encode(order);
            out.extend_from_slice(&order.encode_u16(field.tag));
            out.extend_from_slice(&order.encode_u16(code));
            out.extend_from_slice(&order.encode_u32(count));
            if bytes.len() <= 4 {
                let mut slot = bytes.clone();
                slot.resize(4, 0);
                out.extend_from_slice(&slot);
            } else {
                out.extend_from_slice(&order.encode_u32(blob_at as u32));
                blob_at += padded(bytes.len());
                blobs.extend_from_slice(&bytes);
                if bytes.len() % 2 == 1 {
                    blobs.push(0);
                }
            }
        }
        let next = if *name == "ifd0" { ifd1_at.unwrap_or(0) } else { 0 };
        out.extend_from_slice(&order.encode_u32(next));
        debug_assert_eq!(out.len(), start + 2 + fields.len() * ENTRY_LEN + 4);
        out.extend_from_slice(&blobs);
    }

    if let Some(thumb) = &layout.thumbnail {
        assert_eq!(out.len(), thumb_at as usize);
        out.extend_from_slice(thumb);
    }
    out
}

/// A JPEG marker segment with a correct length field.
pub fn segment(marker: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, marker];
    out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn exif_segment(tiff: &[u8]) -> Vec<u8> {
    let mut payload = b"Exif\0\0".to_vec();
    payload.extend_from_slice(tiff);
    segment(0xE1, &payload)
}

pub fn jfif_segment() -> Vec<u8> {
    segment(0xE0, b"JFIF\0\x01\x01\x00\x00\x01\x00\x01\x00\x00")
}

/// A structurally valid (not decodable) JPEG: SOI, `extras`, DQT, SOF0,
/// SOS with [`ENTROPY`], EOI.
pub fn synthetic_jpeg(extras: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0xFF, 0xD8];
    for extra in extras {
        out.extend_from_slice(extra);
    }
    out.extend_from_slice(&segment(0xDB, &[0u8; 65]));
    out.extend_from_slice(&segment(0xC0, &[8, 0, 16, 0, 16, 1, 1, 0x11, 0]));
    out.extend_from_slice(&segment(0xDA, &[1, 1, 0, 0, 63, 0]));
    out.extend_from_slice(ENTROPY);
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

fn gradient() -> RgbImage {
    RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, ((x + y) * 8) as u8]))
}

/// A decodable 16x16 JPEG produced by the `image` encoder.
pub fn real_jpeg() -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    gradient().write_to(&mut out, ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

/// A decodable 16x16 PNG produced by the `image` encoder.
pub fn real_png() -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    gradient().write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn with_segment_after_soi(jpeg: &[u8], segment: &[u8]) -> Vec<u8> {
    let mut out = jpeg[..2].to_vec();
    out.extend_from_slice(segment);
    out.extend_from_slice(&jpeg[2..]);
    out
}

pub fn png_chunk(chunk_type: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = (data.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(chunk_type);
    out.extend_from_slice(data);
    let crc = crc32fast::hash(&out[4..]);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

/// Insert a chunk right after IHDR, which always ends at offset 33.
pub fn with_chunk_after_ihdr(png: &[u8], chunk: &[u8]) -> Vec<u8> {
    let mut out = png[..33].to_vec();
    out.extend_from_slice(chunk);
    out.extend_from_slice(&png[33..]);
    out
}

/// A structurally valid (not decodable) PNG: signature, IHDR, `extras`,
/// IDAT, IEND.
pub fn synthetic_png(extras: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    out.extend_from_slice(&png_chunk(b"IHDR", &[0, 0, 0, 1, 0, 0, 0, 1, 8, 0, 0, 0, 0]));
    for extra in extras {
        out.extend_from_slice(extra);
    }
    out.extend_from_slice(&png_chunk(b"IDAT", &[0x78, 0x9C, 0x63, 0x00, 0x00]));
    out.extend_from_slice(&png_chunk(b"IEND", &[]));
    out
}

#[test]
fn sample_block_layout() {
    let tiff = build_tiff(ByteOrder::Little, &sample_layout());
    assert_eq!(&tiff[..4], b"II\x2a\x00");
    assert!(tiff.ends_with(THUMB));
}
