//! Image container parsing and reassembly.
//!
//! A container is split into an ordered list of [`Segment`]s that are
//! disjoint and concatenate back to the exact input. JPEG files split into
//! marker segments (with the entropy-coded scan data folded into its SOS
//! segment); PNG files split into the signature plus one segment per chunk.
//!
//! - [`parse`]: identify the container and walk it into segments
//! - [`write`]: reassemble segments, substituting scrubbed replacements

mod jpeg;
mod png;
mod writer;

use img_parts::Bytes;
use std::fmt;
use thiserror::Error;

use crate::exif::TiffBlock;

pub use writer::{Replacement, WriteError, write};

/// Errors raised while walking a container or its tag directories.
///
/// Every offset is absolute within the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("not a JPEG or PNG file")]
    NotAContainer,
    #[error("truncated at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("malformed segment at offset {offset}: {reason}")]
    MalformedSegment { offset: usize, reason: String },
    #[error("tag directory at offset {offset} points back into an already visited directory")]
    CyclicDirectory { offset: usize },
    #[error("tag 0x{tag_id:04X} appears twice in the directory (entry at offset {offset})")]
    DuplicateTag { tag_id: u16, offset: usize },
}

impl ParseError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedSegment {
            offset,
            reason: reason.into(),
        }
    }

    /// Absolute offset of the failure, when there is one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::NotAContainer => None,
            Self::Truncated { offset, .. }
            | Self::MalformedSegment { offset, .. }
            | Self::CyclicDirectory { offset }
            | Self::DuplicateTag { offset, .. } => Some(*offset),
        }
    }
}

/// Container formats the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Jpeg,
    Png,
}

impl ContainerKind {
    /// Identify a container from its leading signature.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(&jpeg::SIGNATURE) {
            Some(Self::Jpeg)
        } else if data.starts_with(&png::SIGNATURE) {
            Some(Self::Png)
        } else {
            None
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
        })
    }
}

/// Non-image segments, by what they hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OtherKind {
    /// JFIF/JFXX APP0 header.
    Jfif,
    /// Embedded ICC colour profile.
    IccProfile,
    /// Adobe APP14 colour transform marker.
    Adobe,
    /// XMP packet (JPEG APP1 or PNG iTXt).
    Xmp,
    /// Photoshop IRB / IPTC-IIM (APP13).
    Iptc,
    /// JPEG COM segment.
    Comment,
    /// PNG tEXt / zTXt / iTXt text chunk.
    Text,
    /// PNG tIME chunk.
    Timestamp,
    /// An APPn segment with an unrecognised signature.
    Application(u8),
    /// An unrecognised PNG ancillary chunk.
    Ancillary([u8; 4]),
    /// Bytes following the end-of-image marker or IEND chunk.
    Trailer,
}

impl OtherKind {
    /// Recognised segments that exist only to carry metadata and can be
    /// dropped whole without affecting the image.
    pub fn carries_metadata(self) -> bool {
        matches!(
            self,
            Self::Xmp | Self::Iptc | Self::Comment | Self::Text | Self::Timestamp
        )
    }

    /// Segments whose contents the engine cannot judge.
    pub fn is_unrecognized(self) -> bool {
        matches!(self, Self::Application(_) | Self::Ancillary(_) | Self::Trailer)
    }
}

impl fmt::Display for OtherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jfif => f.write_str("JFIF header"),
            Self::IccProfile => f.write_str("ICC profile"),
            Self::Adobe => f.write_str("Adobe marker"),
            Self::Xmp => f.write_str("XMP packet"),
            Self::Iptc => f.write_str("IPTC/Photoshop block"),
            Self::Comment => f.write_str("comment"),
            Self::Text => f.write_str("text chunk"),
            Self::Timestamp => f.write_str("modification time"),
            Self::Application(n) => write!(f, "APP{n} segment"),
            Self::Ancillary(ty) => write!(f, "{} chunk", String::from_utf8_lossy(ty)),
            Self::Trailer => f.write_str("trailing data"),
        }
    }
}

/// Coarse classification of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Needed to decode the image; always passed through verbatim.
    ImageData,
    /// Holds a parsed TIFF tag directory.
    Metadata,
    Other(OtherKind),
}

/// A contiguous, length-framed byte range of the container.
#[derive(Debug, Clone)]
pub struct Segment {
    pub kind: SegmentKind,
    /// Absolute offset in the original input.
    pub offset: usize,
    /// The full framed bytes (marker/length/type headers included).
    pub bytes: Bytes,
    /// Tag directories, for `Metadata` segments.
    pub tiff: Option<TiffBlock>,
}

impl Segment {
    pub(crate) fn new(kind: SegmentKind, offset: usize, bytes: Bytes) -> Self {
        Self {
            kind,
            offset,
            bytes,
            tiff: None,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Absolute offset one past the last byte.
    pub fn end(&self) -> usize {
        self.offset + self.bytes.len()
    }
}

/// A parsed container: its kind and its segments in file order.
#[derive(Debug, Clone)]
pub struct Container {
    pub kind: ContainerKind,
    pub segments: Vec<Segment>,
}

impl Container {
    pub fn metadata_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments
            .iter()
            .filter(|s| s.kind == SegmentKind::Metadata)
    }

    /// Total size of the original input.
    pub fn len(&self) -> usize {
        self.segments.last().map(Segment::end).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Parse an image file into its segments.
pub fn parse(data: &[u8]) -> Result<Container, ParseError> {
    parse_bytes(Bytes::copy_from_slice(data))
}

/// Parse an image file already held in a [`Bytes`] buffer; segments share it.
pub fn parse_bytes(data: Bytes) -> Result<Container, ParseError> {
    let kind = ContainerKind::sniff(&data).ok_or(ParseError::NotAContainer)?;
    let segments = match kind {
        ContainerKind::Jpeg => jpeg::walk(&data)?,
        ContainerKind::Png => png::walk(&data)?,
    };
    log::debug!("Parsed {kind}: {} segments", segments.len());
    Ok(Container { kind, segments })
}
