//! TIFF-structured tag directories, as embedded in Exif metadata blocks.
//!
//! - [`parse_tiff`]: unpack a TIFF block into an arena of [`Directory`] values
//! - [`tags`]: the static tag table used for names, categories and selectors
//!
//! The block is modelled as an offset-indexed arena rather than a pointer
//! graph: directory `0` is always IFD0, and every pointer tag or next-IFD link
//! refers to another directory by arena index. Directories appear in the
//! order they were discovered (breadth-first), which is also the order the
//! compact writer lays them out in.

mod reader;
pub mod tags;
mod writer;

use img_parts::Bytes;
use std::fmt;
use std::ops::Range;

pub use reader::parse_tiff;
pub use tags::{Category, TagGroup, TagInfo};
pub(crate) use writer::{repack, rewrite_in_place};

/// Exif sub-IFD pointer (IFD0).
pub const TAG_EXIF_IFD: u16 = 0x8769;
/// GPS sub-IFD pointer (IFD0).
pub const TAG_GPS_IFD: u16 = 0x8825;
/// Interoperability sub-IFD pointer (ExifIFD).
pub const TAG_INTEROP_IFD: u16 = 0xA005;

/// Offset/length tag pairs that locate raw data outside any entry value:
/// the embedded JPEG thumbnail, strips and tiles.
pub const LOCATORS: &[(u16, u16)] = &[(0x0201, 0x0202), (0x0111, 0x0117), (0x0144, 0x0145)];

/// Size of one directory entry record.
pub const ENTRY_LEN: usize = 12;

/// Byte order declared by the TIFF header (`II` or `MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn read_u16(self, data: &[u8], at: usize) -> Option<u16> {
        let b = data.get(at..at.checked_add(2)?)?;
        Some(match self {
            Self::Little => u16::from_le_bytes([b[0], b[1]]),
            Self::Big => u16::from_be_bytes([b[0], b[1]]),
        })
    }

    pub fn read_u32(self, data: &[u8], at: usize) -> Option<u32> {
        let b = data.get(at..at.checked_add(4)?)?;
        Some(match self {
            Self::Little => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            Self::Big => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
        })
    }

    pub fn encode_u16(self, val: u16) -> [u8; 2] {
        match self {
            Self::Little => val.to_le_bytes(),
            Self::Big => val.to_be_bytes(),
        }
    }

    pub fn encode_u32(self, val: u32) -> [u8; 4] {
        match self {
            Self::Little => val.to_le_bytes(),
            Self::Big => val.to_be_bytes(),
        }
    }

    /// The two-byte mark that opens a TIFF header in this order.
    pub fn mark(self) -> &'static [u8; 2] {
        match self {
            Self::Little => b"II",
            Self::Big => b"MM",
        }
    }
}

/// TIFF field types (codes 1–13).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Byte,
    Ascii,
    Short,
    Long,
    Rational,
    SByte,
    Undefined,
    SShort,
    SLong,
    SRational,
    Float,
    Double,
    Ifd,
}

impl DataType {
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            1 => Self::Byte,
            2 => Self::Ascii,
            3 => Self::Short,
            4 => Self::Long,
            5 => Self::Rational,
            6 => Self::SByte,
            7 => Self::Undefined,
            8 => Self::SShort,
            9 => Self::SLong,
            10 => Self::SRational,
            11 => Self::Float,
            12 => Self::Double,
            13 => Self::Ifd,
            _ => return None,
        })
    }

    pub fn code(self) -> u16 {
        match self {
            Self::Byte => 1,
            Self::Ascii => 2,
            Self::Short => 3,
            Self::Long => 4,
            Self::Rational => 5,
            Self::SByte => 6,
            Self::Undefined => 7,
            Self::SShort => 8,
            Self::SLong => 9,
            Self::SRational => 10,
            Self::Float => 11,
            Self::Double => 12,
            Self::Ifd => 13,
        }
    }

    /// Size in bytes of a single value of this type.
    pub fn size(self) -> usize {
        match self {
            Self::Byte | Self::Ascii | Self::SByte | Self::Undefined => 1,
            Self::Short | Self::SShort => 2,
            Self::Long | Self::SLong | Self::Float | Self::Ifd => 4,
            Self::Rational | Self::SRational | Self::Double => 8,
        }
    }
}

/// Which directory of the block an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryKind {
    /// Main chain: IFD0 (primary image), IFD1 (thumbnail), ...
    Primary(usize),
    Exif,
    Gps,
    Interop,
}

impl DirectoryKind {
    /// Tag id namespace used by this directory.
    pub fn group(self) -> TagGroup {
        match self {
            Self::Primary(_) | Self::Exif => TagGroup::Image,
            Self::Gps => TagGroup::Gps,
            Self::Interop => TagGroup::Interop,
        }
    }

    /// Directory reached through the given pointer tag, if it is one.
    pub fn for_pointer(tag_id: u16) -> Option<Self> {
        match tag_id {
            TAG_EXIF_IFD => Some(Self::Exif),
            TAG_GPS_IFD => Some(Self::Gps),
            TAG_INTEROP_IFD => Some(Self::Interop),
            _ => None,
        }
    }
}

impl fmt::Display for DirectoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary(n) => write!(f, "IFD{n}"),
            Self::Exif => f.write_str("ExifIFD"),
            Self::Gps => f.write_str("GPS"),
            Self::Interop => f.write_str("Interop"),
        }
    }
}

/// One metadata field inside a tag directory.
#[derive(Debug, Clone)]
pub struct TagEntry {
    pub tag_id: u16,
    pub data_type: DataType,
    pub count: u32,
    /// The value payload (`size(data_type) * count` bytes).
    pub value: Bytes,
    /// Offset of the 12-byte entry record within the owning segment.
    pub entry_offset: usize,
    /// Offset of the value bytes within the owning segment. Inline values
    /// live in the last four bytes of the entry record.
    pub byte_offset_within_segment: usize,
    /// The value did not fit the 4-byte slot and is stored elsewhere.
    pub out_of_line: bool,
    /// Arena index of the sub-directory this pointer tag leads to.
    pub child: Option<usize>,
    /// TIFF-relative byte ranges this offset tag locates (thumbnail, strips, tiles).
    pub data_ranges: Vec<Range<usize>>,
}

/// A tag directory (IFD).
#[derive(Debug, Clone)]
pub struct Directory {
    pub kind: DirectoryKind,
    /// TIFF-relative offset of the entry count.
    pub offset: usize,
    pub entries: Vec<TagEntry>,
    /// Raw next-IFD link as stored.
    pub next: u32,
    /// Arena index of the next directory in the main chain.
    pub next_dir: Option<usize>,
}

impl Directory {
    /// Bytes occupied by the count, the entry records and the next link.
    pub fn byte_len(&self) -> usize {
        dir_len(self.entries.len())
    }

    pub fn position(&self, tag_id: u16) -> Option<usize> {
        self.entries.iter().position(|e| e.tag_id == tag_id)
    }
}

pub(crate) fn dir_len(entries: usize) -> usize {
    2 + entries * ENTRY_LEN + 4
}

/// A parsed TIFF block embedded in a metadata segment.
#[derive(Debug, Clone)]
pub struct TiffBlock {
    /// Offset of the TIFF header within the owning segment.
    pub base: usize,
    /// Length of the TIFF block.
    pub len: usize,
    pub byte_order: ByteOrder,
    /// Directory arena; index 0 is IFD0.
    pub directories: Vec<Directory>,
}

impl TiffBlock {
    /// Total number of tag entries across all directories.
    pub fn tag_count(&self) -> usize {
        self.directories.iter().map(|d| d.entries.len()).sum()
    }

    /// Every entry paired with its directory, in arena then directory order.
    pub fn entries(&self) -> impl Iterator<Item = (&Directory, &TagEntry)> {
        self.directories
            .iter()
            .flat_map(|d| d.entries.iter().map(move |e| (d, e)))
    }

    /// Segment-relative range of the TIFF block.
    pub fn range(&self) -> Range<usize> {
        self.base..self.base + self.len
    }
}

/// Which entries and directories survive a scrub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retention {
    /// Per directory, per entry: keep?
    pub entries: Vec<Vec<bool>>,
    /// Per directory: is it still written out?
    pub directories: Vec<bool>,
}

impl Retention {
    pub fn kept_in(&self, dir: usize) -> usize {
        self.entries[dir].iter().filter(|k| **k).count()
    }
}
