//! One invocation of the scrubbing engine: parse, scrub, write.
//!
//! [`clean`] is a pure function of the input bytes and the policy. It either
//! returns the complete cleaned file or fails without producing output.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

use crate::container::{
    self, ContainerKind, OtherKind, ParseError, Replacement, SegmentKind, WriteError,
};
use crate::exif::tags::{self, Category};
use crate::exif::{DataType, DirectoryKind};
use crate::scrub::{RewriteError, ScrubPolicy, scrub};

/// Engine progress for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Parsed,
    Scrubbed,
    Written,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Parsed => "parsed",
            Self::Scrubbed => "scrubbed",
            Self::Written => "written",
            Self::Done => "done",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CleanError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Scrub(#[from] RewriteError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

impl CleanError {
    /// The last stage reached before the failure.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Parse(_) => Stage::Start,
            Self::Scrub(_) => Stage::Parsed,
            Self::Write(_) => Stage::Scrubbed,
        }
    }

    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::Parse(e) => e.offset(),
            Self::Scrub(e) => Some(e.offset),
            Self::Write(e) => Some(e.offset()),
        }
    }
}

/// A non-image segment, by position and kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentNote {
    pub offset: usize,
    pub kind: OtherKind,
}

impl fmt::Display for SegmentNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.kind, self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrubResult {
    pub container: ContainerKind,
    pub tags_removed: usize,
    /// Tags the policy asked to remove that the container needs.
    pub unremovable: BTreeSet<u16>,
    /// Segments left untouched that may still hold metadata.
    pub passthrough: Vec<SegmentNote>,
    /// Auxiliary metadata segments removed whole.
    pub dropped: Vec<SegmentNote>,
    pub input_len: usize,
    pub output_len: usize,
}

impl ScrubResult {
    /// Anything less means cleaning may be incomplete.
    pub fn is_complete(&self) -> bool {
        self.unremovable.is_empty() && self.passthrough.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Cleaned {
    pub bytes: Vec<u8>,
    pub result: ScrubResult,
}

fn advance(stage: &mut Stage, next: Stage) {
    log::trace!("engine: {stage} -> {next}");
    *stage = next;
}

/// Clean one image held in memory.
pub fn clean(input: &[u8], policy: &ScrubPolicy) -> Result<Cleaned, CleanError> {
    let mut stage = Stage::Start;
    let parsed = container::parse(input)?;
    advance(&mut stage, Stage::Parsed);

    let mut replacements = BTreeMap::new();
    let mut tags_removed = 0;
    let mut unremovable = BTreeSet::new();
    let mut passthrough = Vec::new();
    let mut dropped = Vec::new();

    for segment in &parsed.segments {
        match segment.kind {
            SegmentKind::ImageData => {}
            SegmentKind::Metadata => {
                let out = scrub(segment, policy)?;
                tags_removed += out.removed;
                unremovable.extend(out.unremovable);
                match out.segment {
                    None => {
                        replacements.insert(segment.offset, Replacement::Drop);
                    }
                    Some(new) if out.removed > 0 => {
                        replacements.insert(segment.offset, Replacement::Segment(new));
                    }
                    Some(_) => {}
                }
            }
            SegmentKind::Other(kind) => {
                let note = SegmentNote {
                    offset: segment.offset,
                    kind,
                };
                if kind.carries_metadata() && policy.drop_auxiliary {
                    log::debug!("Dropping {note}");
                    replacements.insert(segment.offset, Replacement::Drop);
                    dropped.push(note);
                } else if kind.carries_metadata() || kind.is_unrecognized() {
                    log::warn!("Leaving {note} untouched; it may hold metadata");
                    passthrough.push(note);
                }
            }
        }
    }
    advance(&mut stage, Stage::Scrubbed);

    let bytes = container::write(&parsed, &replacements)?;
    advance(&mut stage, Stage::Written);

    let result = ScrubResult {
        container: parsed.kind,
        tags_removed,
        unremovable,
        passthrough,
        dropped,
        input_len: input.len(),
        output_len: bytes.len(),
    };
    log::debug!(
        "Cleaned {}: {} tags removed, {} -> {} bytes",
        result.container,
        result.tags_removed,
        result.input_len,
        result.output_len
    );
    advance(&mut stage, Stage::Done);
    Ok(Cleaned { bytes, result })
}

/// One tag found in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagReport {
    pub directory: DirectoryKind,
    pub tag_id: u16,
    pub name: String,
    pub category: Category,
    pub data_type: DataType,
    pub count: u32,
    /// Absolute file offset of the value bytes.
    pub value_offset: usize,
    pub value_len: usize,
}

/// Enumerate every tag in every metadata segment of a file.
pub fn inspect(input: &[u8]) -> Result<Vec<TagReport>, ParseError> {
    let parsed = container::parse(input)?;
    let mut reports = Vec::new();
    for segment in parsed.metadata_segments() {
        let Some(block) = &segment.tiff else {
            continue;
        };
        for (dir, entry) in block.entries() {
            let group = dir.kind.group();
            reports.push(TagReport {
                directory: dir.kind,
                tag_id: entry.tag_id,
                name: tags::describe(group, entry.tag_id),
                category: tags::category_of(group, entry.tag_id),
                data_type: entry.data_type,
                count: entry.count,
                value_offset: segment.offset + entry.byte_offset_within_segment,
                value_len: entry.value.len(),
            });
        }
    }
    Ok(reports)
}
