//! Tag removal policy and the per-segment scrubber.

use img_parts::Bytes;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::container::{ParseError, Segment, SegmentKind};
use crate::exif::{self, LOCATORS, Retention, TiffBlock};

/// Which tags to remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScrubMode {
    #[default]
    StripAll,
    /// Remove only these tag ids.
    StripListed(BTreeSet<u16>),
    /// Remove everything except these tag ids.
    KeepListed(BTreeSet<u16>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrubPolicy {
    pub mode: ScrubMode,
    /// Repack the TIFF block instead of rewriting it in place.
    pub compact: bool,
    /// Drop XMP, IPTC, comment and PNG text/time segments whole.
    pub drop_auxiliary: bool,
}

impl Default for ScrubPolicy {
    fn default() -> Self {
        Self {
            mode: ScrubMode::StripAll,
            compact: false,
            drop_auxiliary: true,
        }
    }
}

impl ScrubPolicy {
    pub fn strip_all() -> Self {
        Self::default()
    }

    pub fn strip_listed(tags: impl IntoIterator<Item = u16>) -> Self {
        Self {
            mode: ScrubMode::StripListed(tags.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn keep_listed(tags: impl IntoIterator<Item = u16>) -> Self {
        Self {
            mode: ScrubMode::KeepListed(tags.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    /// Whether the policy asks for this (non-pointer) tag to go.
    pub fn wants_removal(&self, tag_id: u16) -> bool {
        match &self.mode {
            ScrubMode::StripAll => true,
            ScrubMode::StripListed(tags) => tags.contains(&tag_id),
            ScrubMode::KeepListed(tags) => !tags.contains(&tag_id),
        }
    }
}

/// Outcome of scrubbing one metadata segment.
#[derive(Debug, Clone)]
pub struct SegmentScrub {
    /// The replacement segment, or `None` when the whole segment is dropped.
    pub segment: Option<Segment>,
    pub removed: usize,
    /// Tags the policy asked to remove but that had to stay.
    pub unremovable: BTreeSet<u16>,
}

/// A rewritten TIFF block that no longer parses. Never expected; the
/// segment is not emitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rewritten metadata segment at offset {offset} does not parse: {source}")]
pub struct RewriteError {
    pub offset: usize,
    pub source: ParseError,
}

/// What a policy decides for one TIFF block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub retention: Retention,
    pub removed: usize,
    pub unremovable: BTreeSet<u16>,
}

impl Plan {
    /// IFD0 survives; otherwise the block has nothing left.
    pub fn keeps_block(&self) -> bool {
        self.retention.directories.first().copied().unwrap_or(false)
    }
}

/// How a directory is reached, as far as the policy is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Each entry decided on its own.
    Free,
    /// Under a pointer the policy removes.
    Remove,
    /// Under a pointer the policy keeps whole.
    Keep,
}

/// Decide which entries and directories of a block survive `policy`.
pub fn plan(block: &TiffBlock, policy: &ScrubPolicy) -> Plan {
    let dirs = &block.directories;

    // Parents always precede their children in the arena.
    let mut scope = vec![Scope::Free; dirs.len()];
    for (d, dir) in dirs.iter().enumerate() {
        for entry in &dir.entries {
            let Some(child) = entry.child else {
                continue;
            };
            scope[child] = match (scope[d], &policy.mode) {
                (Scope::Remove, _) | (Scope::Free, ScrubMode::StripAll) => Scope::Remove,
                (Scope::Keep, _) => Scope::Keep,
                (Scope::Free, ScrubMode::StripListed(tags)) if tags.contains(&entry.tag_id) => Scope::Remove,
                (Scope::Free, ScrubMode::KeepListed(tags)) if tags.contains(&entry.tag_id) => Scope::Keep,
                (Scope::Free, _) => Scope::Free,
            };
        }
    }

    let mut entries: Vec<Vec<bool>> = dirs.iter().map(|d| vec![false; d.entries.len()]).collect();
    let mut retained = vec![false; dirs.len()];
    let mut unremovable = BTreeSet::new();

    for d in (0..dirs.len()).rev() {
        let dir = &dirs[d];
        for (i, entry) in dir.entries.iter().enumerate() {
            entries[d][i] = match (scope[d], entry.child) {
                (Scope::Remove, _) => false,
                (Scope::Keep, _) => true,
                (Scope::Free, Some(child)) => retained[child],
                (Scope::Free, None) => !policy.wants_removal(entry.tag_id),
            };
        }

        // A kept offset tag is meaningless without its length tag.
        for &(offset_tag, length_tag) in LOCATORS {
            let (Some(oi), Some(li)) = (dir.position(offset_tag), dir.position(length_tag)) else {
                continue;
            };
            if entries[d][oi] && !entries[d][li] {
                entries[d][li] = true;
                if policy.wants_removal(length_tag) {
                    log::debug!("Keeping 0x{length_tag:04X} in {}: 0x{offset_tag:04X} needs it", dir.kind);
                    unremovable.insert(length_tag);
                }
            }
        }

        let chained = dir.next_dir.is_some_and(|n| retained[n]);
        retained[d] = scope[d] == Scope::Keep || chained || entries[d].iter().any(|k| *k);
    }

    let removed = entries.iter().flatten().filter(|k| !**k).count();
    Plan {
        retention: Retention {
            entries,
            directories: retained,
        },
        removed,
        unremovable,
    }
}

/// Apply `policy` to one segment.
///
/// Segments without a parsed TIFF block come back unchanged. A block the
/// policy empties is dropped whole; a block it leaves untouched is returned
/// as the original segment. A rewritten block is parsed again before it is
/// returned, and one that fails is an error.
pub fn scrub(segment: &Segment, policy: &ScrubPolicy) -> Result<SegmentScrub, RewriteError> {
    let unchanged = |unremovable| SegmentScrub {
        segment: Some(segment.clone()),
        removed: 0,
        unremovable,
    };
    let Some(block) = &segment.tiff else {
        return Ok(unchanged(BTreeSet::new()));
    };

    let plan = plan(block, policy);
    if plan.removed == 0 {
        return Ok(unchanged(plan.unremovable));
    }
    if !plan.keeps_block() {
        log::debug!(
            "Dropping metadata segment at {}: all {} tags removed",
            segment.offset,
            plan.removed
        );
        return Ok(SegmentScrub {
            segment: None,
            removed: plan.removed,
            unremovable: plan.unremovable,
        });
    }

    let tiff = &segment.bytes[block.range()];
    let rewritten = if policy.compact {
        exif::repack(block, tiff, &plan.retention).unwrap_or_else(|| {
            log::warn!(
                "Segment at {}: an offset no longer fits its field after repacking, rewriting in place",
                segment.offset
            );
            exif::rewrite_in_place(block, tiff, &plan.retention)
        })
    } else {
        exif::rewrite_in_place(block, tiff, &plan.retention)
    };

    let mut bytes = Vec::with_capacity(segment.len() - block.len + rewritten.len());
    bytes.extend_from_slice(&segment.bytes[..block.base]);
    bytes.extend_from_slice(&rewritten);
    bytes.extend_from_slice(&segment.bytes[block.range().end..]);

    let bytes = Bytes::from(bytes);
    let reparsed = exif::parse_tiff(&bytes, block.base, rewritten.len(), segment.offset);
    debug_assert!(
        reparsed.is_ok(),
        "rewritten segment at {} does not parse: {reparsed:?}",
        segment.offset
    );
    let tiff = reparsed.map_err(|source| RewriteError {
        offset: segment.offset,
        source,
    })?;
    log::debug!(
        "Scrubbed segment at {}: {} tags removed, {} -> {} bytes",
        segment.offset,
        plan.removed,
        segment.len(),
        bytes.len()
    );

    let mut new = Segment::new(SegmentKind::Metadata, segment.offset, bytes);
    new.tiff = Some(tiff);
    Ok(SegmentScrub {
        segment: Some(new),
        removed: plan.removed,
        unremovable: plan.unremovable,
    })
}
