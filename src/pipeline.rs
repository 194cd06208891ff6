use anyhow::{Context, Result};
use img_parts::{Bytes, DynImage};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::config::{Config, OutputConfig};
use crate::container::ContainerKind;
use crate::engine::{self, Cleaned, ScrubResult, TagReport};
use crate::scrub::ScrubPolicy;

/// Supported image extensions.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "jpe", "jfif", "png"];

/// The container format expected for a given image file, by extension.
///
/// # Example
///
/// ```rust
/// use exif_scrub::pipeline::ImageKind;
/// use std::path::Path;
///
/// assert_eq!(ImageKind::from_path(Path::new("photo.JPG")), Some(ImageKind::Jpeg));
/// assert_eq!(ImageKind::from_path(Path::new("photo.heic")), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    /// Determine the image kind from a file path extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "jpe" | "jfif" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }

    pub fn container(self) -> ContainerKind {
        match self {
            Self::Jpeg => ContainerKind::Jpeg,
            Self::Png => ContainerKind::Png,
        }
    }
}

/// The result of cleaning a single image.
///
/// `error` is set when nothing was written, whether the engine rejected the
/// file, verification failed or the result was incomplete under
/// `require_complete`.
#[derive(Debug)]
pub struct ProcessResult {
    pub path: PathBuf,
    /// The image kind detected for this file.
    pub image_kind: Option<ImageKind>,
    pub scrub: Option<ScrubResult>,
    /// Where the cleaned file was (or, in a dry run, would be) written.
    pub output_path: Option<PathBuf>,
    pub backup_path: Option<PathBuf>,
    pub verified: bool,
    pub written: bool,
    pub error: Option<String>,
}

impl ProcessResult {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            image_kind: ImageKind::from_path(path),
            scrub: None,
            output_path: None,
            backup_path: None,
            verified: false,
            written: false,
            error: None,
        }
    }

    /// Cleaned and written with nothing left behind.
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.scrub.as_ref().is_some_and(ScrubResult::is_complete)
    }
}

/// Collect supported image files from the given paths.
///
/// Accepts a mix of file paths and directory paths. Directories are walked
/// recursively (following symlinks). Only files with supported image extensions
/// are included. Previously written `.part` and `.bak` files never match.
pub fn collect_images(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut images = Vec::new();

    for path in paths {
        if path.is_file() {
            if is_supported_image(path) {
                images.push(path.clone());
            } else {
                log::warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if p.is_file() && is_supported_image(p) {
                    images.push(p.to_path_buf());
                }
            }
        } else {
            log::warn!("Path does not exist: {}", path.display());
        }
    }

    images
}

/// Collect the images to clean, leaving out copies written by earlier runs.
pub fn collect_sources(paths: &[PathBuf], output: &OutputConfig) -> Vec<PathBuf> {
    collect_images(paths)
        .into_iter()
        .filter(|p| {
            let earlier = is_cleaned_output(p, output);
            if earlier {
                log::debug!("Skipping earlier output: {}", p.display());
            }
            !earlier
        })
        .collect()
}

/// Whether `path` is named like a cleaned copy (`<stem><suffix>.<ext>`).
pub fn is_cleaned_output(path: &Path, output: &OutputConfig) -> bool {
    !output.in_place
        && !output.suffix.is_empty()
        && path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.ends_with(&output.suffix))
}

/// Check if a file has a supported image extension.
fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Where the cleaned copy of `source` goes.
///
/// `<stem><suffix>.<ext>` next to the source or inside `output.destination`;
/// the source itself when cleaning in place.
pub fn destination_path(source: &Path, output: &OutputConfig) -> PathBuf {
    if output.in_place {
        return source.to_path_buf();
    }
    let stem = source.file_stem().unwrap_or_default().to_string_lossy();
    let name = match source.extension() {
        Some(ext) => format!("{stem}{}.{}", output.suffix, ext.to_string_lossy()),
        None => format!("{stem}{}", output.suffix),
    };
    match &output.destination {
        Some(dir) => dir.join(name),
        None => source.with_file_name(name),
    }
}

/// `path` with its directory resolved, so two spellings of one location
/// compare equal. Falls back to `path` when the directory does not exist yet.
fn resolved(path: &Path) -> PathBuf {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match (std::fs::canonicalize(dir), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

/// Create a backup of the original file.
fn backup_file(path: &Path) -> Result<PathBuf> {
    let backup_path = path.with_extension(format!(
        "{}.bak",
        path.extension().unwrap_or_default().to_string_lossy()
    ));

    if !backup_path.exists() {
        std::fs::copy(path, &backup_path).context("Failed to create backup")?;
        log::debug!("Backup created: {}", backup_path.display());
    }

    Ok(backup_path)
}

/// Write through a `.part` file so the destination never holds a partial file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let part = path.with_extension(format!(
        "{}.part",
        path.extension().unwrap_or_default().to_string_lossy()
    ));
    tokio::fs::write(&part, bytes)
        .await
        .with_context(|| format!("Failed to write {}", part.display()))?;
    if let Err(e) = tokio::fs::rename(&part, path).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e).with_context(|| format!("Failed to move cleaned file to {}", path.display()));
    }
    Ok(())
}

/// Check that a cleaned file is still a well-formed image with the same pixels.
///
/// The container is re-read with `img-parts`, then both files are decoded
/// with `image` and compared sample for sample.
pub fn verify_output(original: &[u8], cleaned: &[u8]) -> Result<()> {
    DynImage::from_bytes(Bytes::copy_from_slice(cleaned))
        .context("Cleaned file is not a well-formed image container")?
        .context("Cleaned file is neither JPEG nor PNG")?;

    let before = image::load_from_memory(original).context("Failed to decode original image")?;
    let after = image::load_from_memory(cleaned).context("Failed to decode cleaned image")?;
    if (before.width(), before.height()) != (after.width(), after.height()) {
        anyhow::bail!(
            "Cleaned image is {}x{}, original is {}x{}",
            after.width(),
            after.height(),
            before.width(),
            before.height()
        );
    }
    if before.color() != after.color() || before.as_bytes() != after.as_bytes() {
        anyhow::bail!("Cleaned image decodes to different pixels");
    }
    Ok(())
}

/// List the tags in an image file without changing it.
pub async fn inspect_image(path: &Path) -> Result<Vec<TagReport>> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    tokio::task::spawn_blocking(move || engine::inspect(&bytes))
        .await
        .context("Inspect task failed")?
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Clean a single image and persist the result.
///
/// 1. **Read** the source with `tokio::fs`
/// 2. **Clean** on a blocking worker (parse, scrub, write in memory)
/// 3. **Verify** the cleaned bytes decode to the same pixels (`output.verify`)
/// 4. **Persist** atomically to [`destination_path`], backing up the
///    source first when replacing it
///
/// Nothing is written when any step fails, when `output.dry_run` is set, or
/// when `output.require_complete` is set and the result is incomplete.
pub async fn process_image(path: &Path, policy: &ScrubPolicy, output: &OutputConfig) -> ProcessResult {
    let mut result = ProcessResult::new(path);

    let destination = destination_path(path, output);
    if !output.in_place && resolved(&destination) == resolved(path) {
        result.error = Some(format!(
            "Destination {} is the source itself; enable in_place to replace it",
            destination.display()
        ));
        return result;
    }

    let input = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            result.error = Some(format!("Failed to read file: {e}"));
            return result;
        }
    };

    let policy = policy.clone();
    let verify = output.verify && !output.dry_run;
    let task = tokio::task::spawn_blocking(move || {
        let cleaned = engine::clean(&input, &policy)?;
        let verified = if verify {
            Some(verify_output(&input, &cleaned.bytes))
        } else {
            None
        };
        Ok::<_, engine::CleanError>((cleaned, verified))
    });

    let (Cleaned { bytes, result: scrub }, verified) = match task.await {
        Ok(Ok(done)) => done,
        Ok(Err(e)) => {
            result.error = Some(match e.offset() {
                Some(offset) => format!("Failed to clean ({} stage, offset {offset}): {e}", e.stage()),
                None => format!("Failed to clean: {e}"),
            });
            return result;
        }
        Err(e) => {
            result.error = Some(format!("Worker task failed: {e}"));
            return result;
        }
    };

    if let Some(kind) = result.image_kind {
        if kind.container() != scrub.container {
            log::warn!(
                "{} has a {} extension but holds a {} file",
                path.display(),
                kind.container(),
                scrub.container
            );
        }
    }
    for note in &scrub.passthrough {
        log::warn!("  {}: {note} left untouched", path.display());
    }
    if !scrub.unremovable.is_empty() {
        log::warn!(
            "  {}: {} tag(s) could not be removed",
            path.display(),
            scrub.unremovable.len()
        );
    }

    let complete = scrub.is_complete();
    result.output_path = Some(destination.clone());
    result.scrub = Some(scrub);

    match verified {
        Some(Ok(())) => result.verified = true,
        Some(Err(e)) => {
            result.error = Some(format!("Verification failed: {e:#}"));
            return result;
        }
        None => {}
    }

    if output.dry_run {
        log::info!("  [dry run] would write {}", destination.display());
        return result;
    }
    if output.require_complete && !complete {
        result.error = Some("Cleaning incomplete; not written (require_complete)".to_string());
        return result;
    }

    if output.in_place && output.backup_originals {
        match backup_file(path) {
            Ok(backup) => result.backup_path = Some(backup),
            Err(e) => {
                result.error = Some(format!("Failed to back up original: {e:#}"));
                return result;
            }
        }
    }

    match write_atomic(&destination, &bytes).await {
        Ok(()) => {
            result.written = true;
            log::debug!("Wrote {}", destination.display());
        }
        Err(e) => result.error = Some(format!("{e:#}")),
    }

    result
}

/// Clean many images concurrently, at most `output.jobs` at a time.
///
/// Results come back in the order of `images`; one file failing does not
/// stop the others. Each destination is claimed by the first image that
/// maps to it; later images with the same destination, or whose destination
/// is another input, fail without being cleaned.
pub async fn process_batch(images: &[PathBuf], config: &Config) -> Result<Vec<ProcessResult>> {
    let policy = config.policy()?;
    let limit = Arc::new(Semaphore::new(config.output.jobs.max(1)));
    let mut set = JoinSet::new();
    let mut results: Vec<Option<ProcessResult>> = images.iter().map(|_| None).collect();

    let sources: HashSet<PathBuf> = images.iter().map(|p| resolved(p)).collect();
    let mut claimed: HashMap<PathBuf, &Path> = HashMap::new();

    for (index, path) in images.iter().enumerate() {
        let destination = destination_path(path, &config.output);
        let target = resolved(&destination);
        let clash = match claimed.get(&target) {
            Some(first) => Some(format!(
                "Destination {} is already taken by {}",
                destination.display(),
                first.display()
            )),
            None if !config.output.in_place && sources.contains(&target) => Some(format!(
                "Destination {} is an input file",
                destination.display()
            )),
            None => None,
        };
        if let Some(reason) = clash {
            log::error!("Skipping {}: {reason}", path.display());
            let mut skipped = ProcessResult::new(path);
            skipped.output_path = Some(destination);
            skipped.error = Some(reason);
            results[index] = Some(skipped);
            continue;
        }
        claimed.insert(target, path);

        let limit = Arc::clone(&limit);
        let path = path.clone();
        let policy = policy.clone();
        let output = config.output.clone();
        set.spawn(async move {
            let _permit = limit.acquire_owned().await;
            log::info!("Cleaning {}", path.display());
            (index, process_image(&path, &policy, &output).await)
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = Some(result),
            Err(e) => log::error!("Worker task failed: {e}"),
        }
    }

    Ok(results
        .into_iter()
        .zip(images)
        .map(|(result, path)| {
            result.unwrap_or_else(|| {
                let mut failed = ProcessResult::new(path);
                failed.error = Some("Worker task failed".to_string());
                failed
            })
        })
        .collect())
}
