use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use exif_scrub::config::{self, ModeConfig};
use exif_scrub::exif::{TagGroup, tags};
use exif_scrub::pipeline;

#[derive(Parser, Debug)]
#[command(
    name = "exif-scrub",
    version,
    about = "Remove EXIF, GPS and other embedded metadata from JPEG and PNG files without re-encoding them"
)]
struct Cli {
    /// Image files or directories to clean
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Report what would be removed without writing any files
    #[arg(long)]
    dry_run: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// List every tag found in the image(s) and exit
    #[arg(long = "show-tags")]
    show_tags: bool,

    /// Remove only these tags (names, 0x ids or @category), comma separated
    #[arg(long, value_name = "TAGS", value_delimiter = ',', conflicts_with = "keep")]
    strip: Vec<String>,

    /// Remove every tag except these (names, 0x ids or @category), comma separated
    #[arg(long, value_name = "TAGS", value_delimiter = ',')]
    keep: Vec<String>,

    /// Repack the metadata block instead of zeroing removed values in place
    #[arg(long)]
    compact: bool,

    /// Keep XMP, IPTC, comments and text chunks instead of dropping them
    #[arg(long = "keep-auxiliary")]
    keep_auxiliary: bool,

    /// Directory for cleaned copies (default: next to each source)
    #[arg(short, long, value_name = "DIR", conflicts_with = "in_place")]
    out: Option<PathBuf>,

    /// Replace the source files (a .bak backup is kept unless disabled in config)
    #[arg(long = "in-place")]
    in_place: bool,

    /// Skip decoding the cleaned file to compare pixels
    #[arg(long = "no-verify")]
    no_verify: bool,

    /// Number of files cleaned concurrently
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let config = config::Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => config::Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    if cli.paths.is_empty() {
        anyhow::bail!("No input files or directories specified. Use --help for usage.");
    }

    // Handle --show-tags
    if cli.show_tags {
        let images = pipeline::collect_images(&cli.paths);
        if images.is_empty() {
            anyhow::bail!("No supported image files found in the specified paths.");
        }
        let mut failed = 0;
        for image_path in &images {
            if let Err(e) = print_tags(image_path).await {
                log::error!("{}: {e:#}", image_path.display());
                failed += 1;
            }
        }
        if failed > 0 {
            anyhow::bail!("{failed} of {} image(s) could not be read", images.len());
        }
        return Ok(());
    }

    // Load config and apply CLI overrides
    let mut config = config::Config::load(cli.config.as_deref())?;
    if !cli.strip.is_empty() {
        config.policy.mode = ModeConfig::StripListed;
        config.policy.tags = cli.strip.clone();
    }
    if !cli.keep.is_empty() {
        config.policy.mode = ModeConfig::KeepListed;
        config.policy.tags = cli.keep.clone();
    }
    if cli.compact {
        config.policy.compact = true;
    }
    if cli.keep_auxiliary {
        config.policy.drop_auxiliary = false;
    }
    if cli.dry_run {
        config.output.dry_run = true;
    }
    if cli.out.is_some() {
        config.output.destination = cli.out.clone();
        config.output.in_place = false;
    }
    if cli.in_place {
        config.output.in_place = true;
    }
    if cli.no_verify {
        config.output.verify = false;
    }
    if let Some(jobs) = cli.jobs {
        config.output.jobs = jobs;
    }

    // Earlier cleaned copies are not inputs.
    let images = pipeline::collect_sources(&cli.paths, &config.output);
    if images.is_empty() {
        anyhow::bail!("No supported image files found in the specified paths.");
    }

    log::info!("Found {} image(s) to clean", images.len());
    if config.output.dry_run {
        log::info!("DRY RUN: no files will be written");
    }

    let results = pipeline::process_batch(&images, &config).await?;
    let total = results.len();

    for (i, result) in results.iter().enumerate() {
        log::info!("[{}/{}] {}", i + 1, total, result.path.display());

        if let Some(ref err) = result.error {
            log::error!("  Error: {err}");
        }
        let Some(ref scrub) = result.scrub else {
            continue;
        };
        log::info!(
            "  Removed {} tag(s), {} -> {} bytes",
            scrub.tags_removed,
            scrub.input_len,
            scrub.output_len
        );
        for note in &scrub.dropped {
            log::info!("  Dropped {note}");
        }
        if !scrub.unremovable.is_empty() {
            let names: Vec<String> = scrub
                .unremovable
                .iter()
                .map(|&id| tags::describe(TagGroup::Image, id))
                .collect();
            log::warn!("  Kept (required by the file): {}", names.join(", "));
        }
        if result.written {
            if let Some(ref out) = result.output_path {
                log::info!("  Wrote: {}", out.display());
            }
            if let Some(ref backup) = result.backup_path {
                log::info!("  Backup: {}", backup.display());
            }
        }
    }

    // JSON output
    if cli.json {
        let json_results: Vec<serde_json::Value> = results
            .iter()
            .map(|r| {
                let scrub = r.scrub.as_ref();
                serde_json::json!({
                    "path": r.path.display().to_string(),
                    "output_path": r.output_path.as_ref().map(|p| p.display().to_string()),
                    "backup_path": r.backup_path.as_ref().map(|p| p.display().to_string()),
                    "container": scrub.map(|s| s.container.to_string()),
                    "tags_removed": scrub.map(|s| s.tags_removed),
                    "unremovable": scrub.map(|s| s.unremovable.iter().copied().collect::<Vec<u16>>()),
                    "passthrough": scrub.map(|s| s.passthrough.iter().map(ToString::to_string).collect::<Vec<_>>()),
                    "dropped": scrub.map(|s| s.dropped.iter().map(ToString::to_string).collect::<Vec<_>>()),
                    "input_len": scrub.map(|s| s.input_len),
                    "output_len": scrub.map(|s| s.output_len),
                    "complete": r.is_complete(),
                    "verified": r.verified,
                    "written": r.written,
                    "error": r.error,
                })
            })
            .collect();

        println!("{}", serde_json::to_string_pretty(&json_results)?);
    }

    // Summary
    let failed = results.iter().filter(|r| r.error.is_some()).count();
    let incomplete = results
        .iter()
        .filter(|r| r.error.is_none() && !r.is_complete())
        .count();
    log::info!(
        "Done: {} cleaned, {incomplete} incomplete, {failed} failed out of {total} images",
        total - failed
    );

    if failed > 0 {
        anyhow::bail!("{failed} image(s) could not be cleaned");
    }
    Ok(())
}

// ANSI color codes
const YELLOW: &str = "\x1b[33m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Print every tag in a file, one section per directory.
async fn print_tags(path: &std::path::Path) -> Result<()> {
    let tags = pipeline::inspect_image(path).await?;

    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));

    if tags.is_empty() {
        println!("  {DIM}(no EXIF metadata found){RESET}");
        println!();
        return Ok(());
    }

    let mut current = None;
    for tag in &tags {
        if current != Some(tag.directory) {
            if current.is_some() {
                println!();
            }
            println!("  {BOLD}{}{RESET}", tag.directory);
            println!("  {DIM}{}{RESET}", "─".repeat(70));
            current = Some(tag.directory);
        }
        let detail = format!(
            "{:?} x{}, {} bytes at offset {}",
            tag.data_type, tag.count, tag.value_len, tag.value_offset
        );
        print_row(&tag.name, &tag.category.to_string(), &detail);
    }
    println!();

    Ok(())
}

/// Max width for the value column before wrapping.
const VAL_WIDTH: usize = 36;
const TAG_WIDTH: usize = 24;
const CAT_WIDTH: usize = 10;
/// Column where values start: margin, tag, space, category, " : ".
const INDENT: usize = 2 + TAG_WIDTH + 1 + CAT_WIDTH + 3;

/// Print a single row in the tag table, highlighting privacy-sensitive tags.
fn print_row(tag: &str, category: &str, val: &str) {
    let sensitive = matches!(category, "location" | "device" | "author" | "time");
    for line in format_row(tag, category, val, sensitive) {
        println!("{line}");
    }
}

fn format_row(tag: &str, category: &str, val: &str, highlight: bool) -> Vec<String> {
    let tag_col = format!("{tag:<TAG_WIDTH$}");
    let cat_col = format!("{category:<CAT_WIDTH$}");
    wrap_text(val, VAL_WIDTH)
        .iter()
        .enumerate()
        .map(|(i, line)| {
            if i > 0 {
                format!("{:INDENT$}{line}", "")
            } else if highlight {
                format!("  {YELLOW}{tag_col}{RESET} {cat_col} : {line}")
            } else {
                format!("  {tag_col} {cat_col} : {line}")
            }
        })
        .collect()
}

/// Wrap text at word boundaries to fit within max_width.
fn wrap_text(s: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in s.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= max_width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(current_line);
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(s.to_string());
    }

    lines
}
