//! # exif-scrub
//!
//! Strip camera, location and timestamp metadata from JPEG and PNG files without
//! re-encoding the image. Only the metadata bytes change; every byte the decoder
//! needs is copied through untouched.
//!
//! ## Quick Start
//!
//! The simplest way to use the library is through the pipeline module, which handles
//! the full read → clean → verify → write flow:
//!
//! ```rust,no_run
//! use exif_scrub::config::Config;
//! use exif_scrub::pipeline::{collect_images, process_image};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load config from file (tag policy, output location, etc.)
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!     let policy = config.policy()?;
//!
//!     // Collect supported image files from paths (files or directories)
//!     let images = collect_images(&[PathBuf::from("./photos")]);
//!
//!     for path in &images {
//!         let result = process_image(path, &policy, &config.output).await;
//!
//!         if let Some(ref err) = result.error {
//!             eprintln!("Error cleaning {}: {err}", path.display());
//!         } else if let Some(ref out) = result.output_path {
//!             println!("Cleaned: {} -> {}", path.display(), out.display());
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Lower-Level Usage
//!
//! The engine works on bytes in memory and never touches the filesystem:
//!
//! ```rust,no_run
//! use exif_scrub::engine::{clean, inspect};
//! use exif_scrub::exif::tags;
//! use exif_scrub::scrub::ScrubPolicy;
//!
//! fn main() -> anyhow::Result<()> {
//!     let bytes = std::fs::read("photo.jpg")?;
//!
//!     // 1. See what is in there
//!     for tag in inspect(&bytes)? {
//!         println!("{} {} ({})", tag.directory, tag.name, tag.category);
//!     }
//!
//!     // 2. Remove location and device tags, keep everything else
//!     let mut ids = tags::resolve("@location")?;
//!     ids.extend(tags::resolve("@device")?);
//!     let cleaned = clean(&bytes, &ScrubPolicy::strip_listed(ids))?;
//!     println!("Removed {} tags", cleaned.result.tags_removed);
//!
//!     std::fs::write("photo_clean.jpg", &cleaned.bytes)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Formats
//!
//! | Format | Metadata handled |
//! |--------|------------------|
//! | JPEG (`.jpg`, `.jpeg`, `.jpe`, `.jfif`) | EXIF (APP1) scrubbed; XMP, IPTC, comments dropped |
//! | PNG (`.png`) | `eXIf` scrubbed; text and `tIME` chunks dropped |
//!
//! Segments the engine does not recognise are passed through and reported, so a
//! caller can tell when a file may still carry metadata.
//!
//! ## Modules
//!
//! - [`container`]: JPEG/PNG segment parsing and reassembly
//! - [`exif`]: TIFF tag directory parsing, tag catalogue and rewriting
//! - [`scrub`]: Removal policies and per-segment scrubbing
//! - [`engine`]: In-memory parse → scrub → write of a whole file
//! - [`config`]: Configuration types and loading/saving
//! - [`pipeline`]: File collection, concurrent batch cleaning and output verification

pub mod config;
pub mod container;
pub mod engine;
pub mod exif;
pub mod pipeline;
pub mod scrub;

#[cfg(test)]
mod fixtures;
