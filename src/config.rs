use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::exif::tags;
use crate::scrub::{ScrubMode, ScrubPolicy};

/// Top-level configuration for exif-scrub.
///
/// Controls which tags are removed and where cleaned copies are written.
///
/// # Loading
///
/// ```rust,no_run
/// use exif_scrub::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.policy.tags = vec!["@location".into()];
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which tags to remove.
    pub policy: PolicyConfig,
    /// Where and how cleaned files are written.
    pub output: OutputConfig,
}

/// How `tags` is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeConfig {
    /// Remove every tag; `tags` is ignored.
    #[default]
    StripAll,
    /// Remove only the tags in `tags`.
    StripListed,
    /// Remove every tag except those in `tags`.
    KeepListed,
}

/// Tag removal settings.
///
/// `tags` holds selectors: tag names (`"GPSInfo"`), numbers (`"0x010F"`,
/// `"271"`) or categories (`"@location"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub mode: ModeConfig,
    pub tags: Vec<String>,
    /// Repack the metadata block after removing tags instead of zeroing in place.
    pub compact: bool,
    /// Drop XMP, IPTC, comments and PNG text chunks entirely.
    pub drop_auxiliary: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: ModeConfig::StripAll,
            tags: Vec::new(),
            compact: false,
            drop_auxiliary: true,
        }
    }
}

/// Output and behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for cleaned copies. `None` writes them next to the source.
    pub destination: Option<PathBuf>,
    /// Appended to the file stem of each cleaned copy.
    pub suffix: String,
    /// If `true`, replace the source file instead of writing a copy.
    pub in_place: bool,
    /// If `true`, create a `.bak` backup before replacing a source file.
    pub backup_originals: bool,
    /// If `true`, report what would be removed without writing anything.
    pub dry_run: bool,
    /// If `true`, decode the cleaned file and compare pixels before writing it.
    pub verify: bool,
    /// If `true`, refuse to write files that may still hold metadata.
    pub require_complete: bool,
    /// Number of files processed concurrently.
    pub jobs: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            destination: None,
            suffix: "_clean".to_string(),
            in_place: false,
            backup_originals: true,
            dry_run: false,
            verify: true,
            require_complete: false,
            jobs: 4,
        }
    }
}

impl PolicyConfig {
    /// Resolve the selectors into a [`ScrubPolicy`].
    pub fn resolve(&self) -> Result<ScrubPolicy> {
        let mut ids = BTreeSet::new();
        for selector in &self.tags {
            ids.extend(tags::resolve(selector)?);
        }
        let mode = match self.mode {
            ModeConfig::StripAll => {
                if !ids.is_empty() {
                    log::warn!("Tag list ignored in strip_all mode");
                }
                ScrubMode::StripAll
            }
            ModeConfig::StripListed => {
                if ids.is_empty() {
                    anyhow::bail!("strip_listed mode needs at least one tag selector");
                }
                ScrubMode::StripListed(ids)
            }
            ModeConfig::KeepListed => ScrubMode::KeepListed(ids),
        };
        Ok(ScrubPolicy {
            mode,
            compact: self.compact,
            drop_auxiliary: self.drop_auxiliary,
        })
    }
}

impl Config {
    /// Resolve the config file path: same directory as the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// The scrub policy described by this config.
    pub fn policy(&self) -> Result<ScrubPolicy> {
        self.policy.resolve().context("Invalid tag policy")
    }
}
