//! User preferences and empirically tuned thresholds.
//!
//! Every threshold lives in [`Calibration`] so it can be overridden from the
//! settings file; the defaults are calibration points, not derived values.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::error::ConfigError;
use crate::pane::ViewMode;

/// Pages rendered ahead of a freshly painted page during idle time.
pub const PRERENDER_AHEAD: usize = 3;
/// Pages rendered behind a freshly painted page during idle time.
pub const PRERENDER_BEHIND: usize = 2;
/// Raster size above which a page is refused instead of allocated.
pub const MAX_RENDER_PIXELS: u64 = 16_000_000;

pub const MIN_SCALE: f32 = 0.2;
pub const MAX_SCALE: f32 = 3.0;

pub fn clamp_scale(scale: f32) -> f32 {
    if scale.is_finite() {
        scale.clamp(MIN_SCALE, MAX_SCALE)
    } else {
        1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "mode", content = "level")]
pub enum ZoomPreference {
    FitPage,
    FitWidth,
    Level(f32),
}

impl Default for ZoomPreference {
    fn default() -> Self {
        ZoomPreference::Level(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportNaming {
    pub prefix: String,
    pub suffix: String,
}

impl Default for ExportNaming {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            suffix: "_annotated".to_string(),
        }
    }
}

impl ExportNaming {
    /// `report.pdf` becomes `{prefix}report{suffix}.pdf`.
    pub fn file_name(&self, display_name: &str) -> String {
        let stem = Path::new(display_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "document".to_string());
        format!("{}{}{}.pdf", self.prefix, stem, self.suffix)
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// Max difference between extracted and rendered text length for which
    /// extraction offsets are trusted directly.
    pub direct_length_tolerance: usize,
    /// Characters of context taken on each side of a match as an anchor.
    pub anchor_length: usize,
    /// Characters of rendered text searched on each side of a candidate.
    pub anchor_window: usize,
    /// Horizontal gap, as a fraction of fragment height, that implies a space.
    pub space_gap_ratio: f32,
    /// Vertical distance, as a fraction of fragment height, that starts a new line.
    pub line_tolerance_ratio: f32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub sync_lock_timeout: Duration,
    /// Positions closer than this (in pages) are considered already in sync.
    pub sync_tolerance: f64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub zoom_debounce: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub highlight_retry_delay: Duration,
    pub highlight_retry_attempts: usize,
    /// Pre-paint margin before and after the viewport, as a fraction of its height.
    pub viewport_margin_ratio: f64,
    /// Line fragments closer than this multiple of line height are merged.
    pub merge_gap_ratio: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            direct_length_tolerance: 50,
            anchor_length: 20,
            anchor_window: 35,
            space_gap_ratio: 0.12,
            line_tolerance_ratio: 0.5,
            sync_lock_timeout: Duration::from_millis(100),
            sync_tolerance: 0.005,
            zoom_debounce: Duration::from_millis(150),
            highlight_retry_delay: Duration::from_millis(100),
            highlight_retry_attempts: 20,
            viewport_margin_ratio: 0.5,
            merge_gap_ratio: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub author: String,
    pub view_mode: ViewMode,
    pub zoom: ZoomPreference,
    pub export: ExportNaming,
    pub auto_backup: bool,
    pub pixel_ratio: f32,
    pub calibration: Calibration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            author: "Anonymous".to_string(),
            view_mode: ViewMode::Continuous,
            zoom: ZoomPreference::default(),
            export: ExportNaming::default(),
            auto_backup: true,
            pixel_ratio: 1.0,
            calibration: Calibration::default(),
        }
    }
}

impl Settings {
    pub fn default_path(dirs: &ProjectDirs) -> PathBuf {
        dirs.config_dir().join("settings.toml")
    }

    /// Reads settings from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = toml::to_string_pretty(self)?;
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, payload)?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}
