use crate::watermark::export::ExportFormat;
use crate::watermark::model::{Position, SizeUnit};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Application wide preferences: watermark defaults for new images, editor
/// ranges and export options.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppSettings {
    #[serde(default = "default_watermark")]
    pub default_watermark: String,
    #[serde(default)]
    pub default_position: Position,
    #[serde(default = "default_size")]
    pub default_size: f64,
    #[serde(default)]
    pub default_rotation: f64,
    #[serde(default = "default_opacity")]
    pub default_opacity: f64,
    #[serde(default = "default_color")]
    pub default_color: String,
    #[serde(default = "default_font_family")]
    pub default_font_family: String,
    #[serde(default)]
    pub default_offset_x: f64,
    #[serde(default)]
    pub default_offset_y: f64,
    #[serde(default = "default_spacing")]
    pub default_spacing_x: f64,
    #[serde(default = "default_spacing")]
    pub default_spacing_y: f64,
    /// Lower bound of the size control.
    #[serde(default = "default_min_size")]
    pub min_size: f64,
    #[serde(default = "default_max_size")]
    pub max_size: f64,
    #[serde(default = "default_min_opacity")]
    pub min_opacity: f64,
    #[serde(default = "default_max_opacity")]
    pub max_opacity: f64,
    #[serde(default)]
    pub export_format: ExportFormat,
    /// JPEG quality in `0.0..=1.0`.
    #[serde(default = "default_export_quality")]
    pub export_quality: f64,
    #[serde(default)]
    pub font_size_unit: SizeUnit,
    /// When enabled the logger runs at debug level and honours `RUST_LOG`.
    #[serde(default)]
    pub debug_logging: bool,
    /// Batch export replaces the watermark text with each file's stem.
    #[serde(default)]
    pub use_filename_as_watermark: bool,
    /// Font files keyed by family name.
    #[serde(default)]
    pub font_paths: HashMap<String, PathBuf>,
}

fn default_watermark() -> String {
    "示例水印".into()
}

fn default_size() -> f64 {
    10.0
}

fn default_opacity() -> f64 {
    0.7
}

fn default_color() -> String {
    "#ffffff".into()
}

fn default_font_family() -> String {
    "Arial".into()
}

fn default_spacing() -> f64 {
    100.0
}

fn default_min_size() -> f64 {
    1.0
}

fn default_max_size() -> f64 {
    100.0
}

fn default_min_opacity() -> f64 {
    0.1
}

fn default_max_opacity() -> f64 {
    1.0
}

fn default_export_quality() -> f64 {
    0.95
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_watermark: default_watermark(),
            default_position: Position::Center,
            default_size: default_size(),
            default_rotation: 0.0,
            default_opacity: default_opacity(),
            default_color: default_color(),
            default_font_family: default_font_family(),
            default_offset_x: 0.0,
            default_offset_y: 0.0,
            default_spacing_x: default_spacing(),
            default_spacing_y: default_spacing(),
            min_size: default_min_size(),
            max_size: default_max_size(),
            min_opacity: default_min_opacity(),
            max_opacity: default_max_opacity(),
            export_format: ExportFormat::Auto,
            export_quality: default_export_quality(),
            font_size_unit: SizeUnit::Percent,
            debug_logging: false,
            use_filename_as_watermark: false,
            font_paths: HashMap::new(),
        }
    }
}

impl AppSettings {
    /// Load settings from `path`. A missing or empty file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("parse settings {}", path.display()))?;
        settings.sanitize();
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create settings dir {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(self).context("serialize settings")?;
        std::fs::write(path, json).with_context(|| format!("write settings {}", path.display()))?;
        Ok(())
    }

    /// Repair non-finite, inverted or out-of-range values.
    pub fn sanitize(&mut self) {
        self.min_size = finite_or(self.min_size, default_min_size()).max(0.0);
        self.max_size = finite_or(self.max_size, default_max_size());
        if self.max_size < self.min_size {
            std::mem::swap(&mut self.min_size, &mut self.max_size);
        }

        self.min_opacity = finite_or(self.min_opacity, default_min_opacity()).clamp(0.0, 1.0);
        self.max_opacity = finite_or(self.max_opacity, default_max_opacity()).clamp(0.0, 1.0);
        if self.max_opacity < self.min_opacity {
            std::mem::swap(&mut self.min_opacity, &mut self.max_opacity);
        }

        self.export_quality =
            finite_or(self.export_quality, default_export_quality()).clamp(0.0, 1.0);
        self.default_size = finite_or(self.default_size, default_size());
        self.default_opacity = finite_or(self.default_opacity, default_opacity()).clamp(0.0, 1.0);
        self.default_rotation = finite_or(self.default_rotation, 0.0).clamp(-180.0, 180.0);
        self.default_offset_x = finite_or(self.default_offset_x, 0.0).clamp(-100.0, 100.0);
        self.default_offset_y = finite_or(self.default_offset_y, 0.0).clamp(-100.0, 100.0);
        self.default_spacing_x = finite_or(self.default_spacing_x, default_spacing());
        self.default_spacing_y = finite_or(self.default_spacing_y, default_spacing());
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// `<config dir>/watermark_studio/settings.json`, or a relative
/// `settings.json` when the platform has no config dir.
pub fn default_settings_path() -> PathBuf {
    dirs_next::config_dir()
        .map(|dir| dir.join("watermark_studio").join("settings.json"))
        .unwrap_or_else(|| PathBuf::from("settings.json"))
}
