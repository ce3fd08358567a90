use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::settings::AppSettings;
use crate::watermark::compositor::{BitmapMode, Compositor, RenderOutcome};
use crate::watermark::fonts::TextRasterizer;
use crate::watermark::metadata::MetadataInjector;
use crate::watermark::model::{SizeUnit, WatermarkKind, WatermarkSettings, WatermarkSpec};
use crate::watermark::source::SourceImage;
use crate::watermark::surface::RenderSurface;

/// Requested export format. `Auto` keeps transparency capable sources
/// lossless and turns everything else into JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Auto,
    Jpeg,
    Png,
    Webp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
}

impl OutputFormat {
    pub fn resolve(requested: ExportFormat, source_has_alpha: bool) -> Self {
        match requested {
            ExportFormat::Auto if source_has_alpha => OutputFormat::Png,
            ExportFormat::Auto | ExportFormat::Jpeg => OutputFormat::Jpeg,
            ExportFormat::Png => OutputFormat::Png,
            ExportFormat::Webp => OutputFormat::WebP,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// `0.0..=1.0`, used for JPEG only.
    pub quality: f64,
    pub size_unit: SizeUnit,
    pub use_filename_as_watermark: bool,
}

impl ExportOptions {
    pub fn from_settings(app: &AppSettings) -> Self {
        Self {
            format: app.export_format,
            quality: app.export_quality,
            size_unit: app.font_size_unit,
            use_filename_as_watermark: app.use_filename_as_watermark,
        }
    }
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::from_settings(&AppSettings::default())
    }
}

/// Encode `pixels` as `format`.
pub fn encode(
    pixels: &RgbaImage,
    format: OutputFormat,
    quality: f64,
) -> anyhow::Result<Vec<u8>> {
    let (width, height) = pixels.dimensions();
    let mut out = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(pixels.clone()).to_rgb8();
            let quality = if quality.is_finite() {
                (quality * 100.0).round().clamp(1.0, 100.0) as u8
            } else {
                95
            };
            JpegEncoder::new_with_quality(&mut out, quality)
                .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
                .context("encode JPEG")?;
        }
        OutputFormat::Png => {
            PngEncoder::new(&mut out)
                .write_image(pixels.as_raw(), width, height, ExtendedColorType::Rgba8)
                .context("encode PNG")?;
        }
        OutputFormat::WebP => {
            tracing::debug!(quality, "WebP output is lossless; quality ignored");
            WebPEncoder::new_lossless(&mut out)
                .write_image(pixels.as_raw(), width, height, ExtendedColorType::Rgba8)
                .context("encode WebP")?;
        }
    }
    Ok(out)
}

/// `watermarked-<stem>.<ext>`
pub fn output_file_name(source_name: &str, format: OutputFormat) -> String {
    let stem = match source_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.contains('/') => stem,
        _ => source_name,
    };
    format!("watermarked-{stem}.{}", format.extension())
}

/// Output names already handed out in one batch. Collisions get a
/// ` (n)` suffix before the extension; comparison ignores case.
#[derive(Debug, Default)]
pub struct OutputNames {
    taken: HashSet<String>,
}

impl OutputNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, file_name: &str) -> String {
        let (stem, ext) = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (file_name, None),
        };
        let mut candidate = file_name.to_owned();
        let mut n = 1;
        while !self.taken.insert(candidate.to_lowercase()) {
            candidate = match ext {
                Some(ext) => format!("{stem} ({n}).{ext}"),
                None => format!("{stem} ({n})"),
            };
            n += 1;
        }
        candidate
    }
}

#[derive(Debug, Clone)]
pub struct ExportedImage {
    pub file_name: String,
    pub format: OutputFormat,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub metadata_preserved: bool,
    pub watermarked: bool,
}

impl ExportedImage {
    pub fn write_to_dir(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create output dir {}", dir.display()))?;
        let path = dir.join(&self.file_name);
        std::fs::write(&path, &self.bytes)
            .with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

/// Settings used to export `source`, with the file stem as text when asked.
pub fn effective_settings(
    source: &SourceImage,
    settings: &WatermarkSettings,
    options: &ExportOptions,
) -> WatermarkSettings {
    let mut settings = settings.clone();
    if options.use_filename_as_watermark && settings.kind == WatermarkKind::Text {
        settings.text = source.stem().to_owned();
    }
    settings
}

/// Render, encode and reinsert metadata for one image.
pub fn export_one<R: TextRasterizer>(
    compositor: &mut Compositor<R>,
    source: &SourceImage,
    spec: Option<&WatermarkSpec>,
    options: &ExportOptions,
    injector: &dyn MetadataInjector,
) -> anyhow::Result<ExportedImage> {
    let mut surface = RenderSurface::new();
    let outcome = compositor.render_into(&mut surface, source, spec, BitmapMode::Blocking);
    let watermarked = matches!(outcome, RenderOutcome::Complete { .. });
    if outcome == RenderOutcome::ContentUnavailable {
        tracing::warn!(
            image = %source.name,
            "watermark bitmap unavailable; exporting without it"
        );
    }

    let format = OutputFormat::resolve(options.format, source.has_alpha_format);
    let encoded = encode(surface.image(), format, options.quality)
        .with_context(|| format!("export {}", source.name))?;
    let dimensions = (surface.width(), surface.height());

    let (bytes, metadata_preserved) = match (&source.original_bytes, format) {
        (Some(original), OutputFormat::Jpeg) => {
            match injector.inject(original, encoded.clone(), dimensions) {
                Ok(bytes) => (bytes, true),
                Err(err) => {
                    tracing::warn!(image = %source.name, "metadata not preserved: {err:#}");
                    (encoded, false)
                }
            }
        }
        _ => (encoded, false),
    };

    let file_name = output_file_name(&source.name, format);
    tracing::info!(
        image = %source.name,
        output = %file_name,
        bytes = bytes.len(),
        metadata_preserved,
        "exported image"
    );
    Ok(ExportedImage {
        file_name,
        format,
        bytes,
        width: dimensions.0,
        height: dimensions.1,
        metadata_preserved,
        watermarked,
    })
}

/// One image of a batch: a loaded (or failed) source and its own settings.
pub struct BatchInput {
    pub name: String,
    pub source: anyhow::Result<SourceImage>,
    pub settings: WatermarkSettings,
}

impl BatchInput {
    pub fn ready(source: SourceImage, settings: WatermarkSettings) -> Self {
        Self {
            name: source.name.clone(),
            source: Ok(source),
            settings,
        }
    }

    pub fn open(path: &Path, settings: WatermarkSettings) -> Self {
        Self {
            name: path.display().to_string(),
            source: SourceImage::open(path),
            settings,
        }
    }
}

#[derive(Debug)]
pub struct BatchResult<T = ExportedImage> {
    pub name: String,
    pub result: anyhow::Result<T>,
}

/// Export every input in order, handing each finished image to `sink`
/// before the next one is rendered. A failing image, or a failing sink
/// call, is reported in its own result and does not stop the batch.
pub fn export_batch<R, I, F, T>(
    compositor: &mut Compositor<R>,
    inputs: I,
    options: &ExportOptions,
    injector: &dyn MetadataInjector,
    mut sink: F,
) -> Vec<BatchResult<T>>
where
    R: TextRasterizer,
    I: IntoIterator<Item = BatchInput>,
    F: FnMut(ExportedImage) -> anyhow::Result<T>,
{
    inputs
        .into_iter()
        .map(|input| {
            let result = input.source.and_then(|source| {
                let settings = effective_settings(&source, &input.settings, options);
                let spec = settings.to_spec(options.size_unit);
                let exported = export_one(compositor, &source, spec.as_ref(), options, injector)?;
                sink(exported)
            });
            if let Err(err) = &result {
                tracing::warn!(image = %input.name, "batch export failed: {err:#}");
            }
            BatchResult {
                name: input.name,
                result,
            }
        })
        .collect()
}
