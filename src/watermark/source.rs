use anyhow::Context;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, RgbaImage};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a loaded source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(u64);

impl ImageId {
    pub fn next() -> Self {
        Self(NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A decoded image to be watermarked.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub id: ImageId,
    pub name: String,
    pub pixels: RgbaImage,
    pub original_bytes: Option<Arc<[u8]>>,
    /// Whether the source file type can carry transparency.
    pub has_alpha_format: bool,
}

impl SourceImage {
    /// Wrap already decoded pixels.
    pub fn from_pixels(name: impl Into<String>, pixels: RgbaImage) -> Self {
        let name = name.into();
        let has_alpha_format = name_has_alpha(&name);
        Self {
            id: ImageId::next(),
            name,
            pixels,
            original_bytes: None,
            has_alpha_format,
        }
    }

    /// Decode encoded image bytes, keeping them for metadata reinsertion.
    /// An Exif orientation is applied so the pixels are upright.
    pub fn decode(name: impl Into<String>, bytes: Vec<u8>) -> anyhow::Result<Self> {
        let name = name.into();
        let format = image::guess_format(&bytes).ok();
        let decoded = decode_upright(&bytes).with_context(|| format!("decode image {name}"))?;
        let has_alpha_format =
            format.map(format_has_alpha).unwrap_or(false) || name_has_alpha(&name);
        tracing::debug!(
            name = %name,
            width = decoded.width(),
            height = decoded.height(),
            ?format,
            "decoded source image"
        );
        Ok(Self {
            id: ImageId::next(),
            name,
            pixels: decoded.to_rgba8(),
            original_bytes: Some(bytes.into()),
            has_alpha_format,
        })
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read image {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::decode(name, bytes)
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// File name without its final extension.
    pub fn stem(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }
}

fn decode_upright(bytes: &[u8]) -> anyhow::Result<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation().unwrap_or_else(|err| {
        tracing::debug!("ignoring unreadable orientation: {err}");
        Orientation::NoTransforms
    });
    let mut decoded = DynamicImage::from_decoder(decoder)?;
    decoded.apply_orientation(orientation);
    Ok(decoded)
}

pub fn format_has_alpha(format: ImageFormat) -> bool {
    matches!(format, ImageFormat::Png | ImageFormat::WebP | ImageFormat::Gif)
}

fn name_has_alpha(name: &str) -> bool {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return false;
    };
    matches!(
        ext.to_ascii_lowercase().as_str(),
        "png" | "webp" | "gif" | "heic" | "heif"
    )
}
