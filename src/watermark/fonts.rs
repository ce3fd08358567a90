use ab_glyph::{Font, FontArc, Glyph, GlyphId, OutlinedGlyph, PxScale, ScaleFont};
use anyhow::Context;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;

use crate::settings::AppSettings;

/// Pixel window `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl ClipRect {
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// `[0, width) x [0, height)`
    pub fn sized(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    pub fn width(&self) -> u32 {
        (self.x1 - self.x0).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y1 - self.y0).max(0) as u32
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    pub fn union(self, other: ClipRect) -> ClipRect {
        ClipRect::new(
            self.x0.min(other.x0),
            self.y0.min(other.y0),
            self.x1.max(other.x1),
            self.y1.max(other.y1),
        )
    }

    pub fn intersect(self, other: ClipRect) -> ClipRect {
        ClipRect::new(
            self.x0.max(other.x0),
            self.y0.max(other.y0),
            self.x1.min(other.x1),
            self.y1.min(other.y1),
        )
    }
}

/// Measures and rasterizes single lines of text.
///
/// Coordinates passed to `plot` are pixel positions relative to whatever
/// target the caller is filling; `coverage` is in `0.0..=1.0`.
pub trait TextRasterizer {
    /// Advance width of `text` at `size` pixels.
    fn measure_line(&self, family: &str, size: f32, text: &str) -> f32;

    /// Rasterize `text` left-aligned at `left`, vertically centred on `middle`.
    /// Only pixels inside `clip` are plotted, and work outside it is skipped.
    #[allow(clippy::too_many_arguments)]
    fn rasterize_line(
        &self,
        family: &str,
        size: f32,
        text: &str,
        left: f32,
        middle: f32,
        clip: ClipRect,
        plot: &mut dyn FnMut(i32, i32, f32),
    );
}

/// Largest glyph raster drawn at full resolution. Bigger glyphs are drawn
/// at a reduced scale and sampled up.
const MAX_GLYPH_PIXELS: f32 = 2048.0 * 2048.0;

static SYSTEM_FALLBACK: Lazy<Option<FontArc>> = Lazy::new(|| {
    const CANDIDATES: &[&str] = &[
        "C:\\Windows\\Fonts\\arial.ttf",
        "C:\\Windows\\Fonts\\msyh.ttc",
        "C:\\Windows\\Fonts\\segoeui.ttf",
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/usr/share/fonts/noto/NotoSans-Regular.ttf",
        "/System/Library/Fonts/Helvetica.ttc",
        "/Library/Fonts/Arial.ttf",
    ];
    CANDIDATES.iter().find_map(|path| {
        let data = std::fs::read(path).ok()?;
        let font = FontArc::try_from_vec(data).ok()?;
        tracing::debug!(path = *path, "loaded fallback font");
        Some(font)
    })
});

/// Fonts available to text watermarks, keyed by lower-cased family name.
#[derive(Clone, Default)]
pub struct FontBook {
    families: HashMap<String, FontArc>,
    fallback: Option<FontArc>,
}

impl FontBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A book whose fallback is the first usable well-known system font.
    pub fn with_system_fallback() -> Self {
        Self {
            families: HashMap::new(),
            fallback: (*SYSTEM_FALLBACK).clone(),
        }
    }

    /// Build a book from the configured font files. Files that fail to load
    /// are logged and skipped.
    pub fn from_settings(settings: &AppSettings) -> Self {
        let mut book = Self::with_system_fallback();
        for (family, path) in &settings.font_paths {
            if let Err(err) = book.register_file(family, path) {
                tracing::warn!(family = %family, "skipping font: {err:#}");
            }
        }
        book
    }

    pub fn register_bytes(&mut self, family: &str, data: Vec<u8>) -> anyhow::Result<()> {
        let font = FontArc::try_from_vec(data)
            .with_context(|| format!("parse font data for '{family}'"))?;
        self.families.insert(family.trim().to_lowercase(), font);
        Ok(())
    }

    pub fn register_file(&mut self, family: &str, path: &Path) -> anyhow::Result<()> {
        let data =
            std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
        self.register_bytes(family, data)
    }

    pub fn has_fonts(&self) -> bool {
        self.fallback.is_some() || !self.families.is_empty()
    }

    /// Resolve a CSS style family list (`"Arial, sans-serif"`) to a font.
    pub fn resolve(&self, family: &str) -> Option<&FontArc> {
        family
            .split(',')
            .map(|name| name.trim().trim_matches(|c| c == '"' || c == '\'').to_lowercase())
            .find_map(|name| self.families.get(&name))
            .or(self.fallback.as_ref())
    }
}

impl std::fmt::Debug for FontBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.families.keys().collect();
        names.sort();
        f.debug_struct("FontBook")
            .field("families", &names)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

fn printable(text: &str) -> impl Iterator<Item = char> + '_ {
    text.chars().filter(|c| !c.is_control())
}

impl TextRasterizer for FontBook {
    fn measure_line(&self, family: &str, size: f32, text: &str) -> f32 {
        let Some(font) = self.resolve(family) else {
            return 0.0;
        };
        let scaled = font.as_scaled(PxScale::from(size));
        let mut width = 0.0;
        let mut prev: Option<GlyphId> = None;
        for ch in printable(text) {
            let id = scaled.glyph_id(ch);
            if let Some(prev) = prev {
                width += scaled.kern(prev, id);
            }
            width += scaled.h_advance(id);
            prev = Some(id);
        }
        width
    }

    fn rasterize_line(
        &self,
        family: &str,
        size: f32,
        text: &str,
        left: f32,
        middle: f32,
        clip: ClipRect,
        plot: &mut dyn FnMut(i32, i32, f32),
    ) {
        if clip.is_empty() {
            return;
        }
        let Some(font) = self.resolve(family) else {
            return;
        };
        let scale = PxScale::from(size);
        let scaled = font.as_scaled(scale);
        let baseline = middle + (scaled.ascent() + scaled.descent()) / 2.0;

        let mut cursor_x = left;
        let mut prev: Option<GlyphId> = None;
        for ch in printable(text) {
            let id = scaled.glyph_id(ch);
            if let Some(prev) = prev {
                cursor_x += scaled.kern(prev, id);
            }
            let glyph = id.with_scale_and_position(scale, ab_glyph::point(cursor_x, baseline));
            if let Some(outlined) = font.outline_glyph(glyph.clone()) {
                draw_glyph(font, glyph, &outlined, clip, plot);
            }
            cursor_x += scaled.h_advance(id);
            prev = Some(id);
        }
    }
}

fn draw_glyph(
    font: &FontArc,
    glyph: Glyph,
    outlined: &OutlinedGlyph,
    clip: ClipRect,
    plot: &mut dyn FnMut(i32, i32, f32),
) {
    let bounds = outlined.px_bounds();
    let (min_x, min_y) = (bounds.min.x as i32, bounds.min.y as i32);
    let visible = clip.intersect(ClipRect::new(
        min_x,
        min_y,
        bounds.max.x.ceil() as i32,
        bounds.max.y.ceil() as i32,
    ));
    if visible.is_empty() {
        return;
    }

    let area = bounds.width() * bounds.height();
    if area <= MAX_GLYPH_PIXELS {
        outlined.draw(|px, py, coverage| {
            let (x, y) = (min_x + px as i32, min_y + py as i32);
            if visible.contains(x, y) {
                plot(x, y, coverage);
            }
        });
        return;
    }

    // Rasterize a reduced copy and sample it over the visible part only.
    let factor = (MAX_GLYPH_PIXELS / area).sqrt();
    let reduced = Glyph {
        id: glyph.id,
        scale: PxScale {
            x: glyph.scale.x * factor,
            y: glyph.scale.y * factor,
        },
        position: ab_glyph::point(0.0, 0.0),
    };
    let Some(small) = font.outline_glyph(reduced) else {
        return;
    };
    let small_bounds = small.px_bounds();
    let sw = small_bounds.width().ceil().max(1.0) as usize;
    let sh = small_bounds.height().ceil().max(1.0) as usize;
    let mut coverage = vec![0f32; sw * sh];
    small.draw(|px, py, c| {
        if let Some(cell) = coverage.get_mut(py as usize * sw + px as usize) {
            *cell = c;
        }
    });

    let sample = |sx: i64, sy: i64| -> f32 {
        if sx < 0 || sy < 0 || sx >= sw as i64 || sy >= sh as i64 {
            return 0.0;
        }
        coverage[sy as usize * sw + sx as usize]
    };
    let step_x = small_bounds.width() / bounds.width();
    let step_y = small_bounds.height() / bounds.height();
    for y in visible.y0..visible.y1 {
        let fy = (y as f32 + 0.5 - bounds.min.y) * step_y - 0.5;
        let (iy, ty) = (fy.floor() as i64, fy - fy.floor());
        for x in visible.x0..visible.x1 {
            let fx = (x as f32 + 0.5 - bounds.min.x) * step_x - 0.5;
            let (ix, tx) = (fx.floor() as i64, fx - fx.floor());
            let value = sample(ix, iy) * (1.0 - tx) * (1.0 - ty)
                + sample(ix + 1, iy) * tx * (1.0 - ty)
                + sample(ix, iy + 1) * (1.0 - tx) * ty
                + sample(ix + 1, iy + 1) * tx * ty;
            if value > 0.0 {
                plot(x, y, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_book_measures_nothing() {
        let book = FontBook::new();
        assert!(!book.has_fonts());
        assert!(book.resolve("Arial").is_none());
        assert_eq!(book.measure_line("Arial", 24.0, "hello"), 0.0);

        let mut plotted = 0;
        let clip = ClipRect::sized(200, 40);
        book.rasterize_line("Arial", 24.0, "hello", 0.0, 12.0, clip, &mut |_, _, _| {
            plotted += 1
        });
        assert_eq!(plotted, 0);
    }

    #[test]
    fn invalid_font_data_is_rejected() {
        let mut book = FontBook::new();
        let err = book.register_bytes("Broken", vec![0u8; 16]).unwrap_err();
        assert!(err.to_string().contains("Broken"));
    }

    #[test]
    fn missing_font_file_reports_path() {
        let mut book = FontBook::new();
        let err = book
            .register_file("Mono", Path::new("/nonexistent/font.ttf"))
            .unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/font.ttf"));
    }

    #[test]
    fn system_fallback_measures_text_when_available() {
        let book = FontBook::with_system_fallback();
        if !book.has_fonts() {
            return;
        }
        let narrow = book.measure_line("No Such Family, sans-serif", 20.0, "ab");
        let wide = book.measure_line("No Such Family, sans-serif", 20.0, "abab");
        assert!(narrow > 0.0);
        assert!(wide > narrow);
        let doubled = book.measure_line("x", 40.0, "ab");
        assert!((doubled - narrow * 2.0).abs() < 0.5);
    }

    #[test]
    fn rasterizing_respects_the_clip() {
        let book = FontBook::with_system_fallback();
        if !book.has_fonts() {
            return;
        }
        let clip = ClipRect::new(10, 0, 30, 40);
        let mut outside = 0;
        let mut inside = 0;
        book.rasterize_line("sans-serif", 32.0, "HHHH", 0.0, 20.0, clip, &mut |x, y, _| {
            if clip.contains(x, y) {
                inside += 1;
            } else {
                outside += 1;
            }
        });
        assert!(inside > 0);
        assert_eq!(outside, 0);
    }

    #[test]
    fn huge_glyphs_are_drawn_only_where_visible() {
        let book = FontBook::with_system_fallback();
        if !book.has_fonts() {
            return;
        }
        // A 20 000 px glyph would need a multi-gigabyte coverage buffer.
        let clip = ClipRect::sized(64, 64);
        let mut plotted = 0usize;
        book.rasterize_line("sans-serif", 20_000.0, "H", -100.0, 0.0, clip, &mut |x, y, _| {
            assert!(clip.contains(x, y));
            plotted += 1;
        });
        assert!(plotted <= 64 * 64);
    }

    #[test]
    fn clip_rect_set_operations() {
        let a = ClipRect::new(0, 0, 10, 10);
        let b = ClipRect::new(5, -5, 20, 5);
        assert_eq!(a.union(b), ClipRect::new(0, -5, 20, 10));
        assert_eq!(a.intersect(b), ClipRect::new(5, 0, 10, 5));
        assert_eq!(a.intersect(b).area(), 25);
        assert!(a.intersect(ClipRect::new(10, 0, 12, 1)).is_empty());
    }
}
