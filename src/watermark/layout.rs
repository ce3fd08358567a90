//! Watermark placement geometry.
//!
//! Everything here is pure: numeric settings and pixel dimensions in,
//! placement transforms out. Text measurement is supplied by the caller as a
//! `(line, font_size) -> width` callback so the same math drives preview and
//! export regardless of which rasterizer is active.

use crate::watermark::model::{Position, SizeUnit};

/// Font size used to measure the first line when resolving percent sizes.
pub const REFERENCE_FONT_SIZE: f64 = 10.0;
pub const MIN_RESOLVED_SIZE: f64 = 8.0;
pub const MAX_PIXEL_SIZE: f64 = 200.0;
pub const LINE_HEIGHT_FACTOR: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasSize {
    pub width: f64,
    pub height: f64,
}

impl CanvasSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn from_pixels(width: u32, height: u32) -> Self {
        Self::new(width as f64, height as f64)
    }
}

/// Unrotated bounding box of the watermark content.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Footprint {
    pub width: f64,
    pub height: f64,
}

impl Footprint {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Axis-aligned box of this footprint rotated by `radians`.
    pub fn rotated(&self, radians: f64) -> Footprint {
        let sin = radians.sin().abs();
        let cos = radians.cos().abs();
        Footprint {
            width: self.width * cos + self.height * sin,
            height: self.width * sin + self.height * cos,
        }
    }
}

/// Center point and rotation of one drawn watermark instance, in base image
/// pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementTransform {
    pub anchor_x: f64,
    pub anchor_y: f64,
    pub rotation_radians: f64,
}

impl PlacementTransform {
    /// Axis-aligned bounds `(min_x, min_y, max_x, max_y)` of `footprint`
    /// painted at this placement.
    pub fn bounds(&self, footprint: Footprint) -> (f64, f64, f64, f64) {
        let rotated = footprint.rotated(self.rotation_radians);
        (
            self.anchor_x - rotated.width / 2.0,
            self.anchor_y - rotated.height / 2.0,
            self.anchor_x + rotated.width / 2.0,
            self.anchor_y + rotated.height / 2.0,
        )
    }
}

/// The geometric subset of a watermark spec the layout needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutParams {
    pub position: Position,
    pub rotation_radians: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub spacing_x: f64,
    pub spacing_y: f64,
}

/// Measured multi-line text block at its resolved font size.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub lines: Vec<String>,
    pub line_widths: Vec<f64>,
    pub font_size: f64,
    pub line_height: f64,
    pub footprint: Footprint,
}

impl TextBlock {
    /// Vertical offset of line `index` from the block center.
    pub fn line_center_y(&self, index: usize) -> f64 {
        (index as f64 - (self.lines.len() as f64 - 1.0) / 2.0) * self.line_height
    }
}

pub fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n').collect()
}

/// Resolve the font size for a text watermark.
///
/// Pixel sizes are clamped to `[8, 200]`. Percent sizes measure the first line
/// at the reference size and scale so the line would span `size_value`
/// percent of the image width.
pub fn resolve_text_size<M>(
    text: &str,
    size_value: f64,
    unit: SizeUnit,
    image_width: f64,
    measure: M,
) -> f64
where
    M: Fn(&str, f64) -> f64,
{
    match unit {
        SizeUnit::Pixels => clamp_pixel_size(size_value),
        SizeUnit::Percent => {
            let first = text.split('\n').next().unwrap_or_default();
            let sample = if first.is_empty() { " " } else { first };
            let reference_width = measure(sample, REFERENCE_FONT_SIZE);
            if !(reference_width > 0.0) || !reference_width.is_finite() {
                return MIN_RESOLVED_SIZE;
            }
            let scale_ratio = image_width / reference_width;
            let size = REFERENCE_FONT_SIZE * scale_ratio * (size_value / 100.0);
            if size.is_finite() {
                size.max(MIN_RESOLVED_SIZE)
            } else {
                MIN_RESOLVED_SIZE
            }
        }
    }
}

/// Resolve the rendered width of an image watermark.
pub fn resolve_image_size(size_value: f64, unit: SizeUnit, image_width: f64) -> f64 {
    match unit {
        SizeUnit::Pixels => clamp_pixel_size(size_value),
        SizeUnit::Percent => {
            let size = image_width * size_value / 100.0;
            if size.is_finite() {
                size.max(MIN_RESOLVED_SIZE)
            } else {
                MIN_RESOLVED_SIZE
            }
        }
    }
}

fn clamp_pixel_size(size_value: f64) -> f64 {
    if size_value.is_nan() {
        return MIN_RESOLVED_SIZE;
    }
    size_value.clamp(MIN_RESOLVED_SIZE, MAX_PIXEL_SIZE)
}

pub fn measure_text_block<M>(text: &str, font_size: f64, measure: M) -> TextBlock
where
    M: Fn(&str, f64) -> f64,
{
    let lines: Vec<String> = split_lines(text).into_iter().map(str::to_owned).collect();
    let line_widths: Vec<f64> = lines
        .iter()
        .map(|line| measure(line, font_size).max(0.0))
        .collect();
    let max_width = line_widths.iter().copied().fold(0.0, f64::max);
    let line_height = font_size * LINE_HEIGHT_FACTOR;
    let footprint = Footprint::new(max_width, lines.len() as f64 * line_height);

    TextBlock {
        lines,
        line_widths,
        font_size,
        line_height,
        footprint,
    }
}

/// Aspect-locked footprint of an image watermark `resolved_width` wide.
pub fn image_footprint(
    resolved_width: f64,
    intrinsic_width: u32,
    intrinsic_height: u32,
) -> Footprint {
    if intrinsic_width == 0 || intrinsic_height == 0 {
        return Footprint::default();
    }
    let aspect = intrinsic_height as f64 / intrinsic_width as f64;
    Footprint::new(resolved_width, resolved_width * aspect)
}

/// The single placement for a named position.
///
/// Offsets move the center within the safe area, i.e. the region where the
/// rotated footprint stays on the canvas. Positive `offset_y` moves up.
pub fn single_placement(
    params: &LayoutParams,
    canvas: CanvasSize,
    footprint: Footprint,
) -> PlacementTransform {
    let center_x = canvas.width / 2.0;
    let center_y = canvas.height / 2.0;

    let rotated = footprint.rotated(params.rotation_radians);
    let safe_width = canvas.width - rotated.width;
    let safe_height = canvas.height - rotated.height;

    let offset_x = (params.offset_x / 100.0) * (safe_width / 2.0);
    let offset_y = (params.offset_y / 100.0) * (safe_height / 2.0);

    let raw_x = center_x + offset_x;
    let raw_y = center_y - offset_y;

    PlacementTransform {
        anchor_x: clamp_lower_wins(
            raw_x,
            rotated.width / 2.0,
            canvas.width - rotated.width / 2.0,
        ),
        anchor_y: clamp_lower_wins(
            raw_y,
            rotated.height / 2.0,
            canvas.height - rotated.height / 2.0,
        ),
        rotation_radians: params.rotation_radians,
    }
}

// `f64::clamp` panics when lo > hi; an oversized footprint pins to `lo`.
fn clamp_lower_wins(value: f64, lo: f64, hi: f64) -> f64 {
    lo.max(value.min(hi))
}

/// Grid of tiles for full-screen mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGrid {
    pub cols: u32,
    pub rows: u32,
    pub pitch_x: f64,
    pub pitch_y: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub footprint: Footprint,
    pub rotation_radians: f64,
}

impl TileGrid {
    /// Returns `None` when either pitch is not a positive finite number.
    pub fn new(params: &LayoutParams, canvas: CanvasSize, footprint: Footprint) -> Option<Self> {
        let pitch_x = footprint.width + params.spacing_x;
        let pitch_y = footprint.height + params.spacing_y;
        if !(pitch_x > 0.0 && pitch_y > 0.0 && pitch_x.is_finite() && pitch_y.is_finite()) {
            return None;
        }

        let cols = (canvas.width / pitch_x).ceil() + 2.0;
        let rows = (canvas.height / pitch_y).floor() + 2.0;

        Some(Self {
            cols: cols.max(0.0) as u32,
            rows: rows.max(0.0) as u32,
            pitch_x,
            pitch_y,
            offset_x: (params.offset_x / 100.0) * canvas.width,
            offset_y: (params.offset_y / 100.0) * canvas.height,
            footprint,
            rotation_radians: params.rotation_radians,
        })
    }

    pub fn len(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn placement(&self, row: u32, col: u32) -> PlacementTransform {
        let base_x = col as f64 * self.pitch_x - self.pitch_x / 2.0 + self.offset_x;
        let base_y = row as f64 * self.pitch_y + self.footprint.height / 2.0 + self.offset_y;
        PlacementTransform {
            anchor_x: base_x + self.footprint.width / 2.0,
            anchor_y: base_y,
            rotation_radians: self.rotation_radians,
        }
    }

    pub fn iter(&self) -> TileIter {
        TileIter {
            grid: *self,
            index: 0,
        }
    }
}

/// Row-major iterator over a [`TileGrid`].
#[derive(Debug, Clone)]
pub struct TileIter {
    grid: TileGrid,
    index: usize,
}

impl Iterator for TileIter {
    type Item = PlacementTransform;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.grid.len() {
            return None;
        }
        let cols = self.grid.cols as usize;
        let row = (self.index / cols) as u32;
        let col = (self.index % cols) as u32;
        self.index += 1;
        Some(self.grid.placement(row, col))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.grid.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TileIter {}

/// Placements for one render pass.
#[derive(Debug, Clone)]
pub enum Placements {
    Single(Option<PlacementTransform>),
    Tiled(TileIter),
    Empty,
}

impl Iterator for Placements {
    type Item = PlacementTransform;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Placements::Single(placement) => placement.take(),
            Placements::Tiled(tiles) => tiles.next(),
            Placements::Empty => None,
        }
    }
}

pub fn compute_placements(
    params: &LayoutParams,
    canvas: CanvasSize,
    footprint: Footprint,
) -> Placements {
    if params.position.is_full_screen() {
        match TileGrid::new(params, canvas, footprint) {
            Some(grid) => Placements::Tiled(grid.iter()),
            None => Placements::Empty,
        }
    } else {
        Placements::Single(Some(single_placement(params, canvas, footprint)))
    }
}
