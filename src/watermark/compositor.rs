use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use std::collections::HashMap;
use std::sync::Arc;

use crate::watermark::bitmap_cache::{BitmapCache, BitmapRequest};
use crate::watermark::fonts::{ClipRect, FontBook, TextRasterizer};
use crate::watermark::layout::{
    compute_placements, image_footprint, measure_text_block, resolve_image_size,
    resolve_text_size, CanvasSize, Footprint, PlacementTransform, TextBlock,
};
use crate::watermark::model::{WatermarkContent, WatermarkImage, WatermarkSpec};
use crate::watermark::source::{ImageId, SourceImage};
use crate::watermark::surface::{Affine, Layer, RenderSurface};

/// How a render pass obtains watermark bitmaps that are not decoded yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapMode {
    /// Queue the decode and paint the base image only.
    Deferred,
    /// Decode inline before painting.
    Blocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// No watermark was requested; the surface holds the base image.
    BaseOnly,
    /// The watermark was laid out at `placements` positions.
    Complete { placements: usize },
    /// The watermark bitmap is still loading.
    AwaitingBitmap,
    /// The watermark bitmap could not be decoded.
    ContentUnavailable,
}

/// Glyph overhang allowance around a text block, as a fraction of font size.
const TEXT_PADDING_FACTOR: f64 = 0.5;

/// Largest shared text layer, in multiples of the canvas area. Text needing
/// more is rasterized separately for each placement.
const SHARED_LAYER_BUDGET: f64 = 2.0;

/// Extra layer pixels kept around a visible window for bilinear sampling.
const WINDOW_MARGIN: i32 = 2;

/// A measured text block and the full layer it would occupy.
struct TextPlan<'a> {
    family: &'a str,
    block: TextBlock,
    color: [u8; 4],
    pad: f64,
    width: f64,
    height: f64,
    origin_x: f64,
    origin_y: f64,
}

impl TextPlan<'_> {
    fn bounds(&self) -> ClipRect {
        ClipRect::new(0, 0, self.width as i32, self.height as i32)
    }

    /// The part of the layer that can land on the canvas at `placement`.
    fn visible_window(&self, placement: &PlacementTransform, canvas: CanvasSize) -> ClipRect {
        let to_canvas = Affine::translation(placement.anchor_x, placement.anchor_y)
            .then(&Affine::rotation(placement.rotation_radians))
            .then(&Affine::translation(-self.origin_x, -self.origin_y));
        let Some(to_layer) = to_canvas.invert() else {
            return ClipRect::new(0, 0, 0, 0);
        };
        let corners = [
            to_layer.apply(0.0, 0.0),
            to_layer.apply(canvas.width, 0.0),
            to_layer.apply(0.0, canvas.height),
            to_layer.apply(canvas.width, canvas.height),
        ];
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        let window = ClipRect::new(
            (min_x.floor() as i32).saturating_sub(WINDOW_MARGIN),
            (min_y.floor() as i32).saturating_sub(WINDOW_MARGIN),
            (max_x.ceil() as i32).saturating_add(WINDOW_MARGIN),
            (max_y.ceil() as i32).saturating_add(WINDOW_MARGIN),
        );
        window.intersect(self.bounds())
    }
}

enum Artwork<'a> {
    Nothing,
    /// One layer drawn at every placement.
    Shared(Layer),
    /// Each placement rasterizes its own visible window.
    PerPlacement {
        plan: TextPlan<'a>,
        windows: Vec<ClipRect>,
    },
}

/// Paints source images and their watermarks onto render surfaces.
pub struct Compositor<R: TextRasterizer = FontBook> {
    fonts: R,
    bitmaps: BitmapCache,
    surfaces: HashMap<ImageId, RenderSurface>,
}

impl Compositor<FontBook> {
    pub fn with_system_fonts() -> Self {
        Self::new(FontBook::with_system_fallback())
    }
}

impl<R: TextRasterizer> Compositor<R> {
    pub fn new(fonts: R) -> Self {
        Self {
            fonts,
            bitmaps: BitmapCache::new(),
            surfaces: HashMap::new(),
        }
    }

    pub fn fonts(&self) -> &R {
        &self.fonts
    }

    pub fn bitmaps(&self) -> &BitmapCache {
        &self.bitmaps
    }

    /// Complete queued bitmap decodes. Returns how many settled.
    pub fn pump_bitmaps(&mut self) -> usize {
        self.bitmaps.pump()
    }

    /// Let bitmaps that failed to decode be attempted again on the next
    /// render.
    pub fn retry_failed_bitmaps(&mut self) -> usize {
        self.bitmaps.forget_failures()
    }

    /// The cached surface of a previously rendered source.
    pub fn surface(&self, id: ImageId) -> Option<&RenderSurface> {
        self.surfaces.get(&id)
    }

    /// Drop the cached surface of a source that is no longer shown.
    pub fn release(&mut self, id: ImageId) {
        self.surfaces.remove(&id);
    }

    /// Render `source` into its cached surface, deferring bitmap decodes.
    pub fn render(
        &mut self,
        source: &SourceImage,
        spec: Option<&WatermarkSpec>,
    ) -> RenderOutcome {
        let mut surface = self.surfaces.remove(&source.id).unwrap_or_default();
        let outcome = self.render_into(&mut surface, source, spec, BitmapMode::Deferred);
        self.surfaces.insert(source.id, surface);
        outcome
    }

    /// Render `source` and its watermark onto a caller owned surface.
    pub fn render_into(
        &mut self,
        surface: &mut RenderSurface,
        source: &SourceImage,
        spec: Option<&WatermarkSpec>,
        mode: BitmapMode,
    ) -> RenderOutcome {
        surface.paint_base(&source.pixels);
        let Some(spec) = spec else {
            return RenderOutcome::BaseOnly;
        };
        let canvas = CanvasSize::from_pixels(source.width(), source.height());
        let params = spec.layout_params();

        let (placements, artwork) = match &spec.content {
            WatermarkContent::Text {
                text,
                color,
                font_family,
            } => {
                let (footprint, plan) = self.plan_text(text, color, font_family, spec, canvas);
                let placements: Vec<_> = compute_placements(&params, canvas, footprint).collect();
                let artwork = match plan {
                    Some(plan) => self.text_artwork(plan, &placements, canvas),
                    None => Artwork::Nothing,
                };
                (placements, artwork)
            }
            WatermarkContent::Image(image) => {
                let bitmap = match self.fetch_bitmap(image, mode) {
                    Ok(bitmap) => bitmap,
                    Err(outcome) => {
                        tracing::debug!(image = %source.name, ?outcome, "watermark skipped");
                        return outcome;
                    }
                };
                let (footprint, layer) = prepare_image(&bitmap, spec, canvas);
                let placements: Vec<_> = compute_placements(&params, canvas, footprint).collect();
                let artwork = layer.map_or(Artwork::Nothing, Artwork::Shared);
                (placements, artwork)
            }
        };

        surface.save();
        surface.set_global_alpha(spec.opacity as f32);
        for (index, placement) in placements.iter().enumerate() {
            let windowed;
            let layer = match &artwork {
                Artwork::Nothing => break,
                Artwork::Shared(layer) => layer,
                Artwork::PerPlacement { plan, windows } => {
                    if windows[index].is_empty() {
                        continue;
                    }
                    windowed = self.rasterize_text(plan, windows[index]);
                    &windowed
                }
            };
            surface.save();
            surface.translate(placement.anchor_x, placement.anchor_y);
            surface.rotate(placement.rotation_radians);
            surface.draw_layer(layer);
            surface.restore();
        }
        surface.restore();

        tracing::debug!(
            image = %source.name,
            position = %spec.position,
            placements = placements.len(),
            "rendered watermark"
        );
        RenderOutcome::Complete {
            placements: placements.len(),
        }
    }

    fn fetch_bitmap(
        &mut self,
        image: &WatermarkImage,
        mode: BitmapMode,
    ) -> Result<Arc<RgbaImage>, RenderOutcome> {
        match mode {
            BitmapMode::Deferred => match self.bitmaps.request(image) {
                BitmapRequest::Ready(bitmap) => Ok(bitmap),
                BitmapRequest::Pending => Err(RenderOutcome::AwaitingBitmap),
                BitmapRequest::Failed => Err(RenderOutcome::ContentUnavailable),
            },
            BitmapMode::Blocking => self
                .bitmaps
                .resolve_now(image)
                .ok_or(RenderOutcome::ContentUnavailable),
        }
    }

    fn plan_text<'a>(
        &self,
        text: &str,
        color: &str,
        family: &'a str,
        spec: &WatermarkSpec,
        canvas: CanvasSize,
    ) -> (Footprint, Option<TextPlan<'a>>) {
        let measure =
            |line: &str, size: f64| self.fonts.measure_line(family, size as f32, line) as f64;
        let font_size =
            resolve_text_size(text, spec.size_value, spec.size_unit, canvas.width, &measure);
        let block = measure_text_block(text, font_size, &measure);
        let footprint = block.footprint;
        if footprint.is_empty() {
            return (footprint, None);
        }

        let pad = (font_size * TEXT_PADDING_FACTOR).ceil();
        let plan = TextPlan {
            family,
            color: parse_color(color),
            pad,
            width: footprint.width.ceil() + pad * 2.0,
            height: footprint.height.ceil() + pad * 2.0,
            origin_x: pad + footprint.width / 2.0,
            origin_y: pad + footprint.height / 2.0,
            block,
        };
        (footprint, Some(plan))
    }

    /// Decide how much of the text layer to rasterize for `placements`.
    fn text_artwork<'a>(
        &self,
        plan: TextPlan<'a>,
        placements: &[PlacementTransform],
        canvas: CanvasSize,
    ) -> Artwork<'a> {
        let windows: Vec<ClipRect> = placements
            .iter()
            .map(|placement| plan.visible_window(placement, canvas))
            .collect();
        let Some(union) = windows
            .iter()
            .copied()
            .filter(|window| !window.is_empty())
            .reduce(ClipRect::union)
        else {
            return Artwork::Nothing;
        };

        if union.area() as f64 <= canvas.width * canvas.height * SHARED_LAYER_BUDGET {
            return Artwork::Shared(self.rasterize_text(&plan, union));
        }
        tracing::debug!(
            layer_width = plan.width,
            layer_height = plan.height,
            placements = placements.len(),
            "text layer exceeds canvas budget, rasterizing per placement"
        );
        Artwork::PerPlacement { plan, windows }
    }

    /// Rasterize the `window` part of the text layer.
    fn rasterize_text(&self, plan: &TextPlan<'_>, window: ClipRect) -> Layer {
        let [r, g, b, a] = plan.color;
        let (width, height) = (window.width(), window.height());
        let (dx, dy) = (window.x0 as f64, window.y0 as f64);
        let clip = ClipRect::sized(width, height);
        let reach = plan.block.line_height / 2.0 + plan.pad;

        let mut pixels = RgbaImage::from_pixel(width, height, Rgba([r, g, b, 0]));
        for (index, line) in plan.block.lines.iter().enumerate() {
            let middle = plan.origin_y + plan.block.line_center_y(index) - dy;
            if middle + reach < 0.0 || middle - reach > height as f64 {
                continue;
            }
            let left = plan.origin_x - plan.block.line_widths[index] / 2.0 - dx;
            self.fonts.rasterize_line(
                plan.family,
                plan.block.font_size as f32,
                line,
                left as f32,
                middle as f32,
                clip,
                &mut |x, y, coverage| {
                    if !clip.contains(x, y) {
                        return;
                    }
                    let value = (coverage.clamp(0.0, 1.0) * a as f32).round() as u8;
                    let pixel = pixels.get_pixel_mut(x as u32, y as u32);
                    pixel.0[3] = pixel.0[3].max(value);
                },
            );
        }

        Layer {
            pixels,
            origin_x: plan.origin_x - dx,
            origin_y: plan.origin_y - dy,
        }
    }
}

fn prepare_image(
    bitmap: &RgbaImage,
    spec: &WatermarkSpec,
    canvas: CanvasSize,
) -> (Footprint, Option<Layer>) {
    let resolved = resolve_image_size(spec.size_value, spec.size_unit, canvas.width);
    let footprint = image_footprint(resolved, bitmap.width(), bitmap.height());
    if footprint.is_empty() {
        return (footprint, None);
    }
    let width = (footprint.width.round() as u32).max(1);
    let height = (footprint.height.round() as u32).max(1);
    let pixels = if bitmap.dimensions() == (width, height) {
        bitmap.clone()
    } else {
        image::imageops::resize(bitmap, width, height, FilterType::Lanczos3)
    };
    let layer = Layer {
        pixels,
        origin_x: footprint.width / 2.0,
        origin_y: footprint.height / 2.0,
    };
    (footprint, Some(layer))
}

/// Parse a CSS color, falling back to opaque white.
pub fn parse_color(color: &str) -> [u8; 4] {
    match csscolorparser::parse(color) {
        Ok(parsed) => parsed.to_rgba8(),
        Err(err) => {
            tracing::warn!(color, "invalid watermark color, using white: {err}");
            [255, 255, 255, 255]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watermark::model::{Position, SizeUnit};
    use image::ImageFormat;
    use std::io::Cursor;

    /// Every glyph is a solid box `0.6 * size` wide and `size` tall.
    struct BoxGlyphs;

    impl TextRasterizer for BoxGlyphs {
        fn measure_line(&self, _family: &str, size: f32, text: &str) -> f32 {
            text.chars().count() as f32 * size * 0.6
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
            let width = self.measure_line(family, size, text);
            let top = (middle - size / 2.0).round() as i32;
            let (x0, x1) = (left.round() as i32, (left + width).round() as i32);
            for y in top.max(clip.y0)..(top + size.round() as i32).min(clip.y1) {
                for x in x0.max(clip.x0)..x1.min(clip.x1) {
                    plot(x, y, 1.0);
                }
            }
        }
    }

    fn text_spec(text: &str, position: Position, opacity: f64) -> WatermarkSpec {
        let (offset_x, offset_y) = position.default_offsets();
        WatermarkSpec {
            content: WatermarkContent::Text {
                text: text.into(),
                color: "#ff0000".into(),
                font_family: "Test".into(),
            },
            position,
            size_value: 20.0,
            size_unit: SizeUnit::Pixels,
            rotation_degrees: 0.0,
            opacity,
            offset_x,
            offset_y,
            spacing_x: 10.0,
            spacing_y: 10.0,
        }
    }

    fn gray_source(width: u32, height: u32) -> SourceImage {
        let pixels = RgbaImage::from_pixel(width, height, Rgba([40, 40, 40, 255]));
        SourceImage::from_pixels("base.jpg", pixels)
    }

    fn png_watermark() -> WatermarkImage {
        let img = RgbaImage::from_pixel(10, 5, Rgba([0, 0, 255, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        WatermarkImage::from_bytes(out.into_inner())
    }

    #[test]
    fn no_watermark_leaves_base_untouched() {
        let mut compositor = Compositor::new(BoxGlyphs);
        let source = gray_source(32, 32);
        assert_eq!(compositor.render(&source, None), RenderOutcome::BaseOnly);
        assert_eq!(compositor.surface(source.id).unwrap().image(), &source.pixels);
    }

    #[test]
    fn centered_text_paints_the_middle() {
        let mut compositor = Compositor::new(BoxGlyphs);
        let source = gray_source(100, 60);
        let outcome = compositor.render(&source, Some(&text_spec("AB", Position::Center, 1.0)));
        assert_eq!(outcome, RenderOutcome::Complete { placements: 1 });
        let surface = compositor.surface(source.id).unwrap();
        assert_eq!(surface.pixel(50, 30), [255, 0, 0, 255]);
        assert_eq!(surface.pixel(2, 2), [40, 40, 40, 255]);
        assert_eq!(surface.global_alpha(), 1.0);
    }

    #[test]
    fn zero_opacity_draws_nothing() {
        let mut compositor = Compositor::new(BoxGlyphs);
        let source = gray_source(64, 64);
        compositor.render(&source, Some(&text_spec("AB", Position::Center, 0.0)));
        assert_eq!(compositor.surface(source.id).unwrap().image(), &source.pixels);
    }

    #[test]
    fn empty_text_completes_without_painting() {
        let mut compositor = Compositor::new(BoxGlyphs);
        let source = gray_source(64, 64);
        let outcome = compositor.render(&source, Some(&text_spec("", Position::TopLeft, 1.0)));
        assert_eq!(outcome, RenderOutcome::Complete { placements: 1 });
        assert_eq!(compositor.surface(source.id).unwrap().image(), &source.pixels);
    }

    #[test]
    fn surfaces_are_reused_between_passes() {
        let mut compositor = Compositor::new(BoxGlyphs);
        let source = gray_source(64, 64);
        let spec = text_spec("AB", Position::FullScreen, 0.5);
        compositor.render(&source, Some(&spec));
        compositor.render(&source, Some(&spec));
        assert_eq!(compositor.surface(source.id).unwrap().allocation_count(), 1);
        compositor.release(source.id);
        assert!(compositor.surface(source.id).is_none());
    }

    #[test]
    fn image_watermark_waits_for_decode_in_deferred_mode() {
        let mut compositor = Compositor::new(BoxGlyphs);
        let source = gray_source(100, 100);
        let mut spec = text_spec("", Position::Center, 1.0);
        spec.content = WatermarkContent::Image(png_watermark());
        spec.size_unit = SizeUnit::Percent;
        spec.size_value = 20.0;

        assert_eq!(compositor.render(&source, Some(&spec)), RenderOutcome::AwaitingBitmap);
        assert_eq!(compositor.surface(source.id).unwrap().image(), &source.pixels);

        assert_eq!(compositor.pump_bitmaps(), 1);
        assert_eq!(
            compositor.render(&source, Some(&spec)),
            RenderOutcome::Complete { placements: 1 }
        );
        let surface = compositor.surface(source.id).unwrap();
        assert_eq!(surface.pixel(50, 50), [0, 0, 255, 255]);
        assert_eq!(surface.pixel(50, 40), [40, 40, 40, 255]);
    }

    #[test]
    fn blocking_mode_reports_undecodable_bitmaps() {
        let mut compositor = Compositor::new(BoxGlyphs);
        let source = gray_source(16, 16);
        let mut spec = text_spec("", Position::Center, 1.0);
        spec.content = WatermarkContent::Image(WatermarkImage::from_bytes(vec![9u8; 12]));
        let mut surface = RenderSurface::new();
        let outcome =
            compositor.render_into(&mut surface, &source, Some(&spec), BitmapMode::Blocking);
        assert_eq!(outcome, RenderOutcome::ContentUnavailable);
        assert_eq!(surface.image(), &source.pixels);
    }

    #[test]
    fn text_layer_is_cut_to_the_visible_window() {
        let compositor = Compositor::new(BoxGlyphs);
        let canvas = CanvasSize::from_pixels(100, 60);
        let text = "M".repeat(20);
        let mut spec = text_spec(&text, Position::Center, 1.0);
        spec.size_value = 200.0;
        let (footprint, plan) = compositor.plan_text(&text, "red", "Test", &spec, canvas);
        let plan = plan.unwrap();
        let placements: Vec<_> =
            compute_placements(&spec.layout_params(), canvas, footprint).collect();
        let Artwork::Shared(layer) = compositor.text_artwork(plan, &placements, canvas) else {
            panic!("expected one shared layer");
        };
        assert!(layer.pixels.width() <= 100 + 2 * WINDOW_MARGIN as u32);
        assert!(layer.pixels.height() <= 60 + 2 * WINDOW_MARGIN as u32);
    }

    #[test]
    fn oversized_tiles_rasterize_per_placement() {
        let mut compositor = Compositor::new(BoxGlyphs);
        let source = gray_source(150, 150);
        let text = "AAAAA\nAAAAA\nAAAAA";
        let mut spec = text_spec(text, Position::FullScreen, 1.0);
        spec.size_value = 100.0;

        let canvas = CanvasSize::from_pixels(150, 150);
        let (footprint, plan) = compositor.plan_text(text, "#ff0000", "Test", &spec, canvas);
        let plan = plan.unwrap();
        let full = plan.bounds().area();
        let placements: Vec<_> =
            compute_placements(&spec.layout_params(), canvas, footprint).collect();
        let Artwork::PerPlacement { plan, windows } =
            compositor.text_artwork(plan, &placements, canvas)
        else {
            panic!("expected per-placement artwork");
        };
        let visible: Vec<_> = windows.iter().filter(|window| !window.is_empty()).collect();
        assert!(!visible.is_empty());
        for window in &visible {
            assert!(window.area() < full);
            assert!(compositor.rasterize_text(&plan, **window).pixels.width() <= 154);
        }

        let outcome = compositor.render(&source, Some(&spec));
        assert!(matches!(outcome, RenderOutcome::Complete { .. }));
        let surface = compositor.surface(source.id).unwrap();
        assert_eq!(surface.pixel(75, 75), [255, 0, 0, 255]);
        assert_eq!(surface.pixel(148, 60), [40, 40, 40, 255]);
        assert_eq!(surface.pixel(75, 5), [40, 40, 40, 255]);
    }

    #[test]
    fn invalid_colors_fall_back_to_white() {
        assert_eq!(parse_color("not-a-color"), [255, 255, 255, 255]);
        assert_eq!(parse_color("#00800080"), [0, 128, 0, 128]);
    }
}
