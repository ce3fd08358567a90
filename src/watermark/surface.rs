//! Reusable RGBA drawing target with a small canvas-like state stack.

use image::{Rgba, RgbaImage};

/// 2D affine transform mapping `(x, y)` to `(a*x + c*y + e, b*x + d*y + f)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    /// `self` applied after `other`.
    pub fn then(&self, other: &Affine) -> Affine {
        Affine {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    pub fn translation(x: f64, y: f64) -> Self {
        Self {
            e: x,
            f: y,
            ..Self::IDENTITY
        }
    }

    pub fn rotation(radians: f64) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    pub fn invert(&self) -> Option<Affine> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < f64::EPSILON || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        Some(Affine {
            a: self.d * inv,
            b: -self.b * inv,
            c: -self.c * inv,
            d: self.a * inv,
            e: (self.c * self.f - self.d * self.e) * inv,
            f: (self.b * self.e - self.a * self.f) * inv,
        })
    }
}

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DrawState {
    transform: Affine,
    global_alpha: f32,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            transform: Affine::IDENTITY,
            global_alpha: 1.0,
        }
    }
}

/// Pre-rendered watermark content. `(origin_x, origin_y)` is the point in
/// layer pixels that lands on the current transform origin.
#[derive(Debug, Clone)]
pub struct Layer {
    pub pixels: RgbaImage,
    pub origin_x: f64,
    pub origin_y: f64,
}

impl Layer {
    pub fn centered(pixels: RgbaImage) -> Self {
        let origin_x = pixels.width() as f64 / 2.0;
        let origin_y = pixels.height() as f64 / 2.0;
        Self {
            pixels,
            origin_x,
            origin_y,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.width() == 0 || self.pixels.height() == 0
    }
}

/// Drawing target reused across render passes of the same image.
#[derive(Debug, Default)]
pub struct RenderSurface {
    pixels: RgbaImage,
    state: DrawState,
    stack: Vec<DrawState>,
    allocation_count: usize,
}

impl RenderSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resize the backing store if needed. Returns `true` when it was
    /// reallocated.
    pub fn ensure_size(&mut self, width: u32, height: u32) -> bool {
        let resized = self.pixels.dimensions() != (width, height);
        if resized {
            self.pixels = RgbaImage::new(width, height);
            self.allocation_count += 1;
        }
        resized
    }

    /// Number of backing store allocations so far.
    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels.get_pixel(x, y).0
    }

    /// Size the surface to `base`, copy it in, and reset drawing state.
    pub fn paint_base(&mut self, base: &RgbaImage) {
        self.ensure_size(base.width(), base.height());
        self.pixels.copy_from_slice(base.as_raw());
        self.state = DrawState::default();
        self.stack.clear();
    }

    pub fn save(&mut self) {
        self.stack.push(self.state);
    }

    pub fn restore(&mut self) {
        if let Some(state) = self.stack.pop() {
            self.state = state;
        }
    }

    pub fn translate(&mut self, x: f64, y: f64) {
        self.state.transform = self.state.transform.then(&Affine::translation(x, y));
    }

    pub fn rotate(&mut self, radians: f64) {
        self.state.transform = self.state.transform.then(&Affine::rotation(radians));
    }

    pub fn set_global_alpha(&mut self, alpha: f32) {
        self.state.global_alpha = if alpha.is_finite() {
            alpha.clamp(0.0, 1.0)
        } else {
            1.0
        };
    }

    pub fn global_alpha(&self) -> f32 {
        self.state.global_alpha
    }

    pub fn transform(&self) -> Affine {
        self.state.transform
    }

    /// Composite `layer` source-over under the current transform and global
    /// alpha. Destination pixels are inverse-mapped and sampled bilinearly.
    pub fn draw_layer(&mut self, layer: &Layer) {
        if layer.is_empty() || self.pixels.width() == 0 || self.pixels.height() == 0 {
            return;
        }
        let alpha = self.state.global_alpha;
        if alpha <= 0.0 {
            return;
        }
        let to_surface = self
            .state
            .transform
            .then(&Affine::translation(-layer.origin_x, -layer.origin_y));
        let Some(to_layer) = to_surface.invert() else {
            return;
        };

        let lw = layer.pixels.width() as f64;
        let lh = layer.pixels.height() as f64;
        let corners = [
            to_surface.apply(0.0, 0.0),
            to_surface.apply(lw, 0.0),
            to_surface.apply(0.0, lh),
            to_surface.apply(lw, lh),
        ];
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        let width = self.pixels.width() as f64;
        let height = self.pixels.height() as f64;
        if max_x <= 0.0 || max_y <= 0.0 || min_x >= width || min_y >= height {
            return;
        }
        let x0 = min_x.floor().max(0.0) as u32;
        let y0 = min_y.floor().max(0.0) as u32;
        let x1 = max_x.ceil().min(width) as u32;
        let y1 = max_y.ceil().min(height) as u32;

        for y in y0..y1 {
            for x in x0..x1 {
                let (sx, sy) = to_layer.apply(x as f64 + 0.5, y as f64 + 0.5);
                let Some(src) = sample_bilinear(&layer.pixels, sx - 0.5, sy - 0.5) else {
                    continue;
                };
                let dst = self.pixels.get_pixel_mut(x, y);
                dst.0 = blend_pixel(dst.0, src, alpha);
            }
        }
    }
}

/// Premultiplied bilinear sample at continuous pixel-center coordinates,
/// returned as straight RGBA. `None` when fully outside or transparent.
fn sample_bilinear(image: &RgbaImage, x: f64, y: f64) -> Option<[f32; 4]> {
    let w = image.width() as i64;
    let h = image.height() as i64;
    if x <= -1.0 || y <= -1.0 || x >= w as f64 || y >= h as f64 {
        return None;
    }
    let fx = x.floor();
    let fy = y.floor();
    let tx = (x - fx) as f32;
    let ty = (y - fy) as f32;
    let ix = fx as i64;
    let iy = fy as i64;

    let mut acc = [0f32; 4];
    let taps = [
        (ix, iy, (1.0 - tx) * (1.0 - ty)),
        (ix + 1, iy, tx * (1.0 - ty)),
        (ix, iy + 1, (1.0 - tx) * ty),
        (ix + 1, iy + 1, tx * ty),
    ];
    for (px, py, weight) in taps {
        if weight <= 0.0 || px < 0 || py < 0 || px >= w || py >= h {
            continue;
        }
        let Rgba([r, g, b, a]) = *image.get_pixel(px as u32, py as u32);
        let a = a as f32 / 255.0 * weight;
        acc[0] += r as f32 * a;
        acc[1] += g as f32 * a;
        acc[2] += b as f32 * a;
        acc[3] += a;
    }
    // Quantize to 8-bit steps like any intermediate RGBA8 layer.
    let alpha = (acc[3] * 255.0).round() / 255.0;
    if alpha <= 0.0 {
        return None;
    }
    Some([
        (acc[0] / acc[3]).round(),
        (acc[1] / acc[3]).round(),
        (acc[2] / acc[3]).round(),
        alpha,
    ])
}

/// Straight-alpha source-over. `src` carries 0-255 color and 0-1 alpha.
fn blend_pixel(dst: [u8; 4], src: [f32; 4], opacity: f32) -> [u8; 4] {
    let sa = (src[3] * opacity).clamp(0.0, 1.0);
    if sa <= 0.0 {
        return dst;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return [0, 0, 0, 0];
    }
    let channel = |s: f32, d: u8| -> u8 {
        let value = (s * sa + d as f32 * da * (1.0 - sa)) / out_a;
        value.round().clamp(0.0, 255.0) as u8
    };
    [
        channel(src[0], dst[0]),
        channel(src[1], dst[1]),
        channel(src[2], dst[2]),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(color))
    }

    #[test]
    fn ensure_size_skips_reallocation_for_same_size() {
        let mut surface = RenderSurface::new();
        assert!(surface.ensure_size(8, 6));
        assert!(!surface.ensure_size(8, 6));
        assert_eq!(surface.allocation_count(), 1);
        assert!(surface.ensure_size(4, 4));
        assert_eq!(surface.allocation_count(), 2);
    }

    #[test]
    fn paint_base_resets_state() {
        let mut surface = RenderSurface::new();
        surface.paint_base(&solid(4, 4, [10, 20, 30, 255]));
        surface.save();
        surface.translate(3.0, 1.0);
        surface.set_global_alpha(0.2);
        surface.paint_base(&solid(4, 4, [10, 20, 30, 255]));
        assert_eq!(surface.transform(), Affine::IDENTITY);
        assert_eq!(surface.global_alpha(), 1.0);
        assert_eq!(surface.pixel(2, 2), [10, 20, 30, 255]);
    }

    #[test]
    fn restore_returns_to_saved_state() {
        let mut surface = RenderSurface::new();
        surface.save();
        surface.translate(5.0, 5.0);
        surface.rotate(1.0);
        surface.set_global_alpha(0.5);
        surface.restore();
        assert_eq!(surface.transform(), Affine::IDENTITY);
        assert_eq!(surface.global_alpha(), 1.0);
        surface.restore();
        assert_eq!(surface.transform(), Affine::IDENTITY);
    }

    #[test]
    fn affine_inverse_round_trips() {
        let transform = Affine::translation(12.0, -4.0).then(&Affine::rotation(0.7));
        let inverse = transform.invert().unwrap();
        let (x, y) = transform.apply(3.0, 9.0);
        let (bx, by) = inverse.apply(x, y);
        assert!((bx - 3.0).abs() < 1e-9 && (by - 9.0).abs() < 1e-9);
    }

    #[test]
    fn blend_honours_opacity() {
        assert_eq!(
            blend_pixel([0, 0, 0, 255], [255.0, 255.0, 255.0, 1.0], 0.5),
            [128, 128, 128, 255]
        );
        assert_eq!(blend_pixel([9, 9, 9, 255], [255.0, 0.0, 0.0, 1.0], 0.0), [9, 9, 9, 255]);
        assert_eq!(blend_pixel([0, 0, 0, 0], [40.0, 50.0, 60.0, 1.0], 1.0), [40, 50, 60, 255]);
    }

    #[test]
    fn layer_is_stamped_centered_on_transform_origin() {
        let mut surface = RenderSurface::new();
        surface.paint_base(&solid(20, 20, [0, 0, 0, 255]));
        surface.save();
        surface.translate(10.0, 10.0);
        surface.draw_layer(&Layer::centered(solid(4, 4, [255, 0, 0, 255])));
        surface.restore();

        assert_eq!(surface.pixel(10, 10), [255, 0, 0, 255]);
        assert_eq!(surface.pixel(8, 8), [255, 0, 0, 255]);
        assert_eq!(surface.pixel(2, 2), [0, 0, 0, 255]);
        assert_eq!(surface.pixel(15, 10), [0, 0, 0, 255]);
    }

    #[test]
    fn rotated_layer_covers_rotated_area() {
        let mut surface = RenderSurface::new();
        surface.paint_base(&solid(40, 40, [0, 0, 0, 255]));
        surface.translate(20.0, 20.0);
        surface.rotate(90f64.to_radians());
        surface.draw_layer(&Layer::centered(solid(20, 4, [0, 255, 0, 255])));

        assert_eq!(surface.pixel(20, 12), [0, 255, 0, 255]);
        assert_eq!(surface.pixel(20, 27), [0, 255, 0, 255]);
        assert_eq!(surface.pixel(28, 20), [0, 0, 0, 255]);
    }

    #[test]
    fn layer_outside_surface_is_ignored() {
        let mut surface = RenderSurface::new();
        let base = solid(10, 10, [1, 2, 3, 255]);
        surface.paint_base(&base);
        surface.translate(-50.0, -50.0);
        surface.draw_layer(&Layer::centered(solid(4, 4, [255, 255, 255, 255])));
        assert_eq!(surface.image(), &base);
    }
}
