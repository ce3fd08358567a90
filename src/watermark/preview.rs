//! Interactive preview scheduling.
//!
//! The session owns the latest watermark settings and decides when the
//! compositor repaints: text edits paint immediately, slider style changes
//! are coalesced onto the next animation frame, image watermark parameters
//! also wait out a short debounce, and container resizes only refit the
//! display size.

use std::time::{Duration, Instant};

use crate::settings::AppSettings;
use crate::watermark::compositor::{Compositor, RenderOutcome};
use crate::watermark::editor::{apply_change, SettingChange};
use crate::watermark::fonts::{FontBook, TextRasterizer};
use crate::watermark::model::{SizeUnit, WatermarkKind, WatermarkSettings, WatermarkSpec};
use crate::watermark::source::SourceImage;
use crate::watermark::surface::RenderSurface;

pub const IMAGE_PARAM_DEBOUNCE: Duration = Duration::from_millis(40);
pub const RESIZE_DEBOUNCE: Duration = Duration::from_millis(150);

const CONTAINER_PADDING: f64 = 40.0;
const MIN_CONTAINER_EXTENT: f64 = 200.0;
const MIN_DISPLAY_EXTENT: f64 = 100.0;

/// On-screen size of the preview. The pixel buffer keeps native size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplaySize {
    pub width: f64,
    pub height: f64,
    pub scale: f64,
}

/// Fit an image into a preview container without upscaling.
pub fn fit_display_size(
    image_width: u32,
    image_height: u32,
    container_width: f64,
    container_height: f64,
) -> DisplaySize {
    let available_w = (container_width - CONTAINER_PADDING).max(MIN_CONTAINER_EXTENT);
    let available_h = (container_height - CONTAINER_PADDING).max(MIN_CONTAINER_EXTENT);
    let w = image_width.max(1) as f64;
    let h = image_height.max(1) as f64;
    let scale = (available_w / w).min(available_h / h).min(1.0);
    DisplaySize {
        width: (w * scale).max(MIN_DISPLAY_EXTENT),
        height: (h * scale).max(MIN_DISPLAY_EXTENT),
        scale,
    }
}

pub struct PreviewSession<R: TextRasterizer = FontBook> {
    compositor: Compositor<R>,
    source: Option<SourceImage>,
    settings: WatermarkSettings,
    size_unit: SizeUnit,
    frame_requested: bool,
    debounce_deadline: Option<Instant>,
    pending_resize: Option<(Instant, f64, f64)>,
    container: Option<(f64, f64)>,
    display_size: Option<DisplaySize>,
    last_outcome: Option<RenderOutcome>,
    render_count: usize,
}

impl<R: TextRasterizer> PreviewSession<R> {
    pub fn new(compositor: Compositor<R>, app: &AppSettings) -> Self {
        Self {
            compositor,
            source: None,
            settings: WatermarkSettings::from_defaults(app),
            size_unit: app.font_size_unit,
            frame_requested: false,
            debounce_deadline: None,
            pending_resize: None,
            container: None,
            display_size: None,
            last_outcome: None,
            render_count: 0,
        }
    }

    /// Show `source` with `settings`, painting immediately.
    pub fn show(&mut self, source: SourceImage, settings: WatermarkSettings) {
        if let Some(previous) = self.source.take() {
            if previous.id != source.id {
                self.compositor.release(previous.id);
            }
        }
        self.settings = settings;
        self.source = Some(source);
        self.compositor.retry_failed_bitmaps();
        self.refit_display();
        self.render_now();
    }

    pub fn set_size_unit(&mut self, unit: SizeUnit) {
        if self.size_unit != unit {
            self.size_unit = unit;
            self.frame_requested = true;
        }
    }

    /// Latest settings, already including changes not yet painted.
    pub fn settings(&self) -> &WatermarkSettings {
        &self.settings
    }

    pub fn spec(&self) -> Option<WatermarkSpec> {
        self.settings.to_spec(self.size_unit)
    }

    /// Store `change` and schedule the repaint it needs.
    pub fn update(&mut self, change: SettingChange, now: Instant) {
        let text_edit = change.is_text_edit();
        let debounced = self.settings.kind == WatermarkKind::Image && change.is_layout_param();
        apply_change(&mut self.settings, change);
        self.compositor.retry_failed_bitmaps();

        if text_edit {
            self.render_now();
        } else if debounced {
            self.debounce_deadline = Some(now + IMAGE_PARAM_DEBOUNCE);
        } else {
            self.frame_requested = true;
        }
    }

    /// Paint if a frame was requested or a debounce expired. Returns whether
    /// a render pass ran.
    pub fn on_animation_frame(&mut self, now: Instant) -> bool {
        if let Some(deadline) = self.debounce_deadline {
            if now >= deadline {
                self.debounce_deadline = None;
                self.frame_requested = true;
            }
        }
        if !self.frame_requested {
            return false;
        }
        self.render_now();
        true
    }

    /// Finish queued bitmap decodes and repaint once if the last frame was
    /// waiting on one. Returns whether a render pass ran.
    ///
    /// A failed decode settles the frame as `ContentUnavailable`; it is not
    /// attempted again until the settings change.
    pub fn pump_loads(&mut self) -> bool {
        let settled = self.compositor.pump_bitmaps();
        if settled == 0 || self.last_outcome != Some(RenderOutcome::AwaitingBitmap) {
            return false;
        }
        tracing::debug!(settled, "bitmap load finished, repainting preview");
        self.render_now();
        true
    }

    pub fn on_container_resize(&mut self, width: f64, height: f64, now: Instant) {
        self.pending_resize = Some((now + RESIZE_DEBOUNCE, width, height));
    }

    /// Apply a debounced container resize. Returns whether the display size
    /// was recomputed.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.pending_resize {
            Some((deadline, width, height)) if now >= deadline => {
                self.pending_resize = None;
                self.container = Some((width, height));
                self.refit_display();
                true
            }
            _ => false,
        }
    }

    pub fn display_size(&self) -> Option<DisplaySize> {
        self.display_size
    }

    pub fn surface(&self) -> Option<&RenderSurface> {
        let source = self.source.as_ref()?;
        self.compositor.surface(source.id)
    }

    pub fn last_outcome(&self) -> Option<RenderOutcome> {
        self.last_outcome
    }

    pub fn render_count(&self) -> usize {
        self.render_count
    }

    pub fn has_pending_frame(&self) -> bool {
        self.frame_requested || self.debounce_deadline.is_some()
    }

    pub fn compositor(&self) -> &Compositor<R> {
        &self.compositor
    }

    fn refit_display(&mut self) {
        if let (Some(source), Some((width, height))) = (self.source.as_ref(), self.container) {
            self.display_size = Some(fit_display_size(
                source.width(),
                source.height(),
                width,
                height,
            ));
        }
    }

    fn render_now(&mut self) {
        self.frame_requested = false;
        let Some(source) = self.source.as_ref() else {
            return;
        };
        let spec = self.settings.to_spec(self.size_unit);
        let outcome = self.compositor.render(source, spec.as_ref());
        self.last_outcome = Some(outcome);
        self.render_count += 1;
    }
}
