use image::{Rgba, RgbaImage};
use std::time::{Duration, Instant};
use watermark_studio::settings::AppSettings;
use watermark_studio::watermark::compositor::{Compositor, RenderOutcome};
use watermark_studio::watermark::editor::SettingChange;
use watermark_studio::watermark::model::{Position, WatermarkImage, WatermarkSettings};
use watermark_studio::watermark::preview::{PreviewSession, IMAGE_PARAM_DEBOUNCE, RESIZE_DEBOUNCE};


use block_glyphs::{encode_png, solid_source, BlockGlyphs};

fn session() -> PreviewSession<BlockGlyphs> {
    PreviewSession::new(Compositor::new(BlockGlyphs), &AppSettings::default())
}

fn image_settings() -> WatermarkSettings {
    let mark = RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 255]));
    image_settings_from(encode_png(&mark))
}

fn image_settings_from(bytes: Vec<u8>) -> WatermarkSettings {
    let mut settings = WatermarkSettings {
        opacity: 1.0,
        ..WatermarkSettings::default()
    };
    watermark_studio::watermark::editor::apply_change(
        &mut settings,
        SettingChange::Image {
            name: "logo.png".into(),
            image: WatermarkImage::from_bytes(bytes),
            width: 8,
            height: 8,
        },
    );
    settings
}

#[test]
fn showing_an_image_paints_immediately() {
    let mut preview = session();
    preview.show(solid_source("a.jpg", 120, 80, [0, 0, 0, 255]), WatermarkSettings::default());
    assert_eq!(preview.render_count(), 1);
    assert!(preview.surface().is_some());
    assert!(matches!(preview.last_outcome(), Some(RenderOutcome::Complete { .. })));
}

#[test]
fn text_edits_render_synchronously() {
    let mut preview = session();
    let now = Instant::now();
    preview.show(solid_source("a.jpg", 120, 80, [0, 0, 0, 255]), WatermarkSettings::default());

    preview.update(SettingChange::Text("D".into()), now);
    assert_eq!(preview.render_count(), 2);
    preview.update(SettingChange::Text("DR".into()), now);
    assert_eq!(preview.render_count(), 3);
    assert!(!preview.has_pending_frame());
}

#[test]
fn slider_changes_coalesce_into_one_frame() {
    let mut preview = session();
    let now = Instant::now();
    preview.show(solid_source("a.jpg", 120, 80, [0, 0, 0, 255]), WatermarkSettings::default());

    preview.update(SettingChange::Size(20.0), now);
    preview.update(SettingChange::Rotation(15.0), now);
    preview.update(SettingChange::Opacity(0.4), now);
    assert_eq!(preview.render_count(), 1);
    assert!(preview.has_pending_frame());

    let spec = preview.spec().expect("text spec");
    assert_eq!(spec.size_value, 20.0);
    assert_eq!(spec.rotation_degrees, 15.0);
    assert_eq!(spec.opacity, 0.4);

    assert!(preview.on_animation_frame(now));
    assert_eq!(preview.render_count(), 2);
    assert!(!preview.on_animation_frame(now));
    assert_eq!(preview.render_count(), 2);
}

#[test]
fn choosing_full_screen_tilts_the_watermark() {
    let mut preview = session();
    let now = Instant::now();
    preview.show(solid_source("a.jpg", 120, 80, [0, 0, 0, 255]), WatermarkSettings::default());
    preview.update(SettingChange::Position(Position::FullScreen), now);
    assert_eq!(preview.settings().rotation, -30.0);
    assert!(preview.on_animation_frame(now));
    let outcome = preview.last_outcome().expect("rendered");
    assert!(matches!(outcome, RenderOutcome::Complete { placements } if placements > 1));
}

#[test]
fn image_watermark_repaints_once_the_bitmap_loads() {
    let mut preview = session();
    preview.show(solid_source("a.png", 100, 100, [0, 0, 0, 255]), image_settings());
    assert_eq!(preview.last_outcome(), Some(RenderOutcome::AwaitingBitmap));
    assert_eq!(preview.surface().unwrap().pixel(50, 50), [0, 0, 0, 255]);

    assert!(preview.pump_loads());
    assert_eq!(preview.render_count(), 2);
    assert_eq!(preview.last_outcome(), Some(RenderOutcome::Complete { placements: 1 }));
    assert_eq!(preview.surface().unwrap().pixel(50, 50), [255, 0, 0, 255]);

    assert!(!preview.pump_loads());
}

#[test]
fn undecodable_watermark_settles_until_settings_change() {
    let mut preview = session();
    let now = Instant::now();
    preview.show(
        solid_source("a.png", 60, 60, [0, 0, 0, 255]),
        image_settings_from(vec![9u8; 12]),
    );
    assert_eq!(preview.last_outcome(), Some(RenderOutcome::AwaitingBitmap));

    assert!(preview.pump_loads());
    assert_eq!(preview.render_count(), 2);
    assert_eq!(preview.last_outcome(), Some(RenderOutcome::ContentUnavailable));
    assert_eq!(preview.surface().unwrap().pixel(30, 30), [0, 0, 0, 255]);

    for _ in 0..5 {
        assert!(!preview.pump_loads());
    }
    assert_eq!(preview.render_count(), 2);
    assert!(!preview.compositor().bitmaps().has_pending());

    // A settings change gives the bitmap another attempt.
    preview.update(SettingChange::Opacity(0.5), now);
    assert!(preview.on_animation_frame(now + IMAGE_PARAM_DEBOUNCE));
    assert_eq!(preview.last_outcome(), Some(RenderOutcome::AwaitingBitmap));
    assert!(preview.compositor().bitmaps().has_pending());
    assert!(preview.pump_loads());
    assert_eq!(preview.last_outcome(), Some(RenderOutcome::ContentUnavailable));
    assert_eq!(preview.render_count(), 4);
}

#[test]
fn image_parameters_wait_for_the_debounce() {
    let mut preview = session();
    let start = Instant::now();
    preview.show(solid_source("a.png", 100, 100, [0, 0, 0, 255]), image_settings());
    preview.pump_loads();
    let rendered = preview.render_count();

    preview.update(SettingChange::Size(30.0), start);
    assert!(!preview.on_animation_frame(start + Duration::from_millis(10)));
    assert_eq!(preview.render_count(), rendered);

    preview.update(SettingChange::Size(35.0), start + Duration::from_millis(20));
    assert!(!preview.on_animation_frame(start + Duration::from_millis(45)));
    assert!(preview.on_animation_frame(start + Duration::from_millis(20) + IMAGE_PARAM_DEBOUNCE));
    assert_eq!(preview.render_count(), rendered + 1);
}

#[test]
fn container_resize_only_refits_the_display() {
    let mut preview = session();
    let start = Instant::now();
    preview.show(solid_source("a.jpg", 2000, 1000, [0, 0, 0, 255]), WatermarkSettings::default());
    let allocations = preview.surface().unwrap().allocation_count();

    preview.on_container_resize(800.0, 600.0, start);
    assert!(!preview.tick(start + Duration::from_millis(100)));
    preview.on_container_resize(1040.0, 840.0, start + Duration::from_millis(100));
    assert!(!preview.tick(start + Duration::from_millis(200)));
    assert!(preview.tick(start + Duration::from_millis(100) + RESIZE_DEBOUNCE));

    let display = preview.display_size().expect("display size");
    assert_eq!(display.scale, 0.5);
    assert_eq!((display.width, display.height), (1000.0, 500.0));
    assert_eq!(preview.render_count(), 1);
    assert_eq!(preview.surface().unwrap().width(), 2000);
    assert_eq!(preview.surface().unwrap().allocation_count(), allocations);
}
