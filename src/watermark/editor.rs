//! Rules for mutating watermark settings from user input.

use crate::settings::AppSettings;
use crate::watermark::model::{Position, WatermarkImage, WatermarkKind, WatermarkSettings};

/// Rotation applied when switching into full-screen tiling.
pub const FULL_SCREEN_ROTATION: f64 = -30.0;

#[derive(Debug, Clone, PartialEq)]
pub enum SettingChange {
    Text(String),
    Position(Position),
    Size(f64),
    Rotation(f64),
    Opacity(f64),
    Color(String),
    FontFamily(String),
    OffsetX(f64),
    OffsetY(f64),
    SpacingX(f64),
    SpacingY(f64),
    Kind(WatermarkKind),
    Image {
        name: String,
        image: WatermarkImage,
        width: u32,
        height: u32,
    },
    ClearImage,
}

impl SettingChange {
    /// Typing in the text box. These render synchronously.
    pub fn is_text_edit(&self) -> bool {
        matches!(self, SettingChange::Text(_))
    }

    /// Slider style parameters that shape how a watermark is laid out.
    pub fn is_layout_param(&self) -> bool {
        matches!(
            self,
            SettingChange::Position(_)
                | SettingChange::Size(_)
                | SettingChange::Rotation(_)
                | SettingChange::Opacity(_)
                | SettingChange::OffsetX(_)
                | SettingChange::OffsetY(_)
                | SettingChange::SpacingX(_)
                | SettingChange::SpacingY(_)
        )
    }
}

/// Apply `change` to `settings`.
///
/// Picking a named position resets both offsets to what the anchor stands for.
/// Switching into full-screen sets the rotation to -30 degrees and keeps the
/// offsets; picking full-screen again changes nothing.
pub fn apply_change(settings: &mut WatermarkSettings, change: SettingChange) {
    match change {
        SettingChange::Text(text) => settings.text = text,
        SettingChange::Position(Position::FullScreen) => {
            if !settings.position.is_full_screen() {
                settings.position = Position::FullScreen;
                settings.rotation = FULL_SCREEN_ROTATION;
            }
        }
        SettingChange::Position(position) => {
            let (offset_x, offset_y) = position.default_offsets();
            settings.position = position;
            settings.offset_x = offset_x;
            settings.offset_y = offset_y;
        }
        SettingChange::Size(size) => settings.size = size,
        SettingChange::Rotation(rotation) => settings.rotation = rotation,
        SettingChange::Opacity(opacity) => settings.opacity = opacity,
        SettingChange::Color(color) => settings.color = color,
        SettingChange::FontFamily(family) => settings.font_family = family,
        SettingChange::OffsetX(value) => settings.offset_x = value,
        SettingChange::OffsetY(value) => settings.offset_y = value,
        SettingChange::SpacingX(value) => settings.spacing_x = value,
        SettingChange::SpacingY(value) => settings.spacing_y = value,
        SettingChange::Kind(kind) => settings.kind = kind,
        SettingChange::Image {
            name,
            image,
            width,
            height,
        } => {
            settings.kind = WatermarkKind::Image;
            settings.image_data = Some(image);
            settings.image_name = Some(name);
            settings.image_width = Some(width);
            settings.image_height = Some(height);
        }
        SettingChange::ClearImage => {
            settings.image_data = None;
            settings.image_name = None;
            settings.image_width = None;
            settings.image_height = None;
        }
    }
}

/// Numeric controls that accept typed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericField {
    Size,
    Rotation,
    Opacity,
    OffsetX,
    OffsetY,
    SpacingX,
    SpacingY,
}

impl NumericField {
    /// Inclusive bounds of this control.
    pub fn bounds(self, app: &AppSettings) -> (f64, f64) {
        match self {
            NumericField::Size => (app.min_size, app.max_size),
            NumericField::Rotation => (-180.0, 180.0),
            NumericField::Opacity => (app.min_opacity, app.max_opacity),
            NumericField::OffsetX | NumericField::OffsetY => (-100.0, 100.0),
            NumericField::SpacingX | NumericField::SpacingY => (1.0, 200.0),
        }
    }

    pub fn get(self, settings: &WatermarkSettings) -> f64 {
        match self {
            NumericField::Size => settings.size,
            NumericField::Rotation => settings.rotation,
            NumericField::Opacity => settings.opacity,
            NumericField::OffsetX => settings.offset_x,
            NumericField::OffsetY => settings.offset_y,
            NumericField::SpacingX => settings.spacing_x,
            NumericField::SpacingY => settings.spacing_y,
        }
    }

    pub fn change(self, value: f64) -> SettingChange {
        match self {
            NumericField::Size => SettingChange::Size(value),
            NumericField::Rotation => SettingChange::Rotation(value),
            NumericField::Opacity => SettingChange::Opacity(value),
            NumericField::OffsetX => SettingChange::OffsetX(value),
            NumericField::OffsetY => SettingChange::OffsetY(value),
            NumericField::SpacingX => SettingChange::SpacingX(value),
            NumericField::SpacingY => SettingChange::SpacingY(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericInput {
    Accepted(f64),
    /// Out of range; the nearest bound was used.
    Clamped(f64),
    /// Not a number; the previous value was kept.
    Reverted(f64),
}

impl NumericInput {
    pub fn value(self) -> f64 {
        match self {
            NumericInput::Accepted(v) | NumericInput::Clamped(v) | NumericInput::Reverted(v) => v,
        }
    }
}

/// Interpret typed text for `field`. Never fails: garbage reverts, out of
/// range values clamp.
pub fn parse_numeric_input(
    raw: &str,
    previous: f64,
    field: NumericField,
    app: &AppSettings,
) -> NumericInput {
    let parsed = match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => return NumericInput::Reverted(previous),
    };
    let (min, max) = field.bounds(app);
    let clamped = parsed.max(min).min(max);
    if clamped == parsed {
        NumericInput::Accepted(parsed)
    } else {
        NumericInput::Clamped(clamped)
    }
}

/// Parse `raw` for `field` and store the result in `settings`.
pub fn apply_numeric_input(
    settings: &mut WatermarkSettings,
    field: NumericField,
    raw: &str,
    app: &AppSettings,
) -> NumericInput {
    let result = parse_numeric_input(raw, field.get(settings), field, app);
    if let NumericInput::Clamped(value) = result {
        tracing::debug!(?field, raw, value, "clamped numeric input");
    }
    apply_change(settings, field.change(result.value()));
    result
}
