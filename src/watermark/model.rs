use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::settings::AppSettings;
use crate::watermark::layout::LayoutParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    TopLeft,
    TopCenter,
    TopRight,
    MiddleLeft,
    Center,
    MiddleRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
    FullScreen,
}

impl Position {
    /// The nine single-placement anchors, row by row.
    pub const ANCHORS: [Position; 9] = [
        Position::TopLeft,
        Position::TopCenter,
        Position::TopRight,
        Position::MiddleLeft,
        Position::Center,
        Position::MiddleRight,
        Position::BottomLeft,
        Position::BottomCenter,
        Position::BottomRight,
    ];

    pub fn is_full_screen(self) -> bool {
        matches!(self, Position::FullScreen)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Position::TopLeft => "top-left",
            Position::TopCenter => "top-center",
            Position::TopRight => "top-right",
            Position::MiddleLeft => "middle-left",
            Position::Center => "center",
            Position::MiddleRight => "middle-right",
            Position::BottomLeft => "bottom-left",
            Position::BottomCenter => "bottom-center",
            Position::BottomRight => "bottom-right",
            Position::FullScreen => "full-screen",
        }
    }

    /// Offsets a named anchor stands for in the unified offset model.
    ///
    /// Horizontal: left is -100, right is +100. Vertical: top is +100, bottom
    /// is -100. Everything else (and full-screen) is 0.
    pub fn default_offsets(self) -> (f64, f64) {
        let name = self.as_str();
        let x = if name.contains("left") {
            -100.0
        } else if name.contains("right") {
            100.0
        } else {
            0.0
        };
        let y = if name.contains("top") {
            100.0
        } else if name.contains("bottom") {
            -100.0
        } else {
            0.0
        };
        (x, y)
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::Center
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Position {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Position::ANCHORS
            .iter()
            .copied()
            .chain(std::iter::once(Position::FullScreen))
            .find(|position| position.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("unknown watermark position '{trimmed}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SizeUnit {
    /// Percent of the base image's pixel width.
    #[default]
    #[serde(rename = "percent")]
    Percent,
    #[serde(rename = "px")]
    Pixels,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkKind {
    #[default]
    Text,
    Image,
}

/// SHA-1 of a content payload, used as cache identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; 20]);

impl ContentId {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha1::digest(bytes);
        let mut id = [0u8; 20];
        id.copy_from_slice(&digest);
        Self(id)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", &hex::encode(self.0)[..12])
    }
}

/// Encoded watermark bitmap plus its content identity.
///
/// Serialized as a base64 string so settings files stay plain JSON.
#[derive(Clone, PartialEq, Eq)]
pub struct WatermarkImage {
    id: ContentId,
    bytes: Arc<[u8]>,
}

impl WatermarkImage {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        Self {
            id: ContentId::of(&bytes),
            bytes,
        }
    }

    pub fn id(&self) -> ContentId {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }
}

impl fmt::Debug for WatermarkImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatermarkImage")
            .field("id", &self.id)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Serialize for WatermarkImage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(&self.bytes))
    }
}

impl<'de> Deserialize<'de> for WatermarkImage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        // Accept data URLs as stored by browser front ends.
        let payload = match encoded.split_once(";base64,") {
            Some((_, data)) => data,
            None => encoded.as_str(),
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(serde::de::Error::custom)?;
        Ok(Self::from_bytes(bytes))
    }
}

/// What a watermark paints. Text styling and bitmap payload are exclusive.
#[derive(Debug, Clone, PartialEq)]
pub enum WatermarkContent {
    Text {
        text: String,
        color: String,
        font_family: String,
    },
    Image(WatermarkImage),
}

/// Immutable per-render watermark input.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkSpec {
    pub content: WatermarkContent,
    pub position: Position,
    pub size_value: f64,
    pub size_unit: SizeUnit,
    pub rotation_degrees: f64,
    pub opacity: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub spacing_x: f64,
    pub spacing_y: f64,
}

impl WatermarkSpec {
    pub fn rotation_radians(&self) -> f64 {
        self.rotation_degrees.to_radians()
    }

    pub fn layout_params(&self) -> LayoutParams {
        LayoutParams {
            position: self.position,
            rotation_radians: self.rotation_radians(),
            offset_x: self.offset_x,
            offset_y: self.offset_y,
            spacing_x: self.spacing_x,
            spacing_y: self.spacing_y,
        }
    }
}

/// Editable watermark settings as stored per image and in presets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkSettings {
    #[serde(default)]
    pub kind: WatermarkKind,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub position: Position,
    pub size: f64,
    #[serde(default)]
    pub rotation: f64,
    pub opacity: f64,
    pub color: String,
    pub font_family: String,
    #[serde(default)]
    pub offset_x: f64,
    #[serde(default)]
    pub offset_y: f64,
    pub spacing_x: f64,
    pub spacing_y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<WatermarkImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_height: Option<u32>,
}

impl WatermarkSettings {
    pub fn from_defaults(app: &AppSettings) -> Self {
        Self {
            kind: WatermarkKind::Text,
            text: app.default_watermark.clone(),
            position: app.default_position,
            size: app.default_size,
            rotation: app.default_rotation,
            opacity: app.default_opacity,
            color: app.default_color.clone(),
            font_family: app.default_font_family.clone(),
            offset_x: app.default_offset_x,
            offset_y: app.default_offset_y,
            spacing_x: app.default_spacing_x,
            spacing_y: app.default_spacing_y,
            image_data: None,
            image_name: None,
            image_width: None,
            image_height: None,
        }
    }

    /// Build the render input. Returns `None` for an image watermark that has
    /// no bitmap attached yet; such settings paint the base image only.
    pub fn to_spec(&self, size_unit: SizeUnit) -> Option<WatermarkSpec> {
        let content = match self.kind {
            WatermarkKind::Text => WatermarkContent::Text {
                text: self.text.clone(),
                color: self.color.clone(),
                font_family: self.font_family.clone(),
            },
            WatermarkKind::Image => WatermarkContent::Image(self.image_data.clone()?),
        };

        Some(WatermarkSpec {
            content,
            position: self.position,
            size_value: self.size,
            size_unit,
            rotation_degrees: self.rotation,
            opacity: if self.opacity.is_finite() {
                self.opacity.clamp(0.0, 1.0)
            } else {
                1.0
            },
            offset_x: self.offset_x,
            offset_y: self.offset_y,
            spacing_x: self.spacing_x,
            spacing_y: self.spacing_y,
        })
    }
}

impl Default for WatermarkSettings {
    fn default() -> Self {
        Self::from_defaults(&AppSettings::default())
    }
}
