pub mod bitmap_cache;
pub mod compositor;
pub mod editor;
pub mod export;
pub mod fonts;
pub mod layout;
pub mod metadata;
pub mod model;
pub mod preview;
pub mod source;
pub mod surface;

pub use compositor::{BitmapMode, Compositor, RenderOutcome};
pub use export::{export_batch, export_one, ExportFormat, ExportOptions, OutputFormat};
pub use fonts::{FontBook, TextRasterizer};
pub use model::{Position, SizeUnit, WatermarkKind, WatermarkSettings, WatermarkSpec};
pub use preview::PreviewSession;
pub use source::SourceImage;
