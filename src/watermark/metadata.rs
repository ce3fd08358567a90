use anyhow::{bail, ensure, Context};
use exif::experimental::Writer;
use exif::{Field, In, Tag, Value};
use std::io::Cursor;

/// Reinserts source metadata into freshly encoded output.
pub trait MetadataInjector {
    fn inject(
        &self,
        original: &[u8],
        encoded: Vec<u8>,
        dimensions: (u32, u32),
    ) -> anyhow::Result<Vec<u8>>;
}

/// Leaves encoded output untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetadata;

impl MetadataInjector for NoMetadata {
    fn inject(
        &self,
        _original: &[u8],
        encoded: Vec<u8>,
        _dimensions: (u32, u32),
    ) -> anyhow::Result<Vec<u8>> {
        Ok(encoded)
    }
}

/// Copies the `Exif` APP1 segment of a source JPEG into an encoded JPEG,
/// updated to describe the encoded pixels.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegExifTransplant;

const SOI: [u8; 2] = [0xFF, 0xD8];
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const SOS: u8 = 0xDA;
const EOI: u8 = 0xD9;
const EXIF_HEADER: &[u8] = b"Exif\0\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    marker: u8,
    /// Offset of the `0xFF` marker byte.
    start: usize,
    /// Offset one past the segment payload.
    end: usize,
}

impl Segment {
    fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.start + 4..self.end]
    }

    fn is_exif(&self, data: &[u8]) -> bool {
        self.marker == APP1 && self.payload(data).starts_with(EXIF_HEADER)
    }
}

/// Header segments up to (not including) the start of scan.
fn header_segments(data: &[u8]) -> anyhow::Result<Vec<Segment>> {
    ensure!(data.starts_with(&SOI), "not a JPEG stream");
    let mut segments = Vec::new();
    let mut pos = SOI.len();
    loop {
        ensure!(pos + 1 < data.len(), "truncated JPEG header");
        ensure!(data[pos] == 0xFF, "bad JPEG marker at offset {pos}");
        let marker = data[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if marker == SOS || marker == EOI {
            break;
        }
        ensure!(pos + 3 < data.len(), "truncated JPEG segment at offset {pos}");
        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        ensure!(len >= 2, "invalid JPEG segment length at offset {pos}");
        let end = pos + 2 + len;
        ensure!(end <= data.len(), "JPEG segment overruns stream at offset {pos}");
        segments.push(Segment {
            marker,
            start: pos,
            end,
        });
        pos = end;
    }
    Ok(segments)
}

impl MetadataInjector for JpegExifTransplant {
    fn inject(
        &self,
        original: &[u8],
        encoded: Vec<u8>,
        dimensions: (u32, u32),
    ) -> anyhow::Result<Vec<u8>> {
        let source_segments = header_segments(original).context("scan source JPEG")?;
        let Some(exif) = source_segments.iter().find(|s| s.is_exif(original)) else {
            bail!("source JPEG has no Exif segment");
        };
        let payload = rewrite_exif(exif.payload(original), dimensions)?;
        let exif_segment = app1_segment(&payload)?;

        let target_segments = header_segments(&encoded).context("scan encoded JPEG")?;
        let insert_at = match target_segments.first() {
            Some(first) if first.marker == APP0 && first.start == SOI.len() => first.end,
            _ => SOI.len(),
        };

        let mut out = Vec::with_capacity(encoded.len() + exif_segment.len());
        out.extend_from_slice(&encoded[..insert_at]);
        out.extend_from_slice(&exif_segment);
        let mut cursor = insert_at;
        for segment in target_segments.iter().filter(|s| s.is_exif(&encoded)) {
            if segment.start >= cursor {
                out.extend_from_slice(&encoded[cursor..segment.start]);
                cursor = segment.end;
            }
        }
        out.extend_from_slice(&encoded[cursor..]);

        tracing::debug!(
            exif_len = exif_segment.len(),
            width = dimensions.0,
            height = dimensions.1,
            "transplanted Exif segment"
        );
        Ok(out)
    }
}

/// Tags the writer derives from the IFD layout itself.
const STRUCTURAL_TAGS: &[Tag] = &[
    Tag::ExifIFDPointer,
    Tag::GPSInfoIFDPointer,
    Tag::InteropIFDPointer,
    Tag::StripOffsets,
    Tag::StripByteCounts,
    Tag::TileOffsets,
    Tag::TileByteCounts,
    Tag::JPEGInterchangeFormat,
    Tag::JPEGInterchangeFormatLength,
];

/// Rebuild an `Exif\0\0` payload for the exported pixels.
///
/// `PixelXDimension`/`PixelYDimension` take the output size, `Orientation`
/// becomes 1 since decoding already rotated the pixels, and the thumbnail
/// IFD is dropped.
fn rewrite_exif(payload: &[u8], (width, height): (u32, u32)) -> anyhow::Result<Vec<u8>> {
    let tiff = payload
        .strip_prefix(EXIF_HEADER)
        .context("APP1 segment is not Exif")?;
    let parsed = exif::Reader::new()
        .read_raw(tiff.to_vec())
        .context("parse source Exif")?;

    let rewritten = [Tag::PixelXDimension, Tag::PixelYDimension, Tag::Orientation];
    let mut fields: Vec<Field> = parsed
        .fields()
        .filter(|f| f.ifd_num == In::PRIMARY)
        .filter(|f| !matches!(f.value, Value::Unknown(..)))
        .filter(|f| !STRUCTURAL_TAGS.contains(&f.tag) && !rewritten.contains(&f.tag))
        .cloned()
        .collect();
    fields.push(Field {
        tag: Tag::PixelXDimension,
        ifd_num: In::PRIMARY,
        value: Value::Long(vec![width]),
    });
    fields.push(Field {
        tag: Tag::PixelYDimension,
        ifd_num: In::PRIMARY,
        value: Value::Long(vec![height]),
    });
    if parsed.get_field(Tag::Orientation, In::PRIMARY).is_some() {
        fields.push(Field {
            tag: Tag::Orientation,
            ifd_num: In::PRIMARY,
            value: Value::Short(vec![1]),
        });
    }

    let mut writer = Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    let mut tiff_out = Cursor::new(Vec::new());
    writer
        .write(&mut tiff_out, parsed.little_endian())
        .context("write rewritten Exif")?;

    let mut out = EXIF_HEADER.to_vec();
    out.extend_from_slice(&tiff_out.into_inner());
    Ok(out)
}

fn app1_segment(payload: &[u8]) -> anyhow::Result<Vec<u8>> {
    let len = payload.len() + 2;
    ensure!(len <= u16::MAX as usize, "Exif segment too large ({len} bytes)");
    let mut out = vec![0xFF, APP1];
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}
