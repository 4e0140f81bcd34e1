//! Streaming PNG output.
//!
//! Rows are quantized and encoded as they arrive, so a banded canvas never has
//! to exist in memory as a whole. The file only appears at its destination
//! once the last row is encoded.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use common::file_utils::AtomicFile;
use png::StreamWriter;

use crate::error::ComponentError;
use crate::tile::BitDepth;

/// Shape of the image to encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PngLayout {
    pub width: usize,
    pub height: usize,
    /// 1 (gray) or 3 (RGB).
    pub channels: usize,
    pub bit_depth: BitDepth,
}

/// Receives interleaved normalized samples, whole rows at a time.
pub struct RowSink<'s, 'f> {
    stream: StreamWriter<'s, &'f mut AtomicFile>,
    bit_depth: BitDepth,
    bytes: Vec<u8>,
    path: PathBuf,
    component: usize,
}

impl RowSink<'_, '_> {
    pub fn write_rows(&mut self, samples: &[f32]) -> Result<(), ComponentError> {
        self.bytes.clear();
        quantize_into(samples, self.bit_depth, &mut self.bytes);
        self.stream
            .write_all(&self.bytes)
            .map_err(|source| ComponentError::OutputWrite {
                component: self.component,
                path: self.path.clone(),
                source,
            })
    }
}

/// Write a PNG at `path` whose rows are produced by `produce`.
///
/// Nothing is left at `path` if `produce` or the encoder fails.
pub fn write_png<F>(
    path: &Path,
    layout: PngLayout,
    component: usize,
    produce: F,
) -> Result<PathBuf, ComponentError>
where
    F: FnOnce(&mut RowSink<'_, '_>) -> Result<(), ComponentError>,
{
    let io_error = |source: io::Error| ComponentError::OutputWrite {
        component,
        path: path.to_path_buf(),
        source,
    };
    let encode_error = |source: png::EncodingError| ComponentError::Encode {
        component,
        path: path.to_path_buf(),
        source,
    };

    let color = match layout.channels {
        1 => png::ColorType::Grayscale,
        3 => png::ColorType::Rgb,
        n => {
            return Err(io_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot encode {n} channels as PNG"),
            )));
        }
    };
    let depth = match layout.bit_depth {
        BitDepth::Eight => png::BitDepth::Eight,
        BitDepth::Sixteen => png::BitDepth::Sixteen,
    };

    let mut file = AtomicFile::create(path).map_err(io_error)?;
    {
        let mut encoder = png::Encoder::new(&mut file, layout.width as u32, layout.height as u32);
        encoder.set_color(color);
        encoder.set_depth(depth);
        let mut writer = encoder.write_header().map_err(encode_error)?;
        {
            let stream = writer.stream_writer().map_err(encode_error)?;
            let mut sink = RowSink {
                stream,
                bit_depth: layout.bit_depth,
                bytes: Vec::new(),
                path: path.to_path_buf(),
                component,
            };
            produce(&mut sink)?;
            sink.stream.finish().map_err(encode_error)?;
        }
        writer.finish().map_err(encode_error)?;
    }
    file.commit().map_err(io_error)
}

/// Samples in [0, 1] to PNG bytes: one per sample, or two big-endian.
pub fn quantize_into(samples: &[f32], bit_depth: BitDepth, out: &mut Vec<u8>) {
    let max = bit_depth.max_value();
    match bit_depth {
        BitDepth::Eight => {
            out.extend(samples.iter().map(|&v| (v.clamp(0.0, 1.0) * max).round() as u8));
        }
        BitDepth::Sixteen => {
            for &v in samples {
                let q = (v.clamp(0.0, 1.0) * max).round() as u16;
                out.extend_from_slice(&q.to_be_bytes());
            }
        }
    }
}
