//! Transparent compression for input files and file sinks.
//!
//! Inputs are matched against the registered codecs by file extension first
//! and by magic bytes second, so `orders.csv.gz` and a gzip stream saved as
//! `orders.csv` both decode. File sinks pick a compressor from the output
//! extension only.
//!
//! Built-in codecs are enabled per feature:
//! - **Gzip** (`.gz`) - `compression-gzip`
//! - **Zstd** (`.zst`) - `compression-zstd`
//! - **Bzip2** (`.bz2`) - `compression-bzip2`
//! - **Xz** (`.xz`) - `compression-xz`
//!
//! Additional codecs can be added at runtime with [`register_codec`].

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

/// Boxed input stream handed to the line reader.
pub type InputStream = Box<dyn Read + Send>;
/// Boxed output stream used by file sinks.
pub type OutputStream = Box<dyn Write + Send>;

static CODEC_REGISTRY: RwLock<Vec<Arc<dyn CompressionCodec>>> = RwLock::new(Vec::new());

fn builtin_codecs() -> Vec<Arc<dyn CompressionCodec>> {
    vec![
        #[cfg(feature = "compression-gzip")]
        Arc::new(GzipCodec),
        #[cfg(feature = "compression-zstd")]
        Arc::new(ZstdCodec),
        #[cfg(feature = "compression-bzip2")]
        Arc::new(Bzip2Codec),
        #[cfg(feature = "compression-xz")]
        Arc::new(XzCodec),
    ]
}

/// Built-in codecs followed by any registered at runtime.
fn codecs() -> Vec<Arc<dyn CompressionCodec>> {
    let mut all = builtin_codecs();
    let extra = CODEC_REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
    all.extend(extra.iter().cloned());
    all
}

/// Register a custom codec, consulted after the built-in ones.
pub fn register_codec(codec: Arc<dyn CompressionCodec>) {
    CODEC_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(codec);
}

/// A compression format that can wrap input and output streams.
pub trait CompressionCodec: Send + Sync {
    fn name(&self) -> &str;

    /// Lowercase extensions including the leading dot, e.g. `&[".gz"]`.
    fn extensions(&self) -> &[&str];

    /// Signature at the start of a compressed stream, if the format has one.
    fn magic_bytes(&self) -> Option<&[u8]>;

    fn decoder(&self, reader: InputStream) -> std::io::Result<InputStream>;

    fn encoder(&self, writer: OutputStream) -> std::io::Result<OutputStream>;
}

/// Codec whose extension ends `path`, compared case-insensitively.
#[must_use]
pub fn codec_for_path(path: &Path) -> Option<Arc<dyn CompressionCodec>> {
    let name = path.to_string_lossy().to_lowercase();
    codecs()
        .into_iter()
        .find(|codec| codec.extensions().iter().any(|ext| name.ends_with(ext)))
}

fn codec_for_magic<R: BufRead>(reader: &mut R) -> Option<Arc<dyn CompressionCodec>> {
    let head = reader.fill_buf().ok()?;
    if head.is_empty() {
        return None;
    }
    codecs().into_iter().find(|codec| {
        codec
            .magic_bytes()
            .is_some_and(|magic| head.starts_with(magic))
    })
}

/// Wrap `reader` with a decompressor when `path_hint` or the leading bytes
/// identify a codec; otherwise return it buffered and unchanged.
///
/// # Errors
///
/// Returns an error if the codec cannot initialise its decoder.
pub fn decode_input<R: Read + Send + 'static>(
    reader: R,
    path_hint: impl AsRef<Path>,
) -> Result<InputStream> {
    if let Some(codec) = codec_for_path(path_hint.as_ref()) {
        return codec
            .decoder(Box::new(reader))
            .with_context(|| format!("wrap input with {} codec", codec.name()));
    }

    let mut buffered = BufReader::new(reader);
    if let Some(codec) = codec_for_magic(&mut buffered) {
        return codec
            .decoder(Box::new(buffered))
            .with_context(|| format!("wrap input with {} codec", codec.name()));
    }
    Ok(Box::new(buffered))
}

/// Wrap `writer` with a compressor chosen by the extension of `path_hint`.
///
/// # Errors
///
/// Returns an error if the codec cannot initialise its encoder.
pub fn encode_output<W: Write + Send + 'static>(
    writer: W,
    path_hint: impl AsRef<Path>,
) -> Result<OutputStream> {
    if let Some(codec) = codec_for_path(path_hint.as_ref()) {
        return codec
            .encoder(Box::new(writer))
            .with_context(|| format!("wrap output with {} codec", codec.name()));
    }
    Ok(Box::new(BufWriter::new(writer)))
}

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl CompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn extensions(&self) -> &[&str] {
        &[".gz", ".gzip"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x1f, 0x8b])
    }

    fn decoder(&self, reader: InputStream) -> std::io::Result<InputStream> {
        // Multi-member streams appear when gzip files are concatenated.
        Ok(Box::new(flate2::read::MultiGzDecoder::new(reader)))
    }

    fn encoder(&self, writer: OutputStream) -> std::io::Result<OutputStream> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        Ok(Box::new(GzEncoder::new(writer, Compression::default())))
    }
}

#[cfg(feature = "compression-zstd")]
struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl CompressionCodec for ZstdCodec {
    fn name(&self) -> &str {
        "zstd"
    }

    fn extensions(&self) -> &[&str] {
        &[".zst", ".zstd"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x28, 0xb5, 0x2f, 0xfd])
    }

    fn decoder(&self, reader: InputStream) -> std::io::Result<InputStream> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as InputStream)
    }

    fn encoder(&self, writer: OutputStream) -> std::io::Result<OutputStream> {
        zstd::stream::write::Encoder::new(writer, 3)
            .map(|e| Box::new(e.auto_finish()) as OutputStream)
    }
}

#[cfg(feature = "compression-bzip2")]
struct Bzip2Codec;

#[cfg(feature = "compression-bzip2")]
impl CompressionCodec for Bzip2Codec {
    fn name(&self) -> &str {
        "bzip2"
    }

    fn extensions(&self) -> &[&str] {
        &[".bz2", ".bzip2"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(b"BZh")
    }

    fn decoder(&self, reader: InputStream) -> std::io::Result<InputStream> {
        Ok(Box::new(bzip2::read::MultiBzDecoder::new(reader)))
    }

    fn encoder(&self, writer: OutputStream) -> std::io::Result<OutputStream> {
        use bzip2::Compression;
        use bzip2::write::BzEncoder;
        Ok(Box::new(BzEncoder::new(writer, Compression::default())))
    }
}

#[cfg(feature = "compression-xz")]
struct XzCodec;

#[cfg(feature = "compression-xz")]
impl CompressionCodec for XzCodec {
    fn name(&self) -> &str {
        "xz"
    }

    fn extensions(&self) -> &[&str] {
        &[".xz"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00])
    }

    fn decoder(&self, reader: InputStream) -> std::io::Result<InputStream> {
        Ok(Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)))
    }

    fn encoder(&self, writer: OutputStream) -> std::io::Result<OutputStream> {
        Ok(Box::new(xz2::write::XzEncoder::new(writer, 6)))
    }
}
