//! Compressed inputs, custom codecs and input pattern expansion.

use flatbatch::io::compression::{
    CompressionCodec, InputStream, OutputStream, codec_for_path, decode_input, encode_output,
    register_codec,
};
use flatbatch::io::glob::{expand_glob, is_pattern, resolve_inputs};
use flatbatch::testing::*;
use flatbatch::{ChunkedPipeline, Message, MessageMapper, PipelineConfig, RunCoordinator};
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn read_all(mut reader: InputStream) -> String {
    let mut out = String::new();
    reader.read_to_string(&mut out).unwrap();
    out
}

/// Write `contents` through the encoder chosen for `path`.
fn write_encoded(path: &Path, contents: &str) {
    let mut out = encode_output(File::create(path).unwrap(), path).unwrap();
    out.write_all(contents.as_bytes()).unwrap();
    out.flush().unwrap();
}

fn import(path: &Path) -> Vec<Message> {
    let sink = Arc::new(RecordingSink::<Message>::new());
    let pipeline = ChunkedPipeline::new(PipelineConfig::default(), MessageMapper, Arc::clone(&sink)).unwrap();
    let result = RunCoordinator::new(pipeline).execute(path).unwrap();
    assert_run_completed(&result);
    sink.records()
}

#[test]
fn test_plain_input_passes_through() {
    let reader = decode_input(Cursor::new(b"type,value\nA,1\n".to_vec()), "plain.csv").unwrap();
    assert_eq!(read_all(reader), "type,value\nA,1\n");
}

#[test]
fn test_uncompressed_output_is_plain_text() {
    let dir = TempDirPath::new().unwrap();
    let path = dir.file_path("plain.csv");
    write_encoded(&path, "type,value\n");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "type,value\n");
    assert!(codec_for_path(&path).is_none());
}

#[cfg(feature = "compression-gzip")]
mod gzip {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn gzipped(text: &str) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_gzip_detected_by_extension_case_insensitive() {
        assert_eq!(codec_for_path(Path::new("IN.CSV.GZ")).unwrap().name(), "gzip");
        let reader = decode_input(Cursor::new(gzipped("a,b\n")), "IN.CSV.GZ").unwrap();
        assert_eq!(read_all(reader), "a,b\n");
    }

    #[test]
    fn test_gzip_detected_by_magic_bytes() {
        let reader = decode_input(Cursor::new(gzipped("type,value\nB,2\n")), "misnamed.csv").unwrap();
        assert_eq!(read_all(reader), "type,value\nB,2\n");
    }

    #[test]
    fn test_concatenated_gzip_members_decode_fully() {
        let mut bytes = gzipped("type,value\nA,1\n");
        bytes.extend(gzipped("B,2\n"));
        let input = TempInput::from_bytes(&bytes, "csv.gz").unwrap();

        assert_eq!(
            import(input.path()),
            vec![Message::new("A", "1"), Message::new("B", "2")]
        );
    }
}

#[cfg(feature = "compression-zstd")]
#[test]
fn test_zstd_input_imports() {
    let dir = TempDirPath::new().unwrap();
    let path = dir.file_path("in.csv.zst");
    write_encoded(&path, &type_value_rows(4));
    assert_eq!(import(&path), expected_messages(4));
}

#[cfg(feature = "compression-bzip2")]
#[test]
fn test_bzip2_input_imports() {
    let dir = TempDirPath::new().unwrap();
    let path = dir.file_path("in.csv.bz2");
    write_encoded(&path, &type_value_rows(4));
    assert_eq!(&std::fs::read(&path).unwrap()[..3], b"BZh");
    assert_eq!(import(&path), expected_messages(4));
}

#[cfg(feature = "compression-xz")]
#[test]
fn test_xz_input_imports() {
    let dir = TempDirPath::new().unwrap();
    let path = dir.file_path("in.csv.xz");
    write_encoded(&path, &type_value_rows(4));
    assert_eq!(import(&path), expected_messages(4));
}

/// Flips every byte; its own inverse.
struct InvertCodec;

struct Invert<T>(T);

impl<R: Read> Read for Invert<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.0.read(buf)?;
        for b in &mut buf[..n] {
            *b = !*b;
        }
        Ok(n)
    }
}

impl<W: Write> Write for Invert<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let flipped: Vec<u8> = buf.iter().map(|b| !b).collect();
        self.0.write_all(&flipped)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl CompressionCodec for InvertCodec {
    fn name(&self) -> &str {
        "invert"
    }

    fn extensions(&self) -> &[&str] {
        &[".inv"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        None
    }

    fn decoder(&self, reader: InputStream) -> std::io::Result<InputStream> {
        Ok(Box::new(Invert(reader)))
    }

    fn encoder(&self, writer: OutputStream) -> std::io::Result<OutputStream> {
        Ok(Box::new(Invert(writer)))
    }
}

#[test]
fn test_registered_codec_is_used_for_inputs() {
    register_codec(Arc::new(InvertCodec));
    assert_eq!(codec_for_path(Path::new("data.csv.inv")).unwrap().name(), "invert");

    let dir = TempDirPath::new().unwrap();
    let path = dir.file_path("data.csv.inv");
    write_encoded(&path, &type_value_rows(3));
    assert_ne!(std::fs::read(&path).unwrap()[0], b't');

    assert_eq!(import(&path), expected_messages(3));
}

#[test]
fn test_is_pattern() {
    assert!(is_pattern("data/*.csv"));
    assert!(is_pattern("part-?.csv"));
    assert!(is_pattern("part-[0-9].csv"));
    assert!(!is_pattern("data/in.csv"));
}

#[test]
fn test_expand_glob_sorted_files_only() {
    let dir = TempDirPath::new().unwrap();
    dir.write_file("b.csv", "x").unwrap();
    dir.write_file("a.csv", "x").unwrap();
    dir.write_file("c.txt", "x").unwrap();
    std::fs::create_dir(dir.file_path("d.csv")).unwrap();

    let files = expand_glob(&format!("{}/*.csv", dir.path().display())).unwrap();
    assert_eq!(files, vec![dir.file_path("a.csv"), dir.file_path("b.csv")]);

    let none = expand_glob(&format!("{}/*.parquet", dir.path().display())).unwrap();
    assert!(none.is_empty());
}

#[test]
fn test_expand_glob_invalid_pattern() {
    assert!(expand_glob("data/[.csv").is_err());
}

#[test]
fn test_resolve_inputs_mixes_literals_and_patterns() {
    let dir = TempDirPath::new().unwrap();
    let a = dir.write_file("a.csv", "x").unwrap();
    let b = dir.write_file("b.csv", "x").unwrap();
    let missing = dir.file_path("missing.csv");

    let args = vec![
        a.display().to_string(),
        format!("{}/*.csv", dir.path().display()),
        missing.display().to_string(),
    ];
    let inputs = resolve_inputs(&args).unwrap();

    assert_eq!(inputs, vec![a, b, missing]);
}

#[test]
fn test_resolve_inputs_pattern_without_match_fails() {
    let dir = TempDirPath::new().unwrap();
    let err = resolve_inputs(&[format!("{}/*.csv", dir.path().display())]).unwrap_err();
    assert!(err.to_string().contains("no files found"));
    let empty: Vec<PathBuf> = resolve_inputs::<&str>(&[]).unwrap();
    assert!(empty.is_empty());
}
