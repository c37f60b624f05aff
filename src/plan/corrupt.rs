// src/plan/corrupt.rs

//! Corrupted-input pre-check.
//!
//! Decompressing every input file is expensive, so this only runs when a
//! dataset sets `exclude_corrupted_input_files`.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use blake3::Hasher;
use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use tracing::{debug, warn};

use crate::fs::FileSystem;

/// An input file excluded from its run unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptedInput {
    pub dataset: String,
    pub run_number: u64,
    pub path: PathBuf,
    pub reason: String,
}

/// Decides whether an input file is usable. `Err` carries the reason.
pub trait InputChecker: Send + Sync {
    fn check(&self, fs: &dyn FileSystem, path: &Path) -> std::result::Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Zstd,
    Gzip,
    Bzip2,
    Plain,
}

impl Codec {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("zst") => Codec::Zstd,
            Some("gz") => Codec::Gzip,
            Some("bz2") => Codec::Bzip2,
            _ => Codec::Plain,
        }
    }

    fn magic(self) -> &'static [u8] {
        match self {
            Codec::Zstd => &[0x28, 0xB5, 0x2F, 0xFD],
            Codec::Gzip => &[0x1F, 0x8B],
            Codec::Bzip2 => b"BZh",
            Codec::Plain => &[],
        }
    }

    /// Decompress everything `reader` yields and return the decoded size.
    fn drain(self, mut reader: impl Read) -> io::Result<u64> {
        let mut sink = io::sink();
        match self {
            Codec::Zstd => io::copy(&mut zstd::stream::read::Decoder::new(reader)?, &mut sink),
            Codec::Gzip => io::copy(&mut MultiGzDecoder::new(reader), &mut sink),
            Codec::Bzip2 => io::copy(&mut MultiBzDecoder::new(reader), &mut sink),
            Codec::Plain => io::copy(&mut reader, &mut sink),
        }
    }
}

/// Hashes the raw bytes as they are pulled through.
struct HashingReader<R> {
    inner: R,
    hasher: Hasher,
    bytes: u64,
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

/// Decompresses the whole file according to its extension (`.zst`, `.gz`,
/// `.bz2`; anything else is read as is). Empty files, a wrong compression
/// header, truncated frames and undecodable data all mark the file as
/// corrupted.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadableInputChecker;

impl InputChecker for ReadableInputChecker {
    fn check(&self, fs: &dyn FileSystem, path: &Path) -> std::result::Result<(), String> {
        let mut reader = fs.open_read(path).map_err(|e| format!("cannot open: {e:#}"))?;
        let codec = Codec::from_path(path);

        let mut head = Vec::with_capacity(4);
        (&mut reader)
            .take(4)
            .read_to_end(&mut head)
            .map_err(|e| format!("read failed: {e}"))?;
        if head.is_empty() {
            return Err("file is empty".to_string());
        }
        let magic = codec.magic();
        if !head.starts_with(magic) {
            return Err(format!(
                "bad header {:02x?}, expected {:02x?}",
                &head[..head.len().min(magic.len())],
                magic
            ));
        }

        let mut raw = HashingReader {
            inner: io::Cursor::new(head).chain(reader),
            hasher: Hasher::new(),
            bytes: 0,
        };
        let decoded = codec
            .drain(&mut raw)
            .map_err(|e| format!("cannot decompress: {e}"))?;

        debug!(
            path = ?path,
            bytes = raw.bytes,
            decoded,
            hash = %raw.hasher.finalize().to_hex(),
            "input readable"
        );
        Ok(())
    }
}

/// Split `inputs` into the usable ones and the exclusions.
pub fn partition_inputs(
    checker: &dyn InputChecker,
    fs: &dyn FileSystem,
    dataset: &str,
    run_number: u64,
    inputs: &[PathBuf],
) -> (Vec<PathBuf>, Vec<CorruptedInput>) {
    let mut usable = Vec::with_capacity(inputs.len());
    let mut corrupted = Vec::new();
    for path in inputs {
        match checker.check(fs, path) {
            Ok(()) => usable.push(path.clone()),
            Err(reason) => {
                warn!(dataset, run_number, path = ?path, %reason, "excluding corrupted input");
                corrupted.push(CorruptedInput {
                    dataset: dataset.to_string(),
                    run_number,
                    path: path.clone(),
                    reason,
                });
            }
        }
    }
    (usable, corrupted)
}
