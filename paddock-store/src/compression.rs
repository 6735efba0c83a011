//! Extension-gated zstd compression.
//!
//! Content formats that compress well (car data archives, configs, lookup
//! tables, AI lines) are stored compressed; everything else goes up as-is.
//! File operations stream through zstd at a fixed moderate level so memory
//! stays constant regardless of file size. They are synchronous — async
//! callers run them on the blocking pool.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor};
use std::path::Path;

use crate::error::{StoreError, StoreResult};

/// Ratio/speed balance; not configurable on purpose.
const COMPRESSION_LEVEL: i32 = 3;

/// Extensions worth compressing. Membership is the only gate; size is not
/// a factor.
const COMPRESSIBLE_EXTENSIONS: &[&str] = &[
    "acd", "ai", "cfg", "csv", "ini", "json", "kn5", "log", "lut", "txt", "vao", "xml", "yaml",
    "yml",
];

pub struct CompressionCodec;

impl CompressionCodec {
    /// Decides by file extension whether an upload should be compressed.
    pub fn should_compress(file_name: &str, _size: u64) -> bool {
        Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let ext = e.to_ascii_lowercase();
                COMPRESSIBLE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
    }

    pub fn compress_data(data: &[u8]) -> StoreResult<Vec<u8>> {
        zstd::encode_all(Cursor::new(data), COMPRESSION_LEVEL)
            .map_err(|e| StoreError::Compression(e.to_string()))
    }

    pub fn decompress_data(data: &[u8]) -> StoreResult<Vec<u8>> {
        zstd::decode_all(Cursor::new(data)).map_err(|e| StoreError::Compression(e.to_string()))
    }

    /// Streams `src` into `dst` compressed. Constant memory.
    pub fn compress_file(src: &Path, dst: &Path) -> StoreResult<()> {
        let reader = BufReader::new(File::open(src).map_err(|e| StoreError::io(src, e))?);
        let writer = BufWriter::new(File::create(dst).map_err(|e| StoreError::io(dst, e))?);
        zstd::stream::copy_encode(reader, writer, COMPRESSION_LEVEL)
            .map_err(|e| StoreError::io(src, e))
    }

    /// Streaming inverse of [`Self::compress_file`].
    pub fn decompress_file(src: &Path, dst: &Path) -> StoreResult<()> {
        let reader = BufReader::new(File::open(src).map_err(|e| StoreError::io(src, e))?);
        let writer = BufWriter::new(File::create(dst).map_err(|e| StoreError::io(dst, e))?);
        zstd::stream::copy_decode(reader, writer).map_err(|e| StoreError::io(src, e))
    }
}
