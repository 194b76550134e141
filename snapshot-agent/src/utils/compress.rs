//! zstd helpers for the compressed files stored inside a snapshot.

use std::fs;
use std::io;
use std::path::Path;

/// Compress `data` and write it to `path`.
pub fn write_compressed(path: &Path, data: &[u8], level: i32) -> io::Result<()> {
    let compressed = zstd::encode_all(data, level)?;
    fs::write(path, compressed)
}

/// Read and decompress a file written by [`write_compressed`].
pub fn read_compressed(path: &Path) -> io::Result<Vec<u8>> {
    let compressed = fs::read(path)?;
    zstd::decode_all(compressed.as_slice())
}

/// Read a compressed text file; invalid UTF-8 is replaced.
pub fn read_compressed_text(path: &Path) -> io::Result<String> {
    let data = read_compressed(path)?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}
