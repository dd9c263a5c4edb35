//! Gzip compression for large payloads.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Default size above which payloads are compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Compress bytes with gzip at the default level.
///
/// # Errors
/// Returns `Error::CompressionError` if the encoder fails.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::CompressionError(format!("Gzip compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::CompressionError(format!("Gzip finalization failed: {}", e)))
}

/// Decompress gzip bytes.
///
/// # Errors
/// Returns `Error::CompressionError` on corrupt input.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::CompressionError(format!("Gzip decompression failed: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_decompress() {
        let original = b"2019 Volvo XC60 T5 Momentum, one owner, full service history. ".repeat(40);

        let compressed = compress(&original).unwrap();
        assert!(compressed.len() < original.len());
        assert_eq!(decompress(&compressed).unwrap(), original);
    }

    #[test]
    fn test_decompress_garbage_fails() {
        let result = decompress(b"definitely not gzip");
        assert!(matches!(result, Err(Error::CompressionError(_))));
    }
}
