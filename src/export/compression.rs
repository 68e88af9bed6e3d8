//! Gzip framing for request bodies.

use crate::core::Result;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Gzip-compress a payload with the default level.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Inflate a gzip payload.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// Ratio of compressed to original size, `1.0` for empty input.
#[allow(clippy::cast_precision_loss)]
pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if original == 0 {
        return 1.0;
    }
    compressed as f64 / original as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_and_inflate() {
        let payload = br#"[{"common":{},"metrics":[]}]"#.repeat(50);
        let compressed = compress(&payload).unwrap();
        assert!(compressed.len() < payload.len());
        assert_eq!(decompress(&compressed).unwrap(), payload);
    }

    #[test]
    fn test_gzip_magic_bytes() {
        let compressed = compress(b"{}").unwrap();
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_decompress_garbage_fails() {
        assert!(decompress(b"definitely not gzip").is_err());
    }

    #[test]
    fn test_compression_ratio() {
        assert_eq!(compression_ratio(0, 0), 1.0);
        assert_eq!(compression_ratio(100, 25), 0.25);
    }
}
