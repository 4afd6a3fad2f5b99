//! zlib payload compression
//!
//! Plaintext is compressed before encryption. Decompressed output is capped
//! so a small ciphertext cannot expand without bound.

use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};

use super::error::{CryptoError, CryptoResult};

/// Largest plaintext accepted after decompression (16 MiB)
pub const MAX_DECOMPRESSED_SIZE: u64 = 16 * 1024 * 1024;

/// Compress bytes into a zlib stream at the default level
pub fn compress(data: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CryptoError::EncryptionFailed(format!("compression: {e}")))?;
    encoder
        .finish()
        .map_err(|e| CryptoError::EncryptionFailed(format!("compression: {e}")))
}

/// Decompress a zlib stream
pub fn decompress(data: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data).take(MAX_DECOMPRESSED_SIZE + 1);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CryptoError::DecompressionFailed(e.to_string()))?;

    if out.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(CryptoError::DecompressionFailed(format!(
            "payload exceeds {MAX_DECOMPRESSED_SIZE} bytes"
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_decompress() {
        let data = b"hello hello hello hello hello".repeat(20);
        let compressed = compress(&data).unwrap();

        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_zlib_header() {
        let compressed = compress(b"x").unwrap();
        // CMF byte for deflate with a 32K window
        assert_eq!(compressed[0], 0x78);
    }

    #[test]
    fn test_garbage_fails() {
        assert!(matches!(
            decompress(b"definitely not zlib"),
            Err(CryptoError::DecompressionFailed(_))
        ));
    }

    #[test]
    fn test_empty_input() {
        let compressed = compress(b"").unwrap();
        assert!(decompress(&compressed).unwrap().is_empty());
    }
}
