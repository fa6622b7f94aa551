use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::{CryptoError, Result};

/// Gzip-compress `data` (RouterInfos travel compressed inside DatabaseStore).
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| CryptoError::Compression(e.to_string()))
}

/// Inflate a gzip stream, capped at `max_len` to bound hostile input.
pub fn gunzip(data: &[u8], max_len: usize) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data).take(max_len as u64 + 1);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CryptoError::Compression(e.to_string()))?;
    if out.len() > max_len {
        return Err(CryptoError::Compression(format!(
            "inflated past {} bytes",
            max_len
        )));
    }
    Ok(out)
}
