//! FlateDecode (zlib/deflate).

use super::check_decoded_size;
use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;

/// Inflate zlib-wrapped data.
///
/// Falls back to raw deflate when the zlib header is missing, and keeps
/// whatever was recovered when the stream is truncated.
pub fn flate_decode(input: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    let zlib_err = match ZlibDecoder::new(input).read_to_end(&mut output) {
        Ok(_) => {
            check_decoded_size(output.len())?;
            return Ok(output);
        },
        Err(e) => e,
    };

    if !output.is_empty() {
        log::warn!(
            "FlateDecode partial recovery: {} bytes before error: {}",
            output.len(),
            zlib_err
        );
        check_decoded_size(output.len())?;
        return Ok(output);
    }

    log::debug!("zlib decode failed ({}), trying raw deflate", zlib_err);
    output.clear();
    match DeflateDecoder::new(input).read_to_end(&mut output) {
        Ok(_) => {
            check_decoded_size(output.len())?;
            Ok(output)
        },
        Err(_) if !output.is_empty() => {
            check_decoded_size(output.len())?;
            Ok(output)
        },
        Err(e) => Err(Error::Decode(format!("FlateDecode failed: {}", e))),
    }
}
