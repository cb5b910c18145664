//! Stream decoders needed to read document structure.
//!
//! Cross-reference streams and object streams are almost always stored with
//! FlateDecode, usually combined with a PNG "Up" predictor. Those are the only
//! filters the signing pipeline has to understand; page content and images
//! are carried over byte-for-byte and never decoded.

use crate::error::{Error, Result};

mod flate;
mod predictor;

pub use flate::flate_decode;
pub use predictor::{apply_predictor, DecodeParams};

/// Upper bound on the size of a decoded structural stream.
const MAX_DECODED_SIZE: usize = 64 * 1024 * 1024;

fn check_decoded_size(len: usize) -> Result<()> {
    if len > MAX_DECODED_SIZE {
        return Err(Error::Decode(format!(
            "decoded stream exceeds {} bytes",
            MAX_DECODED_SIZE
        )));
    }
    Ok(())
}
