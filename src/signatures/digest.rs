//! Streamed SHA-256 over the signed byte ranges.

use crate::error::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::io::Read;

const BUFFER_SIZE: usize = 8192;

/// SHA-256 digest of the signed ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestResult {
    bytes: [u8; 32],
}

impl DigestResult {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Base64 (standard alphabet, padded) form sent to the remote authority.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes)
    }
}

/// Read `stream` to completion and hash it.
///
/// Any read failure aborts the digest; there are no partial results.
pub fn digest<R: Read>(mut stream: R) -> Result<DigestResult> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; BUFFER_SIZE];
    let mut total = 0usize;

    loop {
        let n = match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buffer[..n]);
        total += n;
    }

    log::debug!("digested {} bytes", total);
    Ok(DigestResult {
        bytes: hasher.finalize().into(),
    })
}
