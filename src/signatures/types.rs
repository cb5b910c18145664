//! The signature (cryptographic) dictionary.
//!
//! The dictionary is written as raw bytes rather than through the object
//! serializer because two of its values are reserved windows that are
//! patched in place after the file is assembled: `/ByteRange` (a fixed-width
//! array) and `/Contents` (a hex string of fixed length).

use crate::writer::write_string;
use chrono::{DateTime, FixedOffset, Offset, TimeZone};

/// Bytes of signature material the placeholder can hold.
pub const CONTENTS: usize = 15000;

/// Width reserved for the `/ByteRange` array, brackets included.
pub const BYTE_RANGE_WIDTH: usize = 48;

/// Signature handler written in `/Filter`.
pub const FILTER: &str = "Adobe.PPKLite";

/// Signature format written in `/SubFilter`.
pub const SUB_FILTER: &str = "adbe.pkcs7.detached";

/// Serialized signature dictionary with the positions of its reserved windows.
#[derive(Debug, Clone)]
pub struct SignatureDictionary {
    /// Dictionary body, `<< ... >>`
    pub body: Vec<u8>,
    /// Offset of the `/ByteRange` window inside `body`
    pub byte_range_at: usize,
    /// Offset of the `/Contents` window (its `<`) inside `body`
    pub contents_at: usize,
    /// Length of the `/Contents` window, delimiters included
    pub contents_len: usize,
}

/// Builder for the signature dictionary.
#[derive(Debug, Clone)]
pub struct SignatureDictionaryBuilder {
    reason: String,
    location: String,
    signing_time: DateTime<FixedOffset>,
    contents: usize,
}

impl SignatureDictionaryBuilder {
    /// Start a dictionary signed at `signing_time`, with empty reason and location.
    pub fn new<Tz: TimeZone>(signing_time: DateTime<Tz>) -> Self {
        let offset = signing_time.offset().fix();
        Self {
            reason: String::new(),
            location: String::new(),
            signing_time: signing_time.with_timezone(&offset),
            contents: CONTENTS,
        }
    }

    /// Set `/Reason`.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set `/Location`.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Reserve room for `contents` bytes of signature material.
    pub fn with_contents_size(mut self, contents: usize) -> Self {
        self.contents = contents;
        self
    }

    /// Serialize the dictionary with an unpatched `/ByteRange` and a zeroed `/Contents`.
    pub fn build(&self) -> SignatureDictionary {
        let mut body = Vec::with_capacity(self.contents * 2 + 256);
        body.extend_from_slice(b"<< /Type /Sig /Filter /");
        body.extend_from_slice(FILTER.as_bytes());
        body.extend_from_slice(b" /SubFilter /");
        body.extend_from_slice(SUB_FILTER.as_bytes());
        body.extend_from_slice(b" /M ");
        write_string(&mut body, pdf_date(&self.signing_time).as_bytes());
        body.extend_from_slice(b" /Location ");
        write_string(&mut body, self.location.as_bytes());
        body.extend_from_slice(b" /Reason ");
        write_string(&mut body, self.reason.as_bytes());

        body.extend_from_slice(b" /ByteRange ");
        let byte_range_at = body.len();
        body.extend_from_slice(&format_byte_range(&[0, 0, 0, 0]));

        body.extend_from_slice(b" /Contents ");
        let contents_at = body.len();
        let placeholder = contents_placeholder(self.contents);
        let contents_len = placeholder.len();
        body.extend_from_slice(placeholder.as_bytes());
        body.extend_from_slice(b" >>");

        SignatureDictionary {
            body,
            byte_range_at,
            contents_at,
            contents_len,
        }
    }
}

/// `<` + `2 * contents` zeros + `>`.
pub fn contents_placeholder(contents: usize) -> String {
    format!("<{}>", "0".repeat(contents * 2))
}

/// `[a b c d]` padded with spaces to [`BYTE_RANGE_WIDTH`].
pub fn format_byte_range(range: &[usize; 4]) -> Vec<u8> {
    let mut slot = format!("[{} {} {} {}]", range[0], range[1], range[2], range[3]).into_bytes();
    if slot.len() < BYTE_RANGE_WIDTH {
        slot.resize(BYTE_RANGE_WIDTH, b' ');
    }
    slot
}

/// PDF date string: `D:YYYYMMDDHHmmSS+HH'mm'`.
pub fn pdf_date(time: &DateTime<FixedOffset>) -> String {
    let offset = time.offset().local_minus_utc();
    let sign = if offset < 0 { '-' } else { '+' };
    let minutes = offset.abs() / 60;
    format!(
        "D:{}{}{:02}'{:02}'",
        time.format("%Y%m%d%H%M%S"),
        sign,
        minutes / 60,
        minutes % 60
    )
}
