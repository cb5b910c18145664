//! ByteRange calculation for PDF signatures.
//!
//! PDF digital signatures use a ByteRange array to specify which portions
//! of the document are covered by the signature. The signature itself is
//! stored in a placeholder that is excluded from the signed bytes.
//!
//! ## ByteRange Format
//!
//! The ByteRange is an array of four integers:
//! `[offset1, length1, offset2, length2]`
//!
//! Where:
//! - `offset1` = 0 (start of file)
//! - `length1` = byte offset where the signature value begins
//! - `offset2` = byte offset where the signature value ends
//! - `length2` = remaining bytes to end of file
//!
//! The signature value is a hex-encoded string within `<` and `>` delimiters.

use crate::error::{Error, Result};
use crate::writer::hex_upper;
use std::io::{Chain, Read};

/// Calculator for PDF signature byte ranges.
#[derive(Debug, Clone, Copy)]
pub struct ByteRangeCalculator {
    /// Size of the placeholder for the signature value (hex digits + 2 for angle brackets)
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Create a calculator for `signature_size` bytes of signature material.
    ///
    /// The placeholder size is `signature_size * 2 + 2`: each byte becomes
    /// two hex digits, plus the angle brackets.
    pub fn new(signature_size: usize) -> Self {
        Self {
            placeholder_size: signature_size * 2 + 2,
        }
    }

    /// Create a ByteRange calculator with a specific placeholder size.
    pub fn with_placeholder_size(placeholder_size: usize) -> Self {
        Self { placeholder_size }
    }

    /// Get the placeholder size (for the /Contents value).
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// Bytes of signature material the placeholder can hold.
    pub fn capacity(&self) -> usize {
        self.placeholder_size.saturating_sub(2) / 2
    }

    /// Calculate the ByteRange array given the position of the /Contents value.
    ///
    /// `contents_offset` is the offset of the opening `<`.
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> [usize; 4] {
        let after_sig_start = contents_offset + self.placeholder_size;
        [
            0,
            contents_offset,
            after_sig_start,
            file_size.saturating_sub(after_sig_start),
        ]
    }

    /// Extract the bytes covered by `byte_range` into one buffer.
    pub fn extract_signed_bytes(pdf_data: &[u8], byte_range: &[usize; 4]) -> Result<Vec<u8>> {
        let mut signed = Vec::with_capacity(byte_range[1] + byte_range[3]);
        ByteRangeStream::new(pdf_data, byte_range)?.read_to_end(&mut signed)?;
        Ok(signed)
    }

    /// Check that a ByteRange covers the entire document except the signature.
    pub fn validate_byte_range(byte_range: &[usize; 4], file_size: usize) -> Result<()> {
        let [offset1, length1, offset2, length2] = *byte_range;

        if offset1 != 0 {
            return Err(Error::InvalidPdf(format!("ByteRange must start at 0, got {}", offset1)));
        }

        let actual_end = offset2 + length2;
        if actual_end != file_size {
            return Err(Error::InvalidPdf(format!(
                "ByteRange must end at file size {}, got {}",
                file_size, actual_end
            )));
        }

        if length1 > offset2 {
            return Err(Error::InvalidPdf(format!(
                "ByteRange first range ({}) overlaps with second range start ({})",
                length1, offset2
            )));
        }

        Ok(())
    }

    /// Write `signature` into the placeholder at `contents_offset`,
    /// zero-padding the unused hex digits.
    ///
    /// The document is left untouched when the signature does not fit.
    pub fn insert_signature(&self, pdf_data: &mut [u8], contents_offset: usize, signature: &[u8]) -> Result<()> {
        if signature.len() > self.capacity() {
            return Err(Error::PlaceholderOverflow {
                needed: signature.len(),
                available: self.capacity(),
            });
        }
        let window = self.window_mut(pdf_data, contents_offset)?;

        let hex = hex_upper(signature);
        window[1..1 + hex.len()].copy_from_slice(hex.as_bytes());
        let end = window.len() - 1;
        window[1 + hex.len()..end].fill(b'0');
        Ok(())
    }

    /// Reset the placeholder at `contents_offset` to all zeros.
    pub fn clear_signature(&self, pdf_data: &mut [u8], contents_offset: usize) -> Result<()> {
        let window = self.window_mut(pdf_data, contents_offset)?;
        let end = window.len() - 1;
        window[1..end].fill(b'0');
        Ok(())
    }

    fn window_mut<'d>(&self, pdf_data: &'d mut [u8], contents_offset: usize) -> Result<&'d mut [u8]> {
        let end = contents_offset + self.placeholder_size;
        if self.placeholder_size < 2 || end > pdf_data.len() {
            return Err(Error::InvalidPdf(
                "signature placeholder lies outside the document".to_string(),
            ));
        }
        let window = &mut pdf_data[contents_offset..end];
        if window[0] != b'<' || window[window.len() - 1] != b'>' {
            return Err(Error::InvalidPdf(format!(
                "no signature placeholder at byte {}",
                contents_offset
            )));
        }
        Ok(window)
    }
}

/// Reader over the two signed ranges of a document, skipping the placeholder.
#[derive(Debug)]
pub struct ByteRangeStream<'a> {
    inner: Chain<&'a [u8], &'a [u8]>,
}

impl<'a> ByteRangeStream<'a> {
    /// Stream the bytes selected by `byte_range` from `data`.
    pub fn new(data: &'a [u8], byte_range: &[usize; 4]) -> Result<Self> {
        let [offset1, length1, offset2, length2] = *byte_range;
        let first = range(data, offset1, length1)?;
        let second = range(data, offset2, length2)?;
        Ok(Self {
            inner: first.chain(second),
        })
    }
}

impl Read for ByteRangeStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

fn range(data: &[u8], offset: usize, length: usize) -> Result<&[u8]> {
    offset
        .checked_add(length)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| {
            Error::InvalidPdf(format!(
                "ByteRange {}+{} exceeds file size {}",
                offset,
                length,
                data.len()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_placeholder_size() {
        let calc = ByteRangeCalculator::new(1024);
        // 1024 bytes * 2 (hex) + 2 (brackets) = 2050
        assert_eq!(calc.placeholder_size(), 2050);
        assert_eq!(calc.capacity(), 1024);
    }

    #[test]
    fn test_calculate_byte_range() {
        let calc = ByteRangeCalculator::with_placeholder_size(100);
        assert_eq!(calc.calculate_byte_range(1000, 400), [0, 400, 500, 500]);
    }

    #[test]
    fn test_extract_signed_bytes() {
        let pdf_data = b"AAABBBCCC";
        let signed = ByteRangeCalculator::extract_signed_bytes(pdf_data, &[0, 3, 6, 3]).unwrap();
        assert_eq!(signed, b"AAACCC");
    }

    #[test]
    fn test_extract_out_of_bounds() {
        assert!(ByteRangeCalculator::extract_signed_bytes(b"AAABBB", &[0, 3, 4, 10]).is_err());
    }

    #[test]
    fn test_validate_byte_range() {
        assert!(ByteRangeCalculator::validate_byte_range(&[0, 100, 150, 50], 200).is_ok());
        assert!(ByteRangeCalculator::validate_byte_range(&[10, 100, 150, 50], 200).is_err());
        assert!(ByteRangeCalculator::validate_byte_range(&[0, 100, 150, 100], 200).is_err());
        assert!(ByteRangeCalculator::validate_byte_range(&[0, 160, 150, 50], 200).is_err());
    }

    #[test]
    fn test_insert_signature() {
        let calc = ByteRangeCalculator::with_placeholder_size(10);
        let mut pdf_data = b"XX<00000000>YY".to_vec();
        calc.insert_signature(&mut pdf_data, 2, &[0xAB, 0xCD]).unwrap();
        assert_eq!(&pdf_data, b"XX<ABCD0000>YY");

        calc.clear_signature(&mut pdf_data, 2).unwrap();
        assert_eq!(&pdf_data, b"XX<00000000>YY");
    }

    #[test]
    fn test_insert_signature_too_large() {
        let calc = ByteRangeCalculator::with_placeholder_size(10);
        let mut pdf_data = b"XX<00000000>YY".to_vec();
        let result = calc.insert_signature(&mut pdf_data, 2, &[1, 2, 3, 4, 5]);
        assert!(matches!(
            result,
            Err(Error::PlaceholderOverflow {
                needed: 5,
                available: 4
            })
        ));
        assert_eq!(&pdf_data, b"XX<00000000>YY");
    }

    #[test]
    fn test_insert_requires_placeholder() {
        let calc = ByteRangeCalculator::with_placeholder_size(10);
        let mut pdf_data = b"XXX0000000>YY".to_vec();
        assert!(calc.insert_signature(&mut pdf_data, 2, &[1]).is_err());
    }

    proptest! {
        #[test]
        fn prop_stream_skips_exactly_the_placeholder(
            prefix in proptest::collection::vec(any::<u8>(), 0..200),
            suffix in proptest::collection::vec(any::<u8>(), 0..200),
            signature_size in 1usize..16,
        ) {
            let calc = ByteRangeCalculator::new(signature_size);
            let mut data = prefix.clone();
            data.push(b'<');
            data.extend(std::iter::repeat(b'0').take(signature_size * 2));
            data.push(b'>');
            data.extend_from_slice(&suffix);

            let range = calc.calculate_byte_range(data.len(), prefix.len());
            prop_assert!(ByteRangeCalculator::validate_byte_range(&range, data.len()).is_ok());
            prop_assert_eq!(range[1] + range[3] + calc.placeholder_size(), data.len());

            let signed = ByteRangeCalculator::extract_signed_bytes(&data, &range).unwrap();
            let expected: Vec<u8> = prefix.iter().chain(suffix.iter()).copied().collect();
            prop_assert_eq!(signed, expected);
        }
    }
}
