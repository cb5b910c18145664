//! Predictor reversal for FlateDecode streams.
//!
//! Cross-reference streams are typically written with the PNG "Up"
//! predictor (`/Predictor 12`), where every row is stored as the difference
//! from the row above it.

use crate::error::{Error, Result};
use crate::object::Dictionary;

/// `/DecodeParms` entries relevant to predictor reversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeParams {
    /// Predictor algorithm (1 = none, 2 = TIFF, 10-15 = PNG)
    pub predictor: i64,
    /// Samples per row
    pub columns: usize,
    /// Colour components per sample
    pub colors: usize,
    /// Bits per component
    pub bits_per_component: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
        }
    }
}

impl DecodeParams {
    /// Read the parameters from a `/DecodeParms` dictionary, defaulting
    /// absent or non-positive entries.
    pub fn from_dict(dict: &Dictionary) -> Self {
        let defaults = Self::default();
        let positive = |key: &str, fallback: usize| {
            dict.get(key)
                .and_then(|o| o.as_integer())
                .filter(|v| *v > 0)
                .map(|v| v as usize)
                .unwrap_or(fallback)
        };

        Self {
            predictor: dict
                .get("Predictor")
                .and_then(|o| o.as_integer())
                .unwrap_or(defaults.predictor),
            columns: positive("Columns", defaults.columns),
            colors: positive("Colors", defaults.colors),
            bits_per_component: positive("BitsPerComponent", defaults.bits_per_component),
        }
    }

    /// Bytes of sample data per row, excluding the PNG tag byte.
    pub fn row_bytes(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }

    /// Bytes per complete pixel, at least one.
    fn pixel_bytes(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

/// Reverse the predictor described by `params`.
pub fn apply_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        2 => reverse_tiff(data, params),
        10..=15 => reverse_png(data, params),
        other => Err(Error::Decode(format!("unsupported predictor {}", other))),
    }
}

fn reverse_tiff(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    if params.bits_per_component != 8 {
        return Err(Error::Unsupported(format!(
            "TIFF predictor with {} bits per component",
            params.bits_per_component
        )));
    }
    let row_len = params.row_bytes();
    let bpp = params.pixel_bytes();
    let mut output = data.to_vec();

    for row in output.chunks_mut(row_len) {
        for i in bpp..row.len() {
            row[i] = row[i].wrapping_add(row[i - bpp]);
        }
    }
    Ok(output)
}

fn reverse_png(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let row_len = params.row_bytes();
    let stride = row_len + 1;
    if data.len() % stride != 0 {
        return Err(Error::Decode(format!(
            "predicted data length {} is not a multiple of row size {}",
            data.len(),
            stride
        )));
    }

    let bpp = params.pixel_bytes();
    let mut output = Vec::with_capacity(data.len() / stride * row_len);
    let mut previous = vec![0u8; row_len];

    for row in data.chunks(stride) {
        let tag = row[0];
        let mut current = row[1..].to_vec();

        for i in 0..row_len {
            let left = if i >= bpp { current[i - bpp] } else { 0 };
            let up = previous[i];
            let up_left = if i >= bpp { previous[i - bpp] } else { 0 };
            let predicted = match tag {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((left as u16 + up as u16) / 2) as u8,
                4 => paeth(left, up, up_left),
                other => {
                    return Err(Error::Decode(format!("invalid PNG predictor tag {}", other)));
                },
            };
            current[i] = current[i].wrapping_add(predicted);
        }

        output.extend_from_slice(&current);
        previous = current;
    }

    Ok(output)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();

    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
