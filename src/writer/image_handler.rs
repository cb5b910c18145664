//! Signature images as Image XObjects.
//!
//! JPEG data is embedded as-is with `DCTDecode`. Every other supported
//! format is decoded with the `image` crate and re-encoded with
//! `FlateDecode`; an alpha channel becomes a separate `/SMask` image.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

/// Color space for image data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    /// Grayscale (1 component per pixel)
    DeviceGray,
    /// RGB color (3 components per pixel)
    DeviceRGB,
    /// CMYK color (4 components per pixel)
    DeviceCMYK,
}

impl ColorSpace {
    /// Get the PDF name for this color space.
    pub fn pdf_name(&self) -> &'static str {
        match self {
            ColorSpace::DeviceGray => "DeviceGray",
            ColorSpace::DeviceRGB => "DeviceRGB",
            ColorSpace::DeviceCMYK => "DeviceCMYK",
        }
    }
}

/// How the pixel data is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    /// Original JPEG bytes (DCTDecode)
    Jpeg,
    /// Zlib-compressed samples (FlateDecode)
    Flate,
}

/// Decoded signature image ready to be embedded.
#[derive(Debug, Clone)]
pub struct SignatureImage {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Color space of `data`
    pub color_space: ColorSpace,
    /// Encoding of `data`
    pub encoding: ImageEncoding,
    /// Encoded samples
    pub data: Vec<u8>,
    /// Flate-compressed alpha channel, if the source had one
    pub soft_mask: Option<Vec<u8>>,
}

impl SignatureImage {
    /// Decode an image, detecting its format from the content.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.starts_with(&[0xFF, 0xD8]) {
            return Self::from_jpeg(data);
        }
        Self::from_raster(data)
    }

    /// Embed JPEG bytes without transcoding.
    pub fn from_jpeg(data: &[u8]) -> Result<Self> {
        let (width, height, color_space) = parse_jpeg_header(data)?;
        Ok(Self {
            width,
            height,
            color_space,
            encoding: ImageEncoding::Jpeg,
            data: data.to_vec(),
            soft_mask: None,
        })
    }

    fn from_raster(data: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(data).map_err(|e| Error::Image(e.to_string()))?;
        let (width, height) = (img.width(), img.height());
        if width == 0 || height == 0 {
            return Err(Error::Image("image has no pixels".to_string()));
        }

        let (color_space, pixels, alpha) = if img.color().has_color() {
            if img.color().has_alpha() {
                let rgba = img.to_rgba8();
                let mut rgb = Vec::with_capacity((width * height * 3) as usize);
                let mut alpha = Vec::with_capacity((width * height) as usize);
                for pixel in rgba.pixels() {
                    rgb.extend_from_slice(&pixel.0[..3]);
                    alpha.push(pixel.0[3]);
                }
                (ColorSpace::DeviceRGB, rgb, Some(alpha))
            } else {
                (ColorSpace::DeviceRGB, img.to_rgb8().into_raw(), None)
            }
        } else if img.color().has_alpha() {
            let la = img.to_luma_alpha8();
            let gray = la.pixels().map(|p| p.0[0]).collect();
            let alpha = la.pixels().map(|p| p.0[1]).collect();
            (ColorSpace::DeviceGray, gray, Some(alpha))
        } else {
            (ColorSpace::DeviceGray, img.to_luma8().into_raw(), None)
        };

        // A fully opaque alpha channel adds nothing.
        let alpha = alpha.filter(|a: &Vec<u8>| a.iter().any(|v| *v != 0xFF));

        Ok(Self {
            width,
            height,
            color_space,
            encoding: ImageEncoding::Flate,
            data: compress(&pixels)?,
            soft_mask: alpha.map(|a| compress(&a)).transpose()?,
        })
    }

    /// Width over height.
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// Largest size that fits in `max_width` x `max_height` with the
    /// image's aspect ratio.
    pub fn fit_to_box(&self, max_width: f64, max_height: f64) -> (f64, f64) {
        if max_width <= 0.0 || max_height <= 0.0 {
            return (0.0, 0.0);
        }
        let aspect = self.aspect_ratio();
        if aspect > max_width / max_height {
            (max_width, max_width / aspect)
        } else {
            (max_height * aspect, max_height)
        }
    }

    /// Image XObject stream, optionally pointing to its soft mask.
    pub fn to_xobject(&self, soft_mask: Option<ObjectRef>) -> Object {
        let mut dict = self.base_dict(self.color_space);
        match self.encoding {
            ImageEncoding::Jpeg => dict.insert("Filter".to_string(), Object::name("DCTDecode")),
            ImageEncoding::Flate => dict.insert("Filter".to_string(), Object::name("FlateDecode")),
        };
        if let Some(mask) = soft_mask {
            dict.insert("SMask".to_string(), Object::Reference(mask));
        }
        Object::Stream {
            dict,
            data: bytes::Bytes::from(self.data.clone()),
        }
    }

    /// Soft mask XObject stream for the alpha channel.
    pub fn soft_mask_xobject(&self) -> Option<Object> {
        self.soft_mask.as_ref().map(|mask| {
            let mut dict = self.base_dict(ColorSpace::DeviceGray);
            dict.insert("Filter".to_string(), Object::name("FlateDecode"));
            Object::Stream {
                dict,
                data: bytes::Bytes::from(mask.clone()),
            }
        })
    }

    fn base_dict(&self, color_space: ColorSpace) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert("Type".to_string(), Object::name("XObject"));
        dict.insert("Subtype".to_string(), Object::name("Image"));
        dict.insert("Width".to_string(), Object::Integer(self.width as i64));
        dict.insert("Height".to_string(), Object::Integer(self.height as i64));
        dict.insert("ColorSpace".to_string(), Object::name(color_space.pdf_name()));
        dict.insert("BitsPerComponent".to_string(), Object::Integer(8));
        dict
    }
}

/// Read dimensions and component count from the first SOF marker.
fn parse_jpeg_header(data: &[u8]) -> Result<(u32, u32, ColorSpace)> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return Err(Error::Image("not a JPEG stream".to_string()));
    }

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        let marker = data[pos + 1];
        pos += 2;

        if marker == 0xFF || marker == 0x00 || (0xD0..=0xD9).contains(&marker) {
            continue;
        }

        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            let header = data
                .get(pos..pos + 8)
                .ok_or_else(|| Error::Image("truncated JPEG frame header".to_string()))?;
            let height = u16::from_be_bytes([header[3], header[4]]) as u32;
            let width = u16::from_be_bytes([header[5], header[6]]) as u32;
            let color_space = match header[7] {
                1 => ColorSpace::DeviceGray,
                4 => ColorSpace::DeviceCMYK,
                _ => ColorSpace::DeviceRGB,
            };
            if width == 0 || height == 0 {
                return Err(Error::Image("JPEG has zero dimensions".to_string()));
            }
            return Ok((width, height, color_space));
        }

        let Some(length) = data.get(pos..pos + 2) else {
            break;
        };
        pos += u16::from_be_bytes([length[0], length[1]]) as usize;
    }

    Err(Error::Image("JPEG frame header not found".to_string()))
}

fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
        out.into_inner()
    }

    fn minimal_jpeg_header(width: u16, height: u16, components: u8) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00];
        data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08]);
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&width.to_be_bytes());
        data.push(components);
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }

    #[test]
    fn test_fit_to_box_preserves_aspect() {
        let image = SignatureImage::from_bytes(&png(200, 100, [0, 0, 0, 255])).unwrap();
        assert_eq!(image.fit_to_box(100.0, 100.0), (100.0, 50.0));
        assert_eq!(image.fit_to_box(400.0, 50.0), (100.0, 50.0));
        assert_eq!(image.fit_to_box(0.0, 50.0), (0.0, 0.0));
    }

    #[test]
    fn test_opaque_png_has_no_mask() {
        let image = SignatureImage::from_bytes(&png(4, 4, [10, 20, 30, 255])).unwrap();
        assert_eq!(image.encoding, ImageEncoding::Flate);
        assert_eq!(image.color_space, ColorSpace::DeviceRGB);
        assert!(image.soft_mask.is_none());
        assert!(image.soft_mask_xobject().is_none());
    }

    #[test]
    fn test_transparent_png_gets_mask() {
        let image = SignatureImage::from_bytes(&png(4, 4, [10, 20, 30, 0])).unwrap();
        let mask = image.soft_mask_xobject().unwrap();
        assert_eq!(mask.as_dict().unwrap().get("ColorSpace").unwrap().as_name(), Some("DeviceGray"));

        let xobject = image.to_xobject(Some(ObjectRef::new(9, 0)));
        let dict = xobject.as_dict().unwrap();
        assert_eq!(dict.get("SMask"), Some(&Object::Reference(ObjectRef::new(9, 0))));
        assert_eq!(dict.get("Filter").unwrap().as_name(), Some("FlateDecode"));
    }

    #[test]
    fn test_jpeg_passthrough() {
        let jpeg = minimal_jpeg_header(640, 480, 3);
        let image = SignatureImage::from_bytes(&jpeg).unwrap();
        assert_eq!((image.width, image.height), (640, 480));
        assert_eq!(image.encoding, ImageEncoding::Jpeg);
        assert_eq!(image.data, jpeg);
        let dict = image.to_xobject(None);
        assert_eq!(dict.as_dict().unwrap().get("Filter").unwrap().as_name(), Some("DCTDecode"));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(SignatureImage::from_bytes(b"not an image"), Err(Error::Image(_))));
        assert!(matches!(SignatureImage::from_bytes(&[0xFF, 0xD8, 0x00]), Err(Error::Image(_))));
    }
}
