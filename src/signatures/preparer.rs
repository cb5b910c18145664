//! Placeholder preparation.
//!
//! [`PlaceholderPreparer::prepare`] appends an incremental update that adds
//! a signature field to the document:
//!
//! - a signature dictionary with a fixed-size `/Contents` window, holding a
//!   certs-only CMS container with a throwaway certificate until the real
//!   signature arrives;
//! - a widget annotation on the target page, with an image appearance for
//!   visible layouts and an empty one for invisible layouts;
//! - the field registered in the AcroForm with `/SigFlags 3`.
//!
//! The resulting [`PreparedDocument`] exposes the byte ranges to digest and
//! is later finalized by writing the remote signature into the window, or
//! by clearing it.

use super::byterange::{ByteRangeCalculator, ByteRangeStream};
use super::certificate::EphemeralCertificate;
use super::layout::LayoutDescriptor;
use super::types::{format_byte_range, SignatureDictionaryBuilder, BYTE_RANGE_WIDTH, CONTENTS};
use crate::document::{PageNode, PdfDocument};
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::writer::{write_real, IncrementalUpdate, ObjectSerializer, SignatureImage};
use chrono::{DateTime, Local, Utc};
use std::collections::HashSet;

/// Widget flags: Print (4) + Locked (128).
const WIDGET_FLAGS: i64 = 132;

/// AcroForm flags: SignaturesExist (1) + AppendOnly (2).
const SIG_FLAGS: i64 = 3;

/// Resource name of the signature image inside the appearance.
const IMAGE_RESOURCE: &str = "Img0";

/// Adds a signature placeholder to documents.
#[derive(Debug, Clone)]
pub struct PlaceholderPreparer {
    reason: String,
    location: String,
    contents: usize,
    signing_time: Option<DateTime<Utc>>,
}

impl Default for PlaceholderPreparer {
    fn default() -> Self {
        Self {
            reason: String::new(),
            location: String::new(),
            contents: CONTENTS,
            signing_time: None,
        }
    }
}

impl PlaceholderPreparer {
    /// Preparer with empty reason and location and a [`CONTENTS`]-byte window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `/Reason` entry.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set the `/Location` entry.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Reserve room for `contents` bytes of signature material.
    pub fn with_contents_size(mut self, contents: usize) -> Self {
        self.contents = contents;
        self
    }

    /// Use a fixed signing time instead of the current time.
    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = Some(time);
        self
    }

    /// Add the signature field and reserve the placeholder.
    pub fn prepare(&self, document: &[u8], layout: &LayoutDescriptor) -> Result<PreparedDocument> {
        let mut doc = PdfDocument::parse(document)?;
        let mut pages = doc.pages()?;
        if pages.is_empty() {
            return Err(Error::InvalidPdf("document has no pages".to_string()));
        }
        let page_number = match layout {
            LayoutDescriptor::Visible(visible) => visible.page.resolve(pages.len()),
            LayoutDescriptor::Invisible => 1,
        };
        let page = pages.swap_remove(page_number - 1);

        let signing_time = self.signing_time.unwrap_or_else(Utc::now);
        let certificate = EphemeralCertificate::generate(signing_time)?;

        let mut update = IncrementalUpdate::new(&doc);
        let sig_ref = update.allocate();
        let widget_ref = update.allocate();
        let appearance_ref = update.allocate();

        let rect = match layout {
            LayoutDescriptor::Visible(visible) => {
                let rect = visible.rect();
                let image = SignatureImage::from_bytes(&visible.image_bytes()?)?;
                let appearance = image_appearance(&mut update, &image, rect);
                update.put(appearance_ref, &appearance);
                rect
            },
            LayoutDescriptor::Invisible => {
                update.put(appearance_ref, &form_xobject(0.0, 0.0, Dictionary::new(), Vec::new()));
                (0.0, 0.0, 0.0, 0.0)
            },
        };

        let field_name = register_field(&mut doc, &mut update, widget_ref)?;
        let widget = ObjectSerializer::dict(vec![
            ("Type", Object::name("Annot")),
            ("Subtype", Object::name("Widget")),
            ("FT", Object::name("Sig")),
            ("F", Object::Integer(WIDGET_FLAGS)),
            ("P", Object::Reference(page.reference)),
            ("Rect", ObjectSerializer::rect(rect.0, rect.1, rect.2, rect.3)),
            ("V", Object::Reference(sig_ref)),
            ("T", ObjectSerializer::string(&field_name)),
            ("AP", ObjectSerializer::dict(vec![("N", Object::Reference(appearance_ref))])),
        ]);
        update.put(widget_ref, &widget);
        attach_widget(&mut doc, &mut update, &page, widget_ref)?;

        let dictionary = SignatureDictionaryBuilder::new(signing_time.with_timezone(&Local))
            .with_reason(self.reason.as_str())
            .with_location(self.location.as_str())
            .with_contents_size(self.contents)
            .build();
        update.put_raw(sig_ref, dictionary.body.clone());

        let mut written = update.write()?;
        let body_offset = written
            .body_offset(sig_ref)
            .ok_or_else(|| Error::InvalidPdf("signature dictionary was not written".to_string()))?;
        let contents_offset = body_offset + dictionary.contents_at;
        let byte_range_offset = body_offset + dictionary.byte_range_at;

        let calculator = ByteRangeCalculator::with_placeholder_size(dictionary.contents_len);
        let byte_range = calculator.calculate_byte_range(written.bytes.len(), contents_offset);
        ByteRangeCalculator::validate_byte_range(&byte_range, written.bytes.len())?;
        let slot = format_byte_range(&byte_range);
        if slot.len() > BYTE_RANGE_WIDTH {
            return Err(Error::Unsupported(format!("byte range {:?} does not fit its slot", byte_range)));
        }
        written.bytes[byte_range_offset..byte_range_offset + slot.len()].copy_from_slice(&slot);

        let mut prepared = PreparedDocument {
            bytes: written.bytes,
            byte_range,
            contents_offset,
            calculator,
            page: page_number,
            field_name,
        };
        prepared.embed(&certificate.container)?;

        log::info!(
            "prepared {} signature field {} on page {}: byte range {:?}",
            if layout.is_visible() { "visible" } else { "invisible" },
            prepared.field_name,
            page_number,
            byte_range
        );
        Ok(prepared)
    }
}

/// Prepare `document` with the default settings.
pub fn prepare(document: &[u8], layout: &LayoutDescriptor) -> Result<PreparedDocument> {
    PlaceholderPreparer::new().prepare(document, layout)
}

/// A document with a reserved signature window.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    bytes: Vec<u8>,
    byte_range: [usize; 4],
    contents_offset: usize,
    calculator: ByteRangeCalculator,
    page: usize,
    field_name: String,
}

impl PreparedDocument {
    /// `[0, contents_offset, contents_end, rest]`.
    pub fn byte_range(&self) -> [usize; 4] {
        self.byte_range
    }

    /// Reader over the signed ranges.
    pub fn range_stream(&self) -> Result<ByteRangeStream<'_>> {
        ByteRangeStream::new(&self.bytes, &self.byte_range)
    }

    /// The `/Contents` window, delimiters included.
    pub fn contents_window(&self) -> &[u8] {
        &self.bytes[self.contents_offset..self.contents_offset + self.calculator.placeholder_size()]
    }

    /// True when the window holds only zeros.
    pub fn is_placeholder_empty(&self) -> bool {
        let window = self.contents_window();
        window[1..window.len() - 1].iter().all(|b| *b == b'0')
    }

    /// Bytes of signature material the window can hold.
    pub fn capacity(&self) -> usize {
        self.calculator.capacity()
    }

    /// 1-based page that carries the widget.
    pub fn page(&self) -> usize {
        self.page
    }

    /// Name of the new signature field.
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Write `signature` into the window, zero-padded.
    ///
    /// Fails with [`Error::PlaceholderOverflow`] and leaves the document
    /// untouched when the signature is larger than the window.
    pub fn embed(&mut self, signature: &[u8]) -> Result<()> {
        self.calculator
            .insert_signature(&mut self.bytes, self.contents_offset, signature)
    }

    /// Reset the window to all zeros.
    pub fn clear(&mut self) -> Result<()> {
        self.calculator.clear_signature(&mut self.bytes, self.contents_offset)
    }

    /// Embed `signature`, or clear the window when there is none.
    ///
    /// If embedding fails the window is cleared before the error is returned,
    /// so the document never keeps the placeholder certificate.
    pub fn finalize(&mut self, signature: Option<&[u8]>) -> Result<()> {
        match signature {
            Some(signature) if !signature.is_empty() => {
                if let Err(e) = self.embed(signature) {
                    self.clear()?;
                    return Err(e);
                }
                Ok(())
            },
            _ => self.clear(),
        }
    }

    /// Document bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Take the document bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Add the widget to the AcroForm and return its unique field name.
fn register_field(doc: &mut PdfDocument<'_>, update: &mut IncrementalUpdate<'_>, widget: ObjectRef) -> Result<String> {
    let catalog_ref = doc.catalog_ref()?;
    let mut catalog = doc.catalog()?;

    let (acroform_ref, mut acroform) = match catalog.get("AcroForm") {
        Some(Object::Reference(reference)) => {
            let reference = *reference;
            match doc.get_object(reference)? {
                Object::Dictionary(dict) => (Some(reference), dict),
                other => {
                    return Err(Error::InvalidPdf(format!("/AcroForm is a {}", other.type_name())));
                },
            }
        },
        Some(Object::Dictionary(dict)) => (None, dict.clone()),
        _ => (None, Dictionary::new()),
    };

    let mut fields = match acroform.get("Fields") {
        Some(fields) => doc.resolve(fields)?.as_array().cloned().unwrap_or_default(),
        None => Vec::new(),
    };

    let mut taken = HashSet::new();
    for field in &fields {
        match doc.resolve(field) {
            Ok(Object::Dictionary(dict)) => {
                if let Some(name) = dict.get("T").and_then(|t| t.as_string()) {
                    taken.insert(String::from_utf8_lossy(name).into_owned());
                }
            },
            Ok(_) => {},
            Err(e) => log::warn!("unreadable AcroForm field {:?}: {}", field, e),
        }
    }
    let mut n = 1;
    let name = loop {
        let candidate = format!("Signature{}", n);
        if !taken.contains(&candidate) {
            break candidate;
        }
        n += 1;
    };

    fields.push(Object::Reference(widget));
    acroform.insert("Fields".to_string(), Object::Array(fields));
    acroform.insert("SigFlags".to_string(), Object::Integer(SIG_FLAGS));

    match acroform_ref {
        Some(reference) => update.put(reference, &Object::Dictionary(acroform)),
        None => {
            catalog.insert("AcroForm".to_string(), Object::Dictionary(acroform));
            update.put(catalog_ref, &Object::Dictionary(catalog));
        },
    }
    Ok(name)
}

/// Append the widget to the page's `/Annots`.
fn attach_widget(
    doc: &mut PdfDocument<'_>,
    update: &mut IncrementalUpdate<'_>,
    page: &PageNode,
    widget: ObjectRef,
) -> Result<()> {
    let mut annots = match page.dict.get("Annots") {
        Some(annots) => doc.resolve(annots)?.as_array().cloned().unwrap_or_default(),
        None => Vec::new(),
    };
    annots.push(Object::Reference(widget));

    let mut dict = page.dict.clone();
    dict.insert("Annots".to_string(), Object::Array(annots));
    update.put(page.reference, &Object::Dictionary(dict));
    Ok(())
}

/// Form XObject drawing `image` scaled to fit `rect` and centred.
///
/// Graphic only: the appearance has no text operators.
fn image_appearance(update: &mut IncrementalUpdate<'_>, image: &SignatureImage, rect: (f64, f64, f64, f64)) -> Object {
    let (width, height) = (rect.2 - rect.0, rect.3 - rect.1);

    let soft_mask = image.soft_mask_xobject().map(|mask| {
        let reference = update.allocate();
        update.put(reference, &mask);
        reference
    });
    let image_ref = update.allocate();
    update.put(image_ref, &image.to_xobject(soft_mask));

    let (draw_width, draw_height) = image.fit_to_box(width, height);
    let offset_x = (width - draw_width) / 2.0;
    let offset_y = (height - draw_height) / 2.0;

    let mut content = b"q ".to_vec();
    for value in [draw_width, 0.0, 0.0, draw_height, offset_x, offset_y] {
        write_real(&mut content, value);
        content.push(b' ');
    }
    content.extend_from_slice(format!("cm /{} Do Q", IMAGE_RESOURCE).as_bytes());

    let mut resources = Dictionary::new();
    resources.insert(
        "XObject".to_string(),
        ObjectSerializer::dict(vec![(IMAGE_RESOURCE, Object::Reference(image_ref))]),
    );
    form_xobject(width, height, resources, content)
}

fn form_xobject(width: f64, height: f64, resources: Dictionary, content: Vec<u8>) -> Object {
    let mut dict = Dictionary::new();
    dict.insert("Type".to_string(), Object::name("XObject"));
    dict.insert("Subtype".to_string(), Object::name("Form"));
    dict.insert("BBox".to_string(), ObjectSerializer::rect(0.0, 0.0, width, height));
    dict.insert("Resources".to_string(), Object::Dictionary(resources));
    Object::Stream {
        dict,
        data: bytes::Bytes::from(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::digest;
    use chrono::TimeZone;

    fn one_page_pdf() -> Vec<u8> {
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>",
        ];
        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref = pdf.len();
        pdf.extend_from_slice(b"xref\n0 4\n0000000000 65535 f \n");
        for offset in offsets {
            pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        pdf.extend_from_slice(format!("trailer\n<< /Size 4 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n", xref).as_bytes());
        pdf
    }

    fn preparer() -> PlaceholderPreparer {
        PlaceholderPreparer::new()
            .with_contents_size(4096)
            .with_signing_time(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
    }

    #[test]
    fn test_prepare_invisible() {
        let pdf = one_page_pdf();
        let prepared = preparer().prepare(&pdf, &LayoutDescriptor::invisible()).unwrap();

        assert!(prepared.as_bytes().starts_with(&pdf));
        assert_eq!(prepared.page(), 1);
        assert_eq!(prepared.field_name(), "Signature1");
        assert_eq!(prepared.contents_window().len(), 4096 * 2 + 2);
        assert!(!prepared.is_placeholder_empty());

        let range = prepared.byte_range();
        assert_eq!(range[0], 0);
        assert_eq!(range[2] + range[3], prepared.as_bytes().len());
        assert_eq!(prepared.as_bytes()[range[1]], b'<');
        assert_eq!(prepared.as_bytes()[range[2] - 1], b'>');

        let text = String::from_utf8_lossy(prepared.as_bytes());
        assert!(text.contains(&format!("/ByteRange [0 {} {} {}]", range[1], range[2], range[3])));
        assert!(text.contains("/Rect [0 0 0 0]"));
        assert!(text.contains("/SigFlags 3"));
    }

    #[test]
    fn test_prepared_document_reparses() {
        let pdf = one_page_pdf();
        let prepared = preparer().prepare(&pdf, &LayoutDescriptor::invisible()).unwrap();
        let mut doc = PdfDocument::parse(prepared.as_bytes()).unwrap();

        let page = doc.page(1).unwrap();
        let annots = page.dict.get("Annots").and_then(|a| a.as_array()).unwrap();
        assert_eq!(annots.len(), 1);

        let catalog = doc.catalog().unwrap();
        let acroform = catalog.get("AcroForm").and_then(|a| a.as_dict()).unwrap();
        assert_eq!(acroform.get("SigFlags").and_then(|f| f.as_integer()), Some(3));
        let fields = acroform.get("Fields").and_then(|f| f.as_array()).unwrap();
        assert_eq!(fields, annots);

        let widget = doc.get_object(annots[0].as_reference().unwrap()).unwrap();
        let widget = widget.as_dict().unwrap();
        assert_eq!(widget.get("FT").and_then(|f| f.as_name()), Some("Sig"));
        assert_eq!(widget.get("F").and_then(|f| f.as_integer()), Some(132));
        let sig = doc.resolve(widget.get("V").unwrap()).unwrap();
        let sig = sig.as_dict().unwrap();
        assert_eq!(sig.get("SubFilter").and_then(|s| s.as_name()), Some("adbe.pkcs7.detached"));
        let byte_range: Vec<i64> = sig
            .get("ByteRange")
            .and_then(|b| b.as_array())
            .unwrap()
            .iter()
            .filter_map(|v| v.as_integer())
            .collect();
        let expected: Vec<i64> = prepared.byte_range().iter().map(|v| *v as i64).collect();
        assert_eq!(byte_range, expected);
    }

    #[test]
    fn test_finalize_without_signature_clears_window() {
        let pdf = one_page_pdf();
        let mut prepared = preparer().prepare(&pdf, &LayoutDescriptor::invisible()).unwrap();
        let before = prepared.as_bytes().to_vec();
        let range = prepared.byte_range();

        prepared.finalize(None).unwrap();
        assert!(prepared.is_placeholder_empty());

        let after = prepared.as_bytes();
        assert_eq!(after.len(), before.len());
        assert_eq!(&after[..range[1]], &before[..range[1]]);
        assert_eq!(&after[range[2]..], &before[range[2]..]);
    }

    #[test]
    fn test_embed_does_not_change_digest() {
        let pdf = one_page_pdf();
        let mut prepared = preparer().prepare(&pdf, &LayoutDescriptor::invisible()).unwrap();
        let before = digest(prepared.range_stream().unwrap()).unwrap();
        prepared.finalize(Some(&[0x30, 0x82, 0x01, 0x00])).unwrap();
        let after = digest(prepared.range_stream().unwrap()).unwrap();
        assert_eq!(before, after);
        assert!(prepared.contents_window().starts_with(b"<30820100000"));
    }

    #[test]
    fn test_oversized_signature_clears_window() {
        let pdf = one_page_pdf();
        let mut prepared = preparer().prepare(&pdf, &LayoutDescriptor::invisible()).unwrap();
        let signature = vec![0xAB; prepared.capacity() + 1];
        let result = prepared.finalize(Some(&signature));
        assert!(matches!(result, Err(Error::PlaceholderOverflow { .. })));
        assert!(prepared.is_placeholder_empty());
    }

    #[test]
    fn test_unparsable_document() {
        let result = prepare(b"not a pdf at all", &LayoutDescriptor::invisible());
        assert!(matches!(result, Err(Error::InvalidHeader)));
    }
}
