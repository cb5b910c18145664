//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use firmador::error::Result;
use firmador::remote::{HttpResponse, OutboundRequest, Transport};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Cursor, Write};
use std::sync::Mutex;

/// Builds small PDFs with a catalog (object 1), a page tree (object 2) and
/// `pages` leaf pages (objects 3..).
pub struct TestPdf {
    pages: usize,
    xref_stream: bool,
    catalog_extra: String,
    page_extra: String,
    extra_objects: Vec<String>,
    trailing_newline: bool,
}

impl TestPdf {
    pub fn new() -> Self {
        Self {
            pages: 1,
            xref_stream: false,
            catalog_extra: String::new(),
            page_extra: String::new(),
            extra_objects: Vec::new(),
            trailing_newline: true,
        }
    }

    pub fn pages(mut self, pages: usize) -> Self {
        self.pages = pages;
        self
    }

    /// Use a compressed cross-reference stream instead of a table.
    pub fn xref_stream(mut self) -> Self {
        self.xref_stream = true;
        self
    }

    /// Extra entries for the catalog dictionary.
    pub fn catalog_entries(mut self, entries: &str) -> Self {
        self.catalog_extra = entries.to_string();
        self
    }

    /// Extra entries for every page dictionary.
    pub fn page_entries(mut self, entries: &str) -> Self {
        self.page_extra = entries.to_string();
        self
    }

    /// Append an object; numbered after the pages.
    pub fn object(mut self, body: &str) -> Self {
        self.extra_objects.push(body.to_string());
        self
    }

    /// Number the next [`TestPdf::object`] call will receive.
    pub fn next_object_number(&self) -> usize {
        3 + self.pages + self.extra_objects.len()
    }

    /// Drop the newline after `%%EOF`.
    pub fn without_trailing_newline(mut self) -> Self {
        self.trailing_newline = false;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let kids: Vec<String> = (0..self.pages).map(|i| format!("{} 0 R", 3 + i)).collect();
        let mut objects = vec![
            format!("<< /Type /Catalog /Pages 2 0 R {}>>", self.catalog_extra),
            format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), self.pages),
        ];
        for _ in 0..self.pages {
            objects.push(format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] {}>>",
                self.page_extra
            ));
        }
        objects.extend(self.extra_objects.iter().cloned());

        let mut pdf = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }

        let xref = pdf.len();
        if self.xref_stream {
            let id = objects.len() + 1;
            let mut rows = vec![0, 0, 0, 0, 0, 0xFF, 0xFF];
            for offset in offsets.iter().chain(std::iter::once(&xref)) {
                rows.push(1);
                rows.extend_from_slice(&(*offset as u32).to_be_bytes());
                rows.extend_from_slice(&[0, 0]);
            }
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&rows).unwrap();
            let compressed = encoder.finish().unwrap();
            pdf.extend_from_slice(
                format!(
                    "{} 0 obj\n<< /Type /XRef /Size {} /W [1 4 2] /Root 1 0 R /Filter /FlateDecode /Length {} >>\nstream\n",
                    id,
                    id + 1,
                    compressed.len()
                )
                .as_bytes(),
            );
            pdf.extend_from_slice(&compressed);
            pdf.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF", xref).as_bytes());
        } else {
            pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
            for offset in &offsets {
                pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
            }
            pdf.extend_from_slice(
                format!(
                    "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF",
                    objects.len() + 1,
                    xref
                )
                .as_bytes(),
            );
        }
        if self.trailing_newline {
            pdf.push(b'\n');
        }
        pdf
    }
}

/// A `width` x `height` PNG with a half-transparent red fill.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 20, 20, 128]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut out, image::ImageOutputFormat::Png)
        .unwrap();
    out.into_inner()
}

/// What the fake authority answers with.
pub enum Scripted {
    Respond(u16, String),
    Fail(String),
}

/// In-memory transport that records every request.
pub struct FakeTransport {
    script: Mutex<Vec<Scripted>>,
    pub requests: Mutex<Vec<OutboundRequest>>,
}

impl FakeTransport {
    /// Answers taken in order; the last one repeats.
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(status: u16, body: &str) -> Self {
        Self::new(vec![Scripted::Respond(status, body.to_string())])
    }

    pub fn unreachable() -> Self {
        Self::new(vec![Scripted::Fail("connection refused".to_string())])
    }

    pub fn attempts(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> OutboundRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

impl Transport for FakeTransport {
    fn send(&self, request: &OutboundRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let mut script = self.script.lock().unwrap();
        let next = if script.len() > 1 { script.remove(0) } else { clone_last(&script) };
        match next {
            Scripted::Respond(status, body) => Ok(HttpResponse { status, body }),
            Scripted::Fail(reason) => Err(firmador::Error::Transport(reason)),
        }
    }
}

fn clone_last(script: &[Scripted]) -> Scripted {
    match script.last() {
        Some(Scripted::Respond(status, body)) => Scripted::Respond(*status, body.clone()),
        Some(Scripted::Fail(reason)) => Scripted::Fail(reason.clone()),
        None => Scripted::Fail("no scripted answer".to_string()),
    }
}

/// A successful answer carrying `signature`.
pub fn signed_body(signature: &[u8]) -> String {
    use base64::Engine;
    serde_json::json!({
        "hashes": [{
            "content": base64::engine::general_purpose::STANDARD.encode(signature),
            "status": "OK",
            "contentType": "application/pdf",
            "documentStatus": "SIGNED",
            "hashOriginal": ""
        }],
        "metadata": {"otpExpired": false, "hashesSigned": 1, "signedFailed": 0, "hashesReceived": 1},
        "idSolicitud": 1
    })
    .to_string()
}
