//! Incremental update writer.
//!
//! The original bytes are kept unchanged as the prefix of the output. New
//! and replacement objects are appended after them, followed by a
//! cross-reference section of the same kind as the source document and a
//! trailer whose `/Prev` points at the previous section.
//!
//! Offsets are written relative to the `%PDF-` header. When the source
//! table had to be rebuilt, its old sections cannot be trusted, so the new
//! section lists every object and carries no `/Prev`.

use super::ObjectSerializer;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::xref::XRefEntry;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;

/// Field widths of the cross-reference streams written here.
const XREF_STREAM_WIDTHS: [usize; 3] = [1, 4, 2];

/// The result of writing an update.
#[derive(Debug, Clone)]
pub struct WrittenUpdate {
    /// Original bytes followed by the update
    pub bytes: Vec<u8>,
    /// Offset of each appended object (`N G obj`), by object number
    pub offsets: BTreeMap<u32, usize>,
}

impl WrittenUpdate {
    /// Offset of the body of an appended object, just after `N G obj\n`.
    pub fn body_offset(&self, reference: ObjectRef) -> Option<usize> {
        self.offsets
            .get(&reference.id)
            .map(|offset| offset + format!("{} {} obj\n", reference.id, reference.gen).len())
    }
}

/// Collects objects to append to a document.
#[derive(Debug)]
pub struct IncrementalUpdate<'a> {
    original: &'a [u8],
    base: usize,
    prev: Option<usize>,
    carried: BTreeMap<u32, XRefEntry>,
    as_stream: bool,
    next_id: u32,
    trailer: Dictionary,
    objects: BTreeMap<u32, (u16, Vec<u8>)>,
    serializer: ObjectSerializer,
}

impl<'a> IncrementalUpdate<'a> {
    /// Start an update on top of `doc`.
    pub fn new(doc: &PdfDocument<'a>) -> Self {
        let mut trailer = Dictionary::new();
        for key in ["Root", "Info", "ID"] {
            if let Some(value) = doc.trailer().get(key) {
                trailer.insert(key.to_string(), value.clone());
            }
        }

        let (prev, carried) = if doc.is_reconstructed() {
            let mut carried: BTreeMap<u32, XRefEntry> = doc
                .xref_entries()
                .filter(|(_, entry)| !matches!(entry, XRefEntry::Free))
                .map(|(id, entry)| (id, *entry))
                .collect();
            carried.insert(0, XRefEntry::Free);
            (None, carried)
        } else {
            (Some(doc.startxref()), BTreeMap::new())
        };

        Self {
            original: doc.data(),
            base: doc.base_offset(),
            prev,
            carried,
            as_stream: doc.uses_xref_stream(),
            next_id: doc.next_object_id(),
            trailer,
            objects: BTreeMap::new(),
            serializer: ObjectSerializer::compact(),
        }
    }

    /// Reserve a fresh object number.
    pub fn allocate(&mut self) -> ObjectRef {
        let reference = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        reference
    }

    /// Append (or replace) an object.
    pub fn put(&mut self, reference: ObjectRef, object: &Object) {
        let body = self.serializer.serialize(object);
        self.put_raw(reference, body);
    }

    /// Append an object whose body is already serialized.
    pub fn put_raw(&mut self, reference: ObjectRef, body: Vec<u8>) {
        self.objects.insert(reference.id, (reference.gen, body));
    }

    /// True if the update will end with a cross-reference stream.
    pub fn writes_xref_stream(&self) -> bool {
        self.as_stream
    }

    /// Write the original bytes, the appended objects and the new
    /// cross-reference section.
    pub fn write(mut self) -> Result<WrittenUpdate> {
        let xref_stream_ref = if self.as_stream {
            Some(self.allocate())
        } else {
            None
        };
        let size = self.next_id;

        let appended: usize = self.objects.values().map(|(_, body)| body.len() + 32).sum();
        let mut out = Vec::with_capacity(self.original.len() + appended + 1024);
        out.extend_from_slice(self.original);
        if !self.original.ends_with(b"\n") && !self.original.ends_with(b"\r") {
            out.push(b'\n');
        }

        let mut offsets = BTreeMap::new();
        let mut entries = std::mem::take(&mut self.carried);
        for (id, (gen, body)) in &self.objects {
            let offset = out.len();
            out.extend_from_slice(format!("{} {} obj\n", id, gen).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
            offsets.insert(*id, offset);
            entries.insert(
                *id,
                XRefEntry::InUse {
                    offset,
                    generation: *gen,
                },
            );
        }

        let mut trailer = self.trailer.clone();
        trailer.insert("Size".to_string(), Object::Integer(size as i64));
        if let Some(prev) = self.prev {
            trailer.insert("Prev".to_string(), Object::Integer(prev as i64));
        }
        if !trailer.contains_key("ID") {
            let id = Object::String(file_id(self.original));
            trailer.insert("ID".to_string(), Object::Array(vec![id.clone(), id]));
        }

        let xref_offset = out.len();
        match xref_stream_ref {
            Some(reference) => {
                entries.insert(
                    reference.id,
                    XRefEntry::InUse {
                        offset: xref_offset,
                        generation: reference.gen,
                    },
                );
                let stream = xref_stream(&entries, self.base, trailer)?;
                let bytes = self.serializer.serialize_indirect(reference.id, reference.gen, &stream);
                out.extend_from_slice(&bytes);
                offsets.insert(reference.id, xref_offset);
            },
            None => write_xref_table(&mut out, &entries, self.base, &self.serializer, &trailer)?,
        }

        out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset - self.base).as_bytes());

        log::debug!(
            "incremental update: {} objects, {} xref entries {} at {}{}, {} -> {} bytes",
            self.objects.len(),
            entries.len(),
            if self.as_stream { "stream" } else { "table" },
            xref_offset,
            if self.prev.is_none() { " (full rewrite)" } else { "" },
            self.original.len(),
            out.len()
        );

        Ok(WrittenUpdate { bytes: out, offsets })
    }
}

/// Consecutive object numbers grouped into subsections: (first, count).
fn subsections(ids: &[u32]) -> Vec<(u32, u32)> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();

    let mut groups: Vec<(u32, u32)> = Vec::new();
    for id in ids {
        match groups.last_mut() {
            Some((first, count)) if *first + *count == id => *count += 1,
            _ => groups.push((id, 1)),
        }
    }
    groups
}

fn write_xref_table(
    out: &mut Vec<u8>,
    entries: &BTreeMap<u32, XRefEntry>,
    base: usize,
    serializer: &ObjectSerializer,
    trailer: &Dictionary,
) -> Result<()> {
    let ids: Vec<u32> = entries.keys().copied().collect();

    out.extend_from_slice(b"xref\n");
    for (first, count) in subsections(&ids) {
        out.extend_from_slice(format!("{} {}\n", first, count).as_bytes());
        for id in first..first + count {
            match entries.get(&id) {
                Some(XRefEntry::InUse { offset, generation }) => out.extend_from_slice(
                    format!("{:010} {:05} n\r\n", offset.saturating_sub(base), generation).as_bytes(),
                ),
                Some(XRefEntry::Free) => out.extend_from_slice(b"0000000000 65535 f\r\n"),
                Some(XRefEntry::Compressed { .. }) => {
                    return Err(Error::Unsupported(format!(
                        "object {} lives in an object stream and cannot be listed in a cross-reference table",
                        id
                    )))
                },
                None => {},
            }
        }
    }
    out.extend_from_slice(b"trailer\n");
    out.extend_from_slice(&serializer.serialize(&Object::Dictionary(trailer.clone())));
    out.push(b'\n');
    Ok(())
}

fn xref_stream(entries: &BTreeMap<u32, XRefEntry>, base: usize, mut dict: Dictionary) -> Result<Object> {
    let ids: Vec<u32> = entries.keys().copied().collect();
    let groups = subsections(&ids);
    let too_large = |what: &str| Error::Unsupported(format!("{} too large for a cross-reference stream", what));

    let mut rows = Vec::with_capacity(entries.len() * XREF_STREAM_WIDTHS.iter().sum::<usize>());
    for entry in entries.values() {
        match entry {
            XRefEntry::Free => {
                rows.push(0u8);
                rows.extend_from_slice(&[0, 0, 0, 0, 0xFF, 0xFF]);
            },
            XRefEntry::InUse { offset, generation } => {
                let offset = u32::try_from(offset.saturating_sub(base)).map_err(|_| too_large("offset"))?;
                rows.push(1u8);
                rows.extend_from_slice(&offset.to_be_bytes());
                rows.extend_from_slice(&generation.to_be_bytes());
            },
            XRefEntry::Compressed { stream, index } => {
                let index = u16::try_from(*index).map_err(|_| too_large("object stream index"))?;
                rows.push(2u8);
                rows.extend_from_slice(&stream.to_be_bytes());
                rows.extend_from_slice(&index.to_be_bytes());
            },
        }
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&rows)?;
    let compressed = encoder.finish()?;

    let index = groups
        .iter()
        .flat_map(|(first, count)| [Object::Integer(*first as i64), Object::Integer(*count as i64)])
        .collect();
    dict.insert("Type".to_string(), Object::name("XRef"));
    dict.insert(
        "W".to_string(),
        Object::Array(XREF_STREAM_WIDTHS.iter().map(|w| Object::Integer(*w as i64)).collect()),
    );
    dict.insert("Index".to_string(), Object::Array(index));
    dict.insert("Filter".to_string(), Object::name("FlateDecode"));

    Ok(Object::Stream {
        dict,
        data: bytes::Bytes::from(compressed),
    })
}

/// First 16 bytes of the SHA-256 of the document.
fn file_id(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data)[..16].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xref;

    fn base_pdf() -> Vec<u8> {
        let mut pdf = b"%PDF-1.4\n".to_vec();
        let obj1 = pdf.len();
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        let obj2 = pdf.len();
        pdf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n");
        let xref = pdf.len();
        pdf.extend_from_slice(
            format!(
                "xref\n0 3\n0000000000 65535 f \n{:010} 00000 n \n{:010} 00000 n \ntrailer\n<< /Size 3 /Root 1 0 R >>\nstartxref\n{}\n%%EOF",
                obj1, obj2, xref
            )
            .as_bytes(),
        );
        pdf
    }

    #[test]
    fn test_subsections() {
        assert_eq!(subsections(&[3, 4, 7, 5]), vec![(3, 3), (7, 1)]);
    }

    #[test]
    fn test_update_preserves_prefix_and_chains() {
        let pdf = base_pdf();
        let doc = PdfDocument::parse(&pdf).unwrap();
        let mut update = IncrementalUpdate::new(&doc);
        let new_ref = update.allocate();
        assert_eq!(new_ref, ObjectRef::new(3, 0));
        update.put(new_ref, &Object::Integer(42));
        let pages = ObjectSerializer::dict(vec![
            ("Type", Object::name("Pages")),
            ("Count", Object::Integer(0)),
            ("Kids", Object::Array(vec![])),
        ]);
        update.put(ObjectRef::new(2, 0), &pages);

        let written = update.write().unwrap();
        assert!(written.bytes.starts_with(&pdf));
        assert!(written.bytes.ends_with(b"%%EOF\n"));

        let table = xref::load(&written.bytes).unwrap();
        assert_eq!(table.get(3), Some(&XRefEntry::InUse { offset: written.offsets[&3], generation: 0 }));
        assert_eq!(table.get(2), Some(&XRefEntry::InUse { offset: written.offsets[&2], generation: 0 }));
        assert_eq!(table.trailer().get("Size").and_then(|s| s.as_integer()), Some(4));
        assert_eq!(table.trailer().get("Prev").and_then(|s| s.as_integer()), Some(doc.startxref() as i64));
        assert!(table.trailer().contains_key("ID"));

        let body = written.body_offset(new_ref).unwrap();
        assert!(written.bytes[body..].starts_with(b"42\nendobj"));
    }

    #[test]
    fn test_update_on_xref_stream_writes_stream() {
        let first = base_pdf();
        let doc = PdfDocument::parse(&first).unwrap();
        let mut update = IncrementalUpdate::new(&doc);
        update.as_stream = true;
        let r = update.allocate();
        update.put(r, &Object::Boolean(true));
        let written = update.write().unwrap();

        let reparsed = PdfDocument::parse(&written.bytes).unwrap();
        assert!(reparsed.uses_xref_stream());
        assert_eq!(reparsed.next_object_id(), 5);
    }

    #[test]
    fn test_offsets_are_relative_to_header() {
        let mut pdf = b"\xEF\xBB\xBF".to_vec();
        pdf.extend_from_slice(&base_pdf());
        let doc = PdfDocument::parse(&pdf).unwrap();
        let mut update = IncrementalUpdate::new(&doc);
        let r = update.allocate();
        update.put(r, &Object::Integer(7));
        let written = update.write().unwrap();

        assert!(xref::load(&written.bytes).is_err());
        let table = xref::load_with_base(&written.bytes, 3).unwrap();
        assert_eq!(table.get(3), Some(&XRefEntry::InUse { offset: written.offsets[&3], generation: 0 }));
        assert_eq!(table.trailer().get("Prev").and_then(|p| p.as_integer()), Some(doc.startxref() as i64));
    }

    #[test]
    fn test_reconstructed_source_gets_full_table() {
        let pdf = String::from_utf8(base_pdf()).unwrap().replace('\n', "\r\n").into_bytes();
        let doc = PdfDocument::parse(&pdf).unwrap();
        assert!(doc.is_reconstructed());

        let mut update = IncrementalUpdate::new(&doc);
        let r = update.allocate();
        update.put(r, &Object::Integer(7));
        let written = update.write().unwrap();
        assert!(written.bytes.starts_with(&pdf));

        let table = xref::load(&written.bytes).unwrap();
        assert!(!table.trailer().contains_key("Prev"));
        assert_eq!(table.get(0), Some(&XRefEntry::Free));
        for id in 1..=2 {
            let Some(XRefEntry::InUse { offset, .. }) = table.get(id) else {
                panic!("object {} missing from rewritten table", id);
            };
            assert!(written.bytes[*offset..].starts_with(format!("{} 0 obj", id).as_bytes()));
        }

        let mut reparsed = PdfDocument::parse(&written.bytes).unwrap();
        assert!(!reparsed.is_reconstructed());
        assert_eq!(reparsed.get_object(r).unwrap(), Object::Integer(7));
    }
}
