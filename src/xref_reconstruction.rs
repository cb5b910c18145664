//! Cross-reference reconstruction for damaged files.
//!
//! When the cross-reference data cannot be read, or does not lead to a
//! catalog, the whole file is scanned for `N G obj` headers. The last
//! definition of an object number wins, as it would in a chain of
//! incremental updates. Members of object streams found by the scan are
//! indexed as compressed entries.
//!
//! Line-ending conversion and bytes prepended by mail gateways are the
//! usual causes: the objects are intact but every recorded offset is off.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::objstm::parse_object_stream;
use crate::parser::{parse_indirect_object_at, parse_object};
use crate::xref::{stream_trailer, CrossRefTable, XRefEntry};
use lazy_static::lazy_static;
use std::collections::BTreeMap;

lazy_static! {
    /// `N G obj` headers
    static ref RE_OBJ_HEADER: regex::bytes::Regex =
        regex::bytes::Regex::new(r"(?-u)\b(\d+)\s+(\d+)\s+obj\b").unwrap();

    /// `trailer <<`
    static ref RE_TRAILER: regex::bytes::Regex = regex::bytes::Regex::new(r"trailer\s*<<").unwrap();
}

/// Keys taken from older trailers when the newest one lacks them.
const CARRIED_TRAILER_KEYS: [&str; 2] = ["Info", "ID"];

/// Rebuild the cross-reference table of `data`, whose header sits `base`
/// bytes in.
///
/// # Errors
///
/// [`Error::InvalidPdf`] when no object header is found or no catalog can
/// be identified.
pub fn reconstruct(data: &[u8], base: usize) -> Result<CrossRefTable> {
    log::info!("reconstructing cross-reference table from {} bytes", data.len());

    let mut entries = BTreeMap::new();
    for (id, generation, offset) in scan_object_headers(data, base) {
        entries.insert(id, XRefEntry::InUse { offset, generation });
    }
    if entries.is_empty() {
        return Err(Error::InvalidPdf("no objects found during xref reconstruction".to_string()));
    }

    let mut trailers = find_trailers(data);
    let mut catalog: Option<ObjectRef> = None;
    let mut saw_xref_stream = false;
    let mut packed: Vec<(u32, u32, u32)> = Vec::new();

    let direct: Vec<(u32, usize, u16)> = entries
        .iter()
        .filter_map(|(id, entry)| match entry {
            XRefEntry::InUse { offset, generation } => Some((*id, *offset, *generation)),
            _ => None,
        })
        .collect();

    for (id, offset, generation) in direct {
        let object = match parse_indirect_object_at(data, offset) {
            Ok((_, object)) => object,
            Err(e) => {
                log::debug!("object {} at offset {} is unreadable: {}", id, offset, e);
                continue;
            },
        };
        let Some(dict) = object.as_dict() else {
            continue;
        };

        match dict.get("Type").and_then(|t| t.as_name()) {
            Some("Catalog") => {
                catalog.get_or_insert(ObjectRef::new(id, generation));
            },
            Some("XRef") => {
                saw_xref_stream = true;
                trailers.push((offset, stream_trailer(dict)));
            },
            Some("ObjStm") => match parse_object_stream(&object) {
                Ok(members) => {
                    for (index, (member, member_obj)) in
                        members.into_iter().enumerate().filter_map(|(i, m)| m.map(|m| (i, m)))
                    {
                        if catalog.is_none() && is_catalog(&member_obj) {
                            catalog = Some(ObjectRef::new(member, 0));
                        }
                        packed.push((member, id, index as u32));
                    }
                },
                Err(e) => log::debug!("object stream {} is unreadable: {}", id, e),
            },
            _ => {},
        }
    }

    for (member, stream, index) in packed {
        entries.entry(member).or_insert(XRefEntry::Compressed { stream, index });
    }

    trailers.sort_by_key(|(offset, _)| *offset);
    let newest = trailers
        .iter()
        .rposition(|(_, t)| root_is_known(t, &entries));

    let mut trailer = match (newest, catalog) {
        (Some(position), _) => {
            log::debug!("using trailer at offset {}", trailers[position].0);
            trailers[position].1.clone()
        },
        (None, Some(root)) => {
            log::info!("no usable trailer, catalog is {}", root);
            let mut dict = Dictionary::new();
            dict.insert("Root".to_string(), Object::Reference(root));
            dict
        },
        (None, None) => {
            return Err(Error::InvalidPdf("could not find catalog in reconstructed xref".to_string()));
        },
    };

    for (_, older) in trailers.iter().rev() {
        for key in CARRIED_TRAILER_KEYS {
            if let Some(value) = older.get(key) {
                trailer.entry(key.to_string()).or_insert_with(|| value.clone());
            }
        }
    }
    trailer.remove("Prev");
    trailer.remove("XRefStm");
    let size = entries.keys().next_back().map(|id| id + 1).unwrap_or(1);
    trailer.insert("Size".to_string(), Object::Integer(size as i64));

    let is_stream = saw_xref_stream || entries.values().any(|e| matches!(e, XRefEntry::Compressed { .. }));
    log::info!(
        "reconstructed xref with {} entries ({})",
        entries.len(),
        if is_stream { "stream" } else { "table" }
    );

    Ok(CrossRefTable::rebuilt(entries, trailer, base, is_stream))
}

/// Every plausible `N G obj` header at or after `base`, in file order.
fn scan_object_headers(data: &[u8], base: usize) -> Vec<(u32, u16, usize)> {
    let mut found = Vec::new();

    for capture in RE_OBJ_HEADER.captures_iter(data) {
        let (Some(header), Some(id), Some(gen)) = (capture.get(0), capture.get(1), capture.get(2)) else {
            continue;
        };
        let offset = header.start();
        if offset < base {
            continue;
        }

        let parsed = std::str::from_utf8(id.as_bytes())
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .zip(std::str::from_utf8(gen.as_bytes()).ok().and_then(|s| s.parse::<u16>().ok()));
        let Some((id, gen)) = parsed else {
            log::warn!("unreadable object header at offset {}", offset);
            continue;
        };

        // A real header is followed by the start of an object; matches in
        // strings or comments usually are not.
        let next = data[header.end()..].iter().copied().find(|c| !c.is_ascii_whitespace());
        if let Some(next) = next {
            let starts_object = matches!(next, b'<' | b'[' | b'(' | b'/' | b't' | b'f' | b'n' | b'-' | b'+' | b'.')
                || next.is_ascii_digit();
            if !starts_object {
                log::debug!("skipping false object header at offset {} (next byte 0x{:02x})", offset, next);
                continue;
            }
        }

        found.push((id, gen, offset));
    }

    found
}

/// Every `trailer << ... >>` dictionary that parses, with its offset.
fn find_trailers(data: &[u8]) -> Vec<(usize, Dictionary)> {
    RE_TRAILER
        .find_iter(data)
        .filter_map(|m| {
            let input = &data[m.start() + b"trailer".len()..];
            match parse_object(input) {
                Ok((_, Object::Dictionary(dict))) => Some((m.start(), dict)),
                _ => {
                    log::warn!("unreadable trailer dictionary at offset {}", m.start());
                    None
                },
            }
        })
        .collect()
}

fn root_is_known(trailer: &Dictionary, entries: &BTreeMap<u32, XRefEntry>) -> bool {
    trailer
        .get("Root")
        .and_then(|r| r.as_reference())
        .is_some_and(|root| entries.contains_key(&root.id))
}

fn is_catalog(object: &Object) -> bool {
    object
        .as_dict()
        .and_then(|d| d.get("Type"))
        .and_then(|t| t.as_name())
        == Some("Catalog")
}
