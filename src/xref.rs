//! Cross-reference loader.
//!
//! Maps object numbers to their location in the file. Both classic `xref`
//! tables and cross-reference streams are read, the `/Prev` chain is
//! followed back to the original revision, and hybrid files contribute the
//! stream named by `/XRefStm`. Newer sections win over older ones.
//!
//! Offsets are counted from the `%PDF-` header. When junk precedes the
//! header, the loader is given its position as `base` and every offset
//! read from the file is shifted by it; [`CrossRefTable`] entries always
//! hold absolute positions in the data.

use crate::error::{Error, Result};
use crate::lexer::{is_whitespace, skip_ws, token, Token};
use crate::object::{Dictionary, Object};
use crate::parser::{parse_indirect_object_at, parse_object};
use std::collections::{BTreeMap, HashSet};

/// How far back from the end of file `startxref` is searched for.
const STARTXREF_WINDOW: usize = 2048;

/// Trailer keys inherited from older revisions when the newest lacks them.
const INHERITED_TRAILER_KEYS: [&str; 4] = ["Root", "Info", "ID", "Encrypt"];

/// Where an object lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Free slot
    Free,
    /// Uncompressed object at a byte offset
    InUse {
        /// Byte offset of `N G obj`
        offset: usize,
        /// Generation number
        generation: u16,
    },
    /// Object stored inside an object stream
    Compressed {
        /// Object number of the containing `/ObjStm`
        stream: u32,
        /// Index within the object stream
        index: u32,
    },
}

/// Merged cross-reference data for every revision of a document.
#[derive(Debug, Clone)]
pub struct CrossRefTable {
    entries: BTreeMap<u32, XRefEntry>,
    trailer: Dictionary,
    startxref: usize,
    is_stream: bool,
    base: usize,
    reconstructed: bool,
}

impl CrossRefTable {
    /// Table rebuilt by scanning the file rather than read from it.
    pub(crate) fn rebuilt(
        entries: BTreeMap<u32, XRefEntry>,
        trailer: Dictionary,
        base: usize,
        is_stream: bool,
    ) -> Self {
        Self {
            entries,
            trailer,
            startxref: 0,
            is_stream,
            base,
            reconstructed: true,
        }
    }

    /// Look up an object number.
    pub fn get(&self, id: u32) -> Option<&XRefEntry> {
        self.entries.get(&id)
    }

    /// All known entries, ordered by object number.
    pub fn entries(&self) -> impl Iterator<Item = (u32, &XRefEntry)> + '_ {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    /// Newest trailer, with `/Root`, `/Info`, `/ID` and `/Encrypt`
    /// inherited from older revisions when absent.
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Offset of the newest cross-reference section, as written in the
    /// file (relative to the header).
    pub fn startxref(&self) -> usize {
        self.startxref
    }

    /// Position of the `%PDF-` header in the data.
    pub fn base(&self) -> usize {
        self.base
    }

    /// True when the table was rebuilt by scanning for objects.
    pub fn is_reconstructed(&self) -> bool {
        self.reconstructed
    }

    /// True if the newest section is a cross-reference stream.
    pub fn is_stream(&self) -> bool {
        self.is_stream
    }

    /// Smallest object number not yet allocated by any revision.
    pub fn size(&self) -> u32 {
        let declared = self
            .trailer
            .get("Size")
            .and_then(|s| s.as_integer())
            .filter(|s| *s > 0)
            .map(|s| s as u32)
            .unwrap_or(0);
        let highest = self.entries.keys().next_back().map(|id| id + 1).unwrap_or(0);
        declared.max(highest)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries were read.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One parsed cross-reference section.
struct Section {
    entries: Vec<(u32, XRefEntry)>,
    trailer: Dictionary,
    is_stream: bool,
}

/// Locate the `startxref` offset near the end of the file.
pub fn find_startxref(data: &[u8]) -> Result<usize> {
    let tail_start = data.len().saturating_sub(STARTXREF_WINDOW);
    let tail = &data[tail_start..];
    let keyword = b"startxref";

    let pos = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or_else(|| Error::InvalidXref("startxref not found".to_string()))?;

    match token(&tail[pos + keyword.len()..]) {
        Ok((_, Token::Integer(offset))) if offset >= 0 && (offset as usize) < data.len() => {
            Ok(offset as usize)
        },
        _ => Err(Error::InvalidXref("startxref offset is missing or out of range".to_string())),
    }
}

/// Load and merge every cross-reference section reachable from `startxref`.
pub fn load(data: &[u8]) -> Result<CrossRefTable> {
    load_with_base(data, 0)
}

/// Like [`load`], for files whose header sits `base` bytes into `data`.
pub fn load_with_base(data: &[u8], base: usize) -> Result<CrossRefTable> {
    let startxref = find_startxref(data)?;
    let mut entries = BTreeMap::new();
    let mut trailer: Option<Dictionary> = None;
    let mut is_stream = false;
    let mut visited = HashSet::new();
    let mut pending = vec![startxref + base];

    while let Some(offset) = pending.pop() {
        if !visited.insert(offset) {
            log::warn!("cross-reference loop at offset {}, stopping", offset);
            continue;
        }

        let section = read_section(data, offset)?;
        log::debug!(
            "xref section at {}: {} entries ({})",
            offset,
            section.entries.len(),
            if section.is_stream { "stream" } else { "table" }
        );

        for (id, entry) in section.entries {
            let entry = match entry {
                XRefEntry::InUse { offset, generation } => XRefEntry::InUse {
                    offset: offset + base,
                    generation,
                },
                other => other,
            };
            entries.entry(id).or_insert(entry);
        }

        let prev = offset_entry(&section.trailer, "Prev");
        let hybrid = if section.is_stream {
            None
        } else {
            offset_entry(&section.trailer, "XRefStm")
        };

        match trailer.as_mut() {
            None => {
                is_stream = section.is_stream;
                trailer = Some(section.trailer);
            },
            Some(newest) => {
                for key in INHERITED_TRAILER_KEYS {
                    if let Some(value) = section.trailer.get(key) {
                        newest.entry(key.to_string()).or_insert_with(|| value.clone());
                    }
                }
            },
        }

        // Stack order: the hybrid stream is consulted before /Prev.
        if let Some(prev) = prev {
            pending.push(prev + base);
        }
        if let Some(stm) = hybrid {
            pending.push(stm + base);
        }
    }

    let trailer = trailer.ok_or_else(|| Error::InvalidXref("no trailer found".to_string()))?;
    Ok(CrossRefTable {
        entries,
        trailer,
        startxref,
        is_stream,
        base,
        reconstructed: false,
    })
}

fn offset_entry(dict: &Dictionary, key: &str) -> Option<usize> {
    dict.get(key).and_then(|o| o.as_integer()).filter(|o| *o >= 0).map(|o| o as usize)
}

fn read_section(data: &[u8], offset: usize) -> Result<Section> {
    let at = data
        .get(offset..)
        .ok_or_else(|| Error::InvalidXref(format!("section offset {} beyond end of file", offset)))?;
    let start = at.iter().position(|c| !is_whitespace(*c)).unwrap_or(at.len());
    let body = &at[start..];

    if body.starts_with(b"xref") {
        read_table(data, offset + start)
    } else if body.first().is_some_and(|c| c.is_ascii_digit()) {
        read_stream(data, offset + start)
    } else {
        Err(Error::InvalidXref(format!("no cross-reference section at offset {}", offset)))
    }
}

fn read_uint(input: &[u8]) -> Option<(&[u8], u64)> {
    let digits = input.iter().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let value = std::str::from_utf8(&input[..digits]).ok()?.parse().ok()?;
    Some((&input[digits..], value))
}

fn skip_spaces(input: &[u8]) -> &[u8] {
    skip_ws(input).map(|(rest, _)| rest).unwrap_or(input)
}

/// Classic table:
///
/// ```text
/// xref
/// 0 3
/// 0000000000 65535 f
/// 0000000015 00000 n
/// 0000000074 00000 n
/// trailer
/// << /Size 3 /Root 1 0 R >>
/// ```
fn read_table(data: &[u8], offset: usize) -> Result<Section> {
    let bad = |reason: &str| Error::InvalidXref(format!("{} (table at {})", reason, offset));
    let mut input = &data[offset + b"xref".len()..];
    let mut entries = Vec::new();

    loop {
        input = skip_spaces(input);
        if input.starts_with(b"trailer") {
            input = &input[b"trailer".len()..];
            break;
        }

        let (rest, first) = read_uint(input).ok_or_else(|| bad("expected subsection header"))?;
        let (rest, count) = read_uint(skip_spaces(rest)).ok_or_else(|| bad("expected subsection count"))?;
        input = rest;

        for i in 0..count {
            let (rest, field1) = read_uint(skip_spaces(input)).ok_or_else(|| bad("truncated entry"))?;
            let (rest, field2) = read_uint(skip_spaces(rest)).ok_or_else(|| bad("truncated entry"))?;
            let rest = skip_spaces(rest);
            let kind = *rest.first().ok_or_else(|| bad("truncated entry"))?;
            input = &rest[1..];

            let id = (first + i) as u32;
            let entry = match kind {
                b'n' => XRefEntry::InUse {
                    offset: field1 as usize,
                    generation: field2.min(u16::MAX as u64) as u16,
                },
                b'f' => XRefEntry::Free,
                other => return Err(bad(&format!("unknown entry type '{}'", other as char))),
            };
            entries.push((id, entry));
        }
    }

    let (_, trailer) = parse_object(input).map_err(|_| bad("unreadable trailer"))?;
    let trailer = match trailer {
        Object::Dictionary(dict) => dict,
        _ => return Err(bad("trailer is not a dictionary")),
    };

    Ok(Section {
        entries,
        trailer,
        is_stream: false,
    })
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

fn read_stream(data: &[u8], offset: usize) -> Result<Section> {
    let (_, object) = parse_indirect_object_at(data, offset)?;
    let dict = object
        .as_dict()
        .ok_or_else(|| Error::InvalidXref(format!("object at {} is not a stream", offset)))?;

    if dict.get("Type").and_then(|t| t.as_name()) != Some("XRef") {
        return Err(Error::InvalidXref(format!("object at {} is not /Type /XRef", offset)));
    }

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(|w| w.as_array())
        .map(|w| w.iter().filter_map(|v| v.as_integer()).map(|v| v.max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|w| *w > 8) {
        return Err(Error::InvalidXref("invalid /W in cross-reference stream".to_string()));
    }

    let size = dict.get("Size").and_then(|s| s.as_integer()).unwrap_or(0).max(0) as u64;
    let ranges: Vec<(u64, u64)> = match dict.get("Index").and_then(|i| i.as_array()) {
        Some(index) => index
            .chunks(2)
            .filter_map(|pair| match pair {
                [start, count] => Some((start.as_integer()?.max(0) as u64, count.as_integer()?.max(0) as u64)),
                _ => None,
            })
            .collect(),
        None => vec![(0, size)],
    };

    let decoded = object.decode_stream_data()?;
    let row = widths.iter().sum::<usize>();
    if row == 0 {
        return Err(Error::InvalidXref("zero-width cross-reference stream rows".to_string()));
    }

    let mut rows = decoded.chunks_exact(row);
    let mut entries = Vec::new();
    'ranges: for (start, count) in ranges {
        for i in 0..count {
            let Some(fields) = rows.next() else {
                log::warn!("cross-reference stream at {} is shorter than its /Index", offset);
                break 'ranges;
            };
            let (f1, rest) = fields.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            let kind = if widths[0] == 0 { 1 } else { read_be(f1) };
            let id = (start + i) as u32;

            let entry = match kind {
                0 => XRefEntry::Free,
                1 => XRefEntry::InUse {
                    offset: read_be(f2) as usize,
                    generation: read_be(f3).min(u16::MAX as u64) as u16,
                },
                2 => XRefEntry::Compressed {
                    stream: read_be(f2) as u32,
                    index: read_be(f3) as u32,
                },
                // Unknown types are treated as null references.
                _ => continue,
            };
            entries.push((id, entry));
        }
    }

    Ok(Section {
        entries,
        trailer: stream_trailer(dict),
        is_stream: true,
    })
}

/// Trailer entries of a cross-reference stream dictionary.
pub(crate) fn stream_trailer(dict: &Dictionary) -> Dictionary {
    let mut trailer = dict.clone();
    for key in ["Length", "Filter", "DecodeParms", "W", "Index", "Type"] {
        trailer.remove(key);
    }
    trailer
}
