//! Read access to an in-memory PDF document.
//!
//! [`PdfDocument`] borrows the original bytes, loads the cross-reference
//! data of every revision and resolves indirect objects on demand. It is
//! read-only: changes are expressed as an incremental update by
//! [`crate::writer::IncrementalUpdate`].

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::objstm::parse_object_stream;
use crate::parser::parse_indirect_object_at;
use crate::xref::{self, CrossRefTable, XRefEntry};
use crate::xref_reconstruction;
use std::collections::{HashMap, HashSet};

/// `%PDF-` must appear within this many leading bytes.
const HEADER_WINDOW: usize = 1024;

/// Depth limit for the page tree walk.
const MAX_PAGE_TREE_DEPTH: usize = 64;

/// A page located in the page tree.
#[derive(Debug, Clone, PartialEq)]
pub struct PageNode {
    /// Indirect reference of the page object
    pub reference: ObjectRef,
    /// The page dictionary as stored in the file
    pub dict: Dictionary,
}

/// A parsed PDF held in memory.
///
/// # Example
///
/// ```no_run
/// use firmador::document::PdfDocument;
///
/// let bytes = std::fs::read("contract.pdf")?;
/// let mut doc = PdfDocument::parse(&bytes)?;
/// println!("{} pages, version {}.{}", doc.page_count()?, doc.version().0, doc.version().1);
/// # Ok::<(), firmador::error::Error>(())
/// ```
pub struct PdfDocument<'a> {
    data: &'a [u8],
    version: (u8, u8),
    xref: CrossRefTable,
    object_cache: HashMap<ObjectRef, Object>,
    objstm_cache: HashMap<u32, Vec<Option<(u32, Object)>>>,
}

impl std::fmt::Debug for PdfDocument<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("len", &self.data.len())
            .field("version", &self.version)
            .field("xref_entries", &self.xref.len())
            .field("xref_stream", &self.xref.is_stream())
            .finish_non_exhaustive()
    }
}

impl<'a> PdfDocument<'a> {
    /// Parse the header and cross-reference data of `data`.
    ///
    /// Offsets are taken relative to the `%PDF-` header. When the recorded
    /// cross-reference data is unreadable or does not lead to the catalog,
    /// the table is rebuilt by scanning the file for objects.
    ///
    /// Encrypted documents are rejected: an incremental update written in
    /// clear text would corrupt them.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let base = header_offset(data)?;
        let version = parse_header(data)?;

        let mut doc = match xref::load_with_base(data, base) {
            Ok(table) => Self::with_xref(data, version, table)?,
            Err(e) => {
                log::warn!("regular xref parsing failed: {}, attempting reconstruction", e);
                Self::with_xref(data, version, xref_reconstruction::reconstruct(data, base)?)?
            },
        };

        if !doc.xref.is_reconstructed() {
            if let Err(e) = doc.catalog() {
                log::warn!("catalog unreachable through xref: {}, attempting reconstruction", e);
                doc = Self::with_xref(data, version, xref_reconstruction::reconstruct(data, base)?)?;
            }
        }
        if !doc.trailer().contains_key("Root") {
            return Err(Error::InvalidPdf("trailer has no /Root".to_string()));
        }

        log::debug!(
            "parsed PDF {}.{}: {} bytes, {} xref entries{}",
            version.0,
            version.1,
            data.len(),
            doc.xref.len(),
            if doc.xref.is_reconstructed() { " (reconstructed)" } else { "" }
        );
        Ok(doc)
    }

    fn with_xref(data: &'a [u8], version: (u8, u8), xref: CrossRefTable) -> Result<Self> {
        if xref.trailer().contains_key("Encrypt") {
            return Err(Error::Unsupported("encrypted documents".to_string()));
        }
        Ok(Self {
            data,
            version,
            xref,
            object_cache: HashMap::new(),
            objstm_cache: HashMap::new(),
        })
    }

    /// Original document bytes.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Header version (major, minor).
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Merged trailer dictionary.
    pub fn trailer(&self) -> &Dictionary {
        self.xref.trailer()
    }

    /// Offset of the newest cross-reference section, relative to the header.
    pub fn startxref(&self) -> usize {
        self.xref.startxref()
    }

    /// Position of the `%PDF-` header; offsets written to the file are
    /// counted from here.
    pub fn base_offset(&self) -> usize {
        self.xref.base()
    }

    /// True if the cross-reference table was rebuilt by scanning the file.
    /// An update to such a document cannot chain to the old sections.
    pub fn is_reconstructed(&self) -> bool {
        self.xref.is_reconstructed()
    }

    /// Every cross-reference entry, by object number.
    pub fn xref_entries(&self) -> impl Iterator<Item = (u32, &XRefEntry)> + '_ {
        self.xref.entries()
    }

    /// True if the newest revision uses a cross-reference stream.
    pub fn uses_xref_stream(&self) -> bool {
        self.xref.is_stream()
    }

    /// First object number available for new objects.
    pub fn next_object_id(&self) -> u32 {
        self.xref.size().max(1)
    }

    /// Load an indirect object.
    pub fn get_object(&mut self, reference: ObjectRef) -> Result<Object> {
        if let Some(cached) = self.object_cache.get(&reference) {
            return Ok(cached.clone());
        }

        let entry = *self
            .xref
            .get(reference.id)
            .ok_or(Error::ObjectNotFound(reference.id, reference.gen))?;

        let object = match entry {
            XRefEntry::Free => return Err(Error::ObjectNotFound(reference.id, reference.gen)),
            XRefEntry::InUse { offset, .. } => {
                let (found, object) = parse_indirect_object_at(self.data, offset)?;
                if found.id != reference.id {
                    return Err(Error::InvalidXref(format!(
                        "offset {} holds object {} instead of {}",
                        offset, found, reference
                    )));
                }
                object
            },
            XRefEntry::Compressed { stream, index } => self.load_compressed(reference, stream, index)?,
        };

        self.object_cache.insert(reference, object.clone());
        Ok(object)
    }

    fn load_compressed(&mut self, reference: ObjectRef, stream: u32, index: u32) -> Result<Object> {
        if !self.objstm_cache.contains_key(&stream) {
            let container = ObjectRef::new(stream, 0);
            if matches!(self.xref.get(stream), Some(XRefEntry::Compressed { .. })) {
                return Err(Error::InvalidXref(format!(
                    "object stream {} is itself compressed",
                    container
                )));
            }
            let stream_obj = self.get_object(container)?;
            let objects = parse_object_stream(&stream_obj)?;
            self.objstm_cache.insert(stream, objects);
        }

        let objects = self
            .objstm_cache
            .get(&stream)
            .ok_or(Error::ObjectNotFound(reference.id, reference.gen))?;

        // Prefer the declared index, fall back to searching by number.
        let by_index = objects
            .get(index as usize)
            .and_then(|o| o.as_ref())
            .filter(|(id, _)| *id == reference.id);
        let found = by_index.or_else(|| objects.iter().flatten().find(|(id, _)| *id == reference.id));

        found
            .map(|(_, object)| object.clone())
            .ok_or(Error::ObjectNotFound(reference.id, reference.gen))
    }

    /// Follow references until a direct object is reached.
    pub fn resolve(&mut self, object: &Object) -> Result<Object> {
        let mut current = object.clone();
        let mut seen = HashSet::new();
        while let Object::Reference(reference) = current {
            if !seen.insert(reference) {
                return Err(Error::CircularReference(reference));
            }
            current = self.get_object(reference)?;
        }
        Ok(current)
    }

    /// Reference of the document catalog.
    pub fn catalog_ref(&self) -> Result<ObjectRef> {
        self.trailer()
            .get("Root")
            .and_then(|r| r.as_reference())
            .ok_or_else(|| Error::InvalidPdf("/Root is not a reference".to_string()))
    }

    /// The document catalog.
    pub fn catalog(&mut self) -> Result<Dictionary> {
        let root = self.catalog_ref()?;
        match self.get_object(root)? {
            Object::Dictionary(dict) => Ok(dict),
            other => Err(Error::InvalidPdf(format!("catalog is a {}", other.type_name()))),
        }
    }

    /// Every page, in document order.
    pub fn pages(&mut self) -> Result<Vec<PageNode>> {
        let catalog = self.catalog()?;
        let root = catalog
            .get("Pages")
            .and_then(|p| p.as_reference())
            .ok_or_else(|| Error::InvalidPdf("catalog has no /Pages reference".to_string()))?;

        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        self.collect_pages(root, &mut visited, &mut pages, 0)?;
        Ok(pages)
    }

    fn collect_pages(
        &mut self,
        node_ref: ObjectRef,
        visited: &mut HashSet<ObjectRef>,
        pages: &mut Vec<PageNode>,
        depth: usize,
    ) -> Result<()> {
        if depth > MAX_PAGE_TREE_DEPTH {
            return Err(Error::InvalidPdf(format!(
                "page tree deeper than {} levels",
                MAX_PAGE_TREE_DEPTH
            )));
        }
        if !visited.insert(node_ref) {
            return Err(Error::CircularReference(node_ref));
        }

        let node = match self.get_object(node_ref)? {
            Object::Dictionary(dict) => dict,
            other => {
                return Err(Error::InvalidPdf(format!(
                    "page tree node {} is a {}",
                    node_ref,
                    other.type_name()
                )))
            },
        };

        let is_leaf = match node.get("Type").and_then(|t| t.as_name()) {
            Some("Page") => true,
            Some("Pages") => false,
            _ => !node.contains_key("Kids"),
        };

        if is_leaf {
            pages.push(PageNode {
                reference: node_ref,
                dict: node,
            });
            return Ok(());
        }

        let kids = match node.get("Kids") {
            Some(kids) => self.resolve(kids)?,
            None => Object::Array(Vec::new()),
        };
        for kid in kids.as_array().map(|k| k.as_slice()).unwrap_or_default() {
            match kid.as_reference() {
                Some(kid_ref) => self.collect_pages(kid_ref, visited, pages, depth + 1)?,
                None => log::warn!("direct object in /Kids of {}, skipping", node_ref),
            }
        }
        Ok(())
    }

    /// Number of pages.
    pub fn page_count(&mut self) -> Result<usize> {
        Ok(self.pages()?.len())
    }

    /// Page by 1-based number.
    pub fn page(&mut self, number: usize) -> Result<PageNode> {
        let mut pages = self.pages()?;
        let count = pages.len();
        if number == 0 || number > count {
            return Err(Error::InvalidPdf(format!("page {} out of range 1..={}", number, count)));
        }
        Ok(pages.swap_remove(number - 1))
    }
}

/// Position of `%PDF-` within the first bytes of the file.
pub fn header_offset(data: &[u8]) -> Result<usize> {
    let window = &data[..data.len().min(HEADER_WINDOW)];
    window
        .windows(5)
        .position(|w| w == b"%PDF-")
        .ok_or(Error::InvalidHeader)
}

/// Locate `%PDF-M.m` within the first bytes of the file.
pub fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let pos = header_offset(data)?;

    let version = &data[pos + 5..];
    match version {
        [major @ b'0'..=b'9', b'.', minor @ b'0'..=b'9', ..] => Ok((major - b'0', minor - b'0')),
        _ => {
            log::warn!("unreadable PDF version after header, assuming 1.4");
            Ok((1, 4))
        },
    }
}
