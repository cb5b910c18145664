//! Signature placeholder preparation.
//!
//! This module reserves room for a signature that is produced elsewhere:
//!
//! - **Layout**: where the signature is rendered, if at all
//! - **Placeholder**: the signature dictionary with fixed-size `/ByteRange`
//!   and `/Contents` windows, added through an incremental update
//! - **ByteRange calculation**: which bytes are covered, and a reader over them
//! - **Digest**: streamed SHA-256 of the covered bytes
//!
//! ## Example
//!
//! ```no_run
//! use firmador::signatures::{digest, prepare, LayoutDescriptor};
//!
//! let pdf = std::fs::read("contract.pdf")?;
//! let mut prepared = prepare(&pdf, &LayoutDescriptor::invisible())?;
//! let hash = digest(prepared.range_stream()?)?;
//! println!("digest: {}", hash.to_base64());
//!
//! // ... obtain a detached CMS signature over `hash` ...
//! # let signature: Vec<u8> = Vec::new();
//! prepared.finalize(Some(&signature))?;
//! std::fs::write("contract-signed.pdf", prepared.into_bytes())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures

mod byterange;
mod certificate;
mod digest;
mod layout;
mod preparer;
mod types;

pub use byterange::{ByteRangeCalculator, ByteRangeStream};
pub use certificate::{EphemeralCertificate, KEY_BITS, PLACEHOLDER_SUBJECT};
pub use digest::{digest, DigestResult};
pub use layout::{LayoutDescriptor, PageSelector, VisibleLayout};
pub use preparer::{prepare, PlaceholderPreparer, PreparedDocument};
pub use types::{SignatureDictionary, SignatureDictionaryBuilder, CONTENTS, FILTER, SUB_FILTER};
