#![allow(clippy::too_many_arguments)]
#![allow(clippy::enum_variant_names)]
#![cfg_attr(test, allow(dead_code))]

//! # Firmador
//!
//! Remote hash signing for PDF documents.
//!
//! The document never leaves the service. Instead:
//!
//! 1. a signature field with a fixed-size `/Contents` window is appended
//!    as an incremental update;
//! 2. the bytes outside that window are hashed with SHA-256;
//! 3. the hash is sent to the remote signing authority together with a
//!    short-lived HS256 assertion identifying the signer (and, for attended
//!    requests, the signer's one-time password);
//! 4. the detached CMS signature returned by the authority is written into
//!    the window. On any failure the window is cleared instead.
//!
//! ## Quick Start
//!
//! ```no_run
//! use firmador::{Orchestrator, SignerConfig, SigningRequest};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SignerConfig::from_env()?;
//! let orchestrator = Orchestrator::from_config(&config)?;
//!
//! let request = SigningRequest::new("0123456785", std::fs::read("contract.pdf")?);
//! let reply = orchestrator.sign(&request);
//! if let Some(file) = reply.file {
//!     std::fs::write("contract-signed.pdf", file)?;
//! } else {
//!     eprintln!("{} (retry: {})", reply.message, reply.retry);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Lower-level pieces
//!
//! - [`signatures`]: placeholder preparation, byte ranges and digests
//! - [`assertion`]: bearer assertions
//! - [`remote`]: the authority's HTTP API and response classification
//! - [`document`] and [`writer`]: reading PDFs and appending incremental updates

#![warn(missing_docs)]

// Error handling
pub mod error;

// Configuration
pub mod config;

// Core PDF parsing
pub mod document;
pub mod lexer;
pub mod object;
pub mod objstm;
pub mod parser;
pub mod xref;
pub mod xref_reconstruction;

// Stream decoders
pub mod decoders;

// Incremental updates
pub mod writer;

// Signature placeholders and digests
pub mod signatures;

// Remote signing
pub mod assertion;
pub mod credential;
pub mod remote;

// End-to-end flow
pub mod orchestrator;

pub use config::SignerConfig;
pub use document::PdfDocument;
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, SignReply, SigningRequest, VisibleSignature};
pub use remote::RemoteSignOutcome;
pub use signatures::{LayoutDescriptor, PreparedDocument};

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with("0."));
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "firmador");
    }
}
