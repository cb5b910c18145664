//! Error types for the signing pipeline.
//!
//! A single error enum covers the PDF container, the cryptographic primitives
//! and the transport to the remote authority. Classified server answers
//! (invalid password, retryable or terminal rejections) are not errors: they
//! are reported as [`RemoteSignOutcome`](crate::remote::RemoteSignOutcome)
//! values.

/// Result type alias for signing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while preparing, digesting or signing a document.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Mandatory request data is missing or empty (RUT, document bytes)
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Invalid PDF header (expected '%PDF-')
    #[error("Invalid PDF header: expected '%PDF-'")]
    InvalidHeader,

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid cross-reference section
    #[error("Invalid cross-reference table: {0}")]
    InvalidXref(String),

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Circular reference detected in object graph
    #[error("Circular reference detected: object {0}")]
    CircularReference(crate::object::ObjectRef),

    /// Invalid PDF structure (generic)
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Unsupported feature
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// Signature image could not be decoded or embedded
    #[error("Image error: {0}")]
    Image(String),

    /// Signature bytes do not fit in the reserved window
    #[error("Signature ({needed} bytes) exceeds reserved placeholder ({available} bytes)")]
    PlaceholderOverflow {
        /// Bytes required by the signature
        needed: usize,
        /// Bytes reserved in the document
        available: usize,
    },

    /// A cryptographic primitive failed or is unavailable
    #[error("Cryptographic primitive unavailable: {0}")]
    CryptoUnavailable(String),

    /// Key material is empty or unusable
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The encrypted one-time password could not be decrypted
    #[error("Unable to decrypt credential: {0}")]
    CredentialDecrypt(String),

    /// No response was received from the remote authority
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The remote authority answered with a body that does not match its schema
    #[error("Unexpected response: {0}")]
    ResponseSchema(String),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if the error comes from reading or rewriting the PDF container.
    pub fn is_document_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidHeader
                | Error::ParseError { .. }
                | Error::InvalidXref(_)
                | Error::ObjectNotFound(..)
                | Error::CircularReference(_)
                | Error::InvalidPdf(_)
                | Error::Decode(_)
                | Error::Unsupported(_)
        )
    }

    /// Returns true if no response was received from the remote authority.
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = Error::ParseError {
            offset: 1234,
            reason: "invalid token".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("1234"));
        assert!(msg.contains("invalid token"));
    }

    #[test]
    fn test_object_not_found_error() {
        let err = Error::ObjectNotFound(10, 0);
        assert!(err.to_string().contains("10 0 R"));
        assert!(err.is_document_error());
    }

    #[test]
    fn test_placeholder_overflow_display() {
        let err = Error::PlaceholderOverflow {
            needed: 20000,
            available: 15000,
        };
        let msg = err.to_string();
        assert!(msg.contains("20000"));
        assert!(msg.contains("15000"));
        assert!(!err.is_document_error());
    }

    #[test]
    fn test_error_categories() {
        assert!(Error::Transport("connection refused".into()).is_transport_error());
        assert!(!Error::MalformedInput("empty RUT".into()).is_transport_error());
        assert!(Error::InvalidHeader.is_document_error());
        assert!(!Error::CredentialDecrypt("bad padding".into()).is_document_error());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
