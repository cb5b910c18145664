//! JSON bodies exchanged with the signing authority.

use serde::{Deserialize, Serialize};

/// Media type declared for every submitted hash.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Body of `POST /firma/v2/files/tickets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRequest {
    /// API token key of the requesting institution
    pub api_token_key: String,
    /// Signed bearer assertion
    pub token: String,
    /// Digests to sign
    pub hashes: Vec<HashRequest>,
}

/// One digest to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRequest {
    /// Base64 digest
    pub content: String,
    /// Media type of the hashed document
    #[serde(rename = "content-type")]
    pub content_type: String,
}

impl HashRequest {
    /// Request for a PDF digest.
    pub fn pdf(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: PDF_CONTENT_TYPE.to_string(),
        }
    }
}

/// Successful answer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignatureResponse {
    /// One entry per submitted hash
    pub hashes: Option<Vec<HashResponse>>,
    /// Counters reported by the authority
    pub metadata: Option<Metadata>,
    /// Request identifier assigned by the authority
    #[serde(rename = "idSolicitud")]
    pub id_solicitud: Option<i64>,
}

/// Signature produced for one hash.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashResponse {
    /// Base64 detached CMS signature
    pub content: Option<String>,
    /// Per-hash status
    pub status: Option<String>,
    /// Media type echoed back
    pub content_type: Option<String>,
    /// Document status
    pub document_status: Option<String>,
    /// The submitted digest
    pub hash_original: Option<String>,
}

/// Counters attached to a successful answer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Whether the OTP had expired
    pub otp_expired: Option<bool>,
    /// Number of hashes signed
    pub hashes_signed: Option<i64>,
    /// Number of hashes that failed
    pub signed_failed: Option<i64>,
    /// Number of hashes received
    pub hashes_received: Option<i64>,
}

/// Error answer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error text
    pub error: Option<String>,
}
