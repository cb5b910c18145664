//! End-to-end signing of one document.
//!
//! ```text
//! decrypt credential -> build layout -> prepare placeholder -> digest
//!     -> issue assertion -> call remote authority -> finalize
//! ```
//!
//! [`Orchestrator::sign`] never fails: every error is folded into the
//! [`SignReply`]. Once a placeholder exists the document is always
//! finalized, either with the remote signature or with an empty window.

use crate::assertion::{normalize_rut, AssertionIssuer};
use crate::config::SignerConfig;
use crate::credential::decrypt_credential;
use crate::error::{Error, Result};
use crate::remote::{HttpTransport, RemoteSignOutcome, RemoteSigningClient, Transport};
use crate::signatures::{digest, LayoutDescriptor, PlaceholderPreparer, PreparedDocument};

/// Image and placement of a visible signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibleSignature {
    /// Raw image bytes (PNG, JPEG, ...)
    pub image: Vec<u8>,
    /// Lower-left x
    pub llx: i32,
    /// Lower-left y
    pub lly: i32,
    /// Upper-right x
    pub urx: i32,
    /// Upper-right y
    pub ury: i32,
    /// 1-based page; zero or negative for the last page
    pub page: i32,
}

/// One signing request.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SigningRequest {
    /// Signer's RUT
    pub rut: String,
    /// Base64 RSA-encrypted one-time password
    pub encrypted_password: Option<String>,
    /// PDF to sign
    pub file: Vec<u8>,
    /// Whether a person is present to supply an OTP
    pub attended: bool,
    /// Visible signature; invisible when absent or without image
    pub signature: Option<VisibleSignature>,
}

impl std::fmt::Debug for SigningRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningRequest")
            .field("rut", &self.rut)
            .field("encrypted_password", &self.encrypted_password.as_ref().map(|_| "[REDACTED]"))
            .field("file_len", &self.file.len())
            .field("attended", &self.attended)
            .field("signature", &self.signature.as_ref().map(|s| (s.llx, s.lly, s.urx, s.ury, s.page)))
            .finish()
    }
}

impl SigningRequest {
    /// Unattended request for an invisible signature.
    pub fn new(rut: impl Into<String>, file: Vec<u8>) -> Self {
        Self {
            rut: rut.into(),
            file,
            ..Self::default()
        }
    }

    /// Attach an encrypted OTP and mark the request attended.
    pub fn with_password(mut self, encrypted_password: impl Into<String>) -> Self {
        self.encrypted_password = Some(encrypted_password.into());
        self.attended = true;
        self
    }

    /// Set the attended flag.
    pub fn attended(mut self, attended: bool) -> Self {
        self.attended = attended;
        self
    }

    /// Request a visible signature.
    pub fn with_signature(mut self, signature: VisibleSignature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Layout for this request.
    pub fn layout(&self) -> LayoutDescriptor {
        match &self.signature {
            Some(s) if !s.image.is_empty() => LayoutDescriptor::visible(s.llx, s.lly, s.urx, s.ury, s.page, &s.image),
            _ => LayoutDescriptor::invisible(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.rut.trim().is_empty() {
            return Err(Error::MalformedInput("Got null or empty RUT".to_string()));
        }
        if self.file.is_empty() {
            return Err(Error::MalformedInput("Got null or empty file".to_string()));
        }
        normalize_rut(&self.rut)?;
        Ok(())
    }
}

/// Result of a signing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignReply {
    /// The document was signed
    pub success: bool,
    /// The OTP was rejected
    pub invalid_password: bool,
    /// The authority failed; the whole request may be retried later
    pub retry: bool,
    /// Human-readable outcome
    pub message: String,
    /// Signed document, only on success
    pub file: Option<Vec<u8>>,
}

/// Build the reply from the final outcome and the finalized document.
///
/// The document is only returned with a successful outcome.
pub fn reduce(outcome: RemoteSignOutcome, document: Option<Vec<u8>>) -> SignReply {
    let message = outcome.message().to_string();
    match (outcome, document) {
        (RemoteSignOutcome::Success { .. }, Some(file)) => SignReply {
            success: true,
            message,
            file: Some(file),
            ..SignReply::default()
        },
        (RemoteSignOutcome::Success { .. }, None) => SignReply {
            message: "Signed document is unavailable".to_string(),
            ..SignReply::default()
        },
        (RemoteSignOutcome::InvalidPassword { .. }, _) => SignReply {
            invalid_password: true,
            message,
            ..SignReply::default()
        },
        (RemoteSignOutcome::Retryable { .. }, _) => SignReply {
            retry: true,
            message,
            ..SignReply::default()
        },
        (RemoteSignOutcome::Terminal { .. }, _) => SignReply {
            message,
            ..SignReply::default()
        },
    }
}

/// Runs signing requests against one authority.
///
/// Holds no per-request state; one orchestrator can serve concurrent
/// requests from several threads when its transport is `Sync`.
#[derive(Debug)]
pub struct Orchestrator<T = HttpTransport> {
    private_key_path: std::path::PathBuf,
    preparer: PlaceholderPreparer,
    issuer: AssertionIssuer,
    client: RemoteSigningClient<T>,
}

impl Orchestrator<HttpTransport> {
    /// Orchestrator talking HTTP to the configured authority.
    pub fn from_config(config: &SignerConfig) -> Result<Self> {
        Self::with_transport(config, HttpTransport::new(config.timeout)?)
    }
}

impl<T: Transport> Orchestrator<T> {
    /// Orchestrator using `transport` for the remote call.
    pub fn with_transport(config: &SignerConfig, transport: T) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            private_key_path: config.private_key_path.clone(),
            preparer: PlaceholderPreparer::new(),
            issuer: AssertionIssuer::from_config(config)?,
            client: RemoteSigningClient::with_transport(config, transport)?,
        })
    }

    /// Replace the placeholder preparer.
    pub fn with_preparer(mut self, preparer: PlaceholderPreparer) -> Self {
        self.preparer = preparer;
        self
    }

    /// The remote client.
    pub fn client(&self) -> &RemoteSigningClient<T> {
        &self.client
    }

    /// Sign one document.
    pub fn sign(&self, request: &SigningRequest) -> SignReply {
        log::info!("signing request for {} ({} bytes)", request.rut, request.file.len());

        let mut prepared = None;
        let outcome = match self.run(request, &mut prepared) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Unable to sign: {}", e);
                RemoteSignOutcome::Terminal { message: e.to_string() }
            },
        };

        let (outcome, document) = finalize(outcome, prepared);
        let reply = reduce(outcome, document);
        log::info!(
            "request for {} finished: success={} invalid_password={} retry={}",
            request.rut,
            reply.success,
            reply.invalid_password,
            reply.retry
        );
        reply
    }

    fn run(&self, request: &SigningRequest, prepared: &mut Option<PreparedDocument>) -> Result<RemoteSignOutcome> {
        request.validate()?;
        let otp = decrypt_credential(request.encrypted_password.as_deref(), &self.private_key_path)?;
        let layout = request.layout();

        let document = prepared.insert(self.preparer.prepare(&request.file, &layout)?);
        let digest = digest(document.range_stream()?)?;
        log::debug!(
            "field {} on page {}, byte range {:?}",
            document.field_name(),
            document.page(),
            document.byte_range()
        );

        let assertion = self.issuer.issue(&request.rut, request.attended)?;
        Ok(self
            .client
            .send_with_retry(&digest, &assertion, otp.as_ref(), request.attended))
    }
}

/// Close the placeholder: embed on success, clear otherwise.
///
/// A signature that does not fit turns the outcome into a failure.
fn finalize(outcome: RemoteSignOutcome, prepared: Option<PreparedDocument>) -> (RemoteSignOutcome, Option<Vec<u8>>) {
    let Some(mut document) = prepared else {
        return (outcome, None);
    };

    let signature = match &outcome {
        RemoteSignOutcome::Success { signature } => Some(signature.as_slice()),
        _ => None,
    };
    match document.finalize(signature) {
        Ok(()) if outcome.is_success() => (outcome, Some(document.into_bytes())),
        Ok(()) => (outcome, None),
        Err(e) => {
            log::error!("Unable to finalize document: {}", e);
            (RemoteSignOutcome::Terminal { message: e.to_string() }, None)
        },
    }
}
