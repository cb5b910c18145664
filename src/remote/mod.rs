//! Client for the remote signing authority.
//!
//! A request carries one SHA-256 digest and a bearer assertion; a
//! successful answer carries the detached signature for that digest.
//! Every HTTP answer is classified into a [`RemoteSignOutcome`]. Only the
//! absence of an answer (connection failure, timeout) is retried.

mod models;

pub use models::{
    ErrorResponse, HashRequest, HashResponse, Metadata, SignatureRequest, SignatureResponse, PDF_CONTENT_TYPE,
};

use crate::assertion::Assertion;
use crate::config::SignerConfig;
use crate::credential::OneTimePassword;
use crate::error::{Error, Result};
use crate::signatures::DigestResult;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

/// Answers to 400/412 that mean the OTP was wrong.
pub const INVALID_OTP_MESSAGES: [&str; 3] = [
    "El OTP ingresado no es válido",
    "ERROR : Verificación de OTP fallido. Por favor vuelve a intentar",
    "El OTP ingresado no es válido. Favor validar la configuración de su dispositivo e intentar nuevamente",
];

/// A 5xx answer with this text is a rejected request, not a server fault.
///
/// The authority reports malformed content or layout with a 500; retrying
/// cannot succeed. Only this exact text is treated this way.
pub const LAYOUT_ERROR_MESSAGE: &str = "ERROR : Formato de contenido o layout incorrecto";

/// Result of one exchange with the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSignOutcome {
    /// The authority signed the digest
    Success {
        /// Decoded signature bytes
        signature: Vec<u8>,
    },
    /// The OTP was rejected
    InvalidPassword {
        /// `"<code> - <error>"`
        message: String,
    },
    /// A server-side failure; the whole operation may be tried again later
    Retryable {
        /// `"<code> - <error>"`
        message: String,
    },
    /// Any other failure
    Terminal {
        /// Description of the failure
        message: String,
    },
}

impl RemoteSignOutcome {
    /// True for [`RemoteSignOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, RemoteSignOutcome::Success { .. })
    }

    /// Human-readable message; fixed text for success.
    pub fn message(&self) -> &str {
        match self {
            RemoteSignOutcome::Success { .. } => "We are ready!",
            RemoteSignOutcome::InvalidPassword { message }
            | RemoteSignOutcome::Retryable { message }
            | RemoteSignOutcome::Terminal { message } => message,
        }
    }
}

/// An HTTP request ready to be sent.
#[derive(Clone)]
pub struct OutboundRequest {
    /// Endpoint URL
    pub url: String,
    /// Value of the `OTP` header, if any
    pub otp: Option<String>,
    /// JSON body
    pub body: String,
}

impl std::fmt::Debug for OutboundRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundRequest")
            .field("url", &self.url)
            .field("otp", &self.otp.as_ref().map(|_| "[REDACTED]"))
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Status and body of an HTTP answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Body text
    pub body: String,
}

/// Sends requests to the authority.
///
/// An `Err` means no answer was received at all; any answer, whatever its
/// status, is `Ok`.
pub trait Transport {
    /// Send one request.
    fn send(&self, request: &OutboundRequest) -> Result<HttpResponse>;
}

/// Blocking HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Transport whose connection and request each time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &OutboundRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .post(&request.url)
            .header(CONTENT_TYPE, "application/json")
            .body(request.body.clone());
        if let Some(otp) = &request.otp {
            builder = builder.header("OTP", otp.as_str());
        }

        let response = builder.send().map_err(|e| Error::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| Error::Transport(format!("reading response body: {}", e)))?;
        log::trace!("Signature Response: {}", body);
        Ok(HttpResponse { status, body })
    }
}

/// Client for the signing endpoint.
pub struct RemoteSigningClient<T = HttpTransport> {
    transport: T,
    endpoint: String,
    api_token_key: String,
    max_attempts: u32,
    backoff: Duration,
}

impl<T> std::fmt::Debug for RemoteSigningClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSigningClient")
            .field("endpoint", &self.endpoint)
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl RemoteSigningClient<HttpTransport> {
    /// HTTP client for the configured authority.
    pub fn from_config(config: &SignerConfig) -> Result<Self> {
        Self::with_transport(config, HttpTransport::new(config.timeout)?)
    }
}

impl<T: Transport> RemoteSigningClient<T> {
    /// Client using `transport` instead of HTTP.
    pub fn with_transport(config: &SignerConfig, transport: T) -> Result<Self> {
        Ok(Self {
            transport,
            endpoint: config.endpoint()?.to_string(),
            api_token_key: config.api_token_key.clone(),
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff,
        })
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Build the request for `digest`.
    ///
    /// The `OTP` header is only set for attended requests that carry a password.
    pub fn build_request(
        &self,
        digest: &DigestResult,
        assertion: &Assertion,
        otp: Option<&OneTimePassword>,
        attended: bool,
    ) -> Result<OutboundRequest> {
        let body = SignatureRequest {
            api_token_key: self.api_token_key.clone(),
            token: assertion.token(),
            hashes: vec![HashRequest::pdf(digest.to_base64())],
        };
        let body = serde_json::to_string(&body)
            .map_err(|e| Error::MalformedInput(format!("signature request: {}", e)))?;

        Ok(OutboundRequest {
            url: self.endpoint.clone(),
            otp: otp
                .filter(|_| attended)
                .map(|otp| otp.expose().trim().to_string()),
            body,
        })
    }

    /// One attempt. `Err` only when no answer was received.
    pub fn send(
        &self,
        digest: &DigestResult,
        assertion: &Assertion,
        otp: Option<&OneTimePassword>,
        attended: bool,
    ) -> Result<RemoteSignOutcome> {
        let request = self.build_request(digest, assertion, otp, attended)?;
        log::debug!("requesting signature for digest {}", digest.to_base64());
        let response = self.transport.send(&request)?;
        Ok(classify(&response))
    }

    /// Send, retrying while no answer is received.
    ///
    /// Attempts stop at the first answer of any status. When every attempt
    /// fails to get an answer the outcome is [`RemoteSignOutcome::Terminal`]
    /// with the last failure: the retries have already been spent.
    pub fn send_with_retry(
        &self,
        digest: &DigestResult,
        assertion: &Assertion,
        otp: Option<&OneTimePassword>,
        attended: bool,
    ) -> RemoteSignOutcome {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.send(digest, assertion, otp, attended) {
                Ok(outcome) => return outcome,
                Err(e) if e.is_transport_error() => {
                    log::warn!("attempt {}/{} failed: {}", attempt, self.max_attempts, e);
                    last_error = e.to_string();
                },
                Err(e) => return RemoteSignOutcome::Terminal { message: e.to_string() },
            }
            if attempt < self.max_attempts {
                std::thread::sleep(self.backoff);
            }
        }

        log::error!("Unable to send request ({})", last_error);
        RemoteSignOutcome::Terminal { message: last_error }
    }
}

/// Map an answer to an outcome.
pub fn classify(response: &HttpResponse) -> RemoteSignOutcome {
    if response.status == 200 {
        return match signature_from_body(&response.body) {
            Ok(signature) => RemoteSignOutcome::Success { signature },
            Err(e) => {
                log::warn!("unusable signature response: {}", e);
                RemoteSignOutcome::Terminal { message: e.to_string() }
            },
        };
    }

    let error = serde_json::from_str::<ErrorResponse>(&response.body)
        .ok()
        .and_then(|e| e.error)
        .unwrap_or_else(|| reason_phrase(response.status).to_string());
    log::warn!("Got invalid status code {} ({})", response.status, error);
    let message = format!("{} - {}", response.status, error);

    match response.status {
        400 | 412 if INVALID_OTP_MESSAGES.contains(&error.as_str()) => RemoteSignOutcome::InvalidPassword { message },
        status if status >= 500 && error != LAYOUT_ERROR_MESSAGE => RemoteSignOutcome::Retryable { message },
        _ => RemoteSignOutcome::Terminal { message },
    }
}

fn signature_from_body(body: &str) -> Result<Vec<u8>> {
    let response: SignatureResponse =
        serde_json::from_str(body).map_err(|e| Error::ResponseSchema(format!("invalid JSON: {}", e)))?;
    let hash = response
        .hashes
        .and_then(|hashes| hashes.into_iter().next())
        .ok_or_else(|| Error::ResponseSchema("Got null or empty hashes".to_string()))?;
    let content = hash
        .content
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::ResponseSchema("Got null or empty content".to_string()))?;
    STANDARD
        .decode(content.trim())
        .map_err(|e| Error::ResponseSchema(format!("signature is not base64: {}", e)))
}

fn reason_phrase(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown Status")
}
