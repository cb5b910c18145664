//! Bearer assertions for the remote signing authority.
//!
//! An assertion is a compact HS256 token: `header.payload.signature`, each
//! segment base64url without padding. The payload identifies the signer by
//! the numeric body of their RUT and expires a few minutes after issuance.

use crate::config::SignerConfig;
use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Local, Utc};
use chrono_tz::Tz;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Format of the `expiration` claim.
pub const EXPIRATION_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Default assertion lifetime.
pub const DEFAULT_LIFETIME_MINUTES: i64 = 5;

/// Why the signature is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// A person supplied a one-time password
    Attended,
    /// No one-time password
    Unattended,
}

impl Purpose {
    /// From the request's attended flag.
    pub fn from_attended(attended: bool) -> Self {
        if attended {
            Purpose::Attended
        } else {
            Purpose::Unattended
        }
    }

    /// Label expected by the authority.
    pub fn label(&self) -> &'static str {
        match self {
            Purpose::Attended => "Propósito General",
            Purpose::Unattended => "Desatendido",
        }
    }
}

#[derive(Debug, Serialize)]
struct Header<'a> {
    alg: &'a str,
    typ: &'a str,
}

/// Assertion payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// RUT without leading zeros or check digit
    pub run: String,
    /// Requesting entity
    pub entity: String,
    /// Purpose label
    pub purpose: String,
    /// Local expiration time, `%Y-%m-%dT%H:%M:%S`
    pub expiration: String,
}

/// Strip leading zeros and the trailing check digit from a RUT.
///
/// `"0123456785"` becomes `"12345678"`. An identifier with nothing left is
/// rejected.
pub fn normalize_rut(rut: &str) -> Result<String> {
    let stripped = rut.trim_start_matches('0');
    let mut chars = stripped.chars();
    chars.next_back();
    let body = chars.as_str();
    if body.is_empty() {
        return Err(Error::MalformedInput(format!(
            "identifier {:?} has no numeric body",
            rut
        )));
    }
    Ok(body.to_string())
}

/// Issues assertions signed with a shared secret.
#[derive(Clone)]
pub struct AssertionIssuer {
    secret: Vec<u8>,
    entity: String,
    timezone: Option<Tz>,
    lifetime: Duration,
}

impl std::fmt::Debug for AssertionIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssertionIssuer")
            .field("entity", &self.entity)
            .field("timezone", &self.timezone)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl AssertionIssuer {
    /// Issuer with the default entity, the local timezone and a 5 minute lifetime.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            entity: crate::config::DEFAULT_ENTITY.to_string(),
            timezone: None,
            lifetime: Duration::minutes(DEFAULT_LIFETIME_MINUTES),
        }
    }

    /// Issuer for the configured secret, entity and timezone.
    pub fn from_config(config: &SignerConfig) -> Result<Self> {
        let mut issuer = Self::new(config.secret.as_bytes()).with_entity(config.entity.as_str());
        if let Some(tz) = config.tz()? {
            issuer = issuer.with_timezone(tz);
        }
        Ok(issuer)
    }

    /// Set the entity claim.
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = entity.into();
        self
    }

    /// Format expirations in `tz` instead of the local zone.
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.timezone = Some(tz);
        self
    }

    /// Set the lifetime.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Issue an assertion expiring `lifetime` from now.
    pub fn issue(&self, rut: &str, attended: bool) -> Result<Assertion> {
        self.issue_at(rut, attended, Utc::now())
    }

    /// Issue an assertion as if the current time were `now`.
    pub fn issue_at(&self, rut: &str, attended: bool, now: DateTime<Utc>) -> Result<Assertion> {
        if self.secret.is_empty() {
            return Err(Error::InvalidKey("assertion secret is empty".to_string()));
        }

        let expires = now + self.lifetime;
        let expiration = match self.timezone {
            Some(tz) => expires.with_timezone(&tz).format(EXPIRATION_FORMAT).to_string(),
            None => expires.with_timezone(&Local).format(EXPIRATION_FORMAT).to_string(),
        };
        let claims = Claims {
            run: normalize_rut(rut)?,
            entity: self.entity.clone(),
            purpose: Purpose::from_attended(attended).label().to_string(),
            expiration,
        };

        let header = encode_json(&Header {
            alg: "HS256",
            typ: "JWT",
        })?;
        let payload = encode_json(&claims)?;
        let signature = URL_SAFE_NO_PAD.encode(mac(&self.secret, &header, &payload)?);

        log::debug!("issued assertion expiring at {}", claims.expiration);
        Ok(Assertion {
            header,
            payload,
            signature,
        })
    }
}

/// A signed assertion.
#[derive(Clone, PartialEq, Eq)]
pub struct Assertion {
    header: String,
    payload: String,
    signature: String,
}

impl std::fmt::Debug for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assertion")
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

impl Assertion {
    /// Split a compact token into its three segments.
    pub fn parse(token: &str) -> Result<Self> {
        let mut parts = token.split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(header), Some(payload), Some(signature), None) => Ok(Self {
                header: header.to_string(),
                payload: payload.to_string(),
                signature: signature.to_string(),
            }),
            _ => Err(Error::MalformedInput("assertion must have three segments".to_string())),
        }
    }

    /// Compact form, `header.payload.signature`.
    pub fn token(&self) -> String {
        format!("{}.{}.{}", self.header, self.payload, self.signature)
    }

    /// Decoded payload.
    pub fn claims(&self) -> Result<Claims> {
        let json = URL_SAFE_NO_PAD
            .decode(&self.payload)
            .map_err(|e| Error::MalformedInput(format!("assertion payload: {}", e)))?;
        serde_json::from_slice(&json).map_err(|e| Error::MalformedInput(format!("assertion payload: {}", e)))
    }

    /// Recompute the MAC over header and payload and compare in constant time.
    pub fn verify(&self, secret: impl AsRef<[u8]>) -> bool {
        let Ok(expected) = URL_SAFE_NO_PAD.decode(&self.signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_ref()) else {
            return false;
        };
        mac.update(format!("{}.{}", self.header, self.payload).as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

fn encode_json<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value).map_err(|e| Error::MalformedInput(format!("assertion encoding: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn mac(secret: &[u8], header: &str, payload: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| Error::CryptoUnavailable(format!("HMAC-SHA256: {}", e)))?;
    mac.update(format!("{}.{}", header, payload).as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}
