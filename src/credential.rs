//! One-time password decryption.
//!
//! Attended requests carry the signer's OTP encrypted with RSA PKCS#1 v1.5
//! under a key whose private half is deployed next to the service as a
//! PKCS#8 PEM file.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use std::path::Path;

/// A decrypted one-time password. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct OneTimePassword(String);

impl OneTimePassword {
    /// Wrap a clear-text password.
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    /// The clear text.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for OneTimePassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OneTimePassword([REDACTED])")
    }
}

/// Decrypts OTPs with the deployment's private key.
pub struct CredentialDecryptor {
    key: RsaPrivateKey,
}

impl std::fmt::Debug for CredentialDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialDecryptor").finish_non_exhaustive()
    }
}

impl CredentialDecryptor {
    /// Load a PKCS#8 PEM private key from `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|e| {
            Error::CredentialDecrypt(format!("unable to read key {}: {}", path.display(), e))
        })?;
        Self::from_pem(&pem)
    }

    /// Parse a PKCS#8 PEM private key.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| Error::InvalidKey(format!("PKCS#8 RSA private key: {}", e)))?;
        Ok(Self { key })
    }

    /// Decrypt a base64 ciphertext into the clear-text password.
    pub fn decrypt(&self, encrypted: &str) -> Result<OneTimePassword> {
        let ciphertext = STANDARD
            .decode(encrypted.trim())
            .map_err(|e| Error::CredentialDecrypt(format!("invalid base64: {}", e)))?;
        let clear = self
            .key
            .decrypt(Pkcs1v15Encrypt, &ciphertext)
            .map_err(|e| Error::CredentialDecrypt(e.to_string()))?;
        let password =
            String::from_utf8(clear).map_err(|_| Error::CredentialDecrypt("password is not UTF-8".to_string()))?;
        Ok(OneTimePassword(password))
    }
}

/// Decrypt `encrypted` with the key at `key_path`.
///
/// A missing or empty ciphertext means there is no credential, which is
/// the unattended path and not an error.
pub fn decrypt_credential(encrypted: Option<&str>, key_path: &Path) -> Result<Option<OneTimePassword>> {
    match encrypted.filter(|e| !e.trim().is_empty()) {
        None => Ok(None),
        Some(encrypted) => CredentialDecryptor::from_file(key_path)?.decrypt(encrypted).map(Some),
    }
}
