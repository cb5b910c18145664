//! Ephemeral placeholder certificate.
//!
//! PDF viewers expect the signature slot to hold a structurally valid CMS
//! container while the real signature is still being produced elsewhere.
//! This module generates a throwaway RSA key pair, a self-signed
//! certificate for the fixed subject `CN=Temp`, and a certs-only CMS
//! `SignedData` carrying it.
//!
//! The certificate is filler. It is not a trust anchor and it is never the
//! signing identity: the bytes that end up in the document on success come
//! from the remote authority and replace this container entirely.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use cms::cert::CertificateChoices;
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{CertificateSet, EncapsulatedContentInfo, SignedData, SignerInfos};
use const_oid::db::rfc5911::{ID_DATA, ID_SIGNED_DATA};
use der::asn1::SetOfVec;
use der::{Any, Encode};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::RsaPrivateKey;
use sha2::Sha256;
use signature::Verifier;
use spki::SubjectPublicKeyInfoOwned;
use std::str::FromStr;
use std::time::SystemTime;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity};
use x509_cert::Certificate;

/// Subject and issuer of the placeholder certificate.
pub const PLACEHOLDER_SUBJECT: &str = "CN=Temp";

/// Size of the throwaway key.
pub const KEY_BITS: usize = 1024;

/// Self-signed certificate and the CMS container that carries it.
#[derive(Debug, Clone)]
pub struct EphemeralCertificate {
    /// DER-encoded X.509 certificate
    pub certificate: Vec<u8>,
    /// DER-encoded certs-only CMS `ContentInfo`
    pub container: Vec<u8>,
}

impl EphemeralCertificate {
    /// Generate a fresh key pair and certificate valid from 24 hours
    /// before `now` until two years after it.
    pub fn generate(now: DateTime<Utc>) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS)
            .map_err(|e| Error::CryptoUnavailable(format!("RSA key generation: {}", e)))?;
        let public_key = private_key.to_public_key();
        let signing_key = SigningKey::<Sha256>::new(private_key);

        let spki = SubjectPublicKeyInfoOwned::from_key(public_key.clone())
            .map_err(|e| Error::CryptoUnavailable(format!("public key encoding: {}", e)))?;
        let subject = Name::from_str(PLACEHOLDER_SUBJECT).map_err(der_error)?;
        let serial = SerialNumber::new(&now.timestamp_millis().to_be_bytes()).map_err(der_error)?;
        let validity = Validity {
            not_before: asn1_time(now - Duration::hours(24))?,
            not_after: asn1_time(now + Duration::days(2 * 365))?,
        };

        let builder = CertificateBuilder::new(Profile::Root, serial, validity, subject, spki, &signing_key)
            .map_err(|e| Error::CryptoUnavailable(format!("certificate builder: {}", e)))?;
        let certificate = builder
            .build::<Signature>()
            .map_err(|e| Error::CryptoUnavailable(format!("certificate signing: {}", e)))?;

        verify_self_signed(&certificate, VerifyingKey::<Sha256>::new(public_key))?;

        let certificate_der = certificate.to_der().map_err(der_error)?;
        let container = certs_only_container(certificate)?;

        log::debug!(
            "generated placeholder certificate ({} bytes, container {} bytes)",
            certificate_der.len(),
            container.len()
        );

        Ok(Self {
            certificate: certificate_der,
            container,
        })
    }
}

/// `SignedData` with one certificate, no signers and empty id-data content.
fn certs_only_container(certificate: Certificate) -> Result<Vec<u8>> {
    let mut certificates = SetOfVec::new();
    certificates
        .insert(CertificateChoices::Certificate(certificate))
        .map_err(der_error)?;

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::new(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        },
        certificates: Some(CertificateSet(certificates)),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::new()),
    };

    let content_info = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data).map_err(der_error)?,
    };
    content_info.to_der().map_err(der_error)
}

fn verify_self_signed(certificate: &Certificate, key: VerifyingKey<Sha256>) -> Result<()> {
    let tbs = certificate.tbs_certificate.to_der().map_err(der_error)?;
    let raw = certificate
        .signature
        .as_bytes()
        .ok_or_else(|| Error::CryptoUnavailable("certificate signature has unused bits".to_string()))?;
    let signature = Signature::try_from(raw)
        .map_err(|e| Error::CryptoUnavailable(format!("certificate signature: {}", e)))?;
    key.verify(&tbs, &signature)
        .map_err(|e| Error::CryptoUnavailable(format!("certificate does not verify: {}", e)))
}

fn asn1_time(time: DateTime<Utc>) -> Result<Time> {
    Time::try_from(SystemTime::from(time)).map_err(der_error)
}

fn der_error(e: der::Error) -> Error {
    Error::CryptoUnavailable(format!("DER encoding: {}", e))
}
