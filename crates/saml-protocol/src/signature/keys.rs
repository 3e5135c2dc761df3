//! Certificates and keys.
//!
//! Parsing and raw signing/verification are done with `openssl`; the
//! validity window and subject are read with `x509-parser`.

use std::fmt;

use base64::Engine;
use chrono::{DateTime, Utc};
use openssl::bn::BigNum;
use openssl::dsa::DsaSig;
use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKey, Private, Public};
use openssl::sign::{Signer, Verifier};
use openssl::x509::{X509VerifyResult, X509};
use x509_parser::prelude::*;

use super::{DigestAlgorithm, SignatureAlgorithm};
use crate::error::{SamlError, SamlResult};

/// An X.509 certificate.
#[derive(Clone)]
pub struct Certificate {
    x509: X509,
    der: Vec<u8>,
    fingerprint: String,
    subject: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl Certificate {
    /// Parses a PEM-encoded certificate.
    pub fn from_pem(pem: &[u8]) -> SamlResult<Self> {
        Self::from_x509(X509::from_pem(pem)?)
    }

    /// Parses a DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> SamlResult<Self> {
        Self::from_x509(X509::from_der(der)?)
    }

    /// Parses base64 DER as found in `<ds:X509Certificate>`.
    pub fn from_base64(encoded: &str) -> SamlResult<Self> {
        let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let der = base64::engine::general_purpose::STANDARD.decode(compact)?;
        Self::from_der(&der)
    }

    /// Wraps an already-parsed openssl certificate.
    pub fn from_x509(x509: X509) -> SamlResult<Self> {
        let der = x509.to_der()?;
        let fingerprint = hex(&x509.digest(MessageDigest::sha1())?);

        let (_, parsed) = X509Certificate::from_der(&der)
            .map_err(|e| SamlError::Crypto(format!("Invalid certificate: {e}")))?;
        let validity = parsed.validity();
        let not_before = timestamp(validity.not_before.timestamp())?;
        let not_after = timestamp(validity.not_after.timestamp())?;
        let subject = parsed.subject().to_string();

        Ok(Self {
            x509,
            der,
            fingerprint,
            subject,
            not_before,
            not_after,
        })
    }

    /// Returns the DER encoding.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the DER encoding as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.der)
    }

    /// Returns the SHA-1 fingerprint as lowercase hex without separators.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Returns the SHA-256 fingerprint as lowercase hex without separators.
    pub fn sha256_fingerprint(&self) -> SamlResult<String> {
        Ok(hex(&self.x509.digest(MessageDigest::sha256())?))
    }

    /// Returns true if `fingerprint` names this certificate.
    ///
    /// Comparison ignores case and `:` separators.
    #[must_use]
    pub fn matches_fingerprint(&self, fingerprint: &str) -> bool {
        let normalized: String = fingerprint
            .chars()
            .filter(|c| *c != ':' && !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        normalized == self.fingerprint
    }

    /// Returns the subject distinguished name.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the start of the validity window.
    #[must_use]
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// Returns the end of the validity window.
    #[must_use]
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Returns true if `time` falls within the validity window.
    #[must_use]
    pub fn is_valid_at(&self, time: DateTime<Utc>) -> bool {
        self.not_before <= time && time <= self.not_after
    }

    /// Returns true if this certificate is `anchor` or was signed by it.
    #[must_use]
    pub fn is_issued_by(&self, anchor: &Certificate) -> bool {
        if self.der == anchor.der {
            return true;
        }
        if anchor.x509.issued(&self.x509) != X509VerifyResult::OK {
            return false;
        }
        anchor
            .x509
            .public_key()
            .and_then(|key| self.x509.verify(&key))
            .unwrap_or(false)
    }

    /// Returns the public key.
    pub fn public_key(&self) -> SamlResult<PKey<Public>> {
        Ok(self.x509.public_key()?)
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// A private key used to sign messages.
#[derive(Clone)]
pub struct SigningKey {
    pkey: PKey<Private>,
}

impl SigningKey {
    /// Parses a PEM private key (PKCS#8 or traditional RSA/DSA).
    pub fn from_pem(pem: &[u8]) -> SamlResult<Self> {
        Self::from_pkey(PKey::private_key_from_pem(pem)?)
    }

    /// Parses a DER private key.
    pub fn from_der(der: &[u8]) -> SamlResult<Self> {
        Self::from_pkey(PKey::private_key_from_der(der)?)
    }

    /// Wraps an openssl private key. Only RSA and DSA keys are accepted.
    pub fn from_pkey(pkey: PKey<Private>) -> SamlResult<Self> {
        match pkey.id() {
            Id::RSA | Id::DSA => Ok(Self { pkey }),
            other => Err(SamlError::Crypto(format!(
                "Unsupported signing key type: {other:?}"
            ))),
        }
    }

    /// Returns true for DSA keys.
    #[must_use]
    pub fn is_dsa(&self) -> bool {
        self.pkey.id() == Id::DSA
    }

    /// Chooses the signature algorithm for this key and digest.
    ///
    /// DSA keys always sign with DSA-SHA1.
    #[must_use]
    pub fn algorithm_for(&self, digest: DigestAlgorithm) -> SignatureAlgorithm {
        match (self.is_dsa(), digest) {
            (true, _) => SignatureAlgorithm::DsaSha1,
            (false, DigestAlgorithm::Sha1) => SignatureAlgorithm::RsaSha1,
            (false, DigestAlgorithm::Sha256) => SignatureAlgorithm::RsaSha256,
        }
    }

    /// Signs `data`. DSA signatures are returned as fixed-width `r || s`,
    /// the XML-DSig encoding.
    pub fn sign(&self, algorithm: SignatureAlgorithm, data: &[u8]) -> SamlResult<Vec<u8>> {
        if algorithm.is_dsa() != self.is_dsa() {
            return Err(SamlError::SignatureCreation(format!(
                "Key type does not match {}",
                algorithm.uri()
            )));
        }

        let mut signer = Signer::new(algorithm.digest().message_digest(), &self.pkey)
            .map_err(|e| SamlError::SignatureCreation(format!("Signer creation failed: {e}")))?;
        signer
            .update(data)
            .map_err(|e| SamlError::SignatureCreation(format!("Signer update failed: {e}")))?;
        let signature = signer
            .sign_to_vec()
            .map_err(|e| SamlError::SignatureCreation(format!("Signing failed: {e}")))?;

        if algorithm.is_dsa() {
            dsa_der_to_raw(&signature, self.dsa_component_len()?)
        } else {
            Ok(signature)
        }
    }

    /// Returns the matching public key.
    pub fn verification_key(&self) -> SamlResult<VerificationKey> {
        let der = self.pkey.public_key_to_der()?;
        Ok(VerificationKey {
            pkey: PKey::public_key_from_der(&der)?,
            certificate: None,
        })
    }

    fn dsa_component_len(&self) -> SamlResult<usize> {
        let dsa = self.pkey.dsa()?;
        Ok(usize::try_from(dsa.q().num_bytes()).unwrap_or(20))
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("type", &self.pkey.id())
            .field("bits", &self.pkey.bits())
            .finish()
    }
}

/// A public key used to check signatures, optionally bound to a certificate.
#[derive(Clone)]
pub struct VerificationKey {
    pkey: PKey<Public>,
    certificate: Option<Certificate>,
}

impl VerificationKey {
    /// Uses a certificate's public key.
    pub fn from_certificate(certificate: Certificate) -> SamlResult<Self> {
        Ok(Self {
            pkey: certificate.public_key()?,
            certificate: Some(certificate),
        })
    }

    /// Parses a PEM public key.
    pub fn from_public_pem(pem: &[u8]) -> SamlResult<Self> {
        Ok(Self {
            pkey: PKey::public_key_from_pem(pem)?,
            certificate: None,
        })
    }

    /// Returns the certificate this key came from, if any.
    #[must_use]
    pub fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    /// Checks `signature` over `data`.
    ///
    /// DSA signatures may be raw `r || s` or DER. Malformed signatures
    /// verify as `false`.
    pub fn verify(
        &self,
        algorithm: SignatureAlgorithm,
        data: &[u8],
        signature: &[u8],
    ) -> SamlResult<bool> {
        let is_dsa = self.pkey.id() == Id::DSA;
        if algorithm.is_dsa() != is_dsa {
            return Ok(false);
        }

        let signature = if is_dsa && is_raw_dsa(signature) {
            dsa_raw_to_der(signature)?
        } else {
            signature.to_vec()
        };

        let mut verifier = Verifier::new(algorithm.digest().message_digest(), &self.pkey)?;
        verifier.update(data)?;
        Ok(verifier.verify(&signature).unwrap_or(false))
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("type", &self.pkey.id())
            .field("certificate", &self.certificate)
            .finish()
    }
}

fn is_raw_dsa(signature: &[u8]) -> bool {
    matches!(signature.len(), 40 | 56 | 64)
}

fn dsa_raw_to_der(raw: &[u8]) -> SamlResult<Vec<u8>> {
    let (r, s) = raw.split_at(raw.len() / 2);
    let sig = DsaSig::from_private_components(BigNum::from_slice(r)?, BigNum::from_slice(s)?)?;
    Ok(sig.to_der()?)
}

fn dsa_der_to_raw(der: &[u8], width: usize) -> SamlResult<Vec<u8>> {
    let sig = DsaSig::from_der(der)?;
    let width = i32::try_from(width)
        .map_err(|_| SamlError::SignatureCreation("DSA key too large".to_string()))?;
    let mut raw = sig.r().to_vec_padded(width)?;
    raw.extend(sig.s().to_vec_padded(width)?);
    Ok(raw)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn timestamp(seconds: i64) -> SamlResult<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| SamlError::Crypto(format!("Certificate time out of range: {seconds}")))
}
