//! XML Signature support for SAML.
//!
//! Enveloped XML-DSig signatures over messages and assertions, detached
//! signatures for the HTTP-Redirect binding, and the key material both use.
//!
//! # Signing Algorithms
//!
//! - RSA-SHA256
//! - RSA-SHA1
//! - DSA-SHA1
//!
//! The HTTP-Redirect binding accepts only RSA-SHA1 and DSA-SHA1.

mod keys;
mod signable;
mod signer;
mod validator;

pub use keys::*;
pub use signable::*;
pub use signer::*;
pub use validator::*;

#[cfg(test)]
pub(crate) use keys::fixtures;

use openssl::hash::MessageDigest;

use crate::types::{digest_algorithms, signature_algorithms};
use crate::xml::XmlElement;

/// Signature algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    /// RSA with SHA-1.
    RsaSha1,
    /// RSA with SHA-256.
    RsaSha256,
    /// DSA with SHA-1.
    DsaSha1,
}

impl SignatureAlgorithm {
    /// Returns the URI for this signature algorithm.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::RsaSha1 => signature_algorithms::RSA_SHA1,
            Self::RsaSha256 => signature_algorithms::RSA_SHA256,
            Self::DsaSha1 => signature_algorithms::DSA_SHA1,
        }
    }

    /// Parses a signature algorithm from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            signature_algorithms::RSA_SHA1 => Some(Self::RsaSha1),
            signature_algorithms::RSA_SHA256 => Some(Self::RsaSha256),
            signature_algorithms::DSA_SHA1 => Some(Self::DsaSha1),
            _ => None,
        }
    }

    /// Returns the digest this algorithm hashes with.
    #[must_use]
    pub const fn digest(&self) -> DigestAlgorithm {
        match self {
            Self::RsaSha1 | Self::DsaSha1 => DigestAlgorithm::Sha1,
            Self::RsaSha256 => DigestAlgorithm::Sha256,
        }
    }

    /// Returns true if this algorithm uses DSA.
    #[must_use]
    pub const fn is_dsa(&self) -> bool {
        matches!(self, Self::DsaSha1)
    }

    /// Returns true if the HTTP-Redirect binding accepts this algorithm.
    #[must_use]
    pub const fn redirect_allowed(&self) -> bool {
        matches!(self, Self::RsaSha1 | Self::DsaSha1)
    }
}

/// Digest algorithm for signature references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DigestAlgorithm {
    /// SHA-1.
    Sha1,
    /// SHA-256.
    #[default]
    Sha256,
}

impl DigestAlgorithm {
    /// Returns the URI for this digest algorithm.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::Sha1 => digest_algorithms::SHA1,
            Self::Sha256 => digest_algorithms::SHA256,
        }
    }

    /// Parses a digest algorithm from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            digest_algorithms::SHA1 => Some(Self::Sha1),
            digest_algorithms::SHA256 => Some(Self::Sha256),
            _ => None,
        }
    }

    pub(crate) fn message_digest(self) -> MessageDigest {
        match self {
            Self::Sha1 => MessageDigest::sha1(),
            Self::Sha256 => MessageDigest::sha256(),
        }
    }
}

/// The parts of a `<ds:Signature>` element needed to check it.
#[derive(Debug, Clone)]
pub struct XmlSignature {
    /// The `<ds:SignedInfo>` element as parsed.
    pub signed_info: XmlElement,
    /// `CanonicalizationMethod` algorithm URI.
    pub canonicalization: String,
    /// `SignatureMethod` algorithm URI.
    pub algorithm: String,
    /// `Reference` URI, including the leading `#`.
    pub reference_uri: String,
    /// `Reference` transform URIs in document order.
    pub transforms: Vec<String>,
    /// `InclusiveNamespaces` prefixes of the exclusive C14N reference transform.
    pub inclusive_prefixes: Vec<String>,
    /// `InclusiveNamespaces` prefixes of the `SignedInfo` canonicalization method.
    pub signed_info_prefixes: Vec<String>,
    /// `DigestMethod` algorithm URI.
    pub digest_algorithm: String,
    /// Decoded `DigestValue`.
    pub digest_value: Vec<u8>,
    /// Decoded `SignatureValue`.
    pub signature_value: Vec<u8>,
    /// Certificates carried in `KeyInfo`.
    pub certificates: Vec<Certificate>,
}

impl XmlSignature {
    /// Returns the referenced ID without the leading `#`.
    #[must_use]
    pub fn reference_id(&self) -> &str {
        self.reference_uri.trim_start_matches('#')
    }
}
