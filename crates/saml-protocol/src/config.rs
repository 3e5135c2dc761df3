//! Protocol configuration.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};

use crate::signature::Certificate;

/// Default size ceiling for encoded and decoded messages (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default inflate step for the redirect binding (1 KiB).
pub const DEFAULT_INFLATE_CHUNK_SIZE: usize = 1024;

/// How certificates used for signature verification are trusted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateValidation {
    /// Only the leaf certificate is matched; its issuer chain is not checked.
    #[default]
    LeafOnly,
    /// Every verifying certificate must be a trust anchor or issued by one.
    Anchored,
}

/// SAML protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamlConfig {
    /// Maximum byte size of a message, checked before and after decoding.
    pub max_message_size: usize,

    /// Output chunk size used while inflating redirect-binding payloads.
    pub inflate_chunk_size: usize,

    /// Certificate trust policy for signature verification.
    #[serde(default)]
    pub certificate_validation: CertificateValidation,

    /// Trust anchors used when `certificate_validation` is `Anchored`.
    #[serde(skip)]
    pub trust_anchors: Vec<Certificate>,
}

impl Default for SamlConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            inflate_chunk_size: DEFAULT_INFLATE_CHUNK_SIZE,
            certificate_validation: CertificateValidation::LeafOnly,
            trust_anchors: Vec::new(),
        }
    }
}

impl SamlConfig {
    /// Loads configuration from environment variables.
    ///
    /// - `SAML_MAX_MESSAGE_SIZE` - size ceiling in bytes
    /// - `SAML_INFLATE_CHUNK_SIZE` - inflate chunk in bytes
    /// - `SAML_CERTIFICATE_VALIDATION` - `leaf` or `anchored`
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_message_size = std::env::var("SAML_MAX_MESSAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &usize| *v > 0)
            .unwrap_or(defaults.max_message_size);

        let inflate_chunk_size = std::env::var("SAML_INFLATE_CHUNK_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &usize| *v > 0)
            .unwrap_or(defaults.inflate_chunk_size);

        let certificate_validation = match std::env::var("SAML_CERTIFICATE_VALIDATION")
            .ok()
            .as_deref()
            .map(str::trim)
        {
            Some("anchored") => CertificateValidation::Anchored,
            Some("leaf" | "leaf_only") | None => CertificateValidation::LeafOnly,
            Some(other) => {
                tracing::warn!(
                    "Unknown SAML_CERTIFICATE_VALIDATION value '{}', using leaf-only",
                    other
                );
                CertificateValidation::LeafOnly
            }
        };

        Self {
            max_message_size,
            inflate_chunk_size,
            certificate_validation,
            trust_anchors: Vec::new(),
        }
    }

    /// Sets the message size ceiling.
    #[must_use]
    pub const fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Requires verifying certificates to chain to the given anchor.
    #[must_use]
    pub fn with_trust_anchor(mut self, anchor: Certificate) -> Self {
        self.certificate_validation = CertificateValidation::Anchored;
        self.trust_anchors.push(anchor);
        self
    }

    /// Returns the inflate chunk size, never zero.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.inflate_chunk_size.max(1)
    }
}
