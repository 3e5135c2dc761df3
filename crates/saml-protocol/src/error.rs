//! SAML error types.
//!
//! Provides the error taxonomy for binding decode, message dispatch,
//! signature verification and attribute resolution.

use thiserror::Error;

use crate::types::{status_codes, sub_status_codes, RequestedAttribute};

/// Result type for SAML operations.
pub type SamlResult<T> = Result<T, SamlError>;

/// SAML protocol errors.
#[derive(Debug, Error)]
pub enum SamlError {
    /// No recognized message parameter was present.
    #[error("no SAMLRequest or SAMLResponse parameter present")]
    MissingMessage,

    /// Malformed base64, compressed stream, URI or XML.
    #[error("corrupt message: {0}")]
    CorruptMessage(String),

    /// The size ceiling was exceeded at some checkpoint.
    #[error("message exceeds the maximum size of {limit} bytes")]
    MessageTooLarge {
        /// The configured ceiling in bytes.
        limit: usize,
    },

    /// The `SAMLEncoding` parameter was present but not DEFLATE.
    #[error("unsupported message encoding: {0}")]
    UnsupportedEncoding(String),

    /// The XML root element is not a known protocol message.
    #[error("unknown message element: {0}")]
    UnknownMessage(String),

    /// The parsed message is not the type the caller asked for.
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// The element name the caller expected.
        expected: &'static str,
        /// The element name actually parsed.
        actual: &'static str,
    },

    /// Trust material was supplied but the message carries no signature.
    #[error("message is not signed")]
    UnsignedMessage,

    /// The signature algorithm is not in the recognized allow-list.
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedSignatureAlgorithm(String),

    /// No supplied key validated the signature.
    #[error("signature validation failed: {0}")]
    InvalidSignature(String),

    /// A required requested attribute had no supplied value.
    #[error("required attribute missing: {}", .0.name)]
    RequiredAttributeMissing(RequestedAttribute),

    /// Missing required element or attribute in an otherwise well-formed document.
    #[error("missing required element: {0}")]
    MissingElement(String),

    /// XML signature creation failed.
    #[error("signature creation failed: {0}")]
    SignatureCreation(String),

    /// The requested operation is not legal in the message's current state.
    #[error("invalid message state: {0}")]
    InvalidState(String),

    /// Assertion not yet valid.
    #[error("assertion not yet valid")]
    AssertionNotYetValid,

    /// Assertion expired.
    #[error("assertion expired")]
    AssertionExpired,

    /// Invalid audience.
    #[error("invalid audience: {0} is not an allowed audience")]
    InvalidAudience(String),

    /// Cryptographic operation error.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl SamlError {
    /// Returns the SAML status code for this error.
    ///
    /// Maps errors to the top-level SAML 2.0 status codes.
    #[must_use]
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::SignatureCreation(_) | Self::Crypto(_) | Self::InvalidState(_) => {
                status_codes::RESPONDER
            }
            _ => status_codes::REQUESTER,
        }
    }

    /// Returns a sub-status code if applicable.
    #[must_use]
    pub fn sub_status_code(&self) -> Option<&'static str> {
        match self {
            Self::UnsupportedEncoding(_) | Self::UnsupportedSignatureAlgorithm(_) => {
                Some(sub_status_codes::REQUEST_UNSUPPORTED)
            }
            Self::UnsignedMessage | Self::InvalidSignature(_) => {
                Some(sub_status_codes::REQUEST_DENIED)
            }
            Self::RequiredAttributeMissing(_) => Some(sub_status_codes::INVALID_ATTR_NAME_OR_VALUE),
            _ => None,
        }
    }

    /// Returns the HTTP status code for this error.
    ///
    /// Every binding decode failure rejects the exchange outright with a
    /// 400-class response.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::MissingMessage
            | Self::CorruptMessage(_)
            | Self::UnsupportedEncoding(_)
            | Self::UnknownMessage(_)
            | Self::UnexpectedMessage { .. }
            | Self::MissingElement(_)
            | Self::UnsupportedSignatureAlgorithm(_) => 400,
            Self::MessageTooLarge { .. } => 413,
            Self::UnsignedMessage | Self::InvalidSignature(_) => 403,
            Self::RequiredAttributeMissing(_)
            | Self::AssertionNotYetValid
            | Self::AssertionExpired
            | Self::InvalidAudience(_) => 422,
            Self::SignatureCreation(_) | Self::InvalidState(_) | Self::Crypto(_) => 500,
        }
    }

    /// Returns true if this error came out of decoding untrusted wire input.
    #[must_use]
    pub const fn is_decode_failure(&self) -> bool {
        self.http_status() >= 400 && self.http_status() < 500
    }
}

impl From<quick_xml::Error> for SamlError {
    fn from(err: quick_xml::Error) -> Self {
        Self::CorruptMessage(format!("XML parsing error: {err}"))
    }
}

impl From<quick_xml::events::attributes::AttrError> for SamlError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::CorruptMessage(format!("XML attribute error: {err}"))
    }
}

impl From<base64::DecodeError> for SamlError {
    fn from(err: base64::DecodeError) -> Self {
        Self::CorruptMessage(format!("base64 decode error: {err}"))
    }
}

impl From<openssl::error::ErrorStack> for SamlError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Self::Crypto(err.to_string())
    }
}
