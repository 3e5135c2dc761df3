//! SAML 2.0 wire protocol.
//!
//! This crate implements the message exchange core of SAML 2.0 single
//! sign-on and single logout:
//!
//! - **Bindings** - HTTP-POST and HTTP-Redirect encode/decode with size
//!   ceilings and redirect query signatures
//! - **Messages** - AuthnRequest, Response, LogoutRequest and LogoutResponse
//!   with dispatch on the root element
//! - **XML signature** - Enveloped XML-DSig signing and validation
//! - **Metadata** - Endpoint, key and attribute service resolution
//!
//! # Architecture
//!
//! - [`types`] - Core SAML types and data structures
//! - [`xml`] - Namespace-aware XML tree, serialization and canonicalization
//! - [`signature`] - Keys, certificates, XML signature signing and validation
//! - [`message`] - Protocol messages and their build/sign/parse lifecycle
//! - [`metadata`] - Entity and SSO role descriptors
//! - [`bindings`] - POST and Redirect binding implementations
//! - [`config`] - Size ceilings and certificate trust policy
//! - [`error`] - Error types for SAML operations
//!
//! # Example
//!
//! ```rust,ignore
//! use saml_protocol::bindings::{HttpRedirectBinding, TrustMaterial};
//! use saml_protocol::{AnyMessage, SamlConfig};
//!
//! let binding = HttpRedirectBinding::new(&SamlConfig::from_env());
//! let decoded = binding.decode(&url, Some(TrustMaterial::Keys(&sp_keys)))?;
//! if let AnyMessage::AuthnRequest(request) = decoded.message {
//!     let acs = request.body().resolve_acs(&sp_descriptor);
//! }
//! ```
//!
//! # SAML Specifications
//!
//! - [SAML 2.0 Core](https://docs.oasis-open.org/security/saml/v2.0/saml-core-2.0-os.pdf)
//! - [SAML 2.0 Bindings](https://docs.oasis-open.org/security/saml/v2.0/saml-bindings-2.0-os.pdf)
//! - [SAML 2.0 Metadata](https://docs.oasis-open.org/security/saml/v2.0/saml-metadata-2.0-os.pdf)
//! - [XML Signature](https://www.w3.org/TR/xmldsig-core1/)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bindings;
pub mod config;
pub mod error;
pub mod message;
pub mod metadata;
pub mod signature;
pub mod types;
pub mod xml;

pub use config::{CertificateValidation, SamlConfig};
pub use error::{SamlError, SamlResult};
pub use message::{AnyMessage, Message, MessageState, ProtocolMessage};
pub use types::*;
