//! SAML bindings implementation.
//!
//! This module implements the SAML 2.0 bindings for message transport:
//!
//! - **HTTP-POST Binding** - Messages are base64-encoded and sent in HTML forms
//! - **HTTP-Redirect Binding** - Messages are deflated, base64-encoded, and
//!   carried in the query string, optionally with a detached signature
//!
//! Decoding treats its input as hostile. Every size checkpoint uses the one
//! ceiling from [`SamlConfig`](crate::config::SamlConfig).
//!
//! # Usage
//!
//! ```rust,ignore
//! use saml_protocol::bindings::{HttpPostBinding, HttpRedirectBinding, TrustMaterial};
//!
//! let redirect = HttpRedirectBinding::new(&config);
//! let url = redirect.encode(&message, Some("relay"), Some(&signing_key))?;
//!
//! let decoded = redirect.decode(&url, Some(TrustMaterial::Keys(&idp_keys)))?;
//! ```

mod post;
mod redirect;

pub use post::*;
pub use redirect::*;

use crate::error::{SamlError, SamlResult};
use crate::message::{AnyMessage, Message, ProtocolMessage};
use crate::types::MessageKind;

/// A message that can be sent over a binding.
pub trait OutboundMessage {
    /// Whether the message travels as a request or a response.
    fn kind(&self) -> MessageKind;

    /// The declared destination URL.
    fn destination(&self) -> Option<&str>;

    /// Serializes the message document.
    fn to_xml(&self) -> SamlResult<String>;
}

impl<T: ProtocolMessage> OutboundMessage for Message<T> {
    fn kind(&self) -> MessageKind {
        T::KIND
    }

    fn destination(&self) -> Option<&str> {
        self.header().destination.as_deref()
    }

    fn to_xml(&self) -> SamlResult<String> {
        Message::to_xml(self)
    }
}

impl OutboundMessage for AnyMessage {
    fn kind(&self) -> MessageKind {
        AnyMessage::kind(self)
    }

    fn destination(&self) -> Option<&str> {
        AnyMessage::destination(self)
    }

    fn to_xml(&self) -> SamlResult<String> {
        AnyMessage::to_xml(self)
    }
}

/// Decoded SAML binding message.
#[derive(Debug)]
pub struct DecodedMessage {
    /// The dispatched message.
    pub message: AnyMessage,
    /// The RelayState if present.
    pub relay_state: Option<String>,
}

/// Fails with `MessageTooLarge` when `len` exceeds `limit`.
fn check_size(len: usize, limit: usize) -> SamlResult<()> {
    if len > limit {
        return Err(SamlError::MessageTooLarge { limit });
    }
    Ok(())
}

/// Converts decoded bytes into a dispatched message.
fn parse_message(bytes: Vec<u8>) -> SamlResult<AnyMessage> {
    let xml = String::from_utf8(bytes)
        .map_err(|e| SamlError::CorruptMessage(format!("invalid UTF-8 in message: {e}")))?;
    AnyMessage::parse(&xml)
}
