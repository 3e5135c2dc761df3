//! HTTP-POST Binding implementation.
//!
//! Implements the SAML 2.0 HTTP-POST binding for sending SAML messages
//! via HTML form POST.

use base64::Engine;

use crate::config::SamlConfig;
use crate::error::{SamlError, SamlResult};
use crate::types::{params, MessageKind};

use super::{check_size, parse_message, DecodedMessage, OutboundMessage};

/// The form fields carrying an encoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostForm {
    /// Form action, from the message destination.
    pub destination: Option<String>,
    /// `SAMLRequest` or `SAMLResponse`.
    pub field: &'static str,
    /// Base64 of the serialized message.
    pub body: String,
    /// The RelayState if present.
    pub relay_state: Option<String>,
}

impl PostForm {
    /// Renders an HTML page that auto-submits the form to its destination.
    #[must_use]
    pub fn to_html(&self) -> String {
        let relay_state_input = self
            .relay_state
            .as_deref()
            .map(|rs| {
                format!(
                    r#"<input type="hidden" name="{}" value="{}"/>"#,
                    params::RELAY_STATE,
                    html_escape(rs)
                )
            })
            .unwrap_or_default();

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>SAML POST Binding</title>
</head>
<body onload="document.forms[0].submit()">
    <noscript>
        <p>JavaScript is disabled. Click the button below to continue.</p>
    </noscript>
    <form method="post" action="{}">
        <input type="hidden" name="{}" value="{}"/>
        {}
        <noscript>
            <input type="submit" value="Continue"/>
        </noscript>
    </form>
</body>
</html>"#,
            html_escape(self.destination.as_deref().unwrap_or_default()),
            self.field,
            self.body,
            relay_state_input
        )
    }

    /// Returns the form as name/value pairs, as a browser would submit it.
    #[must_use]
    pub fn fields(&self) -> Vec<(&str, &str)> {
        let mut fields = vec![(self.field, self.body.as_str())];
        if let Some(rs) = &self.relay_state {
            fields.push((params::RELAY_STATE, rs.as_str()));
        }
        fields
    }
}

/// HTTP-POST binding encoder/decoder.
#[derive(Debug, Clone)]
pub struct HttpPostBinding {
    max_message_size: usize,
}

impl Default for HttpPostBinding {
    fn default() -> Self {
        Self::new(&SamlConfig::default())
    }
}

impl HttpPostBinding {
    /// Creates a binding using the configured size ceiling.
    #[must_use]
    pub fn new(config: &SamlConfig) -> Self {
        Self {
            max_message_size: config.max_message_size,
        }
    }

    /// Encodes a message into form fields.
    ///
    /// The field is `SAMLRequest` for request-kind messages and
    /// `SAMLResponse` otherwise.
    pub fn encode<M: OutboundMessage + ?Sized>(
        &self,
        message: &M,
        relay_state: Option<&str>,
    ) -> SamlResult<PostForm> {
        let xml = message.to_xml()?;
        Ok(PostForm {
            destination: message.destination().map(str::to_string),
            field: message.kind().param(),
            body: base64::engine::general_purpose::STANDARD.encode(xml),
            relay_state: relay_state.map(str::to_string),
        })
    }

    /// Decodes a message from HTTP-POST form fields.
    ///
    /// Unrecognized fields are ignored. ASCII whitespace inside the encoded
    /// body is tolerated; the size ceiling applies to the raw value and
    /// again to the decoded bytes.
    pub fn decode<I, K, V>(&self, fields: I) -> SamlResult<DecodedMessage>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut request = None;
        let mut response = None;
        let mut relay_state = None;

        for (name, value) in fields {
            let slot = match MessageKind::from_param(name.as_ref()) {
                Some(MessageKind::Request) => &mut request,
                Some(MessageKind::Response) => &mut response,
                None if name.as_ref() == params::RELAY_STATE => &mut relay_state,
                None => continue,
            };
            if slot.is_none() {
                *slot = Some(value.as_ref().to_string());
            }
        }

        let encoded = request.or(response).ok_or(SamlError::MissingMessage)?;
        check_size(encoded.len(), self.max_message_size).inspect_err(|_| {
            tracing::warn!(len = encoded.len(), "Rejected oversized POST message");
        })?;

        let compact: String = encoded
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let bytes = base64::engine::general_purpose::STANDARD.decode(compact)?;
        check_size(bytes.len(), self.max_message_size)?;

        let message = parse_message(bytes)?;
        tracing::debug!(
            element = message.element_name(),
            id = %message.header().id,
            "Decoded POST binding message"
        );

        Ok(DecodedMessage {
            message,
            relay_state,
        })
    }
}

/// Escapes HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
