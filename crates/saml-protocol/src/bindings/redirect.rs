//! HTTP-Redirect Binding implementation.
//!
//! Implements the SAML 2.0 HTTP-Redirect binding for sending SAML messages
//! via URL query parameters with DEFLATE compression.
//!
//! A signed redirect carries its signature in the `Signature` parameter,
//! computed over the percent-encoded query substrings exactly as sent.
//! Verification therefore works on the raw query and never re-encodes.

use std::borrow::Cow;
use std::io::Write;

use base64::Engine;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};

use crate::config::SamlConfig;
use crate::error::{SamlError, SamlResult};
use crate::message::AnyMessage;
use crate::signature::{
    DigestAlgorithm, SignatureAlgorithm, SigningKey, VerificationKey, XmlSignatureValidator,
    XmlSigner,
};
use crate::types::{params, MessageKind, DEFLATE_ENCODING};

use super::{check_size, parse_message, OutboundMessage};

/// Looks up verification keys once the message is known.
///
/// Used when the trusted keys depend on who sent the message, typically
/// by issuer.
pub trait KeyResolver {
    /// Returns the candidate keys for `message`, in the order to try them.
    ///
    /// `sig_alg` is the `SigAlg` parameter as sent, if any.
    fn resolve(
        &self,
        message: &AnyMessage,
        sig_alg: Option<&str>,
    ) -> SamlResult<Vec<VerificationKey>>;

    /// Called with the key that verified the signature.
    fn on_verified(&self, _message: &AnyMessage, _key: &VerificationKey) {}
}

/// Keys a signed redirect must verify against.
#[derive(Clone, Copy)]
pub enum TrustMaterial<'a> {
    /// A fixed list of candidate keys.
    Keys(&'a [VerificationKey]),
    /// Keys chosen per message.
    Resolver(&'a dyn KeyResolver),
}

/// Result of decoding a redirect URL.
#[derive(Debug)]
pub struct RedirectMessage {
    /// The dispatched message.
    pub message: AnyMessage,
    /// The RelayState if present.
    pub relay_state: Option<String>,
    /// The declared signature algorithm, when recognized.
    pub sig_alg: Option<SignatureAlgorithm>,
    /// Position of the key that verified the signature, when trust
    /// material was supplied.
    pub verified_key_index: Option<usize>,
}

/// HTTP-Redirect binding encoder/decoder.
#[derive(Debug, Clone)]
pub struct HttpRedirectBinding {
    max_message_size: usize,
    chunk_size: usize,
    validator: XmlSignatureValidator,
}

impl Default for HttpRedirectBinding {
    fn default() -> Self {
        Self::new(&SamlConfig::default())
    }
}

impl HttpRedirectBinding {
    /// Creates a binding from the configured ceiling, inflate chunk and
    /// certificate trust policy.
    #[must_use]
    pub fn new(config: &SamlConfig) -> Self {
        Self {
            max_message_size: config.max_message_size,
            chunk_size: config.chunk_size(),
            validator: XmlSignatureValidator::new(config),
        }
    }

    /// Encodes a message into a redirect URL.
    ///
    /// The URL starts from the message destination with any SAML parameters
    /// removed. With a signing key, the query is signed with RSA-SHA1, or
    /// DSA-SHA1 for a DSA key.
    pub fn encode<M: OutboundMessage + ?Sized>(
        &self,
        message: &M,
        relay_state: Option<&str>,
        signing_key: Option<&SigningKey>,
    ) -> SamlResult<String> {
        let destination = message.destination().ok_or_else(|| {
            SamlError::MissingElement("Destination on outbound message".to_string())
        })?;
        let mut url = url::Url::parse(destination)
            .map_err(|e| SamlError::CorruptMessage(format!("invalid destination URL: {e}")))?;

        let compressed = deflate_compress(message.to_xml()?.as_bytes())?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(compressed);

        let mut signed = format!(
            "{}={}",
            message.kind().param(),
            urlencoding::encode(&encoded)
        );
        if let Some(rs) = relay_state {
            signed.push_str(&format!("&{}={}", params::RELAY_STATE, urlencoding::encode(rs)));
        }

        if let Some(key) = signing_key {
            let signer = XmlSigner::new(key, None).with_digest(DigestAlgorithm::Sha1);
            signed.push_str(&format!(
                "&{}={}",
                params::SIG_ALG,
                urlencoding::encode(signer.algorithm().uri())
            ));
            let (_, signature) = signer.sign_redirect_binding(signed.as_bytes())?;
            let signature = base64::engine::general_purpose::STANDARD.encode(signature);
            signed.push_str(&format!("&{}={}", params::SIGNATURE, urlencoding::encode(&signature)));
        }

        let mut query: Vec<&str> = url
            .query()
            .unwrap_or_default()
            .split('&')
            .filter(|segment| !segment.is_empty() && !is_reserved(segment))
            .collect();
        query.push(&signed);
        let query = query.join("&");
        url.set_query(Some(&query));

        tracing::debug!(
            destination = %destination,
            signed = signing_key.is_some(),
            "Encoded redirect binding message"
        );

        Ok(url.into())
    }

    /// Decodes a message from a full redirect URL.
    ///
    /// With `trust`, the message must carry a valid signature from one of
    /// the candidate keys. Without it, any signature is left unchecked.
    pub fn decode(&self, url: &str, trust: Option<TrustMaterial<'_>>) -> SamlResult<RedirectMessage> {
        let parsed = url::Url::parse(url)
            .map_err(|e| SamlError::CorruptMessage(format!("invalid URL: {e}")))?;
        let query = parsed.query().ok_or(SamlError::MissingMessage)?;
        self.decode_query(query, trust)
    }

    /// Decodes a message from a raw, still percent-encoded query string.
    pub fn decode_query(
        &self,
        query: &str,
        trust: Option<TrustMaterial<'_>>,
    ) -> SamlResult<RedirectMessage> {
        let query = RedirectQuery::parse(query);
        let (_, payload) = query.message.as_ref().ok_or(SamlError::MissingMessage)?;

        if let Some(encoding) = &query.encoding {
            if encoding.value != DEFLATE_ENCODING {
                return Err(SamlError::UnsupportedEncoding(encoding.value.to_string()));
            }
        }

        check_size(payload.value.len(), self.max_message_size).inspect_err(|_| {
            tracing::warn!(len = payload.value.len(), "Rejected oversized redirect message");
        })?;
        let compressed = base64::engine::general_purpose::STANDARD.decode(payload.value.as_bytes())?;
        let inflated = inflate(&compressed, self.max_message_size, self.chunk_size)?;
        let message = parse_message(inflated)?;

        let sig_alg_uri = query.sig_alg.as_ref().map(|p| p.value.as_ref());
        let mut decoded = RedirectMessage {
            relay_state: query.relay_state.as_ref().map(|p| p.value.to_string()),
            sig_alg: sig_alg_uri.and_then(SignatureAlgorithm::from_uri),
            verified_key_index: None,
            message,
        };

        let Some(trust) = trust else {
            return Ok(decoded);
        };

        let keys: Cow<'_, [VerificationKey]> = match trust {
            TrustMaterial::Keys(keys) => Cow::Borrowed(keys),
            TrustMaterial::Resolver(resolver) => {
                Cow::Owned(resolver.resolve(&decoded.message, sig_alg_uri)?)
            }
        };

        let index = self.verify(&query, payload, &keys)?;
        decoded.verified_key_index = Some(index);
        if let TrustMaterial::Resolver(resolver) = trust {
            resolver.on_verified(&decoded.message, &keys[index]);
        }

        tracing::debug!(
            element = decoded.message.element_name(),
            issuer = %decoded.message.header().issuer,
            key = index,
            "Verified redirect binding signature"
        );

        Ok(decoded)
    }

    fn verify(
        &self,
        query: &RedirectQuery<'_>,
        payload: &QueryParam<'_>,
        keys: &[VerificationKey],
    ) -> SamlResult<usize> {
        let signature = query.signature.as_ref().ok_or(SamlError::UnsignedMessage)?;
        let sig_alg = query.sig_alg.as_ref().ok_or(SamlError::UnsignedMessage)?;

        let algorithm = SignatureAlgorithm::from_uri(&sig_alg.value)
            .filter(SignatureAlgorithm::redirect_allowed)
            .ok_or_else(|| SamlError::UnsupportedSignatureAlgorithm(sig_alg.value.to_string()))?;
        let signature = base64::engine::general_purpose::STANDARD.decode(signature.value.as_bytes())?;

        let mut base = payload.raw.to_string();
        if let Some(relay_state) = &query.relay_state {
            base.push('&');
            base.push_str(relay_state.raw);
        }
        base.push('&');
        base.push_str(sig_alg.raw);

        self.validator
            .validate_redirect_binding(base.as_bytes(), algorithm, &signature, keys)
            .inspect_err(|e| tracing::warn!(error = %e, "Redirect signature rejected"))
    }
}

/// One query parameter: the raw `name=value` segment and its decoded value.
#[derive(Debug)]
struct QueryParam<'q> {
    raw: &'q str,
    value: Cow<'q, str>,
}

/// The binding parameters of a redirect query. The first occurrence of
/// each parameter wins.
#[derive(Debug, Default)]
struct RedirectQuery<'q> {
    message: Option<(MessageKind, QueryParam<'q>)>,
    relay_state: Option<QueryParam<'q>>,
    encoding: Option<QueryParam<'q>>,
    sig_alg: Option<QueryParam<'q>>,
    signature: Option<QueryParam<'q>>,
}

impl<'q> RedirectQuery<'q> {
    fn parse(query: &'q str) -> Self {
        let mut parsed = Self::default();

        for raw in query.split('&').filter(|segment| !segment.is_empty()) {
            let Some((name, value)) = url::form_urlencoded::parse(raw.as_bytes()).next() else {
                continue;
            };
            let param = QueryParam { raw, value };

            if let Some(kind) = MessageKind::from_param(&name) {
                if parsed.message.is_none() {
                    parsed.message = Some((kind, param));
                }
                continue;
            }

            let slot = match name.as_ref() {
                params::RELAY_STATE => &mut parsed.relay_state,
                params::SAML_ENCODING => &mut parsed.encoding,
                params::SIG_ALG => &mut parsed.sig_alg,
                params::SIGNATURE => &mut parsed.signature,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(param);
            }
        }

        parsed
    }
}

fn is_reserved(segment: &str) -> bool {
    url::form_urlencoded::parse(segment.as_bytes())
        .next()
        .is_some_and(|(name, _)| params::RESERVED.contains(&name.as_ref()))
}

/// Compresses data using DEFLATE (raw, no zlib header).
fn deflate_compress(data: &[u8]) -> SamlResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(data)
        .and_then(|()| encoder.finish())
        .map_err(|e| SamlError::CorruptMessage(format!("DEFLATE compression error: {e}")))
}

/// Inflates raw DEFLATE data in `chunk`-sized steps.
///
/// The running total is checked against `limit` before each chunk is
/// appended, so output never grows past the ceiling.
fn inflate(data: &[u8], limit: usize, chunk: usize) -> SamlResult<Vec<u8>> {
    let mut inflater = Decompress::new(false);
    let mut buffer = vec![0u8; chunk.max(1)];
    let mut output = Vec::new();

    loop {
        let consumed = usize::try_from(inflater.total_in()).unwrap_or(data.len()).min(data.len());
        let before_out = inflater.total_out();
        let before_in = inflater.total_in();

        let status = inflater
            .decompress(&data[consumed..], &mut buffer, FlushDecompress::None)
            .map_err(|e| SamlError::CorruptMessage(format!("invalid DEFLATE stream: {e}")))?;

        let produced = usize::try_from(inflater.total_out() - before_out)
            .unwrap_or(usize::MAX)
            .min(buffer.len());
        if output.len() + produced > limit {
            tracing::warn!(limit, "Rejected redirect message inflating past the size ceiling");
            return Err(SamlError::MessageTooLarge { limit });
        }
        output.extend_from_slice(&buffer[..produced]);

        match status {
            Status::StreamEnd => return Ok(output),
            _ if produced == 0 && inflater.total_in() == before_in => {
                return Err(SamlError::CorruptMessage(
                    "truncated DEFLATE stream".to_string(),
                ));
            }
            _ => {}
        }
    }
}
