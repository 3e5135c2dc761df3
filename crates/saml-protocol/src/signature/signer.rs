//! XML Signature creation.
//!
//! Produces enveloped XML-DSig signatures with exclusive canonicalization,
//! and detached signatures for the HTTP-Redirect binding.

use base64::Engine;
use openssl::hash::hash;

use super::{Certificate, DigestAlgorithm, SignatureAlgorithm, SigningKey};
use crate::error::{SamlError, SamlResult};
use crate::types::{transforms, XMLDSIG_NS};
use crate::xml::{XmlElement, XmlNode};

/// XML document signer.
///
/// Signs SAML elements using the configured private key.
#[derive(Debug, Clone)]
pub struct XmlSigner<'a> {
    key: &'a SigningKey,
    certificate: Option<&'a Certificate>,
    digest: DigestAlgorithm,
}

impl<'a> XmlSigner<'a> {
    /// Creates a signer. The certificate, when given, is embedded in `KeyInfo`.
    #[must_use]
    pub fn new(key: &'a SigningKey, certificate: Option<&'a Certificate>) -> Self {
        Self {
            key,
            certificate,
            digest: DigestAlgorithm::default(),
        }
    }

    /// Sets the digest algorithm.
    #[must_use]
    pub const fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    /// Returns the signature algorithm this signer produces.
    #[must_use]
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.key.algorithm_for(self.digest)
    }

    /// Signs `target` in place, appending a `<ds:Signature>` as its last child.
    ///
    /// The target must carry an `ID` attribute; the signature references it.
    /// Returns the position of the new signature among the target's children.
    pub fn sign(&self, target: &mut XmlElement) -> SamlResult<usize> {
        let reference_id = target
            .attribute("ID")
            .ok_or_else(|| SamlError::SignatureCreation("Signed element has no ID".to_string()))?
            .to_string();

        let algorithm = self.algorithm();
        let canonical = target.canonical_bytes();
        let digest = hash(self.digest.message_digest(), &canonical)?;
        let digest_b64 = base64::engine::general_purpose::STANDARD.encode(digest);

        let signed_info = build_signed_info(&reference_id, algorithm, self.digest, &digest_b64);
        let signature_value = self.key.sign(algorithm, &signed_info.canonical_bytes())?;

        let signature = build_signature_element(
            signed_info,
            &base64::engine::general_purpose::STANDARD.encode(signature_value),
            self.certificate,
        );

        tracing::debug!(
            reference = %reference_id,
            algorithm = algorithm.uri(),
            "Signed XML element"
        );

        target.children.push(XmlNode::Element(signature));
        Ok(target.children.len() - 1)
    }

    /// Signs the raw query string for the HTTP-Redirect binding.
    ///
    /// Returns the algorithm used and the signature bytes.
    pub fn sign_redirect_binding(&self, data: &[u8]) -> SamlResult<(SignatureAlgorithm, Vec<u8>)> {
        let algorithm = self.algorithm();
        if !algorithm.redirect_allowed() {
            return Err(SamlError::SignatureCreation(format!(
                "{} is not usable with the redirect binding",
                algorithm.uri()
            )));
        }
        Ok((algorithm, self.key.sign(algorithm, data)?))
    }
}

fn dsig(name: &str) -> XmlElement {
    XmlElement::new(XMLDSIG_NS, "ds", name)
}

fn build_signed_info(
    reference_id: &str,
    algorithm: SignatureAlgorithm,
    digest: DigestAlgorithm,
    digest_value: &str,
) -> XmlElement {
    let reference = dsig("Reference")
        .attr("URI", format!("#{reference_id}"))
        .child(
            dsig("Transforms")
                .child(dsig("Transform").attr("Algorithm", transforms::ENVELOPED_SIGNATURE))
                .child(dsig("Transform").attr("Algorithm", transforms::EXCLUSIVE_C14N)),
        )
        .child(dsig("DigestMethod").attr("Algorithm", digest.uri()))
        .child(dsig("DigestValue").text(digest_value));

    dsig("SignedInfo")
        .child(dsig("CanonicalizationMethod").attr("Algorithm", transforms::EXCLUSIVE_C14N))
        .child(dsig("SignatureMethod").attr("Algorithm", algorithm.uri()))
        .child(reference)
}

fn build_signature_element(
    signed_info: XmlElement,
    signature_value: &str,
    certificate: Option<&Certificate>,
) -> XmlElement {
    let key_info = certificate.map(|cert| {
        dsig("KeyInfo").child(dsig("X509Data").child(dsig("X509Certificate").text(cert.to_base64())))
    });

    dsig("Signature")
        .declare("ds", XMLDSIG_NS)
        .child(signed_info)
        .child(dsig("SignatureValue").text(signature_value))
        .child_opt(key_info)
}
