//! XML Signature validation.
//!
//! Checks enveloped signatures on SAML elements and detached signatures
//! from the HTTP-Redirect binding.

use base64::Engine;
use chrono::{DateTime, Utc};
use openssl::hash::hash;

use super::{Certificate, DigestAlgorithm, SignatureAlgorithm, VerificationKey, XmlSignature};
use crate::config::{CertificateValidation, SamlConfig};
use crate::error::{SamlError, SamlResult};
use crate::types::{transforms, EXC_C14N_NS, XMLDSIG_NS};
use crate::xml::{ExclusiveC14n, XmlElement, XmlNode};

/// XML signature validator.
///
/// Certificates are supplied per call; the validator carries the trust
/// policy applied to them.
#[derive(Debug, Clone, Default)]
pub struct XmlSignatureValidator {
    validation: CertificateValidation,
    trust_anchors: Vec<Certificate>,
}

impl XmlSignatureValidator {
    /// Creates a validator using the configured trust policy.
    #[must_use]
    pub fn new(config: &SamlConfig) -> Self {
        Self {
            validation: config.certificate_validation,
            trust_anchors: config.trust_anchors.clone(),
        }
    }

    /// Reads the parts of a `<ds:Signature>` element.
    pub fn extract(signature: &XmlElement) -> SamlResult<XmlSignature> {
        if !signature.is(XMLDSIG_NS, "Signature") {
            return Err(SamlError::MissingElement("<Signature>".to_string()));
        }

        let signed_info = signature.required_child(XMLDSIG_NS, "SignedInfo")?;
        let canonicalization_method = signed_info.required_child(XMLDSIG_NS, "CanonicalizationMethod")?;
        let canonicalization = canonicalization_method.required_attribute("Algorithm")?.to_string();
        let signed_info_prefixes = prefix_list(canonicalization_method);
        let algorithm = signed_info
            .required_child(XMLDSIG_NS, "SignatureMethod")?
            .required_attribute("Algorithm")?
            .to_string();

        let reference = signed_info.required_child(XMLDSIG_NS, "Reference")?;
        let reference_uri = reference.attribute("URI").unwrap_or_default().to_string();
        let transform_elements: Vec<&XmlElement> = reference
            .child_element(XMLDSIG_NS, "Transforms")
            .map(|t| t.children_named(XMLDSIG_NS, "Transform").collect())
            .unwrap_or_default();
        let transforms = transform_elements
            .iter()
            .filter_map(|tr| tr.attribute("Algorithm"))
            .map(str::to_string)
            .collect();
        let inclusive_prefixes = transform_elements
            .iter()
            .find(|tr| tr.attribute("Algorithm") == Some(transforms::EXCLUSIVE_C14N))
            .map(|tr| prefix_list(tr))
            .unwrap_or_default();
        let digest_algorithm = reference
            .required_child(XMLDSIG_NS, "DigestMethod")?
            .required_attribute("Algorithm")?
            .to_string();
        let digest_value = decode_base64(&reference.required_child(XMLDSIG_NS, "DigestValue")?.text_content())?;
        let signature_value =
            decode_base64(&signature.required_child(XMLDSIG_NS, "SignatureValue")?.text_content())?;

        let certificates = signature
            .child_element(XMLDSIG_NS, "KeyInfo")
            .into_iter()
            .flat_map(|ki| ki.children_named(XMLDSIG_NS, "X509Data"))
            .flat_map(|xd| xd.children_named(XMLDSIG_NS, "X509Certificate"))
            .map(|c| Certificate::from_base64(&c.text_content()))
            .collect::<SamlResult<Vec<_>>>()?;

        Ok(XmlSignature {
            signed_info: signed_info.clone(),
            canonicalization,
            algorithm,
            reference_uri,
            transforms,
            inclusive_prefixes,
            signed_info_prefixes,
            digest_algorithm,
            digest_value,
            signature_value,
            certificates,
        })
    }

    /// Verifies the signature at `signature_position` among `target`'s children.
    ///
    /// `root` is the whole document `target` belongs to. Each certificate is
    /// tried in order; the index of the first one that verifies is returned.
    pub fn verify(
        &self,
        root: &XmlElement,
        target: &XmlElement,
        signature_position: usize,
        certificates: &[Certificate],
        at: DateTime<Utc>,
    ) -> SamlResult<usize> {
        let Some(XmlNode::Element(element)) = target.children.get(signature_position) else {
            return Err(SamlError::InvalidSignature("signature element not found".to_string()));
        };
        let signature = Self::extract(element)?;

        if signature.canonicalization != transforms::EXCLUSIVE_C14N {
            return Err(SamlError::InvalidSignature(format!(
                "unsupported canonicalization {}",
                signature.canonicalization
            )));
        }
        if let Some(other) = signature
            .transforms
            .iter()
            .find(|t| *t != transforms::ENVELOPED_SIGNATURE && *t != transforms::EXCLUSIVE_C14N)
        {
            return Err(SamlError::InvalidSignature(format!("unsupported transform {other}")));
        }

        self.check_reference(root, target, &signature)?;
        let inherited = root.inherited_namespaces(target).unwrap_or_default();
        self.verify_digest(target, signature_position, &signature, inherited.clone())?;

        let algorithm = SignatureAlgorithm::from_uri(&signature.algorithm)
            .ok_or_else(|| SamlError::UnsupportedSignatureAlgorithm(signature.algorithm.clone()))?;
        let mut signed_info_scope = inherited;
        signed_info_scope.extend(target.namespaces.iter().cloned());
        signed_info_scope.extend(element.namespaces.iter().cloned());
        let signed_info = ExclusiveC14n::new()
            .with_inherited(signed_info_scope)
            .with_inclusive_prefixes(&signature.signed_info_prefixes)
            .canonicalize(&signature.signed_info);

        let mut reasons = Vec::new();
        for (index, certificate) in certificates.iter().enumerate() {
            match self.verify_signature_with_cert(certificate, algorithm, &signed_info, &signature, at) {
                Ok(()) => {
                    tracing::debug!(
                        fingerprint = certificate.fingerprint(),
                        algorithm = algorithm.uri(),
                        "XML signature verified"
                    );
                    return Ok(index);
                }
                Err(reason) => reasons.push(reason),
            }
        }

        if reasons.is_empty() {
            reasons.push("no certificates supplied".to_string());
        }
        tracing::warn!(reasons = ?reasons, "XML signature verification failed");
        Err(SamlError::InvalidSignature(reasons.join("; ")))
    }

    /// Verifies a detached signature over the redirect-binding base string.
    ///
    /// Returns the index of the first key that verifies.
    pub fn validate_redirect_binding(
        &self,
        data: &[u8],
        algorithm: SignatureAlgorithm,
        signature: &[u8],
        keys: &[VerificationKey],
    ) -> SamlResult<usize> {
        if !algorithm.redirect_allowed() {
            return Err(SamlError::UnsupportedSignatureAlgorithm(algorithm.uri().to_string()));
        }

        for (index, key) in keys.iter().enumerate() {
            if let Some(cert) = key.certificate() {
                if let Err(reason) = self.check_trust(cert) {
                    tracing::debug!(index, reason = %reason, "Skipping untrusted key");
                    continue;
                }
            }
            match key.verify(algorithm, data, signature) {
                Ok(true) => return Ok(index),
                Ok(false) => {}
                Err(e) => tracing::debug!(index, error = %e, "Key could not verify signature"),
            }
        }

        Err(SamlError::InvalidSignature(format!(
            "none of {} keys verified the redirect signature",
            keys.len()
        )))
    }

    fn check_reference(
        &self,
        root: &XmlElement,
        target: &XmlElement,
        signature: &XmlSignature,
    ) -> SamlResult<()> {
        let id = signature.reference_id();
        if id.is_empty() {
            if std::ptr::eq(root, target) {
                return Ok(());
            }
            return Err(SamlError::InvalidSignature(
                "empty reference on a non-root element".to_string(),
            ));
        }

        if target.attribute("ID") != Some(id) {
            return Err(SamlError::InvalidSignature(format!(
                "reference #{id} does not name the signed element"
            )));
        }
        if root.count_id(id) > 1 {
            return Err(SamlError::InvalidSignature(format!("duplicate ID {id}")));
        }
        Ok(())
    }

    fn verify_digest(
        &self,
        target: &XmlElement,
        signature_position: usize,
        signature: &XmlSignature,
        inherited: Vec<(Option<String>, String)>,
    ) -> SamlResult<()> {
        let digest = DigestAlgorithm::from_uri(&signature.digest_algorithm)
            .ok_or_else(|| SamlError::UnsupportedSignatureAlgorithm(signature.digest_algorithm.clone()))?;

        let canonical = ExclusiveC14n::new()
            .with_inherited(inherited)
            .with_inclusive_prefixes(&signature.inclusive_prefixes)
            .omitting_child(signature_position)
            .canonicalize(target);
        let computed = hash(digest.message_digest(), &canonical)?;

        if computed.len() != signature.digest_value.len()
            || !openssl::memcmp::eq(&computed, &signature.digest_value)
        {
            return Err(SamlError::InvalidSignature("digest mismatch".to_string()));
        }
        Ok(())
    }

    fn verify_signature_with_cert(
        &self,
        certificate: &Certificate,
        algorithm: SignatureAlgorithm,
        signed_info: &[u8],
        signature: &XmlSignature,
        at: DateTime<Utc>,
    ) -> Result<(), String> {
        if !certificate.is_valid_at(at) {
            return Err(format!(
                "certificate {} is not valid at {}",
                certificate.fingerprint(),
                at.to_rfc3339()
            ));
        }
        self.check_trust(certificate)?;

        let key = VerificationKey::from_certificate(certificate.clone()).map_err(|e| e.to_string())?;
        match key.verify(algorithm, signed_info, &signature.signature_value) {
            Ok(true) => Ok(()),
            Ok(false) => Err(format!(
                "signature does not verify with certificate {}",
                certificate.fingerprint()
            )),
            Err(e) => Err(e.to_string()),
        }
    }

    fn check_trust(&self, certificate: &Certificate) -> Result<(), String> {
        match self.validation {
            CertificateValidation::LeafOnly => Ok(()),
            CertificateValidation::Anchored => {
                if self.trust_anchors.iter().any(|anchor| certificate.is_issued_by(anchor)) {
                    Ok(())
                } else {
                    Err(format!(
                        "certificate {} is not issued by a trust anchor",
                        certificate.fingerprint()
                    ))
                }
            }
        }
    }
}

/// Reads the `PrefixList` of an `<ec:InclusiveNamespaces>` child.
fn prefix_list(method: &XmlElement) -> Vec<String> {
    method
        .child_element(EXC_C14N_NS, "InclusiveNamespaces")
        .and_then(|ns| ns.attribute("PrefixList"))
        .map(|list| list.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn decode_base64(text: &str) -> SamlResult<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
}
