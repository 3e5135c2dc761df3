//! Locating and validating an embedded signature.

use std::cell::OnceCell;

use chrono::{DateTime, Utc};

use super::{Certificate, XmlSignature, XmlSignatureValidator};
use crate::types::XMLDSIG_NS;
use crate::xml::{XmlElement, XmlNode};

/// An element that may carry an enveloped XML signature.
///
/// Structural problems are reported as a list of reasons rather than an
/// error, so callers can say why a signature was rejected.
pub trait Signable {
    /// The whole document the signed element belongs to.
    fn signed_document(&self) -> Option<&XmlElement>;

    /// The element the signature covers. Defaults to the document root.
    fn signed_target(&self) -> Option<&XmlElement> {
        self.signed_document()
    }

    /// Position of the signature among the target's children.
    ///
    /// Implementors cache the result of [`locate_signature`].
    fn signature_position(&self) -> Option<usize>;

    /// The time certificate validity is checked at.
    fn verification_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Returns true if a signature referencing the target is present.
    fn is_signed(&self) -> bool {
        self.signature_position().is_some()
    }

    /// Returns the parsed signature, if present and well formed.
    fn signature(&self) -> Option<XmlSignature> {
        let position = self.signature_position()?;
        match self.signed_target()?.children.get(position)? {
            XmlNode::Element(element) => XmlSignatureValidator::extract(element).ok(),
            XmlNode::Text(_) => None,
        }
    }

    /// Validates the signature and returns the reasons it is not valid.
    ///
    /// Explicit `certificates` are used when given. Otherwise the
    /// certificates embedded in the signature are used, but only those
    /// matching one of `fingerprints`. An empty list means valid.
    fn validate_signature_at(
        &self,
        validator: &XmlSignatureValidator,
        fingerprints: &[&str],
        certificates: &[Certificate],
        at: DateTime<Utc>,
    ) -> Vec<String> {
        let (Some(root), Some(target), Some(position)) = (
            self.signed_document(),
            self.signed_target(),
            self.signature_position(),
        ) else {
            return vec!["not signed".to_string()];
        };

        let embedded: Vec<Certificate>;
        let certificates = if certificates.is_empty() {
            embedded = self
                .signature()
                .map(|sig| sig.certificates)
                .unwrap_or_default()
                .into_iter()
                .filter(|cert| fingerprints.iter().any(|fp| cert.matches_fingerprint(fp)))
                .collect();
            if embedded.is_empty() {
                return vec!["no certificate found".to_string()];
            }
            embedded.as_slice()
        } else {
            certificates
        };

        match validator.verify(root, target, position, certificates, at) {
            Ok(_) => Vec::new(),
            Err(e) => vec![e.to_string()],
        }
    }

    /// Validates under `validator`'s trust policy at [`Self::verification_time`].
    fn validate_signature_with(
        &self,
        validator: &XmlSignatureValidator,
        fingerprints: &[&str],
        certificates: &[Certificate],
    ) -> Vec<String> {
        self.validate_signature_at(validator, fingerprints, certificates, self.verification_time())
    }

    /// Validates with the default trust policy at [`Self::verification_time`].
    fn validate_signature(&self, fingerprints: &[&str], certificates: &[Certificate]) -> Vec<String> {
        self.validate_signature_with(&XmlSignatureValidator::default(), fingerprints, certificates)
    }

    /// Returns true if [`Self::validate_signature`] reports no reasons.
    fn is_signature_valid(&self, fingerprints: &[&str], certificates: &[Certificate]) -> bool {
        self.validate_signature(fingerprints, certificates).is_empty()
    }
}

/// Finds the signature child of `target` that references it.
///
/// A signature counts only if its reference URI is `#ID` of the target, or
/// empty when the target is the document root.
#[must_use]
pub fn locate_signature(root: &XmlElement, target: &XmlElement) -> Option<usize> {
    let id = target.attribute("ID");
    let is_root = std::ptr::eq(root, target);

    target.children.iter().position(|node| {
        let XmlNode::Element(element) = node else {
            return false;
        };
        if !element.is(XMLDSIG_NS, "Signature") {
            return false;
        }
        let Some(uri) = element
            .child_element(XMLDSIG_NS, "SignedInfo")
            .and_then(|si| si.child_element(XMLDSIG_NS, "Reference"))
            .map(|r| r.attribute("URI").unwrap_or_default())
        else {
            return false;
        };

        match uri.strip_prefix('#') {
            Some(referenced) => Some(referenced) == id,
            None => uri.is_empty() && is_root,
        }
    })
}

/// A borrowed view of a signed element inside a larger document.
#[derive(Debug)]
pub struct SignedElement<'a> {
    root: &'a XmlElement,
    target: &'a XmlElement,
    position: OnceCell<Option<usize>>,
    at: Option<DateTime<Utc>>,
}

impl<'a> SignedElement<'a> {
    /// Views `target`, which must be `root` or a descendant of it.
    #[must_use]
    pub fn new(root: &'a XmlElement, target: &'a XmlElement) -> Self {
        Self {
            root,
            target,
            position: OnceCell::new(),
            at: None,
        }
    }

    /// Fixes the verification time instead of using the current time.
    #[must_use]
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = Some(at);
        self
    }

    /// The signed element.
    #[must_use]
    pub fn target(&self) -> &'a XmlElement {
        self.target
    }
}

impl Signable for SignedElement<'_> {
    fn signed_document(&self) -> Option<&XmlElement> {
        Some(self.root)
    }

    fn signed_target(&self) -> Option<&XmlElement> {
        Some(self.target)
    }

    fn signature_position(&self) -> Option<usize> {
        *self
            .position
            .get_or_init(|| locate_signature(self.root, self.target))
    }

    fn verification_time(&self) -> DateTime<Utc> {
        self.at.unwrap_or_else(Utc::now)
    }
}
