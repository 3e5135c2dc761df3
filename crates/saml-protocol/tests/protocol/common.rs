//! Common test utilities and fixtures.

use chrono::Utc;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::dsa::Dsa;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder};

use saml_protocol::signature::{Certificate, SigningKey, VerificationKey};

/// A signing key with its certificate.
pub struct Party {
    /// Private key.
    pub key: SigningKey,
    /// Certificate for the key.
    pub certificate: Certificate,
    pkey: PKey<Private>,
}

impl Party {
    /// An RSA-2048 party with a self-signed certificate.
    pub fn rsa(cn: &str) -> anyhow::Result<Self> {
        Self::self_signed(PKey::from_rsa(Rsa::generate(2048)?)?, cn)
    }

    /// A DSA-1024 party with a self-signed certificate.
    pub fn dsa(cn: &str) -> anyhow::Result<Self> {
        Self::self_signed(PKey::from_dsa(Dsa::generate(1024)?)?, cn)
    }

    /// An RSA-2048 party whose certificate is issued by `self`.
    pub fn issue(&self, cn: &str) -> anyhow::Result<Self> {
        let pkey = PKey::from_rsa(Rsa::generate(2048)?)?;
        let issuer = openssl::x509::X509::from_der(self.certificate.der())?;
        let certificate = build_certificate(&pkey, cn, issuer.subject_name(), &self.pkey)?;
        Ok(Self {
            key: SigningKey::from_pkey(pkey.clone())?,
            certificate,
            pkey,
        })
    }

    /// The verification key for the certificate.
    pub fn verification_key(&self) -> anyhow::Result<VerificationKey> {
        Ok(VerificationKey::from_certificate(self.certificate.clone())?)
    }

    fn self_signed(pkey: PKey<Private>, cn: &str) -> anyhow::Result<Self> {
        let name = subject(cn)?;
        let certificate = build_certificate(&pkey, cn, &name, &pkey)?;
        Ok(Self {
            key: SigningKey::from_pkey(pkey.clone())?,
            certificate,
            pkey,
        })
    }
}

fn subject(cn: &str) -> anyhow::Result<openssl::x509::X509Name> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", cn)?;
    Ok(name.build())
}

fn build_certificate(
    pkey: &PKey<Private>,
    cn: &str,
    issuer: &openssl::x509::X509NameRef,
    issuer_key: &PKey<Private>,
) -> anyhow::Result<Certificate> {
    let mut serial = BigNum::new()?;
    serial.rand(64, MsbOption::MAYBE_ZERO, false)?;

    let now = Utc::now().timestamp();
    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    let serial = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;
    let subject_name = subject(cn)?;
    builder.set_subject_name(&subject_name)?;
    builder.set_issuer_name(issuer)?;
    builder.set_pubkey(pkey)?;
    let not_before = Asn1Time::from_unix(now - 3600)?;
    builder.set_not_before(&not_before)?;
    let not_after = Asn1Time::from_unix(now + 86_400)?;
    builder.set_not_after(&not_after)?;
    builder.sign(issuer_key, MessageDigest::sha256())?;

    Ok(Certificate::from_x509(builder.build())?)
}

/// Installs a test subscriber once; `RUST_LOG` overrides the filter.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("saml_protocol=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Returns the raw value of query parameter `name` in `url`.
pub fn raw_param<'a>(url: &'a str, name: &str) -> Option<&'a str> {
    let query = url.split_once('?')?.1;
    query
        .split('&')
        .find_map(|segment| segment.strip_prefix(name)?.strip_prefix('='))
}

/// Replaces the raw value of query parameter `name` in `url`.
pub fn replace_param(url: &str, name: &str, value: &str) -> String {
    match raw_param(url, name) {
        Some(old) => url.replacen(&format!("{name}={old}"), &format!("{name}={value}"), 1),
        None => url.to_string(),
    }
}
