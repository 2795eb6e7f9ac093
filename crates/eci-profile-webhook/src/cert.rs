//! Serving certificates signed by an operator-provided CA.
//!
//! There is no self-bootstrapped root: the CA certificate and key must be
//! provisioned ahead of time. A fresh leaf is issued on every start and is
//! never persisted.

use std::path::Path;

use chrono::{Duration, Months, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::EcKey;
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Private};
use openssl::rsa::Rsa;
use openssl::ssl::{SslAcceptor, SslMethod};
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509NameBuilder, X509};
use tracing::{debug, info};

use crate::error::{BootstrapError, Result};

const LEAF_KEY_BITS: u32 = 2048;
const LEAF_VALIDITY_MONTHS: u32 = 100 * 12;

/// PEM-encoded leaf certificate and its private key.
#[derive(Clone)]
pub struct ServingCertificate {
    /// `CERTIFICATE` block.
    pub cert_pem: Vec<u8>,
    /// `RSA PRIVATE KEY` block.
    pub key_pem: Vec<u8>,
}

impl std::fmt::Debug for ServingCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServingCertificate")
            .field("cert_pem", &String::from_utf8_lossy(&self.cert_pem))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

impl ServingCertificate {
    /// TLS acceptor presenting this certificate.
    ///
    /// # Errors
    ///
    /// Fails if the PEM blocks do not decode or the key does not match.
    pub fn acceptor(&self) -> Result<SslAcceptor> {
        let cert = X509::from_pem(&self.cert_pem)?;
        let key = PKey::private_key_from_pem(&self.key_pem)?;

        let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server())?;
        acceptor.set_certificate(&cert)?;
        acceptor.set_private_key(&key)?;
        acceptor.check_private_key()?;
        Ok(acceptor.build())
    }
}

/// Issues leaf certificates from a CA certificate and key.
pub struct Issuer {
    ca_cert: X509,
    ca_key: PKey<Private>,
    ca_pem: Vec<u8>,
}

impl Issuer {
    /// Load the CA from PEM files.
    ///
    /// # Errors
    ///
    /// Fails if either path is absent or unreadable, or the material does
    /// not decode.
    pub fn from_pem_files(cert_path: Option<&Path>, key_path: Option<&Path>) -> Result<Self> {
        let (Some(cert_path), Some(key_path)) = (cert_path, key_path) else {
            return Err(BootstrapError::Ca(
                "both --cacert and --cakey must be provided".to_string(),
            ));
        };

        let cert_pem = std::fs::read(cert_path).map_err(|e| {
            BootstrapError::Ca(format!("read CA cert {}: {e}", cert_path.display()))
        })?;
        let key_pem = std::fs::read(key_path).map_err(|e| {
            BootstrapError::Ca(format!("read CA key {}: {e}", key_path.display()))
        })?;

        info!(cert = %cert_path.display(), "creating certificate issuer with specified CA");
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Load the CA from PEM bytes.
    ///
    /// The key may be PKCS#1, PKCS#8 or SEC1, tried in that order.
    ///
    /// # Errors
    ///
    /// Fails if the certificate or key does not decode, or the key does not
    /// belong to the certificate.
    pub fn from_pem(ca_cert_pem: &[u8], ca_key_pem: &[u8]) -> Result<Self> {
        let ca_cert = X509::from_pem(ca_cert_pem)
            .map_err(|e| BootstrapError::Ca(format!("decode CA cert: {e}")))?;
        let ca_key = parse_private_key(ca_key_pem)?;

        let matches = ca_cert
            .public_key()
            .map(|public| public.public_eq(&ca_key))
            .unwrap_or(false);
        if !matches {
            return Err(BootstrapError::Ca(
                "CA key does not match CA certificate".to_string(),
            ));
        }

        Ok(Self {
            ca_cert,
            ca_key,
            ca_pem: ca_cert_pem.to_vec(),
        })
    }

    /// The CA certificate as supplied, for the webhook `caBundle`.
    #[must_use]
    pub fn ca_pem(&self) -> &[u8] {
        &self.ca_pem
    }

    /// Issue a serving certificate for `hosts`.
    ///
    /// This signs directly; there is no CSR round trip. The leaf gets a new
    /// 2048-bit RSA key and is valid from one hour ago for 100 years.
    ///
    /// # Errors
    ///
    /// Fails if key generation or signing fails.
    pub fn issue_csr(&self, common_name: &str, hosts: &[String]) -> Result<ServingCertificate> {
        let rsa = Rsa::generate(LEAF_KEY_BITS)?;
        let key = PKey::from_rsa(rsa.clone())?;

        let mut subject = X509NameBuilder::new()?;
        subject.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
        let subject = subject.build();

        // Backdated against clock skew.
        let valid_from = Utc::now() - Duration::hours(1);
        let valid_until = valid_from
            .checked_add_months(Months::new(LEAF_VALIDITY_MONTHS))
            .ok_or_else(|| BootstrapError::Ca("leaf validity overflows".into()))?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        let serial: openssl::asn1::Asn1Integer = random_serial()?.to_asn1_integer()?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&subject)?;
        builder.set_issuer_name(self.ca_cert.subject_name())?;
        builder.set_pubkey(&key)?;
        let not_before: Asn1Time = Asn1Time::from_unix(valid_from.timestamp())?;
        let not_after: Asn1Time = Asn1Time::from_unix(valid_until.timestamp())?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;

        builder.append_extension(BasicConstraints::new().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;
        builder.append_extension(ExtendedKeyUsage::new().server_auth().client_auth().build()?)?;

        let mut san = SubjectAlternativeName::new();
        for host in hosts {
            san.dns(host);
        }
        let san = san.build(&builder.x509v3_context(Some(&self.ca_cert), None))?;
        builder.append_extension(san)?;

        builder.sign(&self.ca_key, signing_digest(&self.ca_key))?;
        let cert = builder.build();

        debug!(common_name, ?hosts, "issued serving certificate");
        Ok(ServingCertificate {
            cert_pem: cert.to_pem()?,
            key_pem: rsa.private_key_to_pem()?,
        })
    }
}

fn parse_private_key(pem: &[u8]) -> Result<PKey<Private>> {
    if let Ok(key) = Rsa::private_key_from_pem(pem).and_then(PKey::from_rsa) {
        return Ok(key);
    }
    if let Ok(key) = PKey::private_key_from_pem(pem) {
        let id = key.id();
        if id == Id::RSA || id == Id::EC || id == Id::ED25519 {
            return Ok(key);
        }
        return Err(BootstrapError::Ca(
            "unknown private key type in PKCS#8 wrapping".to_string(),
        ));
    }
    if let Ok(key) = EcKey::private_key_from_pem(pem).and_then(PKey::from_ec_key) {
        return Ok(key);
    }
    Err(BootstrapError::Ca("failed to parse CA private key".to_string()))
}

fn signing_digest(key: &PKey<Private>) -> MessageDigest {
    // Ed25519 hashes internally.
    if key.id() == Id::ED25519 {
        MessageDigest::null()
    } else {
        MessageDigest::sha256()
    }
}

fn random_serial() -> std::result::Result<BigNum, ErrorStack> {
    let mut serial = BigNum::new()?;
    serial.rand(159, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial)
}
