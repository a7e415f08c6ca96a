//! Ephemeral CA for terminate-and-check-SNI routes.
//!
//! A fresh CA is generated at startup and lives only in memory. Its
//! certificate (never its key) is exported so the harness can add it to the
//! agent's trust store; leaf certificates for the allowlisted names are
//! minted from it on demand.
//!
//! Certificates are short-lived (24 hours) and use ECDSA P-384.

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, Issuer,
    KeyUsagePurpose, SanType,
};
use rustls_pki_types::CertificateDer;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

/// Validity of the CA and of every leaf it signs.
const CERT_VALIDITY_DAYS: i64 = 1;

/// Errors from CA generation, signing and export.
#[derive(Debug, Error)]
pub enum CaError {
    /// Failed to generate key pair.
    #[error("Failed to generate key pair: {0}")]
    KeyGeneration(String),

    /// Failed to generate the CA certificate.
    #[error("Failed to generate certificate: {0}")]
    CertGeneration(String),

    /// A name cannot be encoded as a DNS subject alternative name.
    #[error("Invalid certificate name '{name}': {message}")]
    InvalidName {
        /// Offending name.
        name: String,
        /// rcgen's description.
        message: String,
    },

    /// No names were given for a leaf certificate.
    #[error("No domains specified for certificate")]
    NoDomains,

    /// Failed to sign a leaf certificate.
    #[error("Failed to sign certificate: {0}")]
    Signing(String),

    /// Failed to write the exported CA certificate.
    #[error("Failed to write {path}: {source}")]
    WriteFile {
        /// Destination path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// In-memory CA.
pub struct EphemeralCa {
    key_pair: rcgen::KeyPair,
    params: CertificateParams,
    cert_pem: String,
    cert_der: CertificateDer<'static>,
}

/// Leaf certificate minted by [`EphemeralCa`].
pub struct DomainCertificate {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded PKCS#8 private key.
    pub key_pem: String,
}

impl std::fmt::Debug for EphemeralCa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralCa").finish_non_exhaustive()
    }
}

impl EphemeralCa {
    /// Generate a new CA.
    pub fn generate() -> Result<Self, CaError> {
        info!("Generating ephemeral CA certificate");

        let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384)
            .map_err(|e| CaError::KeyGeneration(e.to_string()))?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String("netfence Ephemeral CA".to_string()),
        );
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String("netfence".to_string()),
        );
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::minutes(5);
        params.not_after = now + Duration::days(CERT_VALIDITY_DAYS);

        let cert = params
            .clone()
            .self_signed(&key_pair)
            .map_err(|e| CaError::CertGeneration(e.to_string()))?;

        Ok(Self {
            key_pair,
            params,
            cert_pem: cert.pem(),
            cert_der: cert.der().clone(),
        })
    }

    /// CA certificate in PEM form.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// CA certificate in DER form, for adding to a rustls root store.
    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    /// Write the CA certificate to `path` (mode 0644), creating parent
    /// directories. The key is never written.
    pub fn export(&self, path: &Path) -> Result<(), CaError> {
        let write_err = |source| CaError::WriteFile {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        fs::write(path, &self.cert_pem).map_err(write_err)?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o644)).map_err(write_err)?;

        info!("Exported CA certificate to {}", path.display());
        Ok(())
    }

    /// Mint a leaf certificate for `domains`; the first becomes the CN.
    pub fn generate_cert(&self, domains: &[&str]) -> Result<DomainCertificate, CaError> {
        let Some(first) = domains.first() else {
            return Err(CaError::NoDomains);
        };

        debug!("Generating certificate for domains: {:?}", domains);

        let leaf_key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384)
            .map_err(|e| CaError::KeyGeneration(e.to_string()))?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(first.to_string()));
        params.distinguished_name = dn;

        params.subject_alt_names = domains
            .iter()
            .map(|d| {
                (*d).try_into()
                    .map(SanType::DnsName)
                    .map_err(|e: rcgen::Error| CaError::InvalidName {
                        name: d.to_string(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::minutes(5);
        params.not_after = now + Duration::days(CERT_VALIDITY_DAYS);

        let issuer = Issuer::from_params(&self.params, &self.key_pair);
        let cert = params
            .signed_by(&leaf_key, &issuer)
            .map_err(|e| CaError::Signing(e.to_string()))?;

        Ok(DomainCertificate {
            cert_pem: cert.pem(),
            key_pem: leaf_key.serialize_pem(),
        })
    }
}
