// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Certificate and signing key capabilities.

Key material is acquired once at the top of a signing operation and
shared read-only across signer tasks. The providers here are the seams
behind which credential acquisition (a remote signing service, an HSM,
a file) lives; this crate only ever sees a parsed certificate and an
opaque key handle.
*/

use {
    crate::error::{Result, SigningError},
    async_trait::async_trait,
    std::sync::Arc,
    x509_certificate::{
        rfc4519::{
            OID_COMMON_NAME, OID_COUNTRY_NAME, OID_LOCALITY_NAME, OID_ORGANIZATIONAL_UNIT_NAME,
            OID_ORGANIZATION_NAME, OID_STATE_PROVINCE_NAME,
        },
        CapturedX509Certificate, InMemorySigningKeyPair,
    },
};

/// Vends the X.509 certificate used for signing.
#[async_trait]
pub trait CertificateProvider: Send + Sync {
    async fn signing_certificate(&self) -> Result<Arc<CapturedX509Certificate>>;
}

/// Vends the RSA private key used for signing.
#[async_trait]
pub trait SignatureAlgorithmProvider: Send + Sync {
    async fn rsa_signing_key(&self) -> Result<Arc<InMemorySigningKeyPair>>;
}

/// A [CertificateProvider] over a certificate already in memory.
pub struct MemoryCertificateProvider {
    certificate: Arc<CapturedX509Certificate>,
}

impl MemoryCertificateProvider {
    pub fn new(certificate: CapturedX509Certificate) -> Self {
        Self {
            certificate: Arc::new(certificate),
        }
    }
}

#[async_trait]
impl CertificateProvider for MemoryCertificateProvider {
    async fn signing_certificate(&self) -> Result<Arc<CapturedX509Certificate>> {
        Ok(self.certificate.clone())
    }
}

/// A [SignatureAlgorithmProvider] over a key pair already in memory.
pub struct MemorySigningKeyProvider {
    key: Arc<InMemorySigningKeyPair>,
}

impl MemorySigningKeyProvider {
    pub fn new(key: InMemorySigningKeyPair) -> Self {
        Self { key: Arc::new(key) }
    }
}

#[async_trait]
impl SignatureAlgorithmProvider for MemorySigningKeyProvider {
    async fn rsa_signing_key(&self) -> Result<Arc<InMemorySigningKeyPair>> {
        Ok(self.key.clone())
    }
}

/// Render the subject distinguished name of a certificate per RFC 2253.
///
/// Relative distinguished names appear in reverse order of their ASN.1
/// sequence, joined with `,`. Attribute types with a registered keyword
/// (CN, L, ST, O, OU, C) use it; anything else renders as the dotted
/// decimal OID. Values are escaped per RFC 2253 §2.4.
pub fn publisher_from_certificate(certificate: &CapturedX509Certificate) -> Result<String> {
    let mut components = vec![];

    for atv in certificate.subject_name().iter_attributes() {
        let keyword = if atv.typ.0.as_ref() == OID_COMMON_NAME.0 {
            "CN".to_string()
        } else if atv.typ.0.as_ref() == OID_LOCALITY_NAME.0 {
            "L".to_string()
        } else if atv.typ.0.as_ref() == OID_STATE_PROVINCE_NAME.0 {
            "ST".to_string()
        } else if atv.typ.0.as_ref() == OID_ORGANIZATION_NAME.0 {
            "O".to_string()
        } else if atv.typ.0.as_ref() == OID_ORGANIZATIONAL_UNIT_NAME.0 {
            "OU".to_string()
        } else if atv.typ.0.as_ref() == OID_COUNTRY_NAME.0 {
            "C".to_string()
        } else {
            format!("{}", atv.typ)
        };

        let value = atv
            .to_string()
            .map_err(|e| SigningError::Signing(format!("bad subject attribute value: {}", e)))?;

        components.push(format!("{}={}", keyword, escape_rfc2253(&value)));
    }

    components.reverse();

    Ok(components.join(","))
}

fn escape_rfc2253(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut out = String::with_capacity(value.len());

    for (i, c) in value.chars().enumerate() {
        let escape = match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' => true,
            '#' | ' ' if i == 0 => true,
            ' ' if i == last => true,
            _ => false,
        };

        if escape {
            out.push('\\');
        }
        out.push(c);
    }

    out
}
