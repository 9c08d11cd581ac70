//! TLS configuration for encrypted connections.
//!
//! `sslmode=require` (the default) encrypts without verifying the server
//! certificate. `verify-ca` checks the chain against trusted roots, and
//! `verify-full` additionally checks the hostname.

use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pemfile::Item;
use std::fs;
use std::sync::Arc;

/// SSL/TLS connection mode matching PostgreSQL `sslmode` parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    /// No TLS (plaintext connection)
    Disable,
    /// TLS required, but server certificate is not verified
    #[default]
    Require,
    /// TLS required, server certificate must be signed by a trusted CA
    VerifyCa,
    /// TLS required, server certificate must be signed by a trusted CA and hostname must match
    VerifyFull,
}

impl SslMode {
    /// Whether this mode requires certificate verification (CA or full)
    pub fn requires_verification(&self) -> bool {
        matches!(self, Self::VerifyCa | Self::VerifyFull)
    }

    /// Whether an SSLRequest is sent at all
    pub fn uses_tls(&self) -> bool {
        !matches!(self, Self::Disable)
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disable => write!(f, "disable"),
            Self::Require => write!(f, "require"),
            Self::VerifyCa => write!(f, "verify-ca"),
            Self::VerifyFull => write!(f, "verify-full"),
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "disable" => Ok(Self::Disable),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            _ => Err(Error::Config(format!(
                "invalid sslmode '{}': expected disable, require, verify-ca, or verify-full",
                s
            ))),
        }
    }
}

/// Compiled TLS settings for one connection
#[derive(Clone)]
pub struct TlsConfig {
    mode: SslMode,
    client_config: Arc<ClientConfig>,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("mode", &self.mode)
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

impl TlsConfig {
    /// Build the rustls configuration for `mode`.
    ///
    /// `root_cert` is a PEM file of trusted CAs; without it the verifying modes
    /// use the platform store, falling back to the bundled Mozilla roots.
    pub fn new(mode: SslMode, root_cert: Option<&str>) -> Result<Self> {
        let verifier: Arc<dyn ServerCertVerifier> = match mode {
            SslMode::Disable => {
                return Err(Error::Config("TLS requested with sslmode=disable".into()));
            }
            SslMode::Require => Arc::new(AcceptAnyCert) as Arc<dyn ServerCertVerifier>,
            SslMode::VerifyCa | SslMode::VerifyFull => {
                let roots = match root_cert {
                    Some(path) => load_custom_ca(path)?,
                    None => load_system_roots(),
                };
                let inner = WebPkiServerVerifier::builder(Arc::new(roots))
                    .build()
                    .map_err(|e| Error::Config(format!("invalid TLS root store: {}", e)))?;
                if mode == SslMode::VerifyCa {
                    Arc::new(IgnoreHostname { inner }) as Arc<dyn ServerCertVerifier>
                } else {
                    inner as Arc<dyn ServerCertVerifier>
                }
            }
        };

        let client_config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        Ok(Self {
            mode,
            client_config: Arc::new(client_config),
        })
    }

    /// The mode this configuration was built for
    pub fn mode(&self) -> SslMode {
        self.mode
    }

    /// Get the rustls ClientConfig for this TLS configuration.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Server name used for SNI and, under `verify-full`, hostname checks
    pub fn server_name(&self, hostname: &str) -> Result<ServerName<'static>> {
        let name = parse_server_name(hostname)?;
        ServerName::try_from(name)
            .map_err(|_| Error::Config(format!("invalid hostname for TLS: {}", hostname)))
    }
}

fn load_system_roots() -> RootCertStore {
    let mut store = RootCertStore::empty();
    let result = rustls_native_certs::load_native_certs();
    let (added, _) = store.add_parsable_certificates(result.certs);

    if added == 0 {
        tracing::debug!("no native root certificates found, using bundled roots");
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    store
}

/// Load a custom CA certificate from a PEM file.
fn load_custom_ca(ca_path: &str) -> Result<RootCertStore> {
    let ca_cert_data = fs::read(ca_path).map_err(|e| {
        Error::Config(format!(
            "failed to read CA certificate file '{}': {}",
            ca_path, e
        ))
    })?;

    let mut reader = std::io::Cursor::new(&ca_cert_data);
    let mut root_store = RootCertStore::empty();
    let mut found_certs = 0;

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::X509Certificate(cert))) => {
                let (added, _ignored) = root_store.add_parsable_certificates(std::iter::once(cert));
                found_certs += added;
            }
            // Skip private keys and other non-certificate items
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => {
                return Err(Error::Config(format!(
                    "failed to parse CA certificate from '{}'",
                    ca_path
                )));
            }
        }
    }

    if found_certs == 0 {
        return Err(Error::Config(format!(
            "no valid certificates found in '{}'",
            ca_path
        )));
    }

    Ok(root_store)
}

/// Strip a trailing dot and reject names that cannot be a hostname or IPv4 address
pub fn parse_server_name(hostname: &str) -> Result<String> {
    let hostname = hostname.trim_end_matches('.');

    if hostname.is_empty() || hostname.len() > 253 {
        return Err(Error::Config(format!(
            "invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    if !hostname
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '.')
    {
        return Err(Error::Config(format!(
            "invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    Ok(hostname.to_string())
}

fn supported_schemes() -> Vec<SignatureScheme> {
    rustls::crypto::aws_lc_rs::default_provider()
        .signature_verification_algorithms
        .supported_schemes()
}

/// Accepts any server certificate (`sslmode=require`)
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        supported_schemes()
    }
}

/// Verifies the chain but not the hostname (`sslmode=verify-ca`)
#[derive(Debug)]
struct IgnoreHostname {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for IgnoreHostname {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForName)) => {
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_config_builds() {
        let tls = TlsConfig::new(SslMode::Require, None).unwrap();
        assert_eq!(tls.mode(), SslMode::Require);
        assert!(format!("{:?}", tls).contains("Require"));
    }

    #[test]
    fn test_verify_full_config_builds() {
        let tls = TlsConfig::new(SslMode::VerifyFull, None).unwrap();
        assert_eq!(tls.mode(), SslMode::VerifyFull);
    }

    #[test]
    fn test_disable_has_no_tls_config() {
        assert!(TlsConfig::new(SslMode::Disable, None).is_err());
    }

    #[test]
    fn test_missing_root_cert_file() {
        let err = TlsConfig::new(SslMode::VerifyCa, Some("/nonexistent/ca.pem")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_root_cert_file_without_certs() {
        let path = std::env::temp_dir().join(format!("pgwire-lite-empty-{}.pem", std::process::id()));
        std::fs::write(&path, "not a certificate\n").unwrap();
        let err = TlsConfig::new(SslMode::VerifyCa, path.to_str()).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(err.to_string().contains("no valid certificates"));
    }

    #[test]
    fn test_root_cert_file_with_unparsable_cert() {
        let path = std::env::temp_dir().join(format!("pgwire-lite-bad-{}.pem", std::process::id()));
        let pem = "-----BEGIN CERTIFICATE-----\nbm90IGEgY2VydGlmaWNhdGU=\n-----END CERTIFICATE-----\n";
        std::fs::write(&path, pem).unwrap();
        let err = TlsConfig::new(SslMode::VerifyFull, path.to_str()).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(err.to_string().contains("no valid certificates"));
    }

    #[test]
    fn test_server_name() {
        let tls = TlsConfig::new(SslMode::Require, None).unwrap();
        assert!(tls.server_name("db.internal.example.com").is_ok());
        assert!(tls.server_name("example.com.").is_ok());
        assert!(tls.server_name("10.0.0.5").is_ok());
        assert!(tls.server_name("").is_err());
        assert!(tls.server_name("bad host").is_err());
    }

    #[test]
    fn test_ssl_mode_from_str() {
        assert_eq!("disable".parse::<SslMode>().unwrap(), SslMode::Disable);
        assert_eq!("require".parse::<SslMode>().unwrap(), SslMode::Require);
        assert_eq!("verify-ca".parse::<SslMode>().unwrap(), SslMode::VerifyCa);
        assert_eq!(
            "verify-full".parse::<SslMode>().unwrap(),
            SslMode::VerifyFull
        );
    }

    #[test]
    fn test_ssl_mode_from_str_invalid() {
        assert!("invalid".parse::<SslMode>().is_err());
        assert!("prefer".parse::<SslMode>().is_err());
    }

    #[test]
    fn test_ssl_mode_display() {
        assert_eq!(SslMode::Disable.to_string(), "disable");
        assert_eq!(SslMode::Require.to_string(), "require");
        assert_eq!(SslMode::VerifyCa.to_string(), "verify-ca");
        assert_eq!(SslMode::VerifyFull.to_string(), "verify-full");
    }

    #[test]
    fn test_ssl_mode_default_encrypts_without_verifying() {
        let mode = SslMode::default();
        assert_eq!(mode, SslMode::Require);
        assert!(mode.uses_tls());
        assert!(!mode.requires_verification());
    }

    #[test]
    fn test_ssl_mode_requires_verification() {
        assert!(!SslMode::Disable.requires_verification());
        assert!(!SslMode::Disable.uses_tls());
        assert!(SslMode::VerifyCa.requires_verification());
        assert!(SslMode::VerifyFull.requires_verification());
    }
}
