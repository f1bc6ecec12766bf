//! TLS endpoint probe
//!
//! Opens a TCP connection, runs a rustls client handshake with
//! `server_name = host`, and exposes the negotiated session plus the leaf
//! certificate to built-in validations and user checks. The leaf is always
//! re-verified against the system trust store, independent of `insecure`, so
//! `tls.verified` stays meaningful even when the handshake itself skips
//! verification.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use cel_interpreter::Value;
use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

use crate::core::context::ProbeContext;
use crate::core::expr::{CompiledChecks, Declarations, Expression};
use crate::core::provider::{
    parse_spec, provider_base, InstanceConfig, Provider, SetupError, DEFAULT_PROBE_TIMEOUT,
};
use crate::core::types::{Detail, ProbeResult, TlsDetail};

pub(crate) fn factory() -> Box<dyn Provider> {
    Box::<TlsProvider>::default()
}

/// System trust store, loaded once at startup; reads are lock-free.
pub(crate) fn system_roots() -> Arc<RootCertStore> {
    static ROOTS: OnceLock<Arc<RootCertStore>> = OnceLock::new();
    ROOTS
        .get_or_init(|| {
            let mut store = RootCertStore::empty();
            let native = rustls_native_certs::load_native_certs();
            for cert in native.certs {
                let _ = store.add(cert);
            }
            if store.is_empty() {
                store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }
            Arc::new(store)
        })
        .clone()
}

/// Client config verifying against the system trust store.
pub(crate) fn verifying_client_config() -> ClientConfig {
    ClientConfig::builder()
        .with_root_certificates(system_roots())
        .with_no_client_auth()
}

/// Client config that accepts any server certificate. Used wherever a spec
/// sets `insecure: true`; certificate data is still collected and verified
/// out-of-band.
pub(crate) fn insecure_client_config() -> ClientConfig {
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
        .with_no_client_auth()
}

#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct TlsSpec {
    pub host: String,
    pub port: u16,
    pub insecure: bool,
    #[serde(with = "humantime_serde")]
    pub min_validity: Option<Duration>,
    pub subject_alt_names: Vec<String>,
    pub detail: bool,
}

impl Default for TlsSpec {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 443,
            insecure: false,
            min_validity: None,
            subject_alt_names: Vec::new(),
            detail: false,
        }
    }
}

#[derive(Default)]
pub struct TlsProvider {
    name: String,
    timeout: Option<Duration>,
    spec: TlsSpec,
    raw_checks: Vec<Expression>,
    checks: CompiledChecks,
}

/// Everything checks and details need from a completed handshake.
struct SessionInfo {
    verified: bool,
    common_name: String,
    subject_alt_names: Vec<String>,
    chain: Vec<String>,
    valid_until: DateTime<Utc>,
    signature_algorithm: String,
    public_key_algorithm: String,
    version: String,
    cipher_suite: String,
}

impl TlsProvider {
    fn declarations() -> Declarations {
        Declarations::variables(&["tls"])
    }

    fn context_value(&self, info: &SessionInfo) -> HashMap<&'static str, Value> {
        HashMap::from([
            ("verified", Value::Bool(info.verified)),
            ("commonName", Value::from(info.common_name.clone())),
            (
                "subjectAltNames",
                cel_interpreter::to_value(&info.subject_alt_names).unwrap_or(Value::Null),
            ),
            (
                "chain",
                cel_interpreter::to_value(&info.chain).unwrap_or(Value::Null),
            ),
            ("validUntil", Value::Timestamp(info.valid_until.fixed_offset())),
            (
                "signatureAlgorithm",
                Value::from(info.signature_algorithm.clone()),
            ),
            (
                "publicKeyAlgorithm",
                Value::from(info.public_key_algorithm.clone()),
            ),
            ("version", Value::from(info.version.clone())),
            ("cipherSuite", Value::from(info.cipher_suite.clone())),
            ("protocol", Value::from("tcp".to_string())),
            ("serverName", Value::from(self.spec.host.clone())),
            ("port", Value::Int(i64::from(self.spec.port))),
        ])
    }

    /// Handshake and certificate introspection; errors come back classified.
    async fn connect(&self) -> Result<SessionInfo, String> {
        let server_name = ServerName::try_from(self.spec.host.clone())
            .map_err(|e| format!("invalid server name {:?}: {e}", self.spec.host))?;

        let stream = TcpStream::connect((self.spec.host.as_str(), self.spec.port))
            .await
            .map_err(|e| format!("dial tcp {}:{}: {e}", self.spec.host, self.spec.port))?;

        let config = if self.spec.insecure {
            insecure_client_config()
        } else {
            verifying_client_config()
        };
        let connector = TlsConnector::from(Arc::new(config));
        let tls_stream = connector
            .connect(server_name.clone(), stream)
            .await
            .map_err(classify_handshake_error)?;

        let (_, session) = tls_stream.get_ref();

        let version = match session.protocol_version() {
            Some(rustls::ProtocolVersion::TLSv1_2) => "TLS 1.2".to_string(),
            Some(rustls::ProtocolVersion::TLSv1_3) => "TLS 1.3".to_string(),
            Some(other) => format!("{other:?}"),
            None => "unknown".to_string(),
        };
        let cipher_suite = session
            .negotiated_cipher_suite()
            .map(|cs| format!("{:?}", cs.suite()))
            .unwrap_or_else(|| "unknown".to_string());

        let peer_certs = session
            .peer_certificates()
            .ok_or_else(|| "server presented no certificate".to_string())?
            .to_vec();
        let (leaf_der, intermediates) = peer_certs
            .split_first()
            .ok_or_else(|| "server presented no certificate".to_string())?;

        let (_, leaf) = X509Certificate::from_der(leaf_der.as_ref())
            .map_err(|e| format!("certificate invalid: {e}"))?;

        let common_name = leaf
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
            .to_string();

        let subject_alt_names = leaf
            .subject_alternative_name()
            .ok()
            .flatten()
            .map(|ext| {
                ext.value
                    .general_names
                    .iter()
                    .filter_map(|gn| match gn {
                        GeneralName::DNSName(dns) => Some((*dns).to_string()),
                        GeneralName::IPAddress(_) => None,
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut chain = Vec::with_capacity(peer_certs.len());
        for der in &peer_certs {
            if let Ok((_, cert)) = X509Certificate::from_der(der.as_ref()) {
                chain.push(cert.subject().to_string());
            }
        }

        let valid_until = DateTime::<Utc>::from_timestamp(leaf.validity().not_after.timestamp(), 0)
            .unwrap_or_default();

        // Re-verify against the system pool regardless of `insecure`.
        let verified = WebPkiServerVerifier::builder(system_roots())
            .build()
            .map(|verifier| {
                verifier
                    .verify_server_cert(leaf_der, intermediates, &server_name, &[], UnixTime::now())
                    .is_ok()
            })
            .unwrap_or(false);

        Ok(SessionInfo {
            verified,
            common_name,
            subject_alt_names,
            chain,
            valid_until,
            signature_algorithm: signature_algorithm_name(
                &leaf.signature_algorithm.algorithm.to_id_string(),
            ),
            public_key_algorithm: public_key_algorithm_name(
                &leaf.public_key().algorithm.algorithm.to_id_string(),
            ),
            version,
            cipher_suite,
        })
    }
}

#[async_trait]
impl Provider for TlsProvider {
    provider_base!("tls");

    fn configure(&mut self, instance: &InstanceConfig) -> Result<(), SetupError> {
        self.spec = parse_spec("tls", &instance.spec)?;
        self.raw_checks = instance.checks.clone();
        Ok(())
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        if self.spec.host.is_empty() {
            return Err(SetupError::invalid_spec("tls", "host must be set"));
        }
        self.checks = CompiledChecks::compile(&self.raw_checks, &Self::declarations())?;
        self.timeout.get_or_insert(DEFAULT_PROBE_TIMEOUT);
        Ok(())
    }

    async fn probe(&self, _ctx: &ProbeContext) -> ProbeResult {
        let mut result = ProbeResult::new(self.kind(), &self.name);

        let info = match self.connect().await {
            Ok(info) => info,
            Err(message) => return result.unhealthy_msg(message),
        };

        if self.spec.detail {
            result = result.with_detail(Detail::Tls(TlsDetail {
                verified: info.verified,
                common_name: info.common_name.clone(),
                subject_alt_names: info.subject_alt_names.clone(),
                chain: info.chain.clone(),
                valid_until: info.valid_until.to_rfc3339(),
                signature_algorithm: info.signature_algorithm.clone(),
                public_key_algorithm: info.public_key_algorithm.clone(),
                version: info.version.clone(),
                cipher_suite: info.cipher_suite.clone(),
            }));
        }

        let mut failures = Vec::new();

        if let Some(min_validity) = self.spec.min_validity {
            let remaining = (info.valid_until - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            if remaining < min_validity {
                failures.push(format!(
                    "certificate expires within {}: valid until {}",
                    humantime::format_duration(min_validity),
                    info.valid_until.to_rfc3339(),
                ));
            }
        }

        for required in &self.spec.subject_alt_names {
            if !info.subject_alt_names.iter().any(|san| san == required) {
                failures.push(format!("missing subject alternative name {required:?}"));
            }
        }

        let context = self.context_value(&info);
        failures.extend(self.checks.evaluate(|cel| {
            let _ = cel.add_variable_from_value("tls", context);
        }));

        if failures.is_empty() {
            result.healthy()
        } else {
            result.unhealthy(failures)
        }
    }
}

/// Map a handshake failure onto the stable message classes.
fn classify_handshake_error(err: std::io::Error) -> String {
    use rustls::CertificateError;

    let rustls_error = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>());

    match rustls_error {
        Some(rustls::Error::InvalidCertificate(cert_err)) => match cert_err {
            CertificateError::UnknownIssuer => "unknown authority".to_string(),
            CertificateError::NotValidForName => "hostname mismatch".to_string(),
            other => format!("certificate invalid: {other:?}"),
        },
        Some(other) => format!("tls handshake failed: {other}"),
        None => format!("tls handshake failed: {err}"),
    }
}

fn signature_algorithm_name(oid: &str) -> String {
    match oid {
        "1.2.840.113549.1.1.5" => "SHA1-RSA".to_string(),
        "1.2.840.113549.1.1.11" => "SHA256-RSA".to_string(),
        "1.2.840.113549.1.1.12" => "SHA384-RSA".to_string(),
        "1.2.840.113549.1.1.13" => "SHA512-RSA".to_string(),
        "1.2.840.113549.1.1.10" => "RSA-PSS".to_string(),
        "1.2.840.10045.4.3.2" => "ECDSA-SHA256".to_string(),
        "1.2.840.10045.4.3.3" => "ECDSA-SHA384".to_string(),
        "1.2.840.10045.4.3.4" => "ECDSA-SHA512".to_string(),
        "1.3.101.112" => "Ed25519".to_string(),
        other => other.to_string(),
    }
}

fn public_key_algorithm_name(oid: &str) -> String {
    match oid {
        "1.2.840.113549.1.1.1" => "RSA".to_string(),
        "1.2.840.10045.2.1" => "ECDSA".to_string(),
        "1.3.101.112" => "Ed25519".to_string(),
        other => other.to_string(),
    }
}
