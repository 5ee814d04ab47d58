//! TLS session setup via OpenSSL bindings: CA trust, client certificates,
//! DH parameters, cipher selection and SNI (component C's transport
//! option, configured through [`crate::config::TlsConfig`]).
use std::net::TcpStream;
use std::path::Path;
use std::sync::Once;

use openssl::ssl::{SslConnector, SslFiletype, SslMethod, SslVerifyMode};

use crate::config::TlsConfig;
use crate::error::{ClientError, ClientErrorKind, ClientResult};
use crate::transport::TlsHandle;

static INIT: Once = Once::new();

/// Runs OpenSSL's process-wide library initialization exactly once,
/// regardless of how many connections negotiate TLS concurrently.
fn ensure_library_init() {
    INIT.call_once(|| {
        openssl::init();
    });
}

fn map_ssl_err(context: &str, err: impl std::fmt::Display) -> ClientError {
    ClientError::new(ClientErrorKind::TlsError, format!("{context}: {err}"))
}

/// Builds an `SslConnector` from a [`TlsConfig`], then performs the
/// handshake over an already-connected `TcpStream`.
pub fn connect(tcp: TcpStream, host: &str, cfg: &TlsConfig) -> ClientResult<TlsHandle> {
    ensure_library_init();
    let mut builder =
        SslConnector::builder(SslMethod::tls()).map_err(|e| map_ssl_err("building TLS context", e))?;

    if let Some(ca_file) = &cfg.ca_file {
        builder
            .set_ca_file(ca_file)
            .map_err(|e| map_ssl_err("loading CA file", e))?;
    }
    if let Some(ca_dir) = &cfg.ca_dir {
        builder
            .load_verify_locations(None, Some(Path::new(ca_dir)))
            .map_err(|e| map_ssl_err("loading CA directory", e))?;
    }
    if let (Some(cert), Some(key)) = (&cfg.cert_file, &cfg.key_file) {
        builder
            .set_certificate_file(cert, SslFiletype::PEM)
            .map_err(|e| map_ssl_err("loading client certificate", e))?;
        builder
            .set_private_key_file(key, SslFiletype::PEM)
            .map_err(|e| map_ssl_err("loading client key", e))?;
        builder
            .check_private_key()
            .map_err(|e| map_ssl_err("client certificate/key mismatch", e))?;
    }
    if let Some(dh_file) = &cfg.dh_params_file {
        let pem = std::fs::read(dh_file)
            .map_err(|e| ClientError::from_io(ClientErrorKind::TlsError, e))?;
        let dh = openssl::dh::Dh::params_from_pem(&pem).map_err(|e| map_ssl_err("parsing DH params", e))?;
        builder
            .set_tmp_dh(&dh)
            .map_err(|e| map_ssl_err("installing DH params", e))?;
    }
    if let Some(ciphers) = &cfg.cipher_list {
        builder
            .set_cipher_list(ciphers)
            .map_err(|e| map_ssl_err("setting cipher list", e))?;
    }
    if let Some(suites) = &cfg.cipher_suites {
        builder
            .set_ciphersuites(suites)
            .map_err(|e| map_ssl_err("setting TLS 1.3 cipher suites", e))?;
    }
    builder.set_verify(if cfg.verify_peer {
        SslVerifyMode::PEER
    } else {
        SslVerifyMode::NONE
    });

    let connector = builder.build();
    let sni_host = cfg.sni_hostname.as_deref().unwrap_or(host);
    let stream = connector
        .connect(sni_host, tcp)
        .map_err(|e| map_ssl_err("TLS handshake failed", e))?;

    Ok(TlsHandle(std::sync::Arc::new(std::sync::Mutex::new(stream))))
}
