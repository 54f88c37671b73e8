//! Trust for nodes serving a self-signed certificate.
//!
//! bchd generates `rpc.cert` on first start and serves RPC and websocket
//! over TLS with it. The certificate is marked as a CA and used directly as
//! the server certificate, which OpenSSL-based verification accepts once the
//! certificate is a trusted root.

use nameindex_core::error::IndexerError;

/// Parse a PEM certificate to add as a trusted root.
pub fn root_certificate(pem: &[u8]) -> Result<native_tls::Certificate, IndexerError> {
    native_tls::Certificate::from_pem(pem)
        .map_err(|e| IndexerError::Config(format!("invalid node certificate: {e}")))
}

/// TLS connector trusting `pem` in addition to the system roots.
pub fn tls_connector(pem: &[u8]) -> Result<native_tls::TlsConnector, IndexerError> {
    native_tls::TlsConnector::builder()
        .add_root_certificate(root_certificate(pem)?)
        .build()
        .map_err(|e| IndexerError::Config(format!("cannot build TLS connector: {e}")))
}

#[cfg(test)]
pub(crate) mod testing {
    //! A bchd-style certificate for 127.0.0.1 and a blocking TLS acceptor.

    pub const CERT: &[u8] = include_bytes!("../tests/fixtures/rpc.cert");
    pub const KEY: &[u8] = include_bytes!("../tests/fixtures/rpc.key");

    pub fn acceptor() -> native_tls::TlsAcceptor {
        let identity = native_tls::Identity::from_pkcs8(CERT, KEY).unwrap();
        native_tls::TlsAcceptor::new(identity).unwrap()
    }
}
