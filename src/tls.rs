use std::sync::Arc;

use tracing::warn;

use crate::error::Error;

/// Trust anchors used to verify server certificates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TlsRootStore {
    #[default]
    WebPki,
    System,
}

pub(crate) fn tls_config_error(message: impl Into<String>) -> Error {
    Error::TlsConfig {
        message: message.into(),
    }
}

fn build_root_store(root_store: TlsRootStore) -> Result<rustls::RootCertStore, Error> {
    match root_store {
        TlsRootStore::WebPki => Ok(rustls::RootCertStore::from_iter(
            webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
        )),
        TlsRootStore::System => {
            let mut store = rustls::RootCertStore::empty();
            let loaded = rustls_native_certs::load_native_certs();
            if !loaded.errors.is_empty() {
                warn!(
                    error_count = loaded.errors.len(),
                    "system root certificate loading returned partial errors"
                );
            }
            let (added, _ignored) = store.add_parsable_certificates(loaded.certs);
            if added == 0 {
                return Err(tls_config_error("failed to load system root certificates"));
            }
            Ok(store)
        }
    }
}

pub(crate) fn build_tls_config(root_store: TlsRootStore) -> Result<rustls::ClientConfig, Error> {
    let roots = build_root_store(root_store)?;
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|source| tls_config_error(source.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}
