//! TLS client configuration.
//!
//! Builds a [`rustls::ClientConfig`] trusting the webpki root set plus an
//! optional PEM bundle, for plants that run the order server behind a
//! private CA. The same config is shared by the REST transport and the live
//! channel.

use std::path::Path;

use rustls::ClientConfig;

use crate::Result;

/// Builds a [`ClientConfig`] from the webpki roots and, if given, the CA
/// certificates in `extra_ca`.
///
/// # Errors
///
/// Returns [`SyncError::Tls`](crate::SyncError::Tls) if the PEM file cannot
/// be read, does not parse, or contains no certificate.
pub fn build_tls_config(extra_ca: Option<&Path>) -> Result<ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = extra_ca {
        let pem = std::fs::read(path).map_err(|e| {
            crate::SyncError::Tls(format!("failed to read {}: {e}", path.display()))
        })?;

        let certs: Vec<_> = rustls_pemfile::certs(&mut &pem[..])
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| crate::SyncError::Tls(format!("failed to parse CA PEM: {e}")))?;

        if certs.is_empty() {
            return Err(crate::SyncError::Tls(format!(
                "no certificates found in {}",
                path.display()
            )));
        }

        let (added, ignored) = root_store.add_parsable_certificates(certs);
        tracing::debug!(added, ignored, "loaded extra CA certificates");
    }

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builds_with_default_roots() {
        assert!(build_tls_config(None).is_ok());
    }

    #[test]
    fn missing_ca_file_is_an_error() {
        let err = build_tls_config(Some(Path::new("/nonexistent/ca.pem"))).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn pem_without_certificates_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();

        let err = build_tls_config(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("no certificates found"));
    }
}
