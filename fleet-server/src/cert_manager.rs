//! Cert Manager (§4.7): loads an X.509 cert+key pair at boot, binds TLS via
//! `axum-server`'s `RustlsConfig`, and hot-reloads on file change. Grounded
//! on the pack's `ai-gateway` app's `RustlsConfig::from_pem_file` + bind
//! pattern, generalized with a `notify` watcher for the reload half the
//! gateway doesn't need (it restarts on config change; we don't want to
//! drop in-flight agent connections on a cert rotation).

use std::path::{Path, PathBuf};

use axum_server::tls_rustls::RustlsConfig;
use notify::{RecursiveMode, Watcher};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("failed to load TLS cert/key: {0}")]
    Load(#[from] std::io::Error),
    #[error("cert file and key file must both be set, or both absent")]
    Incomplete,
}

pub struct CertManager {
    pub config: RustlsConfig,
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl CertManager {
    /// Load and validate the initial cert/key pair. Returns `Ok(None)` when
    /// no TLS is configured — the caller binds plain HTTP with a startup
    /// warning per §6.
    pub async fn load(
        cert_file: Option<&str>,
        key_file: Option<&str>,
    ) -> Result<Option<Self>, CertError> {
        let (cert, key) = match (cert_file, key_file) {
            (Some(c), Some(k)) => (c, k),
            (None, None) => return Ok(None),
            _ => return Err(CertError::Incomplete),
        };

        let config = RustlsConfig::from_pem_file(cert, key).await?;
        log_expiry_if_available(cert);

        Ok(Some(Self {
            config,
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
        }))
    }

    /// Spawn a filesystem watcher that hot-reloads the TLS config on
    /// change. Existing connections keep their negotiated config; only new
    /// connections see the reload (this is `RustlsConfig::reload_from_pem_file`'s
    /// contract — it swaps the inner `Arc` atomically).
    pub fn watch(&self) {
        let config = self.config.clone();
        let cert_path = self.cert_path.clone();
        let key_path = self.key_path.clone();

        tokio::spawn(async move {
            let (tx, mut rx) = tokio::sync::mpsc::channel(16);
            let mut watcher = match notify::recommended_watcher(move |res| {
                let _ = tx.blocking_send(res);
            }) {
                Ok(w) => w,
                Err(e) => {
                    tracing::error!("cert_manager: failed to start file watcher: {}", e);
                    return;
                }
            };

            for path in [&cert_path, &key_path] {
                if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
                    tracing::error!("cert_manager: failed to watch {}: {}", path.display(), e);
                    return;
                }
            }

            while let Some(res) = rx.recv().await {
                match res {
                    Ok(event) if is_modify(&event) => {
                        tracing::info!("cert_manager: detected change, reloading TLS config");
                        match config.reload_from_pem_file(&cert_path, &key_path).await {
                            Ok(()) => tracing::info!("cert_manager: TLS config reloaded"),
                            Err(e) => tracing::error!(
                                "cert_manager: rejecting reload, keeping old cert: {}",
                                e
                            ),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("cert_manager: watch error: {}", e),
                }
            }
        });
    }

    /// Days until the watched cert expires, for `/api/fleet/server-resources`
    /// (§4.7). `None` only if the cert file became unreadable or malformed
    /// after boot-time loading already succeeded.
    pub fn expires_in_days(&self) -> Option<i64> {
        expiry_days_from_pem(&self.cert_path)
    }
}

fn is_modify(event: &notify::Event) -> bool {
    matches!(
        event.kind,
        notify::EventKind::Modify(_) | notify::EventKind::Create(_)
    )
}

fn log_expiry_if_available(cert_path: &str) {
    if let Some(days) = expiry_days_from_pem(Path::new(cert_path)) {
        if days <= 30 {
            tracing::warn!("cert_manager: certificate expires in {} days", days);
        } else {
            tracing::info!("cert_manager: certificate expires in {} days", days);
        }
    }
}

/// Parses the leaf cert's `notAfter` out of a PEM file, for the daily
/// expiry warning and `/api/fleet/server-resources`'s `expires_in_days`
/// (§4.7). Returns `None` on any read/parse failure rather than erroring —
/// the cert manager already validated the pair loads via
/// `RustlsConfig::from_pem_file` at boot, so a failure here only degrades
/// the expiry-reporting feature, not TLS itself.
fn expiry_days_from_pem(cert_path: &Path) -> Option<i64> {
    let contents = std::fs::read(cert_path).ok()?;
    let (_, pem) = x509_parser::pem::parse_x509_pem(&contents).ok()?;
    let cert = pem.parse_x509().ok()?;
    let not_after = cert.validity().not_after.timestamp();
    let now = chrono::Utc::now().timestamp();
    Some((not_after - now) / 86_400)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_cert_file_yields_no_expiry_rather_than_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-cert.pem");
        std::fs::write(&path, b"this is not PEM data").unwrap();
        assert_eq!(expiry_days_from_pem(&path), None);
    }

    #[test]
    fn missing_cert_file_yields_no_expiry() {
        assert_eq!(expiry_days_from_pem(Path::new("/nonexistent/cert.pem")), None);
    }
}
