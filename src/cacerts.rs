//! Default CA bundle for app pods
//!
//! Executors with `installDefaultCACerts` get a `spin-ca` Secret holding a
//! trust bundle. The bundle is read once at startup from a file, normally the
//! operator image's own system bundle.

use std::path::Path;

use tracing::info;

use crate::Error;

/// Name of the default CA secret
pub const DEFAULT_CA_SECRET: &str = "spin-ca";

/// Read a PEM bundle from `path`.
///
/// The file must contain at least one certificate.
pub async fn load_ca_bundle(path: &Path) -> Result<String, Error> {
    let bundle = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::internal_with_context(
            "cacerts",
            format!("failed to read CA bundle {}: {e}", path.display()),
        )
    })?;

    let certs = bundle.matches("-----BEGIN CERTIFICATE-----").count();
    if certs == 0 {
        return Err(Error::internal_with_context(
            "cacerts",
            format!("CA bundle {} contains no certificates", path.display()),
        ));
    }
    info!(path = %path.display(), certs, "loaded CA bundle");
    Ok(bundle)
}
