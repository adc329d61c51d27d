use std::sync::OnceLock;

use tracing::debug;

use crate::error::Result;

/// Install the aws-lc-rs rustls provider once; reqwest and the websocket both need it.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Shared HTTP client for the ingestion and job APIs.
///
/// No global timeout: finalize can take minutes, so per-request timeouts come
/// from the upload config instead.
pub fn build_client() -> Result<reqwest::Client> {
    install_rustls_provider();
    let client = reqwest::Client::builder()
        .user_agent(concat!("ingest-cli/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}
