// Shared transport configuration for building reqwest::Client instances.
//
// Both REST device clients share TLS and timeout settings through this
// module, avoiding duplicated builder logic.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::HeaderMap;

use crate::error::Error;

/// TLS verification mode toward a device management endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate. Only reachable through an explicit
    /// per-switch `insecure = true`.
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        self.build_client_with_headers(HeaderMap::new())
    }

    /// Build a `reqwest::Client` with additional default headers.
    ///
    /// Used by the pooled-bridge client to inject the `Authorization` token.
    pub fn build_client_with_headers(&self, headers: HeaderMap) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("switchboard/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                tracing::warn!("TLS certificate verification disabled for device endpoint");
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

// ── Response helpers ────────────────────────────────────────────────

/// Pass a 2xx response through; map anything else onto [`Error`].
pub(crate) async fn expect_success(
    operation: &'static str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let url = resp.url().to_string();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication {
            message: format!("{operation} rejected credentials at {url}"),
        });
    }

    let body = resp.text().await.unwrap_or_default();
    Err(Error::Http {
        operation,
        status: status.as_u16(),
        url,
        message: body.chars().take(200).collect(),
    })
}

/// Decode a JSON body, keeping the raw text for diagnostics on failure.
pub(crate) async fn decode<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, Error> {
    let body = resp.text().await.map_err(Error::Transport)?;
    serde_json::from_str(&body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        Error::Deserialization {
            message: format!("{e} (body preview: {preview:?})"),
            body: body.clone(),
        }
    })
}

/// Append path segments to `base`, percent-encoding each one.
pub(crate) fn join_segments(base: &url::Url, segments: &[&str]) -> Result<url::Url, Error> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_verifies_certificates() {
        assert_eq!(TransportConfig::default().tls, TlsMode::System);
    }

    #[test]
    fn join_segments_encodes_slashes() {
        let base = url::Url::parse("https://switch.example/nvue_v1/").unwrap();
        let url = join_segments(&base, &["revision", "changeset/admin/1"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://switch.example/nvue_v1/revision/changeset%2Fadmin%2F1"
        );
    }

    #[test]
    fn missing_ca_file_is_a_tls_error() {
        let config = TransportConfig {
            tls: TlsMode::CustomCa(PathBuf::from("/nonexistent/ca.pem")),
            timeout: Duration::from_secs(5),
        };
        assert!(matches!(config.build_client(), Err(Error::Tls(_))));
    }
}
