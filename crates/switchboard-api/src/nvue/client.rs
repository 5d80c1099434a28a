// Revision REST client
//
// Every change goes through a revision: create it, stage patches against it,
// ask the switch to apply it, then read its state back. Sequencing and the
// poll budget belong to the driver; this client only speaks the wire format.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::models::{ApplyRequest, RevisionState, RevisionStatus};
use crate::error::Error;
use crate::transport::{TransportConfig, decode, expect_success, join_segments};

/// HTTP client for one revision-based switch.
#[derive(Debug, Clone)]
pub struct NvueClient {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: SecretString,
}

impl NvueClient {
    /// `base_url` is the API root, e.g. `https://leaf1:8765/nvue_v1/`.
    pub fn new(
        base_url: Url,
        username: impl Into<String>,
        password: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, username, password))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            http,
            base_url,
            username: username.into(),
            password,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.basic_auth(&self.username, Some(self.password.expose_secret()))
    }

    fn revision_url(&self, revision: &str) -> Result<Url, Error> {
        join_segments(&self.base_url, &["revision", revision])
    }

    /// Open a new revision and return its id.
    ///
    /// The switch answers with a single-entry object keyed by the id.
    pub async fn create_revision(&self) -> Result<String, Error> {
        let url = join_segments(&self.base_url, &["revision"])?;
        debug!("POST {url}");
        let resp = self.authed(self.http.post(url)).send().await?;
        let body: serde_json::Map<String, Value> =
            decode(expect_success("create revision", resp).await?).await?;

        body.into_iter()
            .next()
            .map(|(id, _)| id)
            .ok_or_else(|| Error::Deserialization {
                message: "revision response carried no revision id".into(),
                body: "{}".into(),
            })
    }

    /// Stage `payload` at `path` (e.g. `interface/swp1/bridge/domain/br_default`)
    /// in `revision`.
    pub async fn patch(&self, revision: &str, path: &str, payload: &Value) -> Result<(), Error> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut url = join_segments(&self.base_url, &segments)?;
        url.query_pairs_mut().append_pair("rev", revision);
        debug!("PATCH {url}");
        let resp = self.authed(self.http.patch(url)).json(payload).send().await?;
        expect_success("stage patch", resp).await?;
        Ok(())
    }

    /// Ask the switch to apply `revision`, answering yes to any prompt.
    pub async fn apply_revision(&self, revision: &str) -> Result<(), Error> {
        let url = self.revision_url(revision)?;
        debug!("PATCH {url}");
        let resp = self
            .authed(self.http.patch(url))
            .json(&ApplyRequest::apply())
            .send()
            .await?;
        expect_success("apply revision", resp).await?;
        Ok(())
    }

    /// Read the applied configuration at `path`.
    pub async fn get(&self, path: &str) -> Result<Value, Error> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut url = join_segments(&self.base_url, &segments)?;
        url.query_pairs_mut().append_pair("rev", "applied");
        debug!("GET {url}");
        let resp = self.authed(self.http.get(url)).send().await?;
        decode(expect_success("read config", resp).await?).await
    }

    pub async fn revision_state(&self, revision: &str) -> Result<RevisionState, Error> {
        let url = self.revision_url(revision)?;
        debug!("GET {url}");
        let resp = self.authed(self.http.get(url)).send().await?;
        let status: RevisionStatus = decode(expect_success("read revision", resp).await?).await?;
        Ok(status.state)
    }
}
