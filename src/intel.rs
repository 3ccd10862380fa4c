use reqwest::Client;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_LOOKUP_ENDPOINT: &str = "https://urlhaus-api.abuse.ch/v1/url/";
pub const DEFAULT_SUBMIT_ENDPOINT: &str = "https://urlhaus-api.abuse.ch/v1/url/submit/";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntelError {
    #[error("Network error: {0}")]
    Transport(String),
    #[error("Unreadable response: {0}")]
    Parse(String),
}

/// Body of a lookup answer. Only `query_status == "ok"` means the URL is
/// listed; every other status is a miss.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LookupResponse {
    pub query_status: String,
    #[serde(default)]
    pub threat: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub url_status: Option<String>,
}

impl LookupResponse {
    pub fn is_listed(&self) -> bool {
        self.query_status == "ok"
    }

    pub fn parse(body: &str) -> Result<Self, IntelError> {
        serde_json::from_str(body).map_err(|e| IntelError::Parse(e.to_string()))
    }
}

/// Remote reputation service.
pub trait ThreatIntel: Send + Sync {
    fn lookup(
        &self,
        url: &str,
        credential: &str,
    ) -> impl Future<Output = Result<LookupResponse, IntelError>> + Send;

    /// Resolves once the service has answered; the answer body is not
    /// inspected.
    fn submit(
        &self,
        url: &str,
        comment: &str,
        credential: &str,
    ) -> impl Future<Output = Result<(), IntelError>> + Send;
}

/// URLhaus over HTTPS, form-encoded POSTs with an `Auth-Key` header.
pub struct UrlhausClient {
    client: Client,
    lookup_endpoint: String,
    submit_endpoint: String,
}

impl UrlhausClient {
    pub fn new(
        lookup_endpoint: &str,
        submit_endpoint: &str,
        user_agent: &str,
        timeout_seconds: Option<u64>,
    ) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder().user_agent(user_agent);
        if let Some(seconds) = timeout_seconds {
            builder = builder.timeout(Duration::from_secs(seconds));
        }

        Ok(Self {
            client: builder.build()?,
            lookup_endpoint: lookup_endpoint.to_string(),
            submit_endpoint: submit_endpoint.to_string(),
        })
    }

    async fn post_form(
        &self,
        endpoint: &str,
        form: &[(&str, &str)],
        credential: &str,
    ) -> Result<reqwest::Response, IntelError> {
        self.client
            .post(endpoint)
            .header("Auth-Key", credential)
            .form(form)
            .send()
            .await
            .map_err(|e| IntelError::Transport(e.to_string()))
    }
}

impl Default for UrlhausClient {
    fn default() -> Self {
        Self {
            client: Client::new(),
            lookup_endpoint: DEFAULT_LOOKUP_ENDPOINT.to_string(),
            submit_endpoint: DEFAULT_SUBMIT_ENDPOINT.to_string(),
        }
    }
}

impl ThreatIntel for UrlhausClient {
    async fn lookup(&self, url: &str, credential: &str) -> Result<LookupResponse, IntelError> {
        log::debug!("Querying URLhaus for {url}");
        let response = self
            .post_form(&self.lookup_endpoint, &[("url", url)], credential)
            .await?;
        let body = response
            .text()
            .await
            .map_err(|e| IntelError::Transport(e.to_string()))?;
        LookupResponse::parse(&body)
    }

    async fn submit(&self, url: &str, comment: &str, credential: &str) -> Result<(), IntelError> {
        log::debug!("Submitting {url} to URLhaus");
        let response = self
            .post_form(
                &self.submit_endpoint,
                &[("url", url), ("comment", comment)],
                credential,
            )
            .await?;
        if !response.status().is_success() {
            log::warn!("URLhaus answered submission of {url} with {}", response.status());
        }
        Ok(())
    }
}
