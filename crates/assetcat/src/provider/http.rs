//! Shared HTTP plumbing for the remote providers.

use reqwest::header::{HeaderMap, LINK};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::error::{ProviderError, Result};

/// Longest response body kept in an error message.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// One page of a paginated response.
#[derive(Debug)]
pub(crate) struct Page {
    pub(crate) body: Value,
    /// Target of the `Link: <...>; rel="next"` header, if any.
    pub(crate) next: Option<String>,
}

/// A JSON client that authenticates with an optional bearer token and
/// aborts in-flight requests on cancellation.
pub(crate) struct JsonClient {
    client: Client,
    token: Option<String>,
}

impl JsonClient {
    /// Builds a client. With `api_key_env` set, the named environment
    /// variable must hold the bearer token.
    pub(crate) fn new(timeout_secs: u64, api_key_env: Option<&str>) -> Result<Self> {
        let token = match api_key_env {
            Some(var) => Some(
                std::env::var(var).map_err(|_| ProviderError::MissingApiKey(var.to_string()))?,
            ),
            None => None,
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("assetcat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ProviderError::Client)?;

        Ok(Self { client, token })
    }

    pub(crate) async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.send(self.client.get(url).query(query), url, cancel)
            .await
            .map(|page| page.body)
    }

    /// Like [`Self::get`], also returning the next page link.
    pub(crate) async fn get_page(
        &self,
        url: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<Page> {
        self.send(self.client.get(url).query(query), url, cancel).await
    }

    pub(crate) async fn post(
        &self,
        url: &str,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.send(self.client.post(url).json(body), url, cancel)
            .await
            .map(|page| page.body)
    }

    async fn send(
        &self,
        request: RequestBuilder,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Page> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let http_error = |source| ProviderError::Http {
            url: url.to_string(),
            source,
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = request.send() => response.map_err(http_error)?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: truncate(body),
            });
        }

        let next = next_link(response.headers());
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            body = response.json::<Value>() => body.map_err(http_error)?,
        };
        Ok(Page { body, next })
    }
}

/// Extracts the `rel="next"` target from RFC 8288 `Link` headers.
fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|link| {
            let (target, params) = link.split_once(';')?;
            let is_next = params.split(';').any(|param| {
                param.trim().strip_prefix("rel=").is_some_and(|rel| {
                    rel.trim_matches('"')
                        .split_whitespace()
                        .any(|r| r == "next")
                })
            });
            let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
            is_next.then(|| target.to_string())
        })
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push_str("... (truncated)");
    }
    body
}
