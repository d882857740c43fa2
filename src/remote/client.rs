use std::{sync::Arc, time::Duration};

use anyhow::Context;
use reqwest::{Client, Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{config::UpstreamConfig, envelope::ApiResponse};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Connection, timeout or body transfer failure.
    #[error("remote request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The remote answered 2xx with something that is not our envelope.
    #[error("undecodable remote response: {0}")]
    Decode(String),

    /// The remote understood the request and refused it.
    #[error("{message}")]
    Rejected { status: u16, message: String },
}

impl RemoteError {
    /// Whether the caller should retry the operation against the local store.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::Decode(_))
    }
}

/// HTTP client for a remote farm API speaking the same envelope.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    base_url: String,
    token: Option<String>,
}

/// Flattens a serializable filter into query pairs, skipping nulls.
pub fn query_pairs<Q: Serialize>(query: &Q) -> Vec<(String, String)> {
    let Ok(Value::Object(map)) = serde_json::to_value(query) else {
        return Vec::new();
    };
    map.into_iter()
        .filter_map(|(k, v)| match v {
            Value::Null => None,
            Value::String(s) => Some((k, s)),
            other => Some((k, other.to_string())),
        })
        .collect()
}

impl RemoteClient {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("Failed to build upstream HTTP client")?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: config.base_url.trim_end_matches('/').to_owned(),
                token: config.token.clone(),
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    fn url(&self, path: &str, query: &[(String, String)]) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&format!("{}{}", self.inner.base_url, path))
            .map_err(|e| RemoteError::Decode(format!("bad upstream URL: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Ok(url)
    }

    async fn call<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&B>,
    ) -> Result<ApiResponse<Value>, RemoteError> {
        let url = self.url(path, query)?;
        debug!(method = %method, url = %url, "Calling upstream API");

        let mut req = self.inner.http.request(method, url);
        if let Some(token) = &self.inner.token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        let envelope = serde_json::from_slice::<ApiResponse<Value>>(&bytes);

        if !status.is_success() {
            let message = envelope
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| status_text(status));
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let envelope = envelope.map_err(|e| RemoteError::Decode(e.to_string()))?;
        if !envelope.success {
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                message: envelope
                    .message
                    .unwrap_or_else(|| "Upstream request failed".to_owned()),
            });
        }
        Ok(envelope)
    }

    /// Calls the remote and decodes `data` as `T`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&B>,
    ) -> Result<T, RemoteError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let envelope = self.call(method, path, query, body).await?;
        let data = envelope
            .data
            .ok_or_else(|| RemoteError::Decode("response carries no data".to_owned()))?;
        serde_json::from_value(data).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    /// Calls the remote for its side effect only.
    pub async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(), RemoteError> {
        self.call(method, path, &[], body).await.map(|_| ())
    }
}

fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_owned)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

#[cfg(test)]
pub(crate) mod test_server {
    use axum::Router;
    use tokio::net::TcpListener;

    use crate::config::UpstreamConfig;

    /// Serves `router` on an ephemeral port and returns a config pointing at it.
    pub async fn spawn(router: Router) -> UpstreamConfig {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        UpstreamConfig {
            base_url: format!("http://{addr}/api"),
            token: Some("upstream-token".into()),
            timeout_secs: 2,
        }
    }

    /// A config for a port nothing listens on.
    pub async fn closed_port() -> UpstreamConfig {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        UpstreamConfig {
            base_url: format!("http://{addr}/api"),
            token: None,
            timeout_secs: 1,
        }
    }
}
