use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use super::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn label(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

/// A request against the broker API, relative to `<base>/api/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn describe(&self) -> String {
        format!("{} {}", self.method.label(), self.path)
    }
}

/// Opaque auth header attached to every request (the broker's CSRF token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeader {
    pub name: String,
    pub value: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<Value, GatewayError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    api_root: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let mut base = Url::parse(base_url.trim())
            .map_err(|err| GatewayError::InvalidUrl(format!("{base_url}: {err}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let api_root = base
            .join("api/")
            .map_err(|err| GatewayError::InvalidUrl(err.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("brokerdash/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, api_root })
    }

    pub fn url_for(&self, request: &ApiRequest) -> Result<Url, GatewayError> {
        let mut url = self
            .api_root
            .join(request.path.trim_start_matches('/'))
            .map_err(|err| GatewayError::InvalidUrl(format!("{}: {err}", request.path)))?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value, GatewayError> {
        let url = self.url_for(&request)?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(parse_body(&body))
    }
}

/// Empty bodies become `null`, non-JSON bodies a JSON string.
fn parse_body(body: &str) -> Value {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

/// Fire-and-forget request dispatch shared by every panel and action.
///
/// Exactly one of the two handlers runs per request, on a spawned task.
/// There are no retries; the next poll tick is the retry.
#[derive(Clone)]
pub struct RequestGateway {
    transport: Arc<dyn Transport>,
    auth: Option<AuthHeader>,
}

impl RequestGateway {
    pub fn new(transport: Arc<dyn Transport>, auth: Option<AuthHeader>) -> Self {
        Self { transport, auth }
    }

    pub fn request<S, E>(&self, request: ApiRequest, on_success: S, on_error: E)
    where
        S: FnOnce(Value) + Send + 'static,
        E: FnOnce(GatewayError) + Send + 'static,
    {
        let request = self.authorize(request);
        let transport = self.transport.clone();
        tokio::spawn(async move {
            let label = request.describe();
            match transport.send(request).await {
                Ok(payload) => {
                    log::trace!("{label} succeeded");
                    on_success(payload);
                }
                Err(err) => {
                    log::debug!("{label} failed: {err}");
                    on_error(err);
                }
            }
        });
    }

    fn authorize(&self, mut request: ApiRequest) -> ApiRequest {
        if let Some(auth) = &self.auth {
            request
                .headers
                .retain(|(name, _)| !name.eq_ignore_ascii_case(&auth.name));
            request.headers.push((auth.name.clone(), auth.value.clone()));
        }
        request
    }
}
