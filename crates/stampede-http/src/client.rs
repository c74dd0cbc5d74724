//! Instrumented HTTP client
//!
//! Every call records `http_reqs`, `http_req_duration` (ms) and
//! `http_req_failed` into the caller's sink, tagged with the request name,
//! method and status. Transport failures and timeouts come back as a response
//! with status 0; they are never retried unless the caller asks for it.

use crate::error::{HttpError, HttpResult};
use crate::extract::parse_json_body;
use crate::retry::RetryPolicy;
use reqwest::{Method, Url};
use serde_json::Value;
use stampede_core::{names, HttpConfig, MetricSample, MetricSink, Tags};
use std::time::{Duration, Instant};
use tracing::debug;

/// One request to issue, built fluently.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    path: String,
    name: Option<String>,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    bearer: Option<String>,
    body: Option<Value>,
    timeout: Option<Duration>,
    tags: Tags,
}

impl RequestSpec {
    /// `path` is joined to the client's base URL unless it is absolute.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            name: None,
            query: Vec::new(),
            headers: Vec::new(),
            bearer: None,
            body: None,
            timeout: None,
            tags: Tags::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Value of the `name` tag; defaults to the path.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Per-call timeout, overriding the client default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Extra tag on this request's samples.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn request_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.path)
    }

    pub fn has_timeout(&self) -> bool {
        self.timeout.is_some()
    }
}

/// Outcome of one call. Status 0 means no HTTP response was received.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub duration: Duration,
    pub error: Option<String>,
}

impl HttpResponse {
    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Transport failure or timeout.
    pub fn is_transport_error(&self) -> bool {
        self.status == 0
    }

    pub fn is_failure(&self) -> bool {
        self.status == 0 || self.status >= 400
    }

    pub fn has_body(&self) -> bool {
        !self.body.trim().is_empty()
    }

    /// Body as JSON; `None` when empty or malformed.
    pub fn json(&self) -> Option<Value> {
        parse_json_body(&self.body)
    }
}

/// Shared HTTP client bound to a base URL.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> HttpResult<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            inner,
            base_url: parse_base_url(&config.base_url)?,
            timeout: config.timeout,
        })
    }

    /// Same client and pool against another base URL.
    pub fn with_base_url(&self, base_url: &str) -> HttpResult<Self> {
        Ok(Self {
            inner: self.inner.clone(),
            base_url: parse_base_url(base_url)?,
            timeout: self.timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve a request path against the base URL.
    pub fn url(&self, path: &str) -> HttpResult<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path).map_err(|e| HttpError::InvalidUrl {
                url: path.to_string(),
                message: e.to_string(),
            });
        }
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| HttpError::InvalidUrl {
            url: joined,
            message: e.to_string(),
        })
    }

    /// Issue one request and record its samples into `sink`.
    pub async fn send(&self, sink: &dyn MetricSink, request: RequestSpec) -> HttpResponse {
        let started = Instant::now();
        let outcome = match self.url(&request.path) {
            Ok(url) => self.dispatch(url, &request).await,
            Err(e) => Err(e.to_string()),
        };
        let duration = started.elapsed();

        let response = match outcome {
            Ok((status, body)) => HttpResponse {
                status,
                body,
                duration,
                error: None,
            },
            Err(error) => HttpResponse {
                status: 0,
                body: String::new(),
                duration,
                error: Some(error),
            },
        };

        if let Some(error) = &response.error {
            debug!(name = request.request_name(), method = %request.method, error = %error, "Request failed");
        }
        record_samples(sink, &request, &response);
        response
    }

    /// Issue `request`, retrying per `policy`. Every attempt is recorded.
    pub async fn send_with_retry(
        &self,
        sink: &dyn MetricSink,
        request: RequestSpec,
        policy: &RetryPolicy,
    ) -> HttpResponse {
        let mut attempt = 1;
        loop {
            let response = self.send(sink, request.clone()).await;
            if !policy.should_retry(attempt, &response) {
                return response;
            }

            let delay = policy.delay_for(attempt);
            debug!(
                name = request.request_name(),
                attempt,
                status = response.status,
                delay_ms = delay.as_millis() as u64,
                "Retrying request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn dispatch(&self, url: Url, request: &RequestSpec) -> Result<(u16, String), String> {
        let mut builder = self
            .inner
            .request(request.method.clone(), url)
            .timeout(request.timeout.unwrap_or(self.timeout));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(describe)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(describe)?;
        Ok((status, body))
    }
}

fn parse_base_url(base_url: &str) -> HttpResult<Url> {
    Url::parse(base_url).map_err(|e| HttpError::InvalidUrl {
        url: base_url.to_string(),
        message: e.to_string(),
    })
}

fn describe(error: reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else {
        error.to_string()
    }
}

fn record_samples(sink: &dyn MetricSink, request: &RequestSpec, response: &HttpResponse) {
    let mut tags = request.tags.clone();
    tags.insert("name".to_string(), request.request_name().to_string());
    tags.insert("method".to_string(), request.method.to_string());
    tags.insert("status".to_string(), response.status.to_string());

    sink.record(MetricSample::counter(names::HTTP_REQS, 1.0).with_tags(&tags));
    sink.record(
        MetricSample::trend(names::HTTP_REQ_DURATION, response.duration.as_secs_f64() * 1000.0)
            .with_tags(&tags),
    );
    sink.record(MetricSample::rate(names::HTTP_REQ_FAILED, response.is_failure()).with_tags(&tags));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> HttpClient {
        HttpClient::new(&HttpConfig {
            base_url: base.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_url_joining() {
        let client = client("http://localhost:8080/api/");
        assert_eq!(client.url("/auth/join").unwrap().as_str(), "http://localhost:8080/api/auth/join");
        assert_eq!(client.url("card").unwrap().as_str(), "http://localhost:8080/api/card");
        assert_eq!(
            client.url("http://seed:9000/api/test/members").unwrap().as_str(),
            "http://seed:9000/api/test/members"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = HttpClient::new(&HttpConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(HttpError::InvalidUrl { .. })));
    }

    #[test]
    fn test_request_name_defaults_to_path() {
        let spec = RequestSpec::get("/goal/report");
        assert_eq!(spec.request_name(), "/goal/report");
        assert_eq!(spec.name("ReportCheck").request_name(), "ReportCheck");
    }

    #[test]
    fn test_response_classification() {
        let mut response = HttpResponse {
            status: 201,
            body: " {\"ok\":true} ".to_string(),
            duration: Duration::ZERO,
            error: None,
        };
        assert!(response.is_success());
        assert!(!response.is_failure());
        assert_eq!(response.json().unwrap()["ok"], Value::Bool(true));

        response.status = 0;
        assert!(response.is_transport_error());
        assert!(response.is_failure());
    }
}
