//! HTTP(S) probe
//!
//! Sends a single request with the configured method, headers and body and
//! evaluates either the default rule (status < 400) or the user's check
//! predicates against the request/response context. Response bodies are read
//! bounded so a misbehaving endpoint cannot balloon memory.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::AsyncReadExt;
use isahc::config::{Configurable, SslOption};
use isahc::http::Method;
use isahc::{HttpClient, Request};

use crate::core::context::ProbeContext;
use crate::core::expr::{CompiledChecks, Declarations};
use crate::core::provider::{
    parse_spec, provider_base, InstanceConfig, Provider, SetupError, DEFAULT_PROBE_TIMEOUT,
};
use crate::core::types::{Detail, HttpDetail, ProbeResult};

/// Upper bound on how much of a response body is read and exposed to checks.
const MAX_RESPONSE_BODY: u64 = 10 * 1024 * 1024;

pub(crate) fn factory() -> Box<dyn Provider> {
    Box::<HttpProvider>::default()
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct HttpSpec {
    pub url: String,
    pub method: String,
    pub body: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub insecure: bool,
    pub detail: bool,
}

impl Default for HttpSpec {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "HEAD".into(),
            body: None,
            headers: BTreeMap::new(),
            insecure: false,
            detail: false,
        }
    }
}

#[derive(Default)]
pub struct HttpProvider {
    name: String,
    timeout: Option<Duration>,
    spec: HttpSpec,
    raw_checks: Vec<crate::core::expr::Expression>,
    checks: CompiledChecks,
    method: Method,
    client: Option<HttpClient>,
}

impl HttpProvider {
    fn declarations() -> Declarations {
        Declarations::variables(&["request", "response"])
    }

    /// `Content-Type: application/json` is defaulted only for body-carrying
    /// POST/PUT requests where the user did not choose one.
    fn effective_headers(&self) -> BTreeMap<String, String> {
        let mut headers = self.spec.headers.clone();
        let has_content_type = headers.keys().any(|k| k.eq_ignore_ascii_case("content-type"));
        if self.spec.body.is_some()
            && (self.method == Method::POST || self.method == Method::PUT)
            && !has_content_type
        {
            headers.insert("Content-Type".into(), "application/json".into());
        }
        headers
    }
}

#[async_trait]
impl Provider for HttpProvider {
    provider_base!("http");

    fn configure(&mut self, instance: &InstanceConfig) -> Result<(), SetupError> {
        self.spec = parse_spec("http", &instance.spec)?;
        self.raw_checks = instance.checks.clone();
        Ok(())
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        url::Url::parse(&self.spec.url)
            .map_err(|e| SetupError::invalid_spec("http", format!("url: {e}")))?;

        self.method = Method::from_bytes(self.spec.method.to_uppercase().as_bytes())
            .map_err(|_| {
                SetupError::invalid_spec("http", format!("invalid method {:?}", self.spec.method))
            })?;

        self.checks = CompiledChecks::compile(&self.raw_checks, &Self::declarations())?;
        self.timeout.get_or_insert(DEFAULT_PROBE_TIMEOUT);

        let client = HttpClient::builder()
            .build()
            .map_err(|e| SetupError::invalid_spec("http", format!("client: {e}")))?;
        self.client = Some(client);
        Ok(())
    }

    async fn probe(&self, _ctx: &ProbeContext) -> ProbeResult {
        let result = ProbeResult::new(self.kind(), &self.name);
        let Some(client) = &self.client else {
            return result.unhealthy_msg("provider was not set up");
        };

        let headers = self.effective_headers();
        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(self.spec.url.as_str());
        if self.spec.insecure {
            builder = builder.ssl_options(
                SslOption::DANGER_ACCEPT_INVALID_CERTS | SslOption::DANGER_ACCEPT_INVALID_HOSTS,
            );
        }
        for (key, value) in &headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let body = self.spec.body.clone().unwrap_or_default();
        let request = match builder.body(body.clone()) {
            Ok(request) => request,
            Err(e) => return result.unhealthy_msg(format!("invalid request: {e}")),
        };

        let response = match client.send_async(request).await {
            Ok(response) => response,
            Err(e) => return result.unhealthy_msg(format!("http request failed: {e}")),
        };

        let status = response.status().as_u16();
        let version = Some(format!("{:?}", response.version()));
        let mut response_headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                response_headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
            }
        }

        let mut body_buf = Vec::new();
        let mut reader = response.into_body().take(MAX_RESPONSE_BODY);
        if let Err(e) = reader.read_to_end(&mut body_buf).await {
            return result.unhealthy_msg(format!("failed to read response body: {e}"));
        }
        let response_body = String::from_utf8_lossy(&body_buf).into_owned();

        let mut result = result;
        if self.spec.detail {
            result = result.with_detail(Detail::Http(HttpDetail {
                status,
                version: version.clone(),
                headers: response_headers.clone(),
            }));
        }

        if self.checks.is_empty() {
            return if status < 400 {
                result.healthy()
            } else {
                result.unhealthy_msg(format!("unexpected HTTP status {status}"))
            };
        }

        let request_context = serde_json::json!({
            "method": self.method.as_str(),
            "body": body,
            "headers": lowercase_keys(&headers),
            "url": self.spec.url,
        });
        let response_context = serde_json::json!({
            "status": i64::from(status),
            "body": response_body,
            "headers": response_headers,
            "json": serde_json::from_str::<serde_json::Value>(&response_body)
                .unwrap_or(serde_json::Value::Null),
        });

        let failures = self.checks.evaluate(|cel| {
            let _ = cel.add_variable("request", &request_context);
            let _ = cel.add_variable("response", &response_context);
        });
        if failures.is_empty() {
            result.healthy()
        } else {
            result.unhealthy(failures)
        }
    }
}

fn lowercase_keys(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(spec_yaml: &str, checks: Vec<crate::core::expr::Expression>) -> HttpProvider {
        let mut provider = HttpProvider {
            name: "api".into(),
            ..Default::default()
        };
        let instance = InstanceConfig {
            kind: "http".into(),
            spec: serde_yaml::from_str(spec_yaml).unwrap(),
            checks,
            ..Default::default()
        };
        provider.configure(&instance).unwrap();
        provider.setup().unwrap();
        provider
    }

    #[test]
    fn setup_rejects_bad_url() {
        let mut provider = HttpProvider::default();
        let instance = InstanceConfig {
            kind: "http".into(),
            spec: serde_yaml::from_str("url: not a url").unwrap(),
            ..Default::default()
        };
        provider.configure(&instance).unwrap();
        assert!(provider.setup().is_err());
    }

    #[test]
    fn setup_rejects_undeclared_check_variables() {
        let mut provider = HttpProvider::default();
        let instance = InstanceConfig {
            kind: "http".into(),
            spec: serde_yaml::from_str("url: http://localhost/healthz").unwrap(),
            checks: vec![crate::core::expr::Expression::new("tls.verified")],
            ..Default::default()
        };
        provider.configure(&instance).unwrap();
        assert!(provider.setup().is_err());
    }

    #[test]
    fn content_type_defaulted_only_for_post_put_with_body() {
        let provider = configured(
            "url: http://localhost/ingest\nmethod: post\nbody: '{}'",
            Vec::new(),
        );
        let headers = provider.effective_headers();
        assert_eq!(
            headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );

        let provider = configured("url: http://localhost/ingest\nmethod: get", Vec::new());
        assert!(provider.effective_headers().is_empty());

        let provider = configured(
            "url: http://localhost/ingest\nmethod: put\nbody: 'x'\nheaders:\n  content-type: text/plain",
            Vec::new(),
        );
        let headers = provider.effective_headers();
        assert_eq!(headers.get("content-type").map(String::as_str), Some("text/plain"));
        assert!(!headers.contains_key("Content-Type"));
    }

    #[test]
    fn method_parsing_normalizes_case() {
        let provider = configured("url: http://localhost/\nmethod: head", Vec::new());
        assert_eq!(provider.method, Method::HEAD);
    }
}
