use anyhow::{anyhow, Context, Result};
use diode_core::HarnessError;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost";
pub const POLICIES_PATH: &str = "/api/v1/policies";
pub const STATUS_PATH: &str = "/api/v1/status";
pub const POLICY_CONTENT_TYPE: &str = "application/x-yaml";

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A response body: JSON when it parses, otherwise the raw text.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    pub fn parse(raw: String) -> Self {
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(raw),
        }
    }

    /// Structured view of the body; text bodies are read as YAML, which is
    /// what the agent answers on policy create and get.
    pub fn structured(&self) -> Result<Value> {
        match self {
            Self::Json(value) => Ok(value.clone()),
            Self::Text(raw) => {
                serde_yaml::from_str(raw).with_context(|| format!("body is not YAML: {}", raw))
            }
        }
    }

    /// Names from a policy list response.
    pub fn policy_names(&self) -> Result<Vec<String>> {
        match self.structured()? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(name) => Ok(name),
                    other => Err(anyhow!("policy list entry is not a name: {}", other)),
                })
                .collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(anyhow!("policy list is not an array: {}", other)),
        }
    }
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => write!(f, "{}", value),
            Self::Text(raw) => f.write_str(raw),
        }
    }
}

/// Typed client for the agent's policy routes. The port is per call because one
/// scenario may talk to several agents.
#[derive(Clone)]
pub struct PolicyClient {
    api_url: String,
    client: HttpClient,
}

impl PolicyClient {
    pub fn new(api_url: &str) -> Result<Self> {
        let api_url = api_url.trim().trim_end_matches('/').to_string();
        if api_url.is_empty() {
            return Err(anyhow!(HarnessError::InvalidArgument(
                "agent api url must not be empty".to_string()
            )));
        }
        let client = HttpClient::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { api_url, client })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn url_for(&self, port: u16, path: &str) -> String {
        format!("{}:{}{}", self.api_url, port, path)
    }

    fn policy_url(&self, port: u16, name: &str) -> String {
        self.url_for(
            port,
            &format!(
                "{}/{}",
                POLICIES_PATH,
                utf8_percent_encode(name, PATH_SEGMENT)
            ),
        )
    }

    pub fn status(&self, port: u16) -> Result<ResponseBody> {
        self.send(Method::GET, self.url_for(port, STATUS_PATH), None, 200)
    }

    pub fn create(&self, policy_yaml: &str, port: u16) -> Result<ResponseBody> {
        self.send(
            Method::POST,
            self.url_for(port, POLICIES_PATH),
            Some(policy_yaml.to_string()),
            201,
        )
    }

    pub fn list(&self, port: u16) -> Result<ResponseBody> {
        self.send(Method::GET, self.url_for(port, POLICIES_PATH), None, 200)
    }

    pub fn get(&self, name: &str, port: u16) -> Result<ResponseBody> {
        self.send(Method::GET, self.policy_url(port, name), None, 200)
    }

    pub fn delete(&self, name: &str, port: u16) -> Result<ResponseBody> {
        self.send(Method::DELETE, self.policy_url(port, name), None, 200)
    }

    fn send(
        &self,
        method: Method,
        url: String,
        body: Option<String>,
        expected: u16,
    ) -> Result<ResponseBody> {
        let mut builder = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            builder = builder.header(CONTENT_TYPE, POLICY_CONTENT_TYPE).body(body);
        }
        let response = builder
            .send()
            .with_context(|| format!("agent http {} {} transport error", method, url))?;
        let status = response.status().as_u16();
        let raw = response
            .text()
            .unwrap_or_else(|_| "<response body unavailable>".to_string());
        let parsed = ResponseBody::parse(raw);
        tracing::debug!(%method, %url, status, "agent policy api call");
        if status != expected {
            return Err(anyhow!(HarnessError::UnexpectedStatus {
                method: method.to_string(),
                url,
                status,
                expected,
                body: parsed.to_string(),
            }));
        }
        Ok(parsed)
    }
}
