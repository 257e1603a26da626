//! HTTP calls to provider endpoints.

use crate::config::SsoConfig;
use crate::diagnostics::{Diagnostics, redact, redact_params};
use crate::error::{OAuth2Error, OAuth2Result};
use crate::types::ApiResponse;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, error};
use url::form_urlencoded;

pub const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMethod {
    Get,
    Post,
}

impl ApiMethod {
    fn as_str(&self) -> &'static str {
        match self {
            ApiMethod::Get => "GET",
            ApiMethod::Post => "POST",
        }
    }
}

/// Per-call request options
#[derive(Debug, Clone, Default)]
pub struct ApiOptions {
    /// Replaces the default form content type
    pub content_type: Option<String>,
    /// Sent verbatim as the `Authorization` header
    pub authorization: Option<String>,
}

impl ApiOptions {
    pub fn bearer(token: &str) -> Self {
        Self {
            authorization: Some(format!("Bearer {}", token)),
            ..Self::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// HTTP client shared by every provider call
#[derive(Clone)]
pub struct ApiClient {
    http_client: Client,
    diagnostics: Diagnostics,
}

impl ApiClient {
    pub fn new(config: &SsoConfig) -> OAuth2Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()?;

        Ok(Self {
            http_client,
            diagnostics: Diagnostics::new(config.debug),
        })
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    /// Send `params` as a form body (POST) or query string (GET) and decode
    /// the response.
    pub async fn call(
        &self,
        uri: &str,
        method: ApiMethod,
        params: &[(String, String)],
        options: &ApiOptions,
    ) -> OAuth2Result<ApiResponse> {
        let content_type = options
            .content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE);

        self.diagnostics.log(
            "API request",
            json!({
                "uri": uri,
                "method": method.as_str(),
                "headers": {
                    "Content-Type": content_type,
                    "Authorization": options.authorization,
                },
                "params": redact_params(params),
            }),
        );

        let mut request = match method {
            ApiMethod::Get => self.http_client.get(uri).query(params),
            ApiMethod::Post => {
                let body = if content_type.contains("json") {
                    let object: serde_json::Map<String, Value> = params
                        .iter()
                        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                        .collect();
                    serde_json::to_string(&object)?
                } else {
                    form_urlencoded::Serializer::new(String::new())
                        .extend_pairs(params)
                        .finish()
                };
                self.http_client.post(uri).body(body)
            }
        };

        request = request.header(CONTENT_TYPE, content_type);
        if let Some(authorization) = &options.authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        let response = request.send().await?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.to_ascii_lowercase().contains("application/json"));
        let body = response.text().await?;

        let decoded = if is_json {
            match serde_json::from_str::<Value>(&body) {
                Ok(value) => {
                    self.diagnostics
                        .log("API JSON response", json!({ "response": value.clone() }));
                    ApiResponse::Json(value)
                }
                Err(e) if status.is_success() => return Err(e.into()),
                Err(_) => ApiResponse::Raw(body),
            }
        } else {
            ApiResponse::Raw(body)
        };

        if !status.is_success() {
            let message = upstream_message(status.as_u16(), &decoded);
            error!(uri, status = status.as_u16(), "Provider API call failed: {}", message);
            if let ApiResponse::Json(value) = &decoded {
                self.diagnostics.log(
                    "API response error",
                    json!({ "response": redact(value.clone()) }),
                );
            }
            return Err(OAuth2Error::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        debug!(uri, status = status.as_u16(), "Provider API call succeeded");
        Ok(decoded)
    }
}

fn upstream_message(status: u16, response: &ApiResponse) -> String {
    if let ApiResponse::Json(value) = response {
        if let Some(error) = value.get("error").and_then(Value::as_str) {
            let description = value
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or(error);
            return format!("Request server says: {} (code: {})", description, error);
        }
    }
    format!("HTTP error {}", status)
}
