//! Verbose SSO diagnostics with secret redaction.

use serde_json::Value;
use tracing::info;

/// Tracing target for SSO diagnostics
pub const SSO_LOG_TARGET: &str = "sso_logging";

const REDACTED: &str = "[REDACTED]";

const SENSITIVE_KEYS: &[&str] = &[
    "client_secret",
    "access_token",
    "refresh_token",
    "id_token",
    "code",
    "password",
    "authorization",
];

/// Diagnostic sink, silent unless SSO debugging is switched on
#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnostics {
    enabled: bool,
}

impl Diagnostics {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn log(&self, message: &str, data: Value) {
        if !self.enabled {
            return;
        }
        let data = redact(data);
        info!(target: SSO_LOG_TARGET, data = %data, "{}", message);
    }
}

fn is_sensitive(key: &str) -> bool {
    SENSITIVE_KEYS
        .iter()
        .any(|sensitive| sensitive.eq_ignore_ascii_case(key))
}

/// Replace the values of secret-bearing keys, at any depth
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if is_sensitive(&key) && !value.is_null() {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, redact(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        other => other,
    }
}

/// Request parameters as a JSON object, redacted
pub fn redact_params(params: &[(String, String)]) -> Value {
    let map = params
        .iter()
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();
    redact(Value::Object(map))
}
