use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

pub const STAGE_NAME_VARIABLE: &str = "STAGE_NAME";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiGatewayResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: Value,
    pub body: String,
    #[serde(rename = "isBase64Encoded")]
    pub is_base64_encoded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloConfig {
    pub stage_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ConfigError {}

impl HelloConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// An empty stage name is accepted; only a missing variable is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let stage_name = lookup(STAGE_NAME_VARIABLE).ok_or_else(|| ConfigError {
            message: format!("{STAGE_NAME_VARIABLE} must be configured"),
        })?;
        Ok(Self { stage_name })
    }
}

pub fn greeting(stage_name: &str) -> String {
    format!("Hello from {stage_name} environment!\n")
}

/// Every request gets the same greeting, whatever its path or method.
pub fn handle_hello_event(event: &Value, config: &HelloConfig) -> ApiGatewayResponse {
    info!(
        stage_name = %config.stage_name,
        method = event.get("httpMethod").and_then(serde_json::Value::as_str).unwrap_or("-"),
        path = event.get("path").and_then(serde_json::Value::as_str).unwrap_or("-"),
        "handling request"
    );

    ApiGatewayResponse {
        status_code: 200,
        headers: json!({"Content-Type": "text/plain"}),
        body: greeting(&config.stage_name),
        is_base64_encoded: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_stage_name_is_a_configuration_error() {
        let error = HelloConfig::from_lookup(|_| None).expect_err("lookup should fail");
        assert_eq!(error.message(), "STAGE_NAME must be configured");
    }

    #[test]
    fn empty_stage_name_is_accepted() {
        let config =
            HelloConfig::from_lookup(|_| Some(String::new())).expect("empty value should pass");
        assert_eq!(greeting(&config.stage_name), "Hello from  environment!\n");
    }

    #[test]
    fn response_serializes_as_proxy_result() {
        let config = HelloConfig {
            stage_name: "dev".to_string(),
        };
        let value = serde_json::to_value(handle_hello_event(&json!({}), &config))
            .expect("response should serialize");
        assert_eq!(value["statusCode"], 200);
        assert_eq!(value["isBase64Encoded"], false);
        assert_eq!(value["body"], "Hello from dev environment!\n");
    }
}
