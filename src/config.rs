use std::env;

/// Connection settings for the Bedrock runtime endpoint.
///
/// Resolved from the environment once at startup and injected into the
/// client; nothing is looked up lazily after that.
#[derive(Debug, Clone)]
pub struct Config {
    pub region: String,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            region: env::var("AWS_REGION").unwrap_or_else(|_| "us-west-2".to_string()),
            endpoint: env::var("BEDROCK_ENDPOINT").ok(),
            api_key: env::var("AWS_BEARER_TOKEN_BEDROCK").ok(),
        }
    }

    /// Base URL of the Bedrock runtime service.
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://bedrock-runtime.{}.amazonaws.com", self.region))
    }
}
