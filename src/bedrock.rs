use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::conversation::Turn;

/// Model served through the `converse` endpoint.
pub const MODEL_ID: &str = "anthropic.claude-3-5-sonnet-20241022-v2:0";

/// Cap on generated output per reply.
const MAX_TOKENS: u32 = 1000;

#[derive(Serialize)]
struct ConverseRequest {
    #[serde(rename = "modelId")]
    model_id: String,
    messages: Vec<RequestMessage>,
    #[serde(rename = "inferenceConfig")]
    inference_config: InferenceConfig,
}

#[derive(Serialize)]
struct RequestMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Serialize)]
struct ContentBlock {
    text: String,
}

#[derive(Serialize)]
struct InferenceConfig {
    #[serde(rename = "maxTokens")]
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ConverseResponse {
    output: ConverseOutput,
}

#[derive(Deserialize)]
struct ConverseOutput {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Vec<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    text: String,
}

/// Body shape Bedrock uses for service-reported failures.
#[derive(Deserialize)]
struct ServiceError {
    message: String,
}

/// One taxonomy for everything that can go wrong while obtaining a reply.
/// No variant gets differentiated recovery; the distinction only shows up
/// in the rendered description.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Service answered with a non-success status.
    #[error("{message}")]
    Service { message: String },

    /// Network fault or undecodable response body.
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    /// Response decoded but carried no text content.
    #[error("response contained no message content")]
    EmptyReply,

    /// The spawned completion task died before producing a result.
    #[error("completion task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Convert a completion outcome into display text.
///
/// This is the only place a failure crosses into the conversation: it
/// becomes an ordinary assistant reply, never a raised fault, so callers
/// above the adapter only ever see a string.
pub fn fail_soft(result: Result<String, CompletionError>) -> String {
    match result {
        Ok(text) => text,
        Err(err) => format!("Sorry, I encountered an error: {err}"),
    }
}

#[derive(Clone)]
pub struct BedrockClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl BedrockClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            endpoint: config.endpoint(),
            api_key: config.api_key.clone(),
        }
    }

    /// Request one assistant reply for the full turn history.
    ///
    /// One outbound call, no retries, default client timeout.
    pub async fn converse(&self, turns: &[Turn]) -> Result<String, CompletionError> {
        let url = format!("{}/model/{}/converse", self.endpoint, MODEL_ID);

        let mut request = self.client.post(&url).json(&build_request(turns));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ServiceError>(&body)
                .map(|e| e.message)
                .unwrap_or_else(|_| format!("service returned {status}"));
            return Err(CompletionError::Service { message });
        }

        let converse: ConverseResponse = response.json().await?;
        converse
            .output
            .message
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or(CompletionError::EmptyReply)
    }
}

/// One message per turn, role passed through, content wrapped as a single
/// text block. Derived fresh from the history on every call.
fn build_request(turns: &[Turn]) -> ConverseRequest {
    ConverseRequest {
        model_id: MODEL_ID.to_string(),
        messages: turns
            .iter()
            .map(|turn| RequestMessage {
                role: turn.role.as_str().to_string(),
                content: vec![ContentBlock {
                    text: turn.content.clone(),
                }],
            })
            .collect(),
        inference_config: InferenceConfig {
            max_tokens: MAX_TOKENS,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Conversation, Role};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn client_for(endpoint: &str) -> BedrockClient {
        BedrockClient::new(&Config {
            region: "us-west-2".to_string(),
            endpoint: Some(endpoint.to_string()),
            api_key: None,
        })
    }

    fn request_complete(raw: &[u8]) -> bool {
        let Some(header_end) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let headers = String::from_utf8_lossy(&raw[..header_end]);
        let content_length = headers
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        raw.len() >= header_end + 4 + content_length
    }

    /// Serve one canned HTTP response, then close the connection.
    async fn stub_service(status_line: &str, body: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&chunk[..n]);
                if request_complete(&raw) {
                    break;
                }
            }
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        format!("http://{addr}")
    }

    /// An address nothing listens on, for simulating network faults.
    async fn refused_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    #[test]
    fn request_derivation_is_deterministic() {
        let mut conversation = Conversation::new();
        conversation.append(Role::User, "Hi");
        conversation.append(Role::Assistant, "Hello");
        conversation.append(Role::User, "How are you?");

        let first = serde_json::to_value(build_request(conversation.turns())).unwrap();
        let second = serde_json::to_value(build_request(conversation.turns())).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn request_matches_converse_wire_shape() {
        let mut conversation = Conversation::new();
        conversation.append(Role::User, "Hi");

        let request = serde_json::to_value(build_request(conversation.turns())).unwrap();
        assert_eq!(
            request,
            serde_json::json!({
                "modelId": "anthropic.claude-3-5-sonnet-20241022-v2:0",
                "messages": [
                    {"role": "user", "content": [{"text": "Hi"}]}
                ],
                "inferenceConfig": {"maxTokens": 1000},
            })
        );
    }

    #[tokio::test]
    async fn success_passes_reply_through_verbatim() {
        let endpoint = stub_service(
            "200 OK",
            r#"{"output":{"message":{"role":"assistant","content":[{"text":"Hello there"}]}},"stopReason":"end_turn"}"#,
        )
        .await;
        let client = client_for(&endpoint);

        let mut conversation = Conversation::new();
        conversation.append(Role::User, "Hi");

        let reply = client.converse(conversation.turns()).await.unwrap();
        assert_eq!(reply, "Hello there");
    }

    #[tokio::test]
    async fn service_error_message_shapes_fail_soft_text() {
        let endpoint = stub_service("400 Bad Request", r#"{"message":"boom"}"#).await;
        let client = client_for(&endpoint);

        let mut conversation = Conversation::new();
        conversation.append(Role::User, "Hi");

        let reply = fail_soft(client.converse(conversation.turns()).await);
        assert_eq!(reply, "Sorry, I encountered an error: boom");
    }

    #[tokio::test]
    async fn network_fault_fails_soft() {
        let endpoint = refused_endpoint().await;
        let client = client_for(&endpoint);

        let mut conversation = Conversation::new();
        conversation.append(Role::User, "Hi");

        let reply = fail_soft(client.converse(conversation.turns()).await);
        assert!(reply.starts_with("Sorry, I encountered an error:"));
    }

    #[tokio::test]
    async fn undecodable_body_fails_soft() {
        let endpoint = stub_service("200 OK", "definitely not json").await;
        let client = client_for(&endpoint);

        let mut conversation = Conversation::new();
        conversation.append(Role::User, "Hi");

        let reply = fail_soft(client.converse(conversation.turns()).await);
        assert!(reply.starts_with("Sorry, I encountered an error:"));
    }

    #[tokio::test]
    async fn empty_content_fails_soft() {
        let endpoint = stub_service("200 OK", r#"{"output":{"message":{"content":[]}}}"#).await;
        let client = client_for(&endpoint);

        let mut conversation = Conversation::new();
        conversation.append(Role::User, "Hi");

        let reply = fail_soft(client.converse(conversation.turns()).await);
        assert_eq!(
            reply,
            "Sorry, I encountered an error: response contained no message content"
        );
    }

    #[tokio::test]
    async fn non_json_error_body_reports_status() {
        let endpoint = stub_service("500 Internal Server Error", "<html>oops</html>").await;
        let client = client_for(&endpoint);

        let mut conversation = Conversation::new();
        conversation.append(Role::User, "Hi");

        let reply = fail_soft(client.converse(conversation.turns()).await);
        assert!(reply.contains("service returned 500"));
    }

    #[tokio::test]
    async fn round_trip_appends_reply_as_assistant_turn() {
        let endpoint = stub_service(
            "200 OK",
            r#"{"output":{"message":{"content":[{"text":"Hi back"}]}}}"#,
        )
        .await;
        let client = client_for(&endpoint);

        let mut conversation = Conversation::new();
        conversation.append(Role::User, "Hi");

        let reply = fail_soft(client.converse(conversation.turns()).await);
        conversation.append(Role::Assistant, reply);

        let turns = conversation.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(
            turns[0],
            Turn {
                role: Role::User,
                content: "Hi".to_string()
            }
        );
        assert_eq!(
            turns[1],
            Turn {
                role: Role::Assistant,
                content: "Hi back".to_string()
            }
        );
    }
}
