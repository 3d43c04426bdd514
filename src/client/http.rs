use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{ChatError, Config};
use crate::protocol::{decode_history, Message};

use super::HistorySource;

/// Path of the agent chat endpoints, relative to the configured base URL.
const AGENT_PATH: &str = "/api/chat/agent";

/// HTTP collaborator for the agent chat backend.
///
/// Builds requests and maps failed statuses to [`ChatError`]. It never
/// retries; a failed request is reported to the caller as is.
#[derive(Clone)]
pub struct AgentClient {
    base_url: String,
    token: Option<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct AgentRequest<'a> {
    query: &'a str,
    config: RequestConfig<'a>,
}

#[derive(Debug, Serialize)]
struct RequestConfig<'a> {
    thread_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    history: Vec<Value>,
}

impl AgentClient {
    /// Creates a client from the `[server]` section of the configuration.
    pub fn new(config: &Config) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(ChatError::from)?;
        Ok(Self {
            base_url: config.server.base_url.trim_end_matches('/').to_string(),
            token: config.server.token.clone(),
            client,
        })
    }

    pub fn agent_url(&self, agent_id: &str) -> String {
        format!("{base}{AGENT_PATH}/{agent_id}", base = self.base_url)
    }

    pub fn history_url(&self, agent_id: &str) -> String {
        format!("{}/history", self.agent_url(agent_id))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Posts a user query and returns the streaming NDJSON response.
    pub async fn send_agent_message(
        &self,
        agent_id: &str,
        query: &str,
        thread_id: &str,
    ) -> Result<Response, ChatError> {
        let body = AgentRequest {
            query,
            config: RequestConfig { thread_id },
        };
        let response = self
            .authorize(self.client.post(self.agent_url(agent_id)))
            .json(&body)
            .send()
            .await
            .map_err(ChatError::from)?;

        check_status(response).await
    }

    /// Fetches the persisted message log of a thread.
    pub async fn get_agent_history(
        &self,
        agent_id: &str,
        thread_id: &str,
    ) -> Result<Vec<Message>, ChatError> {
        let response = self
            .authorize(self.client.get(self.history_url(agent_id)))
            .query(&[("thread_id", thread_id)])
            .send()
            .await
            .map_err(ChatError::from)?;

        let response = check_status(response).await?;
        let response_text = response
            .text()
            .await
            .map_err(|e| ChatError::ResponseFormat(format!("Failed to get response text: {e}")))?;
        let history: HistoryResponse = serde_json::from_str(&response_text)
            .map_err(|e| ChatError::ResponseFormat(format!("Failed to parse history: {e}")))?;

        Ok(decode_history(history.history))
    }
}

async fn check_status(response: Response) -> Result<Response, ChatError> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED => Err(ChatError::Authentication(
            "Authentication failed, please log in again".to_string(),
        )),
        StatusCode::FORBIDDEN => Err(ChatError::Forbidden(
            "Insufficient permissions for this operation".to_string(),
        )),
        StatusCode::NOT_FOUND => Err(ChatError::NotFound(format!(
            "Requested resource does not exist: {}",
            response.url()
        ))),
        status => {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            if status.is_server_error() {
                Err(ChatError::ServerError(format!("{status}: {error_text}")))
            } else {
                Err(ChatError::ApiError(format!(
                    "API request failed with status {status}: {error_text}"
                )))
            }
        }
    }
}

/// The history of one agent thread, fetched over HTTP.
#[derive(Clone)]
pub struct ThreadHistory {
    client: AgentClient,
    agent_id: String,
    thread_id: String,
}

impl ThreadHistory {
    pub fn new(client: AgentClient, agent_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            client,
            agent_id: agent_id.into(),
            thread_id: thread_id.into(),
        }
    }
}

#[async_trait]
impl HistorySource for ThreadHistory {
    async fn fetch_history(&self) -> Result<Vec<Message>, ChatError> {
        self.client
            .get_agent_history(&self.agent_id, &self.thread_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let mut config = Config::default();
        config.server.base_url = "http://chat.local:5050/".to_string();
        let client = AgentClient::new(&config).expect("client builds");

        assert_eq!(client.agent_url("a1"), "http://chat.local:5050/api/chat/agent/a1");
        assert_eq!(
            client.history_url("a1"),
            "http://chat.local:5050/api/chat/agent/a1/history"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let body = AgentRequest {
            query: "hello",
            config: RequestConfig { thread_id: "t1" },
        };
        assert_eq!(
            serde_json::to_value(&body).expect("serializable"),
            serde_json::json!({"query": "hello", "config": {"thread_id": "t1"}})
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let mut config = Config::default();
        // Port 9 (discard) is closed on test machines.
        config.server.base_url = "http://127.0.0.1:9".to_string();
        let client = AgentClient::new(&config).expect("client builds");

        let result = client.get_agent_history("a1", "t1").await;
        assert!(matches!(result, Err(ChatError::Network(_))));
    }
}
