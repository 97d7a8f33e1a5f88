use crate::translator::provider::{CatalogHint, ParseProvider, ParsedCandidate, ProviderError};
use async_trait::async_trait;
use log::{debug, warn};
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;

pub const LOCAL_PROVIDER_ID: &str = "local";
pub const OPENAI_PROVIDER_ID: &str = "openai";
/// Other names the local OpenAI-compatible server is known by.
pub const LOCAL_PROVIDER_ALIASES: [&str; 2] = ["lmstudio", "deepseek"];

const SYSTEM_PROMPT: &str =
    "You turn questions about business metrics into JSON query parameters. Reply with JSON only.";

/// Client for any server speaking the OpenAI chat-completions API.
///
/// Used both for a local inference server and for the hosted API; the two
/// differ only in base URL, model and key.
pub struct ChatCompletionsProvider {
    id: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl ChatCompletionsProvider {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        ChatCompletionsProvider {
            id: id.into(),
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn complete(&self, prompt: String) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1
        });

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            warn!("Provider {} request failed: {}", self.id, e);
            ProviderError::Unavailable(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!(
                "{} answered with HTTP {}",
                self.endpoint(),
                status
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Malformed("no message content in reply".to_string()))
    }
}

#[async_trait]
impl ParseProvider for ChatCompletionsProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn parse(&self, text: &str, hint: &CatalogHint) -> Result<ParsedCandidate, ProviderError> {
        let reply = self.complete(build_prompt(text, hint)).await?;
        debug!("Provider {} replied: {}", self.id, reply);
        parse_reply(&reply)
    }
}

/// The model picks names and a time phrase; dates are computed locally.
fn build_prompt(text: &str, hint: &CatalogHint) -> String {
    format!(
        r#"Use only the metrics and dimensions defined below.
{}
Question: {}

Return a JSON object:
{{
    "metric_name": "one metric name from the list",
    "dimensions": ["dimension names to group by"],
    "time_keyword": "the time phrase exactly as written, e.g. 最近7天, last month; do not compute dates",
    "filters": {{"dimension name": ["values"]}}
}}
Use null for anything the question does not mention."#,
        hint.render(),
        text
    )
}

fn json_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").unwrap())
}

/// Extracts the first `{...}` span of a reply and reads it as a candidate.
pub fn parse_reply(reply: &str) -> Result<ParsedCandidate, ProviderError> {
    let object = json_object_re()
        .find(reply)
        .ok_or_else(|| ProviderError::Malformed(format!("no JSON object in reply: {:?}", reply)))?;
    serde_json::from_str(object.as_str()).map_err(|e| ProviderError::Malformed(e.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::query::FilterValues;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_reply_inside_code_fence() {
        let reply = "Sure:\n```json\n{\"metric_name\": \"日收入\", \"dimensions\": [\"城市\"], \"time_keyword\": \"最近7天\", \"filters\": {\"city\": \"北京\"}}\n```";
        let candidate = parse_reply(reply).unwrap();
        assert_eq!(candidate.metric_name.as_deref(), Some("日收入"));
        assert_eq!(candidate.dimensions, vec!["城市"]);
        assert_eq!(candidate.time_phrase.as_deref(), Some("最近7天"));
        assert_eq!(candidate.filters["city"], FilterValues(vec!["北京".to_string()]));
    }

    #[test]
    fn test_parse_reply_without_json() {
        assert!(matches!(
            parse_reply("I cannot help with that."),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_reply_with_wrong_shape() {
        assert!(matches!(
            parse_reply(r#"{"dimensions": "city", "filters": 3}"#),
            Err(ProviderError::Malformed(_))
        ));
    }

    /// Serves one canned HTTP response and returns the raw request it received.
    async fn serve_once(status: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/v1", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (base_url, handle)
    }

    #[tokio::test]
    async fn test_chat_completion_round_trip() {
        let content = r#"{"metric_name": "revenue", "dimensions": ["city"], "time_keyword": "最近7天", "filters": null}"#;
        let body = json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string();
        let (base_url, server) = serve_once("200 OK", body).await;

        let provider = ChatCompletionsProvider::new("openai", base_url, "gpt-3.5-turbo", Some("sk-test".to_string()));
        let candidate = provider
            .parse("最近7天的日收入，按城市分组", &CatalogHint::default())
            .await
            .unwrap();

        assert_eq!(candidate.metric_name.as_deref(), Some("revenue"));
        assert_eq!(candidate.dimensions, vec!["city"]);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/chat/completions"));
        assert!(request.to_lowercase().contains("authorization: bearer sk-test"));
        assert!(request.contains("gpt-3.5-turbo"));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let (base_url, _server) = serve_once("503 Service Unavailable", "{}".to_string()).await;
        let provider = ChatCompletionsProvider::new("local", base_url, "local-model", None);
        assert!(matches!(
            provider.parse("收入", &CatalogHint::default()).await,
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/v1", listener.local_addr().unwrap());
        drop(listener);

        let provider = ChatCompletionsProvider::new("local", base_url, "local-model", None);
        assert!(matches!(
            provider.parse("收入", &CatalogHint::default()).await,
            Err(ProviderError::Unavailable(_))
        ));
    }
}
