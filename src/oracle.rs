//! Oracle boundary.
//!
//! The oracle is the external natural-language component that turns a raw
//! inbound message into one envelope-shaped JSON value per turn. It is an
//! untrusted black box: implementations return raw `serde_json::Value` and
//! the dispatcher validates it into [`crate::domain::DispatchEnvelope`].
//!
//! `HttpOracle` talks to an OpenAI-compatible chat-completions endpoint in
//! JSON mode. `ScriptedOracle` replays canned values for deterministic
//! scenario testing.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::catalog::SuggestionCatalog;
use crate::domain::member::ChatId;

/// Default chat-completions endpoint
const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Default model
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Prior chat context handed to the oracle with every call.
#[derive(Debug, Clone)]
pub struct ChatContext {
    pub chat_id: ChatId,
    /// Most recent inbound messages, oldest first.
    pub recent_messages: Vec<String>,
}

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Produce the turn envelope for an inbound message.
    async fn propose(&self, context: &ChatContext, inbound: &str) -> Result<Value>;

    /// Word a clarifying question for an ambiguous reference. The candidate
    /// display names must all appear in the reply.
    async fn clarify(
        &self,
        context: &ChatContext,
        reference: &str,
        candidates: &[String],
    ) -> Result<Value>;
}

/// Oracle over an OpenAI-compatible HTTP API.
#[derive(Clone)]
pub struct HttpOracle {
    api_key: String,
    endpoint: String,
    model: String,
    client: reqwest::Client,
    catalog: Arc<dyn SuggestionCatalog>,
}

impl HttpOracle {
    pub fn new(api_key: String, catalog: Arc<dyn SuggestionCatalog>) -> Self {
        let model =
            std::env::var("TABKEEPER_ORACLE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let endpoint = std::env::var("TABKEEPER_ORACLE_URL")
            .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        Self {
            api_key,
            endpoint,
            model,
            client: reqwest::Client::new(),
            catalog,
        }
    }

    /// Create from environment variables
    pub fn from_env(catalog: Arc<dyn SuggestionCatalog>) -> Result<Self> {
        let api_key = std::env::var("TABKEEPER_ORACLE_API_KEY")
            .map_err(|_| anyhow!("TABKEEPER_ORACLE_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, catalog))
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    fn system_prompt(&self) -> String {
        let menu: Vec<String> = self
            .catalog
            .all()
            .iter()
            .map(|i| format!("- {} ({})", i.name, i.blurb))
            .collect();
        format!(
            "Bạn là trợ lý ghi sổ nợ của một nhóm chat. {help}\n\
             Trả lời DUY NHẤT một JSON object với các trường:\n\
             kind: \"reply\" | \"mutate\" | \"stop\";\n\
             messages: [{{\"text\": string, \"delayMs\": number}}];\n\
             mutations (tùy chọn): [{{\"queryShape\": \"debt.create\" | \
             \"payment.record\" | \"debt.settle\", \"params\": \
             {{\"creditorRef\", \"debtorRef\", \"amount\", \"currency\", \"note\"}}}}];\n\
             continuation: \"continue\" | \"stop\".\n\
             Tên người giữ nguyên như người dùng gõ, không tự đoán thành viên.\n\
             Thực đơn gợi ý món:\n{menu}",
            help = self.catalog.help_text(),
            menu = menu.join("\n"),
        )
    }

    /// Internal API call implementation
    async fn call_api(&self, system_prompt: &str, user_prompt: &str) -> Result<Value> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": 0.1,
            "response_format": {"type": "json_object"}
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("oracle API error {}: {}", status, body));
        }

        #[derive(Deserialize)]
        struct Message {
            content: String,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            choices: Vec<Choice>,
        }

        let api_response: ApiResponse = response.json().await?;
        let content = api_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| anyhow!("oracle returned no choices"))?;

        tracing::debug!(
            "oracle raw content: {}",
            content.chars().take(500).collect::<String>()
        );

        serde_json::from_str(&content).map_err(|e| anyhow!("oracle content is not JSON: {e}"))
    }

    fn user_prompt(context: &ChatContext, inbound: &str) -> String {
        let mut prompt = String::new();
        if !context.recent_messages.is_empty() {
            prompt.push_str("Tin nhắn gần đây:\n");
            for m in &context.recent_messages {
                prompt.push_str(m);
                prompt.push('\n');
            }
            prompt.push('\n');
        }
        prompt.push_str("Tin nhắn mới: ");
        prompt.push_str(inbound);
        prompt
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn propose(&self, context: &ChatContext, inbound: &str) -> Result<Value> {
        self.call_api(&self.system_prompt(), &Self::user_prompt(context, inbound))
            .await
    }

    async fn clarify(
        &self,
        context: &ChatContext,
        reference: &str,
        candidates: &[String],
    ) -> Result<Value> {
        let ask = format!(
            "Người dùng nhắc tới \"{reference}\" nhưng có nhiều người trùng tên: {}. \
             Soạn một câu hỏi ngắn, thân thiện để hỏi lại, nêu đủ các tên trên. \
             Trả về envelope kind=\"reply\", continuation=\"continue\".",
            candidates.join(", ")
        );
        self.call_api(&self.system_prompt(), &Self::user_prompt(context, &ask))
            .await
    }
}

/// Replays canned envelope values for deterministic scenario testing.
///
/// `propose` pops from the turn script, `clarify` from the clarification
/// script; an exhausted script is an oracle failure, which exercises the
/// caller's fallback path.
#[derive(Default)]
pub struct ScriptedOracle {
    turns: Mutex<VecDeque<Value>>,
    clarifications: Mutex<VecDeque<Value>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_turn(&self, value: Value) {
        self.turns.lock().unwrap().push_back(value);
    }

    pub fn push_clarification(&self, value: Value) {
        self.clarifications.lock().unwrap().push_back(value);
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn propose(&self, _context: &ChatContext, _inbound: &str) -> Result<Value> {
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted oracle is out of turns"))
    }

    async fn clarify(
        &self,
        _context: &ChatContext,
        _reference: &str,
        _candidates: &[String],
    ) -> Result<Value> {
        self.clarifications
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted oracle has no clarification"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use serde_json::json;

    fn context() -> ChatContext {
        ChatContext {
            chat_id: ChatId(1),
            recent_messages: vec!["user: hôm qua ăn gì".into()],
        }
    }

    #[test]
    fn system_prompt_carries_the_menu() {
        let oracle = HttpOracle::new("k".into(), Arc::new(StaticCatalog::default()));
        let prompt = oracle.system_prompt();
        assert!(prompt.contains("bún chả"));
        assert!(prompt.contains("queryShape"));
    }

    #[test]
    fn user_prompt_includes_context() {
        let prompt = HttpOracle::user_prompt(&context(), "ăn gì giờ");
        assert!(prompt.contains("hôm qua ăn gì"));
        assert!(prompt.ends_with("ăn gì giờ"));
    }

    #[tokio::test]
    async fn scripted_oracle_replays_in_order() {
        let oracle = ScriptedOracle::new();
        oracle.push_turn(json!({"n": 1}));
        oracle.push_turn(json!({"n": 2}));

        assert_eq!(oracle.propose(&context(), "a").await.unwrap(), json!({"n": 1}));
        assert_eq!(oracle.propose(&context(), "b").await.unwrap(), json!({"n": 2}));
        assert!(oracle.propose(&context(), "c").await.is_err());
    }
}
