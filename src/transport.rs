//! Chat transport boundary.
//!
//! The dispatcher knows nothing about the chat platform beyond "send this
//! text to this chat, eventually". `RecordingTransport` is the in-tree stub
//! for deterministic scenario testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

use crate::domain::member::ChatId;
use crate::error::CoreError;

/// Acknowledgement of one delivered fragment.
#[derive(Debug, Clone)]
pub struct DeliveryAck {
    pub delivered_at: DateTime<Utc>,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_fragment(&self, chat_id: ChatId, text: &str) -> Result<DeliveryAck, CoreError>;
}

/// A delivered fragment as recorded by [`RecordingTransport`].
#[derive(Debug, Clone)]
pub struct RecordedFragment {
    pub chat_id: ChatId,
    pub text: String,
    /// Virtual-clock delivery instant, for pacing assertions.
    pub sent_at: tokio::time::Instant,
}

/// Test transport: records every fragment and can fail on demand.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<RecordedFragment>>,
    failures_remaining: Mutex<u32>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` sends fail with a transport error.
    pub fn fail_next(&self, n: u32) {
        *self.failures_remaining.lock().unwrap() = n;
    }

    pub fn sent(&self) -> Vec<RecordedFragment> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self, chat_id: ChatId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.chat_id == chat_id)
            .map(|f| f.text.clone())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_fragment(&self, chat_id: ChatId, text: &str) -> Result<DeliveryAck, CoreError> {
        {
            let mut failures = self.failures_remaining.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(CoreError::TransportFailure("injected failure".into()));
            }
        }
        self.sent.lock().unwrap().push(RecordedFragment {
            chat_id,
            text: text.to_string(),
            sent_at: tokio::time::Instant::now(),
        });
        Ok(DeliveryAck {
            delivered_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_fragments_per_chat() {
        let t = RecordingTransport::new();
        t.send_fragment(ChatId(1), "xin chào").await.unwrap();
        t.send_fragment(ChatId(2), "hello").await.unwrap();

        assert_eq!(t.texts(ChatId(1)), vec!["xin chào"]);
        assert_eq!(t.sent_count(), 2);
    }

    #[tokio::test]
    async fn injected_failures_then_recovery() {
        let t = RecordingTransport::new();
        t.fail_next(1);
        assert!(t.send_fragment(ChatId(1), "a").await.is_err());
        assert!(t.send_fragment(ChatId(1), "b").await.is_ok());
        assert_eq!(t.texts(ChatId(1)), vec!["b"]);
    }
}
