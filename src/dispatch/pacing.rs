//! Fragment pacing.
//!
//! Fragments go out strictly in order. Each one is preceded by its
//! requested delay, clamped to the policy window and measured from the end
//! of the previous delivery. A failed delivery gets a bounded retry, then
//! the fragment is dropped and the rest of the turn still goes out.

use std::sync::Arc;
use std::time::Duration;

use crate::config::CoreConfig;
use crate::domain::envelope::MessageFragment;
use crate::domain::member::ChatId;
use crate::transport::ChatTransport;

const RETRY_BACKOFF: Duration = Duration::from_millis(250);

pub struct FragmentPacer {
    transport: Arc<dyn ChatTransport>,
    min_delay_ms: u64,
    max_delay_ms: u64,
    max_retries: u32,
}

impl FragmentPacer {
    pub fn new(transport: Arc<dyn ChatTransport>, config: &CoreConfig) -> Self {
        Self {
            transport,
            min_delay_ms: config.min_fragment_delay_ms,
            max_delay_ms: config.max_fragment_delay_ms.max(config.min_fragment_delay_ms),
            max_retries: config.transport_max_retries,
        }
    }

    pub fn clamp_delay(&self, requested_ms: u64) -> u64 {
        requested_ms.clamp(self.min_delay_ms, self.max_delay_ms)
    }

    /// Deliver the fragments in order. Returns how many were actually
    /// delivered.
    pub async fn deliver(&self, chat_id: ChatId, fragments: &[MessageFragment]) -> usize {
        let mut sent = 0;
        for fragment in fragments {
            let delay = self.clamp_delay(fragment.delay_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            match self.send_with_retry(chat_id, &fragment.text).await {
                Ok(()) => sent += 1,
                Err(detail) => {
                    tracing::warn!(chat_id = %chat_id, %detail, "fragment dropped after retries");
                }
            }
        }
        sent
    }

    async fn send_with_retry(&self, chat_id: ChatId, text: &str) -> Result<(), String> {
        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            match self.transport.send_fragment(chat_id, text).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < self.max_retries {
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                }
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingTransport;

    fn pacer(transport: Arc<RecordingTransport>) -> FragmentPacer {
        FragmentPacer::new(transport, &CoreConfig::default())
    }

    fn fragment(text: &str, delay_ms: u64) -> MessageFragment {
        MessageFragment {
            text: text.into(),
            delay_ms,
        }
    }

    #[test]
    fn clamp_respects_policy_window() {
        let p = pacer(Arc::new(RecordingTransport::new()));
        assert_eq!(p.clamp_delay(0), 200);
        assert_eq!(p.clamp_delay(900), 900);
        assert_eq!(p.clamp_delay(60_000), 3500);
    }

    #[tokio::test(start_paused = true)]
    async fn fragments_are_paced_in_order() {
        let transport = Arc::new(RecordingTransport::new());
        let p = pacer(transport.clone());

        let start = tokio::time::Instant::now();
        let sent = p
            .deliver(ChatId(1), &[fragment("t1", 300), fragment("t2", 1200)])
            .await;
        assert_eq!(sent, 2);

        let recorded = transport.sent();
        assert_eq!(recorded[0].text, "t1");
        assert_eq!(recorded[1].text, "t2");
        assert!(recorded[0].sent_at - start >= Duration::from_millis(300));
        assert!(
            recorded[1].sent_at - recorded[0].sent_at >= Duration::from_millis(1200),
            "second fragment must wait its full delay after the first delivery"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fragment_is_dropped_but_rest_still_go_out() {
        let transport = Arc::new(RecordingTransport::new());
        let p = pacer(transport.clone());

        // Exhaust every retry for the first fragment only.
        transport.fail_next(CoreConfig::default().transport_max_retries + 1);
        let sent = p
            .deliver(ChatId(1), &[fragment("lost", 200), fragment("kept", 200)])
            .await;

        assert_eq!(sent, 1);
        assert_eq!(transport.texts(ChatId(1)), vec!["kept"]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let transport = Arc::new(RecordingTransport::new());
        let p = pacer(transport.clone());

        transport.fail_next(1);
        let sent = p.deliver(ChatId(1), &[fragment("t", 200)]).await;
        assert_eq!(sent, 1);
        assert_eq!(transport.texts(ChatId(1)), vec!["t"]);
    }
}
