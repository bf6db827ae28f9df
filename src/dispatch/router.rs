//! Per-chat router.
//!
//! One logical worker per chat: turns for the same chat are strictly
//! serialized through an mpsc queue, turns for different chats run in
//! parallel. An inbound message is first offered to the chat's open
//! ambiguities as a candidate answer; only when it is not an answer does
//! it start a fresh oracle turn.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::timeout;

use crate::config::CoreConfig;
use crate::domain::envelope::{DispatchEnvelope, MessageFragment};
use crate::domain::member::ChatId;
use crate::error::CoreError;
use crate::oracle::{ChatContext, Oracle};
use crate::resolution::AmbiguityNegotiator;
use crate::transport::ChatTransport;

use super::pacing::FragmentPacer;
use super::turn::{TurnDispatcher, TurnResult};
use super::{clarify_question, FALLBACK_REPLY};

const WORKER_QUEUE_DEPTH: usize = 64;

struct RouterInner {
    dispatcher: Arc<TurnDispatcher>,
    negotiator: Arc<AmbiguityNegotiator>,
    oracle: Arc<dyn Oracle>,
    pacer: FragmentPacer,
    config: CoreConfig,
    transcripts: RwLock<HashMap<ChatId, VecDeque<String>>>,
}

/// Entry point for inbound chat messages.
pub struct ChatRouter {
    inner: Arc<RouterInner>,
    workers: Mutex<HashMap<ChatId, mpsc::Sender<String>>>,
}

impl ChatRouter {
    pub fn new(
        dispatcher: Arc<TurnDispatcher>,
        negotiator: Arc<AmbiguityNegotiator>,
        oracle: Arc<dyn Oracle>,
        transport: Arc<dyn ChatTransport>,
        config: CoreConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                dispatcher,
                negotiator,
                oracle,
                pacer: FragmentPacer::new(transport, &config),
                config,
                transcripts: RwLock::new(HashMap::new()),
            }),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Queue an inbound message on the chat's serialized worker, spawning
    /// the worker on first contact.
    pub async fn submit(&self, chat_id: ChatId, text: String) -> Result<(), CoreError> {
        let sender = {
            let mut workers = self.workers.lock().await;
            workers
                .entry(chat_id)
                .or_insert_with(|| {
                    let (tx, rx) = mpsc::channel(WORKER_QUEUE_DEPTH);
                    let inner = self.inner.clone();
                    tokio::spawn(run_worker(inner, chat_id, rx));
                    tx
                })
                .clone()
        };
        sender
            .send(text)
            .await
            .map_err(|_| CoreError::TransportFailure(format!("worker for chat {chat_id} is gone")))
    }

    /// Process one inbound message inline, bypassing the queue. Callers
    /// must provide the same per-chat serialization `submit` gives for
    /// free.
    pub async fn process_inbound(
        &self,
        chat_id: ChatId,
        text: &str,
    ) -> Result<Option<TurnResult>, CoreError> {
        self.inner.process_inbound(chat_id, text).await
    }
}

async fn run_worker(inner: Arc<RouterInner>, chat_id: ChatId, mut rx: mpsc::Receiver<String>) {
    tracing::debug!(chat_id = %chat_id, "chat worker started");
    while let Some(text) = rx.recv().await {
        if let Err(error) = inner.process_inbound(chat_id, &text).await {
            tracing::error!(chat_id = %chat_id, %error, "turn failed");
            inner.send_fallback(chat_id).await;
        }
    }
    tracing::debug!(chat_id = %chat_id, "chat worker stopped");
}

impl RouterInner {
    async fn process_inbound(
        &self,
        chat_id: ChatId,
        text: &str,
    ) -> Result<Option<TurnResult>, CoreError> {
        self.record(chat_id, text).await;

        // A chat with an open ambiguity sees the new message as a candidate
        // answer first.
        if let Some(confirmation) = self.negotiator.answer(chat_id, text).await? {
            let result = self.dispatcher.resume(chat_id, confirmation).await?;
            self.ask_clarifications(chat_id, &result).await;
            self.negotiator
                .tick(chat_id, &result.opened_references())
                .await;
            return Ok(Some(result));
        }

        let context = self.context(chat_id).await;
        let raw = match timeout(
            self.config.oracle_timeout,
            self.oracle.propose(&context, text),
        )
        .await
        {
            Err(_) => {
                tracing::warn!(chat_id = %chat_id, "{}", CoreError::OracleTimeout);
                self.send_fallback(chat_id).await;
                self.negotiator.tick(chat_id, &HashSet::new()).await;
                return Ok(None);
            }
            Ok(Err(error)) => {
                tracing::warn!(chat_id = %chat_id, %error, "oracle call failed");
                self.send_fallback(chat_id).await;
                self.negotiator.tick(chat_id, &HashSet::new()).await;
                return Ok(None);
            }
            Ok(Ok(value)) => value,
        };

        let envelope = match DispatchEnvelope::from_value(&raw) {
            Ok(envelope) => envelope,
            Err(CoreError::MalformedEnvelope(detail)) => {
                tracing::warn!(chat_id = %chat_id, %detail, "malformed envelope from oracle");
                self.send_fallback(chat_id).await;
                self.negotiator.tick(chat_id, &HashSet::new()).await;
                return Ok(None);
            }
            Err(other) => return Err(other),
        };

        let result = self.dispatcher.handle_turn(chat_id, envelope).await?;
        self.ask_clarifications(chat_id, &result).await;
        self.negotiator
            .tick(chat_id, &result.opened_references())
            .await;
        Ok(Some(result))
    }

    /// Send a clarifying question for every ambiguity the turn opened. The
    /// oracle words the question; when it cannot, a plain core-side
    /// enumeration goes out instead, so the chat is never left hanging.
    async fn ask_clarifications(&self, chat_id: ChatId, result: &TurnResult) {
        for request in &result.clarifications {
            let names: Vec<String> = request
                .candidates
                .iter()
                .map(|c| c.display_name.clone())
                .collect();
            let context = self.context(chat_id).await;

            let worded = match timeout(
                self.config.oracle_timeout,
                self.oracle
                    .clarify(&context, &request.reference_text, &names),
            )
            .await
            {
                Ok(Ok(value)) => DispatchEnvelope::from_value(&value)
                    .ok()
                    .map(|envelope| envelope.fragments),
                _ => None,
            };

            let fragments = worded.unwrap_or_else(|| {
                vec![MessageFragment {
                    text: clarify_question(&request.reference_text, &names),
                    delay_ms: self.config.min_fragment_delay_ms,
                }]
            });
            self.pacer.deliver(chat_id, &fragments).await;
        }
    }

    async fn send_fallback(&self, chat_id: ChatId) {
        self.pacer
            .deliver(
                chat_id,
                &[MessageFragment {
                    text: FALLBACK_REPLY.to_string(),
                    delay_ms: self.config.min_fragment_delay_ms,
                }],
            )
            .await;
    }

    async fn record(&self, chat_id: ChatId, text: &str) {
        let mut transcripts = self.transcripts.write().await;
        let window = transcripts.entry(chat_id).or_default();
        window.push_back(text.to_string());
        while window.len() > self.config.transcript_window {
            window.pop_front();
        }
    }

    async fn context(&self, chat_id: ChatId) -> ChatContext {
        let transcripts = self.transcripts.read().await;
        ChatContext {
            chat_id,
            recent_messages: transcripts
                .get(&chat_id)
                .map(|w| w.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }
}
