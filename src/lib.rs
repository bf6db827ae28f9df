//! tabkeeper — entity resolution & dispatch core for a chat-group shared
//! debt ledger.
//!
//! Members of a chat group record and settle debts (and get food
//! suggestions) through free-form messages. An external oracle turns each
//! inbound message into a structured [`domain::DispatchEnvelope`]; this
//! crate owns everything with real invariants behind that boundary:
//!
//! - [`resolution::Resolver`] scores a free-text name fragment against the
//!   chat's learned aliases,
//! - [`resolution::AmbiguityNegotiator`] runs the open "which X?" questions
//!   and learns aliases on confirmation,
//! - [`directory::MemberDirectory`] materializes virtual members and merges
//!   them into real ones,
//! - [`ledger::LedgerExecutor`] commits each turn's mutations as one
//!   all-or-nothing batch,
//! - [`dispatch::TurnDispatcher`] and [`dispatch::ChatRouter`] drive turns,
//!   serialized per chat, pacing outgoing fragments.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tabkeeper::config::CoreConfig;
//! use tabkeeper::dispatch::{ChatRouter, TurnDispatcher};
//! use tabkeeper::oracle::ScriptedOracle;
//! use tabkeeper::resolution::AmbiguityNegotiator;
//! use tabkeeper::store::MemoryStore;
//! use tabkeeper::transport::RecordingTransport;
//!
//! let config = CoreConfig::default();
//! let store = Arc::new(MemoryStore::new());
//! let transport = Arc::new(RecordingTransport::new());
//! let negotiator = Arc::new(AmbiguityNegotiator::new(
//!     store.clone(),
//!     config.ambiguity_ttl_turns,
//! ));
//! let dispatcher = Arc::new(TurnDispatcher::new(
//!     store,
//!     transport.clone(),
//!     negotiator.clone(),
//!     &config,
//! ));
//! let router = ChatRouter::new(
//!     dispatcher,
//!     negotiator,
//!     Arc::new(ScriptedOracle::new()),
//!     transport,
//!     config,
//! );
//! # let _ = router;
//! ```

pub mod catalog;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod oracle;
pub mod resolution;
pub mod store;
pub mod transport;

pub use config::CoreConfig;
pub use error::{CoreError, RejectReason, StoreError};

/// Install a `tracing` subscriber honoring `RUST_LOG`, defaulting to
/// `info`. Safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
