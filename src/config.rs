//! Policy knobs for the resolution & dispatch core.
//!
//! Everything here is an explicit policy value with the documented default;
//! deployments override through `TABKEEPER_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

/// Runtime policy configuration.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Lower clamp for a fragment's requested pacing delay.
    pub min_fragment_delay_ms: u64,
    /// Upper clamp for a fragment's requested pacing delay.
    pub max_fragment_delay_ms: u64,
    /// Wall-clock bound on one oracle call.
    pub oracle_timeout: Duration,
    /// How many non-addressing turns an open ambiguity survives.
    pub ambiguity_ttl_turns: u32,
    /// Minimum resolver score to keep a candidate.
    pub accept_threshold: f32,
    /// Score assigned to substring-containment matches.
    pub substring_score: f32,
    /// Confidence written for a freshly created virtual member's alias.
    pub provisional_confidence: f32,
    /// Step by which implicit accepted use moves confidence toward 1.0.
    pub confidence_reinforcement: f32,
    /// Optional Jaro-Winkler floor for fuzzy containment; `None` keeps the
    /// binary substring rule.
    pub fuzzy_floor: Option<f64>,
    /// Delivery attempts per fragment before it is dropped.
    pub transport_max_retries: u32,
    /// Inbound messages remembered per chat as oracle context.
    pub transcript_window: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            min_fragment_delay_ms: 200,
            max_fragment_delay_ms: 3500,
            oracle_timeout: Duration::from_secs(6),
            ambiguity_ttl_turns: 1,
            accept_threshold: 0.8,
            substring_score: 0.8,
            provisional_confidence: 0.5,
            confidence_reinforcement: 0.5,
            fuzzy_floor: None,
            transport_max_retries: 2,
            transcript_window: 20,
        }
    }
}

impl CoreConfig {
    /// Load the configuration from the environment (and `.env` if present),
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            min_fragment_delay_ms: env_parse(
                "TABKEEPER_MIN_FRAGMENT_DELAY_MS",
                defaults.min_fragment_delay_ms,
            ),
            max_fragment_delay_ms: env_parse(
                "TABKEEPER_MAX_FRAGMENT_DELAY_MS",
                defaults.max_fragment_delay_ms,
            ),
            oracle_timeout: Duration::from_millis(env_parse(
                "TABKEEPER_ORACLE_TIMEOUT_MS",
                defaults.oracle_timeout.as_millis() as u64,
            )),
            ambiguity_ttl_turns: env_parse(
                "TABKEEPER_AMBIGUITY_TTL_TURNS",
                defaults.ambiguity_ttl_turns,
            ),
            accept_threshold: env_parse("TABKEEPER_ACCEPT_THRESHOLD", defaults.accept_threshold),
            substring_score: env_parse("TABKEEPER_SUBSTRING_SCORE", defaults.substring_score),
            provisional_confidence: env_parse(
                "TABKEEPER_PROVISIONAL_CONFIDENCE",
                defaults.provisional_confidence,
            ),
            confidence_reinforcement: env_parse(
                "TABKEEPER_CONFIDENCE_REINFORCEMENT",
                defaults.confidence_reinforcement,
            ),
            fuzzy_floor: std::env::var("TABKEEPER_FUZZY_FLOOR")
                .ok()
                .and_then(|v| v.parse().ok()),
            transport_max_retries: env_parse(
                "TABKEEPER_TRANSPORT_MAX_RETRIES",
                defaults.transport_max_retries,
            ),
            transcript_window: env_parse(
                "TABKEEPER_TRANSCRIPT_WINDOW",
                defaults.transcript_window,
            ),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
