//! Reference resolution against the chat's alias store.
//!
//! Scoring is deliberately recall-heavy: an exact normalized match scores
//! 1.0, case/diacritic-insensitive substring containment (either direction)
//! scores 0.8, everything else 0. "Long" reaching the alias "Ngọc Long" is
//! intended — precision is recovered downstream by the ambiguity
//! negotiator, never by silently picking a candidate here.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use smallvec::SmallVec;

use crate::config::CoreConfig;
use crate::domain::member::{ChatId, MemberId};
use crate::error::CoreError;
use crate::store::Store;

use super::normalize::{fold_diacritics, normalize_reference};

/// Scoring configuration.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Minimum score a candidate needs to be kept.
    pub accept_threshold: f32,
    /// Score assigned to substring containment matches.
    pub substring_score: f32,
    /// Optional Jaro-Winkler floor: when set, near-miss spellings that meet
    /// it also score `substring_score`. Off by default.
    pub fuzzy_floor: Option<f64>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.8,
            substring_score: 0.8,
            fuzzy_floor: None,
        }
    }
}

impl From<&CoreConfig> for ResolverConfig {
    fn from(config: &CoreConfig) -> Self {
        Self {
            accept_threshold: config.accept_threshold,
            substring_score: config.substring_score,
            fuzzy_floor: config.fuzzy_floor,
        }
    }
}

/// A scored candidate member for an ambiguous reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub member_id: MemberId,
    pub score: f32,
    pub confidence: f32,
    pub last_used_at: DateTime<Utc>,
    /// The stored alias text that produced the best score.
    pub matched_alias: String,
}

/// Outcome of resolving one free-text reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved {
        member_id: MemberId,
        confidence: f32,
        /// The stored alias text that matched.
        matched_alias: String,
    },
    /// Two or more candidates cleared the threshold; sorted by score desc,
    /// then confidence desc, then recency desc.
    Ambiguous(Vec<Candidate>),
    Unresolved,
}

/// Read-only scorer over the alias store. Never writes.
pub struct Resolver {
    store: Arc<dyn Store>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(store: Arc<dyn Store>, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    /// Score `reference` against every alias entry of the chat.
    pub async fn resolve(
        &self,
        chat_id: ChatId,
        reference: &str,
    ) -> Result<Resolution, CoreError> {
        let ref_norm = normalize_reference(reference);
        if ref_norm.is_empty() {
            return Ok(Resolution::Unresolved);
        }
        let ref_key = fold_diacritics(&ref_norm);

        // Best candidate per member: the same member may be reachable
        // through several aliases and must appear once.
        let mut best: HashMap<MemberId, Candidate> = HashMap::new();

        for entry in self.store.aliases_for_chat(chat_id).await? {
            let score = self.score(&ref_norm, &ref_key, &entry.alias_text);
            if score < self.config.accept_threshold {
                continue;
            }
            let candidate = Candidate {
                member_id: entry.member_id,
                score,
                confidence: entry.confidence,
                last_used_at: entry.last_used_at,
                matched_alias: entry.alias_text,
            };
            match best.get(&entry.member_id) {
                Some(existing) if !outranks(&candidate, existing) => {}
                _ => {
                    best.insert(entry.member_id, candidate);
                }
            }
        }

        let mut candidates: SmallVec<[Candidate; 8]> = best.into_values().collect();
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.last_used_at.cmp(&a.last_used_at))
        });

        tracing::debug!(
            chat_id = %chat_id,
            reference = %ref_norm,
            candidates = candidates.len(),
            "reference scored"
        );

        match candidates.len() {
            0 => Ok(Resolution::Unresolved),
            1 => {
                let c = candidates.into_iter().next().expect("len checked");
                Ok(Resolution::Resolved {
                    member_id: c.member_id,
                    confidence: c.confidence,
                    matched_alias: c.matched_alias,
                })
            }
            _ => Ok(Resolution::Ambiguous(candidates.into_vec())),
        }
    }

    fn score(&self, ref_norm: &str, ref_key: &str, alias_norm: &str) -> f32 {
        if alias_norm == ref_norm {
            return 1.0;
        }
        let alias_key = fold_diacritics(alias_norm);
        if alias_key.contains(ref_key) || ref_key.contains(&alias_key) {
            return self.config.substring_score;
        }
        if let Some(floor) = self.config.fuzzy_floor {
            if strsim::jaro_winkler(ref_key, &alias_key) >= floor {
                return self.config.substring_score;
            }
        }
        0.0
    }
}

fn outranks(a: &Candidate, b: &Candidate) -> bool {
    (a.score, a.confidence, a.last_used_at) > (b.score, b.confidence, b.last_used_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alias::AliasUpsert;
    use crate::store::{AliasRepository, MemoryStore};
    use uuid::Uuid;

    async fn store_with(aliases: &[(&str, MemberId, f32)]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for (text, member, confidence) in aliases {
            store
                .upsert_alias(&AliasUpsert::seeded(
                    ChatId(1),
                    normalize_reference(text),
                    *member,
                    *confidence,
                ))
                .await
                .unwrap();
        }
        store
    }

    fn resolver(store: Arc<MemoryStore>) -> Resolver {
        Resolver::new(store, ResolverConfig::default())
    }

    #[tokio::test]
    async fn exact_match_resolves_with_stored_confidence() {
        let m = Uuid::new_v4();
        let store = store_with(&[("Thịnh", m, 0.7)]).await;
        let r = resolver(store);

        match r.resolve(ChatId(1), "thịnh").await.unwrap() {
            Resolution::Resolved {
                member_id,
                confidence,
                matched_alias,
            } => {
                assert_eq!(member_id, m);
                assert_eq!(confidence, 0.7);
                assert_eq!(matched_alias, "thịnh");
            }
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn substring_matches_both_directions() {
        let m3 = Uuid::new_v4();
        let store = store_with(&[("Ngọc Long", m3, 0.9)]).await;
        let r = resolver(store);

        for reference in ["Ngọc Long", "Long", "ngoc long nè"] {
            match r.resolve(ChatId(1), reference).await.unwrap() {
                Resolution::Resolved { member_id, .. } => assert_eq!(member_id, m3),
                other => panic!("`{reference}` should reach M3, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn no_match_is_unresolved() {
        let store = store_with(&[("Ngọc Long", Uuid::new_v4(), 0.9)]).await;
        let r = resolver(store);
        assert_eq!(
            r.resolve(ChatId(1), "Sobbin").await.unwrap(),
            Resolution::Unresolved
        );
    }

    #[tokio::test]
    async fn blank_reference_is_unresolved() {
        let store = store_with(&[]).await;
        let r = resolver(store);
        assert_eq!(
            r.resolve(ChatId(1), "  ?! ").await.unwrap(),
            Resolution::Unresolved
        );
    }

    #[tokio::test]
    async fn duplicate_alias_text_is_ambiguous_never_a_silent_pick() {
        let (m1, m2) = (Uuid::new_v4(), Uuid::new_v4());
        let store = store_with(&[("Long ú", m1, 0.8), ("Long ú", m2, 0.6)]).await;
        let r = resolver(store);

        match r.resolve(ChatId(1), "Long ú").await.unwrap() {
            Resolution::Ambiguous(candidates) => {
                assert_eq!(candidates.len(), 2);
                // Equal score, so confidence breaks the tie.
                assert_eq!(candidates[0].member_id, m1);
                assert_eq!(candidates[1].member_id, m2);
            }
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exact_match_outranks_substring_in_ordering() {
        let (m1, m2) = (Uuid::new_v4(), Uuid::new_v4());
        // "long" is exact for m1, substring into "ngọc long" for m2.
        let store = store_with(&[("Long", m1, 0.5), ("Ngọc Long", m2, 1.0)]).await;
        let r = resolver(store);

        match r.resolve(ChatId(1), "Long").await.unwrap() {
            Resolution::Ambiguous(candidates) => {
                assert_eq!(candidates[0].member_id, m1, "score beats confidence");
                assert_eq!(candidates[0].score, 1.0);
                assert_eq!(candidates[1].score, 0.8);
            }
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn same_member_via_multiple_aliases_appears_once() {
        let m = Uuid::new_v4();
        let store = store_with(&[("Long ú", m, 0.6), ("Ngọc Long", m, 0.9)]).await;
        let r = resolver(store);

        match r.resolve(ChatId(1), "Long").await.unwrap() {
            Resolution::Resolved { member_id, .. } => assert_eq!(member_id, m),
            other => panic!("expected single Resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolver_is_read_only() {
        let store = store_with(&[("Ngọc Long", Uuid::new_v4(), 0.9)]).await;
        let before = store.aliases_for_chat(ChatId(1)).await.unwrap();
        let r = resolver(store.clone());
        let _ = r.resolve(ChatId(1), "Long").await.unwrap();
        let after = store.aliases_for_chat(ChatId(1)).await.unwrap();
        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].confidence, after[0].confidence);
        assert_eq!(before[0].last_used_at, after[0].last_used_at);
    }

    #[tokio::test]
    async fn referential_stability_without_intervening_writes() {
        let m = Uuid::new_v4();
        let store = store_with(&[("Thịnh", m, 0.7)]).await;
        let r = resolver(store);

        let first = r.resolve(ChatId(1), "Thịnh").await.unwrap();
        let second = r.resolve(ChatId(1), "Thịnh").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn fuzzy_floor_admits_near_miss_spellings() {
        let m = Uuid::new_v4();
        let store = store_with(&[("Long", m, 0.9)]).await;
        let config = ResolverConfig {
            fuzzy_floor: Some(0.9),
            ..ResolverConfig::default()
        };
        let r = Resolver::new(store, config);

        match r.resolve(ChatId(1), "Logn").await.unwrap() {
            Resolution::Resolved { member_id, .. } => assert_eq!(member_id, m),
            other => panic!("fuzzy floor should admit `Logn`, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn binary_scoring_rejects_near_miss_by_default() {
        let store = store_with(&[("Long", Uuid::new_v4(), 0.9)]).await;
        let r = resolver(store);
        assert_eq!(
            r.resolve(ChatId(1), "Logn").await.unwrap(),
            Resolution::Unresolved
        );
    }
}
