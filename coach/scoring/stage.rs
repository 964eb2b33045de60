use std::{
    collections::{hash_map::DefaultHasher, HashMap, HashSet},
    hash::{Hash, Hasher},
    sync::Arc,
};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::{
    config::ScoringConfig,
    error::ScoringWarning,
    lexical::{
        tokenize, Bm25Strategy, CardAssignment, DocumentScorer, KeyAssigner, SimilarityStrategy,
    },
    model::{PromptCard, StageDefinition, TopicKey},
};

/// Cards and search index for one topic key.
#[derive(Debug)]
pub struct KeyIndex {
    cards: Vec<PromptCard>,
    scorer: Option<Box<dyn DocumentScorer>>,
    min_score: f32,
    vocabulary: HashSet<String>,
}

impl KeyIndex {
    /// Cards assigned to the key, in input order.
    #[must_use]
    pub fn cards(&self) -> &[PromptCard] {
        &self.cards
    }

    /// The key's scorer. `None` when no card was assigned.
    #[must_use]
    pub fn scorer(&self) -> Option<&dyn DocumentScorer> {
        self.scorer.as_deref()
    }

    /// A best score must be strictly above this to classify a turn.
    #[must_use]
    pub const fn min_score(&self) -> f32 {
        self.min_score
    }

    /// How many of `terms` occur somewhere in the key's cards.
    #[must_use]
    pub fn shared_terms(&self, terms: &HashSet<String>) -> usize {
        terms
            .iter()
            .filter(|term| self.vocabulary.contains(term.as_str()))
            .count()
    }
}

/// Immutable per-stage state: card assignment plus one index per topic key.
///
/// Built fresh for each scoring call, or shared read-only through
/// [`StageIndexCache`]. Nothing mutates a context once built.
#[derive(Debug)]
pub struct StageContext {
    stage_id: String,
    indices: IndexMap<TopicKey, KeyIndex>,
    assignments: Vec<CardAssignment>,
    strategy: &'static str,
    warnings: Vec<ScoringWarning>,
}

impl StageContext {
    /// Assigns the stage's cards to its keys and indexes each key.
    ///
    /// Cards from other stages are skipped. When `strategy` cannot index a
    /// key, BM25 is used for that key instead.
    #[must_use]
    pub fn build(
        stage: &StageDefinition,
        cards: &[PromptCard],
        strategy: &dyn SimilarityStrategy,
        config: &ScoringConfig,
    ) -> Self {
        let mut warnings = Vec::new();
        if stage.must_cover.is_empty() {
            warnings.push(ScoringWarning::NoTopicKeys);
        }
        let owned: Vec<PromptCard> = cards
            .iter()
            .filter(|card| {
                let own = card.stage_id == stage.id;
                if !own {
                    warnings.push(ScoringWarning::ForeignCard {
                        card_id: card.id.clone(),
                        stage_id: card.stage_id.clone(),
                    });
                }
                own
            })
            .cloned()
            .collect();
        let assignments = KeyAssigner::from(&config.assignment).assign(&stage.must_cover, &owned);
        for assignment in assignments.iter().filter(|a| a.is_ambiguous()) {
            let mut keys = Vec::with_capacity(assignment.tied_with.len() + 1);
            keys.extend(assignment.key.clone());
            keys.extend(assignment.tied_with.iter().cloned());
            warnings.push(ScoringWarning::AmbiguousAssignment {
                card_id: assignment.card_id.clone(),
                keys,
            });
        }

        let fallback = Bm25Strategy::new((&config.index).into());
        let mut embedding_failed = false;
        let mut indices = IndexMap::with_capacity(stage.must_cover.len());
        for key in &stage.must_cover {
            let key_cards: Vec<PromptCard> = owned
                .iter()
                .zip(&assignments)
                .filter(|(_, a)| a.key.as_ref() == Some(key))
                .map(|(card, _)| card.clone())
                .collect();
            if key_cards.is_empty() {
                warnings.push(ScoringWarning::UnindexedKey { key: key.clone() });
                indices.insert(
                    key.clone(),
                    KeyIndex {
                        cards: key_cards,
                        scorer: None,
                        min_score: strategy.min_score(),
                        vocabulary: HashSet::new(),
                    },
                );
                continue;
            }
            let documents: Vec<String> = key_cards.iter().map(|c| c.text.clone()).collect();
            let vocabulary: HashSet<String> = documents.iter().flat_map(|doc| tokenize(doc)).collect();
            let (scorer, min_score) = match strategy.index(&documents) {
                Ok(scorer) => (Some(scorer), strategy.min_score()),
                Err(err) => {
                    if !embedding_failed {
                        embedding_failed = true;
                        warnings.push(ScoringWarning::EmbeddingUnavailable {
                            reason: err.to_string(),
                        });
                    }
                    (fallback.index(&documents).ok(), fallback.min_score())
                }
            };
            indices.insert(
                key.clone(),
                KeyIndex {
                    cards: key_cards,
                    scorer,
                    min_score,
                    vocabulary,
                },
            );
        }

        Self {
            stage_id: stage.id.clone(),
            indices,
            assignments,
            strategy: strategy.label(),
            warnings,
        }
    }

    /// Stage id.
    #[must_use]
    pub fn stage_id(&self) -> &str {
        &self.stage_id
    }

    /// Declared topic keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &TopicKey> {
        self.indices.keys()
    }

    /// Number of declared keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.indices.len()
    }

    /// Index entries in declaration order.
    pub fn indices(&self) -> impl Iterator<Item = (&TopicKey, &KeyIndex)> {
        self.indices.iter()
    }

    /// Cards assigned to `key`; empty for unknown keys.
    #[must_use]
    pub fn cards_for(&self, key: &str) -> &[PromptCard] {
        self.indices
            .get(key)
            .map(KeyIndex::cards)
            .unwrap_or_default()
    }

    /// True when `key` has at least one assigned card.
    #[must_use]
    pub fn is_indexed(&self, key: &str) -> bool {
        self.indices
            .get(key)
            .is_some_and(|index| index.scorer.is_some())
    }

    /// Assignment of every own-stage card, for authoring review.
    #[must_use]
    pub fn assignment_report(&self) -> &[CardAssignment] {
        &self.assignments
    }

    /// Label of the strategy the context was built with.
    #[must_use]
    pub const fn strategy(&self) -> &'static str {
        self.strategy
    }

    /// Configuration warnings found while building.
    #[must_use]
    pub fn warnings(&self) -> &[ScoringWarning] {
        &self.warnings
    }
}

/// Read-mostly cache of built stage contexts.
///
/// Holds one context per stage id and strategy. Each entry carries a
/// fingerprint of the keys and cards; a mismatch rebuilds and replaces the
/// entry, so edited stages never leave stale contexts behind.
#[derive(Debug, Default)]
pub struct StageIndexCache {
    entries: RwLock<HashMap<(String, &'static str), CachedStage>>,
}

#[derive(Debug)]
struct CachedStage {
    fingerprint: u64,
    context: Arc<StageContext>,
}

impl StageIndexCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached context or builds and stores one.
    ///
    /// Two racing builders may both build; the first insert wins and both
    /// callers receive the same `Arc`.
    pub fn get_or_build(
        &self,
        stage: &StageDefinition,
        cards: &[PromptCard],
        strategy: &dyn SimilarityStrategy,
        build: impl FnOnce() -> StageContext,
    ) -> Arc<StageContext> {
        let slot = (stage.id.clone(), strategy.label());
        let fingerprint = fingerprint(stage, cards);
        if let Some(hit) = self.entries.read().get(&slot) {
            if hit.fingerprint == fingerprint {
                return Arc::clone(&hit.context);
            }
        }
        let built = Arc::new(build());
        let mut entries = self.entries.write();
        if let Some(raced) = entries.get(&slot).filter(|raced| raced.fingerprint == fingerprint) {
            return Arc::clone(&raced.context);
        }
        entries.insert(
            slot,
            CachedStage {
                fingerprint,
                context: Arc::clone(&built),
            },
        );
        built
    }

    /// Number of cached stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

fn fingerprint(stage: &StageDefinition, cards: &[PromptCard]) -> u64 {
    let mut hasher = DefaultHasher::new();
    stage.must_cover.hash(&mut hasher);
    for card in cards {
        card.id.hash(&mut hasher);
        card.stage_id.hash(&mut hasher);
        card.text.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::{EmbeddingStrategy, Embedder};
    use anyhow::{bail, Result};

    #[derive(Debug)]
    struct OfflineEmbedder;

    impl Embedder for OfflineEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            bail!("model not loaded")
        }
    }

    fn stage() -> StageDefinition {
        StageDefinition::new("discovery", ["bottlenecks", "budget"])
    }

    fn cards() -> Vec<PromptCard> {
        vec![
            PromptCard::new("c1", "discovery", "probe", "Where are the bottlenecks today?"),
            PromptCard::new("c2", "discovery", "probe", "Which bottlenecks hurt the most?"),
            PromptCard::new("x1", "kickoff", "probe", "What budget do you have?"),
        ]
    }

    #[test]
    fn builds_indices_and_reports_gaps() {
        let config = ScoringConfig::default();
        let context = StageContext::build(&stage(), &cards(), &Bm25Strategy::default(), &config);
        assert_eq!(context.cards_for("bottlenecks").len(), 2);
        assert!(context.is_indexed("bottlenecks"));
        assert!(!context.is_indexed("budget"));
        assert_eq!(
            context.warnings(),
            &[
                ScoringWarning::ForeignCard {
                    card_id: "x1".into(),
                    stage_id: "kickoff".into(),
                },
                ScoringWarning::UnindexedKey {
                    key: "budget".into(),
                },
            ]
        );
        assert_eq!(context.assignment_report().len(), 2);
        assert_eq!(context.strategy(), "bm25");

        let (_, index) = context.indices().next().unwrap();
        let terms: HashSet<String> = ["bottlenecks", "hurt", "budget"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(index.shared_terms(&terms), 2);
    }

    #[test]
    fn failing_strategy_falls_back_to_bm25() {
        let config = ScoringConfig::default();
        let strategy = EmbeddingStrategy::new(Arc::new(OfflineEmbedder), 0.32);
        let context = StageContext::build(&stage(), &cards(), &strategy, &config);
        let (_, index) = context.indices().next().unwrap();
        assert!(index.scorer().is_some());
        assert_eq!(index.min_score(), 0.0);
        assert!(context
            .warnings()
            .iter()
            .any(|w| matches!(w, ScoringWarning::EmbeddingUnavailable { .. })));
    }

    #[test]
    fn cache_reuses_contexts_until_cards_change() {
        let config = ScoringConfig::default();
        let strategy = Bm25Strategy::default();
        let cache = StageIndexCache::new();
        let stage = stage();
        let mut cards = cards();
        let build = |cards: &[PromptCard]| StageContext::build(&stage, cards, &strategy, &config);

        let first = cache.get_or_build(&stage, &cards, &strategy, || build(&cards));
        let second = cache.get_or_build(&stage, &cards, &strategy, || build(&cards));
        assert!(Arc::ptr_eq(&first, &second));

        cards[0].text = "Where does the budget get stuck?".into();
        let third = cache.get_or_build(&stage, &cards, &strategy, || build(&cards));
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.cards_for("budget").len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn edited_stages_replace_their_cached_context() {
        let config = ScoringConfig::default();
        let strategy = Bm25Strategy::default();
        let cache = StageIndexCache::new();
        let stage = stage();
        let mut cards = cards();

        for revision in 0..5 {
            cards[1].text = format!("Which bottlenecks hurt the most, take {revision}?");
            cache.get_or_build(&stage, &cards, &strategy, || {
                StageContext::build(&stage, &cards, &strategy, &config)
            });
        }
        assert_eq!(cache.len(), 1);

        let kickoff = StageDefinition::new("kickoff", ["budget"]);
        cache.get_or_build(&kickoff, &cards, &strategy, || {
            StageContext::build(&kickoff, &cards, &strategy, &config)
        });
        assert_eq!(cache.len(), 2);
    }
}
