use std::collections::HashSet;

use regex::{Regex, RegexBuilder};

use crate::{
    config::ClassifierSettings,
    error::ScoringError,
    lexical::helper::{jaccard_similarity, normalize, tokenize},
    model::{Evidence, EvidenceKind, Role, TopicKey, Turn},
    stage::StageContext,
};

// A lone document makes the threshold equal its own score; absorb the rounding.
const THRESHOLD_TOLERANCE: f32 = 1e-6;

/// Compiled question-style rules shared by the classifier and the technique analyzer.
#[derive(Debug, Clone)]
pub struct TurnRules {
    closed_opener: Option<Regex>,
    follow_up_phrases: Vec<String>,
    solution_patterns: Vec<Regex>,
    follow_up_similarity: f32,
    early_turns: usize,
    stopwords: HashSet<String>,
}

impl TurnRules {
    /// Compiles the configured word lists and patterns.
    pub fn from_settings(settings: &ClassifierSettings) -> Result<Self, ScoringError> {
        let openers: Vec<String> = settings
            .closed_openers
            .iter()
            .map(|word| word.trim())
            .filter(|word| !word.is_empty())
            .map(regex::escape)
            .collect();
        let closed_opener = if openers.is_empty() {
            None
        } else {
            Some(compile(&format!(r"^\s*(?:{})\b", openers.join("|")))?)
        };
        let solution_patterns = settings
            .solution_patterns
            .iter()
            .map(|pattern| compile(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            closed_opener,
            follow_up_phrases: settings
                .follow_up_phrases
                .iter()
                .map(|phrase| phrase.to_lowercase())
                .collect(),
            solution_patterns,
            follow_up_similarity: settings.follow_up_similarity,
            early_turns: settings.early_turns,
            stopwords: settings
                .stopwords
                .iter()
                .map(|word| normalize(word.trim()))
                .collect(),
        })
    }

    /// Open unless the turn starts with a closed-question auxiliary.
    #[must_use]
    pub fn is_open(&self, text: &str) -> bool {
        self.closed_opener
            .as_ref()
            .map_or(true, |re| !re.is_match(text))
    }

    /// A backward-reference phrase, or high word overlap with the previous stakeholder turn.
    #[must_use]
    pub fn is_follow_up(&self, text: &str, previous_stakeholder: Option<&str>) -> bool {
        let lowered = text.to_lowercase();
        if self
            .follow_up_phrases
            .iter()
            .any(|phrase| lowered.contains(phrase.as_str()))
        {
            return true;
        }
        previous_stakeholder
            .is_some_and(|prev| jaccard_similarity(text, prev) > self.follow_up_similarity)
    }

    /// True when the text proposes a solution.
    #[must_use]
    pub fn proposes_solution(&self, text: &str) -> bool {
        self.solution_patterns.iter().any(|re| re.is_match(text))
    }

    /// How many opening learner turns are checked for solution proposals.
    #[must_use]
    pub const fn early_turns(&self) -> usize {
        self.early_turns
    }

    /// Distinct tokens of `text` that are not stopwords.
    #[must_use]
    pub fn content_terms(&self, text: &str) -> HashSet<String> {
        tokenize(text)
            .into_iter()
            .filter(|token| !self.stopwords.contains(token))
            .collect()
    }
}

fn compile(pattern: &str) -> Result<Regex, ScoringError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|err| ScoringError::InvalidConfig(format!("pattern `{pattern}`: {err}")))
}

/// Best topic key for a piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyMatch {
    /// Winning key.
    pub key: TopicKey,
    /// Its best document score.
    pub score: f32,
    /// Dynamic threshold the score had to reach.
    pub threshold: f32,
}

/// Maps learner turns to topic keys using the stage's per-key indices.
#[derive(Debug, Clone, Copy)]
pub struct TurnClassifier<'a> {
    context: &'a StageContext,
    rules: &'a TurnRules,
    mean_weight: f32,
    max_weight: f32,
    min_content_overlap: usize,
}

impl<'a> TurnClassifier<'a> {
    /// Creates a classifier over one stage context.
    #[must_use]
    pub const fn new(
        context: &'a StageContext,
        rules: &'a TurnRules,
        settings: &ClassifierSettings,
    ) -> Self {
        Self {
            context,
            rules,
            mean_weight: settings.mean_weight,
            max_weight: settings.max_weight,
            min_content_overlap: settings.min_content_overlap,
        }
    }

    /// Finds the key whose documents best match `text`, if it clears the dynamic threshold.
    ///
    /// Only keys sharing at least `min_content_overlap` non-stopword tokens
    /// with the text can win; every key's scores still feed the mean.
    #[must_use]
    pub fn classify_text(&self, text: &str) -> Option<KeyMatch> {
        let terms = self.rules.content_terms(text);
        if terms.len() < self.min_content_overlap {
            return None;
        }
        let mut all_scores: Vec<f32> = Vec::new();
        let mut best: Option<(&TopicKey, f32, f32)> = None;
        for (key, index) in self.context.indices() {
            let Some(scorer) = index.scorer() else {
                continue;
            };
            let scores = scorer.scores(text);
            let Some(key_max) = scores.iter().copied().reduce(f32::max) else {
                continue;
            };
            let relevant = index.shared_terms(&terms) >= self.min_content_overlap;
            if relevant && best.map_or(true, |(_, top, _)| key_max > top) {
                best = Some((key, key_max, index.min_score()));
            }
            all_scores.extend(scores);
        }
        let (key, score, min_score) = best?;
        let mean = all_scores.iter().sum::<f32>() / all_scores.len() as f32;
        let threshold = self.mean_weight * mean + self.max_weight * score;
        (score > min_score && score + THRESHOLD_TOLERANCE >= threshold).then(|| KeyMatch {
            key: key.clone(),
            score,
            threshold,
        })
    }

    /// One evidence record per learner turn that maps to a key, in transcript order.
    #[must_use]
    pub fn classify(&self, transcript: &[Turn]) -> Vec<Evidence> {
        let mut evidence = Vec::new();
        let mut previous_stakeholder: Option<&str> = None;
        for (turn_index, turn) in transcript.iter().enumerate() {
            match turn.role {
                Role::Stakeholder => previous_stakeholder = Some(turn.text.as_str()),
                Role::Learner => {
                    let Some(found) = self.classify_text(&turn.text) else {
                        continue;
                    };
                    let kind = self.evidence_kind(&turn.text, &found.key, previous_stakeholder);
                    evidence.push(Evidence {
                        key: found.key,
                        turn_index,
                        kind,
                    });
                }
            }
        }
        evidence
    }

    fn evidence_kind(
        &self,
        text: &str,
        key: &str,
        previous_stakeholder: Option<&str>,
    ) -> EvidenceKind {
        if self.rules.is_follow_up(text, previous_stakeholder) {
            return EvidenceKind::FollowUp;
        }
        let raised_by_stakeholder = previous_stakeholder
            .and_then(|prev| self.classify_text(prev))
            .is_some_and(|found| found.key == key);
        if raised_by_stakeholder {
            EvidenceKind::StakeholderPrompted
        } else {
            EvidenceKind::DirectQ
        }
    }
}
