use serde::{Deserialize, Serialize};

use crate::{
    config::AssignmentSettings,
    lexical::{
        bm25::term_overlap_score,
        helper::{humanize_key, tokenize},
    },
    model::{PromptCard, TopicKey},
};

/// Where one prompt card ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardAssignment {
    /// Card id.
    pub card_id: String,
    /// Winning key, if the card cleared the acceptance threshold.
    pub key: Option<TopicKey>,
    /// Winning score.
    pub score: f32,
    /// Other keys that scored exactly as high as the winner.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tied_with: Vec<TopicKey>,
}

impl CardAssignment {
    /// True when the winner was picked from a tie.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        self.key.is_some() && !self.tied_with.is_empty()
    }
}

/// Distributes cards across topic keys by term overlap with the key names.
#[derive(Debug, Clone)]
pub struct KeyAssigner {
    min_score: f32,
    saturation: f32,
}

impl KeyAssigner {
    /// Creates an assigner.
    #[must_use]
    pub const fn new(min_score: f32, saturation: f32) -> Self {
        Self {
            min_score,
            saturation,
        }
    }

    /// Assigns every card to at most one key. Ties go to the earliest declared key.
    #[must_use]
    pub fn assign(&self, keys: &[TopicKey], cards: &[PromptCard]) -> Vec<CardAssignment> {
        let key_tokens: Vec<Vec<String>> =
            keys.iter().map(|key| tokenize(&humanize_key(key))).collect();
        cards
            .iter()
            .map(|card| {
                let card_tokens = tokenize(&card.text);
                let scores: Vec<f32> = key_tokens
                    .iter()
                    .map(|query| term_overlap_score(query, &card_tokens, self.saturation))
                    .collect();
                self.pick(keys, card, &scores)
            })
            .collect()
    }

    fn pick(&self, keys: &[TopicKey], card: &PromptCard, scores: &[f32]) -> CardAssignment {
        let mut best: Option<(usize, f32)> = None;
        for (idx, &score) in scores.iter().enumerate() {
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((idx, score));
            }
        }
        match best {
            Some((idx, score)) if score > self.min_score => CardAssignment {
                card_id: card.id.clone(),
                key: Some(keys[idx].clone()),
                score,
                tied_with: scores
                    .iter()
                    .enumerate()
                    .filter(|&(other, &s)| other != idx && s == score)
                    .map(|(other, _)| keys[other].clone())
                    .collect(),
            },
            other => CardAssignment {
                card_id: card.id.clone(),
                key: None,
                score: other.map_or(0.0, |(_, score)| score),
                tied_with: Vec::new(),
            },
        }
    }
}

impl From<&AssignmentSettings> for KeyAssigner {
    fn from(settings: &AssignmentSettings) -> Self {
        Self::new(settings.min_score, settings.saturation)
    }
}

impl Default for KeyAssigner {
    fn default() -> Self {
        Self::from(&AssignmentSettings::default())
    }
}
