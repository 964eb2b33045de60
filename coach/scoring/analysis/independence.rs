use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;

use crate::{
    config::{IndependenceSettings, TimestampFallback},
    error::ScoringWarning,
    model::{Evidence, HintEvent, TopicKey, Turn},
    stage::StageContext,
};

/// Per-key independence plus any timing fallbacks that were needed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndependenceReport {
    /// 0 (not covered), 0.5 (covered after a hint) or 1 (covered unaided).
    pub scores: IndexMap<TopicKey, f32>,
    /// One `TimestampsMissing` per key graded by fallback.
    pub warnings: Vec<ScoringWarning>,
}

/// Grades whether each covered key was reached without recent help.
///
/// Timing is measured against the first evidence turn's own timestamp.
/// Hints that cannot be placed in time go through the configured fallback.
#[must_use]
pub fn score_independence(
    context: &StageContext,
    evidence: &[Evidence],
    transcript: &[Turn],
    hints: &[HintEvent],
    settings: &IndependenceSettings,
) -> IndependenceReport {
    let window = Duration::seconds(settings.hint_window_secs);
    let mut report = IndependenceReport::default();
    for key in context.keys() {
        let first = evidence
            .iter()
            .filter(|item| &item.key == key)
            .min_by_key(|item| item.turn_index);
        let Some(first) = first else {
            report.scores.insert(key.clone(), 0.0);
            continue;
        };
        let turn_time = transcript
            .get(first.turn_index)
            .and_then(|turn| turn.timestamp);

        let (placed, unplaced): (Vec<&HintEvent>, Vec<&HintEvent>) = match turn_time {
            Some(_) => hints.iter().partition(|hint| hint.timestamp.is_some()),
            None => (Vec::new(), hints.iter().collect()),
        };

        let helped_in_window = turn_time
            .is_some_and(|at| placed.iter().any(|hint| within_window(hint, at, window)));
        let score = if helped_in_window {
            0.5
        } else if unplaced.is_empty() {
            1.0
        } else {
            report
                .warnings
                .push(ScoringWarning::TimestampsMissing { key: key.clone() });
            fallback_score(context, key, &unplaced, settings.fallback)
        };
        report.scores.insert(key.clone(), score);
    }
    report
}

fn within_window(hint: &HintEvent, turn_time: DateTime<Utc>, window: Duration) -> bool {
    hint.timestamp.is_some_and(|hinted| {
        let lead = turn_time - hinted;
        lead >= Duration::zero() && lead <= window
    })
}

fn fallback_score(
    context: &StageContext,
    key: &str,
    unplaced: &[&HintEvent],
    fallback: TimestampFallback,
) -> f32 {
    let assisted = match fallback {
        TimestampFallback::AssumeIndependent => false,
        TimestampFallback::AssumeAssisted => true,
        TimestampFallback::CardMatch => {
            let cards = context.cards_for(key);
            unplaced.iter().any(|hint| {
                hint.card_id
                    .as_deref()
                    .is_some_and(|id| cards.iter().any(|card| card.id == id))
            })
        }
    };
    if assisted {
        0.5
    } else {
        1.0
    }
}
