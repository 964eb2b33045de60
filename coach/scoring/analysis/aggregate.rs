use std::collections::HashSet;

use indexmap::IndexMap;

use crate::{
    config::AggregateSettings,
    lexical::helper::humanize_key,
    model::{HintEvent, PromptCard, TechniqueMetrics, TopicKey},
    stage::StageContext,
};

const TIP_EARLY_SOLUTION: &str = "Hold off on proposing solutions until you understand how the \
    work happens today and where it hurts.";
const TIP_OPEN_QUESTIONS: &str = "Open more questions with what, how or why so the stakeholder \
    can answer in their own words.";
const TIP_FOLLOW_UP: &str = "Build on what the stakeholder just said, e.g. \"You mentioned ... \
    can you expand on that?\"";
const TIP_TALK_BALANCE: &str = "Let the stakeholder do more of the talking; aim for about half \
    of the conversation.";

/// Overall verdict for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Weighted score in [0, 1].
    pub overall: f32,
    /// `overall >= pass_threshold`.
    pub passed: bool,
    /// Keys with coverage of at least 0.5.
    pub covered: Vec<TopicKey>,
    /// Remaining keys.
    pub missed: Vec<TopicKey>,
    /// Remediation lines, capped at `max_scripts`.
    pub scripts: Vec<String>,
}

/// Technique composite: weighted ratios minus the early-solutioning penalty, floored at 0.
#[must_use]
pub fn technique_composite(metrics: &TechniqueMetrics, settings: &AggregateSettings) -> f32 {
    let mut composite = settings.open_weight * metrics.open_ratio
        + settings.follow_up_weight * metrics.follow_up
        + settings.balance_weight * metrics.talk_balance;
    if metrics.early_solutioning {
        composite -= settings.early_solution_penalty;
    }
    composite.clamp(0.0, 1.0)
}

/// Combines coverage, independence and technique into the final verdict.
#[must_use]
pub fn aggregate(
    context: &StageContext,
    coverage: &IndexMap<TopicKey, f32>,
    independence: &IndexMap<TopicKey, f32>,
    technique: &TechniqueMetrics,
    hints: &[HintEvent],
    pass_threshold: f32,
    settings: &AggregateSettings,
) -> Verdict {
    let overall = (settings.coverage_weight * mean(coverage)
        + settings.independence_weight * mean(independence)
        + settings.technique_weight * technique_composite(technique, settings))
    .clamp(0.0, 1.0);
    let (covered, missed): (Vec<_>, Vec<_>) = coverage
        .iter()
        .partition(|(_, &score)| score >= 0.5);
    Verdict {
        overall,
        passed: overall >= pass_threshold,
        covered: covered.into_iter().map(|(key, _)| key.clone()).collect(),
        missed: missed.into_iter().map(|(key, _)| key.clone()).collect(),
        scripts: remediation_scripts(context, coverage, technique, hints, settings),
    }
}

/// Suggested questions for the weakest keys, then technique tips.
///
/// Keys below full coverage are taken lowest first; each gets one card,
/// preferring cards the learner was never hinted.
#[must_use]
pub fn remediation_scripts(
    context: &StageContext,
    coverage: &IndexMap<TopicKey, f32>,
    technique: &TechniqueMetrics,
    hints: &[HintEvent],
    settings: &AggregateSettings,
) -> Vec<String> {
    let hinted: HashSet<&str> = hints.iter().filter_map(|h| h.card_id.as_deref()).collect();

    let mut weakest: Vec<(&TopicKey, f32)> = coverage
        .iter()
        .filter(|(_, &score)| score < 1.0)
        .map(|(key, &score)| (key, score))
        .collect();
    // stable: declaration order breaks ties
    weakest.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut scripts: Vec<String> = weakest
        .into_iter()
        .filter_map(|(key, _)| {
            suggested_card(context.cards_for(key), &hinted)
                .map(|card| format!("For {}: \"{}\"", humanize_key(key), card.text))
        })
        .take(settings.max_key_scripts)
        .collect();

    if technique.early_solutioning {
        scripts.push(TIP_EARLY_SOLUTION.to_string());
    }
    if technique.open_ratio < settings.tip_open_ratio {
        scripts.push(TIP_OPEN_QUESTIONS.to_string());
    }
    if technique.follow_up < settings.tip_follow_up {
        scripts.push(TIP_FOLLOW_UP.to_string());
    }
    if technique.talk_balance < settings.tip_talk_balance {
        scripts.push(TIP_TALK_BALANCE.to_string());
    }
    scripts.truncate(settings.max_scripts);
    scripts
}

fn suggested_card<'c>(cards: &'c [PromptCard], hinted: &HashSet<&str>) -> Option<&'c PromptCard> {
    cards
        .iter()
        .find(|card| !hinted.contains(card.id.as_str()))
        .or_else(|| cards.first())
}

fn mean(scores: &IndexMap<TopicKey, f32>) -> f32 {
    if scores.is_empty() {
        0.0
    } else {
        scores.values().sum::<f32>() / scores.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ScoringConfig,
        lexical::Bm25Strategy,
        model::{HintEventType, StageDefinition},
    };

    fn context() -> StageContext {
        StageContext::build(
            &StageDefinition::new("discovery", ["bottlenecks", "budget", "current_tools"]),
            &[
                PromptCard::new("c1", "discovery", "probe", "Where are the bottlenecks today?"),
                PromptCard::new("c2", "discovery", "probe", "Which bottlenecks cost the most?"),
                PromptCard::new("c3", "discovery", "probe", "What budget is set aside?"),
                PromptCard::new("c4", "discovery", "probe", "Which current tools do you use?"),
            ],
            &Bm25Strategy::default(),
            &ScoringConfig::default(),
        )
    }

    fn scores(values: &[(&str, f32)]) -> IndexMap<TopicKey, f32> {
        values.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    fn strong_technique() -> TechniqueMetrics {
        TechniqueMetrics {
            open_ratio: 1.0,
            follow_up: 0.5,
            talk_balance: 0.9,
            early_solutioning: false,
        }
    }

    #[test]
    fn composite_applies_penalty_and_floor() {
        let settings = AggregateSettings::default();
        let good = strong_technique();
        assert!((technique_composite(&good, &settings) - (0.4 + 0.15 + 0.27)).abs() < 1e-6);
        let rushed = TechniqueMetrics {
            open_ratio: 0.25,
            follow_up: 0.0,
            talk_balance: 0.0,
            early_solutioning: true,
        };
        assert_eq!(technique_composite(&rushed, &settings), 0.0);
    }

    #[test]
    fn overall_is_weighted_and_threshold_decides_pass() {
        let context = context();
        let coverage = scores(&[("bottlenecks", 1.0), ("budget", 1.0), ("current_tools", 0.5)]);
        let independence =
            scores(&[("bottlenecks", 1.0), ("budget", 0.5), ("current_tools", 0.5)]);
        let settings = AggregateSettings::default();
        let verdict = aggregate(
            &context,
            &coverage,
            &independence,
            &strong_technique(),
            &[],
            0.65,
            &settings,
        );
        let expected = 0.6 * (2.5 / 3.0) + 0.2 * (2.0 / 3.0) + 0.2 * 0.82;
        assert!((verdict.overall - expected).abs() < 1e-5);
        assert!(verdict.passed);
        assert_eq!(verdict.covered.len(), 3);
        assert!(verdict.missed.is_empty());

        let strict = aggregate(
            &context,
            &coverage,
            &independence,
            &strong_technique(),
            &[],
            0.9,
            &settings,
        );
        assert!(!strict.passed);
    }

    #[test]
    fn scripts_prefer_unhinted_cards_for_weakest_keys() {
        let context = context();
        let coverage = scores(&[("bottlenecks", 0.5), ("budget", 1.0), ("current_tools", 0.0)]);
        let hints = [HintEvent::new(Some("c1"), HintEventType::Shown, None)];
        let scripts = remediation_scripts(
            &context,
            &coverage,
            &strong_technique(),
            &hints,
            &AggregateSettings::default(),
        );
        assert_eq!(
            scripts,
            vec![
                "For current tools: \"Which current tools do you use?\"".to_string(),
                "For bottlenecks: \"Which bottlenecks cost the most?\"".to_string(),
            ]
        );
    }

    #[test]
    fn falls_back_to_hinted_card_and_caps_list() {
        let context = context();
        let coverage = scores(&[("bottlenecks", 0.0), ("budget", 0.0), ("current_tools", 0.0)]);
        let hints = [
            HintEvent::new(Some("c3"), HintEventType::Clicked, None),
            HintEvent::new(Some("c4"), HintEventType::Edited, None),
        ];
        let weak = TechniqueMetrics {
            open_ratio: 0.0,
            follow_up: 0.0,
            talk_balance: 0.0,
            early_solutioning: true,
        };
        let scripts = remediation_scripts(
            &context,
            &coverage,
            &weak,
            &hints,
            &AggregateSettings::default(),
        );
        assert_eq!(scripts.len(), 5);
        assert_eq!(scripts[1], "For budget: \"What budget is set aside?\"");
        assert_eq!(scripts[3], TIP_EARLY_SOLUTION);
    }
}
