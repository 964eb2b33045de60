use crate::{
    analysis::classify::TurnRules,
    lexical::helper::word_count,
    model::{Role, TechniqueMetrics, Turn},
};

/// Question style and talk balance, independent of topic coverage.
#[must_use]
pub fn analyze_technique(transcript: &[Turn], rules: &TurnRules) -> TechniqueMetrics {
    let mut learner_turns = 0_usize;
    let mut open = 0_usize;
    let mut follow_ups = 0_usize;
    let mut learner_words = 0_usize;
    let mut stakeholder_words = 0_usize;
    let mut early_solutioning = false;
    let mut previous_stakeholder: Option<&str> = None;

    for turn in transcript {
        match turn.role {
            Role::Stakeholder => {
                stakeholder_words += word_count(&turn.text);
                previous_stakeholder = Some(turn.text.as_str());
            }
            Role::Learner => {
                learner_words += word_count(&turn.text);
                if rules.is_open(&turn.text) {
                    open += 1;
                }
                if rules.is_follow_up(&turn.text, previous_stakeholder) {
                    follow_ups += 1;
                }
                if learner_turns < rules.early_turns() && rules.proposes_solution(&turn.text) {
                    early_solutioning = true;
                }
                learner_turns += 1;
            }
        }
    }

    TechniqueMetrics {
        open_ratio: ratio(open, learner_turns),
        follow_up: ratio(follow_ups, learner_turns),
        talk_balance: talk_balance(learner_words, stakeholder_words),
        early_solutioning,
    }
}

/// 1.0 when the stakeholder spoke half the words, falling linearly to 0 at either extreme.
#[must_use]
pub fn talk_balance(learner_words: usize, stakeholder_words: usize) -> f32 {
    let total = learner_words + stakeholder_words;
    if total == 0 {
        return 0.0;
    }
    let balance = stakeholder_words as f32 / total as f32;
    (1.0 - (balance - 0.5).abs() / 0.5).clamp(0.0, 1.0)
}

fn ratio(part: usize, whole: usize) -> f32 {
    if whole == 0 {
        0.0
    } else {
        part as f32 / whole as f32
    }
}
