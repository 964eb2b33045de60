use indexmap::IndexMap;

use crate::{
    config::CoverageSettings,
    lexical::helper::word_count,
    model::{Evidence, EvidenceKind, Role, TopicKey, Turn},
};

/// Grades each key 0, 0.5 or 1 from its evidence and the stakeholder's answer.
///
/// Asking is not enough: full coverage needs a direct question (or enough
/// follow-ups) that drew a substantive stakeholder answer.
#[must_use]
pub fn score_coverage<'a>(
    keys: impl IntoIterator<Item = &'a TopicKey>,
    evidence: &[Evidence],
    transcript: &[Turn],
    settings: &CoverageSettings,
) -> IndexMap<TopicKey, f32> {
    keys.into_iter()
        .map(|key| {
            let key_evidence: Vec<&Evidence> =
                evidence.iter().filter(|item| &item.key == key).collect();
            (key.clone(), grade_key(&key_evidence, transcript, settings))
        })
        .collect()
}

fn grade_key(evidence: &[&Evidence], transcript: &[Turn], settings: &CoverageSettings) -> f32 {
    let Some(first) = evidence.iter().min_by_key(|item| item.turn_index) else {
        return 0.0;
    };
    let has_direct_q = evidence.iter().any(|item| item.kind == EvidenceKind::DirectQ);
    let follow_ups = evidence
        .iter()
        .filter(|item| item.kind == EvidenceKind::FollowUp)
        .count();
    let response_words = response_words(transcript, first.turn_index);

    if (has_direct_q || follow_ups >= settings.min_follow_ups)
        && response_words >= settings.full_response_words
    {
        1.0
    } else if response_words >= settings.partial_response_words {
        0.5
    } else {
        0.0
    }
}

/// Words in the stakeholder turn directly after `turn_index`; 0 when the next turn is not the stakeholder's.
#[must_use]
pub fn response_words(transcript: &[Turn], turn_index: usize) -> usize {
    transcript
        .get(turn_index + 1)
        .filter(|turn| turn.role == Role::Stakeholder)
        .map_or(0, |turn| word_count(&turn.text))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG_ANSWER: &str = "Honestly the worst part is the approval queue, every request \
        waits for two managers and one of them is usually travelling, so things sit for days.";

    fn keys() -> Vec<TopicKey> {
        vec!["bottlenecks".into(), "budget".into()]
    }

    fn evidence(key: &str, turn_index: usize, kind: EvidenceKind) -> Evidence {
        Evidence {
            key: key.into(),
            turn_index,
            kind,
        }
    }

    #[test]
    fn direct_question_with_long_answer_is_full_coverage() {
        let transcript = vec![
            Turn::learner("Where are the bottlenecks?"),
            Turn::stakeholder(LONG_ANSWER),
        ];
        let scores = score_coverage(
            &keys(),
            &[evidence("bottlenecks", 0, EvidenceKind::DirectQ)],
            &transcript,
            &CoverageSettings::default(),
        );
        assert_eq!(scores["bottlenecks"], 1.0);
        assert_eq!(scores["budget"], 0.0);
        assert_eq!(scores.len(), 2);
    }

    #[test]
    fn shallow_answer_is_partial() {
        let transcript = vec![
            Turn::learner("Where are the bottlenecks?"),
            Turn::stakeholder("Approvals, mostly, I think, to be honest."),
        ];
        let scores = score_coverage(
            &keys(),
            &[evidence("bottlenecks", 0, EvidenceKind::DirectQ)],
            &transcript,
            &CoverageSettings::default(),
        );
        assert_eq!(scores["bottlenecks"], 0.5);
    }

    #[test]
    fn single_follow_up_caps_at_partial() {
        let transcript = vec![
            Turn::stakeholder("We have a few bottlenecks."),
            Turn::learner("You mentioned bottlenecks, which ones?"),
            Turn::stakeholder(LONG_ANSWER),
            Turn::learner("Tell me more about the bottlenecks in approvals."),
        ];
        let single = [evidence("bottlenecks", 1, EvidenceKind::FollowUp)];
        let scores = score_coverage(&keys(), &single, &transcript, &CoverageSettings::default());
        assert_eq!(scores["bottlenecks"], 0.5);

        let double = [
            evidence("bottlenecks", 1, EvidenceKind::FollowUp),
            evidence("bottlenecks", 3, EvidenceKind::FollowUp),
        ];
        let scores = score_coverage(&keys(), &double, &transcript, &CoverageSettings::default());
        assert_eq!(scores["bottlenecks"], 1.0);
    }

    #[test]
    fn back_to_back_learner_turns_have_no_response() {
        let transcript = vec![
            Turn::learner("Where are the bottlenecks?"),
            Turn::learner("Sorry, I mean in invoicing."),
        ];
        assert_eq!(response_words(&transcript, 0), 0);
        assert_eq!(response_words(&transcript, 1), 0);
    }
}
