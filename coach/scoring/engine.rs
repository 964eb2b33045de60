use std::{collections::HashSet, sync::Arc};

use serde_json::{json, Value};
use shared_logging::LogLevel;

use crate::{
    analysis::{
        aggregate, analyze_technique, score_coverage, score_independence, TurnClassifier,
        TurnRules,
    },
    config::ScoringConfig,
    error::{ScoringError, ScoringWarning},
    lexical::{Bm25Strategy, SimilarityStrategy},
    model::{PromptCard, ScoringInput, ScoringOutput, StageDefinition},
    stage::{StageContext, StageIndexCache},
    telemetry::ScoringTelemetry,
};

/// Scores completed practice interviews.
///
/// A scorer holds only configuration and read-only collaborators; every call
/// builds (or borrows from the cache) an immutable [`StageContext`], so one
/// scorer can serve concurrent sessions.
#[derive(Debug, Clone)]
pub struct MeetingScorer {
    config: ScoringConfig,
    rules: TurnRules,
    strategy: Arc<dyn SimilarityStrategy>,
    cache: Option<Arc<StageIndexCache>>,
    telemetry: Option<ScoringTelemetry>,
}

impl MeetingScorer {
    /// Validates the configuration and compiles the turn rules.
    pub fn new(config: ScoringConfig) -> Result<Self, ScoringError> {
        config
            .validate()
            .map_err(|err| ScoringError::InvalidConfig(format!("{err:#}")))?;
        let rules = TurnRules::from_settings(&config.classifier)?;
        let strategy: Arc<dyn SimilarityStrategy> =
            Arc::new(Bm25Strategy::new((&config.index).into()));
        Ok(Self {
            config,
            rules,
            strategy,
            cache: None,
            telemetry: None,
        })
    }

    /// Replaces the default BM25 similarity.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn SimilarityStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Reuses stage contexts across calls through a shared cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<StageIndexCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: ScoringTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Label of the active similarity strategy.
    #[must_use]
    pub fn strategy_label(&self) -> &'static str {
        self.strategy.label()
    }

    /// Builds the stage context, or fetches it from the cache when one is attached.
    pub fn stage_context(&self, stage: &StageDefinition, cards: &[PromptCard]) -> Arc<StageContext> {
        let build = || {
            let context = StageContext::build(stage, cards, self.strategy.as_ref(), &self.config);
            self.log(
                LogLevel::Debug,
                "scoring.stage.indexed",
                json!({
                    "stage_id": stage.id,
                    "keys": context.key_count(),
                    "cards": cards.len(),
                    "strategy": context.strategy(),
                }),
            );
            context
        };
        match &self.cache {
            Some(cache) => cache.get_or_build(stage, cards, self.strategy.as_ref(), build),
            None => Arc::new(build()),
        }
    }

    /// Scores one session.
    pub fn score(&self, input: &ScoringInput) -> Result<ScoringOutput, ScoringError> {
        self.score_session(None, input)
    }

    /// Scores one session, tagging logs and the `meeting.scored` event with `session_id`.
    ///
    /// Fails only on caller contract violations; everything else degrades to
    /// floor scores with a warning in the output.
    pub fn score_session(
        &self,
        session_id: Option<&str>,
        input: &ScoringInput,
    ) -> Result<ScoringOutput, ScoringError> {
        let stage = validate_stage(input)?;
        let pass_threshold = input
            .pass_threshold
            .unwrap_or(self.config.aggregate.pass_threshold);
        if !(0.0..=1.0).contains(&pass_threshold) {
            return Err(ScoringError::InvalidPassThreshold(pass_threshold));
        }

        let context = self.stage_context(stage, &input.cards);
        let mut warnings = context.warnings().to_vec();
        if input.transcript.is_empty() {
            warnings.push(ScoringWarning::EmptyTranscript);
        }

        let evidence = TurnClassifier::new(&context, &self.rules, &self.config.classifier)
            .classify(&input.transcript);
        let coverage = score_coverage(
            context.keys(),
            &evidence,
            &input.transcript,
            &self.config.coverage,
        );
        let technique = analyze_technique(&input.transcript, &self.rules);
        let independence = score_independence(
            &context,
            &evidence,
            &input.transcript,
            &input.hint_events,
            &self.config.independence,
        );
        warnings.extend(independence.warnings);
        let verdict = aggregate(
            &context,
            &coverage,
            &independence.scores,
            &technique,
            &input.hint_events,
            pass_threshold,
            &self.config.aggregate,
        );

        let output = ScoringOutput {
            stage_id: stage.id.clone(),
            coverage_scores: coverage,
            independence: independence.scores,
            technique,
            overall: verdict.overall,
            passed: verdict.passed,
            covered_areas: verdict.covered,
            missed_areas: verdict.missed,
            next_time_scripts: verdict.scripts,
            evidence,
            warnings,
        };
        self.report(session_id, &output);
        Ok(output)
    }

    fn report(&self, session_id: Option<&str>, output: &ScoringOutput) {
        let Some(telemetry) = &self.telemetry else {
            return;
        };
        for warning in &output.warnings {
            let message = match warning {
                ScoringWarning::AmbiguousAssignment { .. } => "scoring.assignment.ambiguous",
                _ => "scoring.warning",
            };
            let _ = telemetry.log(
                LogLevel::Warn,
                message,
                json!({
                    "session_id": session_id,
                    "stage_id": output.stage_id,
                    "kind": warning.kind(),
                    "detail": warning.to_string(),
                }),
            );
        }
        let _ = telemetry.log(
            LogLevel::Info,
            "scoring.completed",
            json!({
                "session_id": session_id,
                "stage_id": output.stage_id,
                "overall": output.overall,
                "passed": output.passed,
                "evidence": output.evidence.len(),
                "scripts": output.next_time_scripts.len(),
            }),
        );
        let _ = telemetry.event(SCORED_EVENT, scored_event(session_id, output));
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(level, message, metadata);
        }
    }
}

/// Event type announced after every successful scoring call.
pub const SCORED_EVENT: &str = "meeting.scored";

/// Payload of the [`SCORED_EVENT`] event; `session_id` is omitted when unknown.
#[must_use]
pub fn scored_event(session_id: Option<&str>, output: &ScoringOutput) -> Value {
    let mut payload = json!({
        "stage_id": output.stage_id,
        "overall": output.overall,
        "passed": output.passed,
        "covered": output.covered_areas,
        "missed": output.missed_areas,
    });
    if let (Some(id), Value::Object(fields)) = (session_id, &mut payload) {
        fields.insert("session_id".into(), Value::from(id));
    }
    payload
}

fn validate_stage(input: &ScoringInput) -> Result<&StageDefinition, ScoringError> {
    let stage = input.stage.as_ref().ok_or(ScoringError::MissingStage)?;
    if stage.id.trim().is_empty() {
        return Err(ScoringError::EmptyStageId);
    }
    let mut seen = HashSet::with_capacity(stage.must_cover.len());
    if let Some(duplicate) = stage.must_cover.iter().find(|key| !seen.insert(key.as_str())) {
        return Err(ScoringError::DuplicateTopicKey(duplicate.clone()));
    }
    Ok(stage)
}

/// Scores one session with the default configuration and BM25 similarity.
pub fn score_meeting(input: &ScoringInput) -> Result<ScoringOutput, ScoringError> {
    MeetingScorer::new(ScoringConfig::default())?.score(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lexical::{Embedder, EmbeddingStrategy, HashingEmbedder},
        model::{HintEvent, HintEventType, Turn},
    };
    use chrono::{DateTime, TimeZone, Utc};
    use shared_event_bus::MemoryEventBus;
    use shared_logging::read_records;
    use tempfile::tempdir;

    const BOTTLENECK_CARD: &str = "Where are the bottlenecks in this process?";
    const BUDGET_CARD: &str = "What budget is available for this?";
    const LONG_ANSWER: &str = "Honestly the slowest part comes from the approval queue because \
        every request waits on two managers and one of them travels constantly so requests sit \
        there several days";
    const BUDGET_ANSWER: &str = "We have roughly fifty thousand set aside this year but most of \
        it is already committed to the new billing system rollout";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn bottleneck_stage() -> ScoringInput {
        ScoringInput::new(StageDefinition::new("discovery", ["bottlenecks"])).with_cards(vec![
            PromptCard::new("c1", "discovery", "probe", BOTTLENECK_CARD),
        ])
    }

    fn two_key_stage() -> ScoringInput {
        ScoringInput::new(StageDefinition::new("discovery", ["bottlenecks", "budget"]))
            .with_cards(vec![
                PromptCard::new("c1", "discovery", "probe", BOTTLENECK_CARD),
                PromptCard::new("c2", "discovery", "probe", BUDGET_CARD),
            ])
    }

    fn good_session() -> ScoringInput {
        two_key_stage().with_transcript(vec![
            Turn::learner(BOTTLENECK_CARD),
            Turn::stakeholder(LONG_ANSWER),
            Turn::learner(BUDGET_CARD),
            Turn::stakeholder("Around fifty thousand for the year, I believe."),
        ])
    }

    fn scorer() -> MeetingScorer {
        MeetingScorer::new(ScoringConfig::default()).unwrap()
    }

    fn assert_bounded(output: &ScoringOutput) {
        for score in output.coverage_scores.values().chain(output.independence.values()) {
            assert!([0.0, 0.5, 1.0].contains(score), "unexpected grade {score}");
        }
        let t = &output.technique;
        for ratio in [t.open_ratio, t.follow_up, t.talk_balance] {
            assert!((0.0..=1.0).contains(&ratio));
        }
        assert!((0.0..=1.0).contains(&output.overall));
        for item in &output.evidence {
            assert!(output.coverage_scores.contains_key(&item.key));
        }
    }

    #[test]
    fn exact_card_question_with_long_answer_is_covered() {
        let input = bottleneck_stage().with_transcript(vec![
            Turn::learner(BOTTLENECK_CARD),
            Turn::stakeholder(LONG_ANSWER),
        ]);
        let output = score_meeting(&input).unwrap();
        assert_eq!(output.coverage_scores["bottlenecks"], 1.0);
        assert_eq!(output.independence["bottlenecks"], 1.0);
        assert_eq!(output.evidence.len(), 1);
        assert_eq!(output.covered_areas, vec!["bottlenecks".to_string()]);
        assert_bounded(&output);
    }

    #[test]
    fn small_talk_earns_no_coverage() {
        let chat = two_key_stage().with_transcript(vec![
            Turn::learner("Hi, how are you doing today?"),
            Turn::stakeholder(
                "Pretty good thanks, we spent the whole weekend hiking up the ridge trail with \
                 the kids and the dog, and the weather held up nicely",
            ),
        ]);
        let output = score_meeting(&chat).unwrap();
        assert!(output.evidence.is_empty());
        assert!(output.coverage_scores.values().all(|s| *s == 0.0));
        assert!(output.independence.values().all(|s| *s == 0.0));
        assert_eq!(output.missed_areas, ["bottlenecks", "budget"]);

        let mut followed = chat.clone();
        followed.transcript.push(Turn::learner(BOTTLENECK_CARD));
        followed.transcript.push(Turn::stakeholder(LONG_ANSWER));
        let output = score_meeting(&followed).unwrap();
        assert_eq!(output.evidence.len(), 1);
        assert_eq!(output.evidence[0].turn_index, 2);
        assert_eq!(output.coverage_scores["bottlenecks"], 1.0);
    }

    #[test]
    fn brush_off_answer_earns_nothing() {
        let input = bottleneck_stage().with_transcript(vec![
            Turn::learner(BOTTLENECK_CARD),
            Turn::stakeholder("Not sure really."),
        ]);
        let output = score_meeting(&input).unwrap();
        assert_eq!(output.coverage_scores["bottlenecks"], 0.0);
        assert_eq!(output.missed_areas, vec!["bottlenecks".to_string()]);
        assert_eq!(
            output.next_time_scripts[0],
            format!("For bottlenecks: \"{BOTTLENECK_CARD}\"")
        );
    }

    #[test]
    fn opening_with_a_solution_is_flagged() {
        let input = bottleneck_stage().with_transcript(vec![
            Turn::learner("We should just build an automated approval workflow."),
            Turn::stakeholder("Maybe, but I am not sure that is the problem."),
        ]);
        let output = score_meeting(&input).unwrap();
        assert!(output.technique.early_solutioning);
    }

    #[test]
    fn recent_hint_halves_independence() {
        let input = bottleneck_stage()
            .with_transcript(vec![
                Turn::learner(BOTTLENECK_CARD).at(at(100)),
                Turn::stakeholder(LONG_ANSWER).at(at(110)),
            ])
            .with_hints(vec![HintEvent::new(
                Some("c1"),
                HintEventType::Clicked,
                Some(at(90)),
            )]);
        let output = score_meeting(&input).unwrap();
        assert_eq!(output.coverage_scores["bottlenecks"], 1.0);
        assert_eq!(output.independence["bottlenecks"], 0.5);
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn empty_transcript_degrades_to_zero() {
        let output = score_meeting(&two_key_stage()).unwrap();
        assert!(output.coverage_scores.values().all(|s| *s == 0.0));
        assert!(output.independence.values().all(|s| *s == 0.0));
        assert_eq!(output.coverage_scores.len(), 2);
        assert_eq!(output.overall, 0.0);
        assert!(!output.passed);
        assert!(output.warnings.contains(&ScoringWarning::EmptyTranscript));
    }

    #[test]
    fn explicit_threshold_overrides_default() {
        let output = score_meeting(&good_session()).unwrap();
        assert_eq!(output.coverage_scores["bottlenecks"], 1.0);
        assert_eq!(output.coverage_scores["budget"], 0.5);
        assert!(output.overall > 0.7 && output.overall < 0.85, "{}", output.overall);
        assert!(output.passed);

        let strict = score_meeting(&good_session().with_pass_threshold(0.9)).unwrap();
        assert_eq!(strict.overall, output.overall);
        assert!(!strict.passed);
    }

    #[test]
    fn adding_an_answered_question_raises_coverage() {
        let before = bottleneck_session_without_budget();
        let mut after = before.clone();
        after.transcript.push(Turn::learner(BUDGET_CARD));
        after.transcript.push(Turn::stakeholder(BUDGET_ANSWER));

        let before = score_meeting(&before).unwrap();
        let after = score_meeting(&after).unwrap();
        assert_eq!(before.coverage_scores["budget"], 0.0);
        assert_eq!(after.coverage_scores["budget"], 1.0);
        assert_eq!(after.coverage_scores["bottlenecks"], 1.0);
    }

    fn bottleneck_session_without_budget() -> ScoringInput {
        two_key_stage().with_transcript(vec![
            Turn::learner(BOTTLENECK_CARD),
            Turn::stakeholder(LONG_ANSWER),
        ])
    }

    #[test]
    fn rescoring_is_deterministic_across_stages() {
        let scorer = scorer().with_cache(Arc::new(StageIndexCache::new()));
        let other = ScoringInput::new(StageDefinition::new("solutioning", ["success_metrics"]))
            .with_cards(vec![PromptCard::new(
                "s1",
                "solutioning",
                "probe",
                "Which success metrics matter most?",
            )])
            .with_transcript(vec![Turn::learner("Which success metrics matter?")]);
        let hinted = good_session().with_hints(vec![HintEvent::new(
            Some("c2"),
            HintEventType::Shown,
            None,
        )]);

        let first = scorer.score(&hinted).unwrap();
        scorer.score(&other).unwrap();
        let second = scorer.score(&hinted).unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first.next_time_scripts, second.next_time_scripts);
        assert_eq!(first, score_meeting(&hinted).unwrap());
    }

    #[test]
    fn maps_hold_exactly_the_declared_keys() {
        let input = ScoringInput::new(StageDefinition::new(
            "discovery",
            ["bottlenecks", "budget", "stakeholder_map"],
        ))
        .with_cards(vec![
            PromptCard::new("c1", "discovery", "probe", BOTTLENECK_CARD),
            PromptCard::new("c2", "discovery", "probe", BUDGET_CARD),
            PromptCard::new("x1", "delivery", "probe", "When do you need this live?"),
        ])
        .with_transcript(vec![Turn::learner(BOTTLENECK_CARD), Turn::stakeholder(LONG_ANSWER)]);
        let output = score_meeting(&input).unwrap();
        let keys: Vec<&str> = output.coverage_scores.keys().map(String::as_str).collect();
        assert_eq!(keys, ["bottlenecks", "budget", "stakeholder_map"]);
        let keys: Vec<&str> = output.independence.keys().map(String::as_str).collect();
        assert_eq!(keys, ["bottlenecks", "budget", "stakeholder_map"]);
        assert!(output.warnings.contains(&ScoringWarning::UnindexedKey {
            key: "stakeholder_map".into()
        }));
        assert!(output.warnings.iter().any(|w| w.kind() == "foreign_card"));
        assert_bounded(&output);
    }

    #[test]
    fn contract_violations_fail_fast() {
        assert_eq!(
            score_meeting(&ScoringInput::default()),
            Err(ScoringError::MissingStage)
        );
        let blank = ScoringInput::new(StageDefinition::new("  ", ["bottlenecks"]));
        assert_eq!(score_meeting(&blank), Err(ScoringError::EmptyStageId));
        let duplicated =
            ScoringInput::new(StageDefinition::new("discovery", ["budget", "risks", "budget"]));
        assert_eq!(
            score_meeting(&duplicated),
            Err(ScoringError::DuplicateTopicKey("budget".into()))
        );
        let threshold = bottleneck_stage().with_pass_threshold(1.5);
        assert_eq!(
            score_meeting(&threshold),
            Err(ScoringError::InvalidPassThreshold(1.5))
        );
    }

    #[test]
    fn stage_without_keys_still_reports() {
        let input = ScoringInput::new(StageDefinition::new("wrap_up", Vec::<String>::new()))
            .with_transcript(vec![Turn::learner("Anything else I should know?")]);
        let output = score_meeting(&input).unwrap();
        assert!(output.coverage_scores.is_empty());
        assert!(output.warnings.contains(&ScoringWarning::NoTopicKeys));
        assert_bounded(&output);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = ScoringConfig::default();
        config.aggregate.coverage_weight = 0.9;
        assert!(matches!(
            MeetingScorer::new(config),
            Err(ScoringError::InvalidConfig(_))
        ));
    }

    #[derive(Debug)]
    struct OfflineEmbedder;

    impl Embedder for OfflineEmbedder {
        fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("embedding service unreachable")
        }
    }

    #[test]
    fn embedding_strategy_scores_and_falls_back() {
        let session = bottleneck_stage().with_transcript(vec![
            Turn::learner(BOTTLENECK_CARD),
            Turn::stakeholder(LONG_ANSWER),
        ]);
        let threshold = ScoringConfig::default().classifier.cosine_threshold;

        let hashing = scorer().with_strategy(Arc::new(EmbeddingStrategy::new(
            Arc::new(HashingEmbedder::default()),
            threshold,
        )));
        assert_eq!(hashing.strategy_label(), "embedding");
        let output = hashing.score(&session).unwrap();
        assert_eq!(output.coverage_scores["bottlenecks"], 1.0);

        let offline = scorer().with_strategy(Arc::new(EmbeddingStrategy::new(
            Arc::new(OfflineEmbedder),
            threshold,
        )));
        let output = offline.score(&session).unwrap();
        assert_eq!(output.coverage_scores["bottlenecks"], 1.0);
        assert!(output
            .warnings
            .iter()
            .any(|w| w.kind() == "embedding_unavailable"));
    }

    #[test]
    fn telemetry_logs_and_announces_scores() {
        let tmp = tempdir().unwrap();
        let log_path = tmp.path().join("scoring.log");
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = ScoringTelemetry::builder("scoring")
            .log_path(&log_path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let scorer = scorer().with_telemetry(telemetry);
        scorer.score_session(Some("session-42"), &two_key_stage()).unwrap();

        let messages: Vec<String> = read_records(&log_path)
            .unwrap()
            .into_iter()
            .map(|record| record.message)
            .collect();
        assert!(messages.contains(&"scoring.stage.indexed".to_string()));
        assert!(messages.contains(&"scoring.warning".to_string()));
        assert_eq!(messages.last().map(String::as_str), Some("scoring.completed"));

        let events = bus.events_of_type("meeting.scored");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["session_id"], "session-42");
        assert_eq!(events[0].payload["passed"], false);
        assert_eq!(events[0].payload["missed"], json!(["bottlenecks", "budget"]));
    }
}
