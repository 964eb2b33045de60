use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ScoringWarning;

/// A required subject area, e.g. `bottlenecks` or `pain_points`.
pub type TopicKey = String;

/// Stage definition: which topic keys the learner must probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Stage id.
    pub id: String,
    /// Declared topic keys, unique within the stage.
    #[serde(default)]
    pub must_cover: Vec<TopicKey>,
}

impl StageDefinition {
    /// Creates a stage with the given keys.
    #[must_use]
    pub fn new<I, K>(id: impl Into<String>, must_cover: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<TopicKey>,
    {
        Self {
            id: id.into(),
            must_cover: must_cover.into_iter().map(Into::into).collect(),
        }
    }
}

/// Stage-scoped reference question used to train the lexical index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptCard {
    /// Card id, referenced by hint events.
    pub id: String,
    /// Owning stage.
    pub stage_id: String,
    /// Skill label (informational).
    #[serde(default)]
    pub skill: String,
    /// Question text.
    pub text: String,
}

impl PromptCard {
    /// Creates a card.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        stage_id: impl Into<String>,
        skill: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            stage_id: stage_id.into(),
            skill: skill.into(),
            text: text.into(),
        }
    }
}

/// Who spoke a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person practising the interview.
    Learner,
    /// The simulated stakeholder.
    Stakeholder,
}

/// One utterance. Transcript order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Speaker.
    pub role: Role,
    /// Utterance text.
    pub text: String,
    /// When it was spoken, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Turn {
    /// Learner turn without a timestamp.
    #[must_use]
    pub fn learner(text: impl Into<String>) -> Self {
        Self {
            role: Role::Learner,
            text: text.into(),
            timestamp: None,
        }
    }

    /// Stakeholder turn without a timestamp.
    #[must_use]
    pub fn stakeholder(text: impl Into<String>) -> Self {
        Self {
            role: Role::Stakeholder,
            text: text.into(),
            timestamp: None,
        }
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Kind of help the learner asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintEventType {
    /// A hint card was displayed.
    Shown,
    /// A hint card was clicked.
    Clicked,
    /// A hint card was edited into a question.
    Edited,
    /// The learner asked the coach directly.
    Asked,
}

/// Help-request event recorded by the product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintEvent {
    /// Card the hint was about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<String>,
    /// Event type.
    pub event_type: HintEventType,
    /// When it happened, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl HintEvent {
    /// Creates an event.
    #[must_use]
    pub fn new(
        card_id: Option<&str>,
        event_type: HintEventType,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            card_id: card_id.map(str::to_string),
            event_type,
            timestamp,
        }
    }
}

/// Rhetorical kind of a classified learner turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// The learner raised the topic.
    DirectQ,
    /// The learner built on the stakeholder's previous turn.
    FollowUp,
    /// The stakeholder raised the topic first and the learner picked it up.
    StakeholderPrompted,
}

/// Links one learner turn to the topic key it addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// Topic key.
    pub key: TopicKey,
    /// Index into the scored transcript.
    #[serde(rename = "turnIdx")]
    pub turn_index: usize,
    /// Evidence kind.
    pub kind: EvidenceKind,
}

/// Everything one scoring call needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringInput {
    /// Stage definition. Absent is a contract violation.
    #[serde(default)]
    pub stage: Option<StageDefinition>,
    /// Prompt cards for the stage.
    #[serde(default)]
    pub cards: Vec<PromptCard>,
    /// Ordered transcript.
    #[serde(default)]
    pub transcript: Vec<Turn>,
    /// Hint events for the session, ordered by time.
    #[serde(default)]
    pub hint_events: Vec<HintEvent>,
    /// Overrides the configured pass threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_threshold: Option<f32>,
}

impl ScoringInput {
    /// Creates an input for a stage with no cards, turns or hints yet.
    #[must_use]
    pub fn new(stage: StageDefinition) -> Self {
        Self {
            stage: Some(stage),
            ..Self::default()
        }
    }

    /// Replaces the prompt cards.
    #[must_use]
    pub fn with_cards(mut self, cards: Vec<PromptCard>) -> Self {
        self.cards = cards;
        self
    }

    /// Replaces the transcript.
    #[must_use]
    pub fn with_transcript(mut self, transcript: Vec<Turn>) -> Self {
        self.transcript = transcript;
        self
    }

    /// Replaces the hint events.
    #[must_use]
    pub fn with_hints(mut self, hint_events: Vec<HintEvent>) -> Self {
        self.hint_events = hint_events;
        self
    }

    /// Sets the pass threshold for this call.
    #[must_use]
    pub fn with_pass_threshold(mut self, threshold: f32) -> Self {
        self.pass_threshold = Some(threshold);
        self
    }
}

/// Interviewing-style metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechniqueMetrics {
    /// Share of learner turns that are open questions.
    pub open_ratio: f32,
    /// Share of learner turns that are follow-ups.
    pub follow_up: f32,
    /// 1.0 when the stakeholder spoke exactly half the words, 0 at either extreme.
    pub talk_balance: f32,
    /// A solution was proposed in the learner's opening turns.
    pub early_solutioning: bool,
}

/// Final report for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringOutput {
    /// Stage that was scored.
    pub stage_id: String,
    /// Coverage per declared key: 0, 0.5 or 1.
    pub coverage_scores: IndexMap<TopicKey, f32>,
    /// Independence per declared key: 0, 0.5 or 1.
    pub independence: IndexMap<TopicKey, f32>,
    /// Technique metrics.
    pub technique: TechniqueMetrics,
    /// Weighted overall score in [0, 1].
    pub overall: f32,
    /// `overall >= pass threshold`.
    pub passed: bool,
    /// Keys with coverage of at least 0.5.
    pub covered_areas: Vec<TopicKey>,
    /// Remaining keys.
    pub missed_areas: Vec<TopicKey>,
    /// Suggested questions and coaching tips, at most five.
    pub next_time_scripts: Vec<String>,
    /// Classified evidence in transcript order.
    pub evidence: Vec<Evidence>,
    /// Recoverable problems met while scoring.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ScoringWarning>,
}
