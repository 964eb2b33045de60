use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Tunable thresholds and weights for the whole scoring pipeline.
///
/// Every field has a default, so a TOML document only needs to name the
/// values it overrides:
///
/// ```toml
/// [coverage]
/// full_response_words = 25
///
/// [aggregate]
/// pass_threshold = 0.7
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Lexical index parameters.
    pub index: IndexSettings,
    /// Card-to-key assignment.
    pub assignment: AssignmentSettings,
    /// Turn classification and question-style rules.
    pub classifier: ClassifierSettings,
    /// Coverage grading.
    pub coverage: CoverageSettings,
    /// Hint-window independence grading.
    pub independence: IndependenceSettings,
    /// Final weighting, pass threshold and remediation.
    pub aggregate: AggregateSettings,
}

impl ScoringConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading scoring config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would break the score bounds.
    pub fn validate(&self) -> Result<()> {
        positive("index.k1", self.index.k1)?;
        if !(0.0..=1.0).contains(&self.index.b) {
            bail!("index.b must lie in [0, 1]");
        }
        if self.index.idf_floor.is_nan() || self.index.idf_floor < 0.0 {
            bail!("index.idf_floor must be non-negative");
        }
        positive("assignment.saturation", self.assignment.saturation)?;
        unit("assignment.min_score", self.assignment.min_score)?;
        unit("classifier.follow_up_similarity", self.classifier.follow_up_similarity)?;
        unit("classifier.cosine_threshold", self.classifier.cosine_threshold)?;
        unit_sum(
            "classifier threshold weights",
            &[self.classifier.mean_weight, self.classifier.max_weight],
        )?;
        if self.coverage.partial_response_words > self.coverage.full_response_words {
            bail!("coverage.partial_response_words exceeds coverage.full_response_words");
        }
        if !(0..=86_400).contains(&self.independence.hint_window_secs) {
            bail!("independence.hint_window_secs must lie in [0, 86400]");
        }
        unit("aggregate.pass_threshold", self.aggregate.pass_threshold)?;
        unit("aggregate.early_solution_penalty", self.aggregate.early_solution_penalty)?;
        unit_sum(
            "aggregate overall weights",
            &[
                self.aggregate.coverage_weight,
                self.aggregate.independence_weight,
                self.aggregate.technique_weight,
            ],
        )?;
        unit_sum(
            "aggregate technique weights",
            &[
                self.aggregate.open_weight,
                self.aggregate.follow_up_weight,
                self.aggregate.balance_weight,
            ],
        )?;
        if self.aggregate.max_key_scripts > self.aggregate.max_scripts {
            bail!("aggregate.max_key_scripts exceeds aggregate.max_scripts");
        }
        Ok(())
    }
}

fn positive(name: &str, value: f32) -> Result<()> {
    if value.is_nan() || value <= 0.0 {
        bail!("{name} must be positive, got {value}");
    }
    Ok(())
}

fn unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        bail!("{name} must lie in [0, 1], got {value}");
    }
    Ok(())
}

// Convex weights keep every combined score inside [0, 1].
fn unit_sum(name: &str, weights: &[f32]) -> Result<()> {
    for weight in weights {
        unit(name, *weight)?;
    }
    let total: f32 = weights.iter().sum();
    if (total - 1.0).abs() > 1e-4 {
        bail!("{name} must sum to 1, got {total}");
    }
    Ok(())
}

/// BM25 parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Term-frequency saturation.
    pub k1: f32,
    /// Document-length normalisation.
    pub b: f32,
    /// Lower bound applied to IDF so terms shared by most cards still count.
    pub idf_floor: f32,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            idf_floor: 0.01,
        }
    }
}

/// Card-to-key assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentSettings {
    /// A card is assigned only when its best key score exceeds this.
    pub min_score: f32,
    /// Saturation constant in `tf / (tf + saturation)`.
    pub saturation: f32,
}

impl Default for AssignmentSettings {
    fn default() -> Self {
        Self {
            min_score: 0.1,
            saturation: 1.5,
        }
    }
}

/// Turn classification and question-style rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// Jaccard similarity with the previous stakeholder turn above which a turn is a follow-up.
    pub follow_up_similarity: f32,
    /// Weight of the mean score in the dynamic acceptance threshold.
    pub mean_weight: f32,
    /// Weight of the max score in the dynamic acceptance threshold.
    pub max_weight: f32,
    /// Minimum cosine similarity accepted by embedding strategies.
    pub cosine_threshold: f32,
    /// Auxiliaries that mark a closed question when they open a turn.
    pub closed_openers: Vec<String>,
    /// Backward-reference phrases marking a follow-up.
    pub follow_up_phrases: Vec<String>,
    /// Case-insensitive regexes for proposing a solution.
    pub solution_patterns: Vec<String>,
    /// How many opening learner turns are checked for solution proposals.
    pub early_turns: usize,
    /// Function words and pleasantries that never tie a turn to a topic.
    pub stopwords: Vec<String>,
    /// Non-stopword tokens a turn must share with a key's cards to classify to it.
    /// Zero turns the gate off.
    pub min_content_overlap: usize,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            follow_up_similarity: 0.28,
            mean_weight: 0.6,
            max_weight: 0.4,
            cosine_threshold: 0.32,
            closed_openers: [
                "is", "are", "do", "does", "did", "can", "will", "have", "has", "should",
                "could",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            follow_up_phrases: [
                "you mentioned",
                "earlier you said",
                "can you expand",
                "tell me more",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            solution_patterns: [
                r"\bwe should (?:\w+ )?build\b",
                r"\blet['’]?s (?:\w+ )?(?:build|implement|create)\b",
                r"\bi will (?:\w+ )?(?:create|build)\b",
                r"\badd a feature\b",
                r"\bthe api should\b",
                r"\bwe can (?:\w+ )?automate\b",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            early_turns: 3,
            stopwords: DEFAULT_STOPWORDS.iter().copied().map(String::from).collect(),
            min_content_overlap: 1,
        }
    }
}

const DEFAULT_STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "so", "if", "then", "of", "in", "on", "at", "to",
    "for", "from", "by", "with", "about", "as", "into", "is", "are", "was", "were", "be",
    "been", "am", "do", "does", "did", "doing", "have", "has", "had", "can", "could", "will",
    "would", "should", "may", "might", "i", "im", "me", "my", "we", "our", "us", "you",
    "your", "youre", "he", "she", "it", "its", "they", "them", "their", "this", "that",
    "these", "those", "there", "here", "what", "whats", "which", "who", "whom", "where",
    "when", "why", "how", "hi", "hello", "hey", "thanks", "thank", "please", "just",
    "really", "very", "ok", "okay", "yes", "no", "not", "good", "great", "well", "going",
];

/// Coverage grading gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageSettings {
    /// Stakeholder words needed for full coverage.
    pub full_response_words: usize,
    /// Stakeholder words needed for partial coverage.
    pub partial_response_words: usize,
    /// Follow-ups that substitute for a direct question.
    pub min_follow_ups: usize,
}

impl Default for CoverageSettings {
    fn default() -> Self {
        Self {
            full_response_words: 18,
            partial_response_words: 6,
            min_follow_ups: 2,
        }
    }
}

/// What to assume when a hint cannot be placed in time relative to the evidence turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFallback {
    /// Assisted when an unplaced hint references a card assigned to the key.
    #[default]
    CardMatch,
    /// Unplaced hints never reduce independence.
    AssumeIndependent,
    /// Any unplaced hint reduces independence.
    AssumeAssisted,
}

/// Independence grading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndependenceSettings {
    /// Hints this many seconds or fewer before the evidence turn count as help.
    pub hint_window_secs: i64,
    /// Policy for hints or turns without timestamps.
    pub fallback: TimestampFallback,
}

impl Default for IndependenceSettings {
    fn default() -> Self {
        Self {
            hint_window_secs: 30,
            fallback: TimestampFallback::default(),
        }
    }
}

/// Final weighting, pass threshold and remediation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateSettings {
    /// Default pass threshold when the input does not carry one.
    pub pass_threshold: f32,
    /// Weight of mean coverage in the overall score.
    pub coverage_weight: f32,
    /// Weight of mean independence in the overall score.
    pub independence_weight: f32,
    /// Weight of the technique composite in the overall score.
    pub technique_weight: f32,
    /// Weight of the open-question ratio in the technique composite.
    pub open_weight: f32,
    /// Weight of the follow-up ratio in the technique composite.
    pub follow_up_weight: f32,
    /// Weight of talk balance in the technique composite.
    pub balance_weight: f32,
    /// Flat deduction from the technique composite for early solutioning.
    pub early_solution_penalty: f32,
    /// Topic keys that receive a suggested question.
    pub max_key_scripts: usize,
    /// Cap on the remediation list.
    pub max_scripts: usize,
    /// Open ratio below which a questioning tip is added.
    pub tip_open_ratio: f32,
    /// Follow-up ratio below which a follow-up tip is added.
    pub tip_follow_up: f32,
    /// Talk balance below which a listening tip is added.
    pub tip_talk_balance: f32,
}

impl Default for AggregateSettings {
    fn default() -> Self {
        Self {
            pass_threshold: 0.65,
            coverage_weight: 0.6,
            independence_weight: 0.2,
            technique_weight: 0.2,
            open_weight: 0.4,
            follow_up_weight: 0.3,
            balance_weight: 0.3,
            early_solution_penalty: 0.2,
            max_key_scripts: 3,
            max_scripts: 5,
            tip_open_ratio: 0.5,
            tip_follow_up: 0.2,
            tip_talk_balance: 0.5,
        }
    }
}
