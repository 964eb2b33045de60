use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structurally invalid scoring requests. These are caller bugs and fail the request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    /// No stage definition was supplied.
    #[error("scoring input carries no stage definition")]
    MissingStage,
    /// The stage definition has a blank id.
    #[error("stage definition has an empty id")]
    EmptyStageId,
    /// A topic key is declared more than once.
    #[error("topic key `{0}` is declared more than once")]
    DuplicateTopicKey(String),
    /// Pass threshold is not a number in [0, 1].
    #[error("pass threshold must lie in [0, 1], got {0}")]
    InvalidPassThreshold(f32),
    /// The scorer was built from unusable configuration.
    #[error("invalid scoring configuration: {0}")]
    InvalidConfig(String),
}

/// Recoverable conditions. Scoring continues and the affected scores degrade to their floor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoringWarning {
    /// The stage declares no topic keys.
    NoTopicKeys,
    /// No card could be assigned to this key, so it can never be covered.
    UnindexedKey {
        /// Affected key.
        key: String,
    },
    /// A card belongs to another stage and was ignored.
    ForeignCard {
        /// Card id.
        card_id: String,
        /// Stage the card claims to belong to.
        stage_id: String,
    },
    /// A card scored equally for several keys and went to the first one.
    AmbiguousAssignment {
        /// Card id.
        card_id: String,
        /// Tied keys, winner first.
        keys: Vec<String>,
    },
    /// Hint timing for this key used the configured fallback.
    TimestampsMissing {
        /// Affected key.
        key: String,
    },
    /// Embedding similarity failed for the stage and BM25 was used instead.
    EmbeddingUnavailable {
        /// Embedder failure.
        reason: String,
    },
    /// The transcript has no turns.
    EmptyTranscript,
}

impl ScoringWarning {
    /// Stable snake-case identifier, matching the serialized `kind`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NoTopicKeys => "no_topic_keys",
            Self::UnindexedKey { .. } => "unindexed_key",
            Self::ForeignCard { .. } => "foreign_card",
            Self::AmbiguousAssignment { .. } => "ambiguous_assignment",
            Self::TimestampsMissing { .. } => "timestamps_missing",
            Self::EmbeddingUnavailable { .. } => "embedding_unavailable",
            Self::EmptyTranscript => "empty_transcript",
        }
    }
}

impl fmt::Display for ScoringWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTopicKeys => write!(f, "stage declares no topic keys"),
            Self::UnindexedKey { key } => {
                write!(f, "topic key `{key}` has no assigned prompt cards")
            }
            Self::ForeignCard { card_id, stage_id } => {
                write!(f, "card `{card_id}` belongs to stage `{stage_id}` and was ignored")
            }
            Self::AmbiguousAssignment { card_id, keys } => write!(
                f,
                "card `{card_id}` ties between keys [{}]",
                keys.join(", ")
            ),
            Self::TimestampsMissing { key } => {
                write!(f, "hint timing for `{key}` fell back to the configured policy")
            }
            Self::EmbeddingUnavailable { reason } => {
                write!(f, "embedding similarity unavailable, using BM25: {reason}")
            }
            Self::EmptyTranscript => write!(f, "transcript is empty"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn warnings_serialize_with_kind_tag() {
        let warning = ScoringWarning::UnindexedKey {
            key: "budget".into(),
        };
        let value = serde_json::to_value(&warning).unwrap();
        assert_eq!(value, json!({ "kind": "unindexed_key", "key": "budget" }));
        assert_eq!(value["kind"], json!(warning.kind()));
    }

    #[test]
    fn errors_render_the_offending_value() {
        let err = ScoringError::DuplicateTopicKey("bottlenecks".into());
        assert_eq!(
            err.to_string(),
            "topic key `bottlenecks` is declared more than once"
        );
    }
}
