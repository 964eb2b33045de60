#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]
#![allow(clippy::cast_precision_loss)]

//! Meeting scoring engine: grades a practice stakeholder interview on topic
//! coverage, interviewing technique and independence from hints.

/// Tunable thresholds and weights.
#[path = "../config.rs"]
pub mod config;

/// Contract violations and recoverable warnings.
#[path = "../error.rs"]
pub mod error;

/// Input and report data model.
#[path = "../model.rs"]
pub mod model;

/// Tokenisation, BM25, similarity strategies and card assignment.
#[path = "../lexical/main.rs"]
pub mod lexical;

/// Per-stage immutable index context and its cache.
#[path = "../stage.rs"]
pub mod stage;

/// Classification, coverage, technique, independence and aggregation.
#[path = "../analysis/main.rs"]
pub mod analysis;

/// Telemetry builder/hook for scoring components.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Session scorer.
#[path = "../engine.rs"]
pub mod engine;

/// Concurrent batch scoring.
#[path = "../batch.rs"]
pub mod batch;

pub use batch::{ScoringBatchController, SessionBundle, SessionReport};
pub use config::{ScoringConfig, TimestampFallback};
pub use engine::{score_meeting, scored_event, MeetingScorer, SCORED_EVENT};
pub use error::{ScoringError, ScoringWarning};
pub use lexical::{
    Bm25Strategy, CardAssignment, Embedder, EmbeddingStrategy, HashingEmbedder,
    SimilarityStrategy,
};
pub use model::{
    Evidence, EvidenceKind, HintEvent, HintEventType, PromptCard, Role, ScoringInput,
    ScoringOutput, StageDefinition, TechniqueMetrics, TopicKey, Turn,
};
pub use stage::{StageContext, StageIndexCache};
pub use telemetry::{ScoringTelemetry, ScoringTelemetryBuilder};
