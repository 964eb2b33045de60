use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    engine::MeetingScorer,
    model::{ScoringInput, ScoringOutput},
    telemetry::ScoringTelemetry,
};

/// One session to score, as read from a batch file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionBundle {
    /// Caller's session id. A `session-<uuid>` id is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Scoring payload.
    #[serde(flatten)]
    pub input: ScoringInput,
}

impl SessionBundle {
    /// Wraps an input with a session id.
    #[must_use]
    pub fn new(session_id: impl Into<String>, input: ScoringInput) -> Self {
        Self {
            session_id: Some(session_id.into()),
            input,
        }
    }
}

/// Outcome for one session; exactly one of `output` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    /// Session id, generated when the bundle had none.
    pub session_id: String,
    /// The report, when scoring succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ScoringOutput>,
    /// The contract violation, when it did not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionReport {
    /// True when the session was scored.
    #[must_use]
    pub const fn is_scored(&self) -> bool {
        self.output.is_some()
    }
}

/// Scores many sessions concurrently on the blocking pool.
#[derive(Debug, Clone)]
pub struct ScoringBatchController {
    scorer: MeetingScorer,
    telemetry: Option<ScoringTelemetry>,
}

impl ScoringBatchController {
    /// Creates a new controller.
    #[must_use]
    pub const fn new(scorer: MeetingScorer, telemetry: Option<ScoringTelemetry>) -> Self {
        Self { scorer, telemetry }
    }

    /// Scores every bundle, returning reports in input order.
    ///
    /// A contract violation in one session lands in that report's `error`;
    /// only a panicked or cancelled worker fails the batch.
    pub async fn process_batch(&self, bundles: Vec<SessionBundle>) -> Result<Vec<SessionReport>> {
        self.log("scoring.batch.start", json!({ "count": bundles.len() }));
        let tasks: Vec<_> = bundles
            .into_iter()
            .map(|bundle| {
                let scorer = self.scorer.clone();
                tokio::task::spawn_blocking(move || {
                    let session_id = bundle
                        .session_id
                        .unwrap_or_else(|| format!("session-{}", Uuid::new_v4()));
                    match scorer.score_session(Some(&session_id), &bundle.input) {
                        Ok(output) => SessionReport {
                            session_id,
                            output: Some(output),
                            error: None,
                        },
                        Err(err) => SessionReport {
                            session_id,
                            output: None,
                            error: Some(err.to_string()),
                        },
                    }
                })
            })
            .collect();
        let mut reports = Vec::with_capacity(tasks.len());
        for task in tasks {
            reports.push(task.await?);
        }
        let failed = reports.iter().filter(|report| !report.is_scored()).count();
        self.log(
            "scoring.batch.complete",
            json!({ "count": reports.len(), "failed": failed }),
        );
        Ok(reports)
    }

    fn log(&self, message: &str, metadata: serde_json::Value) {
        if let Some(tel) = &self.telemetry {
            let _ = tel.log(LogLevel::Info, message, metadata);
        }
    }
}
