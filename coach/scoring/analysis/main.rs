//! Per-session analysis stages, from classified evidence to the final verdict.

/// Overall score, pass flag and remediation scripts.
pub mod aggregate;
/// Turn-to-key classification and question-style rules.
pub mod classify;
/// Per-key coverage grading.
pub mod coverage;
/// Hint-aware independence grading.
pub mod independence;
/// Question style and talk balance.
pub mod technique;

pub use aggregate::{aggregate, remediation_scripts, technique_composite, Verdict};
pub use classify::{KeyMatch, TurnClassifier, TurnRules};
pub use coverage::{response_words, score_coverage};
pub use independence::{score_independence, IndependenceReport};
pub use technique::{analyze_technique, talk_balance};
