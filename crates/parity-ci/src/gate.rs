//! Run-level pass/fail gate over family reports.

use serde::{Deserialize, Serialize};

use crate::suite::{CaseOutcome, FamilyReport};

/// Gate evaluation verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Failed cases, one line each (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Suite gate rules.
pub struct SuiteGate;

impl SuiteGate {
    /// The run passes iff no case in any family failed. Skipped cases never
    /// fail the gate.
    pub fn evaluate(families: &[FamilyReport]) -> GateVerdict {
        let mut violations = Vec::new();
        let mut skipped = 0;

        for family in families {
            for case in &family.cases {
                match &case.outcome {
                    CaseOutcome::Failed { reason } => violations.push(format!(
                        "{}/{}: {}",
                        family.family,
                        case.artifact,
                        reason.lines().next().unwrap_or_default()
                    )),
                    CaseOutcome::Skipped { .. } => skipped += 1,
                    CaseOutcome::Passed => {}
                }
            }
        }

        let passed = violations.is_empty();
        let message = if passed {
            format!("All families passed ({} case(s) skipped)", skipped)
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::{CaseReport, Family};
    use chrono::Utc;

    fn family(family: Family, outcomes: Vec<(&str, CaseOutcome)>) -> FamilyReport {
        FamilyReport {
            family,
            started_at: Utc::now(),
            duration_ms: 0,
            cases: outcomes
                .into_iter()
                .map(|(artifact, outcome)| CaseReport {
                    artifact: artifact.to_string(),
                    outcome,
                    duration_ms: 0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_empty_passes() {
        let verdict = SuiteGate::evaluate(&[]);
        assert!(verdict.passed);
        assert!(verdict.violations.is_empty());
    }

    #[test]
    fn test_skipped_cases_do_not_fail() {
        let verdict = SuiteGate::evaluate(&[family(
            Family::Equivalence,
            vec![
                ("Dockerfile_test_run", CaseOutcome::Passed),
                (
                    "Dockerfile_test_cache",
                    CaseOutcome::Skipped {
                        reason: "cache-only".to_string(),
                    },
                ),
            ],
        )]);
        assert!(verdict.passed);
        assert!(verdict.message.contains("1 case(s) skipped"));
    }

    #[test]
    fn test_failures_across_families() {
        let verdict = SuiteGate::evaluate(&[
            family(
                Family::Equivalence,
                vec![(
                    "Dockerfile_test_run",
                    CaseOutcome::Failed {
                        reason: "images differ\n  /0/Diff/Adds/0".to_string(),
                    },
                )],
            ),
            family(
                Family::Layers,
                vec![(
                    "Dockerfile_test_add",
                    CaseOutcome::Failed {
                        reason: "layer mismatch".to_string(),
                    },
                )],
            ),
        ]);
        assert!(!verdict.passed);
        assert_eq!(
            verdict.violations,
            vec![
                "equivalence/Dockerfile_test_run: images differ".to_string(),
                "layers/Dockerfile_test_add: layer mismatch".to_string(),
            ]
        );
    }
}
