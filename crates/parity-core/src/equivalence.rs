//! Equivalence assertion against the "no difference" baseline.

use std::fmt;

use serde_json::Value;

use crate::error::EquivalenceMismatch;
use crate::report::{DeltaReport, DiffPayload, DiffRecord, FileDelta, MetadataDelta};
use crate::tolerance::ToleranceRules;

/// A single difference at an RFC 6901 JSON pointer between the baseline
/// and the filtered report, both rendered in wire format.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportDelta {
    /// JSON pointer, e.g. `"/0/Diff/Adds/0/Name"`.
    pub pointer: String,
    /// Value in the baseline (`Null` if absent).
    pub expected: Value,
    /// Value in the filtered report (`Null` if absent).
    pub actual: Value,
}

impl fmt::Display for ReportDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, got {}",
            self.pointer, self.expected, self.actual
        )
    }
}

/// The report two indistinguishable images produce: one empty File record
/// followed by one empty Metadata record.
pub fn expected_baseline(image_a: &str, image_b: &str) -> DeltaReport {
    let record = |payload| DiffRecord {
        subject_a: image_a.to_string(),
        subject_b: image_b.to_string(),
        payload,
    };
    DeltaReport::new(vec![
        record(DiffPayload::File(FileDelta::default())),
        record(DiffPayload::Metadata(MetadataDelta::default())),
    ])
}

/// Filter `actual` with `rules` and assert it equals the baseline for the
/// pair.
///
/// Record order is part of the diff tool's contract, so a report with the
/// Metadata record first is a mismatch even when both payloads are empty.
pub fn check_equivalence(
    mut actual: DeltaReport,
    rules: &ToleranceRules,
    image_a: &str,
    image_b: &str,
) -> Result<(), EquivalenceMismatch> {
    rules.apply(&mut actual);
    let expected = expected_baseline(image_a, image_b);

    if actual == expected {
        return Ok(());
    }

    let deltas = diff_wire(&expected.to_wire(), &actual.to_wire());
    Err(EquivalenceMismatch {
        subject_a: image_a.to_string(),
        subject_b: image_b.to_string(),
        deltas,
    })
}

/// Pointer-level differences between two wire-format reports.
pub fn diff_wire(expected: &Value, actual: &Value) -> Vec<ReportDelta> {
    let mut deltas = Vec::new();
    collect_deltas("", expected, actual, &mut deltas);
    deltas
}

fn collect_deltas(prefix: &str, expected: &Value, actual: &Value, out: &mut Vec<ReportDelta>) {
    if expected == actual {
        return;
    }

    match (expected, actual) {
        (Value::Object(obj_e), Value::Object(obj_a)) => {
            let mut keys: Vec<&String> = obj_e.keys().chain(obj_a.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let path = format!("{}/{}", prefix, escape_pointer_token(key));
                collect_deltas(
                    &path,
                    obj_e.get(key).unwrap_or(&Value::Null),
                    obj_a.get(key).unwrap_or(&Value::Null),
                    out,
                );
            }
        }
        (Value::Array(arr_e), Value::Array(arr_a)) => {
            for i in 0..arr_e.len().max(arr_a.len()) {
                collect_deltas(
                    &format!("{}/{}", prefix, i),
                    arr_e.get(i).unwrap_or(&Value::Null),
                    arr_a.get(i).unwrap_or(&Value::Null),
                    out,
                );
            }
        }
        _ => out.push(ReportDelta {
            pointer: if prefix.is_empty() {
                "/".to_string()
            } else {
                prefix.to_string()
            },
            expected: expected.clone(),
            actual: actual.clone(),
        }),
    }
}

fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}
