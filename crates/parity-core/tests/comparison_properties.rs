//! End-to-end properties of decode -> filter -> assert.

use parity_core::fakes::{FakeBuilder, FakeDiffTool};
use parity_core::{
    check_equivalence, decode_report, expected_baseline, filter_file, filter_metadata,
    verify_cache_determinism, DiffPayload, FileEntry, ImageNaming, ParityError, Timings,
    ToleranceRules,
};

const DOCKER: &str = "gcr.io/kaniko-test/docker-dockerfile_test_workdir";
const KANIKO: &str = "gcr.io/kaniko-test/kaniko-dockerfile_test_workdir";

fn noisy_report(metadata_adds: &str) -> String {
    format!(
        r#"[
          {{
            "Image1": "{DOCKER}",
            "Image2": "{KANIKO}",
            "DiffType": "File",
            "Diff": {{
              "Adds": [{{"Name": "/sys/fs/cgroup", "Size": 0}}],
              "Dels": [{{"Name": "/sys", "Size": 4096}}],
              "Mods": null
            }}
          }},
          {{
            "Image1": "{DOCKER}",
            "Image2": "{KANIKO}",
            "DiffType": "Metadata",
            "Diff": {{"Adds": [{metadata_adds}], "Dels": []}}
          }}
        ]"#
    )
}

#[test]
fn test_filtered_noise_equals_baseline_on_engine_18() {
    let report = decode_report(noisy_report(r#""ArgsEscaped:true""#).as_bytes()).unwrap();
    let rules = ToleranceRules::for_engine_version(18);
    check_equivalence(report, &rules, DOCKER, KANIKO).unwrap();
}

#[test]
fn test_args_escaped_is_a_real_difference_on_engine_19() {
    let report = decode_report(noisy_report(r#""ArgsEscaped:true""#).as_bytes()).unwrap();
    let rules = ToleranceRules::for_engine_version(19);
    let err = check_equivalence(report, &rules, DOCKER, KANIKO).unwrap_err();
    assert_eq!(err.deltas.len(), 1);
    assert_eq!(err.deltas[0].pointer, "/1/Diff/Adds/0");
}

#[test]
fn test_sysroot_is_not_tolerated() {
    let raw = noisy_report("").replace("/sys/fs/cgroup", "/sysroot/lib");
    let report = decode_report(raw.as_bytes()).unwrap();
    let rules = ToleranceRules::for_engine_version(18);
    let err = check_equivalence(report, &rules, DOCKER, KANIKO).unwrap_err();
    assert!(err.to_string().contains("/sysroot/lib"));
}

#[test]
fn test_filters_are_idempotent_on_decoded_payloads() {
    let report = decode_report(noisy_report(r#""ArgsEscaped:true", "Env:[]""#).as_bytes()).unwrap();
    let rules = ToleranceRules::for_engine_version(18);
    for record in &report.records {
        match &record.payload {
            DiffPayload::File(delta) => {
                let once: Vec<FileEntry> = filter_file(&delta.adds, &rules);
                assert_eq!(filter_file(&once, &rules), once);
            }
            DiffPayload::Metadata(delta) => {
                let once = filter_metadata(&delta.adds, &rules);
                assert_eq!(filter_metadata(&once, &rules), once);
                assert_eq!(once, vec!["Env:[]".to_string()]);
            }
            DiffPayload::Unresolved { .. } => unreachable!(),
        }
    }
}

#[test]
fn test_unknown_kind_never_raises_malformed_report() {
    let raw = format!(
        r#"[{{"Image1": "{DOCKER}", "Image2": "{KANIKO}", "DiffType": "Unknown", "Diff": "opaque"}}]"#
    );
    let report = decode_report(raw.as_bytes()).unwrap();
    let mut filtered = report.clone();
    ToleranceRules::for_engine_version(18).apply(&mut filtered);
    assert_eq!(filtered, report);
}

#[test]
fn test_baseline_wire_format_matches_diff_tool_contract() {
    let wire = expected_baseline(DOCKER, KANIKO).to_wire();
    assert_eq!(wire[0]["DiffType"], "File");
    assert_eq!(wire[1]["DiffType"], "Metadata");
    assert_eq!(wire[0]["Image1"], DOCKER);
    assert_eq!(wire[1]["Image2"], KANIKO);
}

#[tokio::test]
async fn test_determinism_scenario_with_tolerated_noise() {
    let naming = ImageNaming::new("gcr.io/kaniko-test");
    let first = naming.versioned_alternative_image("Dockerfile_test_cache", 0);
    let second = naming.versioned_alternative_image("Dockerfile_test_cache", 1);
    let raw = format!(
        r#"[
          {{"Image1": "{first}", "Image2": "{second}", "DiffType": "File",
            "Diff": {{"Adds": [{{"Name": "/sys/kernel", "Size": 0}}], "Dels": null, "Mods": null}}}},
          {{"Image1": "{first}", "Image2": "{second}", "DiffType": "Metadata",
            "Diff": {{"Adds": [], "Dels": []}}}}
        ]"#
    );
    let tool = FakeDiffTool::new().with_report(&first, &second, raw);

    verify_cache_determinism(
        &FakeBuilder::new(),
        &tool,
        &ToleranceRules::for_engine_version(19),
        &naming,
        "Dockerfile_test_cache",
        &Timings::new(),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_determinism_scenario_detects_cache_drift() {
    let naming = ImageNaming::new("gcr.io/kaniko-test");
    let first = naming.versioned_alternative_image("Dockerfile_test_cache", 0);
    let second = naming.versioned_alternative_image("Dockerfile_test_cache", 1);
    let raw = format!(
        r#"[
          {{"Image1": "{first}", "Image2": "{second}", "DiffType": "File",
            "Diff": {{"Adds": null, "Dels": null, "Mods": [{{"Name": "/app/date.txt", "Size": 30}}]}}}},
          {{"Image1": "{first}", "Image2": "{second}", "DiffType": "Metadata",
            "Diff": {{"Adds": [], "Dels": []}}}}
        ]"#
    );
    let tool = FakeDiffTool::new().with_report(&first, &second, raw);

    let err = verify_cache_determinism(
        &FakeBuilder::new(),
        &tool,
        &ToleranceRules::for_engine_version(19),
        &naming,
        "Dockerfile_test_cache",
        &Timings::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ParityError::Equivalence(_)));
}
