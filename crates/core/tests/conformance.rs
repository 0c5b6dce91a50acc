//! Lowering conformance suite.
//!
//! Each fixture is a `<name>.obs` source under `conformance/`, with an
//! optional `<name>.toml` lowering config next to it:
//! - `positive/<name>.expected.txt`        -- the rendered lowered program
//! - `negative/<name>.expected-error.json` -- the first static error
//!
//! Every positive fixture's lowering report is also validated against
//! `schema/lowering-report.schema.json`.

use obsctx_core::{lower_source, serialize_report, Lowered, LoweringConfig};
use std::path::{Path, PathBuf};

fn conformance_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../conformance")
}

fn fixture_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap_or_else(|e| panic!("cannot list {}: {}", dir.display(), e))
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |e| e == "obs"))
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    names
}

fn fixture_config(dir: &Path, name: &str) -> LoweringConfig {
    let path = dir.join(format!("{}.toml", name));
    if path.exists() {
        LoweringConfig::load(&path).unwrap_or_else(|e| panic!("bad config for {}: {}", name, e))
    } else {
        LoweringConfig::default()
    }
}

fn lower_fixture(dir: &Path, name: &str) -> Result<Lowered, obsctx_core::LowerError> {
    let src_path = dir.join(format!("{}.obs", name));
    let src = std::fs::read_to_string(&src_path)
        .unwrap_or_else(|e| panic!("cannot read {}: {}", src_path.display(), e));
    lower_source(&src, &format!("{}.obs", name), &fixture_config(dir, name))
}

fn run_positive(dir: &Path, name: &str) -> Option<String> {
    let lowered = match lower_fixture(dir, name) {
        Ok(l) => l,
        Err(e) => return Some(format!("{}: unexpected error: {}", name, e)),
    };
    let expected_path = dir.join(format!("{}.expected.txt", name));
    let expected = std::fs::read_to_string(&expected_path)
        .unwrap_or_else(|e| panic!("cannot read {}: {}", expected_path.display(), e));
    let actual = lowered.program.to_string();
    if actual.trim_end() != expected.trim_end() {
        return Some(format!(
            "{}: output mismatch\n--- actual\n{}\n--- expected\n{}",
            name,
            actual,
            expected.trim_end()
        ));
    }
    None
}

fn run_negative(dir: &Path, name: &str) -> Option<String> {
    let expected_path = dir.join(format!("{}.expected-error.json", name));
    let expected: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(&expected_path)
            .unwrap_or_else(|e| panic!("cannot read {}: {}", expected_path.display(), e)),
    )
    .unwrap_or_else(|e| panic!("invalid JSON in {}: {}", expected_path.display(), e));

    match lower_fixture(dir, name) {
        Ok(_) => Some(format!("{}: expected an error, lowering succeeded", name)),
        Err(e) => {
            let actual = e.to_json_value();
            if actual != expected {
                Some(format!(
                    "{}: error mismatch\n--- actual\n{}\n--- expected\n{}",
                    name,
                    serde_json::to_string_pretty(&actual).unwrap(),
                    serde_json::to_string_pretty(&expected).unwrap()
                ))
            } else {
                None
            }
        }
    }
}

#[test]
fn positive_fixtures() {
    let dir = conformance_root().join("positive");
    let names = fixture_names(&dir);
    assert!(!names.is_empty(), "no positive fixtures found");
    let failures: Vec<String> = names.iter().filter_map(|n| run_positive(&dir, n)).collect();
    assert!(
        failures.is_empty(),
        "{} of {} positive fixtures failed:\n{}",
        failures.len(),
        names.len(),
        failures.join("\n\n")
    );
}

#[test]
fn negative_fixtures() {
    let dir = conformance_root().join("negative");
    let names = fixture_names(&dir);
    assert!(!names.is_empty(), "no negative fixtures found");
    let failures: Vec<String> = names.iter().filter_map(|n| run_negative(&dir, n)).collect();
    assert!(
        failures.is_empty(),
        "{} of {} negative fixtures failed:\n{}",
        failures.len(),
        names.len(),
        failures.join("\n\n")
    );
}

#[test]
fn positive_reports_match_schema() {
    let schema_path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../schema/lowering-report.schema.json");
    let schema_src = std::fs::read_to_string(&schema_path)
        .unwrap_or_else(|e| panic!("Failed to read schema at {}: {}", schema_path.display(), e));
    let schema_value: serde_json::Value = serde_json::from_str(&schema_src).unwrap();
    let validator = jsonschema::validator_for(&schema_value)
        .unwrap_or_else(|e| panic!("Failed to compile schema: {}", e));

    let dir = conformance_root().join("positive");
    let mut tested = 0usize;
    let mut failures = Vec::new();
    for name in fixture_names(&dir) {
        let lowered = lower_fixture(&dir, &name).unwrap();
        let report = serialize_report(&lowered);
        if let Err(error) = validator.validate(&report) {
            failures.push(format!("{}: {}", name, error));
        }
        tested += 1;
    }
    assert!(tested > 0, "No positive fixtures found -- check paths");
    assert!(
        failures.is_empty(),
        "Schema validation failed for {} of {} reports:\n{}",
        failures.len(),
        tested,
        failures.join("\n")
    );
}

#[test]
fn report_binding_sites() {
    let lowered = lower_fixture(&conformance_root().join("positive"), "outer_local").unwrap();
    let report = serialize_report(&lowered);
    let contexts = report["contexts"].as_array().unwrap();
    assert_eq!(contexts.len(), 2);
    assert_eq!(contexts[0]["dependencies"][0]["binding"]["scope"], "local");
    assert_eq!(contexts[0]["dependencies"][0]["binding"]["context"], 0);
    assert_eq!(contexts[1]["dependencies"][0]["binding"]["scope"], "free");
}
