//! Deterministic differential suite orchestration.
//!
//! Loads a case-list document, pre-pulls the native oracle image, drives the
//! single-test pipeline for every case in order, classifies each against its
//! declared expectation, and writes `differential/summary.json`. A pull
//! failure aborts the whole suite; a failing case never does.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use emuparity_error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::command::{ContainerSpec, build_pull_cmd, resolve_path};
use crate::exec::{RunStatus, run_command};
use crate::pipeline::{CompareOptions, PipelineConfig, run_pipeline};
use crate::record::{Mode, MismatchPointer, RunRecord};

/// Version of the suite summary schema.
pub const SUITE_SCHEMA_VERSION: u32 = 1;

/// Expected environment/version noise filtered out of every comparison.
pub const DEFAULT_COMPARE_IGNORE_REGEXES: [&str; 14] = [
    r"^$",
    r"^release: .*$",
    r"^PATH=.*$",
    r"^  PATH=.*$",
    r"^  HOSTNAME=.*$",
    r"^  TERM=.*$",
    r"^snprintf works: .*$",
    r"^Unable to find image '.*' locally$",
    r"^[A-Za-z0-9._/-]+: Pulling from .*$",
    r"^[0-9a-f]{12}: Pulling fs layer$",
    r"^[0-9a-f]{12}: Download complete$",
    r"^[0-9a-f]{12}: Pull complete$",
    r"^Digest: sha256:.*$",
    r"^Status: Downloaded newer image for .*$",
];

const DEFAULT_TIMEOUT_SECS: f64 = 120.0;
const IMAGE_PULL_TIMEOUT: Duration = Duration::from_secs(600);

/// Whether a case is supposed to match or to diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedOutcome {
    Match,
    Mismatch,
}

/// Suite-wide defaults from the case-list document.
#[derive(Debug, Clone, Deserialize)]
pub struct SuiteDefaults {
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default)]
    pub compare_ignore_line_regex: Vec<String>,
}

impl Default for SuiteDefaults {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_SECS,
            compare_ignore_line_regex: Vec::new(),
        }
    }
}

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_expected() -> ExpectedOutcome {
    ExpectedOutcome::Match
}

/// One deterministic case.
#[derive(Debug, Clone, Deserialize)]
pub struct SuiteCase {
    pub name: String,
    /// Binary path, resolved against the suite root when relative.
    pub binary: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_expected")]
    pub expected: ExpectedOutcome,
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub compare_ignore_line_regex: Vec<String>,
}

/// The case-list document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuiteFile {
    #[serde(default)]
    pub defaults: SuiteDefaults,
    #[serde(default)]
    pub cases: Vec<SuiteCase>,
}

impl SuiteFile {
    /// Loads and validates the case list; an empty list is rejected before
    /// anything runs.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let suite: SuiteFile = serde_json::from_slice(&bytes).map_err(|err| {
            HarnessError::Parse {
                path: path.display().to_string(),
                message: err.to_string(),
            }
        })?;
        if suite.cases.is_empty() {
            return Err(HarnessError::Config("no cases defined".to_string()));
        }
        Ok(suite)
    }
}

/// Per-case entry in the suite summary.
#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub name: String,
    pub binary: String,
    pub args: Vec<String>,
    pub expected: ExpectedOutcome,
    pub compare_match: bool,
    pub compare_rc: Option<i32>,
    pub first_mismatch_artifact: Option<MismatchPointer>,
    pub result_json: String,
    pub runner_return_code: i32,
}

/// The suite summary document.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteSummary {
    pub schema_version: u32,
    pub cases_file: String,
    pub analyzer: String,
    pub root: String,
    pub native_container_image: String,
    pub native_container_platform: String,
    pub total_cases: usize,
    pub passed: usize,
    pub expected_mismatches: usize,
    pub unexpected_failures: usize,
    pub results: Vec<CaseResult>,
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    pub cases_file: PathBuf,
    pub analyzer: PathBuf,
    pub root: PathBuf,
    pub artifacts_dir: PathBuf,
    pub native_container_image: String,
    pub native_container_platform: String,
    /// Run the native oracle directly on the host instead of in a container.
    pub containerize_native: bool,
    pub extra_ignore_regexes: Vec<String>,
    /// Apply [`DEFAULT_COMPARE_IGNORE_REGEXES`] on top of explicit filters.
    pub default_noise_regexes: bool,
    pub skip_image_pull: bool,
    pub timeout_override: Option<f64>,
    pub summary_output: Option<PathBuf>,
}

/// Runs every case and writes the summary document.
pub fn run_suite(config: &SuiteConfig) -> Result<SuiteSummary> {
    let suite = SuiteFile::load(&config.cases_file)?;
    let default_timeout = config.timeout_override.unwrap_or(suite.defaults.timeout);

    let differential_dir = config.artifacts_dir.join("differential");
    fs::create_dir_all(&differential_dir)?;
    let summary_path = config
        .summary_output
        .clone()
        .unwrap_or_else(|| differential_dir.join("summary.json"));

    if config.containerize_native && !config.skip_image_pull {
        pull_native_image(
            &config.native_container_image,
            &config.native_container_platform,
        )?;
    }

    let mut summary = SuiteSummary {
        schema_version: SUITE_SCHEMA_VERSION,
        cases_file: config.cases_file.display().to_string(),
        analyzer: config.analyzer.display().to_string(),
        root: config.root.display().to_string(),
        native_container_image: config.native_container_image.clone(),
        native_container_platform: config.native_container_platform.clone(),
        total_cases: suite.cases.len(),
        passed: 0,
        expected_mismatches: 0,
        unexpected_failures: 0,
        results: Vec::new(),
    };

    for case in &suite.cases {
        let binary = resolve_path(&config.root, &case.binary);
        let timeout = case.timeout.unwrap_or(default_timeout);
        let result_json = differential_dir.join(format!("{}.result.json", case.name));

        let mut ignore = Vec::new();
        if config.default_noise_regexes {
            ignore.extend(DEFAULT_COMPARE_IGNORE_REGEXES.iter().map(|s| (*s).to_string()));
        }
        ignore.extend(config.extra_ignore_regexes.iter().cloned());
        ignore.extend(suite.defaults.compare_ignore_line_regex.iter().cloned());
        ignore.extend(case.compare_ignore_line_regex.iter().cloned());

        let native_container = config.containerize_native.then(|| ContainerSpec {
            image: config.native_container_image.clone(),
            platform: config.native_container_platform.clone(),
            mount_host: config.root.clone(),
            mount_guest: "/work".to_string(),
        });

        let pipeline = PipelineConfig {
            mode: Mode::Both,
            binary: binary.clone(),
            binary_args: case.args.clone(),
            test_name: case.name.clone(),
            seed: None,
            analyzer: config.analyzer.clone(),
            root: config.root.clone(),
            timeout: Duration::from_secs_f64(timeout),
            cwd: None,
            native_env: BTreeMap::new(),
            emu_env: BTreeMap::new(),
            native_container,
            artifacts_dir: config.artifacts_dir.clone(),
            output: Some(result_json.clone()),
            compare: true,
            compare_options: CompareOptions {
                path_maps: vec![
                    (config.root.display().to_string(), "<ROOT>".to_string()),
                    ("/work".to_string(), "<ROOT>".to_string()),
                ],
                ignore_line_regexes: ignore,
                ..CompareOptions::default()
            },
        };

        let (runner_return_code, record) = match run_pipeline(&pipeline) {
            Ok(report) => (i32::from(report.exit_code()), Some(report.record)),
            Err(err) => {
                warn!(case = %case.name, error = %err, "pipeline invocation failed");
                (2, None)
            }
        };

        let outcome = classify_case(case.expected, record.as_ref());
        if outcome.passed {
            summary.passed += 1;
            if case.expected == ExpectedOutcome::Mismatch {
                summary.expected_mismatches += 1;
                println!("TEST:{}:PASS:expected-mismatch", case.name);
            } else {
                println!("TEST:{}:PASS:match", case.name);
            }
        } else {
            summary.unexpected_failures += 1;
            println!("TEST:{}:FAIL:{}", case.name, outcome.failure_reason);
        }

        summary.results.push(CaseResult {
            name: case.name.clone(),
            binary: binary.display().to_string(),
            args: case.args.clone(),
            expected: case.expected,
            compare_match: outcome.compare_match,
            compare_rc: outcome.compare_rc,
            first_mismatch_artifact: record
                .as_ref()
                .and_then(|r| r.first_mismatch_artifact.clone()),
            result_json: result_json.display().to_string(),
            runner_return_code,
        });
    }

    crate::artifact::write_json_pretty(&summary_path, &summary)?;
    info!(
        summary = %summary_path.display(),
        passed = summary.passed,
        unexpected_failures = summary.unexpected_failures,
        "suite finished"
    );
    println!(
        "{}",
        serde_json::json!({
            "summary_json": summary_path.display().to_string(),
            "total": summary.total_cases,
            "unexpected_failures": summary.unexpected_failures,
        })
    );
    Ok(summary)
}

struct CaseOutcome {
    passed: bool,
    compare_match: bool,
    compare_rc: Option<i32>,
    failure_reason: String,
}

/// Declared expectation versus observed verdict.
///
/// A run that produced no readable record is an unexpected failure even when
/// a mismatch was expected; "the harness broke" never counts as divergence.
fn classify_case(expected: ExpectedOutcome, record: Option<&RunRecord>) -> CaseOutcome {
    let Some(record) = record else {
        return CaseOutcome {
            passed: false,
            compare_match: false,
            compare_rc: None,
            failure_reason: "missing result.json".to_string(),
        };
    };

    let compare = record.compare.as_ref();
    let compare_rc = compare.map(|section| section.return_code);
    let compare_match = compare
        .and_then(|section| section.summary.as_ref())
        .is_some_and(|summary| summary.is_match);

    let passed = match expected {
        ExpectedOutcome::Match => compare_match,
        ExpectedOutcome::Mismatch => !compare_match,
    };

    let failure_reason = if passed {
        String::new()
    } else {
        match expected {
            ExpectedOutcome::Match => format!(
                "unexpected mismatch (compare_rc={})",
                compare_rc.map_or_else(|| "none".to_string(), |rc| rc.to_string())
            ),
            ExpectedOutcome::Mismatch => "expected mismatch but outputs matched".to_string(),
        }
    };

    CaseOutcome {
        passed,
        compare_match,
        compare_rc,
        failure_reason,
    }
}

fn pull_native_image(image: &str, platform: &str) -> Result<()> {
    info!(image, platform, "pulling native oracle image");
    let cmd = build_pull_cmd(image, platform);
    let outcome = run_command(&cmd, None, &BTreeMap::new(), IMAGE_PULL_TIMEOUT);
    if outcome.status == RunStatus::Ok && outcome.exit_code == Some(0) {
        return Ok(());
    }
    error!(
        image,
        status = ?outcome.status,
        exit_code = ?outcome.exit_code,
        "native oracle image pull failed"
    );
    Err(HarnessError::ImagePull(format!(
        "failed to pull image {image}: {}",
        outcome.stderr.trim()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RESULT_SCHEMA_VERSION, ReproInfo};
    use std::io::Write;

    fn write_cases(json: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cases.json");
        let mut file = fs::File::create(&path).expect("create");
        file.write_all(json.as_bytes()).expect("write");
        (dir, path)
    }

    fn record_with_compare(is_match: bool) -> RunRecord {
        let verdict = crate::compare::CompareVerdict {
            is_match,
            checks: crate::compare::CompareChecks {
                exit_code: is_match,
                timed_out: true,
                stdout: is_match,
                stderr: true,
            },
            native: crate::compare::SideSummary {
                exit_code: Some(0),
                timed_out: false,
            },
            emu: crate::compare::SideSummary {
                exit_code: Some(if is_match { 0 } else { 1 }),
                timed_out: false,
            },
            diff: crate::compare::StreamDiffs {
                stdout: String::new(),
                stderr: String::new(),
            },
        };
        RunRecord {
            schema_version: RESULT_SCHEMA_VERSION,
            run_id: "t-20260830T000000Z".to_string(),
            created_at: "2026-08-30T00:00:00Z".to_string(),
            test_name: "t".to_string(),
            seed: 1,
            binary: "/bin/true".to_string(),
            binary_args: Vec::new(),
            root: "/repo".to_string(),
            mode: Mode::Both,
            native: None,
            emu: None,
            repro: ReproInfo::default(),
            compare: Some(crate::record::CompareSection {
                enabled: true,
                return_code: i32::from(!is_match),
                summary: Some(verdict),
                compare_json: None,
            }),
            first_mismatch_artifact: None,
        }
    }

    #[test]
    fn suite_file_defaults_apply() {
        let (_dir, path) = write_cases(
            r#"{"cases": [{"name": "a", "binary": "bin/a"}]}"#,
        );
        let suite = SuiteFile::load(&path).expect("load");
        assert!((suite.defaults.timeout - 120.0).abs() < f64::EPSILON);
        assert_eq!(suite.cases[0].expected, ExpectedOutcome::Match);
        assert!(suite.cases[0].args.is_empty());
    }

    #[test]
    fn empty_case_list_is_rejected() {
        let (_dir, path) = write_cases(r#"{"cases": []}"#);
        let err = SuiteFile::load(&path).unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn unknown_expected_value_fails_to_parse() {
        let (_dir, path) = write_cases(
            r#"{"cases": [{"name": "a", "binary": "b", "expected": "flaky"}]}"#,
        );
        assert!(matches!(
            SuiteFile::load(&path).unwrap_err(),
            HarnessError::Parse { .. }
        ));
    }

    #[test]
    fn classify_matches_expectation_table() {
        let matched = record_with_compare(true);
        let diverged = record_with_compare(false);

        assert!(classify_case(ExpectedOutcome::Match, Some(&matched)).passed);
        assert!(classify_case(ExpectedOutcome::Mismatch, Some(&diverged)).passed);

        let unexpected = classify_case(ExpectedOutcome::Match, Some(&diverged));
        assert!(!unexpected.passed);
        assert_eq!(
            unexpected.failure_reason,
            "unexpected mismatch (compare_rc=1)"
        );

        let surprise_match = classify_case(ExpectedOutcome::Mismatch, Some(&matched));
        assert!(!surprise_match.passed);
        assert_eq!(
            surprise_match.failure_reason,
            "expected mismatch but outputs matched"
        );
    }

    #[test]
    fn missing_record_never_passes() {
        for expected in [ExpectedOutcome::Match, ExpectedOutcome::Mismatch] {
            let outcome = classify_case(expected, None);
            assert!(!outcome.passed, "expected={expected:?}");
            assert_eq!(outcome.failure_reason, "missing result.json");
        }
    }
}
