//! Must-pass baseline orchestration.
//!
//! Runs every baseline test emulator-only, then checks the persisted record
//! against the declared exit code and required stdout substrings. All failure
//! reasons for a test are accumulated and reported together.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use emuparity_error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifact::write_json_pretty;
use crate::command::resolve_path;
use crate::pipeline::{CompareOptions, PipelineConfig, run_pipeline};
use crate::record::{Mode, RunRecord};

/// Version of the must-pass summary schema.
pub const MUSTPASS_SCHEMA_VERSION: u32 = 1;

/// One baseline expectation.
#[derive(Debug, Clone, Deserialize)]
pub struct MustPassTest {
    pub name: String,
    /// Binary path, resolved against the emulation root when relative.
    pub binary: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub expected_exit: i32,
    #[serde(default)]
    pub stdout_contains: Vec<String>,
}

/// The baseline document.
#[derive(Debug, Clone, Deserialize)]
pub struct BaselineFile {
    #[serde(default)]
    pub tests: Vec<MustPassTest>,
}

impl BaselineFile {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let baseline: BaselineFile = serde_json::from_slice(&bytes).map_err(|err| {
            HarnessError::Parse {
                path: path.display().to_string(),
                message: err.to_string(),
            }
        })?;
        if baseline.tests.is_empty() {
            return Err(HarnessError::Config("baseline has no tests".to_string()));
        }
        Ok(baseline)
    }
}

/// Per-test entry in the must-pass summary.
#[derive(Debug, Clone, Serialize)]
pub struct MustPassResult {
    pub name: String,
    pub passed: bool,
    pub reasons: Vec<String>,
    pub result_json: String,
}

/// The must-pass summary document.
#[derive(Debug, Clone, Serialize)]
pub struct MustPassSummary {
    pub schema_version: u32,
    pub baseline: String,
    pub analyzer: String,
    pub root: String,
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<MustPassResult>,
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct MustPassConfig {
    pub baseline: PathBuf,
    pub analyzer: PathBuf,
    pub root: PathBuf,
    pub artifacts_dir: PathBuf,
    pub timeout: f64,
}

/// Runs the baseline slice and writes `mustpass/summary.json`.
pub fn run_mustpass(config: &MustPassConfig) -> Result<MustPassSummary> {
    let baseline = BaselineFile::load(&config.baseline)?;
    let mustpass_dir = config.artifacts_dir.join("mustpass");
    fs::create_dir_all(&mustpass_dir)?;

    let mut summary = MustPassSummary {
        schema_version: MUSTPASS_SCHEMA_VERSION,
        baseline: config.baseline.display().to_string(),
        analyzer: config.analyzer.display().to_string(),
        root: config.root.display().to_string(),
        total_tests: baseline.tests.len(),
        passed: 0,
        failed: 0,
        results: Vec::new(),
    };

    for test in &baseline.tests {
        let binary = resolve_path(&config.root, &test.binary);
        let result_json = mustpass_dir.join(format!("{}.result.json", test.name));

        let pipeline = PipelineConfig {
            mode: Mode::Emu,
            binary,
            binary_args: test.args.clone(),
            test_name: test.name.clone(),
            seed: None,
            analyzer: config.analyzer.clone(),
            root: config.root.clone(),
            timeout: Duration::from_secs_f64(config.timeout),
            cwd: None,
            native_env: BTreeMap::new(),
            emu_env: BTreeMap::new(),
            native_container: None,
            artifacts_dir: config.artifacts_dir.clone(),
            output: Some(result_json.clone()),
            compare: false,
            compare_options: CompareOptions::default(),
        };

        let record = match run_pipeline(&pipeline).and_then(|_| RunRecord::load(&result_json)) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(test = %test.name, error = %err, "must-pass run produced no record");
                None
            }
        };

        let reasons = check_record(test, record.as_ref());
        if reasons.is_empty() {
            summary.passed += 1;
            println!("TEST:{}:PASS:must-pass", test.name);
        } else {
            summary.failed += 1;
            println!("TEST:{}:FAIL:{}", test.name, reasons.join("; "));
        }
        summary.results.push(MustPassResult {
            name: test.name.clone(),
            passed: reasons.is_empty(),
            reasons,
            result_json: result_json.display().to_string(),
        });
    }

    write_json_pretty(&mustpass_dir.join("summary.json"), &summary)?;
    info!(
        passed = summary.passed,
        failed = summary.failed,
        "must-pass slice finished"
    );
    Ok(summary)
}

/// All reasons the record fails the expectation; empty means pass.
fn check_record(test: &MustPassTest, record: Option<&RunRecord>) -> Vec<String> {
    let Some(record) = record else {
        return vec!["missing result.json".to_string()];
    };

    let mut reasons = Vec::new();
    let (exit_code, stdout) = record
        .emu
        .as_ref()
        .map_or((None, ""), |emu| (emu.exit_code, emu.stdout.as_str()));

    if exit_code != Some(test.expected_exit) {
        reasons.push(format!(
            "exit={} expected={}",
            exit_code.map_or_else(|| "none".to_string(), |code| code.to_string()),
            test.expected_exit
        ));
    }
    for token in &test.stdout_contains {
        if !stdout.contains(token) {
            reasons.push(format!("missing_stdout_token={token:?}"));
        }
    }
    reasons
}
