//! Single-test differential pipeline.
//!
//! One invocation runs the requested sides strictly in sequence (native
//! first), persists the run record and canonical artifacts, optionally
//! compares, and freezes first-mismatch evidence. Exit policy: 2 for
//! infrastructure trouble (a side failed to run cleanly), 1 for a requested
//! comparison that mismatched, 0 otherwise.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use emuparity_error::Result;
use tracing::info;

use crate::artifact::{ArtifactStore, write_json_pretty};
use crate::command::{ContainerSpec, build_emu_cmd, build_native_cmd, build_native_container_cmd};
use crate::compare::compare_outcomes;
use crate::exec::{RunStatus, run_command, utc_now_iso};
use crate::normalize::{NormalizeConfig, compile_patterns};
use crate::record::{
    CompareSection, ContainerRepro, Mode, RESULT_SCHEMA_VERSION, ReproCommand, ReproInfo,
    RunRecord, derive_seed, make_run_id,
};

/// Emulator chatter dropped from comparisons unless explicitly kept.
pub const DEFAULT_COMPARE_NOISE_REGEXES: [&str; 6] = [
    r"^\[INFO\].*$",
    r"^\[WARN\].*$",
    r"^\[ERROR\].*$",
    r"^--- Emulation finished ---$",
    r"^Exit status: .*$",
    r"^Instructions executed: .*$",
];

/// Normalization knobs for the in-pipeline comparison.
#[derive(Debug, Clone)]
pub struct CompareOptions {
    pub path_maps: Vec<(String, String)>,
    pub ignore_line_regexes: Vec<String>,
    pub strip_ansi: bool,
    pub mask_hex: bool,
    pub mask_pid_like: bool,
    /// Apply [`DEFAULT_COMPARE_NOISE_REGEXES`] on top of the explicit filters.
    pub default_noise_filter: bool,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            path_maps: Vec::new(),
            ignore_line_regexes: Vec::new(),
            strip_ansi: true,
            mask_hex: true,
            mask_pid_like: true,
            default_noise_filter: true,
        }
    }
}

impl CompareOptions {
    /// Compiles these options into normalization settings.
    pub fn to_normalize_config(&self) -> Result<NormalizeConfig> {
        let mut patterns = self.ignore_line_regexes.clone();
        if self.default_noise_filter {
            patterns.extend(DEFAULT_COMPARE_NOISE_REGEXES.iter().map(|s| (*s).to_string()));
        }
        Ok(NormalizeConfig {
            strip_ansi: self.strip_ansi,
            mask_hex: self.mask_hex,
            mask_pid_like: self.mask_pid_like,
            path_maps: self.path_maps.clone(),
            ignore_line_patterns: compile_patterns(&patterns)?,
        })
    }
}

/// Fully explicit configuration for one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mode: Mode,
    pub binary: PathBuf,
    pub binary_args: Vec<String>,
    pub test_name: String,
    /// Recorded for replay; `None` derives one from the clock.
    pub seed: Option<u64>,
    pub analyzer: PathBuf,
    pub root: PathBuf,
    pub timeout: Duration,
    pub cwd: Option<PathBuf>,
    pub native_env: BTreeMap<String, String>,
    pub emu_env: BTreeMap<String, String>,
    /// When set, the native oracle runs inside this container.
    pub native_container: Option<ContainerSpec>,
    pub artifacts_dir: PathBuf,
    /// Run-record location; defaults to `<artifacts_dir>/result.json`.
    pub output: Option<PathBuf>,
    pub compare: bool,
    pub compare_options: CompareOptions,
}

/// What one pipeline invocation produced.
#[derive(Debug)]
pub struct PipelineReport {
    pub record: RunRecord,
    pub result_json: PathBuf,
    pub infra_failure: bool,
    pub compare_failed: bool,
}

impl PipelineReport {
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.infra_failure {
            2
        } else if self.compare_failed {
            1
        } else {
            0
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        !self.infra_failure && !self.compare_failed
    }
}

/// Runs the configured sides, persists everything, and reports.
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineReport> {
    let compare_enabled = config.compare && config.mode == Mode::Both;
    // Bad filter patterns are a configuration error; surface them before
    // spawning anything.
    let normalize = if compare_enabled {
        Some(config.compare_options.to_normalize_config()?)
    } else {
        None
    };

    let run_id = make_run_id(&config.test_name);
    let seed = derive_seed(config.seed);
    let store = ArtifactStore::new(&config.artifacts_dir)?;
    let output_path = config
        .output
        .clone()
        .unwrap_or_else(|| config.artifacts_dir.join("result.json"));

    let mut record = RunRecord {
        schema_version: RESULT_SCHEMA_VERSION,
        run_id: run_id.clone(),
        created_at: utc_now_iso(),
        test_name: config.test_name.clone(),
        seed,
        binary: config.binary.display().to_string(),
        binary_args: config.binary_args.clone(),
        root: config.root.display().to_string(),
        mode: config.mode,
        native: None,
        emu: None,
        repro: ReproInfo::default(),
        compare: None,
        first_mismatch_artifact: None,
    };

    let cwd = config.cwd.as_deref();
    let cwd_text = config.cwd.as_ref().map(|dir| dir.display().to_string());

    if config.mode.runs_native() {
        let mut native_cmd = build_native_cmd(&config.binary, &config.binary_args);
        let mut container = None;
        if let Some(spec) = &config.native_container {
            native_cmd = build_native_container_cmd(&native_cmd, spec, &config.native_env);
            container = Some(ContainerRepro {
                image: spec.image.clone(),
                platform: spec.platform.clone(),
                mount_host: spec.mount_host.display().to_string(),
                mount_guest: spec.mount_guest.clone(),
            });
        }
        record.repro.native = Some(ReproCommand {
            command: native_cmd.clone(),
            cwd: cwd_text.clone(),
            env_overrides: config.native_env.clone(),
            container,
        });

        // Containerized runs receive overrides via `-e`; only direct runs get
        // them in the child environment itself.
        let direct_env = if config.native_container.is_some() {
            BTreeMap::new()
        } else {
            config.native_env.clone()
        };
        info!(test_name = %config.test_name, run_id = %run_id, side = "native", "running native oracle");
        record.native = Some(run_command(&native_cmd, cwd, &direct_env, config.timeout));
    }

    if config.mode.runs_emu() {
        let emu_cmd = build_emu_cmd(
            &config.analyzer,
            &config.root,
            &config.binary,
            &config.binary_args,
        );
        record.repro.emu = Some(ReproCommand {
            command: emu_cmd.clone(),
            cwd: cwd_text,
            env_overrides: config.emu_env.clone(),
            container: None,
        });
        info!(test_name = %config.test_name, run_id = %run_id, side = "emu", "running emulated binary");
        record.emu = Some(run_command(&emu_cmd, cwd, &config.emu_env, config.timeout));
    }

    write_json_pretty(&output_path, &record)?;
    store.persist_run(&record)?;

    let compare_path = store.compare_json_path(&run_id);
    let mut compare_section = CompareSection {
        enabled: compare_enabled,
        return_code: 0,
        summary: None,
        compare_json: None,
    };
    let mut compare_failed = false;

    if let Some(normalize) = &normalize {
        if let (Some(native), Some(emu)) = (&record.native, &record.emu) {
            let verdict = compare_outcomes(native, emu, normalize);
            write_json_pretty(&compare_path, &verdict)?;
            if !verdict.is_match {
                compare_section.return_code = 1;
                compare_failed = true;
            }
            compare_section.compare_json = Some(compare_path.display().to_string());
            compare_section.summary = Some(verdict);
        }
    }
    record.compare = Some(compare_section);

    if compare_failed {
        record.first_mismatch_artifact = Some(store.capture_first_mismatch(&record)?);
    }

    // Rewrite with the verdict and mismatch pointer folded in.
    write_json_pretty(&output_path, &record)?;

    if let Some(pointer) = &record.first_mismatch_artifact {
        store.attach_documents(pointer, &output_path, &compare_path)?;
    }

    let infra_failure = record
        .native
        .iter()
        .chain(record.emu.iter())
        .any(|outcome| outcome.status != RunStatus::Ok);

    let passed = !infra_failure && !compare_failed;
    println!(
        "TEST:{}:{}:run_id={run_id}",
        config.test_name,
        if passed { "PASS" } else { "FAIL" }
    );
    println!(
        "{}",
        serde_json::json!({
            "run_id": run_id,
            "result_json": output_path.display().to_string(),
        })
    );

    Ok(PipelineReport {
        record,
        result_json: output_path,
        infra_failure,
        compare_failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_options_fold_in_default_noise_filters() {
        let options = CompareOptions {
            ignore_line_regexes: vec!["^extra$".to_string()],
            ..CompareOptions::default()
        };
        let config = options.to_normalize_config().expect("compile");
        assert_eq!(
            config.ignore_line_patterns.len(),
            1 + DEFAULT_COMPARE_NOISE_REGEXES.len()
        );
        assert!(config.strip_ansi && config.mask_hex && config.mask_pid_like);
    }

    #[test]
    fn disabling_the_noise_filter_keeps_only_explicit_patterns() {
        let options = CompareOptions {
            ignore_line_regexes: vec!["^extra$".to_string()],
            default_noise_filter: false,
            ..CompareOptions::default()
        };
        let config = options.to_normalize_config().expect("compile");
        assert_eq!(config.ignore_line_patterns.len(), 1);
    }

    #[test]
    fn bad_filter_pattern_is_a_configuration_error() {
        let options = CompareOptions {
            ignore_line_regexes: vec!["([".to_string()],
            ..CompareOptions::default()
        };
        assert!(options.to_normalize_config().is_err());
    }

    #[test]
    fn exit_code_policy_prefers_infrastructure_failures() {
        let record = RunRecord {
            schema_version: RESULT_SCHEMA_VERSION,
            run_id: "t-20260830T000000Z".to_string(),
            created_at: utc_now_iso(),
            test_name: "t".to_string(),
            seed: 0,
            binary: "b".to_string(),
            binary_args: Vec::new(),
            root: "/".to_string(),
            mode: Mode::Both,
            native: None,
            emu: None,
            repro: ReproInfo::default(),
            compare: None,
            first_mismatch_artifact: None,
        };
        let report = PipelineReport {
            record,
            result_json: PathBuf::from("result.json"),
            infra_failure: true,
            compare_failed: true,
        };
        assert_eq!(report.exit_code(), 2);
        assert!(!report.passed());
    }
}
