//! Persisted run-record schema.
//!
//! `result.json` is the canonical document for one harness invocation. It is
//! written once after the runs and rewritten after comparison so the final
//! file always carries the verdict and any mismatch pointer. Readers validate
//! `schema_version` before trusting anything else.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use emuparity_error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::compare::CompareVerdict;
use crate::exec::RunOutcome;

/// Version of the run-record schema.
pub const RESULT_SCHEMA_VERSION: u32 = 1;

/// Which sides of the differential to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Native,
    Emu,
    Both,
}

impl Mode {
    #[must_use]
    pub fn runs_native(self) -> bool {
        matches!(self, Mode::Native | Mode::Both)
    }

    #[must_use]
    pub fn runs_emu(self) -> bool {
        matches!(self, Mode::Emu | Mode::Both)
    }
}

impl FromStr for Mode {
    type Err = HarnessError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "native" => Ok(Mode::Native),
            "emu" => Ok(Mode::Emu),
            "both" => Ok(Mode::Both),
            other => Err(HarnessError::Config(format!(
                "invalid mode '{other}', expected native, emu, or both"
            ))),
        }
    }
}

/// Container settings echoed into the repro section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRepro {
    pub image: String,
    pub platform: String,
    pub mount_host: String,
    pub mount_guest: String,
}

/// Exact command recorded for replaying one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReproCommand {
    pub command: Vec<String>,
    pub cwd: Option<String>,
    pub env_overrides: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerRepro>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReproInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<ReproCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emu: Option<ReproCommand>,
}

/// Comparison state embedded in the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareSection {
    pub enabled: bool,
    /// 0 on match, 1 on mismatch; stays 0 when comparison is disabled.
    pub return_code: i32,
    pub summary: Option<CompareVerdict>,
    pub compare_json: Option<String>,
}

/// Pointer to the first-mismatch capture for this test name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MismatchPointer {
    pub path: String,
    /// True only on the run that created the capture.
    pub created: bool,
}

/// The full run-record document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub schema_version: u32,
    pub run_id: String,
    pub created_at: String,
    pub test_name: String,
    pub seed: u64,
    pub binary: String,
    pub binary_args: Vec<String>,
    pub root: String,
    pub mode: Mode,
    pub native: Option<RunOutcome>,
    pub emu: Option<RunOutcome>,
    pub repro: ReproInfo,
    #[serde(default)]
    pub compare: Option<CompareSection>,
    #[serde(default)]
    pub first_mismatch_artifact: Option<MismatchPointer>,
}

impl RunRecord {
    /// Reads and validates a run record from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let record: RunRecord = serde_json::from_slice(&bytes).map_err(|err| {
            HarnessError::Parse {
                path: path.display().to_string(),
                message: err.to_string(),
            }
        })?;
        if record.schema_version != RESULT_SCHEMA_VERSION {
            warn!(
                path = %path.display(),
                expected = RESULT_SCHEMA_VERSION,
                found = record.schema_version,
                "run record schema version mismatch"
            );
            return Err(HarnessError::SchemaVersion {
                path: path.display().to_string(),
                expected: RESULT_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(record)
    }
}

/// Run identifier: test name plus a compact UTC timestamp.
#[must_use]
pub fn make_run_id(test_name: &str) -> String {
    format!("{test_name}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"))
}

/// The recorded seed: the explicit one, or current unix seconds.
#[must_use]
pub fn derive_seed(explicit: Option<u64>) -> u64 {
    explicit.unwrap_or_else(|| u64::try_from(Utc::now().timestamp()).unwrap_or(0))
}

/// Collapses a test name into a filesystem-safe token.
///
/// Runs of characters outside `[A-Za-z0-9_.-]` become one underscore, then
/// leading and trailing `.`/`_` are stripped.
#[must_use]
pub fn safe_name(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_gap = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-') {
            if pending_gap {
                out.push('_');
                pending_gap = false;
            }
            out.push(ch);
        } else {
            pending_gap = true;
        }
    }
    let trimmed = out.trim_matches(['.', '_']);
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}
