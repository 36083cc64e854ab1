//! Artifact layout and first-mismatch capture.
//!
//! Layout under the artifact base directory:
//! - `seed/`, `binary/`, `root/`: one small text file per run id
//! - `trace/`: the four captured stream files per run id
//! - `failures/<test>/first_mismatch/`: frozen evidence for the first
//!   mismatch of a test name; later mismatches never overwrite it

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use emuparity_error::{HarnessError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::record::{MismatchPointer, RunRecord, safe_name};

const STREAM_SUFFIXES: [&str; 4] = [
    "native.stdout.txt",
    "native.stderr.txt",
    "emu.stdout.txt",
    "emu.stderr.txt",
];

/// Handle on the artifact base directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base: PathBuf,
}

impl ArtifactStore {
    /// Opens the store, creating the canonical layout if needed.
    pub fn new(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        for sub in ["seed", "binary", "root", "trace"] {
            fs::create_dir_all(base.join(sub))?;
        }
        Ok(Self { base })
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    #[must_use]
    pub fn trace_dir(&self) -> PathBuf {
        self.base.join("trace")
    }

    /// Location of the compare summary document for a run.
    #[must_use]
    pub fn compare_json_path(&self, run_id: &str) -> PathBuf {
        self.base.join(format!("{run_id}.compare.json"))
    }

    /// Writes the per-run seed/binary/root markers and stream traces.
    pub fn persist_run(&self, record: &RunRecord) -> Result<()> {
        let run_id = &record.run_id;
        write_text(
            &self.base.join("seed").join(format!("{run_id}.seed")),
            &format!("{}\n", record.seed),
        )?;
        write_text(
            &self.base.join("binary").join(format!("{run_id}.txt")),
            &format!("{}\n", record.binary),
        )?;
        write_text(
            &self.base.join("root").join(format!("{run_id}.txt")),
            &format!("{}\n", record.root),
        )?;

        let trace = self.trace_dir();
        if let Some(native) = &record.native {
            write_text(&trace.join(format!("{run_id}.native.stdout.txt")), &native.stdout)?;
            write_text(&trace.join(format!("{run_id}.native.stderr.txt")), &native.stderr)?;
        }
        if let Some(emu) = &record.emu {
            write_text(&trace.join(format!("{run_id}.emu.stdout.txt")), &emu.stdout)?;
            write_text(&trace.join(format!("{run_id}.emu.stderr.txt")), &emu.stderr)?;
        }
        Ok(())
    }

    /// Captures first-mismatch evidence for the record's test name.
    ///
    /// The capture directory is claimed with a create-exclusive `create_dir`,
    /// so concurrent runners race safely: exactly one sees `created == true`
    /// and an existing capture is never touched again.
    pub fn capture_first_mismatch(&self, record: &RunRecord) -> Result<MismatchPointer> {
        let failure_root = self.base.join("failures").join(safe_name(&record.test_name));
        fs::create_dir_all(&failure_root)?;
        let dir = failure_root.join("first_mismatch");

        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Ok(MismatchPointer {
                    path: dir.display().to_string(),
                    created: false,
                });
            }
            Err(err) => return Err(err.into()),
        }

        write_text(&dir.join("run_id.txt"), &format!("{}\n", record.run_id))?;
        write_text(&dir.join("seed.txt"), &format!("{}\n", record.seed))?;
        write_text(&dir.join("binary.txt"), &format!("{}\n", record.binary))?;
        write_text(&dir.join("root.txt"), &format!("{}\n", record.root))?;

        let trace = self.trace_dir();
        let mut digests: BTreeMap<String, String> = BTreeMap::new();
        for suffix in STREAM_SUFFIXES {
            let name = format!("{}.{suffix}", record.run_id);
            let src = trace.join(&name);
            if src.exists() {
                let bytes = fs::read(&src)?;
                fs::write(dir.join(&name), &bytes)?;
                digests.insert(name, sha256_hex(&bytes));
            }
        }

        let mut manifest = String::new();
        for (name, digest) in &digests {
            let _ = writeln!(manifest, "{digest}  {name}");
        }
        write_text(&dir.join("streams.sha256"), &manifest)?;

        info!(
            test_name = %record.test_name,
            run_id = %record.run_id,
            path = %dir.display(),
            "captured first mismatch"
        );
        Ok(MismatchPointer {
            path: dir.display().to_string(),
            created: true,
        })
    }

    /// Copies the final result and compare documents into a fresh capture.
    /// No-op when the capture already existed.
    pub fn attach_documents(
        &self,
        pointer: &MismatchPointer,
        result_json: &Path,
        compare_json: &Path,
    ) -> Result<()> {
        if !pointer.created {
            return Ok(());
        }
        let dir = Path::new(&pointer.path);
        fs::copy(result_json, dir.join("result.json"))?;
        if compare_json.exists() {
            fs::copy(compare_json, dir.join("compare.json"))?;
        }
        Ok(())
    }
}

/// Whole-file text write, creating parent directories.
pub fn write_text(path: &Path, data: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data)?;
    Ok(())
}

/// Pretty-printed JSON write with a trailing newline.
pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut bytes = serde_json::to_vec_pretty(value)
        .map_err(|err| HarnessError::Serialize(err.to_string()))?;
    bytes.push(b'\n');
    fs::write(path, bytes)?;
    Ok(())
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{RunOutcome, RunStatus};
    use crate::record::{Mode, RESULT_SCHEMA_VERSION, ReproInfo};

    fn record(run_id: &str, test_name: &str) -> RunRecord {
        let outcome = RunOutcome {
            status: RunStatus::Ok,
            timed_out: false,
            exit_code: Some(0),
            command: vec!["/bin/true".to_string()],
            cwd: None,
            started_at: "2026-08-30T00:00:00Z".to_string(),
            finished_at: "2026-08-30T00:00:01Z".to_string(),
            duration_ms: 10,
            stdout: "native out\n".to_string(),
            stderr: String::new(),
        };
        let mut emu = outcome.clone();
        emu.stdout = "emu out\n".to_string();
        RunRecord {
            schema_version: RESULT_SCHEMA_VERSION,
            run_id: run_id.to_string(),
            created_at: "2026-08-30T00:00:00Z".to_string(),
            test_name: test_name.to_string(),
            seed: 11,
            binary: "/bin/true".to_string(),
            binary_args: Vec::new(),
            root: "/repo".to_string(),
            mode: Mode::Both,
            native: Some(outcome),
            emu: Some(emu),
            repro: ReproInfo::default(),
            compare: None,
            first_mismatch_artifact: None,
        }
    }

    #[test]
    fn new_creates_canonical_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path()).expect("store");
        for sub in ["seed", "binary", "root", "trace"] {
            assert!(store.base().join(sub).is_dir(), "missing {sub}");
        }
    }

    #[test]
    fn persist_run_writes_markers_and_traces() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path()).expect("store");
        let record = record("t-20260830T000000Z", "t");
        store.persist_run(&record).expect("persist");

        let seed = fs::read_to_string(dir.path().join("seed/t-20260830T000000Z.seed")).unwrap();
        assert_eq!(seed, "11\n");
        let native_out =
            fs::read_to_string(dir.path().join("trace/t-20260830T000000Z.native.stdout.txt"))
                .unwrap();
        assert_eq!(native_out, "native out\n");
        assert!(dir.path().join("trace/t-20260830T000000Z.emu.stderr.txt").exists());
    }

    #[test]
    fn first_mismatch_capture_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path()).expect("store");
        let first = record("t-20260830T000000Z", "case one");
        store.persist_run(&first).expect("persist");

        let pointer = store.capture_first_mismatch(&first).expect("capture");
        assert!(pointer.created);
        let capture_dir = PathBuf::from(&pointer.path);
        assert!(capture_dir.ends_with("failures/case_one/first_mismatch"));
        let recorded = fs::read_to_string(capture_dir.join("run_id.txt")).unwrap();
        assert_eq!(recorded, "t-20260830T000000Z\n");

        let second = record("t-20260830T000099Z", "case one");
        store.persist_run(&second).expect("persist");
        let again = store.capture_first_mismatch(&second).expect("capture");
        assert!(!again.created);
        assert_eq!(again.path, pointer.path);
        // The original evidence is untouched.
        let preserved = fs::read_to_string(capture_dir.join("run_id.txt")).unwrap();
        assert_eq!(preserved, "t-20260830T000000Z\n");
    }

    #[test]
    fn capture_copies_streams_with_integrity_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path()).expect("store");
        let record = record("t-20260830T000000Z", "t");
        store.persist_run(&record).expect("persist");
        let pointer = store.capture_first_mismatch(&record).expect("capture");
        let capture_dir = PathBuf::from(&pointer.path);

        for suffix in STREAM_SUFFIXES {
            assert!(
                capture_dir.join(format!("t-20260830T000000Z.{suffix}")).exists(),
                "missing {suffix}"
            );
        }
        let manifest = fs::read_to_string(capture_dir.join("streams.sha256")).unwrap();
        assert_eq!(manifest.lines().count(), 4);
        assert!(
            manifest.contains(&sha256_hex(b"native out\n")),
            "manifest: {manifest}"
        );
    }

    #[test]
    fn attach_documents_skips_existing_captures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path()).expect("store");
        let record = record("t-20260830T000000Z", "t");
        store.persist_run(&record).expect("persist");
        let pointer = store.capture_first_mismatch(&record).expect("capture");

        let result_json = dir.path().join("result.json");
        write_json_pretty(&result_json, &record).expect("write");
        let compare_json = dir.path().join("absent.compare.json");
        store
            .attach_documents(&pointer, &result_json, &compare_json)
            .expect("attach");
        assert!(PathBuf::from(&pointer.path).join("result.json").exists());
        assert!(!PathBuf::from(&pointer.path).join("compare.json").exists());

        let stale = MismatchPointer {
            path: pointer.path.clone(),
            created: false,
        };
        fs::remove_file(PathBuf::from(&pointer.path).join("result.json")).unwrap();
        store
            .attach_documents(&stale, &result_json, &compare_json)
            .expect("attach noop");
        assert!(!PathBuf::from(&pointer.path).join("result.json").exists());
    }

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
