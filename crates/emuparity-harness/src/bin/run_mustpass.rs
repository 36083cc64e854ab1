//! Runs the must-pass baseline slice under the emulator only.
//!
//! Exit codes: 0 every baseline test passed, 1 at least one failed,
//! 2 configuration failure (including an empty baseline).

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use emuparity_harness::log::init_tracing;
use emuparity_harness::mustpass::{MustPassConfig, run_mustpass};

#[derive(Debug)]
struct Config {
    baseline: PathBuf,
    analyzer: PathBuf,
    root: PathBuf,
    artifacts_dir: PathBuf,
    timeout: f64,
}

impl Config {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut baseline = None;
        let mut analyzer = None;
        let mut root = PathBuf::from(".");
        let mut artifacts_dir = PathBuf::from("artifacts");
        let mut timeout = 120.0;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--baseline" => baseline = Some(PathBuf::from(require(&mut iter, arg)?)),
                "--analyzer" => analyzer = Some(PathBuf::from(require(&mut iter, arg)?)),
                "--root" => root = PathBuf::from(require(&mut iter, arg)?),
                "--artifacts-dir" => artifacts_dir = PathBuf::from(require(&mut iter, arg)?),
                "--timeout" => {
                    timeout = require(&mut iter, arg)?
                        .parse()
                        .map_err(|err| format!("invalid --timeout: {err}"))?;
                    if timeout <= 0.0 {
                        return Err("--timeout must be positive".to_string());
                    }
                }
                other => return Err(format!("unknown argument '{other}'")),
            }
        }

        Ok(Self {
            baseline: baseline.ok_or("missing required --baseline")?,
            analyzer: analyzer.ok_or("missing required --analyzer")?,
            root,
            artifacts_dir,
            timeout,
        })
    }
}

fn require<'a>(
    iter: &mut std::slice::Iter<'a, String>,
    flag: &str,
) -> Result<&'a String, String> {
    iter.next().ok_or_else(|| format!("missing value for {flag}"))
}

fn print_help() {
    println!(
        "Usage: run_mustpass --baseline PATH --analyzer PATH [OPTIONS]

Options:
  --baseline PATH        must-pass baseline document (required)
  --analyzer PATH        emulator/analyzer executable (required)
  --root PATH            emulation root (default: .)
  --artifacts-dir PATH   artifact base directory (default: artifacts)
  --timeout SECS         per-test timeout (default: 120)
  -h, --help             show this help"
    );
}

fn main() -> ExitCode {
    init_tracing();
    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return ExitCode::SUCCESS;
    }

    let config = match Config::parse(&args) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("error: {message}");
            return ExitCode::from(2);
        }
    };

    let mustpass = MustPassConfig {
        baseline: config.baseline,
        analyzer: config.analyzer,
        root: config.root,
        artifacts_dir: config.artifacts_dir,
        timeout: config.timeout,
    };

    match run_mustpass(&mustpass) {
        Ok(summary) if summary.failed == 0 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}
