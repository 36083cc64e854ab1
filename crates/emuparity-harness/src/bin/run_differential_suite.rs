//! Runs the deterministic native-vs-emulated differential suite.
//!
//! Exit codes: 0 all cases behaved as declared, 1 unexpected failures,
//! 2 infrastructure or configuration failure (including a failed image pull).

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use emuparity_harness::log::init_tracing;
use emuparity_harness::suite::{SuiteConfig, run_suite};

#[derive(Debug)]
struct Config {
    cases: PathBuf,
    analyzer: PathBuf,
    root: PathBuf,
    artifacts_dir: PathBuf,
    native_container_image: String,
    native_container_platform: String,
    containerize_native: bool,
    extra_ignore_regexes: Vec<String>,
    default_noise_regexes: bool,
    skip_image_pull: bool,
    timeout: Option<f64>,
    summary_output: Option<PathBuf>,
}

impl Config {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut cases = None;
        let mut analyzer = None;
        let mut root = PathBuf::from(".");
        let mut artifacts_dir = PathBuf::from("artifacts");
        let mut native_container_image = "debian:bookworm-slim".to_string();
        let mut native_container_platform = "linux/amd64".to_string();
        let mut containerize_native = true;
        let mut extra_ignore_regexes = Vec::new();
        let mut default_noise_regexes = true;
        let mut skip_image_pull = false;
        let mut timeout = None;
        let mut summary_output = None;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--cases" => cases = Some(PathBuf::from(require(&mut iter, arg)?)),
                "--analyzer" => analyzer = Some(PathBuf::from(require(&mut iter, arg)?)),
                "--root" => root = PathBuf::from(require(&mut iter, arg)?),
                "--artifacts-dir" => artifacts_dir = PathBuf::from(require(&mut iter, arg)?),
                "--native-container-image" => {
                    native_container_image = require(&mut iter, arg)?.clone();
                }
                "--native-container-platform" => {
                    native_container_platform = require(&mut iter, arg)?.clone();
                }
                "--no-native-container" => containerize_native = false,
                "--compare-ignore-line-regex" => {
                    extra_ignore_regexes.push(require(&mut iter, arg)?.clone());
                }
                "--no-default-compare-normalization" => default_noise_regexes = false,
                "--skip-docker-pull" => skip_image_pull = true,
                "--timeout" => {
                    let value: f64 = require(&mut iter, arg)?
                        .parse()
                        .map_err(|err| format!("invalid --timeout: {err}"))?;
                    if value <= 0.0 {
                        return Err("--timeout must be positive".to_string());
                    }
                    timeout = Some(value);
                }
                "--summary-output" => {
                    summary_output = Some(PathBuf::from(require(&mut iter, arg)?));
                }
                other => return Err(format!("unknown argument '{other}'")),
            }
        }

        Ok(Self {
            cases: cases.ok_or("missing required --cases")?,
            analyzer: analyzer.ok_or("missing required --analyzer")?,
            root,
            artifacts_dir,
            native_container_image,
            native_container_platform,
            containerize_native,
            extra_ignore_regexes,
            default_noise_regexes,
            skip_image_pull,
            timeout,
            summary_output,
        })
    }

    fn into_suite(self) -> SuiteConfig {
        SuiteConfig {
            cases_file: self.cases,
            analyzer: self.analyzer,
            root: self.root,
            artifacts_dir: self.artifacts_dir,
            native_container_image: self.native_container_image,
            native_container_platform: self.native_container_platform,
            containerize_native: self.containerize_native,
            extra_ignore_regexes: self.extra_ignore_regexes,
            default_noise_regexes: self.default_noise_regexes,
            skip_image_pull: self.skip_image_pull,
            timeout_override: self.timeout,
            summary_output: self.summary_output,
        }
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
        "Usage: run_differential_suite --cases PATH --analyzer PATH [OPTIONS]

Options:
  --cases PATH                     deterministic case-list document (required)
  --analyzer PATH                  emulator/analyzer executable (required)
  --root PATH                      emulation root, host path (default: .)
  --artifacts-dir PATH             artifact base directory (default: artifacts)
  --native-container-image IMAGE   native oracle image (default: debian:bookworm-slim)
  --native-container-platform P    native oracle platform (default: linux/amd64)
  --no-native-container            run the native oracle directly on the host
  --compare-ignore-line-regex RE   additional ignore-line regex (repeatable)
  --no-default-compare-normalization
                                   disable the built-in env/version noise filters
  --skip-docker-pull               skip pre-pulling the native oracle image
  --timeout SECS                   override the timeout for every case
  --summary-output PATH            summary document location
  -h, --help                       show this help"
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

    match run_suite(&config.into_suite()) {
        Ok(summary) if summary.unexpected_failures == 0 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn parses_defaults() {
        let config =
            Config::parse(&args(&["--cases", "c.json", "--analyzer", "/a"])).expect("parse");
        assert_eq!(config.native_container_image, "debian:bookworm-slim");
        assert_eq!(config.native_container_platform, "linux/amd64");
        assert!(config.containerize_native);
        assert!(config.default_noise_regexes);
        assert!(!config.skip_image_pull);
        assert!(config.timeout.is_none());
    }

    #[test]
    fn missing_cases_is_rejected() {
        let err = Config::parse(&args(&["--analyzer", "/a"])).unwrap_err();
        assert!(err.contains("--cases"), "{err}");
    }

    #[test]
    fn ignore_regexes_are_repeatable() {
        let config = Config::parse(&args(&[
            "--cases", "c.json", "--analyzer", "/a",
            "--compare-ignore-line-regex", "^x$",
            "--compare-ignore-line-regex", "^y$",
        ]))
        .expect("parse");
        assert_eq!(config.extra_ignore_regexes, vec!["^x$", "^y$"]);
    }

    #[test]
    fn container_can_be_disabled() {
        let config = Config::parse(&args(&[
            "--cases", "c.json", "--analyzer", "/a", "--no-native-container",
        ]))
        .expect("parse");
        assert!(!config.containerize_native);
    }
}
