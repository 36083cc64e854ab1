//! Runs one test binary natively and/or under the emulator, optionally
//! comparing the two runs and persisting artifacts.
//!
//! Exit codes: 0 success, 1 comparison mismatch, 2 infrastructure or
//! configuration failure.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use emuparity_harness::command::ContainerSpec;
use emuparity_harness::log::init_tracing;
use emuparity_harness::pipeline::{CompareOptions, PipelineConfig, run_pipeline};
use emuparity_harness::record::Mode;

#[derive(Debug)]
struct Config {
    mode: Mode,
    binary: PathBuf,
    root: PathBuf,
    analyzer: PathBuf,
    timeout_secs: f64,
    seed: Option<u64>,
    test_name: Option<String>,
    cwd: Option<PathBuf>,
    native_env: BTreeMap<String, String>,
    emu_env: BTreeMap<String, String>,
    container_image: Option<String>,
    container_platform: String,
    container_mount_host: Option<PathBuf>,
    container_mount_guest: String,
    artifacts_dir: PathBuf,
    output: Option<PathBuf>,
    compare: bool,
    compare_path_maps: Vec<String>,
    compare_ignore_regexes: Vec<String>,
    default_noise_filter: bool,
    binary_args: Vec<String>,
}

impl Config {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut mode = Mode::Both;
        let mut binary: Option<PathBuf> = None;
        let mut root = PathBuf::from(".");
        let mut analyzer: Option<PathBuf> = None;
        let mut timeout_secs = 120.0;
        let mut seed = None;
        let mut test_name = None;
        let mut cwd = None;
        let mut native_env = BTreeMap::new();
        let mut emu_env = BTreeMap::new();
        let mut container_image = None;
        let mut container_platform = "linux/amd64".to_string();
        let mut container_mount_host = None;
        let mut container_mount_guest = "/work".to_string();
        let mut artifacts_dir = PathBuf::from("artifacts");
        let mut output = None;
        let mut compare = false;
        let mut compare_path_maps = Vec::new();
        let mut compare_ignore_regexes = Vec::new();
        let mut default_noise_filter = true;
        let mut binary_args = Vec::new();

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--mode" => mode = require(&mut iter, arg)?.parse().map_err(stringify)?,
                "--binary" => binary = Some(PathBuf::from(require(&mut iter, arg)?)),
                "--root" => root = PathBuf::from(require(&mut iter, arg)?),
                "--analyzer" => analyzer = Some(PathBuf::from(require(&mut iter, arg)?)),
                "--timeout" => timeout_secs = parse_timeout(require(&mut iter, arg)?)?,
                "--seed" => {
                    seed = Some(require(&mut iter, arg)?.parse::<u64>().map_err(|err| {
                        format!("invalid --seed: {err}")
                    })?);
                }
                "--test-name" => test_name = Some(require(&mut iter, arg)?.clone()),
                "--cwd" => cwd = Some(PathBuf::from(require(&mut iter, arg)?)),
                "--native-env" => {
                    let (key, value) = parse_env(require(&mut iter, arg)?)?;
                    native_env.insert(key, value);
                }
                "--emu-env" => {
                    let (key, value) = parse_env(require(&mut iter, arg)?)?;
                    emu_env.insert(key, value);
                }
                "--native-container-image" => {
                    container_image = Some(require(&mut iter, arg)?.clone());
                }
                "--native-container-platform" => {
                    container_platform = require(&mut iter, arg)?.clone();
                }
                "--native-container-mount-host" => {
                    container_mount_host = Some(PathBuf::from(require(&mut iter, arg)?));
                }
                "--native-container-mount-guest" => {
                    container_mount_guest = require(&mut iter, arg)?.clone();
                }
                "--artifacts-dir" => artifacts_dir = PathBuf::from(require(&mut iter, arg)?),
                "--output" => output = Some(PathBuf::from(require(&mut iter, arg)?)),
                "--compare" => compare = true,
                "--compare-path-map" => {
                    compare_path_maps.push(require(&mut iter, arg)?.clone());
                }
                "--compare-ignore-line-regex" => {
                    compare_ignore_regexes.push(require(&mut iter, arg)?.clone());
                }
                "--no-default-compare-noise-filter" => default_noise_filter = false,
                "--" => {
                    binary_args.extend(iter.by_ref().cloned());
                }
                other => return Err(format!("unknown argument '{other}'")),
            }
        }

        let binary = binary.ok_or("missing required --binary")?;
        let analyzer = analyzer.ok_or("missing required --analyzer")?;
        Ok(Self {
            mode,
            binary,
            root,
            analyzer,
            timeout_secs,
            seed,
            test_name,
            cwd,
            native_env,
            emu_env,
            container_image,
            container_platform,
            container_mount_host,
            container_mount_guest,
            artifacts_dir,
            output,
            compare,
            compare_path_maps,
            compare_ignore_regexes,
            default_noise_filter,
            binary_args,
        })
    }

    fn into_pipeline(self) -> Result<PipelineConfig, String> {
        let test_name = self.test_name.clone().unwrap_or_else(|| {
            self.binary
                .file_stem()
                .map_or_else(|| "unnamed".to_string(), |stem| stem.to_string_lossy().into_owned())
        });

        let native_container = self.container_image.map(|image| ContainerSpec {
            image,
            platform: self.container_platform,
            mount_host: self.container_mount_host.unwrap_or_else(|| self.root.clone()),
            mount_guest: self.container_mount_guest,
        });

        let path_maps = self
            .compare_path_maps
            .iter()
            .map(|item| {
                item.split_once('=')
                    .map(|(old, new)| (old.to_string(), new.to_string()))
                    .ok_or_else(|| format!("invalid --compare-path-map '{item}', expected OLD=NEW"))
            })
            .collect::<Result<Vec<_>, String>>()?;

        Ok(PipelineConfig {
            mode: self.mode,
            binary: self.binary,
            binary_args: self.binary_args,
            test_name,
            seed: self.seed,
            analyzer: self.analyzer,
            root: self.root,
            timeout: Duration::from_secs_f64(self.timeout_secs),
            cwd: self.cwd,
            native_env: self.native_env,
            emu_env: self.emu_env,
            native_container,
            artifacts_dir: self.artifacts_dir,
            output: self.output,
            compare: self.compare,
            compare_options: CompareOptions {
                path_maps,
                ignore_line_regexes: self.compare_ignore_regexes,
                default_noise_filter: self.default_noise_filter,
                ..CompareOptions::default()
            },
        })
    }
}

fn require<'a>(
    iter: &mut std::slice::Iter<'a, String>,
    flag: &str,
) -> Result<&'a String, String> {
    iter.next().ok_or_else(|| format!("missing value for {flag}"))
}

fn parse_env(item: &str) -> Result<(String, String), String> {
    item.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("invalid env override '{item}', expected KEY=VALUE"))
}

fn parse_timeout(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .parse()
        .map_err(|err| format!("invalid --timeout: {err}"))?;
    if value <= 0.0 {
        return Err("--timeout must be positive".to_string());
    }
    Ok(value)
}

fn stringify(err: impl std::fmt::Display) -> String {
    err.to_string()
}

fn print_help() {
    println!(
        "Usage: run_native_vs_emu --binary PATH --analyzer PATH [OPTIONS] [-- ARGS...]

Options:
  --mode MODE                          native, emu, or both (default: both)
  --binary PATH                        test binary to run (required)
  --analyzer PATH                      emulator/analyzer executable (required)
  --root PATH                          emulation root (default: .)
  --timeout SECS                       per-run timeout (default: 120)
  --seed N                             deterministic seed to record
  --test-name NAME                     logical test name (default: binary stem)
  --cwd PATH                           working directory for child runs
  --native-env KEY=VALUE               native env override (repeatable)
  --emu-env KEY=VALUE                  emu env override (repeatable)
  --native-container-image IMAGE       run native oracle in this docker image
  --native-container-platform PLAT     container platform (default: linux/amd64)
  --native-container-mount-host PATH   host mount (default: --root)
  --native-container-mount-guest PATH  guest mount point (default: /work)
  --artifacts-dir PATH                 artifact base directory (default: artifacts)
  --output PATH                        result.json location
  --compare                            compare native and emu after both run
  --compare-path-map OLD=NEW           path substitution for compare (repeatable)
  --compare-ignore-line-regex RE       drop matching lines before compare (repeatable)
  --no-default-compare-noise-filter    keep emulator banner lines in the compare
  -h, --help                           show this help"
    );
}

fn main() -> ExitCode {
    init_tracing();
    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return ExitCode::SUCCESS;
    }

    let pipeline = match Config::parse(&args).and_then(Config::into_pipeline) {
        Ok(pipeline) => pipeline,
        Err(message) => {
            eprintln!("error: {message}");
            return ExitCode::from(2);
        }
    };

    match run_pipeline(&pipeline) {
        Ok(report) => ExitCode::from(report.exit_code()),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}
