//! Compares persisted native and emulated run documents.
//!
//! Accepts either a combined run record (`--result-json`) or two standalone
//! run documents (`--pair`). Exit codes: 0 match, 1 mismatch, 2 bad input.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use emuparity_error::{HarnessError, Result};
use emuparity_harness::artifact::write_json_pretty;
use emuparity_harness::compare::compare_outcomes;
use emuparity_harness::exec::RunOutcome;
use emuparity_harness::log::init_tracing;
use emuparity_harness::normalize::{NormalizeConfig, compile_patterns, parse_path_maps};
use emuparity_harness::record::RunRecord;

struct Config {
    result_json: Option<PathBuf>,
    pair: Option<(PathBuf, PathBuf)>,
    path_maps: Vec<String>,
    ignore_line_regexes: Vec<String>,
    keep_ansi: bool,
    keep_hex: bool,
    keep_pid_like: bool,
    output: Option<PathBuf>,
    quiet: bool,
}

impl Config {
    fn parse(args: &[String]) -> std::result::Result<Self, String> {
        let mut result_json = None;
        let mut pair = None;
        let mut path_maps = Vec::new();
        let mut ignore_line_regexes = Vec::new();
        let mut keep_ansi = false;
        let mut keep_hex = false;
        let mut keep_pid_like = false;
        let mut output = None;
        let mut quiet = false;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--result-json" => result_json = Some(PathBuf::from(require(&mut iter, arg)?)),
                "--pair" => {
                    let native = PathBuf::from(require(&mut iter, arg)?);
                    let emu = PathBuf::from(require(&mut iter, arg)?);
                    pair = Some((native, emu));
                }
                "--path-map" => path_maps.push(require(&mut iter, arg)?.clone()),
                "--ignore-line-regex" => {
                    ignore_line_regexes.push(require(&mut iter, arg)?.clone());
                }
                "--keep-ansi" => keep_ansi = true,
                "--keep-hex" => keep_hex = true,
                "--keep-pid-like" => keep_pid_like = true,
                "--output" => output = Some(PathBuf::from(require(&mut iter, arg)?)),
                "--quiet" => quiet = true,
                other => return Err(format!("unknown argument '{other}'")),
            }
        }

        match (&result_json, &pair) {
            (None, None) => return Err("one of --result-json or --pair is required".to_string()),
            (Some(_), Some(_)) => {
                return Err("--result-json and --pair are mutually exclusive".to_string());
            }
            _ => {}
        }

        Ok(Self {
            result_json,
            pair,
            path_maps,
            ignore_line_regexes,
            keep_ansi,
            keep_hex,
            keep_pid_like,
            output,
            quiet,
        })
    }
}

fn require<'a>(
    iter: &mut std::slice::Iter<'a, String>,
    flag: &str,
) -> std::result::Result<&'a String, String> {
    iter.next().ok_or_else(|| format!("missing value for {flag}"))
}

fn load_sides(config: &Config) -> Result<(RunOutcome, RunOutcome)> {
    if let Some(path) = &config.result_json {
        let record = RunRecord::load(path)?;
        match (record.native, record.emu) {
            (Some(native), Some(emu)) => Ok((native, emu)),
            _ => Err(HarnessError::Config(
                "run record must contain both native and emu sections".to_string(),
            )),
        }
    } else if let Some((native_path, emu_path)) = &config.pair {
        Ok((RunOutcome::load(native_path)?, RunOutcome::load(emu_path)?))
    } else {
        Err(HarnessError::Config("no input document given".to_string()))
    }
}

/// Returns `Ok(true)` when all checks match.
fn run(config: &Config) -> Result<bool> {
    let (native, emu) = load_sides(config)?;

    let normalize = NormalizeConfig {
        strip_ansi: !config.keep_ansi,
        mask_hex: !config.keep_hex,
        mask_pid_like: !config.keep_pid_like,
        path_maps: parse_path_maps(&config.path_maps)?,
        ignore_line_patterns: compile_patterns(&config.ignore_line_regexes)?,
    };

    let verdict = compare_outcomes(&native, &emu, &normalize);

    if let Some(path) = &config.output {
        write_json_pretty(path, &verdict)?;
    }

    if !config.quiet {
        let checks = serde_json::to_string_pretty(&verdict.checks)
            .map_err(|err| HarnessError::Serialize(err.to_string()))?;
        println!("{checks}");
        if !verdict.is_match {
            if !verdict.diff.stdout.is_empty() {
                println!("\n--- stdout diff ---");
                print!("{}", verdict.diff.stdout);
            }
            if !verdict.diff.stderr.is_empty() {
                println!("\n--- stderr diff ---");
                print!("{}", verdict.diff.stderr);
            }
        }
    }

    Ok(verdict.is_match)
}

fn print_help() {
    println!(
        "Usage: compare_results (--result-json PATH | --pair NATIVE EMU) [OPTIONS]

Options:
  --result-json PATH       combined run record with native and emu sections
  --pair NATIVE EMU        two standalone run documents
  --path-map OLD=NEW       path substitution before comparison (repeatable)
  --ignore-line-regex RE   drop matching lines before comparison (repeatable)
  --keep-ansi              do not strip ANSI escape sequences
  --keep-hex               do not mask hex literals
  --keep-pid-like          do not mask pid/ppid/tid/tgid values
  --output PATH            write the compare summary document here
  --quiet                  suppress the human-readable summary
  -h, --help               show this help"
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

    match run(&config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}
