//! Output normalization applied to both sides before comparison.
//!
//! The pass order is part of the contract: line endings, ANSI stripping, hex
//! masking, pid-like masking, literal path substitution, line filtering, and
//! finally per-line trailing-whitespace trim. Masking runs before path
//! substitution so a map target containing hex-like text cannot un-mask
//! addresses. The full pipeline is idempotent.

use std::sync::LazyLock;

use emuparity_error::{HarnessError, Result};
use regex::{Captures, Regex};

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("static pattern"));
static HEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0x[0-9a-fA-F]+").expect("static pattern"));
static PID_LIKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(pid|ppid|tid|tgid)\s*[:=]\s*-?\d+\b").expect("static pattern"));

/// Normalization settings for one comparison.
#[derive(Debug, Clone, Default)]
pub struct NormalizeConfig {
    pub strip_ansi: bool,
    pub mask_hex: bool,
    pub mask_pid_like: bool,
    /// Ordered literal substitutions, applied old -> new.
    pub path_maps: Vec<(String, String)>,
    /// Lines matching any pattern are dropped entirely.
    pub ignore_line_patterns: Vec<Regex>,
}

impl NormalizeConfig {
    /// Settings with all maskers enabled and no maps or filters.
    #[must_use]
    pub fn masking() -> Self {
        Self {
            strip_ansi: true,
            mask_hex: true,
            mask_pid_like: true,
            path_maps: Vec::new(),
            ignore_line_patterns: Vec::new(),
        }
    }
}

/// Compiles user-supplied line-filter patterns, failing on the first bad one.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|err| HarnessError::Pattern {
                pattern: pattern.clone(),
                message: err.to_string(),
            })
        })
        .collect()
}

/// Parses `OLD=NEW` substitution pairs.
pub fn parse_path_maps(items: &[String]) -> Result<Vec<(String, String)>> {
    items
        .iter()
        .map(|item| {
            item.split_once('=')
                .map(|(old, new)| (old.to_string(), new.to_string()))
                .ok_or_else(|| {
                    HarnessError::Config(format!("invalid path map '{item}', expected OLD=NEW"))
                })
        })
        .collect()
}

/// Applies the full normalization pipeline to `text`.
#[must_use]
pub fn normalize_text(text: &str, config: &NormalizeConfig) -> String {
    let mut out = text.replace("\r\n", "\n").replace('\r', "\n");

    if config.strip_ansi {
        out = ANSI_RE.replace_all(&out, "").into_owned();
    }
    if config.mask_hex {
        out = HEX_RE.replace_all(&out, "<HEX>").into_owned();
    }
    if config.mask_pid_like {
        out = PID_LIKE_RE
            .replace_all(&out, |caps: &Captures<'_>| format!("{}=<N>", &caps[1]))
            .into_owned();
    }

    for (old, new) in &config.path_maps {
        out = out.replace(old.as_str(), new.as_str());
    }

    if !config.ignore_line_patterns.is_empty() {
        let kept: Vec<&str> = out
            .split('\n')
            .filter(|line| {
                !config
                    .ignore_line_patterns
                    .iter()
                    .any(|pattern| pattern.is_match(line))
            })
            .collect();
        out = kept.join("\n");
    }

    out.split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}
