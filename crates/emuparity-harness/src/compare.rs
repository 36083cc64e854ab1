//! Comparison of native and emulated run outcomes.
//!
//! Exit codes and timeout flags compare raw; stdout and stderr compare after
//! normalization. Mismatching streams carry a unified diff with three lines
//! of context so a triager can read the verdict without re-running anything.

use serde::{Deserialize, Serialize};

use crate::exec::RunOutcome;
use crate::normalize::{NormalizeConfig, normalize_text};

/// Raw per-side facts echoed into the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideSummary {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// One boolean per compared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareChecks {
    pub exit_code: bool,
    pub timed_out: bool,
    pub stdout: bool,
    pub stderr: bool,
}

/// Unified diffs for mismatching streams; empty strings when a stream matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDiffs {
    pub stdout: String,
    pub stderr: String,
}

/// Complete comparison verdict, serialized as the compare summary document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareVerdict {
    #[serde(rename = "match")]
    pub is_match: bool,
    pub checks: CompareChecks,
    pub native: SideSummary,
    pub emu: SideSummary,
    pub diff: StreamDiffs,
}

/// Compares two outcomes under the given normalization settings.
#[must_use]
pub fn compare_outcomes(
    native: &RunOutcome,
    emu: &RunOutcome,
    config: &NormalizeConfig,
) -> CompareVerdict {
    let native_stdout = normalize_text(&native.stdout, config);
    let emu_stdout = normalize_text(&emu.stdout, config);
    let native_stderr = normalize_text(&native.stderr, config);
    let emu_stderr = normalize_text(&emu.stderr, config);

    let checks = CompareChecks {
        exit_code: native.exit_code == emu.exit_code,
        timed_out: native.timed_out == emu.timed_out,
        stdout: native_stdout == emu_stdout,
        stderr: native_stderr == emu_stderr,
    };
    let is_match = checks.exit_code && checks.timed_out && checks.stdout && checks.stderr;

    CompareVerdict {
        is_match,
        checks,
        native: SideSummary {
            exit_code: native.exit_code,
            timed_out: native.timed_out,
        },
        emu: SideSummary {
            exit_code: emu.exit_code,
            timed_out: emu.timed_out,
        },
        diff: StreamDiffs {
            stdout: if checks.stdout {
                String::new()
            } else {
                unified_diff(&native_stdout, &emu_stdout, "native.stdout", "emu.stdout")
            },
            stderr: if checks.stderr {
                String::new()
            } else {
                unified_diff(&native_stderr, &emu_stderr, "native.stderr", "emu.stderr")
            },
        },
    }
}

// ─── unified diff ────────────────────────────────────────────────────────────

const CONTEXT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Equal,
    Replace,
    Delete,
    Insert,
}

#[derive(Debug, Clone, Copy)]
struct Opcode {
    tag: Tag,
    a1: usize,
    a2: usize,
    b1: usize,
    b2: usize,
}

/// Renders a unified diff of `a` against `b` with three context lines.
/// Returns an empty string when the inputs are line-identical.
#[must_use]
pub fn unified_diff(a: &str, b: &str, from_name: &str, to_name: &str) -> String {
    let a_lines = split_lines(a);
    let b_lines = split_lines(b);
    let codes = opcodes(&a_lines, &b_lines);
    let groups = group_opcodes(codes);

    let mut out = String::new();
    for (index, group) in groups.iter().enumerate() {
        if index == 0 {
            out.push_str("--- ");
            out.push_str(from_name);
            out.push('\n');
            out.push_str("+++ ");
            out.push_str(to_name);
            out.push('\n');
        }
        let Some((first, last)) = group.first().zip(group.last()) else {
            continue;
        };
        out.push_str(&format!(
            "@@ -{} +{} @@\n",
            format_range(first.a1, last.a2),
            format_range(first.b1, last.b2)
        ));
        for code in group {
            match code.tag {
                Tag::Equal => push_lines(&mut out, ' ', &a_lines[code.a1..code.a2]),
                Tag::Delete => push_lines(&mut out, '-', &a_lines[code.a1..code.a2]),
                Tag::Insert => push_lines(&mut out, '+', &b_lines[code.b1..code.b2]),
                Tag::Replace => {
                    push_lines(&mut out, '-', &a_lines[code.a1..code.a2]);
                    push_lines(&mut out, '+', &b_lines[code.b1..code.b2]);
                }
            }
        }
    }
    out
}

fn push_lines(out: &mut String, marker: char, lines: &[&str]) {
    for line in lines {
        out.push(marker);
        out.push_str(line);
        out.push('\n');
    }
}

/// `start,length` hunk range, one-based, with the single-line shorthand.
fn format_range(start: usize, stop: usize) -> String {
    let length = stop - start;
    if length == 1 {
        return format!("{}", start + 1);
    }
    let beginning = if length == 0 { start } else { start + 1 };
    format!("{beginning},{length}")
}

/// Splits into lines without terminators, ignoring a trailing newline.
fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

/// Longest-common-subsequence match pairs, then merged edit opcodes.
fn opcodes(a: &[&str], b: &[&str]) -> Vec<Opcode> {
    let n = a.len();
    let m = b.len();

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut pairs = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < n && j < m {
        if a[i] == b[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }

    let mut ops = Vec::new();
    let (mut ai, mut bi) = (0usize, 0usize);
    let mut k = 0usize;
    loop {
        let (next_a, next_b) = pairs.get(k).copied().unwrap_or((n, m));
        if ai < next_a || bi < next_b {
            let tag = if ai < next_a && bi < next_b {
                Tag::Replace
            } else if ai < next_a {
                Tag::Delete
            } else {
                Tag::Insert
            };
            ops.push(Opcode {
                tag,
                a1: ai,
                a2: next_a,
                b1: bi,
                b2: next_b,
            });
        }
        if k >= pairs.len() {
            break;
        }
        let start = pairs[k];
        while k + 1 < pairs.len() && pairs[k + 1] == (pairs[k].0 + 1, pairs[k].1 + 1) {
            k += 1;
        }
        let end = (pairs[k].0 + 1, pairs[k].1 + 1);
        ops.push(Opcode {
            tag: Tag::Equal,
            a1: start.0,
            a2: end.0,
            b1: start.1,
            b2: end.1,
        });
        ai = end.0;
        bi = end.1;
        k += 1;
    }
    ops
}

/// Groups opcodes into hunks, trimming equal runs to the context width.
fn group_opcodes(mut codes: Vec<Opcode>) -> Vec<Vec<Opcode>> {
    if codes.is_empty() {
        return Vec::new();
    }
    if let Some(first) = codes.first_mut() {
        if first.tag == Tag::Equal {
            first.a1 = first.a1.max(first.a2.saturating_sub(CONTEXT));
            first.b1 = first.b1.max(first.b2.saturating_sub(CONTEXT));
        }
    }
    if let Some(last) = codes.last_mut() {
        if last.tag == Tag::Equal {
            last.a2 = last.a2.min(last.a1 + CONTEXT);
            last.b2 = last.b2.min(last.b1 + CONTEXT);
        }
    }

    let mut groups: Vec<Vec<Opcode>> = Vec::new();
    let mut group: Vec<Opcode> = Vec::new();
    for mut code in codes {
        if code.tag == Tag::Equal && code.a2 - code.a1 > 2 * CONTEXT {
            group.push(Opcode {
                tag: Tag::Equal,
                a1: code.a1,
                a2: code.a1 + CONTEXT,
                b1: code.b1,
                b2: code.b1 + CONTEXT,
            });
            groups.push(std::mem::take(&mut group));
            code.a1 = code.a2 - CONTEXT;
            code.b1 = code.b2 - CONTEXT;
        }
        group.push(code);
    }
    if !group.iter().all(|code| code.tag == Tag::Equal) {
        groups.push(group);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(exit_code: Option<i32>, timed_out: bool, stdout: &str, stderr: &str) -> RunOutcome {
        RunOutcome {
            status: crate::exec::RunStatus::Ok,
            timed_out,
            exit_code,
            command: vec!["test".to_string()],
            cwd: None,
            started_at: "2026-08-30T00:00:00Z".to_string(),
            finished_at: "2026-08-30T00:00:01Z".to_string(),
            duration_ms: 1000,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn identical_outcomes_match_on_every_check() {
        let native = outcome(Some(0), false, "out\n", "");
        let verdict = compare_outcomes(&native, &native.clone(), &NormalizeConfig::masking());
        assert!(verdict.is_match);
        assert!(verdict.checks.exit_code && verdict.checks.stdout);
        assert_eq!(verdict.diff.stdout, "");
        assert_eq!(verdict.diff.stderr, "");
    }

    #[test]
    fn exit_code_difference_leaves_stream_checks_true() {
        let native = outcome(Some(0), false, "same\n", "");
        let emu = outcome(Some(1), false, "same\n", "");
        let verdict = compare_outcomes(&native, &emu, &NormalizeConfig::masking());
        assert!(!verdict.is_match);
        assert!(!verdict.checks.exit_code);
        assert!(verdict.checks.timed_out);
        assert!(verdict.checks.stdout);
        assert!(verdict.checks.stderr);
        assert_eq!(verdict.diff.stdout, "");
    }

    #[test]
    fn timed_out_flags_compare_as_booleans() {
        let native = outcome(None, true, "", "");
        let emu = outcome(None, false, "", "");
        let verdict = compare_outcomes(&native, &emu, &NormalizeConfig::masking());
        assert!(!verdict.checks.timed_out);
        assert!(verdict.checks.exit_code);
    }

    #[test]
    fn normalization_absorbs_masked_noise() {
        let native = outcome(Some(0), false, "addr 0x1234\n", "");
        let emu = outcome(Some(0), false, "addr 0xBEEF\n", "");
        let verdict = compare_outcomes(&native, &emu, &NormalizeConfig::masking());
        assert!(verdict.is_match);
    }

    #[test]
    fn stream_mismatch_carries_labeled_diff() {
        let native = outcome(Some(0), false, "a\nb\n", "");
        let emu = outcome(Some(0), false, "a\nc\n", "");
        let verdict = compare_outcomes(&native, &emu, &NormalizeConfig::masking());
        assert!(!verdict.is_match);
        assert!(verdict.diff.stdout.starts_with("--- native.stdout\n+++ emu.stdout\n"));
        assert!(verdict.diff.stdout.contains("-b\n"));
        assert!(verdict.diff.stdout.contains("+c\n"));
    }

    #[test]
    fn diff_of_equal_inputs_is_empty() {
        assert_eq!(unified_diff("x\ny\n", "x\ny\n", "l", "r"), "");
    }

    #[test]
    fn diff_limits_context_to_three_lines() {
        let a = "1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n";
        let b = "1\n2\n3\n4\n5\nX\n7\n8\n9\n10\n";
        let diff = unified_diff(a, b, "l", "r");
        assert_eq!(
            diff,
            "--- l\n+++ r\n@@ -3,7 +3,7 @@\n 3\n 4\n 5\n-6\n+X\n 7\n 8\n 9\n"
        );
    }

    #[test]
    fn distant_edits_split_into_separate_hunks() {
        let a = "1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n11\n12\n13\n14\n15\n";
        let b = "X\n2\n3\n4\n5\n6\n7\n8\n9\n10\n11\n12\n13\n14\nY\n";
        let diff = unified_diff(a, b, "l", "r");
        let hunks = diff.matches("@@ -").count();
        assert_eq!(hunks, 2, "diff:\n{diff}");
        assert!(diff.contains("-1\n+X\n"));
        assert!(diff.contains("-15\n+Y\n"));
    }

    #[test]
    fn pure_insert_against_empty_input() {
        let diff = unified_diff("", "only\n", "l", "r");
        assert_eq!(diff, "--- l\n+++ r\n@@ -0,0 +1 @@\n+only\n");
    }

    #[test]
    fn verdict_serializes_match_field_name() {
        let native = outcome(Some(0), false, "", "");
        let verdict = compare_outcomes(&native, &native.clone(), &NormalizeConfig::masking());
        let json = serde_json::to_value(&verdict).expect("serialize");
        assert_eq!(json["match"], serde_json::Value::Bool(true));
        assert_eq!(json["checks"]["stdout"], serde_json::Value::Bool(true));
    }
}
