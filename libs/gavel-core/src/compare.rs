use crate::config::ComparingSettings;
use crate::verdict::Verdict;

/// Output Comparator - Tiered Whitespace Tolerance
///
/// **Core Responsibility:**
/// Decide AC / PE / WA / OLE / RE from the solution's output, the expected
/// answer, and the solution's stderr. Two normalizations drive the tiers:
///
/// - *fixed*: trailing whitespace stripped from the whole text and from
///   every line, lines joined with `\n`. Differences here are formatting.
/// - *compressed*: every whitespace character removed. Differences here are
///   content.
///
/// Content is checked before formatting, so a compressed mismatch is always
/// a wrong answer and never downgraded to a presentation error. The
/// comparator is pure: same inputs, same verdict.
pub fn compare_outputs(
    stdout: &str,
    answer: &str,
    stderr: &str,
    settings: &ComparingSettings,
) -> Verdict {
    if !settings.ignore_stderr && !stderr.is_empty() {
        return Verdict::RuntimeError;
    }

    let fixed_out = fix(stdout);
    let fixed_ans = fix(answer);

    if let Some(ratio) = settings.ole_ratio {
        if ratio > 0 && fixed_out.len() as u64 > fixed_ans.len() as u64 * ratio {
            return Verdict::OutputLimitExceeded;
        }
    }

    if compress(stdout) != compress(answer) {
        return Verdict::WrongAnswer;
    }

    if fixed_out != fixed_ans {
        return if settings.pe_as_ac { Verdict::Accepted } else { Verdict::PresentationError };
    }

    Verdict::Accepted
}

fn fix(s: &str) -> String {
    s.trim_end().lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

fn compress(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}
