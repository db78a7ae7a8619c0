use serde::{Deserialize, Serialize};

/// Verdict - Judgement Codes and Progress Markers
///
/// **Core Responsibility:**
/// One closed enumeration covers both the terminal judgement of a test case
/// (Accepted, Wrong Answer, ...) and the transient stage the run is in
/// (Compiling, Judging, ...). A result holds exactly one current verdict at
/// any time; stages advance monotonically until a terminal verdict lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// Fresh result placeholder and the "clean exit, not yet judged" marker.
    Unknown,
    Accepted,
    PartiallyCorrect,
    PresentationError,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    OutputLimitExceeded,
    RuntimeError,
    CompileError,
    SystemError,
    Compiling,
    Compiled,
    Judging,
    Judged,
    Comparing,
    Skipped,
    Rejected,
}

impl Verdict {
    /// Short machine name, stable across releases.
    pub fn name(&self) -> &'static str {
        match self {
            Verdict::Unknown => "UKE",
            Verdict::Accepted => "AC",
            Verdict::PartiallyCorrect => "PC",
            Verdict::PresentationError => "PE",
            Verdict::WrongAnswer => "WA",
            Verdict::TimeLimitExceeded => "TLE",
            Verdict::MemoryLimitExceeded => "MLE",
            Verdict::OutputLimitExceeded => "OLE",
            Verdict::RuntimeError => "RE",
            Verdict::CompileError => "CE",
            Verdict::SystemError => "SE",
            Verdict::Compiling => "CP",
            Verdict::Compiled => "CPD",
            Verdict::Judging => "JG",
            Verdict::Judged => "JGD",
            Verdict::Comparing => "CMP",
            Verdict::Skipped => "SK",
            Verdict::Rejected => "RJ",
        }
    }

    pub fn full_name(&self) -> &'static str {
        match self {
            Verdict::Unknown => "Unknown Error",
            Verdict::Accepted => "Accepted",
            Verdict::PartiallyCorrect => "Partially Correct",
            Verdict::PresentationError => "Presentation Error",
            Verdict::WrongAnswer => "Wrong Answer",
            Verdict::TimeLimitExceeded => "Time Limit Exceeded",
            Verdict::MemoryLimitExceeded => "Memory Limit Exceeded",
            Verdict::OutputLimitExceeded => "Output Limit Exceeded",
            Verdict::RuntimeError => "Runtime Error",
            Verdict::CompileError => "Compilation Error",
            Verdict::SystemError => "System Error",
            Verdict::Compiling => "Compiling",
            Verdict::Compiled => "Compiled",
            Verdict::Judging => "Judging",
            Verdict::Judged => "Judged",
            Verdict::Comparing => "Comparing",
            Verdict::Skipped => "Skipped",
            Verdict::Rejected => "Rejected",
        }
    }

    /// Display color as a `#rrggbb` hex string.
    pub fn color(&self) -> &'static str {
        match self {
            Verdict::Unknown => "#0000ff",
            Verdict::Accepted => "#49cd32",
            Verdict::PartiallyCorrect => "#ed9813",
            Verdict::PresentationError => "#ff778e",
            Verdict::WrongAnswer => "#d3140d",
            Verdict::TimeLimitExceeded => "#0c0066",
            Verdict::MemoryLimitExceeded => "#5300a7",
            Verdict::OutputLimitExceeded => "#8300a7",
            Verdict::RuntimeError => "#1a26c8",
            Verdict::CompileError => "#8b7400",
            Verdict::SystemError => "#000000",
            Verdict::Compiling => "#5e19ff",
            Verdict::Compiled => "#7340ff",
            Verdict::Judging => "#844fff",
            Verdict::Judged => "#967fff",
            Verdict::Comparing => "#a87dff",
            Verdict::Skipped => "#4b4b4b",
            Verdict::Rejected => "#4e0000",
        }
    }

    /// True while a run is still in progress for this result.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Verdict::Compiling
                | Verdict::Compiled
                | Verdict::Judging
                | Verdict::Judged
                | Verdict::Comparing
        )
    }

    /// True for terminal verdicts the operator should look at.
    /// Accepted, Skipped and Rejected are quiet outcomes.
    pub fn needs_attention(&self) -> bool {
        !self.is_transient()
            && !matches!(
                self,
                Verdict::Accepted | Verdict::Skipped | Verdict::Rejected
            )
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
