use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::cache::CachePool;
use crate::error::Result;
use crate::exec::{AbortKind, RawRun, RawStatus};
use crate::outcome::{Outcome, Settled};
use crate::types::IoData;
use crate::verdict::Verdict;

/// Process Result Interpreter
///
/// **Core Responsibility:**
/// Turn a raw execution outcome into a judging outcome. Launch failures,
/// kills, signals, and exit codes each map to a fixed verdict; a clean exit
/// stays open and carries the measured run data onward. The checker variant
/// additionally applies the testlib exit-code convention.
///
/// Settled outcomes keep the run's streams attached: a timed-out solution's
/// partial output is still worth showing.

/// Measured facts of one finished run.
#[derive(Debug, Clone)]
pub struct RunData {
    pub time_ms: f64,
    pub memory_mib: Option<f64>,
    pub stdout: IoData,
    pub stderr: IoData,
}

#[derive(Deserialize)]
struct WrapperData {
    /// Microseconds, per the wrapper protocol.
    time: f64,
}

fn wrapper_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)-----CPH DATA STARTS-----(\{.*?\})-----").expect("valid pattern")
    })
}

/// Scan stderr for the instrumentation block. Returns the refined time in
/// milliseconds when the block parses, and rewrites stderr with the block
/// stripped either way so delimiter noise never reaches the comparator.
async fn extract_wrapper_data(stderr: &mut IoData) -> Result<Option<f64>> {
    let raw = stderr.read().await?;
    let Some(caps) = wrapper_regex().captures(&raw) else {
        return Ok(None);
    };

    let json = caps.get(1).map(|m| m.as_str()).unwrap_or("{}");
    let time_ms = match serde_json::from_str::<WrapperData>(json) {
        Ok(data) => Some(data.time.max(1.0) / 1000.0),
        Err(e) => {
            warn!(error = %e, "malformed instrumentation block, stripping it anyway");
            None
        }
    };

    let stripped = wrapper_regex().replace(&raw, "").trim().to_string();
    match stderr {
        IoData::Inline(_) => *stderr = IoData::inline(stripped),
        IoData::FileRef(path) => tokio::fs::write(path, &stripped).await?,
    }
    Ok(time_ms)
}

/// Classify one raw run. `ignore_exit_code` suppresses the non-zero-exit
/// rule (checkers encode their judgement in the exit code); signal
/// termination is a runtime error no matter what. `scan_wrapper` enables
/// the instrumentation-block scan on stderr.
pub async fn parse(
    mut run: RawRun,
    ignore_exit_code: bool,
    scan_wrapper: bool,
    pool: &CachePool,
) -> Result<Outcome<RunData>> {
    if let RawStatus::Error(msg) = &run.status {
        let msg = msg.clone();
        run.stdout.dispose(pool);
        run.stderr.dispose(pool);
        return Ok(Outcome::settled(Verdict::SystemError, msg));
    }

    let mut time_ms = run.time_ms;
    if scan_wrapper {
        if let Some(refined) = extract_wrapper_data(&mut run.stderr).await? {
            time_ms = refined;
        }
    }

    let data = RunData {
        time_ms,
        memory_mib: run.memory_mib,
        stdout: run.stdout,
        stderr: run.stderr,
    };

    let (code, signal) = match run.status {
        RawStatus::Aborted(AbortKind::Timeout) => {
            return Ok(Outcome::Settled(
                Settled::with_msg(Verdict::TimeLimitExceeded, "Killed due to timeout")
                    .with_data(data),
            ));
        }
        RawStatus::Aborted(AbortKind::User) => {
            return Ok(Outcome::Settled(
                Settled::with_msg(Verdict::Rejected, "Aborted by user").with_data(data),
            ));
        }
        RawStatus::Exited { code, signal } => (code, signal),
        RawStatus::Error(msg) => {
            return Ok(Outcome::settled(Verdict::SystemError, msg));
        }
    };

    if let Some(sig) = signal {
        return Ok(Outcome::Settled(
            Settled::with_msg(
                Verdict::RuntimeError,
                format!("Process was killed by signal: {}", signal_name(sig)),
            )
            .with_data(data),
        ));
    }

    if code != 0 && !ignore_exit_code {
        return Ok(Outcome::Settled(
            Settled::with_msg(Verdict::RuntimeError, format!("Process exited with code: {code}."))
                .with_data(data),
        ));
    }

    Ok(Outcome::Open(data))
}

/// Interpret a checker run: the usual process interpretation first (a
/// crashed checker is still a runtime error), then the testlib exit-code
/// convention on a clean exit.
pub async fn parse_checker(run: RawRun, pool: &CachePool) -> Result<Settled<RunData>> {
    let exit_code = match &run.status {
        RawStatus::Exited { code, signal: None } => Some(*code),
        _ => None,
    };

    match parse(run, true, false, pool).await? {
        Outcome::Settled(settled) => Ok(settled),
        Outcome::Open(data) => {
            let code = exit_code.unwrap_or_default();
            let settled = match code {
                0 => Settled::of(Verdict::Accepted),
                1 => Settled::of(Verdict::WrongAnswer),
                2 => Settled::of(Verdict::PresentationError),
                3 => Settled::of(Verdict::SystemError),
                4 => Settled::with_msg(Verdict::WrongAnswer, "Unexpected EOF"),
                7 => Settled::of(Verdict::PartiallyCorrect),
                code => Settled::with_msg(
                    Verdict::SystemError,
                    format!("Testlib returned unknown exit code: {code}"),
                ),
            };
            Ok(settled.with_data(data))
        }
    }
}

fn signal_name(sig: i32) -> String {
    match sig {
        1 => "SIGHUP".into(),
        2 => "SIGINT".into(),
        3 => "SIGQUIT".into(),
        4 => "SIGILL".into(),
        6 => "SIGABRT".into(),
        8 => "SIGFPE".into(),
        9 => "SIGKILL".into(),
        11 => "SIGSEGV".into(),
        13 => "SIGPIPE".into(),
        15 => "SIGTERM".into(),
        24 => "SIGXCPU".into(),
        25 => "SIGXFSZ".into(),
        other => format!("SIG{other}"),
    }
}
