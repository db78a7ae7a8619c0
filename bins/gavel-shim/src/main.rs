use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;

/// Runs one child process under file redirection, measures its CPU time and
/// peak memory, and reports the outcome as a single JSON line on stdout.
///
/// The parent keeps this process's stdin open for the whole run; receiving
/// the byte `k` there SIGKILLs the child. The shim itself always exits 0,
/// failures are reported in-band with `error: true`.
#[derive(Parser)]
#[command(name = "gavel-shim")]
struct Args {
    /// Redirect the child's stdin from this file.
    #[arg(long)]
    input: Option<PathBuf>,
    /// Capture the child's stdout into this file.
    #[arg(long)]
    stdout: PathBuf,
    /// Capture the child's stderr into this file.
    #[arg(long)]
    stderr: PathBuf,
    /// Lift the stack size limit before handing over to the child.
    #[arg(long)]
    unlimited_stack: bool,
    /// Command line to run, after `--`.
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    error: bool,
    killed: bool,
    /// CPU time (user + system) in milliseconds, never below 0.001.
    time: f64,
    /// Peak resident set size in MiB.
    memory: f64,
    exit_code: Option<i32>,
    signal: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Failure {
    error: bool,
    error_type: i32,
    error_code: i32,
}

/// Where the run fell over, numbered for the report.
#[derive(Debug, Clone, Copy)]
enum Stage {
    OpenInput = 0,
    CreateOutput = 1,
    CreateError = 2,
    Spawn = 3,
    Wait = 4,
    Usage = 5,
}

impl Failure {
    fn at(stage: Stage, err: &std::io::Error) -> Self {
        Failure {
            error: true,
            error_type: stage as i32,
            error_code: err.raw_os_error().unwrap_or(-1),
        }
    }
}

fn main() {
    let args = Args::parse();
    match supervise(args) {
        Ok(report) => emit(&report),
        Err(failure) => emit(&failure),
    }
}

/// One line on stdout is the whole contract. If serialization somehow
/// fails the parent sees an empty report and treats it as a system error.
fn emit<T: Serialize>(report: &T) {
    if let Ok(line) = serde_json::to_string(report) {
        println!("{line}");
    }
}

fn supervise(args: Args) -> Result<Report, Failure> {
    let stdin = match &args.input {
        Some(path) => File::open(path)
            .map(Stdio::from)
            .map_err(|e| Failure::at(Stage::OpenInput, &e))?,
        None => Stdio::null(),
    };
    let stdout = File::create(&args.stdout).map_err(|e| Failure::at(Stage::CreateOutput, &e))?;
    let stderr = File::create(&args.stderr).map_err(|e| Failure::at(Stage::CreateError, &e))?;

    let mut command = Command::new(&args.command[0]);
    command.args(&args.command[1..]).stdin(stdin).stdout(stdout).stderr(stderr);
    if args.unlimited_stack {
        lift_stack_limit(&mut command);
    }

    let mut child = command.spawn().map_err(|e| Failure::at(Stage::Spawn, &e))?;

    let killed = Arc::new(AtomicBool::new(false));
    spawn_kill_listener(child.id() as libc::pid_t, Arc::clone(&killed));

    let status = child.wait().map_err(|e| Failure::at(Stage::Wait, &e))?;
    let (time, memory) = children_usage().map_err(|e| Failure::at(Stage::Usage, &e))?;

    Ok(Report {
        error: false,
        killed: killed.load(Ordering::SeqCst),
        time,
        memory,
        exit_code: status.code(),
        signal: signal_of(&status),
    })
}

fn lift_stack_limit(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    // Runs in the forked child before exec; setrlimit is async-signal-safe
    // and nothing else executes in between.
    unsafe {
        command.pre_exec(|| {
            let lim = libc::rlimit {
                rlim_cur: libc::RLIM_INFINITY,
                rlim_max: libc::RLIM_INFINITY,
            };
            if libc::setrlimit(libc::RLIMIT_STACK, &lim) == 0 {
                Ok(())
            } else {
                Err(std::io::Error::last_os_error())
            }
        });
    }
}

/// Watch our own stdin for the soft-kill byte. EOF means the parent is
/// done talking; the child keeps running.
fn spawn_kill_listener(pid: libc::pid_t, killed: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin().lock();
        let mut byte = [0u8; 1];
        loop {
            match stdin.read(&mut byte) {
                Ok(0) | Err(_) => break,
                Ok(_) if byte[0] == b'k' => {
                    killed.store(true, Ordering::SeqCst);
                    unsafe { libc::kill(pid, libc::SIGKILL) };
                    break;
                }
                Ok(_) => {}
            }
        }
    });
}

/// CPU time and peak RSS of the reaped child, via the children rusage
/// bucket. `ru_maxrss` is reported in KiB on Linux.
fn children_usage() -> std::io::Result<(f64, f64)> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrusage(libc::RUSAGE_CHILDREN, &mut usage) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let cpu_ms = (usage.ru_utime.tv_sec as f64 * 1e3)
        + (usage.ru_utime.tv_usec as f64 / 1e3)
        + (usage.ru_stime.tv_sec as f64 * 1e3)
        + (usage.ru_stime.tv_usec as f64 / 1e3);
    Ok((cpu_ms.max(0.001), usage.ru_maxrss as f64 / 1024.0))
}

fn signal_of(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(dir: &std::path::Path, input: Option<PathBuf>, command: &[&str]) -> Args {
        Args {
            input,
            stdout: dir.join("out"),
            stderr: dir.join("err"),
            unlimited_stack: false,
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn reports_exit_code_and_captures_streams() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = supervise(args(
            dir.path(),
            None,
            &["/bin/sh", "-c", "echo out; echo err >&2; exit 3"],
        ))
        .expect("report");

        assert!(!report.error);
        assert!(!report.killed);
        assert_eq!(report.exit_code, Some(3));
        assert_eq!(report.signal, None);
        assert!(report.time >= 0.001);
        assert_eq!(std::fs::read_to_string(dir.path().join("out")).expect("out"), "out\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("err")).expect("err"), "err\n");
    }

    #[test]
    fn reports_fatal_signal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = supervise(args(dir.path(), None, &["/bin/sh", "-c", "kill -9 $$"]))
            .expect("report");

        assert_eq!(report.exit_code, None);
        assert_eq!(report.signal, Some(9));
    }

    #[test]
    fn redirects_input_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in");
        std::fs::write(&input, "echoed back\n").expect("write input");

        let report = supervise(args(dir.path(), Some(input), &["/bin/cat"])).expect("report");

        assert_eq!(report.exit_code, Some(0));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out")).expect("out"),
            "echoed back\n"
        );
    }

    #[test]
    fn missing_input_file_fails_at_stage_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let failure = supervise(args(
            dir.path(),
            Some(dir.path().join("no-such-file")),
            &["/bin/cat"],
        ))
        .expect_err("failure");

        assert!(failure.error);
        assert_eq!(failure.error_type, Stage::OpenInput as i32);
        assert_eq!(failure.error_code, libc::ENOENT);
    }

    #[test]
    fn unknown_program_fails_at_spawn() {
        let dir = tempfile::tempdir().expect("tempdir");
        let failure = supervise(args(dir.path(), None, &["/no/such/binary"]))
            .expect_err("failure");

        assert_eq!(failure.error_type, Stage::Spawn as i32);
    }

    #[test]
    fn report_wire_format_is_camel_case() {
        let line = serde_json::to_string(&Report {
            error: false,
            killed: true,
            time: 1.5,
            memory: 2.0,
            exit_code: None,
            signal: Some(9),
        })
        .expect("json");
        assert!(line.contains("\"killed\":true"), "{line}");
        assert!(line.contains("\"exitCode\":null"), "{line}");
        assert!(line.contains("\"signal\":9"), "{line}");

        let line = serde_json::to_string(&Failure {
            error: true,
            error_type: 3,
            error_code: 2,
        })
        .expect("json");
        assert!(line.contains("\"errorType\":3"), "{line}");
        assert!(line.contains("\"errorCode\":2"), "{line}");
    }
}
