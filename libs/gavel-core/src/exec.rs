use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, instrument};

use crate::cache::CachePool;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::types::IoData;

/// Process Executor - Cancellable Subprocess Runs
///
/// **Core Responsibility:**
/// Launch judged processes with redirected streams and wait for them under
/// two guillotines: the wall-clock budget and the run's cancellation token.
/// Which one fired is recorded in the raw status; the interpreter maps them
/// to different verdicts.
///
/// **Key Design Decisions:**
/// - Output goes to pool-backed capture files, never into memory. A
///   solution printing gigabytes costs disk, not RAM.
/// - Killing is unconditional (SIGKILL via the runtime), and the child is
///   always reaped afterwards so no zombies accumulate.
/// - The executor reports what happened; it never judges. A non-zero exit
///   here is data, not an error.

/// Why a run was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortKind {
    User,
    Timeout,
}

/// Raw process status before verdict interpretation.
#[derive(Debug, Clone)]
pub enum RawStatus {
    /// The process could not be run at all.
    Error(String),
    /// The process was killed before finishing.
    Aborted(AbortKind),
    /// The process ran to completion. `code` is meaningless when `signal`
    /// is set.
    Exited { code: i32, signal: Option<i32> },
}

/// What a finished (or killed) process left behind.
#[derive(Debug)]
pub struct RawRun {
    pub status: RawStatus,
    pub time_ms: f64,
    pub memory_mib: Option<f64>,
    pub stdout: IoData,
    pub stderr: IoData,
}

impl RawRun {
    pub(crate) fn failed(msg: impl Into<String>) -> Self {
        RawRun {
            status: RawStatus::Error(msg.into()),
            time_ms: 0.0,
            memory_mib: None,
            stdout: IoData::empty(),
            stderr: IoData::empty(),
        }
    }
}

/// One process invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub cmd: Vec<String>,
    pub stdin: Option<IoData>,
    pub timeout_ms: Option<u64>,
    /// Defaults to the program's own directory when unset.
    pub cwd: Option<PathBuf>,
}

/// A process started for external attachment. The caller owns the child;
/// nothing here awaits it.
#[derive(Debug)]
pub struct LaunchedProcess {
    pub child: Child,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

/// Success report from the execution shim, one JSON line on its stdout.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShimReport {
    error: bool,
    #[serde(default)]
    killed: bool,
    #[serde(default)]
    time: f64,
    #[serde(default)]
    memory: f64,
    #[serde(default)]
    exit_code: Option<i32>,
    #[serde(default)]
    signal: Option<i32>,
    #[serde(default)]
    error_type: Option<i32>,
    #[serde(default)]
    error_code: Option<i32>,
}

#[derive(Clone)]
pub struct ProcessExecutor {
    pool: CachePool,
}

impl ProcessExecutor {
    pub fn new(pool: CachePool) -> Self {
        ProcessExecutor { pool }
    }

    pub fn pool(&self) -> &CachePool {
        &self.pool
    }

    /// Run one process to completion, kill, or cancellation.
    #[instrument(skip_all, fields(cmd = %req.cmd.first().map(String::as_str).unwrap_or("")))]
    pub async fn execute(&self, req: &ExecRequest, token: &CancelToken) -> Result<RawRun> {
        let Some((program, args)) = req.cmd.split_first() else {
            return Ok(RawRun::failed("Empty command"));
        };

        let stdout_path = self.pool.acquire().await?;
        let stderr_path = self.pool.acquire().await?;

        let capture = (|| -> std::io::Result<(std::fs::File, std::fs::File)> {
            Ok((std::fs::File::create(&stdout_path)?, std::fs::File::create(&stderr_path)?))
        })();
        let (stdout_file, stderr_file) = match capture {
            Ok(files) => files,
            Err(e) => {
                self.pool.release(&stdout_path);
                self.pool.release(&stderr_path);
                return Ok(RawRun::failed(format!("Failed to open capture file: {e}")));
            }
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .kill_on_drop(true);
        if let Some(cwd) = req.cwd.clone().or_else(|| default_cwd(program)) {
            command.current_dir(cwd);
        }

        let mut inline_input: Option<String> = None;
        match &req.stdin {
            None => {
                command.stdin(Stdio::null());
            }
            Some(IoData::FileRef(path)) => match std::fs::File::open(path) {
                Ok(f) => {
                    command.stdin(Stdio::from(f));
                }
                Err(e) => {
                    self.pool.release(&stdout_path);
                    self.pool.release(&stderr_path);
                    return Ok(RawRun::failed(format!(
                        "Failed to open input file {}: {e}",
                        path.display()
                    )));
                }
            },
            Some(IoData::Inline(s)) => {
                command.stdin(Stdio::piped());
                inline_input = Some(s.clone());
            }
        }

        let start = Instant::now();
        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                self.pool.release(&stdout_path);
                self.pool.release(&stderr_path);
                return Ok(RawRun::failed(format!("Failed to start process {program}: {e}")));
            }
        };

        // Written from a task: a child that never reads its input must not
        // wedge this run on a full pipe.
        if let Some(input) = inline_input {
            if let Some(mut stdin) = child.stdin.take() {
                tokio::spawn(async move {
                    let _ = stdin.write_all(input.as_bytes()).await;
                    let _ = stdin.shutdown().await;
                });
            }
        }

        let mut aborted: Option<AbortKind> = None;
        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = token.cancelled() => {
                aborted = Some(AbortKind::User);
                None
            }
            _ = sleep_opt(req.timeout_ms) => {
                aborted = Some(AbortKind::Timeout);
                None
            }
        };

        let status = match waited {
            Some(status) => status,
            None => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Ok(RawRun {
                    status: RawStatus::Aborted(aborted.unwrap_or(AbortKind::User)),
                    time_ms: start.elapsed().as_secs_f64() * 1000.0,
                    memory_mib: None,
                    stdout: IoData::file(stdout_path),
                    stderr: IoData::file(stderr_path),
                });
            }
        };

        let time_ms = start.elapsed().as_secs_f64() * 1000.0;
        let raw_status = match status {
            Ok(status) => exit_status(status),
            Err(e) => RawStatus::Error(format!("Failed to wait for process: {e}")),
        };
        debug!(?raw_status, time_ms, "process finished");
        Ok(RawRun {
            status: raw_status,
            time_ms,
            memory_mib: None,
            stdout: IoData::file(stdout_path),
            stderr: IoData::file(stderr_path),
        })
    }

    /// Run one process through the execution shim, which measures CPU time
    /// and peak memory and performs the actual kill on request.
    #[instrument(skip_all, fields(cmd = %req.cmd.first().map(String::as_str).unwrap_or("")))]
    pub async fn execute_with_shim(
        &self,
        shim: &Path,
        req: &ExecRequest,
        unlimited_stack: bool,
        token: &CancelToken,
    ) -> Result<RawRun> {
        if req.cmd.is_empty() {
            return Ok(RawRun::failed("Empty command"));
        }

        let stdout_path = self.pool.acquire().await?;
        let stderr_path = self.pool.acquire().await?;

        // The shim reads input from a file, so inline data is spilled.
        let input = match &req.stdin {
            Some(data) => match data.to_path(&self.pool).await {
                Ok(p) => Some(p),
                Err(e) => {
                    self.pool.release(&stdout_path);
                    self.pool.release(&stderr_path);
                    return Err(e);
                }
            },
            None => None,
        };

        let mut command = Command::new(shim);
        if let Some(input) = &input {
            command.args(["--input", &input.arg()]);
        }
        command.args(["--stdout", &stdout_path.display().to_string()]);
        command.args(["--stderr", &stderr_path.display().to_string()]);
        if unlimited_stack {
            command.arg("--unlimited-stack");
        }
        command.arg("--");
        command.args(&req.cmd);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = req.cwd.clone().or_else(|| default_cwd(&req.cmd[0])) {
            command.current_dir(cwd);
        }

        let start = Instant::now();
        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                if let Some(input) = input {
                    input.release(&self.pool);
                }
                self.pool.release(&stdout_path);
                self.pool.release(&stderr_path);
                return Ok(RawRun::failed(format!("Failed to start execution shim: {e}")));
            }
        };

        let mut shim_stdin = child.stdin.take();
        let report_pipe = child.stdout.take();
        let reader = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut pipe) = report_pipe {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let mut aborted: Option<AbortKind> = None;
        let first = tokio::select! {
            status = child.wait() => Some(status),
            _ = token.cancelled() => {
                aborted = Some(AbortKind::User);
                None
            }
            _ = sleep_opt(req.timeout_ms) => {
                aborted = Some(AbortKind::Timeout);
                None
            }
        };

        let status = match first {
            Some(status) => status,
            None => {
                // Soft-kill byte; the shim SIGKILLs its child and still
                // writes the report. Force-kill if it hangs anyway.
                if let Some(stdin) = shim_stdin.as_mut() {
                    let _ = stdin.write_all(b"k").await;
                    let _ = stdin.flush().await;
                }
                match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
                    Ok(status) => status,
                    Err(_) => {
                        let _ = child.start_kill();
                        child.wait().await
                    }
                }
            }
        };
        drop(shim_stdin);

        let wall_ms = start.elapsed().as_secs_f64() * 1000.0;
        let report_raw = reader.await.unwrap_or_default();
        if let Some(input) = input {
            input.release(&self.pool);
        }

        let shim_ok = matches!(&status, Ok(s) if s.success());
        if !shim_ok {
            let detail = match &status {
                Ok(s) => format!("Execution shim exited abnormally: {s}"),
                Err(e) => format!("Failed to wait for execution shim: {e}"),
            };
            return Ok(RawRun {
                status: RawStatus::Error(detail),
                time_ms: wall_ms,
                memory_mib: None,
                stdout: IoData::file(stdout_path),
                stderr: IoData::file(stderr_path),
            });
        }

        let report: ShimReport = match serde_json::from_str(report_raw.trim()) {
            Ok(r) => r,
            Err(e) => {
                return Ok(RawRun {
                    status: RawStatus::Error(format!("Malformed shim report: {e}")),
                    time_ms: wall_ms,
                    memory_mib: None,
                    stdout: IoData::file(stdout_path),
                    stderr: IoData::file(stderr_path),
                });
            }
        };

        if report.error {
            let detail = format!(
                "Shim failed to run the process (stage {}, errno {})",
                report.error_type.unwrap_or_default(),
                report.error_code.unwrap_or_default()
            );
            return Ok(RawRun {
                status: RawStatus::Error(detail),
                time_ms: wall_ms,
                memory_mib: None,
                stdout: IoData::file(stdout_path),
                stderr: IoData::file(stderr_path),
            });
        }

        let status = if report.killed || aborted.is_some() {
            RawStatus::Aborted(aborted.unwrap_or(AbortKind::User))
        } else {
            RawStatus::Exited { code: report.exit_code.unwrap_or_default(), signal: report.signal }
        };
        Ok(RawRun {
            status,
            time_ms: report.time,
            memory_mib: Some(report.memory),
            stdout: IoData::file(stdout_path),
            stderr: IoData::file(stderr_path),
        })
    }

    /// Run solution and interactor as a connected pair: each one's stdout
    /// feeds the other's stdin, with both directions recorded to transcript
    /// files. Returns (solution, interactor) runs.
    #[instrument(skip_all)]
    pub async fn execute_interactive(
        &self,
        sol_cmd: &[String],
        inter_cmd: &[String],
        timeout_ms: Option<u64>,
        token: &CancelToken,
    ) -> Result<(RawRun, RawRun)> {
        let (Some(sol_program), Some(inter_program)) = (sol_cmd.first(), inter_cmd.first()) else {
            return Ok((RawRun::failed("Empty command"), RawRun::failed("Empty command")));
        };

        let sol_out = self.pool.acquire().await?;
        let sol_err = self.pool.acquire().await?;
        let inter_out = self.pool.acquire().await?;
        let inter_err = self.pool.acquire().await?;
        let release_all = || {
            for path in [&sol_out, &sol_err, &inter_out, &inter_err] {
                self.pool.release(path);
            }
        };

        let errs = (|| -> std::io::Result<(std::fs::File, std::fs::File)> {
            Ok((std::fs::File::create(&sol_err)?, std::fs::File::create(&inter_err)?))
        })();
        let (sol_err_file, inter_err_file) = match errs {
            Ok(files) => files,
            Err(e) => {
                release_all();
                let msg = format!("Failed to open capture file: {e}");
                return Ok((RawRun::failed(&msg), RawRun::failed(&msg)));
            }
        };

        let start = Instant::now();

        let mut sol = match Command::new(sol_program)
            .args(&sol_cmd[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(sol_err_file))
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                release_all();
                let msg = format!("Failed to start solution process {sol_program}: {e}");
                return Ok((RawRun::failed(&msg), RawRun::failed(&msg)));
            }
        };

        let mut inter = match Command::new(inter_program)
            .args(&inter_cmd[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(inter_err_file))
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                let _ = sol.start_kill();
                let _ = sol.wait().await;
                release_all();
                let msg = format!("Failed to start interactor process {inter_program}: {e}");
                return Ok((RawRun::failed(&msg), RawRun::failed(&msg)));
            }
        };

        let sol_stdin = sol.stdin.take();
        let sol_stdout = sol.stdout.take();
        let inter_stdin = inter.stdin.take();
        let inter_stdout = inter.stdout.take();

        let t_sol = tokio::spawn(pipe_tee(sol_stdout, inter_stdin, sol_out.clone()));
        let t_inter = tokio::spawn(pipe_tee(inter_stdout, sol_stdin, inter_out.clone()));

        let mut statuses = None;
        let mut aborted: Option<AbortKind> = None;
        tokio::select! {
            s = async { tokio::join!(sol.wait(), inter.wait()) } => {
                statuses = Some(s);
            }
            _ = token.cancelled() => {
                aborted = Some(AbortKind::User);
            }
            _ = sleep_opt(timeout_ms) => {
                aborted = Some(AbortKind::Timeout);
            }
        }
        let (sol_status, inter_status) = match statuses {
            Some(s) => s,
            None => {
                let _ = sol.start_kill();
                let _ = inter.start_kill();
                tokio::join!(sol.wait(), inter.wait())
            }
        };
        let time_ms = start.elapsed().as_secs_f64() * 1000.0;

        // Both children are dead, the tee tasks are draining to EOF; wait
        // so the transcripts are complete before anyone reads them.
        let _ = t_sol.await;
        let _ = t_inter.await;

        let status_of = |status: std::io::Result<std::process::ExitStatus>| -> RawStatus {
            if let Some(kind) = aborted {
                return RawStatus::Aborted(kind);
            }
            match status {
                Ok(s) => exit_status(s),
                Err(e) => RawStatus::Error(format!("Failed to wait for process: {e}")),
            }
        };

        let sol_run = RawRun {
            status: status_of(sol_status),
            time_ms,
            memory_mib: None,
            stdout: IoData::file(sol_out),
            stderr: IoData::file(sol_err),
        };
        let inter_run = RawRun {
            status: status_of(inter_status),
            time_ms,
            memory_mib: None,
            stdout: IoData::file(inter_out),
            stderr: IoData::file(inter_err),
        };
        Ok((sol_run, inter_run))
    }

    /// Start a process and hand back its handle without awaiting it, for
    /// debugger attachment. `suspended` stops the process immediately after
    /// spawn so a debugger can attach before user code runs.
    pub fn launch(&self, req: &ExecRequest, suspended: bool) -> Result<LaunchedProcess> {
        let Some((program, args)) = req.cmd.split_first() else {
            return Err(Error::problem("Empty command"));
        };
        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(cwd) = req.cwd.clone().or_else(|| default_cwd(program)) {
            command.current_dir(cwd);
        }
        let mut child = command.spawn()?;
        #[cfg(unix)]
        if suspended {
            if let Some(pid) = child.id() {
                unsafe {
                    libc::kill(pid as i32, libc::SIGSTOP);
                }
            }
        }
        #[cfg(not(unix))]
        let _ = suspended;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        Ok(LaunchedProcess { child, stdout, stderr })
    }
}

/// Default shim location: next to the running executable.
pub fn default_shim_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join(format!("gavel-shim{}", std::env::consts::EXE_SUFFIX)))
}

fn default_cwd(program: &str) -> Option<PathBuf> {
    let parent = Path::new(program).parent()?;
    if parent.as_os_str().is_empty() {
        None
    } else {
        Some(parent.to_path_buf())
    }
}

fn exit_status(status: std::process::ExitStatus) -> RawStatus {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;
    RawStatus::Exited { code: status.code().unwrap_or_default(), signal }
}

async fn sleep_opt(timeout_ms: Option<u64>) {
    match timeout_ms {
        Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
        None => std::future::pending::<()>().await,
    }
}

/// Copy `from` into `to`, recording everything to `transcript`. When the
/// peer closes its end, keep draining so the producer never blocks on a
/// full pipe; dropping `to` at EOF delivers end-of-input to the peer.
async fn pipe_tee(from: Option<ChildStdout>, to: Option<ChildStdin>, transcript: PathBuf) {
    let Some(mut from) = from else { return };
    let mut to = to;
    let mut file = tokio::fs::File::create(&transcript).await.ok();
    let mut buf = [0u8; 8192];
    loop {
        let n = match from.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        if let Some(mut f) = file.take() {
            if f.write_all(&buf[..n]).await.is_ok() {
                file = Some(f);
            }
        }
        if let Some(mut w) = to.take() {
            if w.write_all(&buf[..n]).await.is_ok() {
                to = Some(w);
            }
        }
    }
    if let Some(f) = file.as_mut() {
        let _ = f.flush().await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn executor() -> (tempfile::TempDir, ProcessExecutor) {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = CachePool::new(dir.path());
        (dir, ProcessExecutor::new(pool))
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let (_dir, exec) = executor();
        let source = CancelSource::new();
        let req = ExecRequest { cmd: sh("echo hello; exit 3"), stdin: None, timeout_ms: None, cwd: None };

        let run = exec.execute(&req, &source.token()).await.expect("execute");
        match run.status {
            RawStatus::Exited { code, signal } => {
                assert_eq!(code, 3);
                assert_eq!(signal, None);
            }
            other => panic!("unexpected status: {other:?}"),
        }
        assert_eq!(run.stdout.read().await.expect("stdout"), "hello\n");
    }

    #[tokio::test]
    async fn feeds_inline_stdin() {
        let (_dir, exec) = executor();
        let source = CancelSource::new();
        let req = ExecRequest {
            cmd: sh("cat"),
            stdin: Some(IoData::inline("echoed back\n")),
            timeout_ms: None,
            cwd: None,
        };

        let run = exec.execute(&req, &source.token()).await.expect("execute");
        assert_eq!(run.stdout.read().await.expect("stdout"), "echoed back\n");
    }

    #[tokio::test]
    async fn timeout_kills_and_reports_aborted() {
        let (_dir, exec) = executor();
        let source = CancelSource::new();
        let req = ExecRequest { cmd: sh("sleep 30"), stdin: None, timeout_ms: Some(100), cwd: None };

        let started = Instant::now();
        let run = exec.execute(&req, &source.token()).await.expect("execute");
        assert!(matches!(run.status, RawStatus::Aborted(AbortKind::Timeout)));
        assert!(started.elapsed() < Duration::from_secs(5), "kill must not wait for sleep");
    }

    #[tokio::test]
    async fn cancellation_kills_and_reports_user_abort() {
        let (_dir, exec) = executor();
        let source = CancelSource::new();
        let token = source.token();

        let handle = {
            let exec = exec.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let req =
                    ExecRequest { cmd: sh("sleep 30"), stdin: None, timeout_ms: None, cwd: None };
                exec.execute(&req, &token).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        source.cancel(crate::cancel::CancelReason::Abort);

        let run = handle.await.expect("join").expect("execute");
        assert!(matches!(run.status, RawStatus::Aborted(AbortKind::User)));
    }

    #[tokio::test]
    async fn signal_termination_is_reported() {
        let (_dir, exec) = executor();
        let source = CancelSource::new();
        let req = ExecRequest { cmd: sh("kill -9 $$"), stdin: None, timeout_ms: None, cwd: None };

        let run = exec.execute(&req, &source.token()).await.expect("execute");
        match run.status {
            RawStatus::Exited { signal, .. } => assert_eq!(signal, Some(9)),
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_failure_releases_capture_files() {
        let (_dir, exec) = executor();
        let source = CancelSource::new();
        let req = ExecRequest {
            cmd: vec!["/nonexistent/program".to_string()],
            stdin: None,
            timeout_ms: None,
            cwd: None,
        };

        let run = exec.execute(&req, &source.token()).await.expect("execute");
        assert!(matches!(run.status, RawStatus::Error(_)));
        // Both capture files went back to the pool: two more acquires must
        // reuse them instead of creating new files.
        let a = exec.pool().acquire().await.expect("acquire");
        let b = exec.pool().acquire().await.expect("acquire");
        assert_ne!(a, b);
        let on_disk = std::fs::read_dir(_dir.path()).expect("read_dir").count();
        assert_eq!(on_disk, 2, "no extra pool files were created");
    }

    #[tokio::test]
    async fn launch_hands_back_live_handles() {
        let (_dir, exec) = executor();
        let req = ExecRequest { cmd: sh("echo ready"), stdin: None, timeout_ms: None, cwd: None };

        let mut proc = exec.launch(&req, false).expect("launch");
        let mut out = String::new();
        proc.stdout
            .take()
            .expect("stdout handle")
            .read_to_string(&mut out)
            .await
            .expect("read stdout");
        assert_eq!(out, "ready\n");
        let status = proc.child.wait().await.expect("wait");
        assert!(status.success());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn suspended_launch_stops_until_continued() {
        let (_dir, exec) = executor();
        let req = ExecRequest { cmd: sh("echo resumed"), stdin: None, timeout_ms: None, cwd: None };

        let mut proc = exec.launch(&req, true).expect("launch");
        let pid = proc.child.id().expect("pid") as i32;

        // Third field of /proc/<pid>/stat; T means stopped.
        let mut state = String::new();
        for _ in 0..100 {
            let stat = tokio::fs::read_to_string(format!("/proc/{pid}/stat"))
                .await
                .expect("read /proc stat");
            state = stat
                .rsplit(") ")
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .unwrap_or("")
                .to_string();
            if state == "T" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(state, "T", "process should be stopped after a suspended launch");

        unsafe { libc::kill(pid, libc::SIGCONT) };
        let mut out = String::new();
        proc.stdout
            .take()
            .expect("stdout handle")
            .read_to_string(&mut out)
            .await
            .expect("read stdout");
        assert_eq!(out, "resumed\n");
        let status = proc.child.wait().await.expect("wait");
        assert!(status.success());
    }

    #[tokio::test]
    async fn interactive_pair_exchanges_messages() {
        let (_dir, exec) = executor();
        let source = CancelSource::new();

        // Interactor speaks first, solution answers, both exit cleanly.
        let inter = sh("echo ping; read reply; [ \"$reply\" = pong ] && exit 0 || exit 1");
        let sol = sh("read challenge; echo pong");

        let (sol_run, inter_run) = exec
            .execute_interactive(&sol, &inter, Some(10_000), &source.token())
            .await
            .expect("execute_interactive");

        assert!(
            matches!(inter_run.status, RawStatus::Exited { code: 0, signal: None }),
            "interactor saw the reply: {:?}",
            inter_run.status
        );
        assert!(matches!(sol_run.status, RawStatus::Exited { code: 0, signal: None }));
        assert_eq!(sol_run.stdout.read().await.expect("transcript"), "pong\n");
        assert_eq!(inter_run.stdout.read().await.expect("transcript"), "ping\n");
    }

    #[tokio::test]
    async fn interactive_timeout_kills_both() {
        let (_dir, exec) = executor();
        let source = CancelSource::new();

        let (sol_run, inter_run) = exec
            .execute_interactive(&sh("sleep 30"), &sh("sleep 30"), Some(100), &source.token())
            .await
            .expect("execute_interactive");

        assert!(matches!(sol_run.status, RawStatus::Aborted(AbortKind::Timeout)));
        assert!(matches!(inter_run.status, RawStatus::Aborted(AbortKind::Timeout)));
    }
}
