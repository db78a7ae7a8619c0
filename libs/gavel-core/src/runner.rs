use std::sync::Arc;

use tracing::instrument;

use crate::cache::CachePool;
use crate::cancel::CancelToken;
use crate::compare::compare_outputs;
use crate::config::Settings;
use crate::error::Result;
use crate::exec::{default_shim_path, ExecRequest, ProcessExecutor};
use crate::interpret::{parse, parse_checker, RunData};
use crate::outcome::Outcome;
use crate::types::{CompileBundle, IoData, Program, TcResult, TestCase};
use crate::verdict::Verdict;

/// Test-Case Runner - Verdict State Machine
///
/// **Core Responsibility:**
/// Drive one test case through Judging → Judged → Comparing to a terminal
/// verdict: run the solution (plain, shimmed, or paired with an
/// interactor), apply the time and memory limits to the measurements, then
/// hand the outputs to the checker or the built-in comparator.
///
/// Internal failures never escape: anything the pipeline cannot handle
/// settles the case as a system error with the failure in its messages.
pub struct Runner {
    executor: ProcessExecutor,
    pool: CachePool,
    settings: Arc<Settings>,
}

impl Runner {
    pub fn new(pool: CachePool, settings: Arc<Settings>) -> Self {
        Runner { executor: ProcessExecutor::new(pool.clone()), pool, settings }
    }

    pub fn pool(&self) -> &CachePool {
        &self.pool
    }

    pub fn executor(&self) -> &ProcessExecutor {
        &self.executor
    }

    /// Judge one test case in place. The case's previous result is
    /// replaced; large streams are inlined down to the configured cap
    /// before the result is stored back.
    #[instrument(skip(self, tc, bundle, token))]
    pub async fn judge_case(
        &self,
        tc: &mut TestCase,
        bundle: &CompileBundle,
        time_limit_ms: u64,
        memory_limit_mib: u64,
        token: &CancelToken,
    ) {
        let mut result = tc.result.take().unwrap_or_else(TcResult::fresh);

        let judged = self
            .judge_inner(
                &tc.stdin,
                &tc.answer,
                &mut result,
                bundle,
                time_limit_ms,
                memory_limit_mib,
                token,
            )
            .await;
        if let Err(e) = judged {
            result.verdict = Verdict::SystemError;
            result.messages.push(format!("Runtime error occurred: {e}"));
        }

        result.inline_small(self.settings.max_inline_bytes, &self.pool).await;
        tc.result = Some(result);
    }

    #[allow(clippy::too_many_arguments)]
    async fn judge_inner(
        &self,
        stdin: &IoData,
        answer: &IoData,
        result: &mut TcResult,
        bundle: &CompileBundle,
        time_limit_ms: u64,
        memory_limit_mib: u64,
        token: &CancelToken,
    ) -> Result<()> {
        let Some(solution) = bundle.solution.as_ref() else {
            result.verdict = Verdict::SystemError;
            result.messages.push("No compiled solution to run".to_string());
            return Ok(());
        };

        result.verdict = Verdict::Judging;
        let outcome = self.do_run(solution, stdin, time_limit_ms, bundle, result, token).await?;
        let data = match outcome {
            Outcome::Settled(settled) => {
                result.absorb(settled);
                return Ok(());
            }
            Outcome::Open(data) => data,
        };
        result.take_data(data);
        result.verdict = Verdict::Judged;

        if result.time_ms > time_limit_ms as f64 {
            result.verdict = Verdict::TimeLimitExceeded;
            return Ok(());
        }
        if let Some(memory) = result.memory_mib {
            if memory > memory_limit_mib as f64 {
                result.verdict = Verdict::MemoryLimitExceeded;
                return Ok(());
            }
        }

        result.verdict = Verdict::Comparing;
        if let Some(checker) = bundle.checker.as_ref() {
            self.run_checker(checker, stdin, answer, result, token).await?;
        } else {
            let stdout = result.stdout.read().await?;
            let stderr = result.stderr.read().await?;
            let expected = answer.read().await?;
            result.verdict = compare_outputs(&stdout, &expected, &stderr, &self.settings.comparing);
        }
        Ok(())
    }

    /// Run the solution in whichever mode the bundle and settings call for.
    /// A checker takes precedence over an interactor, so interactive mode
    /// only engages for interactor-without-checker bundles.
    async fn do_run(
        &self,
        solution: &Program,
        stdin: &IoData,
        time_limit_ms: u64,
        bundle: &CompileBundle,
        result: &mut TcResult,
        token: &CancelToken,
    ) -> Result<Outcome<RunData>> {
        let exec_settings = &self.settings.execution;
        let timeout_ms = time_limit_ms + exec_settings.time_addition_ms;
        let cmd = solution.run_command(&self.settings);

        if bundle.checker.is_none() {
            if let Some(interactor) = bundle.interactor.as_ref() {
                return self
                    .run_interactive(&cmd, interactor, stdin, timeout_ms, result, token)
                    .await;
            }
        }

        let req = ExecRequest {
            cmd,
            stdin: Some(stdin.clone()),
            timeout_ms: Some(timeout_ms),
            cwd: None,
        };

        let raw = if exec_settings.use_shim {
            let shim = exec_settings.shim_path.clone().or_else(default_shim_path);
            let shim = match shim {
                Some(path) if path.exists() => path,
                other => {
                    let shown = other
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "gavel-shim".to_string());
                    return Ok(Outcome::settled(
                        Verdict::SystemError,
                        format!("Execution shim not found: {shown}"),
                    ));
                }
            };
            self.executor
                .execute_with_shim(&shim, &req, exec_settings.unlimited_stack, token)
                .await?
        } else {
            self.executor.execute(&req, token).await?
        };

        parse(raw, false, exec_settings.use_wrapper, &self.pool).await
    }

    /// Interactive judging. The interactor gets the input path and an
    /// output-capture path as argv and talks to the solution over pipes;
    /// its exit code carries the judgement, testlib-style. A failure of the
    /// solution process itself beats that judgement, and the measurements
    /// always come from the solution side.
    async fn run_interactive(
        &self,
        sol_cmd: &[String],
        interactor: &Program,
        stdin: &IoData,
        timeout_ms: u64,
        result: &mut TcResult,
        token: &CancelToken,
    ) -> Result<Outcome<RunData>> {
        let input = stdin.to_path(&self.pool).await?;
        let output_path = self.pool.acquire().await?;

        let mut inter_cmd = interactor.run_command(&self.settings);
        inter_cmd.push(input.arg());
        inter_cmd.push(output_path.display().to_string());

        let (sol_run, inter_run) = self
            .executor
            .execute_interactive(sol_cmd, &inter_cmd, Some(timeout_ms), token)
            .await?;

        let use_wrapper = self.settings.execution.use_wrapper;
        let sol_outcome = parse(sol_run, false, use_wrapper, &self.pool).await?;
        let inter_settled = parse_checker(inter_run, &self.pool).await?;

        input.release(&self.pool);

        if let Some(inter_data) = &inter_settled.data {
            if let Ok(s) = inter_data.stderr.read().await {
                if !s.trim().is_empty() {
                    result.messages.push(s.trim_end().to_string());
                }
            }
            inter_data.stdout.dispose(&self.pool);
            inter_data.stderr.dispose(&self.pool);
        }

        // The pipe transcript is working data; the judged output is the
        // interactor's capture file.
        match sol_outcome {
            Outcome::Settled(mut settled) => {
                match settled.data.as_mut() {
                    Some(data) => {
                        data.stdout.dispose(&self.pool);
                        data.stdout = IoData::file(output_path);
                    }
                    None => self.pool.release(&output_path),
                }
                Ok(Outcome::Settled(settled))
            }
            Outcome::Open(mut data) => {
                data.stdout.dispose(&self.pool);
                data.stdout = IoData::file(output_path);
                Ok(Outcome::Settled(inter_settled.recast::<RunData>().with_data(data)))
            }
        }
    }

    /// Run the checker on (input, output, answer) paths and adopt its
    /// judgement. The solution's own streams stay on the result; the
    /// checker's stderr joins the messages as the judging comment.
    async fn run_checker(
        &self,
        checker: &Program,
        stdin: &IoData,
        answer: &IoData,
        result: &mut TcResult,
        token: &CancelToken,
    ) -> Result<()> {
        let input = stdin.to_path(&self.pool).await?;
        let output = result.stdout.to_path(&self.pool).await?;
        let expected = answer.to_path(&self.pool).await?;

        let mut cmd = checker.run_command(&self.settings);
        cmd.push(input.arg());
        cmd.push(output.arg());
        cmd.push(expected.arg());

        // No time budget: checkers answer for themselves. Aborting the run
        // still kills them through the token.
        let req = ExecRequest { cmd, stdin: None, timeout_ms: None, cwd: None };
        let raw = self.executor.execute(&req, token).await?;
        let settled = parse_checker(raw, &self.pool).await?;

        input.release(&self.pool);
        output.release(&self.pool);
        expected.release(&self.pool);

        if let Some(data) = &settled.data {
            if let Ok(s) = data.stderr.read().await {
                if !s.trim().is_empty() {
                    result.messages.push(s.trim_end().to_string());
                }
            }
            data.stdout.dispose(&self.pool);
            data.stderr.dispose(&self.pool);
        }
        result.absorb_verdict(settled);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use crate::types::Artifact;
    use std::path::Path;

    async fn script_program(dir: &Path, name: &str, body: &str) -> Program {
        let path = dir.join(name);
        tokio::fs::write(&path, format!("#!/bin/sh\n{body}\n")).await.expect("write script");
        let mut perms = std::fs::metadata(&path).expect("meta").permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        Program { lang: None, artifact: Artifact::new(path, "") }
    }

    fn runner(dir: &Path) -> Runner {
        let pool = CachePool::new(dir.join("io"));
        Runner::new(pool, Arc::new(Settings::default()))
    }

    #[tokio::test]
    async fn echoing_solution_is_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = runner(dir.path());
        let source = CancelSource::new();

        let mut bundle = CompileBundle::default();
        bundle.solution = Some(script_program(dir.path(), "sol", "cat").await);

        let mut tc = TestCase::new(IoData::inline("5\n"), IoData::inline("5"));
        runner.judge_case(&mut tc, &bundle, 2000, 256, &source.token()).await;

        let result = tc.result.expect("result");
        assert_eq!(result.verdict, Verdict::Accepted, "messages: {:?}", result.messages);
        assert!(result.time_ms > 0.0);
    }

    #[tokio::test]
    async fn slow_solution_exceeds_the_time_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = runner(dir.path());
        let source = CancelSource::new();

        let mut bundle = CompileBundle::default();
        // Finishes within the kill budget but over the judged limit.
        bundle.solution = Some(script_program(dir.path(), "sol", "sleep 0.3; echo 1").await);

        let mut tc = TestCase::new(IoData::inline(""), IoData::inline("1"));
        runner.judge_case(&mut tc, &bundle, 50, 256, &source.token()).await;

        assert_eq!(tc.result.expect("result").verdict, Verdict::TimeLimitExceeded);
    }

    #[tokio::test]
    async fn crashing_solution_is_a_runtime_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = runner(dir.path());
        let source = CancelSource::new();

        let mut bundle = CompileBundle::default();
        bundle.solution = Some(script_program(dir.path(), "sol", "echo oops; exit 7").await);

        let mut tc = TestCase::new(IoData::inline(""), IoData::inline("oops"));
        runner.judge_case(&mut tc, &bundle, 2000, 256, &source.token()).await;

        let result = tc.result.expect("result");
        assert_eq!(result.verdict, Verdict::RuntimeError);
        assert!(result.messages.iter().any(|m| m == "Process exited with code: 7."));
    }

    #[tokio::test]
    async fn checker_judgement_and_comment_are_adopted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = runner(dir.path());
        let source = CancelSource::new();

        let mut bundle = CompileBundle::default();
        bundle.solution = Some(script_program(dir.path(), "sol", "echo 10").await);
        bundle.checker =
            Some(script_program(dir.path(), "check", "echo 'half the points' >&2; exit 7").await);

        let mut tc = TestCase::new(IoData::inline("5\n"), IoData::inline("irrelevant"));
        runner.judge_case(&mut tc, &bundle, 2000, 256, &source.token()).await;

        let result = tc.result.expect("result");
        assert_eq!(result.verdict, Verdict::PartiallyCorrect);
        assert!(result.messages.iter().any(|m| m == "half the points"));
        assert_eq!(result.stdout.read().await.expect("stdout"), "10\n");
    }

    #[tokio::test]
    async fn interactor_judges_the_conversation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = runner(dir.path());
        let source = CancelSource::new();

        let mut bundle = CompileBundle::default();
        bundle.solution = Some(script_program(dir.path(), "sol", "read q; echo \"$q\"").await);
        // Argv: input path, output path. Echo a challenge, expect it back,
        // record the exchange in the output file.
        bundle.interactor = Some(
            script_program(
                dir.path(),
                "inter",
                "out=\"$2\"\necho 42\nread reply\necho \"$reply\" > \"$out\"\n[ \"$reply\" = 42 ] && exit 0 || exit 1",
            )
            .await,
        );

        let mut tc = TestCase::new(IoData::inline("unused"), IoData::inline(""));
        runner.judge_case(&mut tc, &bundle, 2000, 256, &source.token()).await;

        let result = tc.result.expect("result");
        assert_eq!(result.verdict, Verdict::Accepted, "messages: {:?}", result.messages);
        assert_eq!(result.stdout.read().await.expect("capture"), "42\n");
    }
}
