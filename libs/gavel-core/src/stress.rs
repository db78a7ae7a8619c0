use tracing::{info, warn};

use crate::cache::CachePool;
use crate::cancel::CancelToken;
use crate::compiler::compile_bundle;
use crate::config::Settings;
use crate::error::Result;
use crate::exec::ExecRequest;
use crate::interpret::{parse, RunData};
use crate::langs::ForceMode;
use crate::outcome::Outcome;
use crate::runner::Runner;
use crate::types::{BfCompare, IoData, Problem, TestCase};
use crate::verdict::Verdict;

/// Stress Loop - Brute Force Comparison
///
/// **Core Responsibility:**
/// Hunt for a counterexample: generate an input, produce the reference
/// answer with the brute force, judge the solution against it, repeat. The
/// loop only stops on a found difference, a failed companion run, or
/// cancellation; progress and the final disposition are published through
/// the problem's `BfCompare` state.
///
/// Generator and brute force run as plain wall-clock processes under their
/// own time limits; the solution run goes through the full judging machine
/// so checkers and limits apply exactly as in a suite run.
pub(crate) async fn run(
    runner: &Runner,
    problem: &mut Problem,
    settings: &Settings,
    token: &CancelToken,
    force: ForceMode,
) -> Result<()> {
    let chosen = problem
        .bf
        .as_ref()
        .map(|bf| bf.generator.is_some() && bf.brute_force.is_some())
        .unwrap_or(false);
    if !chosen {
        let bf = problem.bf.get_or_insert_with(BfCompare::default);
        bf.msg = "Please choose both generator and brute force files first.".to_string();
        bf.running = false;
        return Ok(());
    }

    set_running(problem, true);
    let outcome = stress_inner(runner, problem, settings, token, force).await;
    set_running(problem, false);
    outcome
}

async fn stress_inner(
    runner: &Runner,
    problem: &mut Problem,
    settings: &Settings,
    token: &CancelToken,
    force: ForceMode,
) -> Result<()> {
    set_msg(problem, "Compiling...");
    set_runs(problem, 0);

    let bundle = match compile_bundle(problem, true, settings, token, force).await? {
        Outcome::Open(bundle) => bundle,
        Outcome::Settled(settled) => {
            warn!(verdict = %settled.verdict, msg = ?settled.msg, "stress compilation settled");
            set_msg(problem, "Solution compilation failed");
            return Ok(());
        }
    };
    let (Some(generator), Some(brute)) = (bundle.generator.as_ref(), bundle.brute_force.as_ref())
    else {
        set_msg(problem, "Solution compilation failed");
        return Ok(());
    };

    let pool = runner.pool();
    let executor = runner.executor();
    let gen_timeout = settings.stress.generator_time_limit_ms;
    let bf_timeout = settings.stress.brute_force_time_limit_ms;
    let mut cnt: u64 = 0;
    let mut aborted = false;

    loop {
        if token.is_cancelled() {
            aborted = true;
            break;
        }
        cnt += 1;
        set_runs(problem, cnt);

        set_msg(problem, format!("#{cnt} Running generator..."));
        let gen_req = ExecRequest {
            cmd: generator.run_command(settings),
            stdin: None,
            timeout_ms: Some(gen_timeout),
            cwd: None,
        };
        let gen_raw = executor.execute(&gen_req, token).await?;
        let gen_data = match parse(gen_raw, false, false, pool).await? {
            Outcome::Open(data) => data,
            Outcome::Settled(settled) => {
                if settled.verdict == Verdict::Rejected {
                    aborted = true;
                } else {
                    set_msg(
                        problem,
                        format!("Generator run failed: {}", settled.msg.clone().unwrap_or_default()),
                    );
                }
                dispose_data(settled.data, pool);
                break;
            }
        };
        gen_data.stderr.dispose(pool);
        let input = gen_data.stdout;

        set_msg(problem, format!("#{cnt} Running brute force..."));
        let bf_req = ExecRequest {
            cmd: brute.run_command(settings),
            stdin: Some(input.clone()),
            timeout_ms: Some(bf_timeout),
            cwd: None,
        };
        let bf_raw = executor.execute(&bf_req, token).await?;
        let bf_data = match parse(bf_raw, false, false, pool).await? {
            Outcome::Open(data) => data,
            Outcome::Settled(settled) => {
                if settled.verdict == Verdict::Rejected {
                    aborted = true;
                } else {
                    set_msg(
                        problem,
                        format!(
                            "Brute force run failed: {}",
                            settled.msg.clone().unwrap_or_default()
                        ),
                    );
                }
                dispose_data(settled.data, pool);
                input.dispose(pool);
                break;
            }
        };
        bf_data.stderr.dispose(pool);
        let answer = bf_data.stdout;

        set_msg(problem, format!("#{cnt} Running solution..."));
        let mut tc = TestCase::new(input, answer);
        runner
            .judge_case(&mut tc, &bundle, problem.time_limit_ms, problem.memory_limit_mib, token)
            .await;

        let verdict = tc.result.as_ref().map(|r| r.verdict).unwrap_or(Verdict::SystemError);
        match verdict {
            Verdict::Rejected => {
                dispose_case(tc, pool);
                aborted = true;
                break;
            }
            Verdict::Accepted => {
                dispose_case(tc, pool);
            }
            _ => {
                info!(%verdict, run = cnt, "difference found");
                persist_failing_case(problem, tc, settings, pool).await;
                set_msg(problem, format!("Found a difference in #{cnt} run."));
                break;
            }
        }
    }

    if aborted || token.is_cancelled() {
        set_msg(problem, format!("Brute force comparison stopped by user, {cnt} runs completed."));
    }
    Ok(())
}

/// Keep the counterexample: inline what fits, hand still-file-backed data
/// over from the pool to the problem, and append it as an expanded case
/// with its failing result attached.
async fn persist_failing_case(
    problem: &mut Problem,
    mut tc: TestCase,
    settings: &Settings,
    pool: &CachePool,
) {
    let max = settings.max_inline_bytes;
    if let Err(e) = tc.stdin.inline_small(max, pool).await {
        warn!(error = %e, "failed to inline generated input");
    }
    if let Err(e) = tc.answer.inline_small(max, pool).await {
        warn!(error = %e, "failed to inline reference answer");
    }

    for data in [&tc.stdin, &tc.answer] {
        if let IoData::FileRef(path) = data {
            pool.detach(path);
        }
    }
    if let Some(result) = tc.result.as_ref() {
        for data in [&result.stdout, &result.stderr] {
            if let IoData::FileRef(path) = data {
                pool.detach(path);
            }
        }
    }

    tc.expand = true;
    problem.add_tc(tc);
}

fn dispose_case(tc: TestCase, pool: &CachePool) {
    tc.stdin.dispose(pool);
    tc.answer.dispose(pool);
    if let Some(result) = tc.result {
        result.dispose(pool);
    }
}

fn dispose_data(data: Option<RunData>, pool: &CachePool) {
    if let Some(data) = data {
        data.stdout.dispose(pool);
        data.stderr.dispose(pool);
    }
}

fn set_msg(problem: &mut Problem, msg: impl Into<String>) {
    if let Some(bf) = problem.bf.as_mut() {
        bf.msg = msg.into();
    }
}

fn set_runs(problem: &mut Problem, runs: u64) {
    if let Some(bf) = problem.bf.as_mut() {
        bf.runs = runs;
    }
}

fn set_running(problem: &mut Problem, running: bool) {
    if let Some(bf) = problem.bf.as_mut() {
        bf.running = running;
    }
}
