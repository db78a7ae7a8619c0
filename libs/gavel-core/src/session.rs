use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::cache::CachePool;
use crate::cancel::{CancelReason, RunScope};
use crate::compiler::compile_bundle;
use crate::config::{ExpandBehavior, Settings};
use crate::error::{Error, Result};
use crate::interpret::RunData;
use crate::langs::ForceMode;
use crate::outcome::Outcome;
use crate::runner::Runner;
use crate::stress;
use crate::types::{Problem, TcResult};
use crate::verdict::Verdict;

/// Judge Session - Suite Driver
///
/// **Core Responsibility:**
/// Own the run-at-a-time invariant and the suite-level semantics on top of
/// the per-case runner: one compile feeds a whole suite, cancellation is
/// two-grained (skip the current case vs abort the run), and every case
/// ends on a terminal verdict no matter how the run ended.
///
/// **Concurrency:**
/// All entry points claim the session's run scope first, which cancels and
/// waits out any run still in flight. `stop`/`request_stop` can be called
/// from any task.
pub struct JudgeSession {
    runner: Runner,
    scope: RunScope,
    settings: Arc<Settings>,
    pool: CachePool,
}

impl JudgeSession {
    pub fn new(settings: Arc<Settings>) -> Self {
        let pool = CachePool::new(settings.io_dir());
        JudgeSession {
            runner: Runner::new(pool.clone(), settings.clone()),
            scope: RunScope::new(),
            settings,
            pool,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.scope.is_running()
    }

    /// Judge one test case: compile, run, store the result on the case.
    /// Replaces any run currently in flight.
    #[instrument(skip(self, problem, force), fields(problem = %problem.name))]
    pub async fn run_case(&self, problem: &mut Problem, id: Uuid, force: ForceMode) -> Result<()> {
        let (_guard, token) = self.scope.acquire().await;

        {
            let tc = problem
                .tcs
                .get_mut(&id)
                .ok_or_else(|| Error::problem(format!("No such test case: {id}")))?;
            if let Some(old) = tc.result.take() {
                old.dispose(&self.pool);
            }
            tc.expand = false;
            tc.result = Some(TcResult::fresh());
        }

        let bundle = match compile_bundle(problem, false, &self.settings, &token, force).await? {
            Outcome::Open(bundle) => bundle,
            Outcome::Settled(settled) => {
                if let Some(tc) = problem.tcs.get_mut(&id) {
                    if let Some(result) = tc.result.as_mut() {
                        result.absorb(settled.recast());
                    }
                    tc.expand = true;
                }
                return Ok(());
            }
        };

        let time_limit = problem.time_limit_ms;
        let memory_limit = problem.memory_limit_mib;
        let tc = problem
            .tcs
            .get_mut(&id)
            .ok_or_else(|| Error::problem(format!("No such test case: {id}")))?;
        if let Some(result) = tc.result.as_mut() {
            result.verdict = Verdict::Compiled;
        }

        self.runner.judge_case(tc, &bundle, time_limit, memory_limit, &token).await;
        tc.expand = tc.result.as_ref().map(|r| r.verdict.needs_attention()).unwrap_or(false);
        Ok(())
    }

    /// Judge every enabled case in display order. One compile feeds the
    /// suite. A skip cancellation marks the current case Skipped and the
    /// suite continues with a refreshed token; an abort marks the rest
    /// Skipped and stops. Cases still transient at the end become Rejected.
    #[instrument(skip(self, problem, force), fields(problem = %problem.name))]
    pub async fn run_all(&self, problem: &mut Problem, force: ForceMode) -> Result<()> {
        let (guard, mut token) = self.scope.acquire().await;

        let ids = problem.enabled_tcs();
        let expand_behavior = self.settings.expand_behavior;
        let keep_expand = expand_behavior == ExpandBehavior::Same;

        for id in &ids {
            if let Some(tc) = problem.tcs.get_mut(id) {
                if let Some(old) = tc.result.take() {
                    old.dispose(&self.pool);
                }
                if !keep_expand {
                    tc.expand = false;
                }
                tc.result = Some(TcResult::fresh());
            }
        }

        let bundle = match compile_bundle(problem, false, &self.settings, &token, force).await? {
            Outcome::Open(bundle) => bundle,
            Outcome::Settled(settled) => {
                // Every case shares the compile failure; the first one is
                // expanded so the diagnostics are visible.
                let recast = settled.recast::<RunData>();
                let mut first = true;
                for id in &ids {
                    if let Some(tc) = problem.tcs.get_mut(id) {
                        if let Some(result) = tc.result.as_mut() {
                            result.absorb(recast.clone());
                        }
                        tc.expand = first;
                        first = false;
                    }
                }
                return Ok(());
            }
        };

        for id in &ids {
            if let Some(result) = problem.tcs.get_mut(id).and_then(|tc| tc.result.as_mut()) {
                result.verdict = Verdict::Compiled;
            }
        }

        let time_limit = problem.time_limit_ms;
        let memory_limit = problem.memory_limit_mib;
        let mut expanded_any = false;

        for (idx, id) in ids.iter().enumerate() {
            match token.reason() {
                Some(CancelReason::Abort) => {
                    for rest in &ids[idx..] {
                        if let Some(result) =
                            problem.tcs.get_mut(rest).and_then(|tc| tc.result.as_mut())
                        {
                            if result.verdict.is_transient() {
                                result.verdict = Verdict::Skipped;
                            }
                        }
                    }
                    break;
                }
                Some(CancelReason::SkipCurrent) => {
                    token = guard.refresh();
                }
                None => {}
            }

            let Some(tc) = problem.tcs.get_mut(id) else { continue };
            self.runner.judge_case(tc, &bundle, time_limit, memory_limit, &token).await;

            // A skip that landed during this case takes effect now.
            if token.reason() == Some(CancelReason::SkipCurrent) {
                if let Some(result) = tc.result.as_mut() {
                    result.verdict = Verdict::Skipped;
                }
                token = guard.refresh();
            }

            if expand_behavior != ExpandBehavior::Same {
                let expand = match expand_behavior {
                    ExpandBehavior::Always => true,
                    ExpandBehavior::Never | ExpandBehavior::Same => false,
                    ExpandBehavior::First => !expanded_any,
                    ExpandBehavior::FirstFailed => {
                        !expanded_any
                            && tc
                                .result
                                .as_ref()
                                .map(|r| r.verdict.needs_attention())
                                .unwrap_or(false)
                    }
                };
                if expand {
                    tc.expand = true;
                    expanded_any = true;
                }
            }
        }

        // Anything still transient was never judged.
        for id in &ids {
            if let Some(result) = problem.tcs.get_mut(id).and_then(|tc| tc.result.as_mut()) {
                if result.verdict.is_transient() {
                    result.verdict = Verdict::Rejected;
                }
            }
        }
        Ok(())
    }

    /// Run the stress loop: generate, run the reference, run the solution,
    /// loop until the outputs differ or the run is cancelled. A found
    /// difference is added to the problem as a new test case.
    #[instrument(skip(self, problem, force), fields(problem = %problem.name))]
    pub async fn stress(&self, problem: &mut Problem, force: ForceMode) -> Result<()> {
        let (_guard, token) = self.scope.acquire().await;
        stress::run(&self.runner, problem, &self.settings, &token, force).await
    }

    /// Cancel the run in flight. `only_current` skips just the case being
    /// judged; a full stop also waits for the run to unwind.
    pub async fn stop(&self, only_current: bool) {
        if only_current {
            self.scope.stop(CancelReason::SkipCurrent);
        } else {
            self.scope.stop(CancelReason::Abort);
            self.scope.wait_idle().await;
        }
    }

    /// Fire-and-forget abort, for callers that hold the run future
    /// themselves and must not await it here.
    pub fn request_stop(&self) {
        self.scope.stop(CancelReason::Abort);
    }
}
