use tracing::{debug, info, instrument};

use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::error::Result;
use crate::langs::{CompileCtx, ForceMode, Lang};
use crate::outcome::{Outcome, Settled};
use crate::types::{Artifact, CompileBundle, Problem, Program, SourceFile};
use crate::verdict::Verdict;

/// Bundle Compiler
///
/// **Core Responsibility:**
/// Compile everything one judging run needs: the solution first, then the
/// companion programs (checker, interactor, and for stress runs the
/// generator and brute force). Compilation stops at the first failure; the
/// settled outcome carries the partial bundle so callers can still inspect
/// what did build.
///
/// Companion sources without a recognized extension are not an error: they
/// are taken as prebuilt executables and invoked as-is.
#[instrument(skip_all, fields(problem = %problem.name, need_stress))]
pub async fn compile_bundle(
    problem: &mut Problem,
    need_stress: bool,
    settings: &Settings,
    token: &CancelToken,
    force: ForceMode,
) -> Result<Outcome<CompileBundle>> {
    let exec = &settings.execution;
    if exec.use_shim && exec.use_wrapper {
        return Ok(Outcome::settled(
            Verdict::Rejected,
            "Cannot use both the execution shim and the instrumentation wrapper at the same time",
        ));
    }

    let Some(lang) = Lang::from_path(&problem.src.path) else {
        return Ok(Outcome::settled(
            Verdict::SystemError,
            format!(
                "Cannot determine the programming language of the source file: {}",
                problem.src.path.display()
            ),
        ));
    };

    let mut bundle = CompileBundle::default();

    let extra_args = problem.compile_args.clone();
    let ctx = CompileCtx {
        settings,
        token,
        force,
        wrapper: exec.use_wrapper,
        extra_args: extra_args.as_deref(),
    };
    match lang.compile(&mut problem.src, &ctx).await? {
        Outcome::Open(artifact) => {
            bundle.solution = Some(Program { lang: Some(lang), artifact });
        }
        Outcome::Settled(s) => {
            info!(verdict = %s.verdict, "solution compilation settled");
            return Ok(Outcome::Settled(s.recast().with_data(bundle)));
        }
    }

    // Companion programs never get the wrapper or per-problem arguments.
    let aux_ctx = CompileCtx { settings, token, force, wrapper: false, extra_args: None };

    if let Some(checker) = problem.checker.as_mut() {
        match aux_program(checker, &aux_ctx).await? {
            Outcome::Open(program) => bundle.checker = Some(program),
            Outcome::Settled(s) => return Ok(Outcome::Settled(s.recast().with_data(bundle))),
        }
    }

    if let Some(interactor) = problem.interactor.as_mut() {
        match aux_program(interactor, &aux_ctx).await? {
            Outcome::Open(program) => bundle.interactor = Some(program),
            Outcome::Settled(s) => return Ok(Outcome::Settled(s.recast().with_data(bundle))),
        }
    }

    if need_stress {
        let missing = match problem.bf.as_ref() {
            Some(bf) => bf.generator.is_none() || bf.brute_force.is_none(),
            None => true,
        };
        if missing {
            return Ok(Outcome::Settled(
                Settled::with_msg(
                    Verdict::Rejected,
                    "Both generator and brute force source files must be provided for brute force comparison.",
                )
                .with_data(bundle),
            ));
        }
        if let Some(bf) = problem.bf.as_mut() {
            if let Some(generator) = bf.generator.as_mut() {
                match aux_program(generator, &aux_ctx).await? {
                    Outcome::Open(program) => bundle.generator = Some(program),
                    Outcome::Settled(s) => {
                        return Ok(Outcome::Settled(s.recast().with_data(bundle)))
                    }
                }
            }
            if let Some(brute_force) = bf.brute_force.as_mut() {
                match aux_program(brute_force, &aux_ctx).await? {
                    Outcome::Open(program) => bundle.brute_force = Some(program),
                    Outcome::Settled(s) => {
                        return Ok(Outcome::Settled(s.recast().with_data(bundle)))
                    }
                }
            }
        }
    }

    Ok(Outcome::Open(bundle))
}

async fn aux_program(src: &mut SourceFile, ctx: &CompileCtx<'_>) -> Result<Outcome<Program>> {
    match Lang::from_path(&src.path) {
        Some(lang) => match lang.compile(src, ctx).await? {
            Outcome::Open(artifact) => Ok(Outcome::Open(Program { lang: Some(lang), artifact })),
            Outcome::Settled(s) => Ok(Outcome::Settled(s.recast())),
        },
        None => {
            debug!(path = %src.path.display(), "treating companion program as prebuilt executable");
            Ok(Outcome::Open(Program {
                lang: None,
                artifact: Artifact::new(src.path.clone(), String::new()),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;

    #[tokio::test]
    async fn shim_and_wrapper_together_are_rejected() {
        let mut settings = Settings::default();
        settings.execution.use_shim = true;
        settings.execution.use_wrapper = true;
        let mut problem = Problem::new("p", "sol.cpp");
        let source = CancelSource::new();

        let out = compile_bundle(&mut problem, false, &settings, &source.token(), ForceMode::Auto)
            .await
            .expect("compile_bundle");
        match out {
            Outcome::Settled(s) => {
                assert_eq!(s.verdict, Verdict::Rejected);
                assert!(s.msg.expect("msg").contains("at the same time"));
            }
            Outcome::Open(_) => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn unknown_solution_language_is_a_system_error() {
        let settings = Settings::default();
        let mut problem = Problem::new("p", "solution.weird");
        let source = CancelSource::new();

        let out = compile_bundle(&mut problem, false, &settings, &source.token(), ForceMode::Auto)
            .await
            .expect("compile_bundle");
        match out {
            Outcome::Settled(s) => {
                assert_eq!(s.verdict, Verdict::SystemError);
                assert!(s.msg.expect("msg").contains("solution.weird"));
            }
            Outcome::Open(_) => panic!("expected settled outcome"),
        }
    }

    #[tokio::test]
    async fn stress_without_generator_pair_is_rejected_with_partial_bundle() {
        let settings = Settings::default();
        // JavaScript solutions have no compile step, so no process runs here.
        let mut problem = Problem::new("p", "sol.js");
        let source = CancelSource::new();

        let out = compile_bundle(&mut problem, true, &settings, &source.token(), ForceMode::Auto)
            .await
            .expect("compile_bundle");
        match out {
            Outcome::Settled(s) => {
                assert_eq!(s.verdict, Verdict::Rejected);
                let bundle = s.data.expect("partial bundle");
                assert!(bundle.solution.is_some(), "solution compiled before the check");
            }
            Outcome::Open(_) => panic!("expected rejection"),
        }
    }
}
