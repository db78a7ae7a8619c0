use crate::config::Settings;
use crate::error::Result;
use crate::outcome::Outcome;
use crate::types::{Artifact, SourceFile};
use crate::verdict::Verdict;

use super::{artifact_stem, artifact_usable, cache_fresh, fingerprint, remove_stale, run_compiler, CompileCtx};

/// Python "compile" strategy: precompile to bytecode with `py_compile` so
/// syntax errors surface as compile errors instead of runtime errors on
/// the first test case.
pub(super) async fn compile(
    src: &mut SourceFile,
    ctx: &CompileCtx<'_>,
) -> Result<Outcome<Artifact>> {
    let comp = &ctx.settings.compilation;

    let source = match tokio::fs::read_to_string(&src.path).await {
        Ok(s) => s,
        Err(e) => {
            return Ok(Outcome::settled(
                Verdict::SystemError,
                format!("Failed to read source file {}: {e}", src.path.display()),
            ));
        }
    };

    let config = format!("{} {}", comp.python, comp.python_args.join(" "));
    let fp = fingerprint(&source, &config);

    let artifact_path = ctx
        .settings
        .bin_dir()
        .join(format!("{}.pyc", artifact_stem(&src.path)));

    if cache_fresh(src, &fp, &artifact_path, ctx.force, false).await {
        return Ok(Outcome::Open(Artifact::new(artifact_path, fp)));
    }

    remove_stale(&artifact_path).await;
    if let Err(e) = tokio::fs::create_dir_all(ctx.settings.bin_dir()).await {
        return Ok(Outcome::settled(
            Verdict::SystemError,
            format!("Failed to create binary cache directory: {e}"),
        ));
    }

    // Raw-string literals keep Windows path separators intact.
    let program = format!(
        "import py_compile; py_compile.compile(r'{}', cfile=r'{}', doraise=True)",
        src.path.display(),
        artifact_path.display()
    );
    let mut cmd = vec![comp.python.clone()];
    cmd.extend(comp.python_args.iter().cloned());
    cmd.extend(["-c".into(), program]);
    if let Some(settled) = run_compiler(&cmd, ctx.token, comp.timeout_ms).await? {
        return Ok(Outcome::Settled(settled));
    }

    if !artifact_usable(&artifact_path, false).await {
        return Ok(Outcome::settled(
            Verdict::CompileError,
            "Compiler did not produce a bytecode file",
        ));
    }

    src.hash = Some(fp.clone());
    Ok(Outcome::Open(Artifact::new(artifact_path, fp)))
}

pub(super) fn run_command(artifact: &Artifact, settings: &Settings) -> Vec<String> {
    let comp = &settings.compilation;
    let mut cmd = vec![comp.python.clone()];
    cmd.extend(comp.python_run_args.iter().cloned());
    cmd.push(artifact.path.display().to_string());
    cmd
}
