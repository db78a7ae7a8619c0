use crate::config::Settings;
use crate::error::Result;
use crate::outcome::Outcome;
use crate::types::{Artifact, SourceFile};
use crate::verdict::Verdict;

use super::{artifact_stem, artifact_usable, cache_fresh, fingerprint, remove_stale, run_compiler, CompileCtx};

/// Java compile strategy. Each source gets its own class directory under
/// the binary cache so identically named classes from different problems
/// stay apart; the artifact is the main class file inside it.
pub(super) async fn compile(
    src: &mut SourceFile,
    ctx: &CompileCtx<'_>,
) -> Result<Outcome<Artifact>> {
    let comp = &ctx.settings.compilation;
    let args: Vec<String> = ctx
        .extra_args
        .map(|a| a.to_vec())
        .unwrap_or_else(|| comp.java_args.clone());

    let source = match tokio::fs::read_to_string(&src.path).await {
        Ok(s) => s,
        Err(e) => {
            return Ok(Outcome::settled(
                Verdict::SystemError,
                format!("Failed to read source file {}: {e}", src.path.display()),
            ));
        }
    };

    let config = format!("{} {}", comp.java_compiler, args.join(" "));
    let fp = fingerprint(&source, &config);

    let stem = src
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Main".to_string());
    let class_dir = ctx.settings.bin_dir().join(artifact_stem(&src.path));
    let artifact_path = class_dir.join(format!("{stem}.class"));

    if cache_fresh(src, &fp, &artifact_path, ctx.force, false).await {
        return Ok(Outcome::Open(Artifact::new(artifact_path, fp)));
    }

    remove_stale(&artifact_path).await;
    if let Err(e) = tokio::fs::create_dir_all(&class_dir).await {
        return Ok(Outcome::settled(
            Verdict::SystemError,
            format!("Failed to create class directory: {e}"),
        ));
    }

    let mut cmd = vec![comp.java_compiler.clone()];
    cmd.extend(args.iter().cloned());
    cmd.extend([
        "-d".into(),
        class_dir.display().to_string(),
        src.path.display().to_string(),
    ]);
    if let Some(settled) = run_compiler(&cmd, ctx.token, comp.timeout_ms).await? {
        return Ok(Outcome::Settled(settled));
    }

    if !artifact_usable(&artifact_path, false).await {
        return Ok(Outcome::settled(
            Verdict::CompileError,
            "Compiler did not produce a class file",
        ));
    }

    src.hash = Some(fp.clone());
    Ok(Outcome::Open(Artifact::new(artifact_path, fp)))
}

pub(super) fn run_command(artifact: &Artifact, settings: &Settings) -> Vec<String> {
    let comp = &settings.compilation;
    let class_dir = artifact
        .path
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| ".".to_string());
    let class_name = artifact
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Main".to_string());

    let mut cmd = vec![comp.java_runner.clone()];
    cmd.extend(comp.java_run_args.iter().cloned());
    cmd.extend(["-cp".into(), class_dir, class_name]);
    cmd
}
