use tracing::debug;

use crate::error::Result;
use crate::outcome::Outcome;
use crate::types::{Artifact, SourceFile};
use crate::verdict::Verdict;

use super::{
    artifact_stem, artifact_usable, cache_fresh, fingerprint, remove_stale, run_compiler,
    CompileCtx,
};

/// C++ compile strategy. Produces a native executable under the binary
/// cache directory; in wrapper mode the source's `main` is renamed with
/// objcopy and the instrumentation wrapper (plus optional hook) is linked
/// around it.
pub(super) async fn compile(
    src: &mut SourceFile,
    ctx: &CompileCtx<'_>,
) -> Result<Outcome<Artifact>> {
    let comp = &ctx.settings.compilation;
    let compiler = comp.cpp_compiler.clone();
    let args: Vec<String> = ctx
        .extra_args
        .map(|a| a.to_vec())
        .unwrap_or_else(|| comp.cpp_args.clone());

    let source = match tokio::fs::read_to_string(&src.path).await {
        Ok(s) => s,
        Err(e) => {
            return Ok(Outcome::settled(
                Verdict::SystemError,
                format!("Failed to read source file {}: {e}", src.path.display()),
            ));
        }
    };

    // The fingerprint must change whenever the produced binary would:
    // source text, compiler, arguments, and the wrapper configuration.
    let mut config = format!("{} {}", compiler, args.join(" "));
    if ctx.wrapper {
        config.push_str(" wrapper");
        if let Some(hook) = &comp.hook_source {
            config.push_str(&format!(" hook:{}", hook.display()));
        }
    }
    let fp = fingerprint(&source, &config);

    let mut name = artifact_stem(&src.path);
    if cfg!(windows) {
        name.push_str(".exe");
    }
    let artifact_path = ctx.settings.bin_dir().join(name);

    if cache_fresh(src, &fp, &artifact_path, ctx.force, true).await {
        debug!(artifact = %artifact_path.display(), "reusing cached binary");
        return Ok(Outcome::Open(Artifact::new(artifact_path, fp)));
    }

    remove_stale(&artifact_path).await;
    if let Err(e) = tokio::fs::create_dir_all(ctx.settings.bin_dir()).await {
        return Ok(Outcome::settled(
            Verdict::SystemError,
            format!("Failed to create binary cache directory: {e}"),
        ));
    }

    let src_str = src.path.display().to_string();
    let out_str = artifact_path.display().to_string();

    if ctx.wrapper {
        let Some(wrapper_src) = comp.wrapper_source.clone() else {
            return Ok(Outcome::settled(
                Verdict::SystemError,
                "Instrumentation wrapper source is not configured",
            ));
        };

        let main_obj = format!("{out_str}.o");
        let wrap_obj = format!("{out_str}.wrapper.o");
        let hook_obj = format!("{out_str}.hook.o");

        let mut jobs: Vec<Vec<String>> = Vec::new();

        let mut main_cmd = vec![compiler.clone()];
        main_cmd.extend(args.iter().cloned());
        main_cmd.extend([src_str.clone(), "-c".into(), "-o".into(), main_obj.clone()]);
        jobs.push(main_cmd);

        jobs.push(vec![
            compiler.clone(),
            "-fPIC".into(),
            "-c".into(),
            wrapper_src.display().to_string(),
            "-o".into(),
            wrap_obj.clone(),
        ]);

        let hook_used = comp.hook_source.is_some();
        if let Some(hook_src) = &comp.hook_source {
            jobs.push(vec![
                compiler.clone(),
                "-fPIC".into(),
                "-Wno-attributes".into(),
                "-c".into(),
                hook_src.display().to_string(),
                "-o".into(),
                hook_obj.clone(),
            ]);
        }

        // The object compiles are independent, run them in parallel.
        let results = futures_util::future::try_join_all(
            jobs.iter()
                .map(|cmd| run_compiler(cmd, ctx.token, comp.timeout_ms)),
        )
        .await?;
        for settled in results.into_iter().flatten() {
            return Ok(Outcome::Settled(settled));
        }

        // Free the original entry point for the wrapper's own main.
        let redefine = vec![
            comp.objcopy.clone(),
            "--redefine-sym".into(),
            "main=original_main".into(),
            main_obj.clone(),
        ];
        if let Some(settled) = run_compiler(&redefine, ctx.token, comp.timeout_ms).await? {
            return Ok(Outcome::Settled(settled));
        }

        let mut link = vec![compiler.clone()];
        link.extend(args.iter().cloned());
        link.push(main_obj);
        link.push(wrap_obj);
        if hook_used {
            link.push(hook_obj);
        }
        link.extend(["-o".into(), out_str.clone()]);
        // The hook resolves the real syscalls through dlsym.
        if hook_used && cfg!(target_os = "linux") {
            link.push("-ldl".into());
        }
        if let Some(settled) = run_compiler(&link, ctx.token, comp.timeout_ms).await? {
            return Ok(Outcome::Settled(settled));
        }
    } else {
        let mut cmd = vec![compiler.clone()];
        cmd.extend(args.iter().cloned());
        cmd.extend([src_str, "-o".into(), out_str]);
        if let Some(settled) = run_compiler(&cmd, ctx.token, comp.timeout_ms).await? {
            return Ok(Outcome::Settled(settled));
        }
    }

    if !artifact_usable(&artifact_path, true).await {
        return Ok(Outcome::settled(
            Verdict::CompileError,
            "Compiler did not produce an executable artifact",
        ));
    }

    src.hash = Some(fp.clone());
    Ok(Outcome::Open(Artifact::new(artifact_path, fp)))
}

pub(super) fn run_command(artifact: &Artifact) -> Vec<String> {
    vec![artifact.path.display().to_string()]
}
