use crate::config::Settings;
use crate::error::Result;
use crate::outcome::Outcome;
use crate::types::{Artifact, SourceFile};

use super::CompileCtx;

// JavaScript has no compile step; the source file is the artifact.
pub(super) async fn compile(
    src: &mut SourceFile,
    _ctx: &CompileCtx<'_>,
) -> Result<Outcome<Artifact>> {
    Ok(Outcome::Open(Artifact::new(src.path.clone(), String::new())))
}

pub(super) fn run_command(artifact: &Artifact, settings: &Settings) -> Vec<String> {
    let comp = &settings.compilation;
    let mut cmd = vec![comp.node.clone()];
    cmd.extend(comp.node_run_args.iter().cloned());
    cmd.push(artifact.path.display().to_string());
    cmd
}
