use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::error::Result;
use crate::outcome::{Outcome, Settled};
use crate::types::{Artifact, SourceFile};
use crate::verdict::Verdict;

mod cpp;
mod java;
mod javascript;
mod python;

/// Language Registry - Compile and Run Strategies
///
/// **Core Responsibility:**
/// Map a source file to its language and drive that language's compile
/// contract: fingerprint the source, reuse the cached artifact when nothing
/// changed, otherwise invoke the compiler and classify the result as a
/// typed outcome (success, compile error, rejection, system error).
///
/// Adding a language means adding a variant here; callers never switch on
/// languages themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lang {
    Cpp,
    Java,
    Python,
    JavaScript,
}

/// Tri-state compile forcing. `Auto` recompiles only when the fingerprint
/// changed or the artifact is missing or unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForceMode {
    #[default]
    Auto,
    Recompile,
    SkipCompile,
}

/// Everything one compile invocation needs besides the source itself.
pub struct CompileCtx<'a> {
    pub settings: &'a Settings,
    pub token: &'a CancelToken,
    pub force: ForceMode,
    /// Link the instrumentation wrapper into the artifact (C++ only).
    pub wrapper: bool,
    /// Per-problem override of the configured compiler arguments.
    pub extra_args: Option<&'a [String]>,
}

impl Lang {
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Lang::Cpp => &["cpp", "cc", "cxx", "c++"],
            Lang::Java => &["java"],
            Lang::Python => &["py"],
            Lang::JavaScript => &["js"],
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Lang::Cpp => "C++",
            Lang::Java => "Java",
            Lang::Python => "Python",
            Lang::JavaScript => "JavaScript",
        }
    }

    /// Match a source path against each language's extension list,
    /// case-insensitively. `None` is an error for solutions but a
    /// legitimate "use the file as-is" for companion programs.
    pub fn from_path(path: &Path) -> Option<Lang> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        [Lang::Cpp, Lang::Java, Lang::Python, Lang::JavaScript]
            .into_iter()
            .find(|lang| lang.extensions().contains(&ext.as_str()))
    }

    pub async fn compile(
        &self,
        src: &mut SourceFile,
        ctx: &CompileCtx<'_>,
    ) -> Result<Outcome<Artifact>> {
        match self {
            Lang::Cpp => cpp::compile(src, ctx).await,
            Lang::Java => java::compile(src, ctx).await,
            Lang::Python => python::compile(src, ctx).await,
            Lang::JavaScript => javascript::compile(src, ctx).await,
        }
    }

    pub fn run_command(&self, artifact: &Artifact, settings: &Settings) -> Vec<String> {
        match self {
            Lang::Cpp => cpp::run_command(artifact),
            Lang::Java => java::run_command(artifact, settings),
            Lang::Python => python::run_command(artifact, settings),
            Lang::JavaScript => javascript::run_command(artifact, settings),
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

pub(crate) fn fingerprint(source: &str, extra: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(extra.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Short digest of the source path, mixed into artifact names so two
/// sources sharing a file stem cannot clobber each other's cached binary.
pub(crate) fn path_tag(path: &Path) -> String {
    let full = fingerprint(&path.display().to_string(), "");
    full[..8].to_string()
}

pub(crate) fn artifact_stem(src: &Path) -> String {
    let stem = src
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "program".to_string());
    format!("{}-{}", stem, path_tag(src))
}

/// Cache check: skip the compile when forced to, or when the stored
/// fingerprint matches and the artifact is still usable.
pub(crate) async fn cache_fresh(
    src: &SourceFile,
    fingerprint: &str,
    artifact: &Path,
    force: ForceMode,
    needs_exec: bool,
) -> bool {
    match force {
        ForceMode::SkipCompile => true,
        ForceMode::Recompile => false,
        ForceMode::Auto => {
            src.hash.as_deref() == Some(fingerprint)
                && artifact_usable(artifact, needs_exec).await
        }
    }
}

pub(crate) async fn artifact_usable(path: &Path, needs_exec: bool) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => {
            if !meta.is_file() {
                return false;
            }
            if !needs_exec {
                return true;
            }
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                meta.permissions().mode() & 0o111 != 0
            }
            #[cfg(not(unix))]
            {
                true
            }
        }
        Err(_) => false,
    }
}

pub(crate) async fn remove_stale(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "could not remove stale artifact");
        }
    }
}

/// Run one compiler invocation under the compile timeout and the run's
/// cancellation token. `None` means success; `Some` carries the settled
/// failure (compile error with diagnostics, rejection, system error).
pub(crate) async fn run_compiler(
    cmd: &[String],
    token: &CancelToken,
    timeout_ms: u64,
) -> Result<Option<Settled<Artifact>>> {
    let Some((program, args)) = cmd.split_first() else {
        return Ok(Some(Settled::with_msg(
            Verdict::SystemError,
            "Empty compiler command",
        )));
    };
    debug!(cmd = %cmd.join(" "), "invoking compiler");

    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return Ok(Some(Settled::with_msg(
                Verdict::SystemError,
                format!("Failed to launch compiler {program}: {e}"),
            )));
        }
    };

    // Drain both pipes concurrently; a compiler blocked on a full stderr
    // pipe would otherwise never exit.
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let collector = tokio::spawn(async move {
        let out_fut = async {
            let mut buf = String::new();
            if let Some(mut pipe) = stdout_pipe {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        };
        let err_fut = async {
            let mut buf = String::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        };
        tokio::join!(out_fut, err_fut)
    });

    let mut cancelled = false;
    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = token.cancelled() => {
            cancelled = true;
            None
        }
        _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => None,
    };

    let status = match waited {
        Some(status) => status,
        None => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            let _ = collector.await;
            return Ok(Some(if cancelled {
                Settled::with_msg(Verdict::Rejected, "Compilation aborted by user.")
            } else {
                Settled::with_msg(Verdict::CompileError, "Compilation failed because of timeout")
            }));
        }
    };

    let (stdout, stderr) = collector.await.unwrap_or_default();

    let status = match status {
        Ok(status) => status,
        Err(e) => {
            return Ok(Some(Settled::with_msg(
                Verdict::SystemError,
                format!("Failed to wait for compiler: {e}"),
            )));
        }
    };

    if status.success() {
        return Ok(None);
    }

    let mut diag = String::new();
    if !stderr.trim().is_empty() {
        diag.push_str(stderr.trim_end());
    }
    if !stdout.trim().is_empty() {
        if !diag.is_empty() {
            diag.push('\n');
        }
        diag.push_str(stdout.trim_end());
    }
    if diag.is_empty() {
        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        diag = format!("Compiler exited with code {code}");
    }
    Ok(Some(Settled::with_msg(Verdict::CompileError, diag)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn extension_matching_is_case_insensitive() {
        assert_eq!(Lang::from_path(Path::new("a.cpp")), Some(Lang::Cpp));
        assert_eq!(Lang::from_path(Path::new("a.CC")), Some(Lang::Cpp));
        assert_eq!(Lang::from_path(Path::new("Main.JAVA")), Some(Lang::Java));
        assert_eq!(Lang::from_path(Path::new("gen.py")), Some(Lang::Python));
        assert_eq!(Lang::from_path(Path::new("sol.js")), Some(Lang::JavaScript));
        assert_eq!(Lang::from_path(Path::new("checker.bin")), None);
        assert_eq!(Lang::from_path(Path::new("noext")), None);
    }

    #[test]
    fn fingerprint_tracks_source_and_configuration() {
        let base = fingerprint("int main() {}", "g++-O2");
        assert_eq!(base, fingerprint("int main() {}", "g++-O2"));
        assert_ne!(base, fingerprint("int main() { }", "g++-O2"));
        assert_ne!(base, fingerprint("int main() {}", "g++-O3"));
    }

    #[test]
    fn artifact_stems_differ_for_same_file_name() {
        let a = artifact_stem(Path::new("/work/contest-a/sol.cpp"));
        let b = artifact_stem(Path::new("/work/contest-b/sol.cpp"));
        assert!(a.starts_with("sol-"));
        assert_ne!(a, b, "same stem in different directories must not collide");
    }

    #[test]
    fn run_commands_have_expected_shape() {
        let settings = Settings::default();
        let cpp = Lang::Cpp.run_command(&Artifact::new("/cache/bin/sol-aa", ""), &settings);
        assert_eq!(cpp, vec!["/cache/bin/sol-aa".to_string()]);

        let java = Lang::Java.run_command(
            &Artifact::new("/cache/bin/Main-ab/Main.class", ""),
            &settings,
        );
        assert_eq!(java[0], "java");
        assert!(java.contains(&"-cp".to_string()));
        assert_eq!(java.last().map(String::as_str), Some("Main"));

        let py = Lang::Python.run_command(&Artifact::new("/cache/bin/gen-ac.pyc", ""), &settings);
        assert_eq!(py, vec!["python3".to_string(), "/cache/bin/gen-ac.pyc".to_string()]);

        let js = Lang::JavaScript.run_command(&Artifact::new("/src/sol.js", ""), &settings);
        assert_eq!(js, vec!["node".to_string(), "/src/sol.js".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cache_freshness_requires_matching_hash_and_usable_artifact() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let artifact = dir.path().join("sol");
        tokio::fs::write(&artifact, "#!/bin/sh\n").await.expect("write");

        let mut src = SourceFile::new("/tmp/sol.cpp");
        src.hash = Some("fp".to_string());

        // Not executable yet.
        assert!(!cache_fresh(&src, "fp", &artifact, ForceMode::Auto, true).await);

        let mut perms = std::fs::metadata(&artifact).expect("meta").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&artifact, perms).expect("chmod");

        assert!(cache_fresh(&src, "fp", &artifact, ForceMode::Auto, true).await);
        assert!(!cache_fresh(&src, "other", &artifact, ForceMode::Auto, true).await);
        assert!(!cache_fresh(&src, "fp", &artifact, ForceMode::Recompile, true).await);
        assert!(
            cache_fresh(&src, "other", &artifact, ForceMode::SkipCompile, true).await,
            "forced skip trusts whatever is there"
        );

        let missing = PathBuf::from("/nonexistent/sol");
        assert!(!cache_fresh(&src, "fp", &missing, ForceMode::Auto, true).await);
    }
}
