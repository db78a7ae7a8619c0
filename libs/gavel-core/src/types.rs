use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::CachePool;
use crate::config::Settings;
use crate::error::Result;
use crate::interpret::RunData;
use crate::langs::Lang;
use crate::outcome::Settled;
use crate::verdict::Verdict;

/// Test-case I/O: small data lives inline, large data is spilled to a pool
/// file. Every consumer goes through the same accessors regardless of which
/// representation is current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IoData {
    Inline(String),
    FileRef(PathBuf),
}

impl Default for IoData {
    fn default() -> Self {
        IoData::Inline(String::new())
    }
}

/// A resolved on-disk path for an [`IoData`]. `pooled` marks paths that were
/// spilled just for this use and must go back to the pool afterwards.
#[derive(Debug)]
pub struct IoPath {
    path: PathBuf,
    pooled: bool,
}

impl IoPath {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn arg(&self) -> String {
        self.path.display().to_string()
    }

    pub fn release(self, pool: &CachePool) {
        if self.pooled {
            pool.release(&self.path);
        }
    }
}

impl IoData {
    pub fn empty() -> Self {
        IoData::Inline(String::new())
    }

    pub fn inline(s: impl Into<String>) -> Self {
        IoData::Inline(s.into())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        IoData::FileRef(path.into())
    }

    /// Full content as a string, whichever representation is current.
    pub async fn read(&self) -> Result<String> {
        match self {
            IoData::Inline(s) => Ok(s.clone()),
            IoData::FileRef(path) => Ok(tokio::fs::read_to_string(path).await?),
        }
    }

    pub async fn byte_len(&self) -> Result<u64> {
        match self {
            IoData::Inline(s) => Ok(s.len() as u64),
            IoData::FileRef(path) => Ok(tokio::fs::metadata(path).await?.len()),
        }
    }

    /// Materialize as a file path, spilling inline data to a pool file.
    pub async fn to_path(&self, pool: &CachePool) -> Result<IoPath> {
        match self {
            IoData::FileRef(path) => Ok(IoPath { path: path.clone(), pooled: false }),
            IoData::Inline(s) => {
                let path = pool.acquire().await?;
                tokio::fs::write(&path, s).await?;
                Ok(IoPath { path, pooled: true })
            }
        }
    }

    /// Convert a small file back to inline storage and release the file.
    /// Data above `max_bytes` stays in its file.
    pub async fn inline_small(&mut self, max_bytes: u64, pool: &CachePool) -> Result<()> {
        if let IoData::FileRef(path) = self {
            let len = match tokio::fs::metadata(&*path).await {
                Ok(meta) => meta.len(),
                Err(_) => return Ok(()), // already gone, nothing to inline
            };
            if len <= max_bytes {
                let content = tokio::fs::read_to_string(&*path).await?;
                let old = path.clone();
                *self = IoData::Inline(content);
                pool.release(&old);
            }
        }
        Ok(())
    }

    /// Return the backing file to the pool. Inline data has nothing to free.
    pub fn dispose(&self, pool: &CachePool) {
        if let IoData::FileRef(path) = self {
            pool.release(path);
        }
    }
}

/// A source file on disk plus the fingerprint recorded at the last
/// successful compile. The hash updates only on success, so a failed
/// compile never poisons the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: PathBuf,
    #[serde(default)]
    pub hash: Option<String>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SourceFile { path: path.into(), hash: None }
    }
}

/// Output of a compile: the artifact location and the fingerprint that
/// validates cache hits against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub fingerprint: String,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, fingerprint: impl Into<String>) -> Self {
        Artifact { path: path.into(), fingerprint: fingerprint.into() }
    }
}

/// A runnable program: a compiled artifact plus the language that knows how
/// to build its run command. `lang` is `None` for use-as-is programs
/// (prebuilt checker binaries, shell scripts) which are invoked directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub lang: Option<Lang>,
    pub artifact: Artifact,
}

impl Program {
    pub fn run_command(&self, settings: &Settings) -> Vec<String> {
        match self.lang {
            Some(lang) => lang.run_command(&self.artifact, settings),
            None => vec![self.artifact.path.display().to_string()],
        }
    }
}

/// Everything one judging run needs compiled. Checker and interactor may
/// both be present; the checker takes precedence. Generator and brute force
/// come as a pair or not at all.
#[derive(Debug, Clone, Default)]
pub struct CompileBundle {
    pub solution: Option<Program>,
    pub checker: Option<Program>,
    pub interactor: Option<Program>,
    pub generator: Option<Program>,
    pub brute_force: Option<Program>,
}

/// Live result of judging one test case. Mutated in place as the run walks
/// the verdict state machine; each field is only meaningful once the stage
/// producing it has completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcResult {
    pub verdict: Verdict,
    pub time_ms: f64,
    #[serde(default)]
    pub memory_mib: Option<f64>,
    #[serde(default)]
    pub stdout: IoData,
    #[serde(default)]
    pub stderr: IoData,
    #[serde(default)]
    pub messages: Vec<String>,
}

impl TcResult {
    pub fn fresh() -> Self {
        TcResult {
            verdict: Verdict::Compiling,
            time_ms: 0.0,
            memory_mib: None,
            stdout: IoData::empty(),
            stderr: IoData::empty(),
            messages: Vec::new(),
        }
    }

    /// Adopt a settled outcome: verdict, message, and any run data the
    /// failing stage produced (streams of a timed-out process).
    pub fn absorb(&mut self, settled: Settled<RunData>) {
        self.verdict = settled.verdict;
        if let Some(msg) = settled.msg {
            self.messages.push(msg);
        }
        if let Some(data) = settled.data {
            self.take_data(data);
        }
    }

    /// Adopt only the verdict and message, keeping this result's own run
    /// data. Used for checker judgements, which describe the solution's
    /// output rather than replace it.
    pub fn absorb_verdict(&mut self, settled: Settled<RunData>) {
        self.verdict = settled.verdict;
        if let Some(msg) = settled.msg {
            self.messages.push(msg);
        }
    }

    pub fn take_data(&mut self, data: RunData) {
        self.time_ms = data.time_ms;
        self.memory_mib = data.memory_mib;
        self.stdout = data.stdout;
        self.stderr = data.stderr;
    }

    pub async fn inline_small(&mut self, max_bytes: u64, pool: &CachePool) {
        if let Err(e) = self.stdout.inline_small(max_bytes, pool).await {
            tracing::warn!(error = %e, "failed to inline stdout");
        }
        if let Err(e) = self.stderr.inline_small(max_bytes, pool).await {
            tracing::warn!(error = %e, "failed to inline stderr");
        }
    }

    pub fn dispose(&self, pool: &CachePool) {
        self.stdout.dispose(pool);
        self.stderr.dispose(pool);
    }
}

/// One test case: input, expected answer, and the latest result. `disabled`
/// cases are skipped by suite runs; `expand` asks the UI to show this case's
/// details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub stdin: IoData,
    pub answer: IoData,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub expand: bool,
    #[serde(default)]
    pub result: Option<TcResult>,
}

impl TestCase {
    pub fn new(stdin: IoData, answer: IoData) -> Self {
        TestCase { stdin, answer, disabled: false, expand: false, result: None }
    }
}

/// Stress-test configuration and live state for one problem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BfCompare {
    #[serde(default)]
    pub generator: Option<SourceFile>,
    #[serde(default)]
    pub brute_force: Option<SourceFile>,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub runs: u64,
    #[serde(default)]
    pub msg: String,
}

/// A problem: the solution source, its test cases in display order, limits,
/// and the optional companion programs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub name: String,
    pub src: SourceFile,
    #[serde(default)]
    pub tcs: HashMap<Uuid, TestCase>,
    #[serde(default)]
    pub tc_order: Vec<Uuid>,
    pub time_limit_ms: u64,
    pub memory_limit_mib: u64,
    #[serde(default)]
    pub checker: Option<SourceFile>,
    #[serde(default)]
    pub interactor: Option<SourceFile>,
    /// Overrides the configured compiler arguments for the solution only.
    #[serde(default)]
    pub compile_args: Option<Vec<String>>,
    #[serde(default)]
    pub bf: Option<BfCompare>,
}

impl Problem {
    pub fn new(name: impl Into<String>, src: impl Into<PathBuf>) -> Self {
        Problem {
            name: name.into(),
            src: SourceFile::new(src),
            tcs: HashMap::new(),
            tc_order: Vec::new(),
            time_limit_ms: 3000,
            memory_limit_mib: 256,
            checker: None,
            interactor: None,
            compile_args: None,
            bf: None,
        }
    }

    pub fn add_tc(&mut self, tc: TestCase) -> Uuid {
        let id = Uuid::new_v4();
        self.tcs.insert(id, tc);
        self.tc_order.push(id);
        id
    }

    /// Ids of the cases a suite run judges, in display order.
    pub fn enabled_tcs(&self) -> Vec<Uuid> {
        self.tc_order
            .iter()
            .filter(|id| self.tcs.get(id).map(|tc| !tc.disabled).unwrap_or(false))
            .copied()
            .collect()
    }
}
