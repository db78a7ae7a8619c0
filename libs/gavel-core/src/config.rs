use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings - Engine Configuration
///
/// Every field has a default so a missing or partial settings file still
/// yields a working configuration. Loaded from JSON; the judging engine
/// only ever reads these through plain accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root for compiled artifacts and pooled capture files.
    pub cache_dir: PathBuf,
    /// File data at or below this size is stored inline after a run.
    pub max_inline_bytes: u64,
    pub expand_behavior: ExpandBehavior,
    pub compilation: CompilationSettings,
    pub execution: ExecutionSettings,
    pub comparing: ComparingSettings,
    pub stress: StressSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilationSettings {
    pub cpp_compiler: String,
    pub cpp_args: Vec<String>,
    pub objcopy: String,
    /// Instrumentation wrapper translation unit; required for wrapper mode.
    pub wrapper_source: Option<PathBuf>,
    /// Optional syscall-hook translation unit linked next to the wrapper.
    pub hook_source: Option<PathBuf>,
    pub java_compiler: String,
    pub java_args: Vec<String>,
    pub java_runner: String,
    pub java_run_args: Vec<String>,
    pub python: String,
    pub python_args: Vec<String>,
    pub python_run_args: Vec<String>,
    pub node: String,
    pub node_run_args: Vec<String>,
    /// Compiler subprocesses are killed after this long.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Grace added to the problem's time limit before the OS-level kill
    /// fires, so a process flushing buffers right at the limit survives.
    pub time_addition_ms: u64,
    /// Run solutions under the measurement shim (CPU time, peak memory).
    pub use_shim: bool,
    /// Explicit shim binary; defaults to `gavel-shim` next to the current
    /// executable.
    pub shim_path: Option<PathBuf>,
    /// Link C++ solutions with the instrumentation wrapper.
    pub use_wrapper: bool,
    /// Lift RLIMIT_STACK for shim-run children.
    pub unlimited_stack: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparingSettings {
    /// When false, any stderr output fails the case as a runtime error.
    pub ignore_stderr: bool,
    /// Output longer than answer x ratio is an output-limit verdict.
    /// `None` (or zero) disables the check.
    pub ole_ratio: Option<u64>,
    /// Treat presentation errors as accepted.
    pub pe_as_ac: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StressSettings {
    pub generator_time_limit_ms: u64,
    pub brute_force_time_limit_ms: u64,
}

/// How suite runs set the per-case `expand` flag after judging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpandBehavior {
    Always,
    Never,
    /// Expand only the first case that finishes.
    First,
    /// Expand only the first case that needs attention.
    #[default]
    FirstFailed,
    /// Leave the flags as they are.
    Same,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            cache_dir: std::env::temp_dir().join("gavel"),
            max_inline_bytes: 64 * 1024,
            expand_behavior: ExpandBehavior::default(),
            compilation: CompilationSettings::default(),
            execution: ExecutionSettings::default(),
            comparing: ComparingSettings::default(),
            stress: StressSettings::default(),
        }
    }
}

impl Default for CompilationSettings {
    fn default() -> Self {
        CompilationSettings {
            cpp_compiler: "g++".to_string(),
            cpp_args: vec!["-O2".to_string()],
            objcopy: "objcopy".to_string(),
            wrapper_source: None,
            hook_source: None,
            java_compiler: "javac".to_string(),
            java_args: Vec::new(),
            java_runner: "java".to_string(),
            java_run_args: Vec::new(),
            python: "python3".to_string(),
            python_args: Vec::new(),
            python_run_args: Vec::new(),
            node: "node".to_string(),
            node_run_args: Vec::new(),
            timeout_ms: 30_000,
        }
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        ExecutionSettings {
            time_addition_ms: 500,
            use_shim: false,
            shim_path: None,
            use_wrapper: false,
            unlimited_stack: false,
        }
    }
}

impl Default for ComparingSettings {
    fn default() -> Self {
        ComparingSettings {
            ignore_stderr: true,
            ole_ratio: Some(10),
            pe_as_ac: false,
        }
    }
}

impl Default for StressSettings {
    fn default() -> Self {
        StressSettings {
            generator_time_limit_ms: 10_000,
            brute_force_time_limit_ms: 10_000,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load from `path` when given, fall back to defaults when the file is
    /// absent. A present-but-malformed file is an error, not a silent
    /// default.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            _ => Ok(Settings::default()),
        }
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.cache_dir.join("bin")
    }

    pub fn io_dir(&self) -> PathBuf {
        self.cache_dir.join("io")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_full_defaults() {
        let settings: Settings = serde_json::from_str("{}").expect("parse");
        assert_eq!(settings.compilation.cpp_compiler, "g++");
        assert_eq!(settings.execution.time_addition_ms, 500);
        assert_eq!(settings.comparing.ole_ratio, Some(10));
        assert!(settings.comparing.ignore_stderr);
        assert_eq!(settings.stress.generator_time_limit_ms, 10_000);
        assert_eq!(settings.expand_behavior, ExpandBehavior::FirstFailed);
    }

    #[test]
    fn partial_section_keeps_sibling_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"comparing": {"pe_as_ac": true}}"#).expect("parse");
        assert!(settings.comparing.pe_as_ac);
        assert_eq!(settings.comparing.ole_ratio, Some(10), "untouched field keeps default");
    }

    #[test]
    fn round_trips_through_json() {
        let mut settings = Settings::default();
        settings.execution.use_shim = true;
        settings.compilation.cpp_args = vec!["-O2".into(), "-std=c++20".into()];
        let text = serde_json::to_string(&settings).expect("serialize");
        let back: Settings = serde_json::from_str(&text).expect("parse");
        assert!(back.execution.use_shim);
        assert_eq!(back.compilation.cpp_args, settings.compilation.cpp_args);
    }

    #[test]
    fn load_or_default_without_file() {
        let settings = Settings::load_or_default(None).expect("defaults");
        assert_eq!(settings.max_inline_bytes, 64 * 1024);
    }
}
