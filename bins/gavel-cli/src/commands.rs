// CLI commands: judge a problem, run the stress loop, create problem files
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use gavel_core::config::Settings;
use gavel_core::langs::ForceMode;
use gavel_core::session::JudgeSession;
use gavel_core::types::{BfCompare, IoData, Problem, SourceFile, TcResult};
use gavel_core::verdict::Verdict;
use tracing::info;

const PREVIEW_CHARS: usize = 400;

/// Judge a problem file, print per-case verdicts, and write the updated
/// results back. Ctrl-C aborts the run; the partial results are still saved.
pub async fn run(
    config: Option<&Path>,
    path: &Path,
    case: Option<usize>,
    force: ForceMode,
) -> Result<()> {
    let settings = Settings::load_or_default(config).context("Failed to load settings")?;
    let session = JudgeSession::new(Arc::new(settings));
    let mut problem = load_problem(path).await?;

    {
        let judging = judge(&session, &mut problem, case, force);
        tokio::pin!(judging);
        tokio::select! {
            res = &mut judging => res?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping the run");
                session.request_stop();
                (&mut judging).await?;
            }
        }
    }

    report(&problem).await;
    save_problem(path, &problem).await?;
    Ok(())
}

async fn judge(
    session: &JudgeSession,
    problem: &mut Problem,
    case: Option<usize>,
    force: ForceMode,
) -> gavel_core::Result<()> {
    match case {
        Some(position) => {
            let id = position
                .checked_sub(1)
                .and_then(|i| problem.tc_order.get(i))
                .copied()
                .ok_or_else(|| {
                    gavel_core::Error::problem(format!("No test case at position {position}"))
                })?;
            session.run_case(problem, id, force).await
        }
        None => session.run_all(problem, force).await,
    }
}

/// Run the generator / brute force hunt until a difference is found or the
/// operator interrupts it. A found counterexample is saved into the problem.
pub async fn stress(config: Option<&Path>, path: &Path) -> Result<()> {
    let settings = Settings::load_or_default(config).context("Failed to load settings")?;
    let session = JudgeSession::new(Arc::new(settings));
    let mut problem = load_problem(path).await?;

    let cases_before = problem.tc_order.len();
    {
        let hunt = session.stress(&mut problem, ForceMode::Auto);
        tokio::pin!(hunt);
        tokio::select! {
            res = &mut hunt => res?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping the stress run");
                session.request_stop();
                (&mut hunt).await?;
            }
        }
    }

    let found = problem.tc_order.len() > cases_before;
    if let Some(bf) = problem.bf.as_ref() {
        let mark = if found { "❌" } else { "✅" };
        println!("{mark} {} ({} runs)", bf.msg, bf.runs);
    }
    if found {
        if let Some(tc) = problem.tc_order.last().and_then(|id| problem.tcs.get(id)) {
            preview("stdin", &tc.stdin).await;
            preview("answer", &tc.answer).await;
            if let Some(result) = tc.result.as_ref() {
                preview("stdout", &result.stdout).await;
            }
        }
    }

    save_problem(path, &problem).await?;
    Ok(())
}

pub struct InitArgs {
    pub path: PathBuf,
    pub name: Option<String>,
    pub solution: PathBuf,
    pub checker: Option<PathBuf>,
    pub interactor: Option<PathBuf>,
    pub generator: Option<PathBuf>,
    pub brute_force: Option<PathBuf>,
    pub time_limit: u64,
    pub memory_limit: u64,
}

/// Create a fresh problem file next to the sources it points at.
pub async fn init(args: InitArgs) -> Result<()> {
    let name = args.name.unwrap_or_else(|| {
        args.solution
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("problem")
            .to_string()
    });

    let mut problem = Problem::new(name, &args.solution);
    problem.time_limit_ms = args.time_limit;
    problem.memory_limit_mib = args.memory_limit;
    problem.checker = args.checker.map(SourceFile::new);
    problem.interactor = args.interactor.map(SourceFile::new);
    if args.generator.is_some() || args.brute_force.is_some() {
        problem.bf = Some(BfCompare {
            generator: args.generator.map(SourceFile::new),
            brute_force: args.brute_force.map(SourceFile::new),
            ..BfCompare::default()
        });
    }

    save_problem(&args.path, &problem).await?;
    println!("✅ Created problem '{}' at {}", problem.name, args.path.display());
    Ok(())
}

async fn report(problem: &Problem) {
    let mut accepted = 0usize;
    let mut judged = 0usize;
    for (idx, id) in problem.tc_order.iter().enumerate() {
        let Some(tc) = problem.tcs.get(id) else { continue };
        let position = idx + 1;
        let Some(result) = tc.result.as_ref() else {
            println!("⏳ #{position} not judged");
            continue;
        };
        judged += 1;
        if result.verdict == Verdict::Accepted {
            accepted += 1;
        }

        println!(
            "{} #{position} {}{}",
            mark(result.verdict),
            result.verdict.full_name(),
            run_stats(result)
        );
        for msg in &result.messages {
            println!("    {msg}");
        }
        if tc.expand {
            preview("stdin", &tc.stdin).await;
            preview("stdout", &result.stdout).await;
        }
    }

    let overall = if judged > 0 && accepted == judged { "✅" } else { "❌" };
    println!("\n{overall} {accepted}/{judged} accepted");
}

fn mark(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Accepted => "✅",
        Verdict::Skipped | Verdict::Rejected => "⚠️ ",
        v if v.is_transient() => "⏳",
        _ => "❌",
    }
}

fn run_stats(result: &TcResult) -> String {
    let mut stats = format!("  {:.1} ms", result.time_ms);
    if let Some(memory) = result.memory_mib {
        stats.push_str(&format!(", {memory:.1} MiB"));
    }
    stats
}

async fn preview(label: &str, data: &IoData) {
    let content = match data.read().await {
        Ok(s) => s,
        Err(_) => return,
    };
    if content.is_empty() {
        return;
    }
    let truncated = content.chars().count() > PREVIEW_CHARS;
    let shown: String = content.chars().take(PREVIEW_CHARS).collect();
    println!("    {label}:");
    for line in shown.lines() {
        println!("      {line}");
    }
    if truncated {
        println!("      ...");
    }
}

/// Problem files are plain serde JSON documents.
async fn load_problem(path: &Path) -> Result<Problem> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read problem file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse problem file {}", path.display()))
}

async fn save_problem(path: &Path, problem: &Problem) -> Result<()> {
    let raw = serde_json::to_string_pretty(problem).context("Failed to serialize problem")?;
    tokio::fs::write(path, raw)
        .await
        .with_context(|| format!("Failed to write problem file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_writes_a_loadable_problem() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("p.json");

        init(InitArgs {
            path: path.clone(),
            name: None,
            solution: PathBuf::from("sols/alpha.cpp"),
            checker: Some(PathBuf::from("check.cpp")),
            interactor: None,
            generator: Some(PathBuf::from("gen.py")),
            brute_force: None,
            time_limit: 1500,
            memory_limit: 512,
        })
        .await
        .expect("init");

        let problem = load_problem(&path).await.expect("load");
        assert_eq!(problem.name, "alpha", "name falls back to the solution stem");
        assert_eq!(problem.time_limit_ms, 1500);
        assert_eq!(problem.memory_limit_mib, 512);
        assert!(problem.checker.is_some());
        assert!(problem.interactor.is_none());
        let bf = problem.bf.expect("bf configured");
        assert!(bf.generator.is_some());
        assert!(bf.brute_force.is_none());
    }

    #[tokio::test]
    async fn judge_rejects_bad_case_positions() {
        let session = JudgeSession::new(Arc::new(Settings::default()));
        let mut problem = Problem::new("p", "sol.cpp");

        let err = judge(&session, &mut problem, Some(1), ForceMode::Auto)
            .await
            .expect_err("no cases yet");
        assert!(err.to_string().contains("No test case at position 1"), "{err}");

        let err = judge(&session, &mut problem, Some(0), ForceMode::Auto)
            .await
            .expect_err("positions are 1-based");
        assert!(err.to_string().contains("position 0"), "{err}");
    }

    #[tokio::test]
    async fn problem_files_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("p.json");

        let mut problem = Problem::new("roundtrip", "sol.cpp");
        problem.add_tc(gavel_core::types::TestCase::new(
            IoData::inline("1 2\n"),
            IoData::inline("3\n"),
        ));
        save_problem(&path, &problem).await.expect("save");

        let loaded = load_problem(&path).await.expect("load");
        assert_eq!(loaded.name, "roundtrip");
        assert_eq!(loaded.tc_order, problem.tc_order);
        let tc = &loaded.tcs[&loaded.tc_order[0]];
        assert_eq!(tc.stdin.read().await.expect("stdin"), "1 2\n");
    }
}
