//! 只跑试验：对当前工作区重复运行测试并输出结果分布
//!
//! 用于在开始搜索前确认测试命令、超时和输出解析是否正确。
//! 用法：`syncmend-trial [runs] [functional|performance]`

use std::sync::Arc;

use anyhow::Context;
use syncmend::config::load_config;
use syncmend::harness::{BatchTester, TestMode, TrialExecutor, TrialSettings};
use syncmend::observability;
use syncmend::workspace::{NoTargets, SharedVarTargets, TargetRefresher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args = std::env::args().skip(1);
    let runs = match args.next() {
        Some(raw) => raw.parse::<u32>().context("runs must be a positive integer")?,
        None => 0,
    };
    let mode = match args.next().as_deref() {
        None | Some("functional") => TestMode::Functional,
        Some("performance") => TestMode::Performance,
        Some(other) => anyhow::bail!("unknown mode: {}", other),
    };

    let cfg = load_config(None).context("Failed to load configuration")?;
    let runs = if runs == 0 { cfg.testing.runs } else { runs };

    let settings = TrialSettings::from_config(&cfg.project, &cfg.testing);
    let runner = TrialExecutor::with_junit_parser(settings, cfg.testing.deadlock_markers.clone());
    let targets: Arc<dyn TargetRefresher> = match &cfg.project.shared_vars_file {
        Some(path) => Arc::new(SharedVarTargets::new(path.clone())),
        None => Arc::new(NoTargets),
    };

    let mut batch = BatchTester::new(Arc::new(runner), targets);
    let passed = batch.run(mode, runs, false).await;

    let summary = serde_json::json!({
        "passed": passed,
        "runs": runs,
        "counts": batch.counts,
        "average_real_time": batch.average_real_time(),
        "average_voluntary_switches": batch.average_voluntary_switches(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
