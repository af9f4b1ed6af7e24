//! Syncmend - 并发缺陷自动修复
//!
//! 入口：初始化日志、加载配置、运行两阶段搜索，并以 JSON 输出搜索报告。
//! 用法：`syncmend [config.toml]`

use std::path::PathBuf;

use anyhow::Context;
use syncmend::config::load_config;
use syncmend::core::SearchConfig;
use syncmend::{observability, start_search, Collaborators};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    std::fs::create_dir_all(&cfg.project.tmp_dir).context("Failed to create tmp directory")?;

    let collab = Collaborators::from_config(&cfg);
    let report = start_search(SearchConfig::from(&cfg), collab)
        .await
        .context("Repair search failed")?;

    if report.fix_found {
        tracing::info!(best = ?report.best, output = ?report.output_dir, "Fix found");
    } else {
        tracing::info!(best = ?report.best, "No individual was found that functions correctly");
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize report")?
    );
    Ok(())
}
