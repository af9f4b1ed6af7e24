//! 基于外部命令的协作者：构建、变异引擎、模型检查器
//!
//! 变异引擎约定：
//! - `<cmd> list <project> --phase <phase> [--target Class.var ...]` 在 stdout 输出 `{"ASAT": 3, ...}`
//! - `<cmd> apply <project> <operator> <site> [--target Class.var ...]` 原地修改工程，退出码 0 表示成功
//!
//! 已知共享变量时用 `--target` 把变异限定在它们上，list 与 apply 传入相同的目标，变异点编号才一致。
//! - `<cmd> check-entrypoint|check-double-lock <project> <operator> <site>` 退出码 0 表示违反规则
//! - `<cmd> entrypoint-synchronized <dir>` 退出码 0 表示导出的工程同步了入口方法

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::core::{Phase, RepairError, Result};
use crate::workspace::store::ArtifactLayout;
use crate::workspace::targets::SharedVarTargets;
use crate::workspace::{ArtifactRef, Builder, ExclusionRules, ModelCheckOutcome, ModelChecker, SiteGenerator};

const DEFAULT_TIMEOUT_SECS: u64 = 600;

fn command(argv: &[String], args: &[String], cwd: Option<&Path>) -> Result<Command> {
    let (program, rest) = argv
        .split_first()
        .ok_or_else(|| RepairError::Config("external command is empty".into()))?;
    let mut cmd = Command::new(program);
    cmd.args(rest).args(args).kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    Ok(cmd)
}

async fn run_command(argv: &[String], args: &[String], cwd: Option<&Path>, timeout: Duration) -> Result<Output> {
    let mut cmd = command(argv, args, cwd)?;
    tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| RepairError::Collaborator(format!("{:?} timed out after {:?}", argv, timeout)))?
        .map_err(|e| RepairError::Collaborator(format!("failed to run {:?}: {}", argv, e)))
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// 在工作区执行构建命令
pub struct CommandBuilder {
    command: Vec<String>,
    work_dir: PathBuf,
    timeout: Duration,
}

impl CommandBuilder {
    pub fn new(command: Vec<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            work_dir: work_dir.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Builder for CommandBuilder {
    async fn build(&self, at: ArtifactRef) -> bool {
        match run_command(&self.command, &[], Some(&self.work_dir), self.timeout).await {
            Ok(output) if output.status.success() => {
                tracing::debug!(artifact = %at, "Build succeeded");
                true
            }
            Ok(output) => {
                tracing::debug!(
                    artifact = %at,
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "Build failed"
                );
                false
            }
            Err(e) => {
                tracing::warn!(artifact = %at, "Build could not run: {}", e);
                false
            }
        }
    }
}

/// 外部变异引擎：提供变异点与排除规则
pub struct MutatorCli {
    command: Vec<String>,
    layout: ArtifactLayout,
    timeout: Duration,
    targets: Option<Arc<SharedVarTargets>>,
}

impl MutatorCli {
    pub fn new(command: Vec<String>, layout: ArtifactLayout) -> Self {
        Self {
            command,
            layout,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            targets: None,
        }
    }

    /// 共享变量加载后，变异点生成只针对这些变量
    pub fn with_targets(mut self, targets: Arc<SharedVarTargets>) -> Self {
        self.targets = Some(targets);
        self
    }

    async fn target_args(&self) -> Vec<String> {
        let Some(targets) = &self.targets else {
            return Vec::new();
        };
        targets
            .shared_vars()
            .await
            .into_iter()
            .flat_map(|(class, var)| ["--target".to_string(), format!("{}.{}", class, var)])
            .collect()
    }

    async fn invoke(&self, verb: &str, at: ArtifactRef, extra: &[String]) -> Result<Output> {
        let mut args = vec![verb.to_string(), path_arg(&self.layout.project_dir(at))];
        args.extend_from_slice(extra);
        run_command(&self.command, &args, None, self.timeout).await
    }

    /// 退出码 0 视为违反；命令本身失败时不排除该变异点
    async fn check(&self, verb: &str, at: ArtifactRef, operator: &str, site: usize) -> bool {
        match self.invoke(verb, at, &[operator.to_string(), site.to_string()]).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                tracing::warn!(artifact = %at, operator, site, "{} failed: {}", verb, e);
                false
            }
        }
    }
}

#[async_trait]
impl SiteGenerator for MutatorCli {
    async fn list_sites(&self, at: ArtifactRef, phase: Phase) -> Result<BTreeMap<String, usize>> {
        let mut extra = vec!["--phase".to_string(), phase.to_string()];
        extra.extend(self.target_args().await);
        let output = self.invoke("list", at, &extra).await?;
        if !output.status.success() {
            return Err(RepairError::Collaborator(format!(
                "mutation site listing failed for {}: {}",
                at,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| RepairError::Collaborator(format!("unreadable site listing for {}: {}", at, e)))
    }

    async fn apply_site(&self, at: ArtifactRef, operator: &str, site: usize) -> Result<()> {
        let mut extra = vec![operator.to_string(), site.to_string()];
        extra.extend(self.target_args().await);
        let output = self.invoke("apply", at, &extra).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RepairError::Collaborator(format!(
                "applying {} #{} to {} failed: {}",
                operator,
                site,
                at,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl ExclusionRules for MutatorCli {
    async fn violates_entrypoint_sync(&self, at: ArtifactRef, operator: &str, site: usize) -> bool {
        self.check("check-entrypoint", at, operator, site).await
    }

    async fn violates_double_lock(&self, at: ArtifactRef, operator: &str, site: usize) -> bool {
        self.check("check-double-lock", at, operator, site).await
    }

    async fn exported_synchronizes_entrypoint(&self, dir: &Path) -> bool {
        let args = ["entrypoint-synchronized".to_string(), path_arg(dir)];
        match run_command(&self.command, &args, None, self.timeout).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                tracing::warn!("entrypoint check on exported project failed: {}", e);
                false
            }
        }
    }
}

/// 模型检查器命令：`<cmd> <project> --depth <n>`，stdout 输出 JSON 结论
pub struct CommandModelChecker {
    command: Vec<String>,
    layout: ArtifactLayout,
    timeout: Duration,
}

impl CommandModelChecker {
    pub fn new(command: Vec<String>, layout: ArtifactLayout, timeout: Duration) -> Self {
        Self {
            command,
            layout,
            timeout,
        }
    }
}

#[async_trait]
impl ModelChecker for CommandModelChecker {
    async fn check(&self, at: ArtifactRef, depth_limit: u32) -> ModelCheckOutcome {
        let args = [
            path_arg(&self.layout.project_dir(at)),
            "--depth".to_string(),
            depth_limit.to_string(),
        ];
        let mut cmd = match command(&self.command, &args, None) {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::warn!(artifact = %at, "Model checker is not configured: {}", e);
                return ModelCheckOutcome::NeedsFurtherTesting;
            }
        };
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(artifact = %at, "Model checker could not run: {}", e);
                return ModelCheckOutcome::NeedsFurtherTesting;
            }
            Err(_) => return ModelCheckOutcome::TimeExhausted,
        };

        match serde_json::from_slice::<ModelCheckOutcome>(&output.stdout) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(artifact = %at, "Unreadable model checker verdict: {}", e);
                ModelCheckOutcome::NeedsFurtherTesting
            }
        }
    }
}
