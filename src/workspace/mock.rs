//! 内存模拟工作区（用于测试，无需 JVM、构建工具或变异引擎）
//!
//! 工程状态用已应用变异的列表表示（如 `["ASAT#0"]`）。工作区里只要含有任意一个“修复变异”，
//! 试验就成功；否则返回配置的失败结果。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::{Phase, RepairError, Result};
use crate::harness::{PerfSample, TestMode, TrialOutcome, TrialRunner};
use crate::workspace::{
    ArtifactRef, ArtifactStore, Baseline, Builder, ExclusionRules, SiteGenerator, TargetRefresher,
};

#[derive(Debug, Default)]
struct MockState {
    projects: HashMap<ArtifactRef, Vec<String>>,
    staged: Vec<String>,
    builds: u32,
    trials: u32,
    pruned: Vec<ArtifactRef>,
    exported: Option<ArtifactRef>,
    cleaned: bool,
    exclusion_views: Vec<Vec<String>>,
    calibrations: Vec<u32>,
}

pub struct MockWorkspace {
    sites: BTreeMap<String, usize>,
    optimization_sites: Option<BTreeMap<String, usize>>,
    fixes: BTreeSet<String>,
    entrypoint_sites: BTreeSet<String>,
    failure: TrialOutcome,
    builds_succeed: bool,
    guard_double_lock: bool,
    state: Mutex<MockState>,
}

fn site_key(operator: &str, site: usize) -> String {
    format!("{}#{}", operator, site)
}

fn missing(at: ArtifactRef) -> RepairError {
    RepairError::Artifact(format!("no project at {}", at))
}

impl MockWorkspace {
    pub fn new(sites: &[(&str, usize)]) -> Self {
        Self {
            sites: sites.iter().map(|(op, n)| (op.to_string(), *n)).collect(),
            optimization_sites: None,
            fixes: BTreeSet::new(),
            entrypoint_sites: BTreeSet::new(),
            failure: TrialOutcome::Deadlock,
            builds_succeed: true,
            guard_double_lock: false,
            state: Mutex::new(MockState::default()),
        }
    }

    /// 含有该变异的工程能通过全部测试
    pub fn with_fix(mut self, operator: &str, site: usize) -> Self {
        self.fixes.insert(site_key(operator, site));
        self
    }

    /// 优化阶段枚举出的变异点
    pub fn with_optimization_sites(mut self, sites: &[(&str, usize)]) -> Self {
        self.optimization_sites = Some(sites.iter().map(|(op, n)| (op.to_string(), *n)).collect());
        self
    }

    pub fn with_entrypoint_site(mut self, operator: &str, site: usize) -> Self {
        self.entrypoint_sites.insert(site_key(operator, site));
        self
    }

    pub fn with_failure(mut self, outcome: TrialOutcome) -> Self {
        self.failure = outcome;
        self
    }

    pub fn with_failing_builds(mut self) -> Self {
        self.builds_succeed = false;
        self
    }

    /// 工程里已有同一算子的变异时，再应用该算子视为嵌套加锁
    pub fn with_double_lock_guard(mut self) -> Self {
        self.guard_double_lock = true;
        self
    }

    pub async fn builds(&self) -> u32 {
        self.state.lock().await.builds
    }

    pub async fn trials(&self) -> u32 {
        self.state.lock().await.trials
    }

    pub async fn project(&self, at: ArtifactRef) -> Option<Vec<String>> {
        self.state.lock().await.projects.get(&at).cloned()
    }

    /// 直接写入一个工程状态
    pub async fn seed_project(&self, at: ArtifactRef, mutations: &[&str]) {
        let mutations = mutations.iter().map(|m| m.to_string()).collect();
        self.state.lock().await.projects.insert(at, mutations);
    }

    pub async fn pruned(&self) -> Vec<ArtifactRef> {
        self.state.lock().await.pruned.clone()
    }

    pub async fn exported(&self) -> Option<ArtifactRef> {
        self.state.lock().await.exported
    }

    pub async fn cleaned(&self) -> bool {
        self.state.lock().await.cleaned
    }

    /// 每次嵌套加锁检查时 `at` 处的工程
    pub async fn exclusion_views(&self) -> Vec<Vec<String>> {
        self.state.lock().await.exclusion_views.clone()
    }

    /// 每次超时校准收到的倍数
    pub async fn calibrations(&self) -> Vec<u32> {
        self.state.lock().await.calibrations.clone()
    }
}

#[async_trait]
impl ArtifactStore for MockWorkspace {
    async fn create_local(&self, at: ArtifactRef, baseline: Baseline) -> Result<()> {
        let mut state = self.state.lock().await;
        let source = match baseline {
            Baseline::Pristine => Vec::new(),
            Baseline::Previous => at
                .generation
                .checked_sub(1)
                .and_then(|g| state.projects.get(&ArtifactRef::new(g, at.id)).cloned())
                .unwrap_or_default(),
            Baseline::Generation(g) => {
                let from = ArtifactRef::new(g, at.id);
                state.projects.get(&from).cloned().ok_or_else(|| missing(from))?
            }
        };
        state.projects.insert(at, source);
        Ok(())
    }

    async fn copy(&self, from: ArtifactRef, to: ArtifactRef) -> Result<()> {
        let mut state = self.state.lock().await;
        let project = state.projects.get(&from).cloned().ok_or_else(|| missing(from))?;
        state.projects.insert(to, project);
        Ok(())
    }

    async fn stage(&self, at: ArtifactRef) -> Result<()> {
        let mut state = self.state.lock().await;
        state.staged = state.projects.get(&at).cloned().ok_or_else(|| missing(at))?;
        Ok(())
    }

    async fn fingerprint(&self, at: ArtifactRef) -> Result<String> {
        let state = self.state.lock().await;
        let mut project = state.projects.get(&at).cloned().ok_or_else(|| missing(at))?;
        project.sort();
        Ok(project.join(","))
    }

    async fn prune(&self, at: ArtifactRef) -> Result<()> {
        let mut state = self.state.lock().await;
        state.projects.remove(&at);
        state.pruned.push(at);
        Ok(())
    }

    async fn export(&self, at: ArtifactRef) -> Result<PathBuf> {
        let mut state = self.state.lock().await;
        if !state.projects.contains_key(&at) {
            return Err(missing(at));
        }
        state.exported = Some(at);
        Ok(PathBuf::from("mock-output"))
    }

    async fn cleanup(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.projects.clear();
        state.cleaned = true;
        Ok(())
    }
}

#[async_trait]
impl SiteGenerator for MockWorkspace {
    async fn list_sites(&self, _at: ArtifactRef, phase: Phase) -> Result<BTreeMap<String, usize>> {
        match (&self.optimization_sites, phase) {
            (Some(sites), Phase::Optimization) => Ok(sites.clone()),
            _ => Ok(self.sites.clone()),
        }
    }

    async fn apply_site(&self, at: ArtifactRef, operator: &str, site: usize) -> Result<()> {
        let mut state = self.state.lock().await;
        let project = state.projects.get_mut(&at).ok_or_else(|| missing(at))?;
        project.push(site_key(operator, site));
        Ok(())
    }
}

#[async_trait]
impl Builder for MockWorkspace {
    async fn build(&self, _at: ArtifactRef) -> bool {
        self.state.lock().await.builds += 1;
        self.builds_succeed
    }
}

#[async_trait]
impl ExclusionRules for MockWorkspace {
    async fn violates_entrypoint_sync(&self, at: ArtifactRef, operator: &str, site: usize) -> bool {
        let state = self.state.lock().await;
        state.projects.contains_key(&at) && self.entrypoint_sites.contains(&site_key(operator, site))
    }

    async fn violates_double_lock(&self, at: ArtifactRef, operator: &str, _site: usize) -> bool {
        let mut state = self.state.lock().await;
        let project = state.projects.get(&at).cloned().unwrap_or_default();
        let prefix = format!("{}#", operator);
        let nested = self.guard_double_lock && project.iter().any(|m| m.starts_with(&prefix));
        state.exclusion_views.push(project);
        nested
    }

    async fn exported_synchronizes_entrypoint(&self, _dir: &Path) -> bool {
        let state = self.state.lock().await;
        state
            .exported
            .and_then(|at| state.projects.get(&at))
            .is_some_and(|project| project.iter().any(|m| self.entrypoint_sites.contains(m)))
    }
}

#[async_trait]
impl TrialRunner for MockWorkspace {
    async fn calibrate_timeout(&self, multiplier: u32) -> Option<Duration> {
        self.state.lock().await.calibrations.push(multiplier);
        Some(Duration::from_secs(u64::from(multiplier)))
    }

    async fn run_trial(&self, mode: TestMode) -> TrialOutcome {
        let mut state = self.state.lock().await;
        state.trials += 1;
        if !state.staged.iter().any(|m| self.fixes.contains(m)) {
            return self.failure.clone();
        }
        match mode {
            TestMode::Functional => TrialOutcome::Success { perf: None },
            TestMode::Performance => {
                // 变异越多越慢
                let size = state.staged.len() as f64;
                TrialOutcome::Success {
                    perf: Some(PerfSample {
                        cpu_seconds: 1.0 + size / 10.0,
                        voluntary_switches: 100.0 + size,
                    }),
                }
            }
        }
    }
}

#[async_trait]
impl TargetRefresher for MockWorkspace {
    async fn refresh(&self) {}
}
