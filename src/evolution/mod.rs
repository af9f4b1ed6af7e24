//! 演化搜索：变异、评估、选择、替换与两阶段主循环

pub mod cache;
pub mod convergence;
pub mod fitness;
pub mod individual;
pub mod loop_;
pub mod mutation;
pub mod replacement;
pub mod selection;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::harness::{TrialExecutor, TrialRunner, TrialSettings};
use crate::workspace::{
    ArtifactLayout, ArtifactStore, Builder, CommandBuilder, CommandModelChecker, ExclusionRules, FsArtifactStore,
    ModelChecker, MutatorCli, NoTargets, SharedVarTargets, SiteGenerator, TargetRefresher,
};

pub use cache::{CacheEntry, MutantCache};
pub use convergence::FitnessTrend;
pub use fitness::{accumulate_votes, non_functional_score, FitnessEvaluator};
pub use individual::Individual;
pub use loop_::{start_search, EvolutionLoop, EvolveResult};
pub use mutation::{MutationEngine, MutationOutcome};
pub use selection::{select_operator, VoteTables, Votes};
pub use types::{BestCandidate, EvalMethod, EvaluationRecord, SearchReport, StopReason};

/// 搜索引擎依赖的全部外部协作者
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ArtifactStore>,
    pub sites: Arc<dyn SiteGenerator>,
    pub builder: Arc<dyn Builder>,
    pub exclusions: Arc<dyn ExclusionRules>,
    /// 未配置时只用噪声测试
    pub model_checker: Option<Arc<dyn ModelChecker>>,
    pub runner: Arc<dyn TrialRunner>,
    pub targets: Arc<dyn TargetRefresher>,
}

impl Collaborators {
    /// 基于文件系统与外部命令的默认实现
    pub fn from_config(cfg: &AppConfig) -> Self {
        let layout = ArtifactLayout::from_config(&cfg.project);
        let settings = TrialSettings::from_config(&cfg.project, &cfg.testing);
        let runner = TrialExecutor::with_junit_parser(settings, cfg.testing.deadlock_markers.clone());
        let mut mutator = MutatorCli::new(cfg.project.mutator_command.clone(), layout.clone());

        // 同一份共享变量既由批量测试刷新，也限定变异点生成
        let targets: Arc<dyn TargetRefresher> = match &cfg.project.shared_vars_file {
            Some(path) => {
                let shared = Arc::new(SharedVarTargets::new(path.clone()));
                mutator = mutator.with_targets(shared.clone());
                shared
            }
            None => Arc::new(NoTargets),
        };
        let mutator = Arc::new(mutator);
        let model_checker = cfg.project.model_check_command.as_ref().map(|cmd| {
            let checker = CommandModelChecker::new(
                cmd.clone(),
                layout.clone(),
                Duration::from_secs(cfg.model_check.timeout_secs),
            );
            Arc::new(checker) as Arc<dyn ModelChecker>
        });

        Self {
            store: Arc::new(FsArtifactStore::new(layout.clone())),
            sites: mutator.clone(),
            builder: Arc::new(
                CommandBuilder::new(cfg.project.build_command.clone(), layout.work_dir.clone())
                    .with_timeout(Duration::from_secs(cfg.project.build_timeout_secs)),
            ),
            exclusions: mutator,
            model_checker,
            runner: Arc::new(runner),
            targets,
        }
    }

    /// 同一个对象同时承担所有角色（内存工作区）
    pub fn from_workspace<W>(workspace: Arc<W>) -> Self
    where
        W: ArtifactStore + SiteGenerator + Builder + ExclusionRules + TrialRunner + TargetRefresher + 'static,
    {
        Self {
            store: workspace.clone(),
            sites: workspace.clone(),
            builder: workspace.clone(),
            exclusions: workspace.clone(),
            model_checker: None,
            runner: workspace.clone(),
            targets: workspace,
        }
    }

    pub fn with_model_checker(mut self, checker: Arc<dyn ModelChecker>) -> Self {
        self.model_checker = Some(checker);
        self
    }
}
