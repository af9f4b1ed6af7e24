//! 外部协作者契约
//!
//! 搜索引擎只依赖这些 trait：变异点生成、构建、排除规则、模型检查、变异体存储、共享变量目标。
//! 默认实现基于文件系统和外部命令（store / command / targets），测试中可以换成内存实现。

pub mod command;
pub mod mock;
pub mod store;
pub mod targets;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Phase, Result};

pub use command::{CommandBuilder, CommandModelChecker, MutatorCli};
pub use mock::MockWorkspace;
pub use store::{ArtifactLayout, FsArtifactStore};
pub use targets::SharedVarTargets;

/// 变异体地址：第 generation 代第 id 个个体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub generation: u32,
    pub id: u32,
}

impl ArtifactRef {
    pub fn new(generation: u32, id: u32) -> Self {
        Self { generation, id }
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.generation, self.id)
    }
}

/// 创建本地工程时的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baseline {
    /// 原始未修改工程
    Pristine,
    /// 同一个体上一代的变异体（不存在时退回原始工程）
    Previous,
    /// 同一个体在指定代的变异体
    Generation(u32),
}

/// 变异体存储
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// 用 baseline 覆盖 `at` 处的本地工程
    async fn create_local(&self, at: ArtifactRef, baseline: Baseline) -> Result<()>;

    /// 把 `from` 的本地工程整体复制到 `to`
    async fn copy(&self, from: ArtifactRef, to: ArtifactRef) -> Result<()>;

    /// 把 `at` 放入工作区，供构建与测试使用
    async fn stage(&self, at: ArtifactRef) -> Result<()>;

    /// 本地工程的内容哈希
    async fn fingerprint(&self, at: ArtifactRef) -> Result<String>;

    /// 删除 `at` 处的变异体副本（不存在时什么也不做）
    async fn prune(&self, at: ArtifactRef) -> Result<()>;

    /// 导出到输出目录，返回导出位置
    async fn export(&self, at: ArtifactRef) -> Result<PathBuf>;

    /// 删除所有变异体副本
    async fn cleanup(&self) -> Result<()>;
}

/// 变异点生成器
#[async_trait]
pub trait SiteGenerator: Send + Sync {
    /// 每个算子在 `at` 的当前工程上有多少个可用变异点
    async fn list_sites(&self, at: ArtifactRef, phase: Phase) -> Result<BTreeMap<String, usize>>;

    /// 在 `at` 的本地工程上原地应用一个变异
    async fn apply_site(&self, at: ArtifactRef, operator: &str, site: usize) -> Result<()>;
}

/// 构建当前工作区
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, at: ArtifactRef) -> bool;
}

/// 变异排除规则
#[async_trait]
pub trait ExclusionRules: Send + Sync {
    /// 该变异是否会同步程序的入口方法
    async fn violates_entrypoint_sync(&self, at: ArtifactRef, operator: &str, site: usize) -> bool;

    /// 该变异是否会在同一变量上嵌套加锁
    async fn violates_double_lock(&self, at: ArtifactRef, operator: &str, site: usize) -> bool;

    /// 导出的工程是否同步了入口方法
    async fn exported_synchronizes_entrypoint(&self, _dir: &Path) -> bool {
        false
    }
}

/// 模型检查结论
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ModelCheckOutcome {
    /// 未发现问题或无法判断，交给噪声测试
    NeedsFurtherTesting,
    RaceFound {
        depth: u32,
        #[serde(default)]
        sites: Vec<String>,
    },
    DeadlockFound {
        depth: u32,
        #[serde(default)]
        classes: Vec<String>,
    },
    GenericException {
        depth: u32,
    },
    /// 变异体在对象创建前对其加锁，永远无效
    InvalidMutant,
    ResourceExhausted,
    TimeExhausted,
}

impl ModelCheckOutcome {
    /// 交给噪声测试的结论
    pub fn is_inconclusive(&self) -> bool {
        matches!(
            self,
            ModelCheckOutcome::NeedsFurtherTesting
                | ModelCheckOutcome::ResourceExhausted
                | ModelCheckOutcome::TimeExhausted
        )
    }
}

#[async_trait]
pub trait ModelChecker: Send + Sync {
    async fn check(&self, at: ArtifactRef, depth_limit: u32) -> ModelCheckOutcome;
}

/// 批量测试后刷新外部发现的共享变量列表
#[async_trait]
pub trait TargetRefresher: Send + Sync {
    async fn refresh(&self);
}

/// 不跟踪共享变量
pub struct NoTargets;

#[async_trait]
impl TargetRefresher for NoTargets {
    async fn refresh(&self) {}
}
