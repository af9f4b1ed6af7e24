use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::harness::OutcomeCounts;
use crate::workspace::ArtifactRef;

/// 一代评估结果的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalMethod {
    /// 噪声下重复运行测试
    Noise,
    ModelCheck,
    /// 与已评估过的变异体相同，直接复制结果
    Cached,
}

/// 个体在某一代的评估记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub generation: u32,
    pub score: f64,
    pub successes: u32,
    pub timeouts: u32,
    pub dataraces: u32,
    pub deadlocks: u32,
    pub errors: u32,
    /// 产生该变异体的算子
    pub operator: Option<String>,
    pub method: EvalMethod,
    /// 优化阶段的平均 CPU 时间与自愿上下文切换
    pub real_time: Option<f64>,
    pub voluntary_switches: Option<f64>,
}

impl EvaluationRecord {
    pub fn from_counts(
        generation: u32,
        score: f64,
        counts: &OutcomeCounts,
        operator: Option<String>,
        method: EvalMethod,
    ) -> Self {
        Self {
            generation,
            score,
            successes: counts.successes,
            timeouts: counts.timeouts,
            dataraces: counts.dataraces,
            deadlocks: counts.deadlocks,
            errors: counts.errors,
            operator,
            method,
            real_time: None,
            voluntary_switches: None,
        }
    }

    /// 复制结果元组到另一代（缓存命中）
    pub fn copied_to(&self, generation: u32, operator: Option<String>) -> Self {
        Self {
            generation,
            operator,
            method: EvalMethod::Cached,
            ..self.clone()
        }
    }
}

/// 搜索停止的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// 找到并通过扩展验证的修复
    FixValidated,
    GenerationLimit,
    /// 优化阶段适应度停滞
    Converged,
    /// 优化阶段某个个体没有可用变异
    MutantsExhausted,
    /// 整代没有任何个体产生可编译变异体
    NoCompilableMutants,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::FixValidated => write!(f, "fix validated"),
            StopReason::GenerationLimit => write!(f, "generation limit reached"),
            StopReason::Converged => write!(f, "fitness converged"),
            StopReason::MutantsExhausted => write!(f, "mutants exhausted"),
            StopReason::NoCompilableMutants => write!(f, "no compilable mutants"),
        }
    }
}

/// 历史最高分的个体与代
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestCandidate {
    pub id: u32,
    pub generation: u32,
    pub score: f64,
    pub validated: bool,
}

impl BestCandidate {
    pub fn artifact(&self) -> ArtifactRef {
        ArtifactRef::new(self.generation, self.id)
    }
}

/// `start_search` 的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReport {
    pub run_id: String,
    pub seed: u64,
    pub fix_found: bool,
    /// 是否运行了优化阶段
    pub optimized: bool,
    pub best: Option<BestCandidate>,
    pub best_generation: Option<u32>,
    pub best_artifact: Option<ArtifactRef>,
    /// 修复后、优化前的非功能分数（最差情况）
    pub baseline_score: Option<f64>,
    pub stop_reason: StopReason,
    pub output_dir: Option<PathBuf>,
    /// 导出的工程同步了程序入口方法（程序被串行化）
    pub entrypoint_synchronized: bool,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}
