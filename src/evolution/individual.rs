//! 种群个体
//!
//! 每代的评估结果保存为一条完整的 EvaluationRecord，各项历史（分数、成功、超时……）都从
//! records 派生，因此长度天然一致。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::evolution::types::EvaluationRecord;
use crate::workspace::ArtifactRef;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Individual {
    /// 种群内唯一，阶段内不复用
    pub id: u32,
    pub generation: u32,
    /// 算子名 -> 各变异点是否已应用（每代由外部变异引擎重新生成）
    pub genome: BTreeMap<String, Vec<bool>>,
    /// 每尝试一代追加一项；None 表示该代没有得到可编译变异体
    pub applied_operators: Vec<Option<String>>,
    pub last_operator: Option<String>,
    pub records: Vec<EvaluationRecord>,
    pub restarted: Vec<bool>,
    pub replaced: Vec<bool>,
    pub turns_underperforming: u32,
    /// 修复阶段结束时的代数（修复阶段为 0）
    pub switch_generation: u32,
    pub validated: bool,
}

impl Individual {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            generation: 0,
            genome: BTreeMap::new(),
            applied_operators: Vec::new(),
            last_operator: None,
            records: Vec::new(),
            restarted: Vec::new(),
            replaced: Vec::new(),
            turns_underperforming: 0,
            switch_generation: 0,
            validated: false,
        }
    }

    pub fn artifact(&self) -> ArtifactRef {
        ArtifactRef::new(self.generation, self.id)
    }

    /// 进入新一代：重启 / 替换标记先记为 false
    pub fn begin_generation(&mut self, generation: u32) {
        self.generation = generation;
        self.restarted.push(false);
        self.replaced.push(false);
    }

    pub fn mark_restarted(&mut self) {
        if let Some(flag) = self.restarted.last_mut() {
            *flag = true;
        }
    }

    pub fn mark_replaced(&mut self) {
        if let Some(flag) = self.replaced.last_mut() {
            *flag = true;
        }
    }

    pub fn was_restarted(&self) -> bool {
        self.restarted.last().copied().unwrap_or(false)
    }

    pub fn was_replaced(&self) -> bool {
        self.replaced.last().copied().unwrap_or(false)
    }

    /// 按新的变异点数量重建基因组，返回变异点总数
    pub fn repopulate_genome(&mut self, counts: &BTreeMap<String, usize>) -> usize {
        self.genome = counts
            .iter()
            .map(|(op, &n)| (op.clone(), vec![false; n]))
            .collect();
        counts.values().sum()
    }

    pub fn sites_for(&self, operator: &str) -> usize {
        self.genome.get(operator).map_or(0, Vec::len)
    }

    pub fn total_sites(&self) -> usize {
        self.genome.values().map(Vec::len).sum()
    }

    pub fn mark_applied(&mut self, operator: &str, site: usize) {
        if let Some(slot) = self.genome.get_mut(operator).and_then(|slots| slots.get_mut(site)) {
            *slot = true;
        }
    }

    pub fn push_record(&mut self, record: EvaluationRecord) {
        self.records.push(record);
    }

    pub fn latest(&self) -> Option<&EvaluationRecord> {
        self.records.last()
    }

    pub fn latest_score(&self) -> Option<f64> {
        self.latest().map(|r| r.score)
    }

    pub fn record_at(&self, generation: u32) -> Option<&EvaluationRecord> {
        self.records.iter().rev().find(|r| r.generation == generation)
    }

    pub fn score_history(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.score).collect()
    }

    pub fn success_history(&self) -> Vec<u32> {
        self.records.iter().map(|r| r.successes).collect()
    }

    pub fn timeout_history(&self) -> Vec<u32> {
        self.records.iter().map(|r| r.timeouts).collect()
    }

    pub fn datarace_history(&self) -> Vec<u32> {
        self.records.iter().map(|r| r.dataraces).collect()
    }

    pub fn deadlock_history(&self) -> Vec<u32> {
        self.records.iter().map(|r| r.deadlocks).collect()
    }

    pub fn error_history(&self) -> Vec<u32> {
        self.records.iter().map(|r| r.errors).collect()
    }

    pub fn real_time_samples(&self) -> Vec<f64> {
        self.records.iter().filter_map(|r| r.real_time).collect()
    }

    pub fn voluntary_switch_samples(&self) -> Vec<f64> {
        self.records.iter().filter_map(|r| r.voluntary_switches).collect()
    }

    pub fn ever_deadlocked(&self) -> bool {
        self.records.iter().any(|r| r.deadlocks > 0)
    }

    pub fn ever_raced(&self) -> bool {
        self.records.iter().any(|r| r.dataraces > 0)
    }
}
