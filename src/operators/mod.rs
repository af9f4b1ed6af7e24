//! 变异算子目录
//!
//! 算子本身（源码到源码的变换规则）由外部变异引擎实现；这里只保存每个算子的启用标记，
//! 搜索引擎把它当作只读配置。

use serde::{Deserialize, Serialize};

use crate::core::Phase;

/// 修复阶段针对的缺陷类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BugClass {
    /// 数据竞争
    Race,
    /// 死锁
    Lock,
}

impl std::fmt::Display for BugClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BugClass::Race => write!(f, "race"),
            BugClass::Lock => write!(f, "lock"),
        }
    }
}

/// 变异算子描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationOperator {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub usable_for_race: bool,
    #[serde(default = "default_true")]
    pub usable_for_deadlock: bool,
    /// 修复阶段可用于修数据竞争
    #[serde(default = "default_true")]
    pub fix_race_in_phase1: bool,
    /// 修复阶段可用于修死锁
    #[serde(default = "default_true")]
    pub fix_deadlock_in_phase1: bool,
    /// 优化阶段可用
    #[serde(default)]
    pub usable_in_phase2: bool,
}

fn default_true() -> bool {
    true
}

impl MutationOperator {
    fn new(name: &str, fix_race_in_phase1: bool, usable_in_phase2: bool) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            usable_for_race: true,
            usable_for_deadlock: true,
            fix_race_in_phase1,
            fix_deadlock_in_phase1: true,
            usable_in_phase2,
        }
    }

    /// 修复阶段该算子能否用于给定缺陷类别
    pub fn fixes_in_phase1(&self, class: BugClass) -> bool {
        match class {
            BugClass::Race => self.usable_for_race && self.fix_race_in_phase1,
            BugClass::Lock => self.usable_for_deadlock && self.fix_deadlock_in_phase1,
        }
    }
}

/// 默认目录：添加同步（ASAT/ASIM/ASM）、改变同步对象（CSO）、扩展同步区（EXSB/EXSA）、
/// 移除同步（RSAS/RSAV/RSIM/RSM）、收缩同步区（SHSA/SHSB）
pub fn default_catalog() -> Vec<MutationOperator> {
    vec![
        MutationOperator::new("ASAT", true, false),
        MutationOperator::new("ASIM", true, false),
        MutationOperator::new("ASM", true, false),
        MutationOperator::new("CSO", false, false),
        MutationOperator::new("EXSB", true, false),
        MutationOperator::new("EXSA", true, false),
        MutationOperator::new("RSAS", false, true),
        MutationOperator::new("RSAV", false, true),
        MutationOperator::new("RSIM", false, true),
        MutationOperator::new("RSM", false, true),
        MutationOperator::new("SHSA", false, true),
        MutationOperator::new("SHSB", false, true),
    ]
}

/// 只读算子目录
#[derive(Debug, Clone)]
pub struct OperatorCatalog {
    operators: Vec<MutationOperator>,
}

impl Default for OperatorCatalog {
    fn default() -> Self {
        Self::new(default_catalog())
    }
}

impl OperatorCatalog {
    pub fn new(operators: Vec<MutationOperator>) -> Self {
        Self { operators }
    }

    pub fn all(&self) -> &[MutationOperator] {
        &self.operators
    }

    pub fn get(&self, name: &str) -> Option<&MutationOperator> {
        self.operators.iter().find(|op| op.name == name)
    }

    /// 当前阶段启用的算子（目录顺序）：随机变异模式用全部启用算子；
    /// 优化阶段只用标记为 phase 2 可用的算子
    pub fn active(&self, phase: Phase, random_mutation: bool) -> Vec<&MutationOperator> {
        self.operators
            .iter()
            .filter(|op| op.enabled)
            .filter(|op| random_mutation || phase == Phase::Functional || op.usable_in_phase2)
            .collect()
    }

    pub fn enabled_count(&self) -> usize {
        self.operators.iter().filter(|op| op.enabled).count()
    }
}
