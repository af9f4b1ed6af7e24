//! 基于反馈的算子选择
//!
//! 修复阶段先按个体最近的死锁 / 竞争比例抽出要修的缺陷类别，再在适用的算子中按投票排名加权抽取；
//! 排名靠前的算子权重大，但每个合格算子的权重至少为 1。

use std::collections::BTreeMap;

use crate::core::{Phase, SearchContext};
use crate::evolution::individual::Individual;
use crate::operators::BugClass;

/// 算子名 -> 近期改进次数
pub type Votes = BTreeMap<String, u32>;

/// 每代根据滑动窗口重新计算的投票表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteTables {
    pub deadlock: Votes,
    pub datarace: Votes,
    pub optimization: Votes,
}

impl VoteTables {
    fn for_selection(&self, phase: Phase, class: BugClass) -> &Votes {
        match (phase, class) {
            (Phase::Optimization, _) => &self.optimization,
            (Phase::Functional, BugClass::Lock) => &self.deadlock,
            (Phase::Functional, BugClass::Race) => &self.datarace,
        }
    }
}

/// 按投票数降序排名，给候选算子分配递减的整数权重；票数相同权重相同，无票或非正权重记为 1
pub fn operator_chances(candidates: &[&str], votes: &Votes, window: u32) -> Vec<u32> {
    let mut chances = vec![0i64; candidates.len()];
    let mut current_value = candidates.len() as i64 + 1;
    let mut current_large = i64::from(window) + 1;

    let mut ranked: Vec<(&String, &u32)> = votes.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1));

    for (op, &count) in ranked {
        let count = i64::from(count);
        if count < current_large {
            current_value -= 1;
        }
        for (i, name) in candidates.iter().enumerate() {
            if *name == op.as_str() {
                chances[i] = current_value;
            }
        }
        current_large = count;
    }

    chances.into_iter().map(|c| if c <= 0 { 1 } else { c as u32 }).collect()
}

/// (死锁比例, 竞争比例)
pub fn bug_rates(individual: &Individual, runs: u32) -> (f64, f64) {
    let locked = individual.ever_deadlocked();
    let raced = individual.ever_raced();
    match (locked, raced) {
        (false, false) => (0.5, 0.5),
        (true, false) => (0.8, 0.2),
        (false, true) => (0.2, 0.8),
        (true, true) => {
            let latest = individual.latest();
            let deadlocks = latest.map_or(0, |r| r.deadlocks);
            let dataraces = latest.map_or(0, |r| r.dataraces);
            if deadlocks == 0 && dataraces == 0 {
                (0.5, 0.5)
            } else {
                let runs = f64::from(runs.max(1));
                (f64::from(deadlocks) / runs, f64::from(dataraces) / runs)
            }
        }
    }
}

/// 在两个比例之和内均匀抽样决定缺陷类别
pub fn choose_bug_class(ctx: &mut SearchContext, individual: &Individual) -> BugClass {
    let (lock_rate, race_rate) = bug_rates(individual, ctx.config.runs);
    let choice = ctx.rng.uniform(lock_rate + race_rate);
    let is_lock = if race_rate > lock_rate {
        choice > race_rate
    } else {
        choice <= lock_rate
    };
    if is_lock {
        BugClass::Lock
    } else {
        BugClass::Race
    }
}

/// 按整数权重抽取下标
pub fn weighted_pick(ctx: &mut SearchContext, weights: &[u32]) -> Option<usize> {
    let total: u64 = weights.iter().map(|&w| u64::from(w)).sum();
    if total == 0 {
        return None;
    }
    let r = ctx.rng.below(total as usize) as u64;
    let mut running = 0u64;
    for (i, &w) in weights.iter().enumerate() {
        running += u64::from(w);
        if r < running {
            return Some(i);
        }
    }
    None
}

/// 选出下一个要尝试的算子；`remaining` 为各算子尚未尝试的变异点数
pub fn select_operator(
    ctx: &mut SearchContext,
    individual: &Individual,
    votes: &VoteTables,
    remaining: &BTreeMap<String, usize>,
) -> Option<String> {
    let has_sites = |name: &str| remaining.get(name).copied().unwrap_or(0) > 0;

    if ctx.config.random_mutation {
        let choices: Vec<String> = ctx
            .config
            .operators
            .active(ctx.phase, true)
            .into_iter()
            .filter(|op| has_sites(&op.name))
            .map(|op| op.name.clone())
            .collect();
        if choices.is_empty() {
            return None;
        }
        let i = ctx.rng.below(choices.len());
        return choices.into_iter().nth(i);
    }

    let class = match ctx.phase {
        Phase::Functional => choose_bug_class(ctx, individual),
        // 优化阶段不区分缺陷类别
        Phase::Optimization => BugClass::Race,
    };

    let phase = ctx.phase;
    let candidates: Vec<String> = ctx
        .config
        .operators
        .active(phase, false)
        .into_iter()
        .filter(|op| has_sites(&op.name))
        .filter(|op| phase == Phase::Optimization || op.fixes_in_phase1(class))
        .map(|op| op.name.clone())
        .collect();
    if candidates.is_empty() {
        tracing::debug!(individual = individual.id, %class, "No operator with remaining sites");
        return None;
    }

    let names: Vec<&str> = candidates.iter().map(String::as_str).collect();
    let chances = operator_chances(&names, votes.for_selection(phase, class), ctx.config.ranking_window);
    tracing::debug!(individual = individual.id, %class, ?names, ?chances, "Operator weighting");

    let i = weighted_pick(ctx, &chances)?;
    candidates.into_iter().nth(i)
}
