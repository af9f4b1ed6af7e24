//! 适应度评估
//!
//! 修复阶段：先查变异体缓存，命中则直接复制首次评估的结果；否则（可选）先做模型检查，
//! 结论不明确时再在噪声下重复运行测试。
//! 优化阶段：先用扩展次数重新验证正确性，通过后按 CPU 时间与自愿上下文切换计算性能分数；
//! 验证失败记 -1 并回滚到上一代的变异体。

use std::sync::Arc;

use crate::core::{Phase, Result, SearchContext};
use crate::evolution::individual::Individual;
use crate::evolution::selection::VoteTables;
use crate::evolution::types::{EvalMethod, EvaluationRecord};
use crate::harness::batch::mean;
use crate::harness::{BatchTester, OutcomeCounts, TestMode, TrialRunner};
use crate::workspace::{ArtifactRef, ArtifactStore, Baseline, ModelCheckOutcome, ModelChecker, TargetRefresher};

/// 优化阶段的性能分数
///
/// 两个信号中均值较小的一个视为“更显著”：
/// `(sig / other) * (1 - sig_spread) + (other / sig) * (1 - other_spread)`，
/// spread 为 (max - min) / mean。样本为空时返回 None。
pub fn non_functional_score(real_time: &[f64], voluntary_switches: &[f64]) -> Option<f64> {
    let avg_rt = mean(real_time)?.max(f64::EPSILON);
    let avg_vs = mean(voluntary_switches)?.max(f64::EPSILON);
    let unc_rt = spread(real_time) / avg_rt;
    let unc_vs = spread(voluntary_switches) / avg_vs;

    let (sig, sig_unc, other, other_unc) = if avg_rt > avg_vs {
        (avg_vs, unc_vs, avg_rt, unc_rt)
    } else if avg_rt < avg_vs {
        (avg_rt, unc_rt, avg_vs, unc_vs)
    } else {
        (1.0, unc_vs, 1.0, unc_rt)
    };

    Some((sig / other) * (1.0 - sig_unc) + (other / sig) * (1.0 - other_unc))
}

fn spread(samples: &[f64]) -> f64 {
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    if samples.is_empty() {
        0.0
    } else {
        max - min
    }
}

/// 修复阶段的噪声测试分数
pub fn functional_score(counts: &OutcomeCounts, success_weight: f64, timeout_weight: f64) -> f64 {
    f64::from(counts.successes) * success_weight + f64::from(counts.timeouts) * timeout_weight
}

/// 模型检查后下一步怎么做
enum ModelCheckStep {
    /// 已写入记录
    Scored,
    /// 交给噪声测试
    FallBack,
}

pub struct FitnessEvaluator {
    store: Arc<dyn ArtifactStore>,
    model_checker: Option<Arc<dyn ModelChecker>>,
    batch: BatchTester,
}

impl FitnessEvaluator {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        model_checker: Option<Arc<dyn ModelChecker>>,
        runner: Arc<dyn TrialRunner>,
        targets: Arc<dyn TargetRefresher>,
    ) -> Self {
        Self {
            store,
            model_checker,
            batch: BatchTester::new(runner, targets),
        }
    }

    /// 为个体当前代追加一条评估记录
    pub async fn evaluate(&mut self, ctx: &mut SearchContext, individual: &mut Individual) -> Result<()> {
        let at = individual.artifact();

        let mut fingerprint = None;
        if ctx.is_functional() {
            match self.store.fingerprint(at).await {
                Ok(fp) => {
                    if let Some(entry) = ctx.cache.lookup(&fp) {
                        tracing::info!(
                            individual = individual.id,
                            generation = individual.generation,
                            first_seen = %entry.first_seen,
                            "Mutant seen before, reusing its results"
                        );
                        let record = entry
                            .record
                            .copied_to(individual.generation, individual.last_operator.clone());
                        individual.push_record(record);
                        return Ok(());
                    }
                    fingerprint = Some(fp);
                }
                Err(e) => tracing::warn!(%at, "Could not fingerprint mutant: {}", e),
            }
        }

        self.score(ctx, individual).await?;

        if let (Some(fp), Some(record)) = (fingerprint, individual.latest()) {
            ctx.cache.register(fp, at, record.clone());
        }
        Ok(())
    }

    async fn score(&mut self, ctx: &mut SearchContext, individual: &mut Individual) -> Result<()> {
        if ctx.is_functional() && ctx.use_model_checker {
            if let Some(checker) = self.model_checker.clone() {
                if let ModelCheckStep::Scored = self.model_check(ctx, individual, checker.as_ref()).await? {
                    return Ok(());
                }
            }
        }

        match ctx.phase {
            Phase::Functional => self.noise_functional(ctx, individual).await,
            Phase::Optimization => self.noise_optimization(ctx, individual).await,
        }
    }

    async fn model_check(
        &mut self,
        ctx: &mut SearchContext,
        individual: &mut Individual,
        checker: &dyn ModelChecker,
    ) -> Result<ModelCheckStep> {
        let at = individual.artifact();
        let limit = ctx.config.model_check_depth.max(1);
        tracing::info!(individual = individual.id, generation = individual.generation, "Evaluating with model checker");
        let verdict = checker.check(at, limit).await;

        if verdict.is_inconclusive() {
            ctx.inconclusive_model_checks += 1;
            if ctx.inconclusive_model_checks > ctx.config.model_check_max_inconclusive {
                tracing::warn!(
                    count = ctx.inconclusive_model_checks,
                    "Too many inconclusive model checks, disabling model checker"
                );
                ctx.use_model_checker = false;
            }
            return Ok(ModelCheckStep::FallBack);
        }

        let mut counts = OutcomeCounts::default();
        let depth = match &verdict {
            ModelCheckOutcome::InvalidMutant => {
                tracing::info!(individual = individual.id, "Model checker rejected mutant as invalid");
                self.store.create_local(at, Baseline::Previous).await?;
                counts.errors = 1;
                individual.push_record(EvaluationRecord::from_counts(
                    individual.generation,
                    0.0,
                    &counts,
                    individual.last_operator.clone(),
                    EvalMethod::ModelCheck,
                ));
                return Ok(ModelCheckStep::Scored);
            }
            ModelCheckOutcome::RaceFound { depth, sites } => {
                tracing::debug!(depth, ?sites, "Model checker found a data race");
                counts.dataraces = 1;
                *depth
            }
            ModelCheckOutcome::DeadlockFound { depth, classes } => {
                tracing::debug!(depth, ?classes, "Model checker found a deadlock");
                counts.deadlocks = 1;
                *depth
            }
            ModelCheckOutcome::GenericException { depth } => {
                counts.errors = 1;
                *depth
            }
            _ => return Ok(ModelCheckStep::FallBack),
        };

        if depth >= limit {
            let found_bug = counts.dataraces > 0 || counts.deadlocks > 0;
            if found_bug {
                tracing::warn!(depth, limit, "Model checker reached its depth limit with bugs left, disabling it");
                ctx.use_model_checker = false;
            } else {
                tracing::info!(depth, limit, "No race or deadlock up to the depth limit, confirming with noisy trials");
            }
            return Ok(ModelCheckStep::FallBack);
        }

        let score = f64::from(depth.min(limit)) / f64::from(limit) * ctx.config.max_fitness();
        individual.push_record(EvaluationRecord::from_counts(
            individual.generation,
            score,
            &counts,
            individual.last_operator.clone(),
            EvalMethod::ModelCheck,
        ));
        Ok(ModelCheckStep::Scored)
    }

    async fn noise_functional(&mut self, ctx: &SearchContext, individual: &mut Individual) -> Result<()> {
        tracing::info!(
            individual = individual.id,
            generation = individual.generation,
            "Evaluating with repeated noisy trials"
        );
        self.batch.reset();
        self.batch.run(TestMode::Functional, ctx.config.runs, false).await;
        let counts = self.batch.counts;
        let score = functional_score(&counts, ctx.config.success_weight, ctx.config.timeout_weight);
        tracing::info!(individual = individual.id, score, ?counts, "Functional fitness");
        individual.push_record(EvaluationRecord::from_counts(
            individual.generation,
            score,
            &counts,
            individual.last_operator.clone(),
            EvalMethod::Noise,
        ));
        Ok(())
    }

    async fn noise_optimization(&mut self, ctx: &SearchContext, individual: &mut Individual) -> Result<()> {
        self.batch.reset();
        let passed = self
            .batch
            .run(TestMode::Performance, ctx.config.validation_runs(), true)
            .await;
        let counts = self.batch.counts;
        let perf = if passed {
            non_functional_score(&self.batch.real_time, &self.batch.voluntary_switches)
        } else {
            None
        };

        let mut record = EvaluationRecord::from_counts(
            individual.generation,
            -1.0,
            &counts,
            individual.last_operator.clone(),
            EvalMethod::Noise,
        );

        match perf {
            Some(score) => {
                tracing::info!(individual = individual.id, score, "Optimization fitness");
                record.score = score;
                record.real_time = self.batch.average_real_time();
                record.voluntary_switches = self.batch.average_voluntary_switches();
                individual.push_record(record);
            }
            None => {
                tracing::info!(individual = individual.id, "Mutation broke correctness, rolling back");
                individual.push_record(record);
                let at = individual.artifact();
                if at.generation.saturating_sub(1) == 0 {
                    self.store.create_local(at, Baseline::Pristine).await?;
                } else {
                    self.store
                        .copy(ArtifactRef::new(at.generation - 1, at.id), at)
                        .await?;
                }
                individual.mark_restarted();
            }
        }
        Ok(())
    }

    /// 扩展验证：遇到第一次失败即停止
    pub async fn verify(&mut self, ctx: &SearchContext) -> bool {
        self.batch.reset();
        let passed = self
            .batch
            .run(TestMode::Functional, ctx.config.validation_runs(), true)
            .await;
        tracing::info!(passed, counts = ?self.batch.counts, "Extended verification finished");
        passed
    }

    /// 测量已修复工程的性能分数，作为优化阶段的基线
    pub async fn measure_baseline(&mut self, ctx: &SearchContext) -> Option<f64> {
        self.batch.reset();
        self.batch
            .run(TestMode::Performance, ctx.config.validation_runs(), false)
            .await;
        let score = non_functional_score(&self.batch.real_time, &self.batch.voluntary_switches);
        tracing::info!(?score, "Baseline non-functional score");
        score
    }

    pub fn batch(&self) -> &BatchTester {
        &self.batch
    }
}

/// 在滑动窗口内统计每个算子带来的改进次数
///
/// 窗口为 [max(1, generation - window), generation]；相邻两条记录之间有改进时，
/// 把票记给产生后一条记录的算子。优化阶段只比较优化阶段内的记录。
pub fn accumulate_votes(population: &[Individual], generation: u32, phase: Phase, window: u32) -> VoteTables {
    let begin = if generation <= window {
        1
    } else {
        generation - window
    };
    let mut tables = VoteTables::default();

    for individual in population {
        if individual.last_operator.is_none() {
            continue;
        }
        let in_window: Vec<&EvaluationRecord> = individual
            .records
            .iter()
            .filter(|r| r.generation >= begin && r.generation <= generation)
            .filter(|r| phase == Phase::Functional || r.generation > individual.switch_generation)
            .collect();

        for pair in in_window.windows(2) {
            let (before, after) = (pair[0], pair[1]);
            let Some(op) = after.operator.clone() else {
                continue;
            };
            match phase {
                Phase::Functional => {
                    if after.deadlocks < before.deadlocks {
                        *tables.deadlock.entry(op.clone()).or_default() += 1;
                    }
                    if after.dataraces < before.dataraces {
                        *tables.datarace.entry(op).or_default() += 1;
                    }
                }
                Phase::Optimization => {
                    if after.score > before.score {
                        *tables.optimization.entry(op).or_default() += 1;
                    }
                }
            }
        }
    }

    tracing::debug!(
        generation,
        begin,
        deadlock = ?tables.deadlock,
        datarace = ?tables.datarace,
        optimization = ?tables.optimization,
        "Operator votes"
    );
    tables
}
