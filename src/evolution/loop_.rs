use chrono::Utc;
use uuid::Uuid;

use crate::core::{Phase, Result, SearchConfig, SearchContext, StdRandom};
use crate::evolution::convergence::FitnessTrend;
use crate::evolution::fitness::{accumulate_votes, FitnessEvaluator};
use crate::evolution::individual::Individual;
use crate::evolution::mutation::{MutationEngine, MutationOutcome};
use crate::evolution::replacement::replace_lowest;
use crate::evolution::selection::VoteTables;
use crate::evolution::types::{BestCandidate, SearchReport, StopReason};
use crate::evolution::Collaborators;
use crate::workspace::{ArtifactRef, Baseline};

/// 一个阶段的结束方式
#[derive(Debug, Clone)]
pub struct EvolveResult {
    pub stop_reason: StopReason,
    /// 通过扩展验证的修复个体
    pub validated: Option<Individual>,
    pub last_generation: u32,
}

/// 按时间顺序记录最高分：严格大于才替换，同分保留更早的
fn update_best(best: &mut Option<BestCandidate>, individual: &Individual) {
    let Some(score) = individual.latest_score() else {
        return;
    };
    let threshold = best.as_ref().map_or(-2.0, |b| b.score);
    if score > threshold {
        *best = Some(BestCandidate {
            id: individual.id,
            generation: individual.generation,
            score,
            validated: individual.validated,
        });
    }
}

/// 优化阶段的最高分若只是回滚记录（负分），报告仍以修复为准
fn optimized_or_fix(optimized: Option<BestCandidate>, fix: Option<BestCandidate>) -> Option<BestCandidate> {
    match optimized {
        Some(best) if best.score >= 0.0 => Some(best),
        _ => {
            tracing::info!("No optimized individual found, keeping the fix");
            fix
        }
    }
}

pub struct EvolutionLoop {
    ctx: SearchContext,
    collab: Collaborators,
    mutation: MutationEngine,
    evaluator: FitnessEvaluator,
    population: Vec<Individual>,
    votes: VoteTables,
    trend: FitnessTrend,
    best: Option<BestCandidate>,
    baseline_score: Option<f64>,
    /// 已清理到的代数
    pruned_through: u32,
}

impl EvolutionLoop {
    pub fn new(ctx: SearchContext, collab: Collaborators) -> Self {
        let mutation = MutationEngine::new(
            collab.store.clone(),
            collab.sites.clone(),
            collab.builder.clone(),
            collab.exclusions.clone(),
        );
        let evaluator = FitnessEvaluator::new(
            collab.store.clone(),
            collab.model_checker.clone(),
            collab.runner.clone(),
            collab.targets.clone(),
        );
        let population = (1..=ctx.config.population).map(Individual::new).collect();
        Self {
            ctx,
            collab,
            mutation,
            evaluator,
            population,
            votes: VoteTables::default(),
            trend: FitnessTrend::new(),
            best: None,
            baseline_score: None,
            pruned_through: 0,
        }
    }

    pub fn population(&self) -> &[Individual] {
        &self.population
    }

    pub fn context(&self) -> &SearchContext {
        &self.ctx
    }

    pub fn best(&self) -> Option<&BestCandidate> {
        self.best.as_ref()
    }

    pub fn trend(&self) -> &FitnessTrend {
        &self.trend
    }

    /// 从 `start` 之后的一代开始演化，直到本阶段结束
    pub async fn evolve(&mut self, start: u32) -> Result<EvolveResult> {
        let functional = self.ctx.is_functional();
        let limit = if functional {
            self.ctx.config.generations
        } else {
            self.ctx.config.generations + start
        };
        self.pruned_through = start;
        let mut generation = start;

        loop {
            generation += 1;
            tracing::info!(generation, phase = %self.ctx.phase, "Starting generation");

            let mut produced = 0u32;
            let mut running_sum = 0.0;
            let mut highest = -1.0;

            for idx in 0..self.population.len() {
                let individual = &mut self.population[idx];
                individual.begin_generation(generation);

                let outcome = self.mutation.mutate(&mut self.ctx, individual, &self.votes).await?;
                if let MutationOutcome::Applied { .. } = outcome {
                    produced += 1;
                    self.evaluator.evaluate(&mut self.ctx, individual).await?;

                    let score = individual.latest_score().unwrap_or(-1.0);
                    running_sum += score;
                    if score >= highest {
                        highest = score;
                    }
                    update_best(&mut self.best, individual);

                    let all_passed = individual
                        .latest()
                        .is_some_and(|r| r.successes == self.ctx.config.runs);
                    if functional && all_passed {
                        tracing::info!(individual = individual.id, generation, "Found potential fix");
                        if self.evaluator.verify(&self.ctx).await {
                            individual.validated = true;
                            let fix = individual.clone();
                            tracing::info!(individual = fix.id, generation, "Fix validated");
                            // 修复即为本阶段结果
                            self.best = Some(BestCandidate {
                                id: fix.id,
                                generation,
                                score: fix.latest_score().unwrap_or_default(),
                                validated: true,
                            });
                            return Ok(EvolveResult {
                                stop_reason: StopReason::FixValidated,
                                validated: Some(fix),
                                last_generation: generation,
                            });
                        }
                        tracing::info!(individual = individual.id, "Potential fix still has errors");
                    }

                    if generation >= limit {
                        tracing::info!(generation, "Exhausted all generations");
                        return Ok(self.finish(StopReason::GenerationLimit, generation));
                    }
                } else if !functional {
                    tracing::info!(
                        individual = self.population[idx].id,
                        generation,
                        "No mutants for individual, ending optimization"
                    );
                    return Ok(self.finish(StopReason::MutantsExhausted, generation));
                }
            }

            self.prune(generation, start).await;

            let average = running_sum / self.population.len().max(1) as f64;
            self.trend.push(average, highest, generation);
            tracing::info!(generation, average, highest, produced, "Generation finished");

            if !functional
                && self.trend.has_converged(
                    self.ctx.config.convergence_window,
                    self.ctx.config.avg_fitness_min_delta,
                    self.ctx.config.best_fitness_min_delta,
                )
            {
                return Ok(self.finish(StopReason::Converged, generation));
            }
            if produced == 0 {
                tracing::warn!(generation, "No compilable mutant for any individual in this generation");
                return Ok(self.finish(StopReason::NoCompilableMutants, generation));
            }
            if generation >= limit {
                return Ok(self.finish(StopReason::GenerationLimit, generation));
            }

            if !self.ctx.config.random_mutation {
                replace_lowest(
                    &mut self.ctx,
                    self.collab.store.as_ref(),
                    &mut self.population,
                    generation,
                )
                .await?;
                self.votes = accumulate_votes(
                    &self.population,
                    generation,
                    self.ctx.phase,
                    self.ctx.config.ranking_window,
                );
            }
        }
    }

    fn finish(&self, stop_reason: StopReason, generation: u32) -> EvolveResult {
        tracing::info!(%stop_reason, generation, best = ?self.best, "Phase finished");
        EvolveResult {
            stop_reason,
            validated: None,
            last_generation: generation,
        }
    }

    /// 删除 generation - 2 及更早的变异体副本；保留上一代（回滚用）、阶段基线与当前最优
    async fn prune(&mut self, generation: u32, start: u32) {
        if generation <= 2 || generation % self.ctx.config.prune_interval.max(1) != 0 {
            return;
        }
        let through = generation - 2;
        let protected = self.best.as_ref().map(BestCandidate::artifact);
        for g in (self.pruned_through + 1).max(start + 1)..=through {
            for individual in &self.population {
                let at = ArtifactRef::new(g, individual.id);
                if Some(at) == protected {
                    continue;
                }
                if let Err(e) = self.collab.store.prune(at).await {
                    tracing::warn!(%at, "Could not prune mutant: {}", e);
                }
            }
        }
        self.pruned_through = self.pruned_through.max(through);
    }

    /// 用修复个体重建种群，复制修复工程并测量性能基线
    pub async fn prepare_optimization(&mut self, fix: &Individual) -> Result<()> {
        self.ctx.phase = Phase::Optimization;
        let switch = fix.generation;
        let fix_ref = fix.artifact();
        tracing::info!(individual = fix.id, generation = switch, "Repopulating with the fixed individual");

        self.population = (1..=self.ctx.config.population)
            .map(|id| {
                let mut clone = fix.clone();
                clone.id = id;
                clone.switch_generation = switch;
                clone.turns_underperforming = 0;
                clone.validated = true;
                clone
            })
            .collect();
        for individual in &self.population {
            if individual.id != fix.id {
                self.collab
                    .store
                    .copy(fix_ref, ArtifactRef::new(switch, individual.id))
                    .await?;
            }
        }

        self.collab.store.stage(fix_ref).await?;
        if !self.collab.builder.build(fix_ref).await {
            tracing::warn!(%fix_ref, "Fixed project did not build before measuring its baseline");
        }
        self.baseline_score = self.evaluator.measure_baseline(&self.ctx).await;

        self.votes = VoteTables::default();
        self.trend = FitnessTrend::new();
        self.best = None;
        Ok(())
    }

    /// 完整的两阶段搜索；无论成败都会清理变异体副本
    pub async fn run(mut self, seed: u64) -> Result<SearchReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();
        tracing::info!(%run_id, seed, population = self.population.len(), "Starting repair search");

        let result = self.search(run_id, seed, started_at).await;

        if let Err(e) = self.collab.store.cleanup().await {
            tracing::warn!("Could not clean up mutant copies: {}", e);
        }
        result
    }

    async fn search(
        &mut self,
        run_id: String,
        seed: u64,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<SearchReport> {
        tracing::info!("Starting phase 1: bug fixing");
        let phase1 = self.evolve(0).await?;
        let mut stop_reason = phase1.stop_reason;
        let mut optimized = false;

        let fix_found = phase1.validated.is_some();
        if let Some(fix) = phase1.validated {
            let fix_best = self.best.clone();
            if !self.ctx.config.only_functional {
                self.prepare_optimization(&fix).await?;
                tracing::info!(baseline = ?self.baseline_score, "Starting phase 2: optimization");
                let phase2 = self.evolve(fix.generation).await?;
                stop_reason = phase2.stop_reason;
                optimized = true;
                self.best = optimized_or_fix(self.best.take(), fix_best);
            }
        } else {
            tracing::info!("No individual was found that functions correctly");
        }

        let mut output_dir = None;
        let mut entrypoint_synchronized = false;
        if fix_found {
            if let Some(best) = &self.best {
                let at = best.artifact();
                tracing::info!(%at, "Exporting fixed project");
                let dir = self.collab.store.export(at).await?;
                entrypoint_synchronized = self.collab.exclusions.exported_synchronizes_entrypoint(&dir).await;
                if entrypoint_synchronized {
                    tracing::warn!(
                        "The exported fix synchronizes the entry method, turning the program sequential; \
                         consider evolution.exclude_entrypoint = true"
                    );
                }
                output_dir = Some(dir);
            }
        }

        Ok(SearchReport {
            run_id,
            seed,
            fix_found,
            optimized,
            best: self.best.clone(),
            best_generation: self.best.as_ref().map(|b| b.generation),
            best_artifact: self.best.as_ref().map(BestCandidate::artifact),
            baseline_score: self.baseline_score,
            stop_reason,
            output_dir,
            entrypoint_synchronized,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// 在原始工程上计时一次干净运行，据此设置试验超时
async fn calibrate_trial_timeout(config: &SearchConfig, collab: &Collaborators) -> Result<()> {
    let at = ArtifactRef::new(0, 1);
    collab.store.create_local(at, Baseline::Pristine).await?;
    collab.store.stage(at).await?;
    if !collab.builder.build(at).await {
        tracing::warn!("Pristine project does not build, keeping the configured trial timeout");
    } else if let Some(timeout) = collab.runner.calibrate_timeout(config.timeout_multiplier).await {
        tracing::info!(?timeout, "Trial timeout calibrated");
    }
    collab.store.prune(at).await
}

/// 校验配置、校准超时、播种随机源并运行完整搜索
pub async fn start_search(config: SearchConfig, collab: Collaborators) -> Result<SearchReport> {
    if let Err(e) = config.validate() {
        tracing::error!("Invalid search configuration: {}", e);
        return Err(e);
    }
    if config.calibrate_timeout {
        if let Err(e) = calibrate_trial_timeout(&config, &collab).await {
            tracing::warn!("Timeout calibration failed, keeping the configured value: {}", e);
        }
    }
    let rng = StdRandom::from_config(config.random_seed);
    let seed = rng.seed();
    tracing::info!(seed, "Random seed (set evolution.random_seed to replay)");
    let ctx = SearchContext::new(config, Box::new(rng));
    EvolutionLoop::new(ctx, collab).run(seed).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ScriptedRandom;
    use crate::workspace::MockWorkspace;
    use std::sync::Arc;

    fn config() -> SearchConfig {
        SearchConfig {
            population: 2,
            generations: 3,
            runs: 2,
            validation_multiplier: 2,
            random_seed: Some(9),
            ..SearchConfig::default()
        }
    }

    fn search_loop(ws: &Arc<MockWorkspace>, config: SearchConfig) -> EvolutionLoop {
        let ctx = SearchContext::new(config, Box::new(StdRandom::seeded(9)));
        EvolutionLoop::new(ctx, Collaborators::from_workspace(ws.clone()))
    }

    #[test]
    fn test_rolled_back_record_never_replaces_the_fix() {
        let fix = BestCandidate {
            id: 3,
            generation: 4,
            score: 1000.0,
            validated: true,
        };
        let rolled_back = BestCandidate {
            id: 1,
            generation: 6,
            score: -1.0,
            validated: false,
        };
        assert_eq!(optimized_or_fix(Some(rolled_back), Some(fix.clone())), Some(fix.clone()));
        assert_eq!(optimized_or_fix(None, Some(fix.clone())), Some(fix));

        let improved = BestCandidate {
            id: 2,
            generation: 7,
            score: 2.5,
            validated: false,
        };
        assert_eq!(optimized_or_fix(Some(improved.clone()), None), Some(improved));
    }

    #[test]
    fn test_best_prefers_earliest_on_ties() {
        let mut best = None;
        let mut a = Individual::new(1);
        a.begin_generation(1);
        a.push_record(crate::evolution::types::EvaluationRecord::from_counts(
            1,
            300.0,
            &Default::default(),
            None,
            crate::evolution::types::EvalMethod::Noise,
        ));
        update_best(&mut best, &a);
        let mut b = a.clone();
        b.id = 2;
        b.generation = 2;
        update_best(&mut best, &b);
        assert_eq!(best.map(|b| (b.id, b.generation)), Some((1, 1)));
    }

    #[tokio::test]
    async fn test_fix_in_first_generation() {
        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 1)]).with_fix("ASAT", 0));
        let mut search = search_loop(&ws, config());

        let result = search.evolve(0).await.unwrap();
        assert_eq!(result.stop_reason, StopReason::FixValidated);
        let fix = result.validated.unwrap();
        assert_eq!(fix.id, 1);
        assert!(fix.validated);
        // 基础 2 次 + 扩展验证 4 次
        assert_eq!(ws.trials().await, 6);
    }

    #[tokio::test]
    async fn test_generation_limit_without_fix() {
        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 3), ("ASIM", 3)]));
        let mut search = search_loop(&ws, config());

        let result = search.evolve(0).await.unwrap();
        assert_eq!(result.stop_reason, StopReason::GenerationLimit);
        assert!(result.validated.is_none());
        assert_eq!(result.last_generation, 3);
        assert!(search.best().is_some());
        // 每个个体的历史长度一致
        for ind in search.population() {
            assert_eq!(ind.score_history().len(), ind.deadlock_history().len());
        }
    }

    #[tokio::test]
    async fn test_no_compilable_mutants_stops_early() {
        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 2)]).with_failing_builds());
        let mut search = search_loop(&ws, config());

        let result = search.evolve(0).await.unwrap();
        assert_eq!(result.stop_reason, StopReason::NoCompilableMutants);
        assert_eq!(result.last_generation, 1);
        assert!(search.best().is_none());
    }

    #[tokio::test]
    async fn test_pruning_keeps_previous_generation() {
        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 3), ("ASIM", 3)]));
        let config = SearchConfig {
            generations: 4,
            ..config()
        };
        let mut search = search_loop(&ws, config);
        search.evolve(0).await.unwrap();

        let pruned = ws.pruned().await;
        assert!(pruned.iter().all(|at| at.generation == 1));
        let best = search.best().unwrap().artifact();
        assert!(!pruned.contains(&best));
    }

    #[tokio::test]
    async fn test_random_mode_skips_votes() {
        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 3)]));
        let config = SearchConfig {
            random_mutation: true,
            ..config()
        };
        let ctx = SearchContext::new(config, Box::new(ScriptedRandom::new()));
        let mut search = EvolutionLoop::new(ctx, Collaborators::from_workspace(ws.clone()));
        let result = search.evolve(0).await.unwrap();
        assert_eq!(result.stop_reason, StopReason::GenerationLimit);
        assert_eq!(search.votes, VoteTables::default());
    }
}
