//! 变异引擎：为个体找到一个可编译的新变异体
//!
//! 每次调用都重新枚举变异点，然后在选出的算子下随机挑一个没试过的变异点，
//! 过排除规则、应用、构建；直到构建成功、变异点用尽或达到尝试上限。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::core::{RepairError, Result, SearchContext};
use crate::evolution::individual::Individual;
use crate::evolution::selection::{select_operator, VoteTables};
use crate::workspace::{ArtifactStore, Baseline, Builder, ExclusionRules, SiteGenerator};

/// 一次变异的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied { operator: String, site: usize },
    /// 有变异点，但没有得到可编译的变异体；工程已重置到本阶段基线
    Exhausted,
    /// 优化阶段没有任何变异点
    NoSites,
}

impl MutationOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, MutationOutcome::Applied { .. })
    }
}

pub struct MutationEngine {
    store: Arc<dyn ArtifactStore>,
    sites: Arc<dyn SiteGenerator>,
    builder: Arc<dyn Builder>,
    exclusions: Arc<dyn ExclusionRules>,
}

impl MutationEngine {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        sites: Arc<dyn SiteGenerator>,
        builder: Arc<dyn Builder>,
        exclusions: Arc<dyn ExclusionRules>,
    ) -> Self {
        Self {
            store,
            sites,
            builder,
            exclusions,
        }
    }

    async fn enumerate(&self, ctx: &SearchContext, individual: &mut Individual) -> Result<usize> {
        let counts = self.sites.list_sites(individual.artifact(), ctx.phase).await?;
        Ok(individual.repopulate_genome(&counts))
    }

    pub async fn mutate(
        &self,
        ctx: &mut SearchContext,
        individual: &mut Individual,
        votes: &VoteTables,
    ) -> Result<MutationOutcome> {
        let at = individual.artifact();
        tracing::info!(individual = individual.id, generation = individual.generation, "Mutating individual");

        let mut baseline = Baseline::Previous;
        self.store.create_local(at, baseline).await?;
        let mut total = self.enumerate(ctx, individual).await?;

        if total == 0 {
            tracing::debug!(individual = individual.id, "No mutation sites");
            if !ctx.is_functional() {
                individual.last_operator = None;
                individual.applied_operators.push(None);
                return Ok(MutationOutcome::NoSites);
            }
            baseline = Baseline::Pristine;
            self.store.create_local(at, baseline).await?;
            total = self.enumerate(ctx, individual).await?;
            if total == 0 {
                tracing::error!(
                    individual = individual.id,
                    generation = individual.generation,
                    "Pristine project has no mutation sites"
                );
                return Err(RepairError::NoMutationSites {
                    generation: individual.generation,
                    id: individual.id,
                });
            }
        }

        let max_attempts = ctx.config.max_mutation_attempts.max(1);
        let mut attempted: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
        let mut tried_total = 0usize;

        for _ in 0..max_attempts {
            if tried_total >= total {
                break;
            }

            let remaining: BTreeMap<String, usize> = individual
                .genome
                .iter()
                .map(|(op, slots)| {
                    let tried = attempted.get(op).map_or(0, BTreeSet::len);
                    (op.clone(), slots.len().saturating_sub(tried))
                })
                .collect();
            let Some(operator) = select_operator(ctx, individual, votes, &remaining) else {
                continue;
            };

            let n = individual.sites_for(&operator);
            let tried = attempted.entry(operator.clone()).or_default();
            if tried.len() >= n {
                continue;
            }
            let mut picked = None;
            for _ in 0..max_attempts {
                let candidate = ctx.rng.below(n);
                if tried.insert(candidate) {
                    picked = Some(candidate);
                    break;
                }
            }
            let Some(site) = picked else {
                tracing::warn!(%operator, "An untried site should exist but none was drawn");
                continue;
            };
            tried_total += 1;

            // 排除规则按基线工程上的变异点编号判断，先撤掉上一次失败尝试的改动
            self.store.create_local(at, baseline).await?;
            if ctx.config.exclude_entrypoint && self.exclusions.violates_entrypoint_sync(at, &operator, site).await {
                tracing::debug!(%operator, site, "Skipping site: synchronizes the entry method");
                continue;
            }
            if self.exclusions.violates_double_lock(at, &operator, site).await {
                tracing::debug!(%operator, site, "Skipping site: nested locking on one variable");
                continue;
            }

            if let Err(e) = self.sites.apply_site(at, &operator, site).await {
                tracing::warn!(%operator, site, "Could not apply mutation: {}", e);
                continue;
            }
            self.store.stage(at).await?;

            if self.builder.build(at).await {
                tracing::info!(individual = individual.id, %operator, site, "Mutation applied");
                individual.mark_applied(&operator, site);
                individual.last_operator = Some(operator.clone());
                individual.applied_operators.push(Some(operator.clone()));
                return Ok(MutationOutcome::Applied { operator, site });
            }
        }

        let reset_to = if ctx.is_functional() {
            Baseline::Pristine
        } else {
            Baseline::Generation(individual.switch_generation)
        };
        tracing::info!(
            individual = individual.id,
            tried = tried_total,
            "No compilable mutant found, resetting to phase baseline"
        );
        self.store.create_local(at, reset_to).await?;
        individual.last_operator = None;
        individual.applied_operators.push(None);
        Ok(MutationOutcome::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Phase, ScriptedRandom, SearchConfig, StdRandom};
    use crate::workspace::{ArtifactRef, MockWorkspace};

    fn engine(ws: &Arc<MockWorkspace>) -> MutationEngine {
        MutationEngine::new(ws.clone(), ws.clone(), ws.clone(), ws.clone())
    }

    fn context() -> SearchContext {
        SearchContext::new(SearchConfig::default(), Box::new(StdRandom::seeded(5)))
    }

    #[tokio::test]
    async fn test_optimization_without_sites_skips_builder() {
        let ws = Arc::new(MockWorkspace::new(&[]));
        let mut ctx = context();
        ctx.phase = Phase::Optimization;
        let mut ind = Individual::new(1);
        ind.begin_generation(6);

        let outcome = engine(&ws).mutate(&mut ctx, &mut ind, &VoteTables::default()).await.unwrap();
        assert_eq!(outcome, MutationOutcome::NoSites);
        assert_eq!(ws.builds().await, 0);
        assert_eq!(ind.applied_operators, vec![None]);
    }

    #[tokio::test]
    async fn test_pristine_without_sites_is_configuration_error() {
        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 0)]));
        let mut ctx = context();
        let mut ind = Individual::new(2);
        ind.begin_generation(1);

        let err = engine(&ws)
            .mutate(&mut ctx, &mut ind, &VoteTables::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RepairError::NoMutationSites { generation: 1, id: 2 }));
    }

    #[tokio::test]
    async fn test_successful_mutation_updates_individual() {
        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 1)]));
        let mut ctx = context();
        let mut ind = Individual::new(1);
        ind.begin_generation(1);

        let outcome = engine(&ws).mutate(&mut ctx, &mut ind, &VoteTables::default()).await.unwrap();
        assert_eq!(
            outcome,
            MutationOutcome::Applied {
                operator: "ASAT".into(),
                site: 0
            }
        );
        assert_eq!(ind.last_operator.as_deref(), Some("ASAT"));
        assert_eq!(ind.applied_operators, vec![Some("ASAT".to_string())]);
        assert_eq!(ind.genome["ASAT"], vec![true]);
        assert_eq!(ws.project(ArtifactRef::new(1, 1)).await, Some(vec!["ASAT#0".to_string()]));
        assert_eq!(ws.builds().await, 1);
    }

    #[tokio::test]
    async fn test_mutations_build_on_previous_generation() {
        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 1)]));
        ws.seed_project(ArtifactRef::new(1, 1), &["ASIM#3"]).await;
        let mut ctx = context();
        let mut ind = Individual::new(1);
        ind.begin_generation(2);

        engine(&ws).mutate(&mut ctx, &mut ind, &VoteTables::default()).await.unwrap();
        assert_eq!(
            ws.project(ArtifactRef::new(2, 1)).await,
            Some(vec!["ASIM#3".to_string(), "ASAT#0".to_string()])
        );
    }

    #[tokio::test]
    async fn test_uncompilable_sites_exhaust_and_reset() {
        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 2), ("ASIM", 1)]).with_failing_builds());
        ws.seed_project(ArtifactRef::new(1, 1), &["ASM#0"]).await;
        let mut ctx = context();
        let mut ind = Individual::new(1);
        ind.begin_generation(2);

        let outcome = engine(&ws).mutate(&mut ctx, &mut ind, &VoteTables::default()).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Exhausted);
        // 每个变异点只尝试一次
        assert_eq!(ws.builds().await, 3);
        assert!(ind.last_operator.is_none());
        assert_eq!(ind.applied_operators, vec![None]);
        // 修复阶段重置到原始工程
        assert_eq!(ws.project(ArtifactRef::new(2, 1)).await, Some(vec![]));
    }

    #[tokio::test]
    async fn test_entrypoint_site_is_excluded() {
        let ws = Arc::new(MockWorkspace::new(&[("ASM", 2)]).with_entrypoint_site("ASM", 0));
        // 先抽到 0 号（被排除），再抽到 1 号
        let rng = ScriptedRandom::new().with_floats([0.9, 0.9]).with_integers([0, 0, 0, 1]);
        let mut ctx = SearchContext::new(SearchConfig::default(), Box::new(rng));
        let mut ind = Individual::new(1);
        ind.begin_generation(1);

        let outcome = engine(&ws).mutate(&mut ctx, &mut ind, &VoteTables::default()).await.unwrap();
        assert_eq!(
            outcome,
            MutationOutcome::Applied {
                operator: "ASM".into(),
                site: 1
            }
        );
        assert_eq!(ws.builds().await, 1);
    }

    #[tokio::test]
    async fn test_exclusion_checks_see_baseline_after_failed_builds() {
        let ws = Arc::new(MockWorkspace::new(&[("ASM", 2)]).with_failing_builds());
        ws.seed_project(ArtifactRef::new(1, 1), &["ASIM#3"]).await;
        let mut ctx = context();
        let mut ind = Individual::new(1);
        ind.begin_generation(2);

        let outcome = engine(&ws).mutate(&mut ctx, &mut ind, &VoteTables::default()).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Exhausted);
        assert_eq!(ws.builds().await, 2);
        // 第二次尝试看到的仍是上一代工程，而不是第一次失败的变异体
        let baseline = vec!["ASIM#3".to_string()];
        assert_eq!(ws.exclusion_views().await, vec![baseline.clone(), baseline]);
    }

    #[tokio::test]
    async fn test_failed_attempt_does_not_trigger_nested_lock_rule() {
        let ws = Arc::new(
            MockWorkspace::new(&[("ASM", 2)])
                .with_failing_builds()
                .with_double_lock_guard(),
        );
        let mut ctx = context();
        let mut ind = Individual::new(1);
        ind.begin_generation(1);

        engine(&ws).mutate(&mut ctx, &mut ind, &VoteTables::default()).await.unwrap();
        // 两个变异点都在原始工程上判断，都不违反规则
        assert_eq!(ws.builds().await, 2);
    }

    #[tokio::test]
    async fn test_nested_lock_on_baseline_is_excluded() {
        let ws = Arc::new(MockWorkspace::new(&[("ASM", 2)]).with_double_lock_guard());
        ws.seed_project(ArtifactRef::new(1, 1), &["ASM#0"]).await;
        let mut ctx = context();
        let mut ind = Individual::new(1);
        ind.begin_generation(2);

        let outcome = engine(&ws).mutate(&mut ctx, &mut ind, &VoteTables::default()).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Exhausted);
        assert_eq!(ws.builds().await, 0);
    }

    #[tokio::test]
    async fn test_optimization_exhaustion_resets_to_fixed_baseline() {
        let ws = Arc::new(MockWorkspace::new(&[("RSM", 1)]).with_failing_builds());
        ws.seed_project(ArtifactRef::new(4, 3), &["ASAT#1"]).await;
        ws.seed_project(ArtifactRef::new(6, 3), &["ASAT#1", "RSM#0"]).await;
        let mut ctx = context();
        ctx.phase = Phase::Optimization;
        let mut ind = Individual::new(3);
        ind.switch_generation = 4;
        ind.begin_generation(7);

        let outcome = engine(&ws).mutate(&mut ctx, &mut ind, &VoteTables::default()).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Exhausted);
        assert_eq!(ws.project(ArtifactRef::new(7, 3)).await, Some(vec!["ASAT#1".to_string()]));
    }
}
