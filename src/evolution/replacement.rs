//! 替换弱个体
//!
//! 每代给最近分数最低的一批个体记一次“表现不佳”；每隔 replace_interval 代，
//! 累计次数达到阈值的个体要么克隆排名前 10% 的某个个体（保留自己的 id），要么重启到本阶段基线。

use std::cmp::Ordering;

use crate::core::{Result, SearchContext};
use crate::evolution::individual::Individual;
use crate::workspace::{ArtifactRef, ArtifactStore, Baseline};

fn by_latest_score(a: &Individual, b: &Individual) -> Ordering {
    let a = a.latest_score().unwrap_or(f64::NEG_INFINITY);
    let b = b.latest_score().unwrap_or(f64::NEG_INFINITY);
    a.total_cmp(&b)
}

/// 对种群执行一轮替换；返回时种群总是按 id 升序
pub async fn replace_lowest(
    ctx: &mut SearchContext,
    store: &dyn ArtifactStore,
    population: &mut Vec<Individual>,
    generation: u32,
) -> Result<()> {
    let len = population.len();
    let num_under = len * ctx.config.replace_lowest_percent as usize / 100;
    if num_under == 0 {
        population.sort_by_key(|ind| ind.id);
        return Ok(());
    }

    population.sort_by(by_latest_score);
    for weak in population.iter_mut().take(num_under) {
        weak.turns_underperforming += 1;
    }

    let result = if generation % ctx.config.replace_interval.max(1) == 0 {
        replace_weak(ctx, store, population, num_under).await
    } else {
        Ok(())
    };

    population.sort_by_key(|ind| ind.id);
    result
}

async fn replace_weak(
    ctx: &mut SearchContext,
    store: &dyn ArtifactStore,
    population: &mut [Individual],
    num_under: usize,
) -> Result<()> {
    let len = population.len();
    tracing::debug!(num_under, "Replacing weakest individuals");

    for i in 0..num_under {
        if population[i].turns_underperforming < ctx.config.replace_weak_min_turns {
            continue;
        }
        population[i].turns_underperforming = 0;

        let draw = ctx.rng.between(1, 100);
        if draw <= ctx.config.replace_with_best_percent as usize {
            // 种群太小，没有前 10%
            if (len as f64) * 0.1 < 1.0 {
                tracing::debug!(population = len, "Population too small to clone from its top tenth");
                break;
            }
            let low = (len as f64 * 0.9) as usize;
            let mut high = None;
            for _ in 0..ctx.config.max_mutation_attempts.max(1) {
                let candidate = ctx.rng.between(low, len).saturating_sub(1);
                if candidate != i {
                    high = Some(candidate);
                    break;
                }
            }
            let Some(high) = high else {
                continue;
            };

            let low_id = population[i].id;
            let high_ref = population[high].artifact();
            tracing::info!(replaced = low_id, with = high_ref.id, "Replacing weak individual with a strong one");
            let mut clone = population[high].clone();
            clone.id = low_id;
            clone.mark_replaced();
            let to = clone.artifact();
            population[i] = clone;
            store.copy(high_ref, ArtifactRef::new(high_ref.generation, to.id)).await?;
        } else {
            let weak = &mut population[i];
            weak.mark_restarted();
            let at = weak.artifact();
            if ctx.is_functional() {
                tracing::info!(individual = weak.id, "Restarting weak individual from the pristine project");
                store.create_local(at, Baseline::Pristine).await?;
            } else {
                tracing::info!(individual = weak.id, "Restarting weak individual from the fixed project");
                store
                    .copy(ArtifactRef::new(weak.switch_generation, weak.id), at)
                    .await?;
            }
        }
    }
    Ok(())
}
