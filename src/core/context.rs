//! 搜索上下文
//!
//! 阶段标记、模型检查开关、随机源与变异体缓存全部放在 SearchContext 中显式传递，
//! 组件之间没有全局可变状态。

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::core::error::{RepairError, Result};
use crate::core::random::RandomSource;
use crate::evolution::cache::MutantCache;
use crate::operators::OperatorCatalog;

/// 搜索阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// 修复阶段：寻找能稳定通过全部测试的变异体
    Functional,
    /// 优化阶段：在已正确的变异体中寻找性能最好的
    Optimization,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Functional => write!(f, "functional"),
            Phase::Optimization => write!(f, "optimization"),
        }
    }
}

/// 运行期搜索参数（由 AppConfig 展平而来）
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub population: u32,
    pub generations: u32,
    pub runs: u32,
    pub validation_multiplier: u32,
    pub calibrate_timeout: bool,
    pub timeout_multiplier: u32,
    pub success_weight: f64,
    pub timeout_weight: f64,
    pub replace_lowest_percent: u32,
    pub replace_interval: u32,
    pub replace_weak_min_turns: u32,
    pub replace_with_best_percent: u32,
    pub ranking_window: u32,
    pub random_mutation: bool,
    pub only_functional: bool,
    pub max_mutation_attempts: u32,
    pub prune_interval: u32,
    pub exclude_entrypoint: bool,
    pub convergence_window: u32,
    pub avg_fitness_min_delta: f64,
    pub best_fitness_min_delta: f64,
    pub model_check_enabled: bool,
    pub model_check_depth: u32,
    pub model_check_max_inconclusive: u32,
    pub random_seed: Option<u64>,
    pub operators: OperatorCatalog,
}

impl From<&AppConfig> for SearchConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            population: cfg.evolution.population,
            generations: cfg.evolution.generations,
            runs: cfg.testing.runs,
            validation_multiplier: cfg.testing.validation_multiplier,
            calibrate_timeout: cfg.testing.calibrate_timeout,
            timeout_multiplier: cfg.testing.timeout_multiplier,
            success_weight: cfg.fitness.success_weight,
            timeout_weight: cfg.fitness.timeout_weight,
            replace_lowest_percent: cfg.evolution.replace_lowest_percent,
            replace_interval: cfg.evolution.replace_interval,
            replace_weak_min_turns: cfg.evolution.replace_weak_min_turns,
            replace_with_best_percent: cfg.evolution.replace_with_best_percent,
            ranking_window: cfg.evolution.ranking_window,
            random_mutation: cfg.evolution.random_mutation,
            only_functional: cfg.evolution.only_functional,
            max_mutation_attempts: cfg.evolution.max_mutation_attempts,
            prune_interval: cfg.evolution.prune_interval,
            exclude_entrypoint: cfg.evolution.exclude_entrypoint,
            convergence_window: cfg.convergence.window,
            avg_fitness_min_delta: cfg.convergence.avg_min_delta,
            best_fitness_min_delta: cfg.convergence.best_min_delta,
            model_check_enabled: cfg.model_check.enabled,
            model_check_depth: cfg.model_check.search_depth,
            model_check_max_inconclusive: cfg.model_check.max_inconclusive,
            random_seed: cfg.evolution.random_seed,
            operators: OperatorCatalog::new(cfg.operators.clone()),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.population == 0 {
            return Err(RepairError::Config("evolution.population must be at least 1".into()));
        }
        if self.generations == 0 {
            return Err(RepairError::Config("evolution.generations must be at least 1".into()));
        }
        if self.runs == 0 {
            return Err(RepairError::Config("testing.runs must be at least 1".into()));
        }
        if self.validation_multiplier == 0 {
            return Err(RepairError::Config(
                "testing.validation_multiplier must be at least 1".into(),
            ));
        }
        if self.calibrate_timeout && self.timeout_multiplier == 0 {
            return Err(RepairError::Config("testing.timeout_multiplier must be at least 1".into()));
        }
        for (key, value) in [
            ("evolution.replace_lowest_percent", self.replace_lowest_percent),
            ("evolution.replace_with_best_percent", self.replace_with_best_percent),
        ] {
            if value > 100 {
                return Err(RepairError::Config(format!("{key} must be within 0..=100")));
            }
        }
        if self.replace_interval == 0 || self.prune_interval == 0 {
            return Err(RepairError::Config(
                "evolution.replace_interval and evolution.prune_interval must be at least 1".into(),
            ));
        }
        if self.operators.enabled_count() == 0 {
            return Err(RepairError::Config("no mutation operator is enabled".into()));
        }
        if self.model_check_enabled && self.model_check_depth == 0 {
            return Err(RepairError::Config("model_check.search_depth must be at least 1".into()));
        }
        Ok(())
    }

    /// 扩展验证的试验次数
    pub fn validation_runs(&self) -> u32 {
        self.runs * self.validation_multiplier
    }

    /// 模型检查深度换算时的满分
    pub fn max_fitness(&self) -> f64 {
        f64::from(self.runs) * self.success_weight
    }
}

/// 贯穿所有组件调用的搜索状态
pub struct SearchContext {
    pub config: SearchConfig,
    pub phase: Phase,
    /// 模型检查是否仍在使用（可能在运行中被停用）
    pub use_model_checker: bool,
    pub inconclusive_model_checks: u32,
    pub cache: MutantCache,
    pub rng: Box<dyn RandomSource>,
}

impl SearchContext {
    pub fn new(config: SearchConfig, rng: Box<dyn RandomSource>) -> Self {
        let use_model_checker = config.model_check_enabled;
        Self {
            config,
            phase: Phase::Functional,
            use_model_checker,
            inconclusive_model_checks: 0,
            cache: MutantCache::new(),
            rng,
        }
    }

    pub fn is_functional(&self) -> bool {
        self.phase == Phase::Functional
    }
}

impl std::fmt::Debug for SearchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchContext")
            .field("phase", &self.phase)
            .field("use_model_checker", &self.use_model_checker)
            .field("inconclusive_model_checks", &self.inconclusive_model_checks)
            .field("cached_mutants", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::random::StdRandom;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = SearchConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.validation_runs(), 150);
        assert_eq!(cfg.max_fitness(), 1000.0);
    }

    #[test]
    fn test_zero_population_rejected() {
        let cfg = SearchConfig {
            population: 0,
            ..SearchConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_percent_out_of_range_rejected() {
        let cfg = SearchConfig {
            replace_with_best_percent: 120,
            ..SearchConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_context_starts_in_functional_phase() {
        let ctx = SearchContext::new(SearchConfig::default(), Box::new(StdRandom::seeded(3)));
        assert!(ctx.is_functional());
        assert!(!ctx.use_model_checker);
        assert!(ctx.cache.is_empty());
    }
}
