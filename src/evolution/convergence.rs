//! 适应度停滞检测（仅优化阶段）

use serde::{Deserialize, Serialize};

/// 每代种群的平均适应度与最高适应度（附带所在代）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FitnessTrend {
    pub average: Vec<f64>,
    pub best: Vec<(f64, u32)>,
}

fn spread(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
    let min = values.fold(f64::INFINITY, f64::min);
    max - min
}

impl FitnessTrend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, average: f64, best: f64, generation: u32) {
        self.average.push(average);
        self.best.push((best, generation));
    }

    pub fn len(&self) -> usize {
        self.average.len()
    }

    pub fn is_empty(&self) -> bool {
        self.average.is_empty()
    }

    /// 最近 window 代内，平均与最高适应度的波动都不超过各自的阈值
    pub fn has_converged(&self, window: u32, avg_min_delta: f64, best_min_delta: f64) -> bool {
        let window = window as usize;
        if window == 0 || self.average.len() < window || self.best.len() < window {
            return false;
        }
        let avg = &self.average[self.average.len() - window..];
        let best = &self.best[self.best.len() - window..];

        let avg_spread = spread(avg.iter().copied());
        let best_spread = spread(best.iter().map(|(score, _)| *score));
        let converged = avg_spread <= avg_min_delta && best_spread <= best_min_delta;
        if converged {
            tracing::info!(
                window,
                avg_spread,
                best_spread,
                "Fitness has not moved within the convergence window"
            );
        }
        converged
    }
}
