//! 批量测试器：对同一个候选重复运行试验并汇总

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::harness::outcome::{TestMode, TrialOutcome};
use crate::harness::trial::TrialRunner;
use crate::workspace::TargetRefresher;

/// 各类结果计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub successes: u32,
    pub timeouts: u32,
    pub dataraces: u32,
    pub deadlocks: u32,
    pub errors: u32,
}

impl OutcomeCounts {
    pub fn total(&self) -> u32 {
        self.successes + self.timeouts + self.dataraces + self.deadlocks + self.errors
    }

    fn record(&mut self, outcome: &TrialOutcome) {
        match outcome {
            TrialOutcome::Success { .. } => self.successes += 1,
            TrialOutcome::Timeout => self.timeouts += 1,
            TrialOutcome::Datarace { .. } => self.dataraces += 1,
            TrialOutcome::Deadlock => self.deadlocks += 1,
            TrialOutcome::Error => self.errors += 1,
        }
    }
}

/// 计数在调用之间累积，只有显式 reset 才清零
pub struct BatchTester {
    runner: Arc<dyn TrialRunner>,
    targets: Arc<dyn TargetRefresher>,
    pub counts: OutcomeCounts,
    /// 每次成功性能试验的 CPU 时间（秒）
    pub real_time: Vec<f64>,
    pub voluntary_switches: Vec<f64>,
    /// 按试验顺序记录是否成功
    pub good_runs: Vec<bool>,
}

impl BatchTester {
    pub fn new(runner: Arc<dyn TrialRunner>, targets: Arc<dyn TargetRefresher>) -> Self {
        Self {
            runner,
            targets,
            counts: OutcomeCounts::default(),
            real_time: Vec::new(),
            voluntary_switches: Vec::new(),
            good_runs: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.counts = OutcomeCounts::default();
        self.real_time.clear();
        self.voluntary_switches.clear();
        self.good_runs.clear();
    }

    /// 运行直到累计次数达到 `required_runs`；返回是否全部成功
    pub async fn run(&mut self, mode: TestMode, required_runs: u32, stop_on_first_failure: bool) -> bool {
        while self.counts.total() < required_runs {
            let outcome = self.runner.run_trial(mode).await;
            self.counts.record(&outcome);
            self.good_runs.push(outcome.is_success());

            if let TrialOutcome::Success { perf: Some(perf) } = &outcome {
                if mode == TestMode::Performance {
                    self.real_time.push(perf.cpu_seconds);
                    self.voluntary_switches.push(perf.voluntary_switches);
                }
            }

            if stop_on_first_failure && !outcome.is_success() {
                tracing::info!(
                    after = self.counts.total(),
                    outcome = outcome.label(),
                    "Stopping batch on first failure"
                );
                break;
            }
        }

        self.targets.refresh().await;

        let passed = self.counts.successes == required_runs;
        tracing::debug!(
            successes = self.counts.successes,
            timeouts = self.counts.timeouts,
            dataraces = self.counts.dataraces,
            deadlocks = self.counts.deadlocks,
            errors = self.counts.errors,
            passed,
            "Batch finished"
        );
        passed
    }

    pub fn average_real_time(&self) -> Option<f64> {
        mean(&self.real_time)
    }

    pub fn average_voluntary_switches(&self) -> Option<f64> {
        mean(&self.voluntary_switches)
    }
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
